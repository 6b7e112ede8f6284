//! WebSocket session
//! Mission: authenticate the handshake, send exactly one full-sync snapshot,
//! then pump targeted broadcasts out and typed client events in.

use crate::auth::Claims;
use crate::clock::{derive_state, now_ts};
use crate::errors::{GameError, GameResult};
use crate::state::AppState;
use crate::store::Role;
use crate::ws::events::{ClientEvent, FullSyncState, ServerEvent, TradeError};
use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    response::Response,
    Extension,
};
use serde_json::json;
use tracing::{debug, warn};

/// WebSocket handler for the realtime game stream.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, claims))
}

/// Compute the connection snapshot: game status, price, gated history,
/// personal assets, today's open contracts, published news, leaderboard.
pub async fn build_full_sync(state: &AppState, user_id: i64) -> GameResult<FullSyncState> {
    let status = state.store.get_status().await?;
    let game_status = derive_state(&status, now_ts());
    let price = state
        .cache
        .price_for_day(game_status.current_day)
        .unwrap_or(game_status.initial_price);
    let user = state.store.get_user(user_id).await?;
    let contracts = state
        .store
        .user_open_orders_for_day(user_id, game_status.current_day)
        .await?;
    let history = state.cache.history_up_to(game_status.current_day);
    let news = state.cache.visible_news(game_status.current_day);
    let leaderboard = state.leaderboard.top(100).await?;
    Ok(FullSyncState {
        assets: (&user).into(),
        game_status,
        price,
        history,
        contracts,
        news,
        leaderboard,
    })
}

async fn send_event(socket: &mut WebSocket, event: &ServerEvent) -> bool {
    let msg = serde_json::to_string(event).unwrap_or_else(|e| {
        warn!("Failed to serialize ws event: {}", e);
        "{}".to_string()
    });
    socket.send(Message::Text(msg)).await.is_ok()
}

async fn send_trade_error(socket: &mut WebSocket, err: &GameError) -> bool {
    send_event(
        socket,
        &ServerEvent::TradeError(TradeError {
            kind: err.kind().to_string(),
            message: err.message(),
        }),
    )
    .await
}

async fn handle_socket(mut socket: WebSocket, state: AppState, claims: Claims) {
    let Some(user_id) = claims.user_id() else {
        let _ = socket.close().await;
        return;
    };
    let role = claims.role;

    let mut rx = state.bus.subscribe();
    state.bus.session_connected(user_id);
    debug!(user_id, "🔌 session connected");

    // One snapshot per connection, before any streamed event.
    match build_full_sync(&state, user_id).await {
        Ok(snapshot) => {
            if !send_event(&mut socket, &ServerEvent::FullSyncState(Box::new(snapshot))).await {
                state.bus.session_disconnected(user_id);
                return;
            }
        }
        Err(e) => {
            warn!(user_id, error = %e, "full sync failed, closing session");
            state.bus.session_disconnected(user_id);
            let _ = socket.close().await;
            return;
        }
    }

    loop {
        tokio::select! {
            // Targeted server->client events
            Ok(envelope) = rx.recv() => {
                if envelope.matches(user_id, role)
                    && !send_event(&mut socket, &envelope.event).await
                {
                    break;
                }
            }
            // Typed client->server events
            incoming = socket.recv() => {
                let Some(Ok(msg)) = incoming else { break };
                match msg {
                    Message::Text(text) => {
                        if text == "ping" {
                            let _ = socket.send(Message::Text("pong".to_string())).await;
                            continue;
                        }
                        match serde_json::from_str::<ClientEvent>(&text) {
                            Ok(event) => {
                                dispatch(&state, &mut socket, user_id, role, event).await;
                            }
                            Err(e) => {
                                debug!(user_id, error = %e, "unparseable client event");
                                let err = GameError::Validation("unrecognized event".to_string());
                                send_trade_error(&mut socket, &err).await;
                            }
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
    }

    state.bus.session_disconnected(user_id);
    debug!(user_id, "🔌 session disconnected");
}

/// Route one client event. Trade results and errors go back on this socket
/// only; everything else reaches the caller through the bus.
async fn dispatch(
    state: &AppState,
    socket: &mut WebSocket,
    user_id: i64,
    role: Role,
    event: ClientEvent,
) {
    let trade_result = match event {
        ClientEvent::BuyStock { quantity } => Some(state.trading.buy_stock(user_id, quantity).await),
        ClientEvent::SellStock { quantity } => {
            Some(state.trading.sell_stock(user_id, quantity).await)
        }
        ClientEvent::BuyContract {
            side,
            leverage,
            quantity,
        } => Some(
            state
                .trading
                .open_contract(user_id, &side, leverage, quantity)
                .await,
        ),
        ClientEvent::CancelContract => Some(state.trading.cancel_contracts(user_id).await),
        ClientEvent::BorrowMoney { amount } => Some(state.trading.borrow(user_id, amount).await),
        ClientEvent::RepayMoney { amount } => Some(state.trading.repay(user_id, amount).await),
        ClientEvent::VisitLoanShark => {
            if let Err(e) = state.trading.visit_loan_shark(user_id).await {
                send_trade_error(socket, &e).await;
            }
            None
        }
        ClientEvent::MinigameAction(action) => {
            if let Err(e) = state.minigame.handle_action(action, user_id).await {
                send_event(
                    socket,
                    &ServerEvent::MinigameEvent(json!({
                        "type": "ACTION_REJECTED",
                        "kind": e.kind(),
                        "message": e.message(),
                    })),
                )
                .await;
            }
            None
        }
        ClientEvent::AdminMinigameAction(action) => {
            if let Err(e) = state.minigame.handle_admin(action, user_id, role).await {
                send_event(
                    socket,
                    &ServerEvent::MinigameEvent(json!({
                        "type": "ACTION_REJECTED",
                        "kind": e.kind(),
                        "message": e.message(),
                    })),
                )
                .await;
            }
            None
        }
    };

    if let Some(result) = trade_result {
        match result {
            Ok(success) => {
                send_event(socket, &ServerEvent::TradeSuccess(success)).await;
            }
            Err(e) => {
                send_trade_error(socket, &e).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Config;
    use crate::store::Store;

    fn test_config() -> Config {
        Config {
            database_path: ":memory:".to_string(),
            port: 8000,
            production: false,
            cors_origin: None,
            jwt_secret: "test-secret".to_string(),
            admin_secret: "test-admin".to_string(),
            loan_requires_running: true,
        }
    }

    #[tokio::test]
    async fn test_full_sync_contains_personal_state() {
        let store = Store::open_in_memory().unwrap();
        let state = AppState::build(test_config(), store.clone());
        let user = store
            .create_user("player", "hash", "Player", crate::store::Role::User, 500.0)
            .await
            .unwrap();
        store
            .open_contract(user.id, 0, crate::store::ContractSide::Long, 2, 1, 100.0)
            .await
            .unwrap();

        let sync = build_full_sync(&state, user.id).await.unwrap();
        assert_eq!(sync.assets.cash, 450.0);
        assert_eq!(sync.contracts.len(), 1);
        assert_eq!(sync.price, 100.0);
        assert!(sync.news.is_empty());
        assert_eq!(sync.leaderboard.len(), 1);
        assert_eq!(sync.game_status.current_day, 0);
    }
}
