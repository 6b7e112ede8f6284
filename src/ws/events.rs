//! Wire events
//! Mission: define the typed `{event, payload}` frames flowing between the
//! server and connected clients.

use crate::clock::GameState;
use crate::models::round2;
use crate::script::{HistoryDay, NewsItem};
use crate::store::{ContractOrder, ContractSide, User};
use serde::{Deserialize, Serialize};

/// Server -> client frames.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "payload")]
pub enum ServerEvent {
    #[serde(rename = "FULL_SYNC_STATE")]
    FullSyncState(Box<FullSyncState>),
    #[serde(rename = "GAME_STATE_UPDATE")]
    GameStateUpdate(GameStateUpdate),
    #[serde(rename = "PRICE_UPDATE")]
    PriceUpdate(PriceUpdate),
    #[serde(rename = "NEWS_UPDATE")]
    NewsUpdate(NewsUpdate),
    #[serde(rename = "LEADERBOARD_UPDATE")]
    LeaderboardUpdate(LeaderboardUpdate),
    #[serde(rename = "CONTRACT_SETTLED")]
    ContractSettled(ContractSettled),
    #[serde(rename = "ASSETS_UPDATE")]
    AssetsUpdate(AssetsUpdate),
    #[serde(rename = "TRADE_SUCCESS")]
    TradeSuccess(TradeSuccess),
    #[serde(rename = "TRADE_ERROR")]
    TradeError(TradeError),
    #[serde(rename = "MINIGAME_SYNC")]
    MinigameSync(serde_json::Value),
    #[serde(rename = "MINIGAME_EVENT")]
    MinigameEvent(serde_json::Value),
    #[serde(rename = "MINIGAME_COUNTDOWN")]
    MinigameCountdown(MinigameCountdown),
    #[serde(rename = "CLEAR_NEWS")]
    ClearNews,
    #[serde(rename = "FORCE_LOGOUT")]
    ForceLogout(ForceLogout),
    #[serde(rename = "LOAN_CONFIG_UPDATE")]
    LoanConfigUpdate(LoanConfigUpdate),
    #[serde(rename = "LOAN_SHARK_VISIT_UPDATE")]
    LoanSharkVisitUpdate(LoanSharkVisitUpdate),
    #[serde(rename = "USER_DATA_UPDATED")]
    UserDataUpdated(UserDataUpdated),
}

/// The one-shot snapshot sent on connection.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FullSyncState {
    pub game_status: GameState,
    pub price: f64,
    pub history: Vec<HistoryDay>,
    pub assets: AssetsUpdate,
    pub contracts: Vec<ContractOrder>,
    pub news: Vec<NewsItem>,
    pub leaderboard: Vec<LeaderboardEntry>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStateUpdate {
    pub current_day: i64,
    pub is_game_started: bool,
    /// Seconds to the next day boundary.
    pub countdown: i64,
    pub total_days: i64,
    pub max_leverage: i64,
}

impl From<&GameState> for GameStateUpdate {
    fn from(state: &GameState) -> Self {
        Self {
            current_day: state.current_day,
            is_game_started: state.is_started,
            countdown: state.seconds_to_next_day,
            total_days: state.total_days,
            max_leverage: state.max_leverage,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceUpdate {
    pub day: i64,
    pub price: f64,
    pub history: Vec<HistoryDay>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewsUpdate {
    pub day: i64,
    pub title: String,
    pub content: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub user_id: i64,
    pub display_name: String,
    pub avatar: String,
    pub total_assets: f64,
    pub rank: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct LeaderboardUpdate {
    pub data: Vec<LeaderboardEntry>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractSettled {
    #[serde(rename = "type")]
    pub side: ContractSide,
    pub quantity: i64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub pnl: f64,
    pub new_cash: f64,
    pub new_debt: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetsUpdate {
    pub cash: f64,
    pub stocks: i64,
    pub debt: f64,
    pub daily_borrowed: f64,
}

impl From<&User> for AssetsUpdate {
    fn from(user: &User) -> Self {
        Self {
            cash: round2(user.cash),
            stocks: user.stocks,
            debt: round2(user.debt),
            daily_borrowed: round2(user.daily_borrowed),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeSuccess {
    pub action: String,
    pub assets: AssetsUpdate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<ContractOrder>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refund: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeError {
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MinigameCountdown {
    pub countdown: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForceLogout {
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanConfigUpdate {
    pub max_loan_amount: f64,
    pub daily_interest_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanSharkVisitUpdate {
    pub user_id: i64,
    pub display_name: String,
    pub visit_count: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDataUpdated {
    pub user_id: i64,
    pub display_name: String,
    pub avatar: String,
}

/// Client -> server frames.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "payload")]
pub enum ClientEvent {
    #[serde(rename = "BUY_STOCK")]
    BuyStock { quantity: i64 },
    #[serde(rename = "SELL_STOCK")]
    SellStock { quantity: i64 },
    #[serde(rename = "BUY_CONTRACT")]
    BuyContract {
        #[serde(rename = "type")]
        side: String,
        leverage: i64,
        quantity: i64,
    },
    #[serde(rename = "CANCEL_CONTRACT")]
    CancelContract,
    #[serde(rename = "BORROW_MONEY")]
    BorrowMoney { amount: f64 },
    #[serde(rename = "REPAY_MONEY")]
    RepayMoney { amount: f64 },
    #[serde(rename = "VISIT_LOAN_SHARK")]
    VisitLoanShark,
    #[serde(rename = "MINIGAME_ACTION")]
    MinigameAction(MiniGameAction),
    #[serde(rename = "ADMIN_MINIGAME_ACTION")]
    AdminMinigameAction(AdminMiniGameAction),
}

/// Player mini-game actions.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MiniGameAction {
    #[serde(rename_all = "camelCase")]
    GrabPacket { packet_index: usize },
    ScratchComplete,
    SubmitAnswer { answer: String },
    PlaceBet { option: String, amount: f64 },
}

/// Admin mini-game commands.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdminMiniGameAction {
    Reset,
    #[serde(rename_all = "camelCase")]
    Init {
        game_type: String,
        #[serde(default)]
        question_id: Option<i64>,
        #[serde(default)]
        consolation_name: Option<String>,
        #[serde(default)]
        consolation_value: Option<f64>,
    },
    StartShuffle,
    StartGrab,
    RevealResult,
    ForceReveal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_event_frame_shape() {
        let frame = ServerEvent::NewsUpdate(NewsUpdate {
            day: 3,
            title: "Crash".to_string(),
            content: None,
        });
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["event"], "NEWS_UPDATE");
        assert_eq!(json["payload"]["day"], 3);
    }

    #[test]
    fn test_unit_event_has_no_payload() {
        let json = serde_json::to_value(ServerEvent::ClearNews).unwrap();
        assert_eq!(json["event"], "CLEAR_NEWS");
        assert!(json.get("payload").is_none());
    }

    #[test]
    fn test_client_event_parsing() {
        let ev: ClientEvent =
            serde_json::from_str(r#"{"event":"BUY_STOCK","payload":{"quantity":4}}"#).unwrap();
        assert!(matches!(ev, ClientEvent::BuyStock { quantity: 4 }));

        let ev: ClientEvent = serde_json::from_str(
            r#"{"event":"BUY_CONTRACT","payload":{"type":"SHORT","leverage":5,"quantity":2}}"#,
        )
        .unwrap();
        match ev {
            ClientEvent::BuyContract {
                side,
                leverage,
                quantity,
            } => {
                assert_eq!(side, "SHORT");
                assert_eq!(leverage, 5);
                assert_eq!(quantity, 2);
            }
            other => panic!("unexpected event: {other:?}"),
        }

        let ev: ClientEvent = serde_json::from_str(r#"{"event":"CANCEL_CONTRACT"}"#).unwrap();
        assert!(matches!(ev, ClientEvent::CancelContract));
    }

    #[test]
    fn test_minigame_action_parsing() {
        let ev: ClientEvent = serde_json::from_str(
            r#"{"event":"MINIGAME_ACTION","payload":{"type":"GRAB_PACKET","packetIndex":7}}"#,
        )
        .unwrap();
        match ev {
            ClientEvent::MinigameAction(MiniGameAction::GrabPacket { packet_index }) => {
                assert_eq!(packet_index, 7)
            }
            other => panic!("unexpected event: {other:?}"),
        }

        let ev: ClientEvent = serde_json::from_str(
            r#"{"event":"ADMIN_MINIGAME_ACTION","payload":{"type":"INIT","gameType":"QUIZ","questionId":3}}"#,
        )
        .unwrap();
        match ev {
            ClientEvent::AdminMinigameAction(AdminMiniGameAction::Init {
                game_type,
                question_id,
                ..
            }) => {
                assert_eq!(game_type, "QUIZ");
                assert_eq!(question_id, Some(3));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_assets_update_rounds() {
        let update = AssetsUpdate {
            cash: 10.0,
            stocks: 2,
            debt: 0.0,
            daily_borrowed: 0.0,
        };
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["dailyBorrowed"], 0.0);
    }
}
