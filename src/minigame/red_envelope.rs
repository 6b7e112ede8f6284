//! Red-envelope grab
//! Mission: shuffle a packet per participant, let everyone grab exactly one,
//! and credit cash prizes exactly once at reveal.

use crate::errors::{GameError, GameResult};
use crate::minigame::{
    GamePayload, GamePhase, GameType, MiniGameEngine, MiniGameState, TOTAL_PREP_TIME_SECS,
};
use crate::clock::now_ts;
use crate::store::PrizeKind;
use crate::ws::events::{AssetsUpdate, ServerEvent};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

const DEFAULT_CONSOLATION_NAME: &str = "Lucky Star";

/// One grabbable unit of the prize pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Packet {
    pub index: usize,
    pub name: String,
    pub kind: PrizeKind,
    pub prize_value: f64,
    pub is_taken: bool,
    pub owner_id: Option<i64>,
    pub is_scratched: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedEnvelopeState {
    pub packets: Vec<Packet>,
    /// Employee user ids eligible to grab.
    pub participants: Vec<i64>,
}

impl RedEnvelopeState {
    pub fn sync_view(&self) -> serde_json::Value {
        json!({
            "packets": self.packets,
            "participants": self.participants,
        })
    }

    fn packet_of(&self, user_id: i64) -> Option<&Packet> {
        self.packets
            .iter()
            .find(|p| p.owner_id == Some(user_id))
    }
}

fn payload_mut(state: &mut MiniGameState) -> GameResult<&mut RedEnvelopeState> {
    match &mut state.payload {
        GamePayload::RedEnvelope(inner) => Ok(inner),
        _ => Err(GameError::Precondition(
            "no red envelope game is active".to_string(),
        )),
    }
}

/// Build the packet pool: expand catalogue items, pad a participant-count
/// deficit with consolation packets, trim any surplus, then Fisher-Yates
/// shuffle and re-index `0..N-1`.
pub async fn init(
    engine: &MiniGameEngine,
    state: &mut MiniGameState,
    consolation_name: Option<String>,
    consolation_value: Option<f64>,
) -> GameResult<()> {
    let items = engine.store().active_red_envelope_items().await?;
    let participants: Vec<i64> = engine
        .store()
        .employees()
        .await?
        .iter()
        .map(|u| u.id)
        .collect();

    let mut packets: Vec<Packet> = Vec::new();
    for item in &items {
        for _ in 0..item.amount {
            packets.push(Packet {
                index: 0,
                name: item.name.clone(),
                kind: item.kind,
                prize_value: item.prize_value,
                is_taken: false,
                owner_id: None,
                is_scratched: false,
            });
        }
    }

    let target = participants.len();
    let consolation_value = consolation_value.unwrap_or(0.0);
    let consolation_name =
        consolation_name.unwrap_or_else(|| DEFAULT_CONSOLATION_NAME.to_string());
    while packets.len() < target {
        packets.push(Packet {
            index: 0,
            name: consolation_name.clone(),
            kind: if consolation_value > 0.0 {
                PrizeKind::Cash
            } else {
                PrizeKind::Physical
            },
            prize_value: consolation_value,
            is_taken: false,
            owner_id: None,
            is_scratched: false,
        });
    }
    packets.truncate(target);

    packets.shuffle(&mut rand::thread_rng());
    for (i, packet) in packets.iter_mut().enumerate() {
        packet.index = i;
    }

    info!(
        packets = packets.len(),
        participants = participants.len(),
        "🧧 red envelope initialized"
    );
    state.game_type = GameType::RedEnvelope;
    state.phase = GamePhase::Idle;
    state.start_time = 0;
    state.end_time = 0;
    state.payload = GamePayload::RedEnvelope(RedEnvelopeState {
        packets,
        participants,
    });
    engine.commit_and_sync(state).await
}

/// Refresh the participant list and enter the shuffle animation.
pub async fn start_shuffle(engine: &MiniGameEngine, state: &mut MiniGameState) -> GameResult<()> {
    if state.game_type != GameType::RedEnvelope
        || !matches!(state.phase, GamePhase::Idle | GamePhase::Shuffle)
    {
        return Err(GameError::Precondition(
            "red envelope is not ready to shuffle".to_string(),
        ));
    }
    let participants: Vec<i64> = engine
        .store()
        .employees()
        .await?
        .iter()
        .map(|u| u.id)
        .collect();
    let payload = payload_mut(state)?;
    payload.participants = participants;
    state.phase = GamePhase::Shuffle;
    engine.commit_and_sync(state).await
}

/// Kick off the prep countdown; GAMING begins after six seconds.
pub async fn start_grab(engine: &MiniGameEngine, state: &mut MiniGameState) -> GameResult<()> {
    if state.game_type != GameType::RedEnvelope || state.phase != GamePhase::Shuffle {
        return Err(GameError::Precondition(
            "shuffle the packets before grabbing".to_string(),
        ));
    }
    let now = now_ts();
    state.phase = GamePhase::Countdown;
    state.start_time = now;
    state.end_time = now + TOTAL_PREP_TIME_SECS;
    engine.arm_timer(
        TOTAL_PREP_TIME_SECS,
        (GameType::RedEnvelope, GamePhase::Countdown),
    );
    engine.commit_and_sync(state).await
}

pub(crate) async fn enter_gaming(
    engine: &MiniGameEngine,
    state: &mut MiniGameState,
) -> GameResult<()> {
    let now = now_ts();
    state.phase = GamePhase::Gaming;
    state.start_time = now;
    state.end_time = now;
    info!("🏃 red envelope grab is live");
    engine.commit_and_sync(state).await
}

/// A participant grabs a packet: one packet per user, first grab wins.
pub async fn grab_packet(
    engine: &MiniGameEngine,
    state: &mut MiniGameState,
    user_id: i64,
    packet_index: usize,
) -> GameResult<()> {
    if state.game_type != GameType::RedEnvelope || state.phase != GamePhase::Gaming {
        return Err(GameError::Precondition("grabbing is not open".to_string()));
    }
    let payload = payload_mut(state)?;
    if !payload.participants.contains(&user_id) {
        return Err(GameError::Permission(
            "only participants may grab a packet".to_string(),
        ));
    }
    if payload.packet_of(user_id).is_some() {
        return Err(GameError::Conflict("you already hold a packet".to_string()));
    }
    let packet = payload
        .packets
        .get_mut(packet_index)
        .ok_or_else(|| GameError::NotFound(format!("packet {packet_index} not found")))?;
    if packet.is_taken {
        return Err(GameError::Conflict("packet already taken".to_string()));
    }
    packet.is_taken = true;
    packet.owner_id = Some(user_id);

    engine.bus().global_emit(ServerEvent::MinigameEvent(json!({
        "type": "PACKET_TAKEN",
        "packetIndex": packet_index,
        "userId": user_id,
    })));
    engine.commit_and_sync(state).await
}

/// Credit every taken cash packet to its owner and open the scratch phase.
pub async fn reveal_result(engine: &MiniGameEngine, state: &mut MiniGameState) -> GameResult<()> {
    if state.game_type != GameType::RedEnvelope || state.phase != GamePhase::Gaming {
        return Err(GameError::Precondition(
            "reveal is only valid while grabbing".to_string(),
        ));
    }

    let winners: Vec<(i64, f64)> = match &state.payload {
        GamePayload::RedEnvelope(payload) => payload
            .packets
            .iter()
            .filter(|p| p.is_taken && p.kind == PrizeKind::Cash && p.prize_value > 0.0)
            .filter_map(|p| p.owner_id.map(|owner| (owner, p.prize_value)))
            .collect(),
        _ => Vec::new(),
    };

    // Phase flips before the prizes go out, so a re-sent command cannot
    // credit twice.
    state.phase = GamePhase::Reveal;

    for (owner, value) in winners {
        match engine.store().credit_cash(owner, value).await {
            Ok(user) => {
                engine
                    .bus()
                    .to_user(owner, ServerEvent::AssetsUpdate(AssetsUpdate::from(&user)));
            }
            Err(e) => warn!(owner, value, error = %e, "prize credit failed"),
        }
    }
    info!("🎁 red envelope prizes credited");
    engine.commit_and_sync(state).await
}

/// A winner finished scratching their packet.
pub async fn scratch_complete(
    engine: &MiniGameEngine,
    state: &mut MiniGameState,
    user_id: i64,
) -> GameResult<()> {
    if state.game_type != GameType::RedEnvelope || state.phase != GamePhase::Reveal {
        return Err(GameError::Precondition("nothing to scratch".to_string()));
    }
    let payload = payload_mut(state)?;
    let packet = payload
        .packets
        .iter_mut()
        .find(|p| p.owner_id == Some(user_id))
        .ok_or_else(|| GameError::NotFound("you hold no packet".to_string()))?;
    packet.is_scratched = true;

    let all_scratched = payload
        .packets
        .iter()
        .filter(|p| p.is_taken)
        .all(|p| p.is_scratched);
    if all_scratched {
        finish_scratching(engine, state).await
    } else {
        engine.commit_and_sync(state).await
    }
}

/// Shortcut the scratch wait; prizes were already credited at reveal.
pub async fn force_reveal(engine: &MiniGameEngine, state: &mut MiniGameState) -> GameResult<()> {
    if state.game_type != GameType::RedEnvelope || state.phase != GamePhase::Reveal {
        return Err(GameError::Precondition(
            "force reveal is only valid after the reveal".to_string(),
        ));
    }
    finish_scratching(engine, state).await
}

async fn finish_scratching(engine: &MiniGameEngine, state: &mut MiniGameState) -> GameResult<()> {
    state.phase = GamePhase::Result;
    engine
        .bus()
        .global_emit(ServerEvent::MinigameEvent(json!({ "type": "ALL_SCRATCHED" })));
    engine.commit_and_sync(state).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Leaderboard;
    use crate::script::ScriptCache;
    use crate::store::{RedEnvelopeItem, Role, Store, User};
    use crate::ws::Bus;
    use crate::ws::events::AdminMiniGameAction;
    use std::sync::Arc;

    async fn engine_with_employees(n: usize) -> (Store, MiniGameEngine, Vec<User>) {
        let store = Store::open_in_memory().unwrap();
        let bus = Bus::new(512);
        let cache = Arc::new(ScriptCache::new());
        let leaderboard = Leaderboard::new(store.clone(), cache);
        let engine = MiniGameEngine::new(store.clone(), bus, leaderboard);

        let mut users = Vec::new();
        for i in 0..n {
            let user = store
                .create_user(&format!("emp{i}"), "hash", "Employee", Role::User, 0.0)
                .await
                .unwrap();
            let user = store
                .update_user_admin(
                    user.id,
                    crate::store::AdminUserUpdate {
                        is_employee: Some(true),
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
            users.push(user);
        }
        (store, engine, users)
    }

    async fn add_cash_item(store: &Store, value: f64, amount: i64) {
        store
            .create_red_envelope_item(RedEnvelopeItem {
                id: 0,
                name: format!("{value} cash"),
                kind: PrizeKind::Cash,
                prize_value: value,
                amount,
                display_order: 0,
                is_active: true,
            })
            .await
            .unwrap();
    }

    async fn run_to_gaming(engine: &MiniGameEngine) {
        engine
            .handle_admin(
                AdminMiniGameAction::Init {
                    game_type: "RED_ENVELOPE".to_string(),
                    question_id: None,
                    consolation_name: None,
                    consolation_value: None,
                },
                1,
                Role::Admin,
            )
            .await
            .unwrap();
        engine
            .handle_admin(AdminMiniGameAction::StartShuffle, 1, Role::Admin)
            .await
            .unwrap();
        engine
            .handle_admin(AdminMiniGameAction::StartGrab, 1, Role::Admin)
            .await
            .unwrap();
        // skip the prep countdown directly
        let mut state = engine.snapshot().await;
        assert_eq!(state.phase, GamePhase::Countdown);
        state.phase = GamePhase::Gaming;
        *engine.inner.state.lock().await = state;
    }

    #[tokio::test]
    async fn test_init_pads_and_trims_to_participants() {
        let (store, engine, _users) = engine_with_employees(4).await;
        add_cash_item(&store, 88.0, 2).await;

        engine
            .handle_admin(
                AdminMiniGameAction::Init {
                    game_type: "RED_ENVELOPE".to_string(),
                    question_id: None,
                    consolation_name: None,
                    consolation_value: None,
                },
                1,
                Role::Admin,
            )
            .await
            .unwrap();

        let state = engine.snapshot().await;
        let GamePayload::RedEnvelope(payload) = &state.payload else {
            panic!("expected red envelope payload");
        };
        // 2 cash packets + 2 consolation pads for 4 participants
        assert_eq!(payload.packets.len(), 4);
        let cash_count = payload
            .packets
            .iter()
            .filter(|p| p.kind == PrizeKind::Cash)
            .count();
        assert_eq!(cash_count, 2);
        // indexes re-assigned 0..N-1
        let mut indexes: Vec<usize> = payload.packets.iter().map(|p| p.index).collect();
        indexes.sort_unstable();
        assert_eq!(indexes, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_surplus_packets_trimmed() {
        let (store, engine, _users) = engine_with_employees(2).await;
        add_cash_item(&store, 8.0, 10).await;
        engine
            .handle_admin(
                AdminMiniGameAction::Init {
                    game_type: "RED_ENVELOPE".to_string(),
                    question_id: None,
                    consolation_name: None,
                    consolation_value: None,
                },
                1,
                Role::Admin,
            )
            .await
            .unwrap();
        let state = engine.snapshot().await;
        let GamePayload::RedEnvelope(payload) = &state.payload else {
            panic!("expected red envelope payload");
        };
        assert_eq!(payload.packets.len(), 2);
    }

    #[tokio::test]
    async fn test_grab_rules_and_prize_credit() {
        let (store, engine, users) = engine_with_employees(2).await;
        add_cash_item(&store, 88.0, 2).await;
        run_to_gaming(&engine).await;

        let a = users[0].id;
        let b = users[1].id;

        engine
            .handle_action(crate::ws::events::MiniGameAction::GrabPacket { packet_index: 0 }, a)
            .await
            .unwrap();

        // same user cannot take a second packet
        let err = engine
            .handle_action(crate::ws::events::MiniGameAction::GrabPacket { packet_index: 1 }, a)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "CONFLICT");

        // taken packet cannot be re-grabbed
        let err = engine
            .handle_action(crate::ws::events::MiniGameAction::GrabPacket { packet_index: 0 }, b)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "CONFLICT");

        engine
            .handle_action(crate::ws::events::MiniGameAction::GrabPacket { packet_index: 1 }, b)
            .await
            .unwrap();

        // no cash moved during gaming
        assert_eq!(store.get_user(a).await.unwrap().cash, 0.0);

        engine
            .handle_admin(AdminMiniGameAction::RevealResult, 1, Role::Admin)
            .await
            .unwrap();
        assert_eq!(store.get_user(a).await.unwrap().cash, 88.0);
        assert_eq!(store.get_user(b).await.unwrap().cash, 88.0);

        // a second reveal is rejected; prizes stay single-shot
        let err = engine
            .handle_admin(AdminMiniGameAction::RevealResult, 1, Role::Admin)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "PRECONDITION");
        assert_eq!(store.get_user(a).await.unwrap().cash, 88.0);
    }

    #[tokio::test]
    async fn test_scratch_completion_and_force_reveal() {
        let (store, engine, users) = engine_with_employees(2).await;
        add_cash_item(&store, 10.0, 2).await;
        run_to_gaming(&engine).await;

        let a = users[0].id;
        let b = users[1].id;
        engine
            .handle_action(crate::ws::events::MiniGameAction::GrabPacket { packet_index: 0 }, a)
            .await
            .unwrap();
        engine
            .handle_action(crate::ws::events::MiniGameAction::GrabPacket { packet_index: 1 }, b)
            .await
            .unwrap();
        engine
            .handle_admin(AdminMiniGameAction::RevealResult, 1, Role::Admin)
            .await
            .unwrap();

        engine
            .handle_action(crate::ws::events::MiniGameAction::ScratchComplete, a)
            .await
            .unwrap();
        assert_eq!(engine.snapshot().await.phase, GamePhase::Reveal);

        engine
            .handle_action(crate::ws::events::MiniGameAction::ScratchComplete, b)
            .await
            .unwrap();
        assert_eq!(engine.snapshot().await.phase, GamePhase::Result);
    }

    #[tokio::test]
    async fn test_non_participant_cannot_grab() {
        let (store, engine, _users) = engine_with_employees(1).await;
        add_cash_item(&store, 10.0, 1).await;
        let outsider = store
            .create_user("outsider", "hash", "Outsider", Role::User, 0.0)
            .await
            .unwrap();
        run_to_gaming(&engine).await;
        let err = engine
            .handle_action(
                crate::ws::events::MiniGameAction::GrabPacket { packet_index: 0 },
                outsider.id,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "PERMISSION");
    }
}
