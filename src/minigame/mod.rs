//! Mini-game engine
//! Mission: drive the red-envelope, quiz, and minority-vote state machines
//! in a single guarded runtime slot with timer-driven phase progression and
//! at-most-once prize distribution.

pub mod minority;
pub mod quiz;
pub mod red_envelope;

pub use minority::{MinorityBet, MinorityState};
pub use quiz::{QuizAnswer, QuizState};
pub use red_envelope::{Packet, RedEnvelopeState};

use crate::clock::now_ts;
use crate::engine::Leaderboard;
use crate::errors::{GameError, GameResult};
use crate::store::{MiniGameRuntimeRow, Role, Store};
use crate::ws::events::{AdminMiniGameAction, MiniGameAction, ServerEvent};
use crate::ws::Bus;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Red-envelope preparation window: 3 s shuffle animation + 3 s countdown.
pub const TOTAL_PREP_TIME_SECS: i64 = 6;
/// Quiz/minority preparation window before the countdown.
pub const PREPARE_SECS: i64 = 5;
/// Countdown length shown to players.
pub const COUNTDOWN_SECS: i64 = 3;
/// Settlement fires this long after the gaming window closes.
pub const SETTLE_GRACE_SECS: i64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameType {
    None,
    RedEnvelope,
    Quiz,
    Minority,
}

impl GameType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GameType::None => "NONE",
            GameType::RedEnvelope => "RED_ENVELOPE",
            GameType::Quiz => "QUIZ",
            GameType::Minority => "MINORITY",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "NONE" => Some(GameType::None),
            "RED_ENVELOPE" => Some(GameType::RedEnvelope),
            "QUIZ" => Some(GameType::Quiz),
            "MINORITY" => Some(GameType::Minority),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GamePhase {
    Idle,
    Shuffle,
    Prepare,
    Countdown,
    Gaming,
    Reveal,
    Result,
}

impl GamePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            GamePhase::Idle => "IDLE",
            GamePhase::Shuffle => "SHUFFLE",
            GamePhase::Prepare => "PREPARE",
            GamePhase::Countdown => "COUNTDOWN",
            GamePhase::Gaming => "GAMING",
            GamePhase::Reveal => "REVEAL",
            GamePhase::Result => "RESULT",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "IDLE" => Some(GamePhase::Idle),
            "SHUFFLE" => Some(GamePhase::Shuffle),
            "PREPARE" => Some(GamePhase::Prepare),
            "COUNTDOWN" => Some(GamePhase::Countdown),
            "GAMING" => Some(GamePhase::Gaming),
            "REVEAL" => Some(GamePhase::Reveal),
            "RESULT" => Some(GamePhase::Result),
            _ => None,
        }
    }
}

/// Game-specific payload held by the runtime slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "game", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GamePayload {
    None,
    RedEnvelope(RedEnvelopeState),
    Quiz(QuizState),
    Minority(MinorityState),
}

/// The single runtime slot shared by all three games.
#[derive(Debug, Clone)]
pub struct MiniGameState {
    pub game_type: GameType,
    pub phase: GamePhase,
    pub start_time: i64,
    pub end_time: i64,
    pub payload: GamePayload,
}

impl MiniGameState {
    pub fn idle() -> Self {
        Self {
            game_type: GameType::None,
            phase: GamePhase::Idle,
            start_time: 0,
            end_time: 0,
            payload: GamePayload::None,
        }
    }

    fn to_row(&self) -> GameResult<MiniGameRuntimeRow> {
        Ok(MiniGameRuntimeRow {
            game_type: self.game_type.as_str().to_string(),
            phase: self.phase.as_str().to_string(),
            start_time: self.start_time,
            end_time: self.end_time,
            payload: serde_json::to_string(&self.payload)?,
        })
    }

    fn from_row(row: &MiniGameRuntimeRow) -> GameResult<Self> {
        let game_type = GameType::from_str(&row.game_type)
            .ok_or_else(|| GameError::Internal(format!("unknown game type {}", row.game_type)))?;
        let phase = GamePhase::from_str(&row.phase)
            .ok_or_else(|| GameError::Internal(format!("unknown phase {}", row.phase)))?;
        let payload: GamePayload = serde_json::from_str(&row.payload)?;
        Ok(Self {
            game_type,
            phase,
            start_time: row.start_time,
            end_time: row.end_time,
            payload,
        })
    }

    /// Public snapshot for `MINIGAME_SYNC`. Hides server-only fields such as
    /// the quiz answer key while the round is live.
    pub fn sync_view(&self) -> serde_json::Value {
        let mut view = json!({
            "gameType": self.game_type.as_str(),
            "phase": self.phase.as_str(),
            "startTime": self.start_time,
            "endTime": self.end_time,
        });
        let detail = match &self.payload {
            GamePayload::None => serde_json::Value::Null,
            GamePayload::RedEnvelope(state) => state.sync_view(),
            GamePayload::Quiz(state) => state.sync_view(self.phase),
            GamePayload::Minority(state) => state.sync_view(),
        };
        view["payload"] = detail;
        view
    }
}

struct EngineInner {
    state: Mutex<MiniGameState>,
    store: Store,
    bus: Bus,
    leaderboard: Leaderboard,
    timers: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

/// Handle to the engine; cheap to clone, one per process.
#[derive(Clone)]
pub struct MiniGameEngine {
    inner: Arc<EngineInner>,
}

impl MiniGameEngine {
    pub fn new(store: Store, bus: Bus, leaderboard: Leaderboard) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                state: Mutex::new(MiniGameState::idle()),
                store,
                bus,
                leaderboard,
                timers: parking_lot::Mutex::new(Vec::new()),
            }),
        }
    }

    pub(crate) fn store(&self) -> &Store {
        &self.inner.store
    }

    pub(crate) fn bus(&self) -> &Bus {
        &self.inner.bus
    }

    pub(crate) fn leaderboard(&self) -> &Leaderboard {
        &self.inner.leaderboard
    }

    pub async fn snapshot(&self) -> MiniGameState {
        self.inner.state.lock().await.clone()
    }

    /// In-memory commit first, then broadcast, then persist.
    pub(crate) async fn commit_and_sync(&self, state: &MiniGameState) -> GameResult<()> {
        self.inner
            .bus
            .global_emit(ServerEvent::MinigameSync(state.sync_view()));
        self.inner.store.save_minigame_runtime(&state.to_row()?).await?;
        Ok(())
    }

    /// Persist the snapshot without a broadcast (per-answer/per-bet writes).
    pub(crate) async fn persist(&self, state: &MiniGameState) -> GameResult<()> {
        self.inner.store.save_minigame_runtime(&state.to_row()?).await?;
        Ok(())
    }

    /// Cancel every armed timer (RESET and superseding commands).
    pub(crate) fn cancel_timers(&self) {
        for handle in self.inner.timers.lock().drain(..) {
            handle.abort();
        }
    }

    /// Arm a phase-advance timer. The callback re-checks the slot identity,
    /// so a stale timer from a superseded game is a no-op even if it fires
    /// before it is aborted.
    pub(crate) fn arm_timer(&self, delay_secs: i64, expected: (GameType, GamePhase)) {
        let engine = self.clone();
        let delay = Duration::from_secs(delay_secs.max(0) as u64);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = engine.on_timer(expected).await {
                warn!(error = %e, "mini-game timer transition failed");
            }
        });
        self.inner.timers.lock().push(handle);
    }

    /// Emit the countdown sequence `3, 2, 1, 0` one second apart.
    pub(crate) fn arm_countdown_broadcast(&self, from: i64) {
        let engine = self.clone();
        let handle = tokio::spawn(async move {
            for n in (0..=from).rev() {
                engine.inner.bus.global_emit(ServerEvent::MinigameCountdown(
                    crate::ws::events::MinigameCountdown { countdown: n },
                ));
                if n > 0 {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        });
        self.inner.timers.lock().push(handle);
    }

    async fn on_timer(&self, expected: (GameType, GamePhase)) -> GameResult<()> {
        let mut state = self.inner.state.lock().await;
        if (state.game_type, state.phase) != expected {
            return Ok(());
        }
        match expected {
            (GameType::RedEnvelope, GamePhase::Countdown) => {
                red_envelope::enter_gaming(self, &mut state).await
            }
            (GameType::Quiz, GamePhase::Prepare) => quiz::enter_countdown(self, &mut state).await,
            (GameType::Quiz, GamePhase::Countdown) => quiz::enter_gaming(self, &mut state).await,
            (GameType::Quiz, GamePhase::Gaming) => quiz::settle(self, &mut state).await,
            (GameType::Minority, GamePhase::Prepare) => {
                minority::enter_countdown(self, &mut state).await
            }
            (GameType::Minority, GamePhase::Countdown) => {
                minority::enter_gaming(self, &mut state).await
            }
            (GameType::Minority, GamePhase::Gaming) => minority::settle(self, &mut state).await,
            _ => Ok(()),
        }
    }

    /// Admin command entry point. Non-admin senders are ignored with an
    /// audit log.
    pub async fn handle_admin(
        &self,
        action: AdminMiniGameAction,
        sender_id: i64,
        sender_role: Role,
    ) -> GameResult<()> {
        if sender_role != Role::Admin {
            warn!(sender_id, "🚫 non-admin mini-game command ignored");
            return Ok(());
        }

        match action {
            AdminMiniGameAction::Reset => {
                self.cancel_timers();
                let mut state = self.inner.state.lock().await;
                *state = MiniGameState::idle();
                self.inner
                    .bus
                    .global_emit(ServerEvent::MinigameSync(state.sync_view()));
                self.inner.store.clear_minigame_runtime().await?;
                info!("🧹 mini-game slot reset");
                Ok(())
            }
            AdminMiniGameAction::Init {
                game_type,
                question_id,
                consolation_name,
                consolation_value,
            } => {
                let game_type = GameType::from_str(&game_type).ok_or_else(|| {
                    GameError::Validation(format!("unknown game type {game_type}"))
                })?;
                self.cancel_timers();
                let mut state = self.inner.state.lock().await;
                match game_type {
                    GameType::RedEnvelope => {
                        red_envelope::init(
                            self,
                            &mut state,
                            consolation_name,
                            consolation_value,
                        )
                        .await
                    }
                    GameType::Quiz => {
                        let question_id = question_id.ok_or_else(|| {
                            GameError::Validation("questionId is required".to_string())
                        })?;
                        quiz::init(self, &mut state, question_id).await
                    }
                    GameType::Minority => {
                        let question_id = question_id.ok_or_else(|| {
                            GameError::Validation("questionId is required".to_string())
                        })?;
                        minority::init(self, &mut state, question_id).await
                    }
                    GameType::None => {
                        Err(GameError::Validation("cannot init game type NONE".to_string()))
                    }
                }
            }
            AdminMiniGameAction::StartShuffle => {
                let mut state = self.inner.state.lock().await;
                red_envelope::start_shuffle(self, &mut state).await
            }
            AdminMiniGameAction::StartGrab => {
                let mut state = self.inner.state.lock().await;
                red_envelope::start_grab(self, &mut state).await
            }
            AdminMiniGameAction::RevealResult => {
                let mut state = self.inner.state.lock().await;
                red_envelope::reveal_result(self, &mut state).await
            }
            AdminMiniGameAction::ForceReveal => {
                let mut state = self.inner.state.lock().await;
                red_envelope::force_reveal(self, &mut state).await
            }
        }
    }

    /// Player action entry point. The phase check and the write happen in
    /// the same critical section.
    pub async fn handle_action(&self, action: MiniGameAction, user_id: i64) -> GameResult<()> {
        let mut state = self.inner.state.lock().await;
        match action {
            MiniGameAction::GrabPacket { packet_index } => {
                red_envelope::grab_packet(self, &mut state, user_id, packet_index).await
            }
            MiniGameAction::ScratchComplete => {
                red_envelope::scratch_complete(self, &mut state, user_id).await
            }
            MiniGameAction::SubmitAnswer { answer } => {
                quiz::submit_answer(self, &mut state, user_id, answer).await
            }
            MiniGameAction::PlaceBet { option, amount } => {
                minority::place_bet(self, &mut state, user_id, option, amount).await
            }
        }
    }

    /// Restore the persisted snapshot after a restart and re-arm timers from
    /// the stored deadline; an overdue deadline fires immediately.
    pub async fn rehydrate(&self) -> GameResult<()> {
        let Some(row) = self.inner.store.load_minigame_runtime().await? else {
            return Ok(());
        };
        let restored = match MiniGameState::from_row(&row) {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, "mini-game snapshot unreadable, starting idle");
                return Ok(());
            }
        };

        let game_type = restored.game_type;
        let phase = restored.phase;
        let end_time = restored.end_time;
        {
            let mut state = self.inner.state.lock().await;
            *state = restored;
        }

        let delta = end_time - now_ts();
        match (game_type, phase) {
            (GameType::RedEnvelope, GamePhase::Countdown)
            | (GameType::Quiz, GamePhase::Prepare)
            | (GameType::Quiz, GamePhase::Countdown)
            | (GameType::Minority, GamePhase::Prepare)
            | (GameType::Minority, GamePhase::Countdown) => {
                self.arm_timer(delta, (game_type, phase));
            }
            (GameType::Quiz, GamePhase::Gaming) | (GameType::Minority, GamePhase::Gaming) => {
                self.arm_timer(delta + SETTLE_GRACE_SECS, (game_type, phase));
            }
            _ => {}
        }
        info!(
            game = game_type.as_str(),
            phase = phase.as_str(),
            "♻️ mini-game state rehydrated"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::ScriptCache;

    fn test_engine(store: Store) -> (MiniGameEngine, Bus) {
        let bus = Bus::new(256);
        let cache = Arc::new(ScriptCache::new());
        let leaderboard = Leaderboard::new(store.clone(), cache);
        (MiniGameEngine::new(store, bus.clone(), leaderboard), bus)
    }

    #[tokio::test]
    async fn test_non_admin_commands_ignored() {
        let store = Store::open_in_memory().unwrap();
        let (engine, _bus) = test_engine(store);
        engine
            .handle_admin(AdminMiniGameAction::Reset, 5, Role::User)
            .await
            .unwrap();
        // slot untouched
        let state = engine.snapshot().await;
        assert_eq!(state.game_type, GameType::None);
    }

    #[tokio::test]
    async fn test_reset_clears_slot_and_snapshot() {
        let store = Store::open_in_memory().unwrap();
        let (engine, _bus) = test_engine(store.clone());
        {
            let mut state = engine.inner.state.lock().await;
            state.game_type = GameType::Quiz;
            state.phase = GamePhase::Gaming;
            engine.commit_and_sync(&state).await.unwrap();
        }
        assert!(store.load_minigame_runtime().await.unwrap().is_some());

        engine
            .handle_admin(AdminMiniGameAction::Reset, 1, Role::Admin)
            .await
            .unwrap();
        let state = engine.snapshot().await;
        assert_eq!(state.game_type, GameType::None);
        assert_eq!(state.phase, GamePhase::Idle);
        assert!(store.load_minigame_runtime().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_state_row_round_trip() {
        let state = MiniGameState {
            game_type: GameType::Quiz,
            phase: GamePhase::Gaming,
            start_time: 100,
            end_time: 130,
            payload: GamePayload::None,
        };
        let row = state.to_row().unwrap();
        let restored = MiniGameState::from_row(&row).unwrap();
        assert_eq!(restored.game_type, GameType::Quiz);
        assert_eq!(restored.phase, GamePhase::Gaming);
        assert_eq!(restored.end_time, 130);
    }

    #[tokio::test]
    async fn test_stale_timer_is_ignored() {
        let store = Store::open_in_memory().unwrap();
        let (engine, _bus) = test_engine(store);
        // timer expects a quiz in PREPARE; the slot is idle, so nothing
        // happens
        engine
            .on_timer((GameType::Quiz, GamePhase::Prepare))
            .await
            .unwrap();
        let state = engine.snapshot().await;
        assert_eq!(state.game_type, GameType::None);
    }
}
