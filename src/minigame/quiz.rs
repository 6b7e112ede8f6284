//! Speed quiz
//! Mission: one timed question; correct answers are ranked by speed and the
//! fastest three take fixed rewards, the rest a speed-scaled bonus.

use crate::clock::now_ts;
use crate::errors::{GameError, GameResult};
use crate::minigame::{
    GamePayload, GamePhase, GameType, MiniGameEngine, MiniGameState, COUNTDOWN_SECS, PREPARE_SECS,
    SETTLE_GRACE_SECS,
};
use crate::models::round2;
use crate::store::QuizQuestion;
use crate::ws::events::{AssetsUpdate, LeaderboardUpdate, ServerEvent};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizAnswer {
    pub answer: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizWinner {
    pub user_id: i64,
    pub rank: usize,
    pub reward: f64,
    pub answered_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizState {
    pub question_id: i64,
    pub question: QuizQuestion,
    /// First question with a later `(sort_order, id)`, for chaining rounds.
    pub next_candidate_id: Option<i64>,
    pub answers: BTreeMap<i64, QuizAnswer>,
    pub winners: Vec<QuizWinner>,
}

impl QuizState {
    /// Client view; the answer key stays hidden until the round is over.
    pub fn sync_view(&self, phase: GamePhase) -> serde_json::Value {
        let mut view = json!({
            "questionId": self.question_id,
            "question": self.question.question,
            "options": {
                "A": self.question.option_a,
                "B": self.question.option_b,
                "C": self.question.option_c,
                "D": self.question.option_d,
            },
            "duration": self.question.duration,
            "answeredUserIds": self.answers.keys().collect::<Vec<_>>(),
            "nextCandidateId": self.next_candidate_id,
        });
        if phase == GamePhase::Result {
            view["correctAnswer"] = json!(self.question.correct_answer);
            view["winners"] = json!(self.winners);
        }
        view
    }
}

fn payload_mut(state: &mut MiniGameState) -> GameResult<&mut QuizState> {
    match &mut state.payload {
        GamePayload::Quiz(inner) => Ok(inner),
        _ => Err(GameError::Precondition("no quiz is active".to_string())),
    }
}

/// Load the question and enter the five-second PREPARE phase.
pub async fn init(
    engine: &MiniGameEngine,
    state: &mut MiniGameState,
    question_id: i64,
) -> GameResult<()> {
    let question = engine.store().get_quiz_question(question_id).await?;
    let next_candidate_id = engine.store().next_quiz_question_after(&question).await?;

    let now = now_ts();
    state.game_type = GameType::Quiz;
    state.phase = GamePhase::Prepare;
    state.start_time = now;
    state.end_time = now + PREPARE_SECS;
    state.payload = GamePayload::Quiz(QuizState {
        question_id,
        question,
        next_candidate_id,
        answers: BTreeMap::new(),
        winners: Vec::new(),
    });
    engine.arm_timer(PREPARE_SECS, (GameType::Quiz, GamePhase::Prepare));
    info!(question_id, "❓ quiz round prepared");
    engine.commit_and_sync(state).await
}

pub(crate) async fn enter_countdown(
    engine: &MiniGameEngine,
    state: &mut MiniGameState,
) -> GameResult<()> {
    let now = now_ts();
    state.phase = GamePhase::Countdown;
    state.start_time = now;
    state.end_time = now + COUNTDOWN_SECS;
    engine.arm_countdown_broadcast(COUNTDOWN_SECS);
    engine.arm_timer(COUNTDOWN_SECS, (GameType::Quiz, GamePhase::Countdown));
    engine.commit_and_sync(state).await
}

pub(crate) async fn enter_gaming(
    engine: &MiniGameEngine,
    state: &mut MiniGameState,
) -> GameResult<()> {
    let duration = match &state.payload {
        GamePayload::Quiz(q) => q.question.duration,
        _ => return Err(GameError::Precondition("no quiz is active".to_string())),
    };
    let now = now_ts();
    state.phase = GamePhase::Gaming;
    state.start_time = now;
    state.end_time = now + duration;
    engine.arm_timer(
        duration + SETTLE_GRACE_SECS,
        (GameType::Quiz, GamePhase::Gaming),
    );
    info!(duration, "⏱️ quiz answering window open");
    engine.commit_and_sync(state).await
}

/// Record an answer: only while GAMING, one submission per user.
pub async fn submit_answer(
    engine: &MiniGameEngine,
    state: &mut MiniGameState,
    user_id: i64,
    answer: String,
) -> GameResult<()> {
    if state.game_type != GameType::Quiz || state.phase != GamePhase::Gaming {
        return Err(GameError::Precondition("answering is closed".to_string()));
    }
    if !matches!(answer.as_str(), "A" | "B" | "C" | "D") {
        return Err(GameError::Validation("answer must be A-D".to_string()));
    }
    let payload = payload_mut(state)?;
    if payload.answers.contains_key(&user_id) {
        return Err(GameError::Conflict("you already answered".to_string()));
    }
    payload.answers.insert(
        user_id,
        QuizAnswer {
            answer,
            timestamp: now_ts(),
        },
    );
    engine.persist(state).await
}

/// Speed-scaled bonus for 4th place and beyond: interpolates from `others`
/// up toward `third` with the fraction of the window left when the answer
/// landed.
fn late_reward(question: &QuizQuestion, end_time: i64, answered_at: i64) -> f64 {
    let fraction = ((end_time - answered_at) as f64 / question.duration as f64).clamp(0.0, 1.0);
    round2(
        question.reward_others + (question.reward_third - question.reward_others) * fraction,
    )
}

/// Auto-settle one second after the window closes: rank correct answers by
/// speed and credit every winner in one transaction.
pub(crate) async fn settle(engine: &MiniGameEngine, state: &mut MiniGameState) -> GameResult<()> {
    let end_time = state.end_time;
    let payload = payload_mut(state)?;

    let mut correct: Vec<(i64, i64)> = payload
        .answers
        .iter()
        .filter(|(_, a)| a.answer == payload.question.correct_answer)
        .map(|(user_id, a)| (*user_id, a.timestamp))
        .collect();
    correct.sort_by_key(|(user_id, ts)| (*ts, *user_id));

    let winners: Vec<QuizWinner> = correct
        .iter()
        .enumerate()
        .map(|(i, (user_id, ts))| {
            let reward = match i {
                0 => payload.question.reward_first,
                1 => payload.question.reward_second,
                2 => payload.question.reward_third,
                _ => late_reward(&payload.question, end_time, *ts),
            };
            QuizWinner {
                user_id: *user_id,
                rank: i + 1,
                reward: round2(reward),
                answered_at: *ts,
            }
        })
        .collect();

    let credits: Vec<(i64, f64)> = winners.iter().map(|w| (w.user_id, w.reward)).collect();
    let updated = engine.store().credit_cash_many(&credits).await?;

    payload.winners = winners;
    let winner_count = payload.winners.len();
    state.phase = GamePhase::Result;
    info!(winners = winner_count, "🏆 quiz settled");
    engine.commit_and_sync(state).await?;

    if let Ok(data) = engine.leaderboard().top(100).await {
        engine
            .bus()
            .global_emit(ServerEvent::LeaderboardUpdate(LeaderboardUpdate { data }));
    }
    for user in &updated {
        engine
            .bus()
            .to_user(user.id, ServerEvent::AssetsUpdate(AssetsUpdate::from(user)));
    }
    Ok(())
}
