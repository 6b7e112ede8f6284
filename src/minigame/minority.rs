//! Minority vote
//! Mission: players stake on one of four options; the least-picked option
//! wins and splits the losers' pool pro-rata.

use crate::clock::now_ts;
use crate::errors::{GameError, GameResult};
use crate::minigame::{
    GamePayload, GamePhase, GameType, MiniGameEngine, MiniGameState, COUNTDOWN_SECS, PREPARE_SECS,
    SETTLE_GRACE_SECS,
};
use crate::models::round2;
use crate::store::MinorityQuestion;
use crate::ws::events::{AssetsUpdate, LeaderboardUpdate, ServerEvent};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use tracing::info;

const OPTIONS: [&str; 4] = ["A", "B", "C", "D"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MinorityBet {
    pub option: String,
    pub amount: f64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionStats {
    pub option: String,
    pub count: usize,
    pub total_bet: f64,
    pub user_ids: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MinorityUserResult {
    pub user_id: i64,
    pub option: String,
    pub stake: f64,
    /// Cash delta: profit for winners, `-stake` for losers, 0 on refund.
    pub delta: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MinoritySettlement {
    pub status: String,
    pub winner_options: Vec<String>,
    pub loser_options: Vec<String>,
    pub options: Vec<OptionStats>,
    pub results: Vec<MinorityUserResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MinorityState {
    pub question_id: i64,
    pub question: MinorityQuestion,
    /// Last submission per user wins.
    pub bets: BTreeMap<i64, MinorityBet>,
    pub settlement: Option<MinoritySettlement>,
}

impl MinorityState {
    pub fn sync_view(&self) -> serde_json::Value {
        json!({
            "questionId": self.question_id,
            "question": self.question.question,
            "options": {
                "A": self.question.option_a,
                "B": self.question.option_b,
                "C": self.question.option_c,
                "D": self.question.option_d,
            },
            "duration": self.question.duration,
            "betUserIds": self.bets.keys().collect::<Vec<_>>(),
            "settlementResult": self.settlement,
        })
    }
}

fn payload_mut(state: &mut MiniGameState) -> GameResult<&mut MinorityState> {
    match &mut state.payload {
        GamePayload::Minority(inner) => Ok(inner),
        _ => Err(GameError::Precondition(
            "no minority game is active".to_string(),
        )),
    }
}

pub async fn init(
    engine: &MiniGameEngine,
    state: &mut MiniGameState,
    question_id: i64,
) -> GameResult<()> {
    let question = engine.store().get_minority_question(question_id).await?;
    let now = now_ts();
    state.game_type = GameType::Minority;
    state.phase = GamePhase::Prepare;
    state.start_time = now;
    state.end_time = now + PREPARE_SECS;
    state.payload = GamePayload::Minority(MinorityState {
        question_id,
        question,
        bets: BTreeMap::new(),
        settlement: None,
    });
    engine.arm_timer(PREPARE_SECS, (GameType::Minority, GamePhase::Prepare));
    info!(question_id, "🗳️ minority round prepared");
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
    engine.arm_timer(COUNTDOWN_SECS, (GameType::Minority, GamePhase::Countdown));
    engine.commit_and_sync(state).await
}

pub(crate) async fn enter_gaming(
    engine: &MiniGameEngine,
    state: &mut MiniGameState,
) -> GameResult<()> {
    let duration = match &state.payload {
        GamePayload::Minority(m) => m.question.duration,
        _ => return Err(GameError::Precondition("no minority game is active".to_string())),
    };
    let now = now_ts();
    state.phase = GamePhase::Gaming;
    state.start_time = now;
    state.end_time = now + duration;
    engine.arm_timer(
        duration + SETTLE_GRACE_SECS,
        (GameType::Minority, GamePhase::Gaming),
    );
    info!(duration, "⏱️ minority betting window open");
    engine.commit_and_sync(state).await
}

/// Place or replace a bet. No cash moves until settlement, but a positive
/// stake must be covered by the bettor's cash right now.
pub async fn place_bet(
    engine: &MiniGameEngine,
    state: &mut MiniGameState,
    user_id: i64,
    option: String,
    amount: f64,
) -> GameResult<()> {
    if state.game_type != GameType::Minority || state.phase != GamePhase::Gaming {
        return Err(GameError::Precondition("betting is closed".to_string()));
    }
    if !OPTIONS.contains(&option.as_str()) {
        return Err(GameError::Validation("option must be A-D".to_string()));
    }
    let amount = round2(amount);
    if amount < 0.0 {
        return Err(GameError::Validation("amount must not be negative".to_string()));
    }
    if amount > 0.0 {
        let user = engine.store().get_user(user_id).await?;
        if round2(user.cash) < amount {
            return Err(GameError::InsufficientFunds);
        }
    }
    let payload = payload_mut(state)?;
    // prior entry is removed before insert: last submission wins
    payload.bets.insert(
        user_id,
        MinorityBet {
            option,
            amount,
            timestamp: now_ts(),
        },
    );
    engine.persist(state).await
}

fn option_stats(bets: &BTreeMap<i64, MinorityBet>) -> Vec<OptionStats> {
    OPTIONS
        .iter()
        .map(|opt| {
            let entries: Vec<(&i64, &MinorityBet)> =
                bets.iter().filter(|(_, b)| b.option == *opt).collect();
            OptionStats {
                option: opt.to_string(),
                count: entries.len(),
                total_bet: round2(entries.iter().map(|(_, b)| b.amount).sum()),
                user_ids: entries.iter().map(|(id, _)| **id).collect(),
            }
        })
        .collect()
}

/// Settle the round: REFUND with a single voted option, HOUSE_WINS when all
/// voted options tie, otherwise the strictly smallest option(s) win the
/// losers' pool pro-rata.
pub(crate) async fn settle(engine: &MiniGameEngine, state: &mut MiniGameState) -> GameResult<()> {
    let payload = payload_mut(state)?;
    let stats = option_stats(&payload.bets);
    let voted: Vec<&OptionStats> = stats.iter().filter(|s| s.count > 0).collect();

    let settlement = if voted.len() <= 1 {
        MinoritySettlement {
            status: "REFUND".to_string(),
            winner_options: Vec::new(),
            loser_options: Vec::new(),
            options: stats.clone(),
            results: payload
                .bets
                .iter()
                .map(|(user_id, bet)| MinorityUserResult {
                    user_id: *user_id,
                    option: bet.option.clone(),
                    stake: bet.amount,
                    delta: 0.0,
                })
                .collect(),
        }
    } else {
        let min_count = voted.iter().map(|s| s.count).min().unwrap_or(0);
        let all_equal = voted.iter().all(|s| s.count == min_count);

        if all_equal {
            // every bettor loses their stake
            let losses: Vec<(i64, f64)> = payload
                .bets
                .iter()
                .filter(|(_, b)| b.amount > 0.0)
                .map(|(id, b)| (*id, b.amount))
                .collect();
            let results: Vec<MinorityUserResult> = payload
                .bets
                .iter()
                .map(|(user_id, bet)| MinorityUserResult {
                    user_id: *user_id,
                    option: bet.option.clone(),
                    stake: bet.amount,
                    delta: -bet.amount,
                })
                .collect();
            let updated = engine.store().settle_minority(&[], &losses).await?;
            push_assets(engine, &updated);
            MinoritySettlement {
                status: "HOUSE_WINS".to_string(),
                winner_options: Vec::new(),
                loser_options: voted.iter().map(|s| s.option.clone()).collect(),
                options: stats.clone(),
                results,
            }
        } else {
            let winner_options: Vec<String> = voted
                .iter()
                .filter(|s| s.count == min_count)
                .map(|s| s.option.clone())
                .collect();
            let loser_options: Vec<String> = voted
                .iter()
                .filter(|s| s.count != min_count)
                .map(|s| s.option.clone())
                .collect();
            let winner_pool: f64 = stats
                .iter()
                .filter(|s| winner_options.contains(&s.option))
                .map(|s| s.total_bet)
                .sum();
            let loser_pool: f64 = stats
                .iter()
                .filter(|s| loser_options.contains(&s.option))
                .map(|s| s.total_bet)
                .sum();

            let mut credits: Vec<(i64, f64)> = Vec::new();
            let mut losses: Vec<(i64, f64)> = Vec::new();
            let mut results: Vec<MinorityUserResult> = Vec::new();
            for (user_id, bet) in &payload.bets {
                if winner_options.contains(&bet.option) {
                    let profit = if winner_pool > 0.0 && bet.amount > 0.0 {
                        round2(bet.amount / winner_pool * loser_pool)
                    } else {
                        0.0
                    };
                    if profit > 0.0 {
                        credits.push((*user_id, profit));
                    }
                    results.push(MinorityUserResult {
                        user_id: *user_id,
                        option: bet.option.clone(),
                        stake: bet.amount,
                        delta: profit,
                    });
                } else {
                    if bet.amount > 0.0 {
                        losses.push((*user_id, bet.amount));
                    }
                    results.push(MinorityUserResult {
                        user_id: *user_id,
                        option: bet.option.clone(),
                        stake: bet.amount,
                        delta: -bet.amount,
                    });
                }
            }
            let updated = engine.store().settle_minority(&credits, &losses).await?;
            push_assets(engine, &updated);
            MinoritySettlement {
                status: "STANDARD".to_string(),
                winner_options,
                loser_options,
                options: stats.clone(),
                results,
            }
        }
    };

    payload.settlement = Some(settlement);
    state.phase = GamePhase::Result;
    info!("🏁 minority round settled");
    engine.commit_and_sync(state).await?;

    if let Ok(data) = engine.leaderboard().top(100).await {
        engine
            .bus()
            .global_emit(ServerEvent::LeaderboardUpdate(LeaderboardUpdate { data }));
    }
    Ok(())
}

fn push_assets(engine: &MiniGameEngine, users: &[crate::store::User]) {
    for user in users {
        engine
            .bus()
            .to_user(user.id, ServerEvent::AssetsUpdate(AssetsUpdate::from(user)));
    }
}
