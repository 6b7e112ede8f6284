//! Game clock
//! Mission: derive `(current_day, seconds in day)` from the persisted start
//! time and time ratio, with pause/resume support.
//!
//! The clock itself is pure math over a `GameStatus` row; the store stays
//! authoritative and the tick loop re-derives every second.

use crate::store::GameStatus;
use chrono::Utc;
use serde::Serialize;

/// Current unix timestamp in seconds.
pub fn now_ts() -> i64 {
    Utc::now().timestamp()
}

/// Snapshot of the derived game time plus the parameters clients need.
#[derive(Debug, Clone, Serialize)]
pub struct GameState {
    pub is_started: bool,
    pub paused_at: Option<i64>,
    pub current_day: i64,
    pub seconds_to_next_day: i64,
    /// Seconds elapsed within the current day, `0..time_ratio`.
    pub second_in_day: i64,
    pub total_days: i64,
    pub time_ratio: i64,
    pub initial_price: f64,
    pub initial_cash: f64,
    pub max_leverage: i64,
    pub daily_interest_rate: f64,
    pub max_loan_amount: f64,
}

/// Derive the game state at `now` from a status row.
pub fn derive_state(status: &GameStatus, now: i64) -> GameState {
    let (current_day, seconds_to_next_day, second_in_day) = match status.game_start_time {
        None => (0, 0, 0),
        Some(start) => {
            let reference = status.paused_at.unwrap_or(now);
            let elapsed = (reference - start).max(0);
            let run_length = status.total_days * status.time_ratio;
            let day = (elapsed / status.time_ratio + 1).min(status.total_days);
            let second_in_day = elapsed % status.time_ratio;
            let remaining = if elapsed >= run_length {
                0
            } else {
                status.time_ratio - second_in_day
            };
            (day, remaining, second_in_day)
        }
    };

    GameState {
        is_started: status.is_started,
        paused_at: status.paused_at,
        current_day,
        seconds_to_next_day,
        second_in_day,
        total_days: status.total_days,
        time_ratio: status.time_ratio,
        initial_price: status.initial_price,
        initial_cash: status.initial_cash,
        max_leverage: status.max_leverage,
        daily_interest_rate: status.daily_interest_rate,
        max_loan_amount: status.max_loan_amount,
    }
}

/// Rebase `game_start_time` for a time-ratio change so the current day and
/// the remaining seconds within it are preserved under the new ratio.
///
/// If the new ratio cannot hold the remaining seconds, the remainder is
/// truncated to `new_ratio - 1`, forcing an imminent rollover without ever
/// overshooting into the next day.
///
/// Returns `None` when the game has never started (nothing to rebase).
pub fn rebase_start_time(status: &GameStatus, new_ratio: i64, now: i64) -> Option<i64> {
    status.game_start_time?;
    let state = derive_state(status, now);
    if state.current_day == 0 {
        return None;
    }

    let remaining = if new_ratio < state.seconds_to_next_day {
        new_ratio - 1
    } else {
        state.seconds_to_next_day
    };

    let elapsed = (state.current_day - 1) * new_ratio + (new_ratio - remaining);
    let reference = status.paused_at.unwrap_or(now);
    Some(reference - elapsed)
}
