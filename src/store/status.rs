//! GameStatus singleton
//! Mission: persist the game run parameters and clock anchors, and apply the
//! lifecycle operations (start/stop/resume/restart/reset/params) atomically.

use crate::clock::rebase_start_time;
use crate::errors::{GameError, GameResult};
use crate::models::round2;
use crate::store::Store;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

pub const DEFAULT_TIME_RATIO: i64 = 180;
pub const DEFAULT_TOTAL_DAYS: i64 = 120;
pub const DEFAULT_INITIAL_PRICE: f64 = 100.0;
pub const DEFAULT_INITIAL_CASH: f64 = 10_000.0;
pub const DEFAULT_MAX_LEVERAGE: i64 = 10;
pub const DEFAULT_DAILY_INTEREST_RATE: f64 = 0.001;
pub const DEFAULT_MAX_LOAN_AMOUNT: f64 = 10_000.0;

/// The singleton status row (`id = 1`).
///
/// Invariant: `paused_at` is set exactly when the game is stopped mid-run
/// (`!is_started && game_start_time.is_some()`).
#[derive(Debug, Clone, Serialize)]
pub struct GameStatus {
    pub is_started: bool,
    pub game_start_time: Option<i64>,
    pub paused_at: Option<i64>,
    pub time_ratio: i64,
    pub total_days: i64,
    pub initial_price: f64,
    pub initial_cash: f64,
    pub max_leverage: i64,
    pub daily_interest_rate: f64,
    pub max_loan_amount: f64,
}

pub fn default_status() -> GameStatus {
    GameStatus {
        is_started: false,
        game_start_time: None,
        paused_at: None,
        time_ratio: DEFAULT_TIME_RATIO,
        total_days: DEFAULT_TOTAL_DAYS,
        initial_price: DEFAULT_INITIAL_PRICE,
        initial_cash: DEFAULT_INITIAL_CASH,
        max_leverage: DEFAULT_MAX_LEVERAGE,
        daily_interest_rate: DEFAULT_DAILY_INTEREST_RATE,
        max_loan_amount: DEFAULT_MAX_LOAN_AMOUNT,
    }
}

/// Partial update for the tunable parameters.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParamsUpdate {
    pub time_ratio: Option<i64>,
    pub total_days: Option<i64>,
    pub initial_price: Option<f64>,
    pub initial_cash: Option<f64>,
    pub max_leverage: Option<i64>,
    pub daily_interest_rate: Option<f64>,
    pub max_loan_amount: Option<f64>,
}

fn read_status(conn: &Connection) -> GameResult<Option<GameStatus>> {
    let row = conn
        .query_row(
            "SELECT is_started, game_start_time, paused_at, time_ratio, total_days,
                    initial_price, initial_cash, max_leverage, daily_interest_rate, max_loan_amount
             FROM game_status WHERE id = 1",
            [],
            |row| {
                Ok(GameStatus {
                    is_started: row.get::<_, i64>(0)? != 0,
                    game_start_time: row.get(1)?,
                    paused_at: row.get(2)?,
                    time_ratio: row.get(3)?,
                    total_days: row.get(4)?,
                    initial_price: row.get(5)?,
                    initial_cash: row.get(6)?,
                    max_leverage: row.get(7)?,
                    daily_interest_rate: row.get(8)?,
                    max_loan_amount: row.get(9)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

fn write_status(conn: &Connection, status: &GameStatus) -> GameResult<()> {
    conn.execute(
        "INSERT INTO game_status (id, is_started, game_start_time, paused_at, time_ratio,
                total_days, initial_price, initial_cash, max_leverage, daily_interest_rate, max_loan_amount)
         VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT(id) DO UPDATE SET
            is_started = excluded.is_started,
            game_start_time = excluded.game_start_time,
            paused_at = excluded.paused_at,
            time_ratio = excluded.time_ratio,
            total_days = excluded.total_days,
            initial_price = excluded.initial_price,
            initial_cash = excluded.initial_cash,
            max_leverage = excluded.max_leverage,
            daily_interest_rate = excluded.daily_interest_rate,
            max_loan_amount = excluded.max_loan_amount",
        params![
            status.is_started as i64,
            status.game_start_time,
            status.paused_at,
            status.time_ratio,
            status.total_days,
            status.initial_price,
            status.initial_cash,
            status.max_leverage,
            status.daily_interest_rate,
            status.max_loan_amount,
        ],
    )?;
    Ok(())
}

/// Read-or-create inside an existing transaction.
pub(crate) fn status_in_tx(conn: &Connection) -> GameResult<GameStatus> {
    if let Some(status) = read_status(conn)? {
        return Ok(status);
    }
    let status = default_status();
    write_status(conn, &status)?;
    Ok(status)
}

impl Store {
    /// Fetch the status row, upserting defaults on first read.
    pub async fn get_status(&self) -> GameResult<GameStatus> {
        let conn = self.conn.lock().await;
        status_in_tx(&conn)
    }

    /// Start a run: clear any pause, anchor the clock at `now`, reset the
    /// broadcast flags and per-user per-run counters.
    pub async fn start_game(&self, now: i64) -> GameResult<GameStatus> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let mut status = status_in_tx(&tx)?;
        status.paused_at = None;
        status.game_start_time = Some(now);
        status.is_started = true;
        write_status(&tx, &status)?;
        tx.execute("UPDATE script_days SET is_broadcasted = 0", [])?;
        tx.execute(
            "UPDATE users SET avatar_update_count = 0, loan_shark_visit_count = 0",
            [],
        )?;
        tx.commit()?;
        Ok(status)
    }

    /// Stop (pause) a running game.
    pub async fn stop_game(&self, now: i64) -> GameResult<GameStatus> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let mut status = status_in_tx(&tx)?;
        if !status.is_started {
            return Err(GameError::Precondition("game is not running".to_string()));
        }
        status.is_started = false;
        status.paused_at = Some(now);
        write_status(&tx, &status)?;
        tx.commit()?;
        Ok(status)
    }

    /// Resume a paused game, shifting the start anchor by the pause length.
    pub async fn resume_game(&self, now: i64) -> GameResult<GameStatus> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let mut status = status_in_tx(&tx)?;
        let Some(paused_at) = status.paused_at else {
            return Err(GameError::Precondition("game is not paused".to_string()));
        };
        if status.is_started {
            return Err(GameError::Precondition("game is already running".to_string()));
        }
        let start = status
            .game_start_time
            .ok_or_else(|| GameError::Precondition("game has never started".to_string()))?;
        status.game_start_time = Some(start + (now - paused_at));
        status.paused_at = None;
        status.is_started = true;
        write_status(&tx, &status)?;
        tx.commit()?;
        Ok(status)
    }

    /// Restart: zero balances back to the initial stake, drop all contract
    /// orders, clear broadcast flags. Requires a stopped game.
    pub async fn restart_game(&self) -> GameResult<GameStatus> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let status = status_in_tx(&tx)?;
        if status.is_started {
            return Err(GameError::Precondition(
                "stop the game before restarting".to_string(),
            ));
        }
        tx.execute(
            "UPDATE users SET cash = ?1, stocks = 0, debt = 0, daily_borrowed = 0, first_sign_in = 0",
            params![round2(status.initial_cash)],
        )?;
        tx.execute("DELETE FROM contract_orders", [])?;
        tx.execute("UPDATE script_days SET is_broadcasted = 0", [])?;
        tx.commit()?;
        Ok(status)
    }

    /// Factory reset: wipe orders, script, events, and every non-admin user
    /// other than the caller; restore default parameters.
    pub async fn factory_reset(&self, current_admin_id: i64) -> GameResult<GameStatus> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let status = status_in_tx(&tx)?;
        if status.is_started {
            return Err(GameError::Precondition(
                "stop the game before resetting".to_string(),
            ));
        }
        // Orders first so user deletion satisfies FK order.
        tx.execute("DELETE FROM contract_orders", [])?;
        tx.execute("DELETE FROM script_days", [])?;
        tx.execute("DELETE FROM events", [])?;
        tx.execute(
            "DELETE FROM users WHERE role != 'ADMIN' AND id != ?1",
            params![current_admin_id],
        )?;
        let fresh = default_status();
        write_status(&tx, &fresh)?;
        tx.commit()?;
        Ok(fresh)
    }

    /// Apply a parameter update. A `time_ratio` change while the clock is
    /// anchored rebases the start time so the current day and remaining
    /// seconds are preserved. Returns the new status and whether the loan
    /// configuration changed.
    pub async fn update_params(
        &self,
        update: ParamsUpdate,
        now: i64,
    ) -> GameResult<(GameStatus, bool)> {
        if let Some(r) = update.time_ratio {
            if r < 2 {
                return Err(GameError::Validation("timeRatio must be at least 2".to_string()));
            }
        }
        if let Some(d) = update.total_days {
            if d < 1 {
                return Err(GameError::Validation("totalDays must be positive".to_string()));
            }
        }
        if let Some(p) = update.initial_price {
            if p <= 0.0 {
                return Err(GameError::Validation("initialPrice must be positive".to_string()));
            }
        }
        if let Some(c) = update.initial_cash {
            if c < 0.0 {
                return Err(GameError::Validation("initialCash must not be negative".to_string()));
            }
        }
        if let Some(l) = update.max_leverage {
            if l < 1 {
                return Err(GameError::Validation("maxLeverage must be at least 1".to_string()));
            }
        }
        if let Some(r) = update.daily_interest_rate {
            if r < 0.0 {
                return Err(GameError::Validation(
                    "dailyInterestRate must not be negative".to_string(),
                ));
            }
        }
        if let Some(m) = update.max_loan_amount {
            if m < 0.0 {
                return Err(GameError::Validation(
                    "maxLoanAmount must not be negative".to_string(),
                ));
            }
        }

        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let mut status = status_in_tx(&tx)?;

        let mut loan_changed = false;
        if let Some(rate) = update.daily_interest_rate {
            loan_changed |= rate != status.daily_interest_rate;
            status.daily_interest_rate = rate;
        }
        if let Some(max_loan) = update.max_loan_amount {
            loan_changed |= max_loan != status.max_loan_amount;
            status.max_loan_amount = round2(max_loan);
        }
        if let Some(days) = update.total_days {
            status.total_days = days;
        }
        if let Some(price) = update.initial_price {
            status.initial_price = round2(price);
        }
        if let Some(cash) = update.initial_cash {
            status.initial_cash = round2(cash);
        }
        if let Some(lev) = update.max_leverage {
            status.max_leverage = lev;
        }
        if let Some(ratio) = update.time_ratio {
            if ratio != status.time_ratio {
                if let Some(new_start) = rebase_start_time(&status, ratio, now) {
                    status.game_start_time = Some(new_start);
                }
                status.time_ratio = ratio;
            }
        }

        write_status(&tx, &status)?;
        tx.commit()?;
        Ok((status, loan_changed))
    }
}
