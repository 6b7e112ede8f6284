//! Durable game store
//! Mission: own the authoritative record of users, script, contracts,
//! catalogues, and the mini-game runtime snapshot with SQLite.
//!
//! A single guarded connection serialises every transaction, so no two
//! money-mutating operations interleave for any user.

pub mod catalog;
pub mod contracts;
pub mod runtime;
pub mod script;
pub mod status;
pub mod users;

pub use catalog::{MinorityQuestion, PrizeKind, QuizQuestion, RedEnvelopeItem};
pub use contracts::{ContractOrder, ContractSide, SettlementOutcome};
pub use runtime::MiniGameRuntimeRow;
pub use script::{EventInput, EventRow, ScriptDay};
pub use status::{GameStatus, ParamsUpdate};
pub use users::{AdminUserUpdate, Role, User};

use crate::errors::GameResult;
use rusqlite::Connection;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Game store with a SQLite backend.
#[derive(Clone)]
pub struct Store {
    pub(crate) conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (or create) the database at `path` and initialize the schema.
    pub fn open(path: &str) -> GameResult<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        conn.pragma_update(None, "foreign_keys", "ON").ok();
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> GameResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON").ok();
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

fn init_schema(conn: &Connection) -> GameResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS game_status (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            is_started INTEGER NOT NULL DEFAULT 0,
            game_start_time INTEGER,
            paused_at INTEGER,
            time_ratio INTEGER NOT NULL,
            total_days INTEGER NOT NULL,
            initial_price REAL NOT NULL,
            initial_cash REAL NOT NULL,
            max_leverage INTEGER NOT NULL,
            daily_interest_rate REAL NOT NULL,
            max_loan_amount REAL NOT NULL
        );

        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT UNIQUE NOT NULL,
            password_hash TEXT NOT NULL,
            display_name TEXT NOT NULL,
            avatar TEXT NOT NULL DEFAULT '',
            role TEXT NOT NULL DEFAULT 'USER',
            cash REAL NOT NULL DEFAULT 0,
            stocks INTEGER NOT NULL DEFAULT 0,
            debt REAL NOT NULL DEFAULT 0,
            daily_borrowed REAL NOT NULL DEFAULT 0,
            first_sign_in INTEGER NOT NULL DEFAULT 1,
            is_employee INTEGER NOT NULL DEFAULT 0,
            avatar_update_count INTEGER NOT NULL DEFAULT 0,
            loan_shark_visit_count INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS script_days (
            day INTEGER PRIMARY KEY,
            price REAL NOT NULL,
            title TEXT,
            news TEXT,
            effective_trend TEXT NOT NULL,
            publish_offset INTEGER,
            is_broadcasted INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            day INTEGER NOT NULL,
            title TEXT NOT NULL,
            news TEXT,
            trend TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_events_day ON events(day);

        CREATE TABLE IF NOT EXISTS contract_orders (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            day INTEGER NOT NULL,
            side TEXT NOT NULL,
            leverage INTEGER NOT NULL,
            quantity INTEGER NOT NULL,
            margin REAL NOT NULL,
            entry_price REAL NOT NULL,
            is_settled INTEGER NOT NULL DEFAULT 0,
            is_cancelled INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            FOREIGN KEY (user_id) REFERENCES users(id)
        );
        CREATE INDEX IF NOT EXISTS idx_contracts_day ON contract_orders(day, is_settled, is_cancelled);
        CREATE INDEX IF NOT EXISTS idx_contracts_user ON contract_orders(user_id, day);

        CREATE TABLE IF NOT EXISTS red_envelope_items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            kind TEXT NOT NULL,
            prize_value REAL NOT NULL DEFAULT 0,
            amount INTEGER NOT NULL DEFAULT 0,
            display_order INTEGER NOT NULL DEFAULT 0,
            is_active INTEGER NOT NULL DEFAULT 1
        );

        CREATE TABLE IF NOT EXISTS quiz_questions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            question TEXT NOT NULL,
            option_a TEXT NOT NULL,
            option_b TEXT NOT NULL,
            option_c TEXT NOT NULL,
            option_d TEXT NOT NULL,
            correct_answer TEXT NOT NULL,
            duration INTEGER NOT NULL,
            reward_first REAL NOT NULL,
            reward_second REAL NOT NULL,
            reward_third REAL NOT NULL,
            reward_others REAL NOT NULL,
            sort_order INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS minority_questions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            question TEXT NOT NULL,
            option_a TEXT NOT NULL,
            option_b TEXT NOT NULL,
            option_c TEXT NOT NULL,
            option_d TEXT NOT NULL,
            duration INTEGER NOT NULL,
            sort_order INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS minigame_runtime (
            key TEXT PRIMARY KEY,
            game_type TEXT NOT NULL,
            phase TEXT NOT NULL,
            start_time INTEGER NOT NULL,
            end_time INTEGER NOT NULL,
            payload TEXT NOT NULL
        );",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_schema_initializes() {
        let store = Store::open_in_memory().unwrap();
        let status = store.get_status().await.unwrap();
        assert!(!status.is_started);
        assert_eq!(status.total_days, status::DEFAULT_TOTAL_DAYS);
    }

    #[tokio::test]
    async fn test_open_on_disk() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let store = Store::open(tmp.path().to_str().unwrap()).unwrap();
        let status = store.get_status().await.unwrap();
        assert_eq!(status.initial_price, status::DEFAULT_INITIAL_PRICE);
    }
}
