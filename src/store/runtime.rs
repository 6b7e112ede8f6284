//! Mini-game runtime snapshot
//! Mission: persist the single in-flight mini-game so a process restart can
//! rehydrate its state machine and re-arm timers.

use crate::errors::GameResult;
use crate::store::Store;
use rusqlite::{params, OptionalExtension};

const RUNTIME_KEY: &str = "CURRENT_GAME";

#[derive(Debug, Clone)]
pub struct MiniGameRuntimeRow {
    pub game_type: String,
    pub phase: String,
    pub start_time: i64,
    pub end_time: i64,
    /// JSON snapshot of the game-specific payload.
    pub payload: String,
}

impl Store {
    pub async fn save_minigame_runtime(&self, row: &MiniGameRuntimeRow) -> GameResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO minigame_runtime (key, game_type, phase, start_time, end_time, payload)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(key) DO UPDATE SET
                game_type = excluded.game_type,
                phase = excluded.phase,
                start_time = excluded.start_time,
                end_time = excluded.end_time,
                payload = excluded.payload",
            params![
                RUNTIME_KEY,
                row.game_type,
                row.phase,
                row.start_time,
                row.end_time,
                row.payload
            ],
        )?;
        Ok(())
    }

    pub async fn load_minigame_runtime(&self) -> GameResult<Option<MiniGameRuntimeRow>> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                "SELECT game_type, phase, start_time, end_time, payload
                 FROM minigame_runtime WHERE key = ?1",
                params![RUNTIME_KEY],
                |row| {
                    Ok(MiniGameRuntimeRow {
                        game_type: row.get(0)?,
                        phase: row.get(1)?,
                        start_time: row.get(2)?,
                        end_time: row.get(3)?,
                        payload: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub async fn clear_minigame_runtime(&self) -> GameResult<()> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM minigame_runtime WHERE key = ?1", params![RUNTIME_KEY])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_runtime_snapshot_round_trip() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.load_minigame_runtime().await.unwrap().is_none());

        let row = MiniGameRuntimeRow {
            game_type: "QUIZ".to_string(),
            phase: "GAMING".to_string(),
            start_time: 100,
            end_time: 130,
            payload: r#"{"questionId":7}"#.to_string(),
        };
        store.save_minigame_runtime(&row).await.unwrap();
        let loaded = store.load_minigame_runtime().await.unwrap().unwrap();
        assert_eq!(loaded.game_type, "QUIZ");
        assert_eq!(loaded.end_time, 130);

        // upsert overwrites
        store
            .save_minigame_runtime(&MiniGameRuntimeRow {
                phase: "RESULT".to_string(),
                ..row
            })
            .await
            .unwrap();
        let loaded = store.load_minigame_runtime().await.unwrap().unwrap();
        assert_eq!(loaded.phase, "RESULT");

        store.clear_minigame_runtime().await.unwrap();
        assert!(store.load_minigame_runtime().await.unwrap().is_none());
    }
}
