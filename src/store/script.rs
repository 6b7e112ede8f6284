//! Script storage
//! Mission: persist the scripted day timeline and the trend events feeding
//! the generator.

use crate::errors::{GameError, GameResult};
use crate::models::Trend;
use crate::store::Store;
use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};

/// One scripted in-game day.
///
/// Either `title` is absent (silent day) or the headline tuple is complete.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptDay {
    pub day: i64,
    pub price: f64,
    pub title: Option<String>,
    pub news: Option<String>,
    pub effective_trend: Trend,
    pub publish_offset: Option<i64>,
    #[serde(default)]
    pub is_broadcasted: bool,
}

/// Generator input: a trend-bearing headline scheduled for a day.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRow {
    pub id: i64,
    pub day: i64,
    pub title: String,
    pub news: Option<String>,
    pub trend: Trend,
}

/// Create/update shape for events.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventInput {
    pub day: i64,
    pub title: String,
    pub news: Option<String>,
    pub trend: Trend,
}

fn row_to_script_day(row: &Row<'_>) -> rusqlite::Result<ScriptDay> {
    let trend_str: String = row.get(4)?;
    Ok(ScriptDay {
        day: row.get(0)?,
        price: row.get(1)?,
        title: row.get(2)?,
        news: row.get(3)?,
        effective_trend: Trend::from_str(&trend_str).unwrap_or(Trend::Flat),
        publish_offset: row.get(5)?,
        is_broadcasted: row.get::<_, i64>(6)? != 0,
    })
}

fn row_to_event(row: &Row<'_>) -> rusqlite::Result<EventRow> {
    let trend_str: String = row.get(4)?;
    Ok(EventRow {
        id: row.get(0)?,
        day: row.get(1)?,
        title: row.get(2)?,
        news: row.get(3)?,
        trend: Trend::from_str(&trend_str).unwrap_or(Trend::NoEffect),
    })
}

const DAY_COLUMNS: &str = "day, price, title, news, effective_trend, publish_offset, is_broadcasted";
const EVENT_COLUMNS: &str = "id, day, title, news, trend";

impl Store {
    /// Replace the whole timeline atomically: delete-all then bulk insert.
    /// Imported days always start unbroadcasted.
    pub async fn replace_script(&self, days: &[ScriptDay]) -> GameResult<()> {
        for d in days {
            if d.day < 1 {
                return Err(GameError::Validation(format!("invalid day {}", d.day)));
            }
            if d.price <= 0.0 {
                return Err(GameError::Validation(format!(
                    "day {} price must be positive",
                    d.day
                )));
            }
            if d.title.is_none() && (d.news.is_some() || d.publish_offset.is_some()) {
                return Err(GameError::Validation(format!(
                    "day {} has news without a title",
                    d.day
                )));
            }
        }
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM script_days", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO script_days (day, price, title, news, effective_trend, publish_offset, is_broadcasted)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)",
            )?;
            for d in days {
                stmt.execute(params![
                    d.day,
                    d.price,
                    d.title,
                    d.news,
                    d.effective_trend.as_str(),
                    d.publish_offset,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub async fn all_script_days(&self) -> GameResult<Vec<ScriptDay>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {DAY_COLUMNS} FROM script_days ORDER BY day ASC"
        ))?;
        let days = stmt
            .query_map([], row_to_script_day)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(days)
    }

    /// Flip the broadcast flag for a day. Returns false if it was already
    /// set (or the day does not exist), so publication stays at-most-once.
    pub async fn mark_day_broadcasted(&self, day: i64) -> GameResult<bool> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE script_days SET is_broadcasted = 1 WHERE day = ?1 AND is_broadcasted = 0",
            params![day],
        )?;
        Ok(changed > 0)
    }

    pub async fn delete_all_script_days(&self) -> GameResult<()> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM script_days", [])?;
        Ok(())
    }

    // --- events ---

    pub async fn list_events(&self) -> GameResult<Vec<EventRow>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM events ORDER BY day ASC, id ASC"
        ))?;
        let events = stmt
            .query_map([], row_to_event)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(events)
    }

    pub async fn create_event(&self, input: EventInput) -> GameResult<EventRow> {
        if input.day < 1 {
            return Err(GameError::Validation("event day must be positive".to_string()));
        }
        if input.title.trim().is_empty() {
            return Err(GameError::Validation("event title must not be empty".to_string()));
        }
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO events (day, title, news, trend) VALUES (?1, ?2, ?3, ?4)",
            params![input.day, input.title.trim(), input.news, input.trend.as_str()],
        )?;
        let id = conn.last_insert_rowid();
        let event = conn.query_row(
            &format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?1"),
            params![id],
            row_to_event,
        )?;
        Ok(event)
    }

    pub async fn update_event(&self, id: i64, input: EventInput) -> GameResult<EventRow> {
        if input.day < 1 {
            return Err(GameError::Validation("event day must be positive".to_string()));
        }
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE events SET day = ?1, title = ?2, news = ?3, trend = ?4 WHERE id = ?5",
            params![input.day, input.title.trim(), input.news, input.trend.as_str(), id],
        )?;
        if changed == 0 {
            return Err(GameError::NotFound(format!("event {id} not found")));
        }
        let event = conn.query_row(
            &format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?1"),
            params![id],
            row_to_event,
        )?;
        Ok(event)
    }

    pub async fn delete_event(&self, id: i64) -> GameResult<()> {
        let conn = self.conn.lock().await;
        let deleted = conn.execute("DELETE FROM events WHERE id = ?1", params![id])?;
        if deleted == 0 {
            return Err(GameError::NotFound(format!("event {id} not found")));
        }
        Ok(())
    }
}
