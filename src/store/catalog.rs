//! Mini-game catalogues
//! Mission: CRUD for red-envelope prizes, quiz questions, and minority-vote
//! questions, maintained by admins and consumed by the mini-game engine.

use crate::errors::{GameError, GameResult};
use crate::store::Store;
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrizeKind {
    #[serde(rename = "PHYSICAL")]
    Physical,
    #[serde(rename = "CASH")]
    Cash,
}

impl PrizeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrizeKind::Physical => "PHYSICAL",
            PrizeKind::Cash => "CASH",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "PHYSICAL" => Some(PrizeKind::Physical),
            "CASH" => Some(PrizeKind::Cash),
            _ => None,
        }
    }
}

/// A red-envelope prize line; `amount` units expand to that many packets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedEnvelopeItem {
    #[serde(default)]
    pub id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: PrizeKind,
    pub prize_value: f64,
    pub amount: i64,
    pub display_order: i64,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizQuestion {
    #[serde(default)]
    pub id: i64,
    pub question: String,
    pub option_a: String,
    pub option_b: String,
    pub option_c: String,
    pub option_d: String,
    /// One of "A".."D".
    pub correct_answer: String,
    /// Answering window in seconds.
    pub duration: i64,
    pub reward_first: f64,
    pub reward_second: f64,
    pub reward_third: f64,
    pub reward_others: f64,
    pub sort_order: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MinorityQuestion {
    #[serde(default)]
    pub id: i64,
    pub question: String,
    pub option_a: String,
    pub option_b: String,
    pub option_c: String,
    pub option_d: String,
    pub duration: i64,
    pub sort_order: i64,
}

fn row_to_item(row: &Row<'_>) -> rusqlite::Result<RedEnvelopeItem> {
    let kind_str: String = row.get(2)?;
    Ok(RedEnvelopeItem {
        id: row.get(0)?,
        name: row.get(1)?,
        kind: PrizeKind::from_str(&kind_str).unwrap_or(PrizeKind::Physical),
        prize_value: row.get(3)?,
        amount: row.get(4)?,
        display_order: row.get(5)?,
        is_active: row.get::<_, i64>(6)? != 0,
    })
}

fn row_to_quiz(row: &Row<'_>) -> rusqlite::Result<QuizQuestion> {
    Ok(QuizQuestion {
        id: row.get(0)?,
        question: row.get(1)?,
        option_a: row.get(2)?,
        option_b: row.get(3)?,
        option_c: row.get(4)?,
        option_d: row.get(5)?,
        correct_answer: row.get(6)?,
        duration: row.get(7)?,
        reward_first: row.get(8)?,
        reward_second: row.get(9)?,
        reward_third: row.get(10)?,
        reward_others: row.get(11)?,
        sort_order: row.get(12)?,
    })
}

fn row_to_minority(row: &Row<'_>) -> rusqlite::Result<MinorityQuestion> {
    Ok(MinorityQuestion {
        id: row.get(0)?,
        question: row.get(1)?,
        option_a: row.get(2)?,
        option_b: row.get(3)?,
        option_c: row.get(4)?,
        option_d: row.get(5)?,
        duration: row.get(6)?,
        sort_order: row.get(7)?,
    })
}

const ITEM_COLUMNS: &str = "id, name, kind, prize_value, amount, display_order, is_active";
const QUIZ_COLUMNS: &str = "id, question, option_a, option_b, option_c, option_d, correct_answer,
    duration, reward_first, reward_second, reward_third, reward_others, sort_order";
const MINORITY_COLUMNS: &str =
    "id, question, option_a, option_b, option_c, option_d, duration, sort_order";

fn validate_options(options: [&str; 4]) -> GameResult<()> {
    for (i, a) in options.iter().enumerate() {
        if a.trim().is_empty() {
            return Err(GameError::Validation("options must not be empty".to_string()));
        }
        for b in options.iter().skip(i + 1) {
            if a.trim() == b.trim() {
                return Err(GameError::Validation("options must be distinct".to_string()));
            }
        }
    }
    Ok(())
}

impl Store {
    // --- red envelope items ---

    pub async fn list_red_envelope_items(&self) -> GameResult<Vec<RedEnvelopeItem>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ITEM_COLUMNS} FROM red_envelope_items ORDER BY display_order ASC, id ASC"
        ))?;
        let items = stmt
            .query_map([], row_to_item)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    pub async fn active_red_envelope_items(&self) -> GameResult<Vec<RedEnvelopeItem>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ITEM_COLUMNS} FROM red_envelope_items WHERE is_active = 1
             ORDER BY display_order ASC, id ASC"
        ))?;
        let items = stmt
            .query_map([], row_to_item)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    pub async fn create_red_envelope_item(&self, item: RedEnvelopeItem) -> GameResult<RedEnvelopeItem> {
        if item.prize_value < 0.0 || item.amount < 0 {
            return Err(GameError::Validation(
                "prizeValue and amount must not be negative".to_string(),
            ));
        }
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO red_envelope_items (name, kind, prize_value, amount, display_order, is_active)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                item.name,
                item.kind.as_str(),
                item.prize_value,
                item.amount,
                item.display_order,
                item.is_active as i64
            ],
        )?;
        let id = conn.last_insert_rowid();
        let item = conn.query_row(
            &format!("SELECT {ITEM_COLUMNS} FROM red_envelope_items WHERE id = ?1"),
            params![id],
            row_to_item,
        )?;
        Ok(item)
    }

    pub async fn update_red_envelope_item(&self, id: i64, item: RedEnvelopeItem) -> GameResult<RedEnvelopeItem> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE red_envelope_items
             SET name = ?1, kind = ?2, prize_value = ?3, amount = ?4, display_order = ?5, is_active = ?6
             WHERE id = ?7",
            params![
                item.name,
                item.kind.as_str(),
                item.prize_value,
                item.amount,
                item.display_order,
                item.is_active as i64,
                id
            ],
        )?;
        if changed == 0 {
            return Err(GameError::NotFound(format!("red envelope item {id} not found")));
        }
        let item = conn.query_row(
            &format!("SELECT {ITEM_COLUMNS} FROM red_envelope_items WHERE id = ?1"),
            params![id],
            row_to_item,
        )?;
        Ok(item)
    }

    pub async fn delete_red_envelope_item(&self, id: i64) -> GameResult<()> {
        let conn = self.conn.lock().await;
        let deleted = conn.execute("DELETE FROM red_envelope_items WHERE id = ?1", params![id])?;
        if deleted == 0 {
            return Err(GameError::NotFound(format!("red envelope item {id} not found")));
        }
        Ok(())
    }

    // --- quiz questions ---

    pub async fn list_quiz_questions(&self) -> GameResult<Vec<QuizQuestion>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {QUIZ_COLUMNS} FROM quiz_questions ORDER BY sort_order ASC, id ASC"
        ))?;
        let qs = stmt
            .query_map([], row_to_quiz)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(qs)
    }

    pub async fn get_quiz_question(&self, id: i64) -> GameResult<QuizQuestion> {
        let conn = self.conn.lock().await;
        conn.query_row(
            &format!("SELECT {QUIZ_COLUMNS} FROM quiz_questions WHERE id = ?1"),
            params![id],
            row_to_quiz,
        )
        .optional()?
        .ok_or_else(|| GameError::NotFound(format!("quiz question {id} not found")))
    }

    /// The next question by `(sort_order, id)` after the given one.
    pub async fn next_quiz_question_after(&self, current: &QuizQuestion) -> GameResult<Option<i64>> {
        let conn = self.conn.lock().await;
        let next = conn
            .query_row(
                "SELECT id FROM quiz_questions
                 WHERE sort_order > ?1 OR (sort_order = ?1 AND id > ?2)
                 ORDER BY sort_order ASC, id ASC LIMIT 1",
                params![current.sort_order, current.id],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        Ok(next)
    }

    pub async fn create_quiz_question(&self, q: QuizQuestion) -> GameResult<QuizQuestion> {
        validate_options([&q.option_a, &q.option_b, &q.option_c, &q.option_d])?;
        if !matches!(q.correct_answer.as_str(), "A" | "B" | "C" | "D") {
            return Err(GameError::Validation("correctAnswer must be A-D".to_string()));
        }
        if q.duration < 1 {
            return Err(GameError::Validation("duration must be positive".to_string()));
        }
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO quiz_questions (question, option_a, option_b, option_c, option_d,
                correct_answer, duration, reward_first, reward_second, reward_third, reward_others, sort_order)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                q.question,
                q.option_a,
                q.option_b,
                q.option_c,
                q.option_d,
                q.correct_answer,
                q.duration,
                q.reward_first,
                q.reward_second,
                q.reward_third,
                q.reward_others,
                q.sort_order
            ],
        )?;
        let id = conn.last_insert_rowid();
        let q = conn.query_row(
            &format!("SELECT {QUIZ_COLUMNS} FROM quiz_questions WHERE id = ?1"),
            params![id],
            row_to_quiz,
        )?;
        Ok(q)
    }

    pub async fn update_quiz_question(&self, id: i64, q: QuizQuestion) -> GameResult<QuizQuestion> {
        validate_options([&q.option_a, &q.option_b, &q.option_c, &q.option_d])?;
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE quiz_questions SET question = ?1, option_a = ?2, option_b = ?3, option_c = ?4,
                option_d = ?5, correct_answer = ?6, duration = ?7, reward_first = ?8,
                reward_second = ?9, reward_third = ?10, reward_others = ?11, sort_order = ?12
             WHERE id = ?13",
            params![
                q.question,
                q.option_a,
                q.option_b,
                q.option_c,
                q.option_d,
                q.correct_answer,
                q.duration,
                q.reward_first,
                q.reward_second,
                q.reward_third,
                q.reward_others,
                q.sort_order,
                id
            ],
        )?;
        if changed == 0 {
            return Err(GameError::NotFound(format!("quiz question {id} not found")));
        }
        let q = conn.query_row(
            &format!("SELECT {QUIZ_COLUMNS} FROM quiz_questions WHERE id = ?1"),
            params![id],
            row_to_quiz,
        )?;
        Ok(q)
    }

    pub async fn delete_quiz_question(&self, id: i64) -> GameResult<()> {
        let conn = self.conn.lock().await;
        let deleted = conn.execute("DELETE FROM quiz_questions WHERE id = ?1", params![id])?;
        if deleted == 0 {
            return Err(GameError::NotFound(format!("quiz question {id} not found")));
        }
        Ok(())
    }

    // --- minority questions ---

    pub async fn list_minority_questions(&self) -> GameResult<Vec<MinorityQuestion>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {MINORITY_COLUMNS} FROM minority_questions ORDER BY sort_order ASC, id ASC"
        ))?;
        let qs = stmt
            .query_map([], row_to_minority)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(qs)
    }

    pub async fn get_minority_question(&self, id: i64) -> GameResult<MinorityQuestion> {
        let conn = self.conn.lock().await;
        conn.query_row(
            &format!("SELECT {MINORITY_COLUMNS} FROM minority_questions WHERE id = ?1"),
            params![id],
            row_to_minority,
        )
        .optional()?
        .ok_or_else(|| GameError::NotFound(format!("minority question {id} not found")))
    }

    pub async fn create_minority_question(&self, q: MinorityQuestion) -> GameResult<MinorityQuestion> {
        validate_options([&q.option_a, &q.option_b, &q.option_c, &q.option_d])?;
        if q.duration < 1 {
            return Err(GameError::Validation("duration must be positive".to_string()));
        }
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO minority_questions (question, option_a, option_b, option_c, option_d, duration, sort_order)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![q.question, q.option_a, q.option_b, q.option_c, q.option_d, q.duration, q.sort_order],
        )?;
        let id = conn.last_insert_rowid();
        let q = conn.query_row(
            &format!("SELECT {MINORITY_COLUMNS} FROM minority_questions WHERE id = ?1"),
            params![id],
            row_to_minority,
        )?;
        Ok(q)
    }

    pub async fn update_minority_question(&self, id: i64, q: MinorityQuestion) -> GameResult<MinorityQuestion> {
        validate_options([&q.option_a, &q.option_b, &q.option_c, &q.option_d])?;
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE minority_questions SET question = ?1, option_a = ?2, option_b = ?3,
                option_c = ?4, option_d = ?5, duration = ?6, sort_order = ?7 WHERE id = ?8",
            params![q.question, q.option_a, q.option_b, q.option_c, q.option_d, q.duration, q.sort_order, id],
        )?;
        if changed == 0 {
            return Err(GameError::NotFound(format!("minority question {id} not found")));
        }
        let q = conn.query_row(
            &format!("SELECT {MINORITY_COLUMNS} FROM minority_questions WHERE id = ?1"),
            params![id],
            row_to_minority,
        )?;
        Ok(q)
    }

    pub async fn delete_minority_question(&self, id: i64) -> GameResult<()> {
        let conn = self.conn.lock().await;
        let deleted = conn.execute("DELETE FROM minority_questions WHERE id = ?1", params![id])?;
        if deleted == 0 {
            return Err(GameError::NotFound(format!("minority question {id} not found")));
        }
        Ok(())
    }
}
