//! User storage
//! Mission: store player accounts and apply every balance mutation inside a
//! transaction, keeping cash/stocks/debt non-negative after every commit.

use crate::errors::{GameError, GameResult};
use crate::models::round2;
use crate::store::Store;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

/// User roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "USER")]
    User,
    #[serde(rename = "ADMIN")]
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "USER",
            Role::Admin => "ADMIN",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "USER" => Some(Role::User),
            "ADMIN" => Some(Role::Admin),
            _ => None,
        }
    }
}

/// Player account row.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub display_name: String,
    pub avatar: String,
    pub role: Role,
    pub cash: f64,
    pub stocks: i64,
    pub debt: f64,
    pub daily_borrowed: f64,
    pub first_sign_in: bool,
    pub is_employee: bool,
    pub avatar_update_count: i64,
    pub loan_shark_visit_count: i64,
    pub created_at: String,
}

/// Admin-side editable fields.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminUserUpdate {
    pub display_name: Option<String>,
    pub avatar: Option<String>,
    pub cash: Option<f64>,
    pub stocks: Option<i64>,
    pub debt: Option<f64>,
    pub is_employee: Option<bool>,
    pub role: Option<Role>,
}

const USER_COLUMNS: &str = "id, username, password_hash, display_name, avatar, role, cash, stocks,
    debt, daily_borrowed, first_sign_in, is_employee, avatar_update_count,
    loan_shark_visit_count, created_at";

fn row_to_user(row: &Row<'_>) -> rusqlite::Result<User> {
    let role_str: String = row.get(5)?;
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        password_hash: row.get(2)?,
        display_name: row.get(3)?,
        avatar: row.get(4)?,
        role: Role::from_str(&role_str).unwrap_or(Role::User),
        cash: row.get(6)?,
        stocks: row.get(7)?,
        debt: row.get(8)?,
        daily_borrowed: row.get(9)?,
        first_sign_in: row.get::<_, i64>(10)? != 0,
        is_employee: row.get::<_, i64>(11)? != 0,
        avatar_update_count: row.get(12)?,
        loan_shark_visit_count: row.get(13)?,
        created_at: row.get(14)?,
    })
}

pub(crate) fn user_in_tx(conn: &Connection, id: i64) -> GameResult<User> {
    conn.query_row(
        &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
        params![id],
        row_to_user,
    )
    .optional()?
    .ok_or_else(|| GameError::NotFound(format!("user {id} not found")))
}

fn write_balances(conn: &Connection, user: &User) -> GameResult<()> {
    conn.execute(
        "UPDATE users SET cash = ?1, stocks = ?2, debt = ?3, daily_borrowed = ?4 WHERE id = ?5",
        params![
            round2(user.cash),
            user.stocks,
            round2(user.debt),
            round2(user.daily_borrowed),
            user.id
        ],
    )?;
    Ok(())
}

impl Store {
    /// Create a user. `username` uniqueness violations surface as CONFLICT.
    pub async fn create_user(
        &self,
        username: &str,
        password_hash: &str,
        display_name: &str,
        role: Role,
        initial_cash: f64,
    ) -> GameResult<User> {
        let conn = self.conn.lock().await;
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO users (username, password_hash, display_name, role, cash, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![username, password_hash, display_name, role.as_str(), round2(initial_cash), now],
        )?;
        let id = conn.last_insert_rowid();
        user_in_tx(&conn, id)
    }

    pub async fn get_user(&self, id: i64) -> GameResult<User> {
        let conn = self.conn.lock().await;
        user_in_tx(&conn, id)
    }

    pub async fn get_user_by_username(&self, username: &str) -> GameResult<Option<User>> {
        let conn = self.conn.lock().await;
        let user = conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1"),
                params![username],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    pub async fn list_users(&self) -> GameResult<Vec<User>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY id ASC"))?;
        let users = stmt
            .query_map([], row_to_user)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    /// Users eligible to participate in mini-games.
    pub async fn employees(&self) -> GameResult<Vec<User>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE is_employee = 1 ORDER BY id ASC"
        ))?;
        let users = stmt
            .query_map([], row_to_user)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    pub async fn update_user_admin(&self, id: i64, update: AdminUserUpdate) -> GameResult<User> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let mut user = user_in_tx(&tx, id)?;
        if let Some(name) = update.display_name {
            user.display_name = name;
        }
        if let Some(avatar) = update.avatar {
            user.avatar = avatar;
        }
        if let Some(cash) = update.cash {
            if cash < 0.0 {
                return Err(GameError::Validation("cash must not be negative".to_string()));
            }
            user.cash = cash;
        }
        if let Some(stocks) = update.stocks {
            if stocks < 0 {
                return Err(GameError::Validation("stocks must not be negative".to_string()));
            }
            user.stocks = stocks;
        }
        if let Some(debt) = update.debt {
            if debt < 0.0 {
                return Err(GameError::Validation("debt must not be negative".to_string()));
            }
            user.debt = debt;
        }
        if let Some(emp) = update.is_employee {
            user.is_employee = emp;
        }
        if let Some(role) = update.role {
            user.role = role;
        }
        tx.execute(
            "UPDATE users SET display_name = ?1, avatar = ?2, is_employee = ?3, role = ?4 WHERE id = ?5",
            params![user.display_name, user.avatar, user.is_employee as i64, user.role.as_str(), id],
        )?;
        write_balances(&tx, &user)?;
        let user = user_in_tx(&tx, id)?;
        tx.commit()?;
        Ok(user)
    }

    /// Delete a user, removing their contract orders first (FK order).
    pub async fn delete_user(&self, id: i64) -> GameResult<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM contract_orders WHERE user_id = ?1", params![id])?;
        let deleted = tx.execute("DELETE FROM users WHERE id = ?1", params![id])?;
        if deleted == 0 {
            return Err(GameError::NotFound(format!("user {id} not found")));
        }
        tx.commit()?;
        Ok(())
    }

    /// Profile update by the user themselves. An avatar change bumps
    /// `avatar_update_count`.
    pub async fn update_profile(
        &self,
        id: i64,
        display_name: Option<String>,
        avatar: Option<String>,
    ) -> GameResult<User> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let user = user_in_tx(&tx, id)?;
        if let Some(name) = display_name {
            if name.trim().is_empty() {
                return Err(GameError::Validation("displayName must not be empty".to_string()));
            }
            tx.execute(
                "UPDATE users SET display_name = ?1 WHERE id = ?2",
                params![name.trim(), id],
            )?;
        }
        if let Some(avatar) = avatar {
            tx.execute(
                "UPDATE users SET avatar = ?1, avatar_update_count = avatar_update_count + 1 WHERE id = ?2",
                params![avatar, id],
            )?;
        }
        let user = user_in_tx(&tx, user.id)?;
        tx.commit()?;
        Ok(user)
    }

    pub async fn set_password_hash(&self, id: i64, password_hash: &str) -> GameResult<()> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE users SET password_hash = ?1 WHERE id = ?2",
            params![password_hash, id],
        )?;
        if changed == 0 {
            return Err(GameError::NotFound(format!("user {id} not found")));
        }
        Ok(())
    }

    /// Flip the first-sign-in flag after a successful login.
    pub async fn mark_signed_in(&self, id: i64) -> GameResult<()> {
        let conn = self.conn.lock().await;
        conn.execute("UPDATE users SET first_sign_in = 0 WHERE id = ?1", params![id])?;
        Ok(())
    }

    pub async fn visit_loan_shark(&self, id: i64) -> GameResult<User> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE users SET loan_shark_visit_count = loan_shark_visit_count + 1 WHERE id = ?1",
            params![id],
        )?;
        let user = user_in_tx(&tx, id)?;
        tx.commit()?;
        Ok(user)
    }

    /// Credit cash to a user (mini-game prizes). Amount must be positive.
    pub async fn credit_cash(&self, id: i64, amount: f64) -> GameResult<User> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let mut user = user_in_tx(&tx, id)?;
        user.cash = round2(user.cash + amount);
        write_balances(&tx, &user)?;
        tx.commit()?;
        Ok(user)
    }

    /// Spot buy: `cash -= price * qty`, `stocks += qty`.
    pub async fn spot_buy(&self, id: i64, quantity: i64, price: f64) -> GameResult<User> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let mut user = user_in_tx(&tx, id)?;
        let cost = round2(price * quantity as f64);
        if round2(user.cash) < cost {
            return Err(GameError::InsufficientFunds);
        }
        user.cash = round2(user.cash - cost);
        user.stocks += quantity;
        write_balances(&tx, &user)?;
        tx.commit()?;
        Ok(user)
    }

    /// Spot sell: `cash += price * qty`, `stocks -= qty`.
    pub async fn spot_sell(&self, id: i64, quantity: i64, price: f64) -> GameResult<User> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let mut user = user_in_tx(&tx, id)?;
        if user.stocks < quantity {
            return Err(GameError::InsufficientHoldings);
        }
        user.cash = round2(user.cash + round2(price * quantity as f64));
        user.stocks -= quantity;
        write_balances(&tx, &user)?;
        tx.commit()?;
        Ok(user)
    }

    /// Borrow against the daily quota.
    pub async fn borrow(&self, id: i64, amount: f64, max_loan: f64) -> GameResult<User> {
        let amount = round2(amount);
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let mut user = user_in_tx(&tx, id)?;
        if round2(user.daily_borrowed + amount) > round2(max_loan) {
            return Err(GameError::QuotaExceeded);
        }
        user.cash = round2(user.cash + amount);
        user.debt = round2(user.debt + amount);
        user.daily_borrowed = round2(user.daily_borrowed + amount);
        write_balances(&tx, &user)?;
        tx.commit()?;
        Ok(user)
    }

    /// Repay up to the outstanding debt. Returns the user and the amount
    /// actually repaid.
    pub async fn repay(&self, id: i64, amount: f64) -> GameResult<(User, f64)> {
        let amount = round2(amount);
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let mut user = user_in_tx(&tx, id)?;
        if round2(user.cash) < amount {
            return Err(GameError::InsufficientFunds);
        }
        let actual = round2(amount.min(user.debt));
        user.cash = round2(user.cash - actual);
        user.debt = round2(user.debt - actual);
        write_balances(&tx, &user)?;
        tx.commit()?;
        Ok((user, actual))
    }

    /// Credit several users in one transaction (quiz rewards).
    pub async fn credit_cash_many(&self, credits: &[(i64, f64)]) -> GameResult<Vec<User>> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let mut out = Vec::with_capacity(credits.len());
        for (id, amount) in credits {
            let mut user = user_in_tx(&tx, *id)?;
            user.cash = round2(user.cash + amount);
            write_balances(&tx, &user)?;
            out.push(user);
        }
        tx.commit()?;
        Ok(out)
    }

    /// Minority-vote settlement: winner profits and loser stakes in one
    /// transaction, using the rows read inside it. A loser short on cash has
    /// the shortfall booked as debt.
    pub async fn settle_minority(
        &self,
        credits: &[(i64, f64)],
        losses: &[(i64, f64)],
    ) -> GameResult<Vec<User>> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let mut out = Vec::with_capacity(credits.len() + losses.len());
        for (id, profit) in credits {
            let mut user = user_in_tx(&tx, *id)?;
            user.cash = round2(user.cash + profit);
            write_balances(&tx, &user)?;
            out.push(user);
        }
        for (id, stake) in losses {
            let mut user = user_in_tx(&tx, *id)?;
            let stake = round2(*stake);
            if round2(user.cash) >= stake {
                user.cash = round2(user.cash - stake);
            } else {
                user.debt = round2(user.debt + (stake - round2(user.cash)));
                user.cash = 0.0;
            }
            write_balances(&tx, &user)?;
            out.push(user);
        }
        tx.commit()?;
        Ok(out)
    }

    /// Day-boundary step 1: compound interest on every indebted user.
    pub async fn accrue_interest(&self, rate: f64) -> GameResult<usize> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE users SET debt = ROUND(debt * (1.0 + ?1), 2) WHERE debt > 0",
            params![rate],
        )?;
        Ok(changed)
    }

    /// Day-boundary step 2: reset the daily borrow quota for everyone.
    pub async fn reset_daily_borrowed(&self) -> GameResult<usize> {
        let conn = self.conn.lock().await;
        let changed = conn.execute("UPDATE users SET daily_borrowed = 0", [])?;
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store_with_user(cash: f64) -> (Store, User) {
        let store = Store::open_in_memory().unwrap();
        let user = store
            .create_user("trader1", "hash", "Trader One", Role::User, cash)
            .await
            .unwrap();
        (store, user)
    }

    #[tokio::test]
    async fn test_duplicate_username_conflicts() {
        let (store, _) = store_with_user(100.0).await;
        let err = store
            .create_user("trader1", "hash", "Other", Role::User, 100.0)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "CONFLICT");
    }

    #[tokio::test]
    async fn test_spot_buy_sell_round_trip() {
        let (store, user) = store_with_user(50.0).await;

        // BUY 3 at 10 -> cash 20, stocks 3
        let u = store.spot_buy(user.id, 3, 10.0).await.unwrap();
        assert_eq!(u.cash, 20.0);
        assert_eq!(u.stocks, 3);

        // SELL 2 at 10 -> cash 40, stocks 1
        let u = store.spot_sell(user.id, 2, 10.0).await.unwrap();
        assert_eq!(u.cash, 40.0);
        assert_eq!(u.stocks, 1);

        // BUY 5 at 10 fails, balances untouched
        let err = store.spot_buy(user.id, 5, 10.0).await.unwrap_err();
        assert_eq!(err.kind(), "INSUFFICIENT_FUNDS");
        let u = store.get_user(user.id).await.unwrap();
        assert_eq!(u.cash, 40.0);
        assert_eq!(u.stocks, 1);
    }

    #[tokio::test]
    async fn test_sell_requires_holdings() {
        let (store, user) = store_with_user(100.0).await;
        let err = store.spot_sell(user.id, 1, 10.0).await.unwrap_err();
        assert_eq!(err.kind(), "INSUFFICIENT_HOLDINGS");
    }

    #[tokio::test]
    async fn test_borrow_quota_and_interest() {
        let (store, user) = store_with_user(0.0).await;

        let u = store.borrow(user.id, 900.0, 1000.0).await.unwrap();
        assert_eq!(u.daily_borrowed, 900.0);

        // 200 over quota fails
        let err = store.borrow(user.id, 200.0, 1000.0).await.unwrap_err();
        assert_eq!(err.kind(), "QUOTA_EXCEEDED");

        // exactly up to quota succeeds
        let u = store.borrow(user.id, 100.0, 1000.0).await.unwrap();
        assert_eq!(u.daily_borrowed, 1000.0);
        assert_eq!(u.debt, 1000.0);
        assert_eq!(u.cash, 1000.0);

        // day rollover: quota resets and interest accrues
        store.reset_daily_borrowed().await.unwrap();
        store.accrue_interest(0.0001).await.unwrap();
        let u = store.get_user(user.id).await.unwrap();
        assert_eq!(u.daily_borrowed, 0.0);
        assert_eq!(u.debt, 1000.1);
    }

    #[tokio::test]
    async fn test_repay_caps_at_debt() {
        let (store, user) = store_with_user(500.0).await;
        store.borrow(user.id, 100.0, 1000.0).await.unwrap();

        // cash is now 600, debt 100; repaying 250 only clears the debt
        let (u, actual) = store.repay(user.id, 250.0).await.unwrap();
        assert_eq!(actual, 100.0);
        assert_eq!(u.debt, 0.0);
        assert_eq!(u.cash, 500.0);
    }

    #[tokio::test]
    async fn test_repay_requires_cash() {
        let (store, user) = store_with_user(10.0).await;
        let err = store.repay(user.id, 50.0).await.unwrap_err();
        assert_eq!(err.kind(), "INSUFFICIENT_FUNDS");
    }

    #[tokio::test]
    async fn test_avatar_update_counts() {
        let (store, user) = store_with_user(0.0).await;
        let u = store
            .update_profile(user.id, None, Some("cat.png".to_string()))
            .await
            .unwrap();
        assert_eq!(u.avatar, "cat.png");
        assert_eq!(u.avatar_update_count, 1);

        let u = store
            .update_profile(user.id, Some("New Name".to_string()), None)
            .await
            .unwrap();
        assert_eq!(u.display_name, "New Name");
        assert_eq!(u.avatar_update_count, 1);
    }

    #[tokio::test]
    async fn test_delete_user_removes_orders_first(){
        let (store, user) = store_with_user(1000.0).await;
        store
            .open_contract(user.id, 1, crate::store::ContractSide::Long, 2, 1, 10.0)
            .await
            .unwrap();
        store.delete_user(user.id).await.unwrap();
        let err = store.get_user(user.id).await.unwrap_err();
        assert_eq!(err.kind(), "NOT_FOUND");
    }
}
