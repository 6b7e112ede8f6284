//! Contract orders
//! Mission: persist one-day leveraged bets and settle them exactly once.

use crate::errors::{GameError, GameResult};
use crate::models::round2;
use crate::store::status::status_in_tx;
use crate::store::users::{user_in_tx, User};
use crate::store::Store;
use chrono::Utc;
use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContractSide {
    #[serde(rename = "LONG")]
    Long,
    #[serde(rename = "SHORT")]
    Short,
}

impl ContractSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContractSide::Long => "LONG",
            ContractSide::Short => "SHORT",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "LONG" => Some(ContractSide::Long),
            "SHORT" => Some(ContractSide::Short),
            _ => None,
        }
    }
}

/// A one-day leveraged bet, settled at the next day's price.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractOrder {
    pub id: i64,
    pub user_id: i64,
    pub day: i64,
    #[serde(rename = "type")]
    pub side: ContractSide,
    pub leverage: i64,
    pub quantity: i64,
    pub margin: f64,
    pub entry_price: f64,
    pub is_settled: bool,
    pub is_cancelled: bool,
    pub created_at: String,
}

/// Result of settling a single order.
#[derive(Debug, Clone)]
pub struct SettlementOutcome {
    pub order: ContractOrder,
    pub exit_price: f64,
    pub pnl: f64,
    pub payout: f64,
    pub user: User,
}

const ORDER_COLUMNS: &str = "id, user_id, day, side, leverage, quantity, margin, entry_price,
    is_settled, is_cancelled, created_at";

fn row_to_order(row: &Row<'_>) -> rusqlite::Result<ContractOrder> {
    let side_str: String = row.get(3)?;
    Ok(ContractOrder {
        id: row.get(0)?,
        user_id: row.get(1)?,
        day: row.get(2)?,
        side: ContractSide::from_str(&side_str).unwrap_or(ContractSide::Long),
        leverage: row.get(4)?,
        quantity: row.get(5)?,
        margin: row.get(6)?,
        entry_price: row.get(7)?,
        is_settled: row.get::<_, i64>(8)? != 0,
        is_cancelled: row.get::<_, i64>(9)? != 0,
        created_at: row.get(10)?,
    })
}

impl Store {
    /// Open a contract: freeze margin out of cash and record the order.
    ///
    /// `max_leverage` is re-read inside the transaction so a concurrent
    /// params change cannot be raced past.
    pub async fn open_contract(
        &self,
        user_id: i64,
        day: i64,
        side: ContractSide,
        leverage: i64,
        quantity: i64,
        price: f64,
    ) -> GameResult<(ContractOrder, User)> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let status = status_in_tx(&tx)?;
        if leverage < 1 || leverage > status.max_leverage {
            return Err(GameError::Validation(format!(
                "leverage must be between 1 and {}",
                status.max_leverage
            )));
        }
        let mut user = user_in_tx(&tx, user_id)?;
        let margin = round2(price * quantity as f64 / leverage as f64);
        if round2(user.cash) < margin {
            return Err(GameError::InsufficientFunds);
        }
        user.cash = round2(user.cash - margin);
        tx.execute(
            "UPDATE users SET cash = ?1 WHERE id = ?2",
            params![user.cash, user_id],
        )?;
        let now = Utc::now().to_rfc3339();
        tx.execute(
            "INSERT INTO contract_orders (user_id, day, side, leverage, quantity, margin, entry_price, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![user_id, day, side.as_str(), leverage, quantity, margin, price, now],
        )?;
        let id = tx.last_insert_rowid();
        let order = tx.query_row(
            &format!("SELECT {ORDER_COLUMNS} FROM contract_orders WHERE id = ?1"),
            params![id],
            row_to_order,
        )?;
        tx.commit()?;
        Ok((order, user))
    }

    /// Cancel every open order this user placed today, refunding margins.
    pub async fn cancel_day_contracts(
        &self,
        user_id: i64,
        day: i64,
    ) -> GameResult<(f64, usize, User)> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let orders: Vec<ContractOrder> = {
            let mut stmt = tx.prepare(&format!(
                "SELECT {ORDER_COLUMNS} FROM contract_orders
                 WHERE user_id = ?1 AND day = ?2 AND is_settled = 0 AND is_cancelled = 0"
            ))?;
            let rows = stmt
                .query_map(params![user_id, day], row_to_order)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };
        if orders.is_empty() {
            return Err(GameError::NotFound(
                "no open contracts for the current day".to_string(),
            ));
        }
        let refund = round2(orders.iter().map(|o| o.margin).sum());
        tx.execute(
            "UPDATE contract_orders SET is_cancelled = 1
             WHERE user_id = ?1 AND day = ?2 AND is_settled = 0 AND is_cancelled = 0",
            params![user_id, day],
        )?;
        let mut user = user_in_tx(&tx, user_id)?;
        user.cash = round2(user.cash + refund);
        tx.execute(
            "UPDATE users SET cash = ?1 WHERE id = ?2",
            params![user.cash, user_id],
        )?;
        tx.commit()?;
        Ok((refund, orders.len(), user))
    }

    /// All open (unsettled, uncancelled) orders for a given day.
    pub async fn open_orders_for_day(&self, day: i64) -> GameResult<Vec<ContractOrder>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ORDER_COLUMNS} FROM contract_orders
             WHERE day = ?1 AND is_settled = 0 AND is_cancelled = 0 ORDER BY id ASC"
        ))?;
        let orders = stmt
            .query_map(params![day], row_to_order)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(orders)
    }

    /// One user's open orders for a given day (FULL_SYNC_STATE).
    pub async fn user_open_orders_for_day(
        &self,
        user_id: i64,
        day: i64,
    ) -> GameResult<Vec<ContractOrder>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ORDER_COLUMNS} FROM contract_orders
             WHERE user_id = ?1 AND day = ?2 AND is_settled = 0 AND is_cancelled = 0 ORDER BY id ASC"
        ))?;
        let orders = stmt
            .query_map(params![user_id, day], row_to_order)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(orders)
    }

    /// Settle a single order at `exit_price`, crediting the payout to cash
    /// or booking the shortfall as debt, in one transaction with the owning
    /// user row.
    pub async fn settle_order(&self, order_id: i64, exit_price: f64) -> GameResult<SettlementOutcome> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let mut order = tx.query_row(
            &format!("SELECT {ORDER_COLUMNS} FROM contract_orders WHERE id = ?1"),
            params![order_id],
            row_to_order,
        )?;
        if order.is_settled || order.is_cancelled {
            return Err(GameError::Precondition(format!(
                "order {order_id} is already terminal"
            )));
        }
        let pnl_per_unit = match order.side {
            ContractSide::Long => exit_price - order.entry_price,
            ContractSide::Short => order.entry_price - exit_price,
        };
        let pnl = round2(pnl_per_unit * order.quantity as f64 * order.leverage as f64);
        let payout = round2(order.margin + pnl);

        let mut user = user_in_tx(&tx, order.user_id)?;
        if payout >= 0.0 {
            user.cash = round2(user.cash + payout);
        } else {
            user.debt = round2(user.debt - payout);
        }
        tx.execute(
            "UPDATE users SET cash = ?1, debt = ?2 WHERE id = ?3",
            params![user.cash, user.debt, user.id],
        )?;
        tx.execute(
            "UPDATE contract_orders SET is_settled = 1 WHERE id = ?1",
            params![order_id],
        )?;
        order.is_settled = true;
        tx.commit()?;
        Ok(SettlementOutcome {
            order,
            exit_price,
            pnl,
            payout,
            user,
        })
    }

    /// Sum of open margins per user for a given day (leaderboard input).
    pub async fn open_margin_sums(&self, day: i64) -> GameResult<HashMap<i64, f64>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT user_id, SUM(margin) FROM contract_orders
             WHERE day = ?1 AND is_settled = 0 AND is_cancelled = 0 GROUP BY user_id",
        )?;
        let mut out = HashMap::new();
        let rows = stmt.query_map(params![day], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)?))
        })?;
        for row in rows {
            let (user_id, sum) = row?;
            out.insert(user_id, sum);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Role;

    async fn store_with_user(cash: f64) -> (Store, User) {
        let store = Store::open_in_memory().unwrap();
        let user = store
            .create_user("trader1", "hash", "Trader One", Role::User, cash)
            .await
            .unwrap();
        (store, user)
    }

    #[tokio::test]
    async fn test_open_and_settle_long_profit() {
        let (store, user) = store_with_user(100.0).await;

        // P=10 on day 5, LONG q=4 lev=5 -> margin 8
        let (order, u) = store
            .open_contract(user.id, 5, ContractSide::Long, 5, 4, 10.0)
            .await
            .unwrap();
        assert_eq!(order.margin, 8.0);
        assert_eq!(u.cash, 92.0);

        // Day 6 at P'=12: pnl = 2*4*5 = 40, payout 48
        let outcome = store.settle_order(order.id, 12.0).await.unwrap();
        assert_eq!(outcome.pnl, 40.0);
        assert_eq!(outcome.payout, 48.0);
        assert_eq!(outcome.user.cash, 140.0);
        assert!(outcome.order.is_settled);
    }

    #[tokio::test]
    async fn test_loss_exceeding_margin_becomes_debt() {
        let (store, user) = store_with_user(100.0).await;

        // P=10, SHORT q=10 lev=10 -> margin 10
        let (order, u) = store
            .open_contract(user.id, 1, ContractSide::Short, 10, 10, 10.0)
            .await
            .unwrap();
        assert_eq!(order.margin, 10.0);
        assert_eq!(u.cash, 90.0);

        // P'=13: pnl = -3*10*10 = -300, payout -290
        let outcome = store.settle_order(order.id, 13.0).await.unwrap();
        assert_eq!(outcome.pnl, -300.0);
        assert_eq!(outcome.payout, -290.0);
        assert_eq!(outcome.user.cash, 90.0);
        assert_eq!(outcome.user.debt, 290.0);

        // conservation: delta cash minus delta debt equals the payout
        let delta_cash = outcome.user.cash - 90.0;
        let delta_debt = outcome.user.debt - 0.0;
        assert_eq!(delta_cash - delta_debt, outcome.payout);
    }

    #[tokio::test]
    async fn test_no_double_settle() {
        let (store, user) = store_with_user(100.0).await;
        let (order, _) = store
            .open_contract(user.id, 1, ContractSide::Long, 2, 1, 10.0)
            .await
            .unwrap();
        store.settle_order(order.id, 11.0).await.unwrap();
        let err = store.settle_order(order.id, 11.0).await.unwrap_err();
        assert_eq!(err.kind(), "PRECONDITION");
    }

    #[tokio::test]
    async fn test_cancel_refunds_margin() {
        let (store, user) = store_with_user(100.0).await;
        store
            .open_contract(user.id, 3, ContractSide::Long, 4, 2, 20.0)
            .await
            .unwrap();
        store
            .open_contract(user.id, 3, ContractSide::Short, 2, 1, 20.0)
            .await
            .unwrap();
        let u = store.get_user(user.id).await.unwrap();
        assert_eq!(u.cash, 80.0); // 100 - 10 - 10

        let (refund, count, u) = store.cancel_day_contracts(user.id, 3).await.unwrap();
        assert_eq!(count, 2);
        assert_eq!(refund, 20.0);
        assert_eq!(u.cash, 100.0);

        // cancelled orders never settle
        assert!(store.open_orders_for_day(3).await.unwrap().is_empty());
        let err = store.cancel_day_contracts(user.id, 3).await.unwrap_err();
        assert_eq!(err.kind(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_leverage_bounds_checked_in_tx() {
        let (store, user) = store_with_user(1000.0).await;
        let err = store
            .open_contract(user.id, 1, ContractSide::Long, 99, 1, 10.0)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "VALIDATION");
    }

    #[tokio::test]
    async fn test_open_margin_sums() {
        let (store, user) = store_with_user(1000.0).await;
        store
            .open_contract(user.id, 2, ContractSide::Long, 5, 10, 10.0)
            .await
            .unwrap();
        store
            .open_contract(user.id, 2, ContractSide::Short, 4, 2, 10.0)
            .await
            .unwrap();
        let sums = store.open_margin_sums(2).await.unwrap();
        assert_eq!(sums.get(&user.id).copied().unwrap(), 25.0); // 20 + 5
    }
}
