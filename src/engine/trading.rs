//! Trading core
//! Mission: validate and execute spot trades, leveraged contracts, and the
//! borrow/repay credit line, all at the authoritative price of the current
//! day.

use crate::clock::{derive_state, now_ts, GameState};
use crate::errors::{GameError, GameResult};
use crate::models::round2;
use crate::script::ScriptCache;
use crate::store::{ContractSide, Store, User};
use crate::ws::events::{AssetsUpdate, LoanSharkVisitUpdate, ServerEvent, TradeSuccess};
use crate::ws::Bus;
use std::sync::Arc;
use tracing::info;

/// Synchronous request handlers for every money-mutating player action.
///
/// Each handler resolves the current price once, delegates the balance
/// mutation to a single store transaction, and reports the post-commit
/// state. Failures have no side effects.
#[derive(Clone)]
pub struct TradingCore {
    store: Store,
    cache: Arc<ScriptCache>,
    bus: Bus,
    loan_requires_running: bool,
}

impl TradingCore {
    pub fn new(store: Store, cache: Arc<ScriptCache>, bus: Bus, loan_requires_running: bool) -> Self {
        Self {
            store,
            cache,
            bus,
            loan_requires_running,
        }
    }

    /// Current game state plus the authoritative price: the script price for
    /// the current day, or the initial price before the run starts.
    async fn state_and_price(&self) -> GameResult<(GameState, f64)> {
        let status = self.store.get_status().await?;
        let state = derive_state(&status, now_ts());
        let price = self
            .cache
            .price_for_day(state.current_day)
            .unwrap_or(state.initial_price);
        Ok((state, price))
    }

    fn push_assets(&self, user: &User) {
        self.bus
            .to_user(user.id, ServerEvent::AssetsUpdate(AssetsUpdate::from(user)));
    }

    pub async fn buy_stock(&self, user_id: i64, quantity: i64) -> GameResult<TradeSuccess> {
        if quantity < 1 {
            return Err(GameError::Validation("quantity must be at least 1".to_string()));
        }
        let (_, price) = self.state_and_price().await?;
        let user = self.store.spot_buy(user_id, quantity, price).await?;
        info!(user_id, quantity, price, "📈 spot buy filled");
        self.push_assets(&user);
        Ok(TradeSuccess {
            action: "BUY_STOCK".to_string(),
            assets: AssetsUpdate::from(&user),
            order: None,
            refund: None,
        })
    }

    pub async fn sell_stock(&self, user_id: i64, quantity: i64) -> GameResult<TradeSuccess> {
        if quantity < 1 {
            return Err(GameError::Validation("quantity must be at least 1".to_string()));
        }
        let (_, price) = self.state_and_price().await?;
        let user = self.store.spot_sell(user_id, quantity, price).await?;
        info!(user_id, quantity, price, "📉 spot sell filled");
        self.push_assets(&user);
        Ok(TradeSuccess {
            action: "SELL_STOCK".to_string(),
            assets: AssetsUpdate::from(&user),
            order: None,
            refund: None,
        })
    }

    pub async fn open_contract(
        &self,
        user_id: i64,
        side: &str,
        leverage: i64,
        quantity: i64,
    ) -> GameResult<TradeSuccess> {
        let side = ContractSide::from_str(side)
            .ok_or_else(|| GameError::Validation("type must be LONG or SHORT".to_string()))?;
        if quantity < 1 {
            return Err(GameError::Validation("quantity must be at least 1".to_string()));
        }
        let (state, price) = self.state_and_price().await?;
        let (order, user) = self
            .store
            .open_contract(user_id, state.current_day, side, leverage, quantity, price)
            .await?;
        info!(
            user_id,
            side = side.as_str(),
            leverage,
            quantity,
            margin = order.margin,
            "📝 contract opened"
        );
        self.push_assets(&user);
        Ok(TradeSuccess {
            action: "BUY_CONTRACT".to_string(),
            assets: AssetsUpdate::from(&user),
            order: Some(order),
            refund: None,
        })
    }

    /// Cancel all of the caller's open contracts for the current day.
    pub async fn cancel_contracts(&self, user_id: i64) -> GameResult<TradeSuccess> {
        let (state, _) = self.state_and_price().await?;
        let (refund, count, user) = self
            .store
            .cancel_day_contracts(user_id, state.current_day)
            .await?;
        info!(user_id, count, refund, "↩️ contracts cancelled");
        self.push_assets(&user);
        Ok(TradeSuccess {
            action: "CANCEL_CONTRACT".to_string(),
            assets: AssetsUpdate::from(&user),
            order: None,
            refund: Some(refund),
        })
    }

    pub async fn borrow(&self, user_id: i64, amount: f64) -> GameResult<TradeSuccess> {
        let amount = round2(amount);
        if !(amount > 0.0) {
            return Err(GameError::Validation("amount must be positive".to_string()));
        }
        let (state, _) = self.state_and_price().await?;
        if self.loan_requires_running && !state.is_started {
            return Err(GameError::GameNotRunning);
        }
        let user = self
            .store
            .borrow(user_id, amount, state.max_loan_amount)
            .await?;
        info!(user_id, amount, debt = user.debt, "💰 loan drawn");
        self.push_assets(&user);
        Ok(TradeSuccess {
            action: "BORROW_MONEY".to_string(),
            assets: AssetsUpdate::from(&user),
            order: None,
            refund: None,
        })
    }

    pub async fn repay(&self, user_id: i64, amount: f64) -> GameResult<TradeSuccess> {
        let amount = round2(amount);
        if !(amount > 0.0) {
            return Err(GameError::Validation("amount must be positive".to_string()));
        }
        let (state, _) = self.state_and_price().await?;
        if self.loan_requires_running && !state.is_started {
            return Err(GameError::GameNotRunning);
        }
        let (user, actual) = self.store.repay(user_id, amount).await?;
        info!(user_id, repaid = actual, debt = user.debt, "💸 loan repaid");
        self.push_assets(&user);
        Ok(TradeSuccess {
            action: "REPAY_MONEY".to_string(),
            assets: AssetsUpdate::from(&user),
            order: None,
            refund: None,
        })
    }

    /// Loan-shark visit: counts the visit and notifies admin dashboards.
    pub async fn visit_loan_shark(&self, user_id: i64) -> GameResult<()> {
        let user = self.store.visit_loan_shark(user_id).await?;
        self.bus.to_admins(ServerEvent::LoanSharkVisitUpdate(LoanSharkVisitUpdate {
            user_id: user.id,
            display_name: user.display_name.clone(),
            visit_count: user.loan_shark_visit_count,
        }));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Role;

    async fn setup(cash: f64) -> (Store, TradingCore, User) {
        let store = Store::open_in_memory().unwrap();
        let cache = Arc::new(ScriptCache::new());
        let bus = Bus::new(64);
        let core = TradingCore::new(store.clone(), cache, bus, true);
        let user = store
            .create_user("trader1", "hash", "Trader One", Role::User, cash)
            .await
            .unwrap();
        (store, core, user)
    }

    #[tokio::test]
    async fn test_buy_uses_initial_price_before_start() {
        // initial price defaults to 100; never-started game trades at it
        let (_store, core, user) = setup(250.0).await;
        let result = core.buy_stock(user.id, 2).await.unwrap();
        assert_eq!(result.assets.cash, 50.0);
        assert_eq!(result.assets.stocks, 2);
    }

    #[tokio::test]
    async fn test_quantity_validation() {
        let (_store, core, user) = setup(100.0).await;
        for qty in [0, -3] {
            let err = core.buy_stock(user.id, qty).await.unwrap_err();
            assert_eq!(err.kind(), "VALIDATION");
            let err = core.sell_stock(user.id, qty).await.unwrap_err();
            assert_eq!(err.kind(), "VALIDATION");
        }
    }

    #[tokio::test]
    async fn test_contract_side_validation() {
        let (_store, core, user) = setup(100.0).await;
        let err = core.open_contract(user.id, "SIDEWAYS", 2, 1).await.unwrap_err();
        assert_eq!(err.kind(), "VALIDATION");
    }

    #[tokio::test]
    async fn test_borrow_requires_running_game() {
        let (store, core, user) = setup(0.0).await;
        let err = core.borrow(user.id, 100.0).await.unwrap_err();
        assert_eq!(err.kind(), "GAME_NOT_RUNNING");

        store.start_game(now_ts()).await.unwrap();
        let result = core.borrow(user.id, 100.0).await.unwrap();
        assert_eq!(result.assets.cash, 100.0);
        assert_eq!(result.assets.debt, 100.0);
    }

    #[tokio::test]
    async fn test_borrow_accepts_stopped_game_when_configured() {
        let store = Store::open_in_memory().unwrap();
        let cache = Arc::new(ScriptCache::new());
        let core = TradingCore::new(store.clone(), cache, Bus::new(16), false);
        let user = store
            .create_user("trader1", "hash", "Trader", Role::User, 0.0)
            .await
            .unwrap();
        core.borrow(user.id, 50.0).await.unwrap();
    }

    #[tokio::test]
    async fn test_repay_validates_amount(){
        let (store, core, user) = setup(100.0).await;
        store.start_game(now_ts()).await.unwrap();
        let err = core.repay(user.id, 0.0).await.unwrap_err();
        assert_eq!(err.kind(), "VALIDATION");
    }

    #[tokio::test]
    async fn test_cancel_without_orders_is_not_found() {
        let (_store, core, user) = setup(100.0).await;
        let err = core.cancel_contracts(user.id).await.unwrap_err();
        assert_eq!(err.kind(), "NOT_FOUND");
    }
}
