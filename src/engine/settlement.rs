//! Day-boundary settlement pipeline
//! Mission: on every day transition, accrue interest, reset borrow quotas,
//! settle yesterday's contracts at today's price, then broadcast price,
//! leaderboard, and per-user assets - in that order.

use crate::clock::GameState;
use crate::engine::leaderboard::{Leaderboard, LEADERBOARD_SIZE};
use crate::errors::GameResult;
use crate::script::ScriptCache;
use crate::store::Store;
use crate::ws::events::{
    AssetsUpdate, ContractSettled, LeaderboardUpdate, PriceUpdate, ServerEvent,
};
use crate::ws::Bus;
use std::sync::Arc;
use tracing::{info, warn};

pub struct SettlementPipeline {
    store: Store,
    cache: Arc<ScriptCache>,
    bus: Bus,
    leaderboard: Leaderboard,
}

impl SettlementPipeline {
    pub fn new(store: Store, cache: Arc<ScriptCache>, bus: Bus, leaderboard: Leaderboard) -> Self {
        Self {
            store,
            cache,
            bus,
            leaderboard,
        }
    }

    /// Run the full boundary for the day carried by `state`.
    ///
    /// Steps are totally ordered; a failure in any per-user or per-order
    /// sub-step is logged and skipped, never aborting the boundary.
    pub async fn run_day_boundary(&self, state: &GameState) -> GameResult<()> {
        let day = state.current_day;
        let price = self
            .cache
            .price_for_day(day)
            .unwrap_or(state.initial_price);
        info!(day, price, "🌅 day boundary settlement starting");

        // 1. Interest accrual on outstanding debt.
        match self.store.accrue_interest(state.daily_interest_rate).await {
            Ok(count) if count > 0 => info!(count, "💳 interest accrued"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "interest accrual failed"),
        }

        // 2. Daily borrow quota reset.
        if let Err(e) = self.store.reset_daily_borrowed().await {
            warn!(error = %e, "daily borrow reset failed");
        }

        // 3. Settle yesterday's contracts at today's price, one transaction
        //    per order.
        match self.store.open_orders_for_day(day - 1).await {
            Ok(orders) => {
                for order in orders {
                    match self.store.settle_order(order.id, price).await {
                        Ok(outcome) => {
                            self.bus.to_user(
                                outcome.user.id,
                                ServerEvent::ContractSettled(ContractSettled {
                                    side: outcome.order.side,
                                    quantity: outcome.order.quantity,
                                    entry_price: outcome.order.entry_price,
                                    exit_price: outcome.exit_price,
                                    pnl: outcome.pnl,
                                    new_cash: outcome.user.cash,
                                    new_debt: outcome.user.debt,
                                }),
                            );
                        }
                        Err(e) => {
                            warn!(order_id = order.id, error = %e, "contract settlement failed, skipping");
                        }
                    }
                }
            }
            Err(e) => warn!(error = %e, "could not list yesterday's contracts"),
        }

        // 4. Price broadcast, strictly after all settlements committed.
        self.bus.global_emit(ServerEvent::PriceUpdate(PriceUpdate {
            day,
            price,
            history: self.cache.history_up_to(day),
        }));

        // 5. Leaderboard broadcast.
        match self.leaderboard.top(LEADERBOARD_SIZE).await {
            Ok(data) => self
                .bus
                .global_emit(ServerEvent::LeaderboardUpdate(LeaderboardUpdate { data })),
            Err(e) => warn!(error = %e, "leaderboard computation failed"),
        }

        // 6. Fresh assets to every connected user.
        for user_id in self.bus.online_user_ids() {
            match self.store.get_user(user_id).await {
                Ok(user) => self
                    .bus
                    .to_user(user_id, ServerEvent::AssetsUpdate(AssetsUpdate::from(&user))),
                Err(e) => warn!(user_id, error = %e, "assets refresh failed"),
            }
        }

        info!(day, "✅ day boundary settlement complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::derive_state;
    use crate::models::Trend;
    use crate::store::{ContractSide, GameStatus, Role, ScriptDay};

    async fn setup() -> (Store, Arc<ScriptCache>, Bus, SettlementPipeline) {
        let store = Store::open_in_memory().unwrap();
        let cache = Arc::new(ScriptCache::new());
        let bus = Bus::new(256);
        let leaderboard = Leaderboard::new(store.clone(), cache.clone());
        let pipeline = SettlementPipeline::new(store.clone(), cache.clone(), bus.clone(), leaderboard);
        (store, cache, bus, pipeline)
    }

    fn script_day(day: i64, price: f64) -> ScriptDay {
        ScriptDay {
            day,
            price,
            title: None,
            news: None,
            effective_trend: Trend::Flat,
            publish_offset: None,
            is_broadcasted: false,
        }
    }

    async fn state_for_day(store: &Store, day: i64) -> GameState {
        let status = store.get_status().await.unwrap();
        // walk the clock to the target day
        let start = 1_000_000;
        store.start_game(start).await.unwrap();
        let status = GameStatus {
            is_started: true,
            game_start_time: Some(start),
            paused_at: None,
            ..status
        };
        derive_state(&status, start + (day - 1) * status.time_ratio)
    }

    #[tokio::test]
    async fn test_full_boundary_settles_and_broadcasts_in_order() {
        let (store, cache, bus, pipeline) = setup().await;
        store
            .replace_script(&[script_day(1, 10.0), script_day(2, 12.0)])
            .await
            .unwrap();
        cache.reload(&store).await.unwrap();

        let user = store
            .create_user("trader1", "hash", "Trader", Role::User, 100.0)
            .await
            .unwrap();
        // LONG q=4 lev=5 at P=10 on day 1 -> margin 8
        store
            .open_contract(user.id, 1, ContractSide::Long, 5, 4, 10.0)
            .await
            .unwrap();
        store.borrow(user.id, 100.0, 10_000.0).await.unwrap();

        let mut rx = bus.subscribe();
        bus.session_connected(user.id);
        let state = state_for_day(&store, 2).await;
        pipeline.run_day_boundary(&state).await.unwrap();

        // interest accrued and quota reset
        let u = store.get_user(user.id).await.unwrap();
        assert_eq!(u.daily_borrowed, 0.0);
        assert!(u.debt > 100.0);
        // payout 8 + (12-10)*4*5 = 48 credited
        assert_eq!(u.cash, 240.0); // 100 - 8 + 100 + 48

        // ordering: CONTRACT_SETTLED precedes PRICE_UPDATE, then leaderboard,
        // then assets
        let mut kinds = Vec::new();
        while let Ok(envelope) = rx.try_recv() {
            kinds.push(match envelope.event {
                ServerEvent::ContractSettled(_) => "settled",
                ServerEvent::PriceUpdate(_) => "price",
                ServerEvent::LeaderboardUpdate(_) => "leaderboard",
                ServerEvent::AssetsUpdate(_) => "assets",
                _ => "other",
            });
        }
        let settled = kinds.iter().position(|k| *k == "settled").unwrap();
        let price = kinds.iter().position(|k| *k == "price").unwrap();
        let leaderboard = kinds.iter().position(|k| *k == "leaderboard").unwrap();
        let assets = kinds.iter().position(|k| *k == "assets").unwrap();
        assert!(settled < price);
        assert!(price < leaderboard);
        assert!(leaderboard < assets);
    }

    #[tokio::test]
    async fn test_settled_orders_do_not_settle_twice() {
        let (store, cache, _bus, pipeline) = setup().await;
        store
            .replace_script(&[script_day(1, 10.0), script_day(2, 12.0)])
            .await
            .unwrap();
        cache.reload(&store).await.unwrap();
        let user = store
            .create_user("trader1", "hash", "Trader", Role::User, 100.0)
            .await
            .unwrap();
        store
            .open_contract(user.id, 1, ContractSide::Long, 5, 4, 10.0)
            .await
            .unwrap();

        let state = state_for_day(&store, 2).await;
        pipeline.run_day_boundary(&state).await.unwrap();
        let cash_after_first = store.get_user(user.id).await.unwrap().cash;

        // running the same boundary again finds no open orders
        pipeline.run_day_boundary(&state).await.unwrap();
        let cash_after_second = store.get_user(user.id).await.unwrap().cash;
        assert_eq!(cash_after_first, cash_after_second);
    }

    #[tokio::test]
    async fn test_cancelled_orders_are_skipped() {
        let (store, cache, _bus, pipeline) = setup().await;
        store
            .replace_script(&[script_day(1, 10.0), script_day(2, 20.0)])
            .await
            .unwrap();
        cache.reload(&store).await.unwrap();
        let user = store
            .create_user("trader1", "hash", "Trader", Role::User, 100.0)
            .await
            .unwrap();
        store
            .open_contract(user.id, 1, ContractSide::Long, 5, 4, 10.0)
            .await
            .unwrap();
        store.cancel_day_contracts(user.id, 1).await.unwrap();

        let state = state_for_day(&store, 2).await;
        pipeline.run_day_boundary(&state).await.unwrap();
        // margin was refunded at cancel and nothing settled
        assert_eq!(store.get_user(user.id).await.unwrap().cash, 100.0);
    }
}
