//! Lifecycle operations
//! Mission: orchestrate start/stop/resume/restart/reset/params on top of the
//! store's transactional primitives, keeping the script cache and connected
//! clients in sync.

use crate::clock::now_ts;
use crate::errors::GameResult;
use crate::script::ScriptCache;
use crate::store::{GameStatus, ParamsUpdate, Store};
use crate::ws::events::{LoanConfigUpdate, ServerEvent};
use crate::ws::Bus;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub struct Lifecycle {
    store: Store,
    cache: Arc<ScriptCache>,
    bus: Bus,
}

impl Lifecycle {
    pub fn new(store: Store, cache: Arc<ScriptCache>, bus: Bus) -> Self {
        Self { store, cache, bus }
    }

    pub async fn start(&self) -> GameResult<GameStatus> {
        let status = self.store.start_game(now_ts()).await?;
        self.cache.reload(&self.store).await?;
        self.bus.global_emit(ServerEvent::ClearNews);
        info!(total_days = status.total_days, "🏁 game started");
        Ok(status)
    }

    pub async fn stop(&self) -> GameResult<GameStatus> {
        let status = self.store.stop_game(now_ts()).await?;
        info!("⏸️ game stopped");
        Ok(status)
    }

    pub async fn resume(&self) -> GameResult<GameStatus> {
        let status = self.store.resume_game(now_ts()).await?;
        info!("▶️ game resumed");
        Ok(status)
    }

    pub async fn restart(&self) -> GameResult<GameStatus> {
        let status = self.store.restart_game().await?;
        self.cache.reload(&self.store).await?;
        self.bus.global_emit(ServerEvent::ClearNews);
        info!("🔄 game restarted, balances reset");
        Ok(status)
    }

    pub async fn reset(&self, current_admin_id: i64) -> GameResult<GameStatus> {
        let status = self.store.factory_reset(current_admin_id).await?;
        self.cache.reload(&self.store).await?;
        self.bus.global_emit(ServerEvent::ClearNews);
        info!(kept_admin = current_admin_id, "🧹 factory reset complete");
        Ok(status)
    }

    pub async fn update_params(&self, update: ParamsUpdate) -> GameResult<GameStatus> {
        let (status, loan_changed) = self.store.update_params(update, now_ts()).await?;
        if loan_changed {
            self.bus
                .global_emit(ServerEvent::LoanConfigUpdate(LoanConfigUpdate {
                    max_loan_amount: status.max_loan_amount,
                    daily_interest_rate: status.daily_interest_rate,
                }));
        }
        info!("⚙️ game parameters updated");
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Trend;
    use crate::store::ScriptDay;

    async fn setup() -> (Store, Arc<ScriptCache>, Bus, Lifecycle) {
        let store = Store::open_in_memory().unwrap();
        let cache = Arc::new(ScriptCache::new());
        let bus = Bus::new(64);
        let lifecycle = Lifecycle::new(store.clone(), cache.clone(), bus.clone());
        (store, cache, bus, lifecycle)
    }

    #[tokio::test]
    async fn test_start_reloads_cache_and_clears_news() {
        let (store, cache, bus, lifecycle) = setup().await;
        store
            .replace_script(&[ScriptDay {
                day: 1,
                price: 42.0,
                title: None,
                news: None,
                effective_trend: Trend::Flat,
                publish_offset: None,
                is_broadcasted: false,
            }])
            .await
            .unwrap();

        let mut rx = bus.subscribe();
        lifecycle.start().await.unwrap();
        assert_eq!(cache.price_for_day(1), Some(42.0));
        let envelope = rx.recv().await.unwrap();
        assert!(matches!(envelope.event, ServerEvent::ClearNews));
    }

    #[tokio::test]
    async fn test_loan_config_broadcast_on_change() {
        let (_store, _cache, bus, lifecycle) = setup().await;
        let mut rx = bus.subscribe();
        lifecycle
            .update_params(ParamsUpdate {
                max_loan_amount: Some(500.0),
                ..Default::default()
            })
            .await
            .unwrap();
        let envelope = rx.recv().await.unwrap();
        match envelope.event {
            ServerEvent::LoanConfigUpdate(update) => assert_eq!(update.max_loan_amount, 500.0),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
