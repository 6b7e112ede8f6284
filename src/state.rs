//! Application state shared across HTTP handlers, WebSocket sessions, and
//! background tasks.

use crate::auth::JwtHandler;
use crate::engine::{Leaderboard, Lifecycle, TradingCore};
use crate::minigame::MiniGameEngine;
use crate::models::Config;
use crate::script::ScriptCache;
use crate::store::Store;
use crate::ws::Bus;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub store: Store,
    pub cache: Arc<ScriptCache>,
    pub bus: Bus,
    pub trading: TradingCore,
    pub lifecycle: Lifecycle,
    pub leaderboard: Leaderboard,
    pub minigame: MiniGameEngine,
    pub jwt: Arc<JwtHandler>,
}

impl AppState {
    /// Wire the full state graph from a store and config.
    pub fn build(config: Config, store: Store) -> Self {
        let cache = Arc::new(ScriptCache::new());
        let bus = Bus::new(1024);
        let leaderboard = Leaderboard::new(store.clone(), cache.clone());
        let trading = TradingCore::new(
            store.clone(),
            cache.clone(),
            bus.clone(),
            config.loan_requires_running,
        );
        let lifecycle = Lifecycle::new(store.clone(), cache.clone(), bus.clone());
        let minigame = MiniGameEngine::new(store.clone(), bus.clone(), leaderboard.clone());
        let jwt = Arc::new(JwtHandler::new(config.jwt_secret.clone()));
        Self {
            config,
            store,
            cache,
            bus,
            trading,
            lifecycle,
            leaderboard,
            minigame,
            jwt,
        }
    }
}
