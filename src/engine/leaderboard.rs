//! Leaderboard
//! Mission: rank users by total assets at the authoritative current price.

use crate::clock::{derive_state, now_ts};
use crate::errors::GameResult;
use crate::models::round2;
use crate::script::ScriptCache;
use crate::store::Store;
use crate::ws::events::LeaderboardEntry;
use std::sync::Arc;

pub const LEADERBOARD_SIZE: usize = 100;

/// Computes `cash + stocks * price + open margins - debt` rankings.
///
/// Injected into the mini-game engine and the settlement pipeline rather
/// than looked up ad hoc.
#[derive(Clone)]
pub struct Leaderboard {
    store: Store,
    cache: Arc<ScriptCache>,
}

impl Leaderboard {
    pub fn new(store: Store, cache: Arc<ScriptCache>) -> Self {
        Self { store, cache }
    }

    /// Top `limit` users ordered by total assets descending; rank is 1-based.
    pub async fn top(&self, limit: usize) -> GameResult<Vec<LeaderboardEntry>> {
        let status = self.store.get_status().await?;
        let state = derive_state(&status, now_ts());
        let price = self
            .cache
            .price_for_day(state.current_day)
            .unwrap_or(state.initial_price);

        let users = self.store.list_users().await?;
        let margins = self.store.open_margin_sums(state.current_day).await?;

        let mut entries: Vec<LeaderboardEntry> = users
            .iter()
            .map(|u| {
                let margin = margins.get(&u.id).copied().unwrap_or(0.0);
                let total = round2(u.cash + u.stocks as f64 * price + margin - u.debt);
                LeaderboardEntry {
                    user_id: u.id,
                    display_name: u.display_name.clone(),
                    avatar: u.avatar.clone(),
                    total_assets: total,
                    rank: 0,
                }
            })
            .collect();

        entries.sort_by(|a, b| {
            b.total_assets
                .partial_cmp(&a.total_assets)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.user_id.cmp(&b.user_id))
        });
        entries.truncate(limit);
        for (i, entry) in entries.iter_mut().enumerate() {
            entry.rank = i + 1;
        }
        Ok(entries)
    }
}
