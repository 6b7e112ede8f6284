//! Script cache
//! Mission: keep a fully-loaded, copy-on-reload snapshot of the day timeline
//! so the tick loop and trading core read prices without touching the store.
//!
//! Readers may observe an older snapshot across a reload, never a torn one.

use crate::errors::GameResult;
use crate::models::Trend;
use crate::store::{ScriptDay, Store};
use arc_swap::ArcSwap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A price-history entry with broadcast-gated headline fields.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryDay {
    pub day: i64,
    pub price: f64,
    pub title: Option<String>,
    pub news: Option<String>,
    pub effective_trend: Trend,
}

/// A published headline.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewsItem {
    pub day: i64,
    pub title: String,
    pub content: Option<String>,
}

#[derive(Default)]
struct ScriptTable {
    days: BTreeMap<i64, ScriptDay>,
}

/// Process-wide cached copy of the script. Writes go through `reload` (full
/// swap) or `mark_broadcasted` (copy-on-write of a single flag).
pub struct ScriptCache {
    table: ArcSwap<ScriptTable>,
}

impl ScriptCache {
    pub fn new() -> Self {
        Self {
            table: ArcSwap::from_pointee(ScriptTable::default()),
        }
    }

    /// Replace the snapshot with the store's current timeline.
    pub async fn reload(&self, store: &Store) -> GameResult<usize> {
        let days = store.all_script_days().await?;
        let mut table = ScriptTable::default();
        for day in days {
            table.days.insert(day.day, day);
        }
        let len = table.days.len();
        self.table.store(Arc::new(table));
        Ok(len)
    }

    pub fn len(&self) -> usize {
        self.table.load().days.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn day(&self, day: i64) -> Option<ScriptDay> {
        self.table.load().days.get(&day).cloned()
    }

    pub fn price_for_day(&self, day: i64) -> Option<f64> {
        self.table.load().days.get(&day).map(|d| d.price)
    }

    /// Copy-on-write flip of a day's broadcast flag.
    pub fn mark_broadcasted(&self, day: i64) {
        self.table.rcu(|table| {
            let mut days = table.days.clone();
            if let Some(d) = days.get_mut(&day) {
                d.is_broadcasted = true;
            }
            Arc::new(ScriptTable { days })
        });
    }

    /// History for days `1..=day`. Title/news appear only once the day's
    /// headline has been broadcast.
    pub fn history_up_to(&self, day: i64) -> Vec<HistoryDay> {
        let table = self.table.load();
        table
            .days
            .range(1..=day)
            .map(|(_, d)| HistoryDay {
                day: d.day,
                price: d.price,
                title: d.is_broadcasted.then(|| d.title.clone()).flatten(),
                news: d.is_broadcasted.then(|| d.news.clone()).flatten(),
                effective_trend: d.effective_trend,
            })
            .collect()
    }

    /// Headlines already published, up to and including `day`.
    pub fn visible_news(&self, day: i64) -> Vec<NewsItem> {
        let table = self.table.load();
        table
            .days
            .range(1..=day)
            .filter(|(_, d)| d.is_broadcasted)
            .filter_map(|(_, d)| {
                d.title.as_ref().map(|title| NewsItem {
                    day: d.day,
                    title: title.clone(),
                    content: d.news.clone(),
                })
            })
            .collect()
    }
}

impl Default for ScriptCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(n: i64, price: f64, title: Option<&str>) -> ScriptDay {
        ScriptDay {
            day: n,
            price,
            title: title.map(|t| t.to_string()),
            news: title.map(|_| "details".to_string()),
            effective_trend: Trend::Flat,
            publish_offset: title.map(|_| 10),
            is_broadcasted: false,
        }
    }

    async fn cache_with_days(days: &[ScriptDay]) -> (Store, ScriptCache) {
        let store = Store::open_in_memory().unwrap();
        store.replace_script(days).await.unwrap();
        let cache = ScriptCache::new();
        cache.reload(&store).await.unwrap();
        (store, cache)
    }

    #[tokio::test]
    async fn test_reload_and_lookup() {
        let (_store, cache) = cache_with_days(&[day(1, 100.0, None), day(2, 105.5, None)]).await;
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.price_for_day(2), Some(105.5));
        assert_eq!(cache.price_for_day(3), None);
    }

    #[tokio::test]
    async fn test_history_gates_headlines() {
        let (_store, cache) =
            cache_with_days(&[day(1, 100.0, Some("IPO")), day(2, 101.0, None)]).await;

        // unbroadcast: price visible, headline hidden
        let history = cache.history_up_to(2);
        assert_eq!(history.len(), 2);
        assert!(history[0].title.is_none());
        assert!(cache.visible_news(2).is_empty());

        cache.mark_broadcasted(1);
        let history = cache.history_up_to(2);
        assert_eq!(history[0].title.as_deref(), Some("IPO"));
        let news = cache.visible_news(2);
        assert_eq!(news.len(), 1);
        assert_eq!(news[0].day, 1);
    }

    #[tokio::test]
    async fn test_history_bounded_by_day() {
        let (_store, cache) =
            cache_with_days(&[day(1, 100.0, None), day(2, 101.0, None), day(3, 102.0, None)]).await;
        assert_eq!(cache.history_up_to(2).len(), 2);
    }

    #[tokio::test]
    async fn test_reload_clears_stale_days() {
        let (store, cache) = cache_with_days(&[day(1, 100.0, None), day(2, 101.0, None)]).await;
        store.replace_script(&[day(1, 90.0, None)]).await.unwrap();
        cache.reload(&store).await.unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.price_for_day(1), Some(90.0));
        assert_eq!(cache.price_for_day(2), None);
    }
}
