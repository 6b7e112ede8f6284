//! Tick loop
//! Mission: fire once per real second; publish the clock state, release due
//! headlines, and trigger the settlement pipeline on day transitions.

use crate::clock::{derive_state, now_ts};
use crate::engine::settlement::SettlementPipeline;
use crate::script::ScriptCache;
use crate::store::Store;
use crate::ws::events::{GameStateUpdate, NewsUpdate, ServerEvent};
use crate::ws::Bus;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub struct TickContext {
    pub store: Store,
    pub cache: Arc<ScriptCache>,
    pub bus: Bus,
    pub settlement: Arc<SettlementPipeline>,
}

/// Spawn the 1 Hz scheduler. Unexpected errors are logged and the loop
/// proceeds to the next tick.
pub fn spawn_tick_loop(ctx: TickContext) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        // Per-loop day tracker; re-initialised whenever the game starts.
        let mut prev_day: i64 = -1;
        let mut was_started = false;

        loop {
            ticker.tick().await;
            if let Err(e) = tick_once(&ctx, &mut prev_day, &mut was_started).await {
                warn!(error = %e, "tick failed, continuing");
            }
        }
    })
}

async fn tick_once(
    ctx: &TickContext,
    prev_day: &mut i64,
    was_started: &mut bool,
) -> crate::errors::GameResult<()> {
    let status = ctx.store.get_status().await?;
    let state = derive_state(&status, now_ts());

    ctx.bus
        .global_emit(ServerEvent::GameStateUpdate(GameStateUpdate::from(&state)));

    // Scheduled news publication for the current day.
    if state.is_started && state.current_day > 0 {
        if let Some(day) = ctx.cache.day(state.current_day) {
            let due = day
                .publish_offset
                .map(|offset| state.second_in_day >= offset)
                .unwrap_or(false);
            if let (Some(title), true, false) = (day.title.clone(), due, day.is_broadcasted) {
                // Store first so publication stays at-most-once even if the
                // process dies between the two writes.
                if ctx.store.mark_day_broadcasted(day.day).await? {
                    ctx.cache.mark_broadcasted(day.day);
                    info!(day = day.day, "📰 headline published");
                    ctx.bus.global_emit(ServerEvent::NewsUpdate(NewsUpdate {
                        day: day.day,
                        title,
                        content: day.news.clone(),
                    }));
                }
            }
        }
    }

    // Day transition detection; the tracker resets whenever the game flips
    // from stopped to started so a fresh run re-settles from its first day.
    if state.is_started && !*was_started {
        *prev_day = -1;
    }
    *was_started = state.is_started;

    if state.is_started && state.current_day > *prev_day {
        ctx.settlement.run_day_boundary(&state).await?;
        *prev_day = state.current_day;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::leaderboard::Leaderboard;
    use crate::models::Trend;
    use crate::store::ScriptDay;

    async fn setup() -> (TickContext, Bus) {
        let store = Store::open_in_memory().unwrap();
        let cache = Arc::new(ScriptCache::new());
        let bus = Bus::new(1024);
        let leaderboard = Leaderboard::new(store.clone(), cache.clone());
        let settlement = Arc::new(SettlementPipeline::new(
            store.clone(),
            cache.clone(),
            bus.clone(),
            leaderboard,
        ));
        (
            TickContext {
                store,
                cache,
                bus: bus.clone(),
                settlement,
            },
            bus,
        )
    }

    fn newsy_day(day: i64, offset: i64) -> ScriptDay {
        ScriptDay {
            day,
            price: 100.0,
            title: Some("Breaking".to_string()),
            news: Some("Details".to_string()),
            effective_trend: Trend::Flat,
            publish_offset: Some(offset),
            is_broadcasted: false,
        }
    }

    #[tokio::test]
    async fn test_tick_emits_game_state() {
        let (ctx, bus) = setup().await;
        let mut rx = bus.subscribe();
        let mut prev = -1;
        let mut started = false;
        tick_once(&ctx, &mut prev, &mut started).await.unwrap();
        let envelope = rx.recv().await.unwrap();
        match envelope.event {
            ServerEvent::GameStateUpdate(update) => {
                assert!(!update.is_game_started);
                assert_eq!(update.current_day, 0);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_news_published_once_when_due() {
        let (ctx, bus) = setup().await;
        ctx.store.replace_script(&[newsy_day(1, 0)]).await.unwrap();
        ctx.cache.reload(&ctx.store).await.unwrap();
        ctx.store.start_game(now_ts()).await.unwrap();

        let mut rx = bus.subscribe();
        let mut prev = -1;
        let mut started = false;
        tick_once(&ctx, &mut prev, &mut started).await.unwrap();
        tick_once(&ctx, &mut prev, &mut started).await.unwrap();

        let mut news_count = 0;
        while let Ok(envelope) = rx.try_recv() {
            if matches!(envelope.event, ServerEvent::NewsUpdate(_)) {
                news_count += 1;
            }
        }
        assert_eq!(news_count, 1);
        assert!(ctx.store.all_script_days().await.unwrap()[0].is_broadcasted);
    }

    #[tokio::test]
    async fn test_day_transition_triggers_settlement() {
        let (ctx, bus) = setup().await;
        ctx.store
            .replace_script(&[
                ScriptDay {
                    day: 1,
                    price: 10.0,
                    title: None,
                    news: None,
                    effective_trend: Trend::Flat,
                    publish_offset: None,
                    is_broadcasted: false,
                },
            ])
            .await
            .unwrap();
        ctx.cache.reload(&ctx.store).await.unwrap();
        ctx.store.start_game(now_ts()).await.unwrap();

        let mut rx = bus.subscribe();
        let mut prev = -1;
        let mut started = false;
        tick_once(&ctx, &mut prev, &mut started).await.unwrap();
        assert_eq!(prev, 1);

        let mut saw_price = false;
        while let Ok(envelope) = rx.try_recv() {
            if let ServerEvent::PriceUpdate(update) = envelope.event {
                assert_eq!(update.day, 1);
                assert_eq!(update.price, 10.0);
                saw_price = true;
            }
        }
        assert!(saw_price);

        // no further transition on the same day
        tick_once(&ctx, &mut prev, &mut started).await.unwrap();
        let mut price_updates = 0;
        while let Ok(envelope) = rx.try_recv() {
            if matches!(envelope.event, ServerEvent::PriceUpdate(_)) {
                price_updates += 1;
            }
        }
        assert_eq!(price_updates, 0);
    }
}
