//! Script generator
//! Mission: turn a list of scheduled trend events into a full price series
//! with a decaying trend, bounded noise, and a small bull drift.

use crate::models::{round2, Trend};
use crate::store::{EventRow, ScriptDay};
use rand::Rng;

#[derive(Debug, Clone)]
pub struct GeneratorParams {
    /// Price move a full-strength trend targets per day.
    pub target_daily_change: f64,
    /// Constant additive drift so a flat script still creeps upward.
    pub bull_drift: f64,
    /// Per-day decay applied to the lingering trend ratio.
    pub decay: f64,
}

impl Default for GeneratorParams {
    fn default() -> Self {
        Self {
            target_daily_change: 0.05,
            bull_drift: 0.1,
            decay: 0.9,
        }
    }
}

/// Generate the complete `1..=total_days` series.
///
/// An event landing on day `d` sets the trend that applies from day `d + 1`
/// on (decaying each day); day `d` itself is priced with the pre-event trend
/// and recorded with that trend as its `effective_trend`. The event's
/// headline is attached to day `d` with a random in-day publish offset.
pub fn generate_script<R: Rng>(
    events: &[EventRow],
    total_days: i64,
    initial_price: f64,
    time_ratio: i64,
    params: &GeneratorParams,
    rng: &mut R,
) -> Vec<ScriptDay> {
    let mut price = initial_price;
    let mut trend_ratio = 0.0_f64;
    let mut trend_name = Trend::Flat;
    let mut out = Vec::with_capacity(total_days as usize);

    for day in 1..=total_days {
        let todays_events: Vec<&EventRow> = events.iter().filter(|e| e.day == day).collect();

        // Tomorrow's trend: decay today's, unless an event overrides it.
        let mut next_ratio = trend_ratio * params.decay;
        let mut next_name = trend_name;
        if let Some(ev) = todays_events
            .iter()
            .rev()
            .find(|e| e.trend != Trend::NoEffect)
        {
            next_name = ev.trend;
            next_ratio = ev.trend.strength();
        }

        // Today's price still moves on the pre-event trend.
        let noise = rng.gen_range(-0.4..0.4) * params.target_daily_change;
        price = (price * (1.0 + params.target_daily_change * trend_ratio + noise)
            + params.bull_drift)
            .max(1.0);
        price = round2(price);

        let headline = todays_events.last();
        out.push(ScriptDay {
            day,
            price,
            title: headline.map(|e| e.title.clone()),
            news: headline.and_then(|e| e.news.clone()),
            effective_trend: trend_name,
            publish_offset: headline.map(|_| rng.gen_range(0..time_ratio)),
            is_broadcasted: false,
        });

        trend_ratio = next_ratio;
        trend_name = next_name;
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn event(day: i64, trend: Trend) -> EventRow {
        EventRow {
            id: day,
            day,
            title: format!("Event on day {day}"),
            news: Some("Body".to_string()),
            trend,
        }
    }

    #[test]
    fn test_series_shape() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let days = generate_script(&[], 120, 100.0, 180, &GeneratorParams::default(), &mut rng);
        assert_eq!(days.len(), 120);
        for (i, d) in days.iter().enumerate() {
            assert_eq!(d.day, i as i64 + 1);
            assert!(d.price >= 1.0);
            assert!(!d.is_broadcasted);
            // silent days carry no headline tuple
            assert!(d.title.is_none());
            assert!(d.publish_offset.is_none());
        }
    }

    #[test]
    fn test_deterministic_under_seed() {
        let events = vec![event(5, Trend::StrongUp), event(30, Trend::StrongDown)];
        let a = generate_script(
            &events,
            60,
            100.0,
            180,
            &GeneratorParams::default(),
            &mut ChaCha8Rng::seed_from_u64(42),
        );
        let b = generate_script(
            &events,
            60,
            100.0,
            180,
            &GeneratorParams::default(),
            &mut ChaCha8Rng::seed_from_u64(42),
        );
        assert_eq!(
            a.iter().map(|d| d.price).collect::<Vec<_>>(),
            b.iter().map(|d| d.price).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_event_trend_applies_from_next_day() {
        let events = vec![event(10, Trend::StrongUp)];
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let days = generate_script(&events, 15, 100.0, 180, &GeneratorParams::default(), &mut rng);

        // the event day itself is still priced/tagged with the prior trend
        assert_eq!(days[9].effective_trend, Trend::Flat);
        assert_eq!(days[9].title.as_deref(), Some("Event on day 10"));
        assert!(days[9].publish_offset.is_some());
        // the following day carries the event's trend
        assert_eq!(days[10].effective_trend, Trend::StrongUp);
    }

    #[test]
    fn test_no_effect_event_keeps_trend_but_carries_headline() {
        let events = vec![event(3, Trend::StrongDown), event(6, Trend::NoEffect)];
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let days = generate_script(&events, 10, 100.0, 180, &GeneratorParams::default(), &mut rng);

        // day 6's headline exists, but the decayed StrongDown trend persists
        assert_eq!(days[5].title.as_deref(), Some("Event on day 6"));
        assert_eq!(days[6].effective_trend, Trend::StrongDown);
    }

    #[test]
    fn test_publish_offset_in_day_range() {
        let events: Vec<EventRow> = (1..=50).map(|d| event(d, Trend::Up)).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let days = generate_script(&events, 50, 100.0, 60, &GeneratorParams::default(), &mut rng);
        for d in days {
            let offset = d.publish_offset.unwrap();
            assert!((0..60).contains(&offset));
        }
    }

    #[test]
    fn test_price_floor() {
        let events: Vec<EventRow> = (1..=80).map(|d| event(d, Trend::StrongDown)).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let days = generate_script(&events, 80, 2.0, 180, &GeneratorParams::default(), &mut rng);
        assert!(days.iter().all(|d| d.price >= 1.0));
    }
}
