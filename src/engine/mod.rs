//! Game engine: trading core, day-boundary settlement, lifecycle operations,
//! leaderboard, and the 1 Hz tick loop.

pub mod leaderboard;
pub mod lifecycle;
pub mod settlement;
pub mod tick;
pub mod trading;

pub use leaderboard::Leaderboard;
pub use lifecycle::Lifecycle;
pub use settlement::SettlementPipeline;
pub use tick::spawn_tick_loop;
pub use trading::TradingCore;
