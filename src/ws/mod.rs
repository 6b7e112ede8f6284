//! Realtime surface: typed wire events, the targeted broadcast bus, and the
//! per-session WebSocket handler.

pub mod bus;
pub mod events;
pub mod session;

pub use bus::{Bus, Envelope, Target};
pub use events::{
    AssetsUpdate, ClientEvent, ContractSettled, FullSyncState, GameStateUpdate, LeaderboardEntry,
    NewsUpdate, PriceUpdate, ServerEvent, TradeSuccess,
};
