//! Scripted price/news timeline: in-memory cache plus the series generator.

pub mod cache;
pub mod generator;

pub use cache::{HistoryDay, NewsItem, ScriptCache};
pub use generator::{generate_script, GeneratorParams};
