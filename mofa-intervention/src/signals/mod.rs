//! Emotion signal ingestion and aggregation

pub mod classifier;
pub mod history;

pub use classifier::{compute, AggregateSignals, ConversationPace, EngagementLevel};
pub use history::SignalHistory;
