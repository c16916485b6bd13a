pub mod chat_completions;
pub mod health;
pub mod metrics;
pub mod models;
pub mod responses;
