pub mod analytics;
pub mod cache;
pub mod event;
pub mod health;
pub mod metrics;
pub mod queue;
pub mod redis;
pub mod result;
