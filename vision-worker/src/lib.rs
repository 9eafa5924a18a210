pub mod aggregator;
pub mod config;
pub mod error;
pub mod handlers;
pub mod lifecycle;
pub mod notify;
pub mod registry;
pub mod strategy;
pub mod worker;

#[cfg(test)]
mod test_utils;
