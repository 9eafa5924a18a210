mod analytics;
mod app;
mod events;
mod subscribe;

pub use app::{app, AppState};
