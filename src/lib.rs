//! VK community moderation: scrape sessions, comment scoring and the warning-to-ban ledger.
mod app;
pub mod batch;
pub mod config;
pub mod db;
pub mod domains;
pub mod error;
pub mod escalation;
mod metrics;
pub mod models;
pub mod runner;
pub mod session;
pub mod toxicity;
pub mod vk;


pub use app::{APP_USER_AGENT, AppState, Args, run, run_cycle};
