//! WebSub hub engine
//!
//! Mediates content distribution between publishers and subscribers: topics
//! announced by publishers are fetched, hashed and stored, subscriber
//! intents are verified with a challenge round-trip, and changed content is
//! fanned out to every active subscription, with durable per-row retry
//! state for everything that can fail remotely.

pub mod config;
pub mod discovery;
mod error;
pub mod http_client;
pub mod hub;

pub use config::HubConfig;
pub use error::Error;
pub use hub::scheduler::Scheduler;
pub use hub::Hub;
