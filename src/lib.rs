//! tg-relay — realtime Telegram channel relay.

pub mod accounts;
pub mod channel;
pub mod config;
pub mod delivery;
pub mod error;
pub mod filter;
pub mod ingest;
pub mod message;
pub mod platform;
pub mod service;
pub mod store;
pub mod supervisor;
