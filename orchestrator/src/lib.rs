//! Dockyard Library
//!
//! Deployment orchestration core: webhook-triggered builds, blue/green swaps
//! behind a health gate, bounded version retention and rollback.

pub mod alert;
pub mod app;
pub mod build;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod logs;
pub mod models;
pub mod proxy;
pub mod runtime;
pub mod server;
pub mod storage;
pub mod store;
pub mod utils;
pub mod webhook;
