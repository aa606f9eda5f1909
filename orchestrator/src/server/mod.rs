//! HTTP surface: inbound webhooks and operator endpoints

pub mod error;
pub mod handlers;
pub mod serve;
pub mod state;
