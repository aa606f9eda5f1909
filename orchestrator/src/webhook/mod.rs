//! Inbound webhook handling

pub mod dispatcher;
pub mod signature;
