//! Data models

pub mod attempt;
pub mod project;
pub mod snapshot;
pub mod webhook;
