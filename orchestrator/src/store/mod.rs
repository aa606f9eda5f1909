//! Persistent stores

pub mod projects;
