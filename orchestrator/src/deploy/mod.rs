//! Deployment module

pub mod audit;
pub mod fsm;
pub mod health;
pub mod orchestrator;
pub mod retention;
pub mod rollback;
pub mod swap;
