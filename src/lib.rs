//! Statistical decision-support engine for tick-driven betting agents.
//!
//! Turns a stream of tick observations into a win-probability estimate, a
//! risk-adjusted stake and a performance record. Everything runs in-process
//! and synchronously; build one [`engine::TradingEngine`] per session.

pub mod config;
pub mod db;
pub mod engine;
pub mod error;

pub use error::{EngineError, EngineResult};
