//! Scene automation engine for habitat environmental control
//!
//! Evaluates threshold rules against the latest sensor readings of each
//! zone, resolves conflicts by priority, and reconciles power-strip outlets
//! with the resulting desired state. Time-bounded automation sessions, a
//! global kill switch and a periodic scheduler sit on top.

pub mod config;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod events;
pub mod kill_switch;
pub mod model;
pub mod reconciler;
pub mod resolver;
pub mod scheduler;
pub mod session;

pub use config::EngineConfig;
pub use engine::SceneEngine;
pub use error::EngineError;
pub use events::EngineEvent;
pub use model::*;
pub use scheduler::Scheduler;
