//! Tuya cloud device control
//!
//! This crate provides the device control layer used by the scene engine:
//! a [`DeviceControl`] trait, a signed client for the Tuya OpenAPI and a
//! deterministic simulation for environments without credentials.

pub mod cloud;
pub mod error;
pub mod provider;
pub mod sign;
pub mod simulated;

pub use cloud::{Region, TuyaCloud, TuyaCredentials};
pub use error::ControlError;
pub use provider::{countdown_code, DeviceControl, DeviceStatus, MAX_COUNTDOWN_SECONDS};
pub use simulated::{SimulatedCommand, SimulatedDevices};
