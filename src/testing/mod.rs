//! Testing utilities
//!
//! An in-memory scripted connector for deterministic worker tests, and a
//! Unix-socket emulator that behaves like the real sensor.

pub mod emulator;
pub mod mocks;

pub use emulator::{sample_reading, EmulatorMode, SensorEmulator};
pub use mocks::{ConnectionEvent, ScriptedConnection, ScriptedConnector, Step};
