//! Core library for the hp_counter application.
//!
//! This library reads the ASCII measurement lines an HP/Agilent 5313x counter
//! prints over RS-232, turns them into typed [`measurement::MeasurementRecord`]s
//! and drives the polling loop in [`instrument::HpCounter`]. The serial
//! transport sits behind the [`adapters::LineTransport`] trait so the
//! controller can be exercised against the scripted [`adapters::MockAdapter`].

pub mod adapters;
pub mod config;
pub mod error;
pub mod instrument;
pub mod measurement;
