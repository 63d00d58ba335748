//! JS8Chess: a UCI chess engine that plays its moves over JS8Call radio.
//!
//! The binary wires a [`js8_bridge::RadioLink`] to the [`engine::Engine`]
//! controller; the library split exists so the integration tests can drive
//! the controller against fake transports.

pub mod config;
pub mod engine;
pub mod game;
