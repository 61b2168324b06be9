#![deny(missing_docs)]

//! This crate shares a single serial sensor stream with any number of websocket clients.
//!
//! The device prints lines. Lines starting with a marker (by default `HR:`) are samples:
//!
//! ```text
//! HR:hr:72,spo2:98
//! ```
//!
//! Each sample is pushed to every connected client as a JSON object:
//!
//! ```text
//! {"hr":72,"spo2":98}
//! ```
//!
//! Other lines are ignored. Clients only listen; what they miss while
//! disconnected is not replayed.

/// Parsing device lines into samples.
pub mod sample;

/// Reading lines from the serial device.
pub mod serial;

/// The set of connected clients.
pub mod registry;

/// Sending a sample to every connected client.
pub mod broadcast;

/// The read, parse and broadcast loop.
pub mod bridge;

/// Code relating to setting up the server which accepts clients and runs the read loop.
pub mod server;

/// Handles incoming websockets.
pub(crate) mod websocket;

/// Counters for what the bridge has been doing.
pub mod stats;

/// A client for observing a bridge.
pub mod client;

/// Mocked line sources.
pub mod mock;

/// The command line interface.
pub mod cli;

/// Relates to config files.
pub mod config;

/// Possible errors in this library.
pub mod error;

/// Logging/tracing setup.
pub mod logging;
