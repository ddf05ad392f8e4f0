//! Core module containing the monitor engine
//!
//! This module provides:
//! - Transport layer (serial port, in-memory loopback)
//! - Line reader that frames and decodes inbound bytes
//! - Rule table of patterns and conditions, and the pure matcher over it
//! - Command dispatcher and script playback
//! - Session record, line history and the engine that ties them together

pub mod dispatcher;
pub mod engine;
pub mod history;
pub mod matcher;
pub mod reader;
pub mod rules;
pub mod script;
pub mod session;
pub mod transport;
