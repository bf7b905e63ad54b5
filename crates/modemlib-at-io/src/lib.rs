//! AT-command protocol engine and IO task for modemlib.
//!
//! One tokio task owns the transport exclusively and handles command
//! dispatch, response framing, split-command prompts, per-command
//! timeouts, unsolicited notification demultiplexing, and graceful
//! shutdown.
//!
//! # Architecture
//!
//! - [`protocol`] -- wire constants and device error classification
//! - [`descriptor`] -- per-device pattern tables
//! - [`command`] -- commands and their responses
//! - [`demux`] -- unsolicited notification classification
//! - [`engine`] -- sans-IO Idle/Waiting state machine
//! - [`io`] -- IO task, command queue, and notification subscriptions

pub mod command;
pub mod demux;
pub mod descriptor;
pub mod engine;
pub mod io;
pub mod protocol;

pub use command::{Captured, Command, Response};
pub use demux::{Claims, Demultiplexer};
pub use descriptor::{Builtin, CommandPatterns, CommandSpec, DescriptorBuilder, DeviceDescriptor};
pub use engine::{Engine, EngineOutput};
pub use io::{IoConfig, ModemIo, NotificationStream, spawn_io_task};
