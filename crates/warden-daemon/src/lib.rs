//! Warden daemon library
//!
//! This module provides the runtime around the moderation pipeline:
//! - Event gate in front of rule evaluation
//! - Dispatcher routing events through cache, engine and executor
//! - Scheduler for reconciliation sweeps and cooldown upkeep
//! - Server assembly and lifecycle management

#![deny(unsafe_code)]

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod gate;
pub mod scheduler;
pub mod server;

pub use config::WardenConfig;
pub use dispatcher::{render_greeting, Disposition, EventDispatcher};
pub use error::{DaemonError, DaemonResult};
pub use gate::{EventGate, GateDecision, SuppressReason};
pub use scheduler::{Scheduler, SchedulerConfig};
pub use server::Server;
