//! Warden Reconciler - keeps the bot's role at the top of every guild
//!
//! Each known guild is checked on a schedule and on demand. A guild whose
//! hierarchy puts another role above the bot is marked non-compliant, given
//! a private setup channel, and has its events suppressed until fixed.

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod reconciler;
pub mod state;

pub use config::ReconcilerConfig;
pub use error::{ReconcileError, ReconcileResult};
pub use reconciler::{assess, RoleReconciler};
pub use state::{Compliance, ReconcilerState, SweepReport};
