//! Configuration, engine state, and the serial runner for the Dominion
//! territory engine.
//!
//! This crate ties the power ledger, the faction registry, and the
//! territory grid into one [`DominionState`] and drives it from a single
//! task.
//!
//! # Modules
//!
//! - [`config`] -- Loading `dominion-config.yaml` into [`DominionConfig`].
//! - [`state`] -- [`DominionState`], every operation, and the sync into a
//!   [`Repository`].
//! - [`scheduler`] -- Regeneration and decay passes, plus the zero-power
//!   disband sweep.
//! - [`runner`] -- The command loop and its [`RunnerHandle`].
//!
//! [`Repository`]: dominion_db::Repository

pub mod config;
pub mod runner;
pub mod scheduler;
pub mod state;

pub use config::{ConfigError, DominionConfig};
pub use runner::{Command, Periods, Runner, RunnerError, RunnerHandle, RunnerTask};
pub use scheduler::{PowerScheduler, TickKind, TickSummary};
pub use state::{Diplomacy, DominionState, FactionPower, SyncSummary};
