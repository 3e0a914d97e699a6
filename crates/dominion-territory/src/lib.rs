//! Territory ownership for the Dominion engine.
//!
//! The [`TerritoryGrid`] is the authoritative map from cell to holder
//! faction. The [`ClaimCoordinator`] is the only component that changes it
//! during play: it runs the claim, unclaim, and conquest state machine,
//! consults faction power through the vassalage aggregator, and fires
//! vetoable notifications before every commit.
//!
//! # Modules
//!
//! - [`grid`] -- [`TerritoryGrid`] with its reverse index by faction
//! - [`coordinator`] -- [`ClaimCoordinator`], [`ClaimConfig`], outcomes
//! - [`notify`] -- [`NotificationBus`] and [`MessageSink`] seams
//! - [`error`] -- [`ClaimError`]
//!
//! # Cell state machine
//!
//! ```text
//! Unclaimed --claim--> Claimed(F)
//! Claimed(F) --unclaim / disband--> Unclaimed
//! Claimed(F) --conquest by enemy G, F over-extended--> Claimed(G)
//! ```

pub mod coordinator;
pub mod error;
pub mod grid;
pub mod notify;

pub use coordinator::{BatchReport, ClaimConfig, ClaimContext, ClaimCoordinator, ClaimOutcome, UnclaimOutcome};
pub use error::{ClaimError, ErrorKind};
pub use grid::{CellChanges, TerritoryGrid};
pub use notify::{Message, MessageSink, NotificationBus, NullBus, NullSink};
