//! Shared type definitions for the Dominion territory engine.
//!
//! This crate is the single source of truth for the data model shared by
//! every other crate in the workspace: identifiers, relation kinds, the
//! faction record, claimed cells, per-player power records, and the payloads
//! carried by the notification bus.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe UUID wrappers for players, factions, and gates
//! - [`enums`] -- Relation kinds, cardinal directions, flag values
//! - [`structs`] -- Cell keys, block positions, factions, power records
//! - [`events`] -- Notification payloads and the [`Cancellable`] wrapper

pub mod enums;
pub mod events;
pub mod ids;
pub mod structs;

// Re-export all public types at crate root for convenience.
pub use enums::{Direction, DisbandReason, FlagValue, PowerChangeReason, RelationType};
pub use events::{Cancellable, ClaimAttempt, FactionDisbanded, PlayerJoined, UnclaimAttempt};
pub use ids::{FactionId, GateId, PlayerId};
pub use structs::{
    BlockPos, CELL_SHIFT, CellKey, ClaimedCell, Faction, Gate, LockedBlock, PlayerPowerRecord,
    PowerChange,
};
