//! Notification payloads emitted by the engine.
//!
//! Claim and unclaim attempts are delivered wrapped in [`Cancellable`] so a
//! listener can veto the change before it is committed. Disbandment and
//! player-joined notifications are informational.

use serde::{Deserialize, Serialize};

use crate::enums::DisbandReason;
use crate::ids::{FactionId, PlayerId};
use crate::structs::CellKey;

/// A faction is about to take a cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimAttempt {
    /// The faction that would become the holder.
    pub faction: FactionId,
    /// The player performing the claim.
    pub actor: PlayerId,
    /// The cell being claimed.
    pub cell: CellKey,
    /// The current holder when this is a conquest.
    pub previous_holder: Option<FactionId>,
}

/// A faction is about to release a cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnclaimAttempt {
    /// The faction releasing the cell.
    pub faction: FactionId,
    /// The player performing the unclaim.
    pub actor: PlayerId,
    /// The cell being released.
    pub cell: CellKey,
}

/// A faction has been disbanded and all of its land released.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactionDisbanded {
    /// The disbanded faction.
    pub faction: FactionId,
    /// Its display name at the time of disbanding.
    pub name: String,
    /// Why it was disbanded.
    pub reason: DisbandReason,
    /// Number of cells released by the cascade.
    pub cells_released: usize,
}

/// A player was observed for the first time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerJoined {
    /// The new player.
    pub player: PlayerId,
}

/// Wraps a pre-commit notification so listeners can veto it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cancellable<T> {
    event: T,
    cancelled: bool,
}

impl<T> Cancellable<T> {
    /// Wrap an event. It starts out not cancelled.
    pub const fn new(event: T) -> Self {
        Self {
            event,
            cancelled: false,
        }
    }

    /// The wrapped event.
    pub const fn event(&self) -> &T {
        &self.event
    }

    /// Veto the change.
    pub const fn cancel(&mut self) {
        self.cancelled = true;
    }

    /// Whether any listener vetoed the change.
    pub const fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Unwrap the event.
    pub fn into_inner(self) -> T {
        self.event
    }
}
