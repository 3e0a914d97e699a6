//! Outbound seams: vetoable notifications and player-facing messages.
//!
//! Both traits are implemented outside the core. Every method has a no-op
//! default so an implementation only overrides what it listens to.

use dominion_types::{
    Cancellable, CellKey, ClaimAttempt, FactionDisbanded, FactionId, PlayerId, PlayerJoined,
    UnclaimAttempt,
};

/// Receives engine notifications. Claim and unclaim attempts are delivered
/// before the change is committed; calling `cancel` vetoes it.
pub trait NotificationBus {
    /// A cell is about to be claimed or conquered.
    fn claim_attempt(&mut self, _attempt: &mut Cancellable<ClaimAttempt>) {}

    /// A cell is about to be released.
    fn unclaim_attempt(&mut self, _attempt: &mut Cancellable<UnclaimAttempt>) {}

    /// A faction was disbanded.
    fn faction_disbanded(&mut self, _event: &FactionDisbanded) {}

    /// A player was seen for the first time.
    fn player_joined(&mut self, _event: &PlayerJoined) {}
}

/// A player-facing message. Rendering is up to the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// The player's faction claimed a cell.
    LandClaimed {
        /// The cell.
        cell: CellKey,
    },
    /// The player's faction released a cell.
    LandUnclaimed {
        /// The cell.
        cell: CellKey,
    },
    /// The faction lost a cell to conquest.
    LandConquered {
        /// The cell.
        cell: CellKey,
        /// The conquering faction.
        by: FactionId,
    },
    /// The faction home was cleared because its cell was unclaimed.
    HomeUnset {
        /// The cell that held the home.
        cell: CellKey,
    },
    /// Summary of a radius operation.
    BatchComplete {
        /// Cells that changed.
        changed: usize,
        /// Cells examined.
        attempted: usize,
    },
    /// The faction was disbanded.
    Disbanded {
        /// The faction's name.
        name: String,
    },
}

/// Delivers [`Message`]s to players and factions.
pub trait MessageSink {
    /// Send to a single player.
    fn notify_player(&mut self, _player: PlayerId, _message: &Message) {}

    /// Send to every member of a faction.
    fn notify_faction(&mut self, _faction: FactionId, _message: &Message) {}
}

/// A bus that ignores everything and never vetoes.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullBus;

impl NotificationBus for NullBus {}

/// A sink that drops every message.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl MessageSink for NullSink {}
