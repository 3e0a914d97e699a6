//! Notification hooks for the standalone engine.
//!
//! With no host server attached there is nobody to veto a claim or to read
//! a chat message, so both seams write to the log instead.

use dominion_territory::{Message, MessageSink, NotificationBus};
use dominion_types::{FactionDisbanded, FactionId, PlayerId, PlayerJoined};
use tracing::{debug, info};

/// Logs lifecycle events. Never vetoes.
#[derive(Debug, Default)]
pub struct LoggingBus;

impl NotificationBus for LoggingBus {
    fn faction_disbanded(&mut self, event: &FactionDisbanded) {
        info!(
            faction = %event.faction,
            name = %event.name,
            reason = ?event.reason,
            cells_released = event.cells_released,
            "Faction disbanded"
        );
    }

    fn player_joined(&mut self, event: &PlayerJoined) {
        info!(player = %event.player, "New player");
    }
}

/// Logs every message instead of delivering it.
#[derive(Debug, Default)]
pub struct LoggingSink;

impl MessageSink for LoggingSink {
    fn notify_player(&mut self, player: PlayerId, message: &Message) {
        debug!(player = %player, message = ?message, "Player message");
    }

    fn notify_faction(&mut self, faction: FactionId, message: &Message) {
        debug!(faction = %faction, message = ?message, "Faction message");
    }
}
