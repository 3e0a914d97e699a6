//! Periodic power passes.
//!
//! Two recurring jobs drive power over time:
//!
//! 1. **Regeneration** -- every online player gains power, up to max.
//! 2. **Decay** -- every player offline beyond the threshold loses power.
//!    When enabled, any faction whose cumulative power then sits at zero is
//!    disbanded with [`DisbandReason::ZeroPower`].
//!
//! The functions here run one pass each; the timers live in
//! [`crate::runner`].

use chrono::{DateTime, Utc};
use dominion_territory::{MessageSink, NotificationBus};
use dominion_types::{DisbandReason, FactionId};
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::state::DominionState;

/// Which pass produced a [`TickSummary`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickKind {
    /// Online regeneration.
    Regeneration,
    /// Offline decay.
    Decay,
}

/// Result of one scheduled pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickSummary {
    /// The pass that ran.
    pub kind: TickKind,
    /// Players whose power changed.
    pub players_affected: usize,
    /// Absolute power moved.
    pub total_amount: Decimal,
    /// Factions disbanded for reaching zero power.
    pub disbanded: Vec<FactionId>,
}

/// Runs regeneration and decay against a [`DominionState`].
#[derive(Debug, Clone)]
pub struct PowerScheduler {
    disband_zero_power: bool,
}

impl PowerScheduler {
    /// Create a scheduler. `disband_zero_power` enables the post-decay
    /// disband sweep.
    pub const fn new(disband_zero_power: bool) -> Self {
        Self { disband_zero_power }
    }

    /// Whether the post-decay sweep is enabled.
    pub const fn disbands_zero_power(&self) -> bool {
        self.disband_zero_power
    }

    /// One regeneration pass.
    pub fn regeneration_tick(&self, state: &mut DominionState, now: DateTime<Utc>) -> TickSummary {
        let pass = state.ledger_mut().regenerate(now);
        TickSummary {
            kind: TickKind::Regeneration,
            players_affected: pass.players_affected,
            total_amount: pass.total_amount,
            disbanded: Vec::new(),
        }
    }

    /// One decay pass, followed by the zero-power sweep if enabled.
    pub fn decay_tick(
        &self,
        state: &mut DominionState,
        now: DateTime<Utc>,
        bus: &mut dyn NotificationBus,
        sink: &mut dyn MessageSink,
    ) -> TickSummary {
        let pass = state.ledger_mut().decay(now);
        let disbanded = if self.disband_zero_power {
            Self::disband_powerless(state, bus, sink)
        } else {
            Vec::new()
        };
        TickSummary {
            kind: TickKind::Decay,
            players_affected: pass.players_affected,
            total_amount: pass.total_amount,
            disbanded,
        }
    }

    /// Disband every faction whose cumulative power is zero.
    ///
    /// Candidates are collected before any disband runs, so a liege losing
    /// a vassal mid-sweep is judged on the power it had at the start.
    fn disband_powerless(
        state: &mut DominionState,
        bus: &mut dyn NotificationBus,
        sink: &mut dyn MessageSink,
    ) -> Vec<FactionId> {
        let candidates: Vec<FactionId> = state
            .registry()
            .ids()
            .into_iter()
            .filter(|id| {
                state
                    .faction_power(*id)
                    .is_some_and(|power| power.cumulative <= Decimal::ZERO)
            })
            .collect();

        let mut disbanded = Vec::with_capacity(candidates.len());
        for faction in candidates {
            match state.disband(faction, DisbandReason::ZeroPower, bus, sink) {
                Ok(event) => {
                    info!(
                        faction = %faction,
                        name = %event.name,
                        cells_released = event.cells_released,
                        "Faction disbanded at zero power"
                    );
                    disbanded.push(faction);
                }
                Err(e) => warn!(faction = %faction, error = %e, "Zero-power disband failed"),
            }
        }
        disbanded
    }
}
