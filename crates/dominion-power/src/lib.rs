//! Per-player power ledger for the Dominion territory engine.
//!
//! Power is the personal resource that funds a faction's territory: the
//! demesne limit of a faction is derived from the power of its members.
//! Power regenerates while a player is online, decays once a player has been
//! away long enough, and moves on kills and deaths.
//!
//! # Modules
//!
//! - [`config`] -- Power tunables ([`PowerConfig`]) and the injected
//!   max-power policy ([`MaxPowerPolicy`])
//! - [`ledger`] -- The [`PowerLedger`] and its change log
//!
//! # Invariants
//!
//! - Power is never negative.
//! - Power never exceeds the player's max power after a ledger mutation.
//! - Every mutation appends a [`PowerChange`] to the change log.
//!
//! [`PowerChange`]: dominion_types::PowerChange

pub mod config;
pub mod ledger;

pub use config::{FixedMaxPower, LoginScaledMaxPower, MaxPowerPolicy, PowerConfig};
pub use ledger::{DirtyRecords, PassSummary, PowerLedger};

use dominion_types::PlayerId;
use rust_decimal::Decimal;

/// Errors that can occur when mutating power.
#[derive(Debug, thiserror::Error)]
pub enum PowerError {
    /// Amounts passed to increase/decrease must not be negative.
    #[error("power amount must not be negative, got {amount}")]
    NegativeAmount {
        /// The rejected amount.
        amount: Decimal,
    },
}

/// Read access to player power, consumed by faction power aggregation.
pub trait PowerSource {
    /// Current power of `player`. Unknown players report the initial power.
    fn power_of(&self, player: PlayerId) -> Decimal;

    /// Max power of `player` under the configured policy.
    fn max_power_of(&self, player: PlayerId) -> Decimal;
}
