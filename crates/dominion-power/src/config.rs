//! Configuration for player power and the max-power policy.
//!
//! The [`PowerConfig`] struct bundles the amounts and thresholds applied by
//! the ledger. Scheduling intervals live with the scheduler, not here: the
//! ledger only knows *how much* to change, never *when*.
//!
//! Max power is not owned by the ledger. It is an injected
//! [`MaxPowerPolicy`] so deployments can swap the formula.

use chrono::Duration;
use dominion_types::PlayerPowerRecord;
use rust_decimal::Decimal;

/// Tunables for power regeneration, decay, and combat transfers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PowerConfig {
    /// Power given to a player the first time they are seen (default: 5).
    pub initial_power_level: Decimal,

    /// Power added per regeneration pass while online (default: 2).
    pub power_increase_amount: Decimal,

    /// Power removed per decay pass while offline (default: 1).
    pub power_decrease_amount: Decimal,

    /// Whether offline decay is enabled at all (default: true).
    pub power_decreases: bool,

    /// Minutes a player must be offline before decay applies (default: 1440).
    pub minutes_before_power_decrease: i64,

    /// Power granted to a killer (default: 1).
    pub power_gained_on_kill: Decimal,

    /// Power taken from a player who dies (default: 1).
    pub power_lost_on_death: Decimal,
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            initial_power_level: Decimal::new(5, 0),
            power_increase_amount: Decimal::new(2, 0),
            power_decrease_amount: Decimal::ONE,
            power_decreases: true,
            minutes_before_power_decrease: 1440,
            power_gained_on_kill: Decimal::ONE,
            power_lost_on_death: Decimal::ONE,
        }
    }
}

impl PowerConfig {
    /// The inactivity window after which decay applies. Negative values
    /// count as zero; values past chrono's range saturate to
    /// [`Duration::MAX`], which means decay never applies.
    pub fn decay_threshold(&self) -> Duration {
        Duration::try_minutes(self.minutes_before_power_decrease.max(0)).unwrap_or(Duration::MAX)
    }
}

/// Derives a player's maximum power from their record.
pub trait MaxPowerPolicy: core::fmt::Debug + Send + Sync {
    /// The cap for `record`'s power. Must not be negative.
    fn max_power(&self, record: &PlayerPowerRecord) -> Decimal;
}

/// Every player has the same cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedMaxPower(pub Decimal);

impl MaxPowerPolicy for FixedMaxPower {
    fn max_power(&self, _record: &PlayerPowerRecord) -> Decimal {
        self.0.max(Decimal::ZERO)
    }
}

/// `base + per_login * login_count`, optionally capped.
///
/// Rewards returning players with a growing ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoginScaledMaxPower {
    /// Cap for a player with no recorded logins.
    pub base: Decimal,
    /// Cap increase per login.
    pub per_login: Decimal,
    /// Absolute ceiling, if any.
    pub cap: Option<Decimal>,
}

impl Default for LoginScaledMaxPower {
    fn default() -> Self {
        Self {
            base: Decimal::new(20, 0),
            per_login: Decimal::ZERO,
            cap: None,
        }
    }
}

impl MaxPowerPolicy for LoginScaledMaxPower {
    fn max_power(&self, record: &PlayerPowerRecord) -> Decimal {
        let scaled = self
            .per_login
            .saturating_mul(Decimal::from(record.login_count))
            .saturating_add(self.base);
        let capped = self.cap.map_or(scaled, |cap| scaled.min(cap));
        capped.max(Decimal::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use dominion_types::PlayerId;
    use rust_decimal_macros::dec;

    use super::*;

    fn record_with_logins(logins: u32) -> PlayerPowerRecord {
        let mut record = PlayerPowerRecord::new(PlayerId::new(), dec!(0), Utc::now());
        record.login_count = logins;
        record
    }

    #[test]
    fn default_config_values() {
        let cfg = PowerConfig::default();
        assert_eq!(cfg.initial_power_level, dec!(5));
        assert_eq!(cfg.power_increase_amount, dec!(2));
        assert_eq!(cfg.power_decrease_amount, dec!(1));
        assert!(cfg.power_decreases);
        assert_eq!(cfg.decay_threshold(), Duration::days(1));
    }

    #[test]
    fn negative_threshold_is_zero() {
        let cfg = PowerConfig {
            minutes_before_power_decrease: -5,
            ..PowerConfig::default()
        };
        assert_eq!(cfg.decay_threshold(), Duration::zero());
    }

    #[test]
    fn login_scaled_grows_with_logins() {
        let policy = LoginScaledMaxPower {
            base: dec!(10),
            per_login: dec!(0.5),
            cap: None,
        };
        assert_eq!(policy.max_power(&record_with_logins(0)), dec!(10));
        assert_eq!(policy.max_power(&record_with_logins(4)), dec!(12));
    }

    #[test]
    fn login_scaled_respects_cap() {
        let policy = LoginScaledMaxPower {
            base: dec!(10),
            per_login: dec!(1),
            cap: Some(dec!(15)),
        };
        assert_eq!(policy.max_power(&record_with_logins(100)), dec!(15));
    }

    #[test]
    fn fixed_policy_never_negative() {
        assert_eq!(FixedMaxPower(dec!(-3)).max_power(&record_with_logins(1)), dec!(0));
    }
}
