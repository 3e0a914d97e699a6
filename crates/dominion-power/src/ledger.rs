//! The power ledger: every player's power value and its change log.
//!
//! The [`PowerLedger`] is the in-memory source of truth for player power.
//! It knows which players are online (regeneration only applies to them),
//! when each player was last seen (decay only applies to players away for
//! longer than the configured threshold), and which records changed since
//! the last persistence flush.
//!
//! # Design
//!
//! - **Clamped**: every write lands in `[0, max_power(player)]`.
//! - **Lazy**: unknown players are created on first mutation with the
//!   configured initial power; reads of unknown players report that value
//!   without creating a record.
//! - **Logged**: every effective change appends a [`PowerChange`].

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use dominion_types::{PlayerId, PlayerPowerRecord, PowerChange, PowerChangeReason};
use rust_decimal::Decimal;
use tracing::debug;

use crate::config::{LoginScaledMaxPower, MaxPowerPolicy, PowerConfig};
use crate::{PowerError, PowerSource};

/// Outcome of a batch regeneration or decay pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassSummary {
    /// Players whose power actually changed.
    pub players_affected: usize,
    /// Sum of absolute power moved.
    pub total_amount: Decimal,
}

/// Records that need to be written to the repository.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirtyRecords {
    /// Records created since the last drain.
    pub created: Vec<PlayerPowerRecord>,
    /// Pre-existing records modified since the last drain.
    pub updated: Vec<PlayerPowerRecord>,
}

impl DirtyRecords {
    /// Whether there is nothing to write.
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty()
    }
}

/// Per-player power values with regeneration and decay rules.
#[derive(Debug)]
pub struct PowerLedger {
    /// All known players.
    records: BTreeMap<PlayerId, PlayerPowerRecord>,
    /// Players currently online.
    online: BTreeSet<PlayerId>,
    /// Amounts and thresholds.
    config: PowerConfig,
    /// Injected max-power formula.
    max_power: Box<dyn MaxPowerPolicy>,
    /// Append-only log of effective changes since the last drain.
    changes: Vec<PowerChange>,
    /// Players created since the last drain.
    created: BTreeSet<PlayerId>,
    /// Players modified since the last drain.
    dirty: BTreeSet<PlayerId>,
}

impl PowerLedger {
    /// Create an empty ledger with the given policy.
    pub fn new(config: PowerConfig, max_power: Box<dyn MaxPowerPolicy>) -> Self {
        Self {
            records: BTreeMap::new(),
            online: BTreeSet::new(),
            config,
            max_power,
            changes: Vec::new(),
            created: BTreeSet::new(),
            dirty: BTreeSet::new(),
        }
    }

    /// Create an empty ledger using [`LoginScaledMaxPower::default`].
    pub fn with_default_policy(config: PowerConfig) -> Self {
        Self::new(config, Box::new(LoginScaledMaxPower::default()))
    }

    /// Replace all records with previously persisted ones.
    ///
    /// Loaded records are not marked dirty. Everyone starts offline.
    pub fn load(&mut self, records: impl IntoIterator<Item = PlayerPowerRecord>) {
        self.records = records
            .into_iter()
            .map(|record| (record.player_id, record))
            .collect();
        self.online.clear();
        self.changes.clear();
        self.created.clear();
        self.dirty.clear();
    }

    /// The active configuration.
    pub const fn config(&self) -> &PowerConfig {
        &self.config
    }

    /// Number of known players.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no player has been seen yet.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Look up a player's record.
    pub fn get(&self, player: PlayerId) -> Option<&PlayerPowerRecord> {
        self.records.get(&player)
    }

    /// Iterate over all records.
    pub fn records(&self) -> impl Iterator<Item = &PlayerPowerRecord> {
        self.records.values()
    }

    /// Whether `player` is currently online.
    pub fn is_online(&self, player: PlayerId) -> bool {
        self.online.contains(&player)
    }

    /// Current power of `player`, or the initial power if unknown.
    pub fn get_power(&self, player: PlayerId) -> Decimal {
        self.records
            .get(&player)
            .map_or(self.config.initial_power_level, |r| r.power)
    }

    /// Max power of `player` under the injected policy.
    pub fn max_power(&self, player: PlayerId) -> Decimal {
        self.records.get(&player).map_or_else(
            || {
                let blank =
                    PlayerPowerRecord::new(player, self.config.initial_power_level, DateTime::UNIX_EPOCH);
                self.max_power.max_power(&blank)
            },
            |record| self.max_power.max_power(record),
        )
    }

    // -------------------------------------------------------------------
    // Presence
    // -------------------------------------------------------------------

    /// Record a login. Returns `true` if this is the first time the player
    /// has been seen.
    pub fn record_login(&mut self, player: PlayerId, now: DateTime<Utc>) -> bool {
        let is_new = !self.records.contains_key(&player);
        let record = self.entry(player, now);
        record.login_count = record.login_count.saturating_add(1);
        record.last_seen = now;
        self.online.insert(player);
        self.dirty.insert(player);
        if is_new {
            debug!(player = %player, "First login, power record created");
        }
        is_new
    }

    /// Record a logout. The logout time starts the decay countdown.
    pub fn record_logout(&mut self, player: PlayerId, now: DateTime<Utc>) {
        self.online.remove(&player);
        if let Some(record) = self.records.get_mut(&player) {
            record.last_seen = now;
            self.dirty.insert(player);
        }
    }

    // -------------------------------------------------------------------
    // Mutations
    // -------------------------------------------------------------------

    /// Set power directly, clamped to `[0, max_power]`. Returns the stored
    /// value.
    pub fn set_power(&mut self, player: PlayerId, value: Decimal, now: DateTime<Utc>) -> Decimal {
        self.entry(player, now);
        let clamped = value.max(Decimal::ZERO).min(self.max_power(player));
        self.write(player, clamped, PowerChangeReason::Admin, now);
        clamped
    }

    /// Add `amount` if the player is online and below max. Returns the
    /// amount actually added.
    ///
    /// # Errors
    ///
    /// Returns [`PowerError::NegativeAmount`] if `amount` is negative.
    pub fn increase_power(
        &mut self,
        player: PlayerId,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Decimal, PowerError> {
        ensure_non_negative(amount)?;
        if !self.is_online(player) {
            return Ok(Decimal::ZERO);
        }
        Ok(self.raise(player, amount, PowerChangeReason::Regeneration, now))
    }

    /// Remove `amount` if the player has been offline longer than the decay
    /// threshold. Returns the amount actually removed.
    ///
    /// # Errors
    ///
    /// Returns [`PowerError::NegativeAmount`] if `amount` is negative.
    pub fn decrease_power(
        &mut self,
        player: PlayerId,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Decimal, PowerError> {
        ensure_non_negative(amount)?;
        if !self.is_inactive(player, now) {
            return Ok(Decimal::ZERO);
        }
        Ok(self.lower(player, amount, PowerChangeReason::Decay, now))
    }

    /// Grant the configured kill reward. Returns the amount gained.
    pub fn grant_power_on_kill(&mut self, killer: PlayerId, now: DateTime<Utc>) -> Decimal {
        let amount = self.config.power_gained_on_kill.max(Decimal::ZERO);
        self.raise(killer, amount, PowerChangeReason::Kill, now)
    }

    /// Take the configured death penalty. Returns the amount lost.
    pub fn revoke_power_on_death(&mut self, victim: PlayerId, now: DateTime<Utc>) -> Decimal {
        let amount = self.config.power_lost_on_death.max(Decimal::ZERO);
        self.lower(victim, amount, PowerChangeReason::Death, now)
    }

    // -------------------------------------------------------------------
    // Scheduled passes
    // -------------------------------------------------------------------

    /// Apply one regeneration step to every online player below max.
    pub fn regenerate(&mut self, now: DateTime<Utc>) -> PassSummary {
        let amount = self.config.power_increase_amount.max(Decimal::ZERO);
        let online: Vec<PlayerId> = self.online.iter().copied().collect();
        let mut summary = PassSummary::default();
        for player in online {
            let added = self.raise(player, amount, PowerChangeReason::Regeneration, now);
            summary.record(added);
        }
        debug!(
            players = summary.players_affected,
            total = %summary.total_amount,
            "Power regeneration pass"
        );
        summary
    }

    /// Apply one decay step to every player offline beyond the threshold.
    ///
    /// Does nothing when decay is disabled.
    pub fn decay(&mut self, now: DateTime<Utc>) -> PassSummary {
        let mut summary = PassSummary::default();
        if !self.config.power_decreases {
            return summary;
        }
        let amount = self.config.power_decrease_amount.max(Decimal::ZERO);
        let inactive: Vec<PlayerId> = self
            .records
            .keys()
            .copied()
            .filter(|player| self.is_inactive(*player, now))
            .collect();
        for player in inactive {
            let removed = self.lower(player, amount, PowerChangeReason::Decay, now);
            summary.record(removed);
        }
        debug!(
            players = summary.players_affected,
            total = %summary.total_amount,
            "Power decay pass"
        );
        summary
    }

    // -------------------------------------------------------------------
    // Persistence support
    // -------------------------------------------------------------------

    /// Take the change log accumulated since the last call.
    pub fn drain_changes(&mut self) -> Vec<PowerChange> {
        std::mem::take(&mut self.changes)
    }

    /// Take the set of records that need writing since the last call.
    pub fn drain_dirty(&mut self) -> DirtyRecords {
        let created = std::mem::take(&mut self.created);
        let dirty = std::mem::take(&mut self.dirty);
        let mut out = DirtyRecords::default();
        for player in &created {
            if let Some(record) = self.records.get(player) {
                out.created.push(record.clone());
            }
        }
        for player in dirty.difference(&created) {
            if let Some(record) = self.records.get(player) {
                out.updated.push(record.clone());
            }
        }
        out
    }

    // -------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------

    /// Get or lazily create the record for `player`.
    fn entry(&mut self, player: PlayerId, now: DateTime<Utc>) -> &mut PlayerPowerRecord {
        let initial = self.config.initial_power_level;
        let created = &mut self.created;
        self.records.entry(player).or_insert_with(|| {
            created.insert(player);
            PlayerPowerRecord::new(player, initial, now)
        })
    }

    /// Whether the player is offline and was last seen before the threshold.
    fn is_inactive(&self, player: PlayerId, now: DateTime<Utc>) -> bool {
        if self.is_online(player) {
            return false;
        }
        self.records
            .get(&player)
            .is_some_and(|r| now.signed_duration_since(r.last_seen) >= self.config.decay_threshold())
    }

    fn raise(
        &mut self,
        player: PlayerId,
        amount: Decimal,
        reason: PowerChangeReason,
        now: DateTime<Utc>,
    ) -> Decimal {
        let before = self.entry(player, now).power;
        let max = self.max_power(player);
        if before >= max {
            return Decimal::ZERO;
        }
        let after = before.saturating_add(amount).min(max);
        self.write(player, after, reason, now);
        after.saturating_sub(before)
    }

    fn lower(
        &mut self,
        player: PlayerId,
        amount: Decimal,
        reason: PowerChangeReason,
        now: DateTime<Utc>,
    ) -> Decimal {
        let before = self.entry(player, now).power;
        let after = before.saturating_sub(amount).max(Decimal::ZERO);
        self.write(player, after, reason, now);
        before.saturating_sub(after)
    }

    /// Store `after` and log the change if the value moved.
    fn write(&mut self, player: PlayerId, after: Decimal, reason: PowerChangeReason, now: DateTime<Utc>) {
        let Some(record) = self.records.get_mut(&player) else {
            return;
        };
        let before = record.power;
        if before == after {
            return;
        }
        record.power = after;
        self.dirty.insert(player);
        self.changes.push(PowerChange {
            player_id: player,
            before,
            after,
            reason,
            at: now,
        });
    }
}

impl PassSummary {
    fn record(&mut self, amount: Decimal) {
        if amount > Decimal::ZERO {
            self.players_affected = self.players_affected.saturating_add(1);
            self.total_amount = self.total_amount.saturating_add(amount);
        }
    }
}

impl PowerSource for PowerLedger {
    fn power_of(&self, player: PlayerId) -> Decimal {
        self.get_power(player)
    }

    fn max_power_of(&self, player: PlayerId) -> Decimal {
        self.max_power(player)
    }
}

fn ensure_non_negative(amount: Decimal) -> Result<(), PowerError> {
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(PowerError::NegativeAmount { amount });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::config::FixedMaxPower;

    fn ledger() -> PowerLedger {
        PowerLedger::new(PowerConfig::default(), Box::new(FixedMaxPower(dec!(20))))
    }

    // -----------------------------------------------------------------------
    // Lazy creation
    // -----------------------------------------------------------------------

    #[test]
    fn unknown_player_reads_initial_power_without_creating() {
        let ledger = ledger();
        let player = PlayerId::new();
        assert_eq!(ledger.get_power(player), dec!(5));
        assert!(ledger.get(player).is_none());
    }

    #[test]
    fn first_login_creates_record() {
        let mut ledger = ledger();
        let player = PlayerId::new();
        let now = Utc::now();
        assert!(ledger.record_login(player, now));
        assert!(!ledger.record_login(player, now));
        let record = ledger.get(player);
        assert_eq!(record.map(|r| r.login_count), Some(2));
        assert_eq!(record.map(|r| r.power), Some(dec!(5)));
        assert!(ledger.is_online(player));
    }

    // -----------------------------------------------------------------------
    // set_power clamping
    // -----------------------------------------------------------------------

    #[test]
    fn set_power_clamps_to_range() {
        let mut ledger = ledger();
        let player = PlayerId::new();
        let now = Utc::now();
        assert_eq!(ledger.set_power(player, dec!(50), now), dec!(20));
        assert_eq!(ledger.set_power(player, dec!(-3), now), dec!(0));
        assert_eq!(ledger.set_power(player, dec!(7.25), now), dec!(7.25));
        assert_eq!(ledger.get_power(player), dec!(7.25));
    }

    // -----------------------------------------------------------------------
    // increase_power / decrease_power gating
    // -----------------------------------------------------------------------

    #[test]
    fn increase_only_while_online() {
        let mut ledger = ledger();
        let player = PlayerId::new();
        let now = Utc::now();
        assert_eq!(ledger.increase_power(player, dec!(3), now).ok(), Some(dec!(0)));
        ledger.record_login(player, now);
        assert_eq!(ledger.increase_power(player, dec!(3), now).ok(), Some(dec!(3)));
        assert_eq!(ledger.get_power(player), dec!(8));
    }

    #[test]
    fn increase_stops_at_max() {
        let mut ledger = ledger();
        let player = PlayerId::new();
        let now = Utc::now();
        ledger.record_login(player, now);
        ledger.set_power(player, dec!(19), now);
        assert_eq!(ledger.increase_power(player, dec!(5), now).ok(), Some(dec!(1)));
        assert_eq!(ledger.increase_power(player, dec!(5), now).ok(), Some(dec!(0)));
    }

    #[test]
    fn negative_amount_rejected() {
        let mut ledger = ledger();
        let result = ledger.increase_power(PlayerId::new(), dec!(-1), Utc::now());
        assert!(matches!(result, Err(PowerError::NegativeAmount { .. })));
    }

    #[test]
    fn decrease_only_after_inactivity_threshold() {
        let mut ledger = ledger();
        let player = PlayerId::new();
        let start = Utc::now();
        ledger.record_login(player, start);
        ledger.record_logout(player, start);

        let soon = start + Duration::minutes(10);
        assert_eq!(ledger.decrease_power(player, dec!(1), soon).ok(), Some(dec!(0)));

        let later = start + Duration::minutes(1440);
        assert_eq!(ledger.decrease_power(player, dec!(1), later).ok(), Some(dec!(1)));
        assert_eq!(ledger.get_power(player), dec!(4));
    }

    #[test]
    fn online_player_never_decays() {
        let mut ledger = ledger();
        let player = PlayerId::new();
        let start = Utc::now();
        ledger.record_login(player, start);
        let much_later = start + Duration::days(30);
        assert_eq!(ledger.decrease_power(player, dec!(1), much_later).ok(), Some(dec!(0)));
    }

    // -----------------------------------------------------------------------
    // Kill / death
    // -----------------------------------------------------------------------

    #[test]
    fn kill_and_death_transfer_configured_amounts() {
        let mut ledger = ledger();
        let killer = PlayerId::new();
        let victim = PlayerId::new();
        let now = Utc::now();
        assert_eq!(ledger.grant_power_on_kill(killer, now), dec!(1));
        assert_eq!(ledger.revoke_power_on_death(victim, now), dec!(1));
        assert_eq!(ledger.get_power(killer), dec!(6));
        assert_eq!(ledger.get_power(victim), dec!(4));
    }

    #[test]
    fn death_never_goes_below_zero() {
        let mut ledger = ledger();
        let victim = PlayerId::new();
        let now = Utc::now();
        ledger.set_power(victim, dec!(0.5), now);
        assert_eq!(ledger.revoke_power_on_death(victim, now), dec!(0.5));
        assert_eq!(ledger.get_power(victim), dec!(0));
    }

    // -----------------------------------------------------------------------
    // Scheduled passes
    // -----------------------------------------------------------------------

    #[test]
    fn regenerate_touches_only_online_players() {
        let mut ledger = ledger();
        let online = PlayerId::new();
        let offline = PlayerId::new();
        let now = Utc::now();
        ledger.record_login(online, now);
        ledger.record_login(offline, now);
        ledger.record_logout(offline, now);

        let summary = ledger.regenerate(now);
        assert_eq!(summary.players_affected, 1);
        assert_eq!(summary.total_amount, dec!(2));
        assert_eq!(ledger.get_power(online), dec!(7));
        assert_eq!(ledger.get_power(offline), dec!(5));
    }

    #[test]
    fn decay_applies_to_absent_players_only_when_enabled() {
        let now = Utc::now();
        let player = PlayerId::new();
        let long_ago = now - Duration::days(3);

        let mut enabled = ledger();
        enabled.load([PlayerPowerRecord::new(player, dec!(5), long_ago)]);
        assert_eq!(enabled.decay(now).players_affected, 1);
        assert_eq!(enabled.get_power(player), dec!(4));

        let mut disabled = PowerLedger::new(
            PowerConfig {
                power_decreases: false,
                ..PowerConfig::default()
            },
            Box::new(FixedMaxPower(dec!(20))),
        );
        disabled.load([PlayerPowerRecord::new(player, dec!(5), long_ago)]);
        assert_eq!(disabled.decay(now), PassSummary::default());
        assert_eq!(disabled.get_power(player), dec!(5));
    }

    #[test]
    fn oversized_decay_threshold_means_no_decay() {
        let now = Utc::now();
        let player = PlayerId::new();
        let config = PowerConfig {
            minutes_before_power_decrease: i64::MAX,
            ..PowerConfig::default()
        };
        assert_eq!(config.decay_threshold(), Duration::MAX);

        let mut ledger = PowerLedger::new(config, Box::new(FixedMaxPower(dec!(20))));
        ledger.load([PlayerPowerRecord::new(player, dec!(5), now - Duration::days(3650))]);
        assert_eq!(ledger.decay(now), PassSummary::default());
        assert_eq!(ledger.get_power(player), dec!(5));
    }

    // -----------------------------------------------------------------------
    // Change log and dirty tracking
    // -----------------------------------------------------------------------

    #[test]
    fn changes_are_logged_and_drained() {
        let mut ledger = ledger();
        let player = PlayerId::new();
        let now = Utc::now();
        ledger.grant_power_on_kill(player, now);
        ledger.revoke_power_on_death(player, now);
        let changes = ledger.drain_changes();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes.first().map(PowerChange::delta), Some(dec!(1)));
        assert_eq!(changes.get(1).map(|c| c.reason), Some(PowerChangeReason::Death));
        assert!(ledger.drain_changes().is_empty());
    }

    #[test]
    fn dirty_records_split_created_and_updated() {
        let mut ledger = ledger();
        let known = PlayerId::new();
        let now = Utc::now();
        ledger.load([PlayerPowerRecord::new(known, dec!(5), now)]);
        let fresh = PlayerId::new();
        ledger.record_login(fresh, now);
        ledger.record_login(known, now);

        let dirty = ledger.drain_dirty();
        assert_eq!(dirty.created.len(), 1);
        assert_eq!(dirty.updated.len(), 1);
        assert_eq!(dirty.created.first().map(|r| r.player_id), Some(fresh));
        assert_eq!(dirty.updated.first().map(|r| r.player_id), Some(known));
        assert!(ledger.drain_dirty().is_empty());
    }

    #[test]
    fn unchanged_value_is_not_logged() {
        let mut ledger = ledger();
        let player = PlayerId::new();
        let now = Utc::now();
        ledger.set_power(player, dec!(5), now);
        assert!(ledger.drain_changes().is_empty());
    }
}
