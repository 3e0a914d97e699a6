//! Feudal tree traversal and faction power aggregation.
//!
//! Read-side algorithms over the liege/vassal subset of the relation graph.
//! Nothing here mutates the registry.
//!
//! # Power model
//!
//! ```text
//! own(F)        = sum of member power
//! with_vas(F)   = own(F) + sum over direct vassals V of cumulative(V) * contribution
//! cumulative(F) = own(F) + bonus(F)         if F has no vassals or F is weakened
//!               = with_vas(F) + bonus(F)    otherwise
//! weakened(F)   = own(F) < max_member_power(F) / 2
//! ```
//!
//! The demesne limit -- how many cells a faction may hold -- is always
//! `cumulative(F)`. Both the land-limit check on claim and the
//! over-extension check on conquest use it.
//!
//! Every walk tracks the ids it has visited, so inconsistent data (a cycle
//! loaded from storage) can never cause non-termination.

use std::collections::BTreeSet;

use dominion_power::PowerSource;
use dominion_types::FactionId;
use rust_decimal::Decimal;

use crate::registry::FactionRegistry;

/// The liege chain above `start`, nearest liege first.
///
/// Stops at the first faction without a liege, at a missing faction, or at
/// the first repeated id.
pub fn liege_chain(registry: &FactionRegistry, start: FactionId) -> Vec<FactionId> {
    let mut chain = Vec::new();
    let mut visited = BTreeSet::from([start]);
    let mut current = start;
    while let Some(liege) = registry.get(current).and_then(|f| f.liege()) {
        if !visited.insert(liege) {
            break;
        }
        chain.push(liege);
        current = liege;
    }
    chain
}

/// The top of `start`'s feudal tree (`start` itself if it has no liege).
pub fn top_liege(registry: &FactionRegistry, start: FactionId) -> FactionId {
    liege_chain(registry, start).last().copied().unwrap_or(start)
}

/// The closed set of factions feudally connected to `start`, including it.
///
/// Each pass adds the liege of every known faction, the direct vassals of
/// that liege, and the direct vassals of every known faction, until a pass
/// adds nothing new.
pub fn feudal_tree(registry: &FactionRegistry, start: FactionId) -> BTreeSet<FactionId> {
    let mut known = BTreeSet::from([start]);
    loop {
        let mut found = BTreeSet::new();
        for id in &known {
            let Some(faction) = registry.get(*id) else {
                continue;
            };
            if let Some(liege) = faction.liege() {
                found.insert(liege);
                if let Some(liege_faction) = registry.get(liege) {
                    found.extend(liege_faction.vassals());
                }
            }
            found.extend(faction.vassals());
        }
        let before = known.len();
        known.extend(found.into_iter().filter(|id| registry.contains(*id)));
        if known.len() == before {
            return known;
        }
    }
}

/// Computes faction power from member power and the feudal tree.
#[derive(Clone, Copy)]
pub struct PowerAggregator<'a> {
    registry: &'a FactionRegistry,
    power: &'a dyn PowerSource,
    contribution: Decimal,
}

impl core::fmt::Debug for PowerAggregator<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PowerAggregator")
            .field("contribution", &self.contribution)
            .finish_non_exhaustive()
    }
}

impl<'a> PowerAggregator<'a> {
    /// Create an aggregator. `contribution` is the fraction of a vassal's
    /// cumulative power credited to its liege (e.g. `0.75`).
    pub const fn new(
        registry: &'a FactionRegistry,
        power: &'a dyn PowerSource,
        contribution: Decimal,
    ) -> Self {
        Self {
            registry,
            power,
            contribution,
        }
    }

    /// Sum of the power of the faction's members. Zero if unknown.
    pub fn power_without_vassals(&self, faction: FactionId) -> Decimal {
        self.registry.get(faction).map_or(Decimal::ZERO, |f| {
            f.members
                .iter()
                .fold(Decimal::ZERO, |acc, m| acc.saturating_add(self.power.power_of(*m)))
        })
    }

    /// Sum of the max power of the faction's members. Zero if unknown.
    pub fn max_member_power(&self, faction: FactionId) -> Decimal {
        self.registry.get(faction).map_or(Decimal::ZERO, |f| {
            f.members
                .iter()
                .fold(Decimal::ZERO, |acc, m| acc.saturating_add(self.power.max_power_of(*m)))
        })
    }

    /// Whether the faction's own members hold less than half their combined
    /// max power. Vassal contribution plays no part.
    pub fn is_weakened(&self, faction: FactionId) -> bool {
        let half_max = self.max_member_power(faction) / Decimal::TWO;
        self.power_without_vassals(faction) < half_max
    }

    /// Own power plus the contribution share of every direct vassal's
    /// cumulative power.
    pub fn power_with_vassals(&self, faction: FactionId) -> Decimal {
        let mut visiting = BTreeSet::from([faction]);
        self.with_vassals_inner(faction, &mut visiting)
    }

    /// The faction's aggregate power score. See the module docs.
    pub fn cumulative_power(&self, faction: FactionId) -> Decimal {
        let mut visiting = BTreeSet::new();
        self.cumulative_inner(faction, &mut visiting)
    }

    /// Maximum number of cells the faction may hold.
    pub fn demesne_limit(&self, faction: FactionId) -> Decimal {
        self.cumulative_power(faction)
    }

    /// Whether holding `held` cells puts the faction above its limit.
    pub fn is_over_extended(&self, faction: FactionId, held: usize) -> bool {
        Decimal::from(held) > self.demesne_limit(faction)
    }

    fn cumulative_inner(&self, faction: FactionId, visiting: &mut BTreeSet<FactionId>) -> Decimal {
        let Some(record) = self.registry.get(faction) else {
            return Decimal::ZERO;
        };
        if !visiting.insert(faction) {
            return Decimal::ZERO;
        }
        let base = if !record.has_vassals() || self.is_weakened(faction) {
            self.power_without_vassals(faction)
        } else {
            self.with_vassals_inner(faction, visiting)
        };
        base.saturating_add(record.bonus_power)
    }

    fn with_vassals_inner(&self, faction: FactionId, visiting: &mut BTreeSet<FactionId>) -> Decimal {
        let own = self.power_without_vassals(faction);
        let Some(record) = self.registry.get(faction) else {
            return own;
        };
        record.vassals().fold(own, |acc, vassal| {
            let share = self
                .cumulative_inner(vassal, visiting)
                .saturating_mul(self.contribution);
            acc.saturating_add(share)
        })
    }
}
