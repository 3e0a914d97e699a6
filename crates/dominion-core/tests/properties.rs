//! End-to-end properties of the Dominion engine.
//!
//! Every test drives a [`DominionState`] the way the runner does and
//! persists through a [`MemoryRepository`] (or a [`JsonFileRepository`] in a
//! temporary directory), so the load and sync paths are exercised alongside
//! the rules.

#![allow(
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects,
    clippy::too_many_lines
)]

use chrono::Utc;
use dominion_core::config::DominionConfig;
use dominion_core::{Diplomacy, DominionState, Runner};
use dominion_db::{JsonFileRepository, MemoryRepository, Repository};
use dominion_factions::{FactionError, feudal_tree};
use dominion_territory::{
    ClaimError, ClaimOutcome, NotificationBus, NullBus, NullSink, UnclaimOutcome,
};
use dominion_types::{
    Cancellable, CellKey, ClaimAttempt, ClaimedCell, DisbandReason, FactionId, PlayerId,
    RelationType,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

// =============================================================================
// Helpers
// =============================================================================

const WORLD: &str = "overworld";

fn cell(x: i32, z: i32) -> CellKey {
    CellKey::new(WORLD, x, z)
}

/// A state with default configuration.
fn fresh() -> DominionState {
    DominionState::new(&DominionConfig::default())
}

/// Log in an owner with `power` and found a faction for them.
fn founded(state: &mut DominionState, name: &str, power: Decimal) -> (FactionId, PlayerId) {
    let owner = PlayerId::new();
    let now = Utc::now();
    state.login(owner, now, &mut NullBus);
    state.set_power(owner, power, now);
    let faction = state.create_faction(name, owner, now).unwrap();
    (faction, owner)
}

fn claim(state: &mut DominionState, actor: PlayerId, key: &CellKey, faction: FactionId) -> Result<ClaimOutcome, ClaimError> {
    state.claim(actor, key, faction, &mut NullBus, &mut NullSink)
}

fn at_war(state: &mut DominionState, a: FactionId, b: FactionId) {
    state
        .diplomacy(Diplomacy::DeclareWar {
            aggressor: a,
            target: b,
        })
        .unwrap();
}

// =============================================================================
// Holder liveness
// =============================================================================

#[test]
fn every_held_cell_names_a_live_faction() {
    let mut state = fresh();
    let mut repo = MemoryRepository::new();
    let (a, owner_a) = founded(&mut state, "Avalon", dec!(10));
    let (b, owner_b) = founded(&mut state, "Brigid", dec!(10));
    claim(&mut state, owner_a, &cell(0, 0), a).unwrap();
    claim(&mut state, owner_b, &cell(5, 5), b).unwrap();
    state.sync(&mut repo).unwrap();

    state
        .disband(a, DisbandReason::Command, &mut NullBus, &mut NullSink)
        .unwrap();
    state.sync(&mut repo).unwrap();

    for (_, holder) in state.grid().iter() {
        assert!(state.registry().contains(holder));
    }
    let snapshot = repo.snapshot();
    for stored in &snapshot.cells {
        assert!(snapshot.factions.iter().any(|f| f.id == stored.holder));
    }
    assert_eq!(state.grid().holder(&cell(0, 0)), None);
    assert_eq!(state.grid().holder(&cell(5, 5)), Some(b));
}

#[test]
fn loading_drops_cells_of_missing_factions() {
    let mut state = fresh();
    let mut repo = MemoryRepository::new();
    let (a, owner) = founded(&mut state, "Avalon", dec!(10));
    claim(&mut state, owner, &cell(1, 1), a).unwrap();
    state.sync(&mut repo).unwrap();

    let mut snapshot = repo.load_all().unwrap();
    snapshot.cells.push(ClaimedCell {
        key: cell(2, 2),
        holder: FactionId::new(),
    });

    let mut restored = fresh();
    restored.load(snapshot);
    assert_eq!(restored.grid().holder(&cell(1, 1)), Some(a));
    assert_eq!(restored.grid().holder(&cell(2, 2)), None);

    // The dropped orphan is written back as a release.
    let mut repo = MemoryRepository::new();
    let summary = restored.sync(&mut repo).unwrap();
    assert_eq!(summary.cells, 1);
}

// =============================================================================
// Relations
// =============================================================================

#[test]
fn feudal_edges_are_inverse_and_never_self() {
    let mut state = fresh();
    let (liege, _) = founded(&mut state, "Crown", dec!(10));
    let (vassal, _) = founded(&mut state, "March", dec!(10));

    let self_edge = state.diplomacy(Diplomacy::SetRelation {
        source: liege,
        target: liege,
        relation: Some(RelationType::Ally),
    });
    assert!(matches!(self_edge, Err(FactionError::SelfRelation(_))));

    state
        .diplomacy(Diplomacy::OfferVassalization {
            liege,
            target: vassal,
        })
        .unwrap();
    state
        .diplomacy(Diplomacy::SwearFealty { vassal, liege })
        .unwrap();
    assert_eq!(state.registry().relation(vassal, liege), Some(RelationType::Liege));
    assert_eq!(state.registry().relation(liege, vassal), Some(RelationType::Vassal));

    state
        .diplomacy(Diplomacy::SetRelation {
            source: liege,
            target: vassal,
            relation: None,
        })
        .unwrap();
    assert_eq!(state.registry().relation(vassal, liege), None);
    assert_eq!(state.registry().relation(liege, vassal), None);
}

#[test]
fn feudal_cycles_are_rejected() {
    let mut state = fresh();
    let (a, _) = founded(&mut state, "A", dec!(10));
    let (b, _) = founded(&mut state, "B", dec!(10));
    let (c, _) = founded(&mut state, "C", dec!(10));
    for (vassal, liege) in [(b, a), (c, b)] {
        state
            .diplomacy(Diplomacy::SetRelation {
                source: vassal,
                target: liege,
                relation: Some(RelationType::Liege),
            })
            .unwrap();
    }

    let cycle = state.diplomacy(Diplomacy::SetRelation {
        source: a,
        target: c,
        relation: Some(RelationType::Liege),
    });
    assert!(matches!(cycle, Err(FactionError::FeudalCycle { .. })));
}

#[test]
fn feudal_tree_closes_over_chain() {
    let mut state = fresh();
    let (a, _) = founded(&mut state, "A", dec!(10));
    let (b, _) = founded(&mut state, "B", dec!(10));
    let (c, _) = founded(&mut state, "C", dec!(10));
    let (outsider, _) = founded(&mut state, "D", dec!(10));
    for (vassal, liege) in [(b, a), (c, b)] {
        state
            .diplomacy(Diplomacy::OfferVassalization {
                liege,
                target: vassal,
            })
            .unwrap();
        state
            .diplomacy(Diplomacy::SwearFealty { vassal, liege })
            .unwrap();
    }

    let expected = [a, b, c].into_iter().collect();
    for start in [a, b, c] {
        assert_eq!(feudal_tree(state.registry(), start), expected);
    }
    assert!(!feudal_tree(state.registry(), a).contains(&outsider));
}

// =============================================================================
// Claims
// =============================================================================

#[test]
fn claim_then_unclaim_restores_the_cell() {
    let mut state = fresh();
    let (a, owner) = founded(&mut state, "Avalon", dec!(10));
    let key = cell(4, -2);

    assert_eq!(claim(&mut state, owner, &key, a), Ok(ClaimOutcome::Claimed));
    assert_eq!(state.grid().holder(&key), Some(a));
    assert_eq!(
        state.unclaim(owner, &key, a, &mut NullBus, &mut NullSink),
        Ok(UnclaimOutcome::Unclaimed)
    );
    assert_eq!(state.grid().holder(&key), None);
    assert_eq!(state.grid().count_for_faction(a), 0);
}

#[test]
fn second_claim_by_same_faction_is_rejected() {
    let mut state = fresh();
    let (a, owner) = founded(&mut state, "Avalon", dec!(10));
    let key = cell(0, 0);
    claim(&mut state, owner, &key, a).unwrap();
    assert_eq!(
        claim(&mut state, owner, &key, a),
        Err(ClaimError::AlreadyClaimed(key))
    );
}

#[test]
fn land_limit_follows_cumulative_power() {
    let mut state = fresh();
    let (a, owner) = founded(&mut state, "Avalon", dec!(2));
    claim(&mut state, owner, &cell(0, 0), a).unwrap();
    claim(&mut state, owner, &cell(1, 0), a).unwrap();
    assert!(matches!(
        claim(&mut state, owner, &cell(2, 0), a),
        Err(ClaimError::LimitReached { held: 2, .. })
    ));

    state.set_bonus_power(a, dec!(1)).unwrap();
    assert_eq!(claim(&mut state, owner, &cell(2, 0), a), Ok(ClaimOutcome::Claimed));
}

/// The holder owns a row of five cells. Its power is then dropped to
/// `holder_power`. Returns the attacker's result on the row's end cell.
fn conquest_at(holder_power: Decimal) -> (DominionState, FactionId, Result<ClaimOutcome, ClaimError>) {
    let mut state = fresh();
    let (holder, holder_owner) = founded(&mut state, "Holder", dec!(5));
    let (attacker, attacker_owner) = founded(&mut state, "Attacker", dec!(10));
    for x in 0..5 {
        claim(&mut state, holder_owner, &cell(x, 0), holder).unwrap();
    }
    state.set_power(holder_owner, holder_power, Utc::now());
    at_war(&mut state, attacker, holder);

    let result = claim(&mut state, attacker_owner, &cell(4, 0), attacker);
    (state, holder, result)
}

#[test]
fn conquest_succeeds_against_over_extended_holder() {
    let (state, holder, result) = conquest_at(dec!(3));
    assert_eq!(result, Ok(ClaimOutcome::Conquered { previous: holder }));
    assert_eq!(state.grid().count_for_faction(holder), 4);
}

#[test]
fn conquest_is_blocked_when_holder_has_the_power() {
    let (state, holder, result) = conquest_at(dec!(10));
    assert!(matches!(
        result,
        Err(ClaimError::TargetNotOverClaiming { held: 5, .. })
    ));
    assert_eq!(state.grid().holder(&cell(4, 0)), Some(holder));
}

#[test]
fn conquest_requires_war() {
    let mut state = fresh();
    let (holder, holder_owner) = founded(&mut state, "Holder", dec!(5));
    let (attacker, attacker_owner) = founded(&mut state, "Attacker", dec!(10));
    claim(&mut state, holder_owner, &cell(0, 0), holder).unwrap();
    state.set_power(holder_owner, Decimal::ZERO, Utc::now());

    assert!(matches!(
        claim(&mut state, attacker_owner, &cell(0, 0), attacker),
        Err(ClaimError::NotEnemy { .. })
    ));
}

#[test]
fn surrounded_cells_cannot_be_conquered() {
    let mut state = fresh();
    let (holder, holder_owner) = founded(&mut state, "Holder", dec!(5));
    let (attacker, attacker_owner) = founded(&mut state, "Attacker", dec!(10));
    for key in [cell(0, 0), cell(1, 0), cell(-1, 0), cell(0, 1), cell(0, -1)] {
        claim(&mut state, holder_owner, &key, holder).unwrap();
    }
    state.set_power(holder_owner, Decimal::ZERO, Utc::now());
    at_war(&mut state, attacker, holder);

    assert!(matches!(
        claim(&mut state, attacker_owner, &cell(0, 0), attacker),
        Err(ClaimError::SurroundedChunkProtected(_))
    ));
    assert!(matches!(
        claim(&mut state, attacker_owner, &cell(1, 0), attacker),
        Ok(ClaimOutcome::Conquered { .. })
    ));
}

#[test]
fn radius_one_claims_nine_cells() {
    let mut state = fresh();
    let (a, owner) = founded(&mut state, "Avalon", dec!(10));
    let report = state
        .radius_claim(owner, &cell(0, 0), 1, a, &mut NullBus, &mut NullSink)
        .unwrap();
    assert_eq!(report.attempted, 9);
    assert_eq!(report.changed.len(), 9);
    assert_eq!(state.grid().count_for_faction(a), 9);

    let report = state
        .radius_unclaim(owner, &cell(0, 0), 1, a, &mut NullBus, &mut NullSink)
        .unwrap();
    assert_eq!(report.changed.len(), 9);
    assert_eq!(state.grid().count_for_faction(a), 0);
}

#[test]
fn radius_limits_are_validated() {
    let mut state = fresh();
    let (a, owner) = founded(&mut state, "Avalon", dec!(10));
    assert!(matches!(
        state.radius_claim(owner, &cell(0, 0), 6, a, &mut NullBus, &mut NullSink),
        Err(ClaimError::RadiusExceeded { requested: 6, max: 5 })
    ));
    assert!(matches!(
        state.radius_unclaim(owner, &cell(0, 0), 0, a, &mut NullBus, &mut NullSink),
        Err(ClaimError::InvalidRadius(0))
    ));
}

#[test]
fn vetoed_claim_changes_nothing() {
    struct VetoAll;
    impl NotificationBus for VetoAll {
        fn claim_attempt(&mut self, attempt: &mut Cancellable<ClaimAttempt>) {
            attempt.cancel();
        }
    }

    let mut state = fresh();
    let mut repo = MemoryRepository::new();
    let (a, owner) = founded(&mut state, "Avalon", dec!(10));
    state.sync(&mut repo).unwrap();

    let outcome = state
        .claim(owner, &cell(0, 0), a, &mut VetoAll, &mut NullSink)
        .unwrap();
    assert_eq!(outcome, ClaimOutcome::Vetoed);
    assert_eq!(state.grid().holder(&cell(0, 0)), None);
    assert_eq!(state.sync(&mut repo).unwrap().cells, 0);
}

// =============================================================================
// Power
// =============================================================================

#[test]
fn weakened_below_half_of_max() {
    let mut config = DominionConfig::default();
    config.power.base_max_power = dec!(100);
    let mut state = DominionState::new(&config);
    let (a, _) = founded(&mut state, "Avalon", dec!(40));

    let power = state.faction_power(a).unwrap();
    assert_eq!(power.max_member, dec!(100));
    assert!(power.weakened);

    let (b, _) = founded(&mut state, "Brigid", dec!(50));
    assert!(!state.faction_power(b).unwrap().weakened);
}

#[test]
fn vassal_contribution_raises_liege_limit() {
    let mut state = fresh();
    let (liege, _) = founded(&mut state, "Crown", dec!(10));
    let (vassal, _) = founded(&mut state, "March", dec!(8));
    state
        .diplomacy(Diplomacy::OfferVassalization {
            liege,
            target: vassal,
        })
        .unwrap();
    state
        .diplomacy(Diplomacy::SwearFealty { vassal, liege })
        .unwrap();

    let power = state.faction_power(liege).unwrap();
    assert_eq!(power.own, dec!(10));
    assert_eq!(power.cumulative, dec!(16));
}

// =============================================================================
// JSON file persistence
// =============================================================================

#[test]
fn json_store_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let mut state = fresh();
    let (liege, owner) = founded(&mut state, "Avalon", dec!(10));
    let (vassal, _) = founded(&mut state, "Brigid", dec!(8));
    claim(&mut state, owner, &cell(3, -4), liege).unwrap();
    state
        .diplomacy(Diplomacy::SetRelation {
            source: liege,
            target: vassal,
            relation: Some(RelationType::Vassal),
        })
        .unwrap();

    {
        let mut repo = JsonFileRepository::open(dir.path()).unwrap();
        state.sync(&mut repo).unwrap();
        repo.flush().unwrap();
    }

    let mut repo = JsonFileRepository::open(dir.path()).unwrap();
    let mut restored = fresh();
    restored.load(repo.load_all().unwrap());
    assert_eq!(restored.grid().holder(&cell(3, -4)), Some(liege));
    assert_eq!(restored.ledger().get_power(owner), dec!(10));
    let faction = restored.registry().get(vassal).unwrap();
    assert_eq!(faction.relation_to(liege), Some(RelationType::Liege));

    // Nothing changed since the load, so there is nothing to write back.
    assert!(restored.sync(&mut repo).unwrap().is_empty());
}

// =============================================================================
// Runner
// =============================================================================

#[tokio::test]
async fn runner_persists_a_session() {
    let config = DominionConfig::default();
    let (handle, task) = Runner::new(
        DominionState::new(&config),
        MemoryRepository::new(),
        &config.scheduler,
    )
    .spawn();

    let owner = PlayerId::new();
    handle.login(owner).await.unwrap();
    let faction = handle.create_faction("Avalon", owner).await.unwrap().unwrap();
    let report = handle
        .radius_claim(owner, cell(0, 0), 1, faction)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.changed.len(), 5, "initial power of 5 caps the batch");
    assert_eq!(report.failed.len(), 4);

    let power = handle.faction_power(faction).await.unwrap().unwrap();
    assert_eq!(power.held, 5);

    handle.shutdown().await.unwrap();
    let (_state, mut repo) = task.await.unwrap().unwrap();
    let snapshot = repo.load_all().unwrap();
    assert_eq!(snapshot.factions.len(), 1);
    assert_eq!(snapshot.cells.len(), 5);
    assert_eq!(snapshot.players.len(), 1);

    let mut restored = DominionState::new(&config);
    restored.load(snapshot);
    assert_eq!(restored.grid().count_for_faction(faction), 5);
}
