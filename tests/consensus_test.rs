//! Unit tests for consensus module
//!
//! Market under test: epoch size 10, epoch 1 released at block 10, batch
//! window 20, attestation window 100, quorum 2.

use datamarket::{
    batch_root_hash, event_names, Address, CallContext, Event, Hash, MarketError, MarketId, MarketParams,
    MarketRegistry, Role, SnapshotState,
};

const BATCH: &str = "bafy-batch-1";

fn addr(label: &str) -> Address {
    Address::from_label(label)
}

fn at(who: &str, block: u64) -> CallContext {
    CallContext::new(addr(who), 1_700_000_000 + block, block)
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn setup() -> (MarketRegistry, MarketId) {
    let mut registry = MarketRegistry::new(addr("owner"), addr("factory"));
    let owner = at("owner", 1);
    let (id, _) = registry
        .create_market(
            &owner,
            MarketParams {
                owner: addr("owner"),
                epoch_size: 10,
                source_chain_id: 137,
                source_block_time: 20_000,
                use_external_counter: false,
            },
        )
        .unwrap();
    registry.update_epoch_manager(&owner, id, addr("manager")).unwrap();
    registry.update_addresses(&owner, id, Role::Sequencer, &[addr("seq")], &[true]).unwrap();
    registry
        .update_addresses(&owner, id, Role::Validator, &[addr("v1"), addr("v2"), addr("v3")], &[true, true, true])
        .unwrap();
    registry.release_epoch(&at("manager", 10), id, 1, 10).unwrap();
    (registry, id)
}

fn submit(registry: &mut MarketRegistry, id: MarketId, cids: &[&str], block: u64) -> Hash {
    let root = batch_root_hash(cids);
    registry
        .submit_batch(&at("seq", block), id, BATCH, 1, &strings(&["p1", "p2"]), &strings(cids), root)
        .unwrap();
    root
}

#[test]
fn test_batch_creates_pending_snapshots() {
    let (mut registry, id) = setup();
    let events = registry
        .submit_batch(
            &at("seq", 11),
            id,
            BATCH,
            1,
            &strings(&["p1", "p2"]),
            &strings(&["c1", "c2"]),
            [7u8; 32],
        )
        .unwrap();
    assert_eq!(event_names(&events), vec!["SnapshotBatchSubmitted"]);

    let batches = registry.market(id).unwrap().batches();
    for (project, cid) in [("p1", "c1"), ("p2", "c2")] {
        let status = batches.snapshot_status(project, 1).unwrap();
        assert_eq!(status.state, SnapshotState::Pending);
        assert_eq!(status.snapshot_cid, cid);
    }
    assert_eq!(batches.epoch_batch_cids(1), &[BATCH.to_string()]);

    assert_eq!(
        registry.submit_batch(&at("seq", 12), id, "bafy-batch-2", 1, &strings(&["p1"]), &strings(&["c3"]), [7u8; 32]),
        Err(MarketError::DuplicateSnapshot { project: "p1".into(), epoch: 1 })
    );
    assert_eq!(
        registry.submit_batch(&at("seq", 12), id, BATCH, 1, &strings(&["p3"]), &strings(&["c3"]), [7u8; 32]),
        Err(MarketError::DuplicateBatch(BATCH.into()))
    );
}

#[test]
fn test_batch_input_validation() {
    let (mut registry, id) = setup();
    assert_eq!(
        registry.submit_batch(&at("seq", 11), id, BATCH, 1, &strings(&["p1", "p2"]), &strings(&["c1"]), [0u8; 32]),
        Err(MarketError::ArrayLengthMismatch { left: 2, right: 1 })
    );
    assert_eq!(
        registry.submit_batch(&at("seq", 11), id, BATCH, 1, &[], &[], [0u8; 32]),
        Err(MarketError::EmptyBatch)
    );
    assert_eq!(
        registry.submit_batch(&at("seq", 11), id, BATCH, 4, &strings(&["p1"]), &strings(&["c1"]), [0u8; 32]),
        Err(MarketError::UnknownEpoch(4))
    );
    assert_eq!(
        registry.submit_batch(&at("v1", 11), id, BATCH, 1, &strings(&["p1"]), &strings(&["c1"]), [0u8; 32]),
        Err(MarketError::OnlySequencer(addr("v1")))
    );
}

#[test]
fn test_late_batch_is_delayed() {
    let (mut registry, id) = setup();
    let events = registry
        .submit_batch(&at("seq", 31), id, BATCH, 1, &strings(&["p1"]), &strings(&["c1"]), [0u8; 32])
        .unwrap();
    assert_eq!(event_names(&events), vec!["DelayedBatchSubmitted"]);
    assert!(registry.market(id).unwrap().batches().get(BATCH).unwrap().delayed);
}

#[test]
fn test_quorum_finalizes_batch() {
    let (mut registry, id) = setup();
    let root = submit(&mut registry, id, &["c1", "c2"], 11);

    let events = registry.submit_attestation(&at("v1", 12), id, BATCH, 1, root).unwrap();
    assert_eq!(event_names(&events), vec!["SnapshotBatchAttestationSubmitted"]);
    let market = registry.market(id).unwrap();
    assert_eq!(market.consensus().tally(BATCH).unwrap().count(&root), 1);
    assert!(!market.consensus().is_finalized(BATCH));

    let events = registry.submit_attestation(&at("v2", 13), id, BATCH, 1, root).unwrap();
    assert_eq!(
        event_names(&events),
        vec!["SnapshotBatchAttestationSubmitted", "SnapshotFinalized", "SnapshotFinalized", "SnapshotBatchFinalized"]
    );
    assert!(matches!(
        &events[3].event,
        Event::SnapshotBatchFinalized { fallback: false, root_hash, .. } if *root_hash == root
    ));

    let market = registry.market(id).unwrap();
    assert_eq!(market.finalized_snapshot_cid("p1", 1), Some("c1"));
    assert_eq!(market.finalized_snapshot_cid("p2", 1), Some("c2"));
    assert_eq!(market.batches().snapshot_status("p1", 1).unwrap().state, SnapshotState::Finalized);
    assert_eq!(market.consensus().last_finalized_epoch("p1"), Some(1));
}

#[test]
fn test_finalized_batch_rejects_attestations() {
    let (mut registry, id) = setup();
    let root = submit(&mut registry, id, &["c1", "c2"], 11);
    registry.submit_attestation(&at("v1", 12), id, BATCH, 1, root).unwrap();
    assert_eq!(
        registry.submit_attestation(&at("v1", 12), id, BATCH, 1, root),
        Err(MarketError::AlreadyAttested { batch: BATCH.into(), validator: addr("v1") })
    );
    registry.submit_attestation(&at("v2", 13), id, BATCH, 1, root).unwrap();

    let before = registry.journal().len();
    assert_eq!(
        registry.submit_attestation(&at("v3", 14), id, BATCH, 1, [9u8; 32]),
        Err(MarketError::BatchAlreadyFinalized(BATCH.into()))
    );
    assert_eq!(registry.journal().len(), before);
    assert_eq!(registry.market(id).unwrap().finalized_snapshot_cid("p1", 1), Some("c1"));
}

#[test]
fn test_divergent_validators_invalidated() {
    let (mut registry, id) = setup();
    let root = submit(&mut registry, id, &["c1", "c2"], 11);

    registry.submit_attestation(&at("v1", 12), id, BATCH, 1, root).unwrap();
    registry.submit_attestation(&at("v2", 12), id, BATCH, 1, [1u8; 32]).unwrap();
    let events = registry.submit_attestation(&at("v3", 13), id, BATCH, 1, root).unwrap();

    let names = event_names(&events);
    assert_eq!(names.last(), Some(&"ValidatorAttestationsInvalidated"));
    assert!(matches!(
        &events.last().unwrap().event,
        Event::ValidatorAttestationsInvalidated { validator, .. } if *validator == addr("v2")
    ));
    let tally = registry.market(id).unwrap().consensus().tally(BATCH).unwrap();
    assert_eq!(tally.divergent(), &[addr("v2")]);
}

#[test]
fn test_attestation_checks() {
    let (mut registry, id) = setup();
    let root = submit(&mut registry, id, &["c1", "c2"], 11);
    registry.release_epoch(&at("manager", 12), id, 11, 20).unwrap();

    assert_eq!(
        registry.submit_attestation(&at("v1", 13), id, BATCH, 2, root),
        Err(MarketError::BatchEpochMismatch { batch: BATCH.into(), epoch: 2 })
    );
    assert_eq!(
        registry.submit_attestation(&at("seq", 13), id, BATCH, 1, root),
        Err(MarketError::OnlyValidator(addr("seq")))
    );

    // attestation window counts from batch submission (block 11)
    let events = registry.submit_attestation(&at("v1", 112), id, BATCH, 1, root).unwrap();
    assert_eq!(event_names(&events), vec!["DelayedAttestationSubmitted"]);
    assert!(registry.market(id).unwrap().consensus().tally(BATCH).unwrap().attestations()[0].delayed);
}

#[test]
fn test_force_complete_lone_attestation() {
    let (mut registry, id) = setup();
    submit(&mut registry, id, &["c1", "c2"], 11);
    let lone = [5u8; 32];
    registry.submit_attestation(&at("v1", 12), id, BATCH, 1, lone).unwrap();

    assert!(!registry.check_dynamic_consensus(&at("owner", 110), id, BATCH, 1).unwrap());
    assert_eq!(
        registry.force_complete_consensus(&at("owner", 110), id, BATCH, 1),
        Err(MarketError::ConsensusNotStalled(BATCH.into()))
    );
    assert!(registry.check_dynamic_consensus(&at("owner", 111), id, BATCH, 1).unwrap());

    assert_eq!(
        registry.force_complete_consensus(&at("v1", 111), id, BATCH, 1),
        Err(MarketError::OnlyOwner(addr("v1")))
    );
    let events = registry.force_complete_consensus(&at("owner", 111), id, BATCH, 1).unwrap();
    assert_eq!(event_names(&events), vec!["SnapshotFinalized", "SnapshotFinalized", "SnapshotBatchFinalized"]);
    assert!(matches!(
        &events[2].event,
        Event::SnapshotBatchFinalized { fallback: true, root_hash, .. } if *root_hash == lone
    ));

    let market = registry.market(id).unwrap();
    assert_eq!(market.batches().snapshot_status("p2", 1).unwrap().state, SnapshotState::FallbackFinalized);
    assert!(!registry.check_dynamic_consensus(&at("owner", 112), id, BATCH, 1).unwrap());
    assert_eq!(
        registry.force_complete_consensus(&at("owner", 112), id, BATCH, 1),
        Err(MarketError::ConsensusNotStalled(BATCH.into()))
    );
}

#[test]
fn test_force_complete_without_attestations_requests_resubmission() {
    let (mut registry, id) = setup();
    submit(&mut registry, id, &["c1", "c2"], 11);

    let events = registry.force_complete_consensus(&at("owner", 111), id, BATCH, 1).unwrap();
    assert_eq!(event_names(&events), vec!["TriggerBatchResubmission"]);
    assert!(registry.market(id).unwrap().consensus().resubmission_pending(BATCH));
    assert_eq!(
        registry.market(id).unwrap().batches().snapshot_status("p1", 1).unwrap().state,
        SnapshotState::Pending
    );

    // different project list is not a resubmission
    assert_eq!(
        registry.submit_batch(&at("seq", 112), id, BATCH, 1, &strings(&["p1"]), &strings(&["x"]), [0u8; 32]),
        Err(MarketError::DuplicateSnapshot { project: "p1".into(), epoch: 1 })
    );

    let root = submit(&mut registry, id, &["c1b", "c2b"], 112);
    let market = registry.market(id).unwrap();
    assert!(!market.consensus().resubmission_pending(BATCH));
    assert!(market.consensus().tally(BATCH).is_none());
    assert_eq!(market.batches().get(BATCH).unwrap().resubmissions, 1);

    registry.submit_attestation(&at("v1", 113), id, BATCH, 1, root).unwrap();
    registry.submit_attestation(&at("v2", 113), id, BATCH, 1, root).unwrap();
    assert_eq!(registry.market(id).unwrap().finalized_snapshot_cid("p1", 1), Some("c1b"));
}

#[test]
fn test_force_complete_tie_goes_to_claimed_hash() {
    let (mut registry, id) = setup();
    let root = submit(&mut registry, id, &["c1", "c2"], 11);
    registry.submit_attestation(&at("v1", 12), id, BATCH, 1, [9u8; 32]).unwrap();
    registry.submit_attestation(&at("v2", 13), id, BATCH, 1, root).unwrap();
    assert_eq!(registry.market(id).unwrap().consensus().tally(BATCH).unwrap().divergent(), &[addr("v2")]);

    let events = registry.force_complete_consensus(&at("owner", 200), id, BATCH, 1).unwrap();
    assert_eq!(
        event_names(&events),
        vec!["SnapshotFinalized", "SnapshotFinalized", "SnapshotBatchFinalized", "ValidatorAttestationsInvalidated"]
    );
    assert_eq!(
        events[3].event,
        Event::ValidatorAttestationsInvalidated {
            epoch_id: 1,
            batch_cid: BATCH.into(),
            validator: addr("v1"),
            timestamp: 1_700_000_200,
        }
    );
    let market = registry.market(id).unwrap();
    assert_eq!(market.consensus().tally(BATCH).unwrap().outcome().unwrap().root_hash, root);
    assert_eq!(market.batches().snapshot_status("p1", 1).unwrap().state, SnapshotState::FallbackFinalized);
}

#[test]
fn test_force_complete_unclaimed_tie_requests_resubmission() {
    let (mut registry, id) = setup();
    submit(&mut registry, id, &["c1", "c2"], 11);
    registry.submit_attestation(&at("v1", 12), id, BATCH, 1, [1u8; 32]).unwrap();
    registry.submit_attestation(&at("v2", 12), id, BATCH, 1, [2u8; 32]).unwrap();

    let events = registry.force_complete_consensus(&at("owner", 200), id, BATCH, 1).unwrap();
    assert_eq!(event_names(&events), vec!["TriggerBatchResubmission"]);
    assert!(!registry.market(id).unwrap().consensus().is_finalized(BATCH));
}

#[test]
fn test_end_batch_submissions_once() {
    let (mut registry, id) = setup();
    let events = registry.end_batch_submissions(&at("seq", 12), id, 1).unwrap();
    assert_eq!(event_names(&events), vec!["BatchSubmissionsCompleted"]);
    assert!(registry.market(id).unwrap().batches().submissions_completed(1));

    assert_eq!(registry.end_batch_submissions(&at("seq", 13), id, 1), Err(MarketError::AlreadyCompleted(1)));
    assert_eq!(registry.end_batch_submissions(&at("seq", 13), id, 9), Err(MarketError::UnknownEpoch(9)));
}

#[test]
fn test_disabled_market_blocks_consensus() {
    let (mut registry, id) = setup();
    let root = submit(&mut registry, id, &["c1", "c2"], 11);
    registry.toggle_market(&at("owner", 12), id, false).unwrap();

    assert_eq!(
        registry.submit_attestation(&at("v1", 13), id, BATCH, 1, root),
        Err(MarketError::MarketNotActive(id))
    );
    assert_eq!(
        registry.force_complete_consensus(&at("owner", 200), id, BATCH, 1),
        Err(MarketError::MarketNotActive(id))
    );
}
