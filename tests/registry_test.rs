//! Unit tests for registry administration and persistence

use datamarket::{
    batch_root_hash, event_names, Address, CallContext, DeployConfig, Event, InMemoryNodeRegistry, MarketError,
    MarketId, MarketParams, MarketRegistry, MarketSettings, Notification, Role, Setting, SnapshotState, Storage,
};

fn addr(label: &str) -> Address {
    Address::from_label(label)
}

fn at(who: &str, block: u64) -> CallContext {
    CallContext::new(addr(who), 1_700_000_000 + block, block)
}

fn setup() -> (MarketRegistry, MarketId) {
    let mut registry = MarketRegistry::new(addr("owner"), addr("factory"));
    let (id, _) = registry
        .create_market(
            &at("owner", 1),
            MarketParams {
                owner: addr("market-owner"),
                epoch_size: 10,
                source_chain_id: 137,
                source_block_time: 20_000,
                use_external_counter: false,
            },
        )
        .unwrap();
    (registry, id)
}

#[test]
fn test_market_created_event() {
    let (registry, id) = setup();
    let journal = registry.journal();
    assert_eq!(journal.len(), 1);
    match &journal[0].event {
        Event::MarketCreated { market_id, owner, address, epoch_size, .. } => {
            assert_eq!(*market_id, id);
            assert_eq!(*owner, addr("market-owner"));
            assert_eq!(*epoch_size, 10);
            assert_eq!(registry.resolve(address), Ok(id));
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert_eq!(registry.resolve(&addr("nowhere")), Err(MarketError::UnknownMarketAddress(addr("nowhere"))));
}

#[test]
fn test_create_market_validation() {
    let mut registry = MarketRegistry::new(addr("owner"), addr("factory"));
    let mut params = MarketParams {
        owner: Address::ZERO,
        epoch_size: 10,
        source_chain_id: 1,
        source_block_time: 1,
        use_external_counter: false,
    };
    assert_eq!(registry.create_market(&at("owner", 1), params.clone()), Err(MarketError::ZeroAddress));
    params.owner = addr("market-owner");
    params.epoch_size = 0;
    assert!(matches!(registry.create_market(&at("owner", 1), params), Err(MarketError::InvalidSetting(_))));
    assert_eq!(registry.market_count(), 0);
}

#[test]
fn test_market_owner_manages_roles() {
    let (mut registry, id) = setup();
    let owner = at("market-owner", 2);

    // registry owner is not the market owner
    assert_eq!(
        registry.update_addresses(&at("owner", 2), id, Role::Validator, &[addr("v1")], &[true]),
        Err(MarketError::OnlyOwner(addr("owner")))
    );

    let events = registry
        .update_addresses(&owner, id, Role::Validator, &[addr("v1"), addr("v2")], &[true, true])
        .unwrap();
    assert_eq!(event_names(&events), vec!["ValidatorsUpdated", "ValidatorsUpdated"]);

    let events = registry
        .update_addresses(&owner, id, Role::Validator, &[addr("v1"), addr("v3")], &[false, false])
        .unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event, Event::ValidatorsUpdated { validator: addr("v1"), allowed: false });

    let market = registry.market(id).unwrap();
    assert_eq!(market.roles().members(Role::Validator), &[addr("v2")]);
    assert!(!market.roles().has(Role::Validator, &addr("v1")));

    assert_eq!(
        registry.update_addresses(&owner, id, Role::Admin, &[Address::ZERO], &[true]),
        Err(MarketError::ZeroAddress)
    );
}

#[test]
fn test_admin_sets_sequencer_id() {
    let (mut registry, id) = setup();
    assert_eq!(
        registry.set_sequencer_id(&at("market-owner", 2), id, "seq-a"),
        Err(MarketError::OnlyAdmin(addr("market-owner")))
    );
    registry
        .update_addresses(&at("market-owner", 2), id, Role::Admin, &[addr("admin")], &[true])
        .unwrap();
    let events = registry.set_sequencer_id(&at("admin", 3), id, "seq-a").unwrap();
    assert_eq!(events[0].event, Event::SequencerIdUpdated { sequencer_id: "seq-a".into() });
    assert_eq!(registry.market(id).unwrap().sequencer_id(), "seq-a");
}

#[test]
fn test_settings_updates() {
    let (mut registry, id) = setup();
    let owner = at("market-owner", 2);
    let events = registry.update_setting(&owner, id, Setting::AttestationSubmissionWindow(5)).unwrap();
    assert_eq!(
        events[0].event,
        Event::SettingUpdated { setting: "attestation_submission_window".into(), value: "5".into() }
    );
    assert_eq!(registry.market(id).unwrap().settings().attestation_submission_window, 5);

    assert!(matches!(
        registry.update_setting(&owner, id, Setting::MinAttestationsForConsensus(0)),
        Err(MarketError::InvalidSetting(_))
    ));
    assert_eq!(
        registry.update_setting(&at("stranger", 2), id, Setting::DaySize(10)),
        Err(MarketError::OnlyOwner(addr("stranger")))
    );
}

#[test]
fn test_toggle_is_registry_owner_only() {
    let (mut registry, id) = setup();
    assert_eq!(
        registry.toggle_market(&at("market-owner", 2), id, false),
        Err(MarketError::OnlyRegistryOwner(addr("market-owner")))
    );
    let events = registry.toggle_market(&at("owner", 2), id, false).unwrap();
    assert_eq!(events[0].market, Some(id));
    assert!(!registry.market(id).unwrap().is_enabled());

    // owner setters still work on a disabled market
    assert!(registry.update_epoch_manager(&at("market-owner", 3), id, addr("manager")).is_ok());
}

#[test]
fn test_factory_and_node_registry_updates() {
    let (mut registry, _) = setup();
    assert_eq!(registry.update_factory(&at("owner", 2), Address::ZERO), Err(MarketError::ZeroAddress));
    registry.update_factory(&at("owner", 2), addr("factory-2")).unwrap();
    registry.update_node_registry(&at("owner", 2), addr("nodes")).unwrap();
    assert_eq!(registry.factory(), addr("factory-2"));
    assert_eq!(registry.node_registry(), addr("nodes"));

    // new markets derive their handle from the new factory
    let (id, _) = registry
        .create_market(
            &at("owner", 3),
            MarketParams {
                owner: addr("market-owner"),
                epoch_size: 1,
                source_chain_id: 1,
                source_block_time: 1,
                use_external_counter: true,
            },
        )
        .unwrap();
    assert_eq!(id, 2);
    assert_eq!(
        registry.market(id).unwrap().record().address,
        datamarket::derive_market_address(&addr("factory-2"), 2)
    );
}

#[test]
fn test_deploy_config_round() {
    let raw = format!(
        r#"{{
            "owner": "{owner}",
            "epoch_size": 10,
            "source_chain_id": 137,
            "source_block_time": 20000,
            "epoch_manager": "{manager}",
            "sequencers": ["{seq}"],
            "validators": ["{v1}", "{v2}"],
            "admins": ["{owner}"]
        }}"#,
        owner = addr("owner"),
        manager = addr("manager"),
        seq = addr("seq"),
        v1 = addr("v1"),
        v2 = addr("v2"),
    );
    let config = DeployConfig::from_json(&raw).unwrap();
    let mut registry = MarketRegistry::new(addr("owner"), addr("factory"));

    let (id, _) = config.deploy(&mut registry, &at("owner", 1)).unwrap();
    registry.release_epoch(&at("manager", 2), id, 1, 10).unwrap();
    let root = batch_root_hash(&["c1"]);
    registry
        .submit_batch(&at("seq", 3), id, "b1", 1, &["p1".to_string()], &["c1".to_string()], root)
        .unwrap();
    registry.submit_attestation(&at("v1", 4), id, "b1", 1, root).unwrap();
    registry.submit_attestation(&at("v2", 4), id, "b1", 1, root).unwrap();
    assert_eq!(registry.market(id).unwrap().finalized_snapshot_cid("p1", 1), Some("c1"));

    // a different deployer cannot assign roles on someone else's behalf
    let mut other = MarketRegistry::new(addr("deployer"), addr("factory"));
    assert_eq!(config.deploy(&mut other, &at("deployer", 1)), Err(MarketError::OnlyOwner(addr("deployer"))));
    assert_eq!(other.market_count(), 0);
}

#[test]
fn test_failed_deploy_leaves_registry_untouched() {
    let config = DeployConfig {
        owner: addr("owner"),
        epoch_size: 10,
        source_chain_id: 137,
        source_block_time: 20_000,
        use_external_counter: false,
        epoch_manager: Some(addr("manager")),
        sequencers: vec![addr("seq")],
        validators: vec![addr("v1"), Address::ZERO],
        admins: vec![],
        settings: MarketSettings::default(),
    };
    let mut registry = MarketRegistry::new(addr("owner"), addr("factory"));

    assert_eq!(config.deploy(&mut registry, &at("owner", 1)), Err(MarketError::ZeroAddress));
    assert_eq!(registry.market_count(), 0);
    assert!(registry.journal().is_empty());
}

#[test]
fn test_storage_round_trip() {
    let storage = Storage::temporary().unwrap();
    let (mut registry, id) = setup();
    let mut nodes = InMemoryNodeRegistry::new();
    nodes.assign_slot(7, addr("alice"), addr("runner"));

    let owner = at("market-owner", storage.next_block().unwrap());
    registry.update_epoch_manager(&owner, id, addr("manager")).unwrap();
    registry.update_addresses(&owner, id, Role::Sequencer, &[addr("seq")], &[true]).unwrap();
    registry
        .update_addresses(&owner, id, Role::Validator, &[addr("v1"), addr("v2")], &[true, true])
        .unwrap();
    registry.release_epoch(&at("manager", storage.next_block().unwrap()), id, 1, 10).unwrap();
    let root = [3u8; 32];
    registry
        .submit_batch(
            &at("seq", storage.next_block().unwrap()),
            id,
            "b1",
            1,
            &["p1".to_string()],
            &["c1".to_string()],
            root,
        )
        .unwrap();
    registry.submit_attestation(&at("v1", storage.next_block().unwrap()), id, "b1", 1, root).unwrap();

    let written = storage.commit(&mut registry, &nodes).unwrap();
    assert_eq!(written.len() as u64, storage.event_count().unwrap());
    drop(registry);

    // continue from the persisted state
    let mut restored = storage.load_registry().unwrap().unwrap();
    let tally = restored.market(id).unwrap().consensus().tally("b1").unwrap();
    assert_eq!(tally.count(&root), 1);
    assert!(restored.journal().is_empty());

    restored.submit_attestation(&at("v2", storage.next_block().unwrap()), id, "b1", 1, root).unwrap();
    assert_eq!(
        restored.market(id).unwrap().batches().snapshot_status("p1", 1).unwrap().state,
        SnapshotState::Finalized
    );
    let more = storage.commit(&mut restored, &storage.load_nodes().unwrap()).unwrap();
    assert_eq!(event_names(&more).last(), Some(&"SnapshotBatchFinalized"));

    let all: Vec<Notification> = storage.events_since(0).unwrap();
    assert_eq!(all.len(), written.len() + more.len());
    assert_eq!(storage.events_since(written.len() as u64).unwrap(), more);
    assert_eq!(storage.load_nodes().unwrap().node(7).unwrap().snapshotter, addr("runner"));
}
