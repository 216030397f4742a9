// SPDX-License-Identifier: MIT OR Apache-2.0
//! Integration tests for rank tracking and internal-id generation.
//!
//! Tests:
//! - Rank follows view changes delivered through the membership notifier
//! - Internal ids stay unique across a view change
//! - Concurrent identity creation never repeats an id
//! - Orphan detection and in-doubt collection after a node leaves

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use grid_tx::{
    collect_in_doubt, InternalId, LocalMembership, MembershipNotifier, TransactionContext,
    TransactionFactory, TxConfig,
};

#[derive(Debug)]
struct Ctx;

impl TransactionContext for Ctx {
    fn context_id(&self) -> u64 {
        0
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("grid_tx=debug")
        .with_test_writer()
        .try_init();
}

fn members(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn recovery_config() -> TxConfig {
    TxConfig::new()
        .with_deadlock_detection(true)
        .with_recovery(true)
        .with_clustered(true)
}

#[test]
fn test_rank_follows_membership() {
    init_tracing();

    let membership = Arc::new(LocalMembership::new("node-b"));
    let notifier: Arc<dyn MembershipNotifier> = membership.clone();
    let factory = TransactionFactory::new(recovery_config()).unwrap();

    // Soft start: no view yet
    factory.start(&notifier).unwrap();
    let before = factory.new_global_identity_from(Some("node-b".into()), false);
    let id = before.internal_id().unwrap();
    assert_eq!((id.view_id, id.rank), (0, 0));

    membership.install_view(members(&["node-a", "node-b", "node-c"]));
    let in_view = factory.new_global_identity_from(Some("node-b".into()), false);
    let id = in_view.internal_id().unwrap();
    assert_eq!((id.view_id, id.rank), (1, 1));

    // node-a leaves, node-b becomes rank 0
    membership.install_view(members(&["node-b", "node-c"]));
    let after = factory.new_global_identity_from(Some("node-b".into()), false);
    let id = after.internal_id().unwrap();
    assert_eq!((id.view_id, id.rank), (2, 0));

    let ids: HashSet<InternalId> = [&before, &in_view, &after]
        .iter()
        .filter_map(|g| g.internal_id())
        .collect();
    assert_eq!(ids.len(), 3);

    factory.stop();
    membership.install_view(members(&["node-c", "node-d", "node-b"]));
    let stopped = factory.new_global_identity_from(Some("node-b".into()), false);
    assert_eq!(stopped.internal_id().unwrap().view_id, 2);
}

#[test]
fn test_view_without_local_node_keeps_rank() {
    let membership = Arc::new(LocalMembership::new("node-c"));
    let notifier: Arc<dyn MembershipNotifier> = membership.clone();
    let factory = TransactionFactory::new(recovery_config()).unwrap();
    factory.start(&notifier).unwrap();

    membership.install_view(members(&["node-a", "node-b", "node-c"]));
    membership.install_view(members(&["node-a", "node-b"]));

    let calc = factory.cluster_id_generator().unwrap().rank_calculator();
    let snap = calc.snapshot();
    assert_eq!(snap.view_id, Some(1));
    assert_eq!(snap.rank, 2);
}

#[test]
fn test_concurrent_identities_unique() {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 2_000;

    let membership = Arc::new(LocalMembership::new("node-a"));
    membership.install_view(members(&["node-a", "node-b"]));
    let notifier: Arc<dyn MembershipNotifier> = membership.clone();

    let factory = Arc::new(TransactionFactory::new(recovery_config()).unwrap());
    factory.start(&notifier).unwrap();

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let factory = Arc::clone(&factory);
            thread::spawn(move || {
                (0..PER_THREAD)
                    .map(|_| factory.new_global_identity_from(Some("node-a".into()), false))
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    // View changes race with creation
    for _ in 0..5 {
        membership.install_view(members(&["node-b", "node-a"]));
    }

    let mut identities = HashSet::new();
    let mut internal_ids = HashSet::new();
    for handle in handles {
        for gtx in handle.join().unwrap() {
            internal_ids.insert(gtx.internal_id().unwrap());
            identities.insert(gtx);
        }
    }
    assert_eq!(identities.len(), THREADS * PER_THREAD);
    assert_eq!(internal_ids.len(), THREADS * PER_THREAD);
    assert_eq!(
        factory.stats().snapshot().internal_ids,
        (THREADS * PER_THREAD) as u64
    );
}

#[test]
fn test_departed_originator() {
    init_tracing();

    let origin = TransactionFactory::new(recovery_config()).unwrap();
    let participant = TransactionFactory::new(recovery_config()).unwrap();

    let gtx = origin.new_global_identity_from(Some("node-a".into()), false);
    let received = participant
        .new_global_identity()
        .materialize(gtx.payload())
        .unwrap();
    let remote = participant.new_remote_transaction(received);
    remote.recovery().unwrap().set_prepared(true).unwrap();

    assert!(!remote.compute_orphan(&members(&["node-a", "node-b"])));
    assert!(remote.compute_orphan(&members(&["node-b"])));

    // The originator's own view of the same transaction
    let local = origin.new_local_transaction(Arc::new(Ctx), gtx);
    local.set_prepared(true).unwrap();
    let in_doubt = collect_in_doubt([&local]);
    assert_eq!(in_doubt.len(), 1);
    assert!(in_doubt[0].awaiting_decision());

    local.recovery().unwrap().mark_committed().unwrap();
    assert!(collect_in_doubt([&local]).is_empty());
}
