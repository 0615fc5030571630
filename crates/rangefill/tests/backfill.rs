//! End-to-end backfill scenarios over the in-memory network.

use std::time::Duration;

use proptest::prelude::*;

use rangefill::SessionPhase;
use rangefill_core::{KeyRange, RangeEnd, StoreKey, Version};
use rangefill_testkit::{generators, pre_atom_for, TestCluster};

fn range(start: &str, end: &str) -> KeyRange {
    KeyRange::new(start.into(), end.into()).unwrap()
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Poll until `cond` holds; panic after a couple of seconds.
async fn eventually(cond: impl Fn() -> bool, what: &str) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}

/// The canonical delta-transfer scenario: the peer already holds the
/// first half of the region, so only the second half crosses the wire.
#[tokio::test]
async fn test_delta_scenario() {
    init_tracing();
    let region = range("a", "z");
    let cluster = TestCluster::new(region.clone()).await.unwrap();
    cluster.seed(&[
        ("b", "apple", 3),
        ("d", "pear", 5),
        ("m", "plum", 6),
        ("r", "fig", 7),
    ]);

    let mut peer = cluster.backfillee().await;
    peer.register(region.clone(), Version(5)).await;

    let hint = pre_atom_for(cluster.store.as_ref(), &range("a", "m")).await;
    peer.send_pre_atoms(range("a", "m"), vec![hint]).await;
    let session = peer.go(region.clone()).await;

    let (atoms, version) = peer.collect_until_done(session).await;
    let keys: Vec<StoreKey> = atoms.iter().map(|a| a.key.clone()).collect();
    assert_eq!(keys, vec!["m".into(), "r".into()]);
    assert_eq!(version, Version(7));

    // Completion merged exactly the session range.
    let handle = cluster.backfiller.peer(&peer.node).unwrap();
    let map = handle.version_map();
    assert_eq!(map.version_at(&"b".into()), Some(Version(7)));
    assert_eq!(map.version_at(&"y".into()), Some(Version(7)));

    // A stop after completion is a silent no-op.
    peer.stop(session).await;
    tokio::time::sleep(Duration::from_millis(30)).await;
    let phase = *handle.session_phase(&session).unwrap().borrow();
    assert_eq!(phase, SessionPhase::Completed);
    assert_eq!(handle.version_map(), map);

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_descriptor_is_pure_and_repeatable() {
    let region = range("a", "z");
    let cluster = TestCluster::new(region.clone()).await.unwrap();

    let first = cluster.backfiller.descriptor();
    let second = cluster.backfiller.descriptor();
    assert_eq!(first, second);
    assert_eq!(first.region, region);

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_registration_lifecycle() {
    let region = range("a", "z");
    let cluster = TestCluster::new(region.clone()).await.unwrap();

    let peer = cluster.backfillee().await;
    peer.register(region.clone(), Version::ZERO).await;
    eventually(|| cluster.backfiller.peer_count() == 1, "registration").await;

    // Re-registration replaces, never duplicates.
    peer.register(range("a", "m"), Version::ZERO).await;
    eventually(
        || {
            cluster
                .backfiller
                .peer(&peer.node)
                .is_some_and(|p| *p.region() == range("a", "m"))
        },
        "re-registration",
    )
    .await;
    assert_eq!(cluster.backfiller.peer_count(), 1);

    peer.deregister().await;
    eventually(|| cluster.backfiller.peer_count() == 0, "deregistration").await;

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_unrelated_branch_is_rejected() {
    let region = range("a", "z");
    let cluster = TestCluster::new(region.clone()).await.unwrap();

    let stranger_branch = cluster.history.register_root();
    let peer = cluster.backfillee_on_branch(stranger_branch).await;
    peer.register(region, Version(3)).await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(cluster.backfiller.peer_count(), 0);

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_diverged_branch_caps_common_version() {
    let region = range("a", "z");
    let cluster = TestCluster::new(region.clone()).await.unwrap();

    let forked = cluster
        .history
        .fork(&cluster.source_branch, Version(4))
        .unwrap();
    let peer = cluster.backfillee_on_branch(forked).await;
    // The peer claims parity up to 9, but its line split off at 4: only
    // data up to the fork can be assumed shared.
    peer.register(region, Version(9)).await;

    eventually(|| cluster.backfiller.peer_count() == 1, "registration").await;
    let handle = cluster.backfiller.peer(&peer.node).unwrap();
    assert_eq!(handle.version_map().version_at(&"m".into()), Some(Version(4)));

    cluster.shutdown().await;
}

/// One slow backfillee must not starve another: peer A never acks and
/// stalls at its credit limit while peer B completes.
#[tokio::test]
async fn test_slow_peer_does_not_starve_others() {
    let region = range("a", "z");
    let config = rangefill::BackfillConfig {
        credit_capacity: 64,
        max_atom_bytes: 32,
        max_batch_bytes: 32,
        scan_page: 4,
        hint_wait: Duration::from_millis(10),
        inbox_depth: 32,
    };
    let cluster = TestCluster::with_config(region.clone(), config).await.unwrap();
    let entries: Vec<(String, String, u64)> = (0..40)
        .map(|i| (format!("k{i:02}"), format!("value-{i}"), i + 1))
        .collect();
    for (k, v, ver) in &entries {
        cluster
            .store
            .insert(k.as_str(), v.as_bytes().to_vec(), Version(*ver));
    }

    let mut slow = cluster.backfillee().await;
    slow.register(region.clone(), Version::ZERO).await;
    let stalled = slow.go(region.clone()).await;

    let mut fast = cluster.backfillee().await;
    fast.register(region.clone(), Version::ZERO).await;
    let session = fast.go(region.clone()).await;
    let (atoms, _) = fast.collect_until_done(session).await;
    assert_eq!(atoms.len(), 40);

    // The slow peer's session is still alive, parked at its credit
    // limit, with in-flight bytes bounded by its own capacity.
    let handle = cluster.backfiller.peer(&slow.node).unwrap();
    assert_eq!(handle.active_session(), Some(stalled));
    let outstanding = handle.session_outstanding(&stalled).unwrap();
    assert!(outstanding <= 64, "outstanding {outstanding} exceeds capacity");

    cluster.shutdown().await;
}

/// Sequential sessions over sub-ranges keep the version map a gap-free
/// partition of the negotiated region.
#[tokio::test]
async fn test_version_map_stays_a_partition() {
    let region = range("a", "z");
    let cluster = TestCluster::new(region.clone()).await.unwrap();
    cluster.seed(&[("c", "1", 2), ("j", "2", 4), ("s", "3", 6)]);

    let mut peer = cluster.backfillee().await;
    peer.register(region.clone(), Version::ZERO).await;

    for sub in [range("a", "g"), range("g", "p"), range("p", "z")] {
        let session = peer.go(sub).await;
        peer.collect_until_done(session).await;
    }

    let handle = cluster.backfiller.peer(&peer.node).unwrap();
    let map = handle.version_map();
    let spans = map.spans();
    assert_eq!(spans.first().unwrap().0.start(), region.start());
    assert_eq!(spans.last().unwrap().0.end(), region.end());
    for pair in spans.windows(2) {
        assert_eq!(
            pair[0].0.end(),
            &RangeEnd::Key(pair[1].0.start().clone()),
            "gap or overlap between version map spans"
        );
    }
    assert_eq!(map.version_at(&"c".into()), Some(Version(2)));
    assert_eq!(map.version_at(&"j".into()), Some(Version(4)));
    assert_eq!(map.version_at(&"s".into()), Some(Version(6)));

    cluster.shutdown().await;
}

/// Shutdown while a session is parked on credit must still unwind
/// everything promptly.
#[tokio::test]
async fn test_shutdown_unwinds_stalled_sessions() {
    init_tracing();
    let region = range("a", "z");
    let config = rangefill::BackfillConfig {
        credit_capacity: 16,
        max_atom_bytes: 16,
        max_batch_bytes: 16,
        scan_page: 4,
        hint_wait: Duration::from_millis(10),
        inbox_depth: 32,
    };
    let cluster = TestCluster::with_config(region.clone(), config).await.unwrap();
    for i in 0..20 {
        cluster
            .store
            .insert(format!("k{i:02}"), "0123456789", Version(i + 1));
    }

    let mut peer = cluster.backfillee().await;
    peer.register(region.clone(), Version::ZERO).await;
    let session = peer.go(region).await;
    // Let the session hit the credit wall, then pull the plug.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let handle = cluster.backfiller.peer(&peer.node).unwrap();

    tokio::time::timeout(Duration::from_secs(2), cluster.shutdown())
        .await
        .expect("shutdown hung on a stalled session");

    let phase = *handle.session_phase(&session).unwrap().borrow();
    assert_eq!(phase, SessionPhase::Interrupted);
    assert_eq!(handle.session_outstanding(&session), Some(0));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Delta correctness under arbitrary store contents: a truthful hint
    /// for the prefix below `split` suppresses exactly that prefix.
    #[test]
    fn prop_truthful_hint_suppresses_exactly_its_range(
        contents in generators::entries(24),
        split in generators::store_key(),
    ) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        rt.block_on(async {
            let region = KeyRange::all();
            let cluster = TestCluster::new(region.clone()).await.unwrap();
            for (key, (value, version)) in &contents {
                cluster.store.insert(key.clone(), value.clone(), *version);
            }

            let mut peer = cluster.backfillee().await;
            peer.register(region.clone(), Version::ZERO).await;

            let hinted = KeyRange::new(StoreKey::min(), split.clone()).unwrap();
            if !hinted.is_empty() {
                let hint = pre_atom_for(cluster.store.as_ref(), &hinted).await;
                peer.send_pre_atoms(hinted, vec![hint]).await;
            }

            let session = peer.go(region).await;
            let (atoms, _) = peer.collect_until_done(session).await;

            let expected: Vec<StoreKey> =
                contents.keys().filter(|k| **k >= split).cloned().collect();
            let got: Vec<StoreKey> = atoms.iter().map(|a| a.key.clone()).collect();
            assert_eq!(got, expected);
            cluster.shutdown().await;
        });
    }
}
