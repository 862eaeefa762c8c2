//! Session-manager behavior: placement, cascade wiring and failure
//! handling against a scripted bridge transport.

mod common;

use std::sync::Arc;

use parking_lot::Mutex;

use focus_core::bridge::{BridgeId, BridgeSelector};
use focus_core::colibri::{
    AllocationFailure, AllocationRequest, ColibriSessionEvent, ColibriSessionManager,
    DirectiveOp, DtlsSetup, MeetingId,
};
use focus_core::config::FocusConfig;
use focus_core::source::{
    EndpointId, EndpointSourceSet, MediaType, Msid, Source, SourceGroup, Ssrc,
};

use common::{fleet_registry, MockBridgeTransport};

fn manager(
    transport: Arc<MockBridgeTransport>,
    registry: Arc<focus_core::bridge::BridgeRegistry>,
) -> ColibriSessionManager {
    let config = Arc::new(FocusConfig::default());
    let selector = Arc::new(BridgeSelector::new(config.clone()));
    ColibriSessionManager::new(
        config,
        registry,
        selector,
        transport,
        MeetingId::generate(),
    )
}

fn allocation(endpoint: &str, region: &str) -> AllocationRequest {
    AllocationRequest {
        endpoint_id: EndpointId::from(endpoint),
        region: Some(region.to_string()),
        visitor: false,
        sources: EndpointSourceSet::new(),
        use_sctp: false,
    }
}

fn camera_sources(ssrc: u32) -> EndpointSourceSet {
    EndpointSourceSet::from_parts(
        vec![
            Source::new(Ssrc(ssrc), MediaType::Video)
                .with_cname("c")
                .with_msid(Msid::new("s", "t")),
            Source::new(Ssrc(ssrc + 1), MediaType::Video)
                .with_cname("c")
                .with_msid(Msid::new("s", "t2")),
        ],
        vec![SourceGroup::fid(Ssrc(ssrc), Ssrc(ssrc + 1))],
    )
}

#[tokio::test]
async fn test_two_participants_same_region_share_one_session() {
    let transport = MockBridgeTransport::new();
    let manager = manager(transport.clone(), fleet_registry());

    let first = manager.allocate(allocation("e1", "eu")).await.unwrap();
    assert_eq!(first.bridge, BridgeId::from("b1"));
    assert!(first.transport.ufrag.is_some());

    let second = manager.allocate(allocation("e2", "eu")).await.unwrap();
    assert_eq!(second.bridge, BridgeId::from("b1"));
    assert_eq!(second.session_id, first.session_id);

    assert_eq!(manager.session_count().await, 1);
    let participants = manager.participants_of(&BridgeId::from("b1")).await;
    assert_eq!(participants.len(), 2);

    // Only the first request carries the create directive.
    let requests = transport.requests_to(&BridgeId::from("b1"));
    assert!(requests[0].create);
    assert!(requests.iter().skip(1).all(|r| !r.create));
    // No relays anywhere.
    assert!(requests.iter().all(|r| r.relays.is_empty()));
}

#[tokio::test]
async fn test_cascade_across_regions_creates_relay_pair() {
    let transport = MockBridgeTransport::new();
    let manager = manager(transport.clone(), fleet_registry());

    let first = manager.allocate(allocation("e1", "eu")).await.unwrap();
    assert_eq!(first.bridge, BridgeId::from("b1"));

    let second = manager.allocate(allocation("e2", "us")).await.unwrap();
    assert_eq!(second.bridge, BridgeId::from("b3"));

    assert_eq!(manager.session_count().await, 2);
    let cascade = manager.cascade_snapshot().await;
    assert!(cascade.path_exists(&BridgeId::from("b1"), &BridgeId::from("b3")));

    // Opposite initiator flags at the two ends.
    let snapshots = manager.session_snapshots().await;
    let b1 = snapshots.iter().find(|s| s.bridge == "b1").unwrap();
    let b3 = snapshots.iter().find(|s| s.bridge == "b3").unwrap();
    assert_eq!(b1.relays.len(), 1);
    assert_eq!(b3.relays.len(), 1);
    assert_ne!(b1.relays[0].initiator, b3.relays[0].initiator);
    assert!(b1.relays[0].active && b3.relays[0].active);

    // b1 sees one local endpoint and learns about the remote one.
    assert_eq!(b1.participants, vec!["e1".to_string()]);
    assert_eq!(b3.participants, vec!["e2".to_string()]);

    let b1_requests = transport.requests_to(&BridgeId::from("b1"));
    let relay_create = b1_requests
        .iter()
        .flat_map(|r| r.relays.iter())
        .find(|r| r.op == DirectiveOp::Create)
        .expect("relay create on b1");
    assert_eq!(relay_create.initiator, Some(true));
    assert_eq!(relay_create.id, "r-b3");

    // The responder receives the initiator's transport with actpass
    // fingerprints rewritten to active.
    let b3_requests = transport.requests_to(&BridgeId::from("b3"));
    let responder_create = b3_requests
        .iter()
        .flat_map(|r| r.relays.iter())
        .find(|r| r.op == DirectiveOp::Create)
        .expect("relay create on b3");
    assert_eq!(responder_create.initiator, Some(false));
    let forwarded = responder_create.transport.as_ref().expect("forwarded transport");
    assert!(forwarded.fingerprints.iter().all(|f| f.setup == DtlsSetup::Active));
    let remote_ids: Vec<&str> =
        responder_create.remote_endpoints.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(remote_ids, vec!["e1"]);

    // The initiator then gets the responder's transport as passive.
    let relay_modify = b1_requests
        .iter()
        .flat_map(|r| r.relays.iter())
        .find(|r| r.op == DirectiveOp::Modify && r.transport.is_some())
        .expect("relay modify on b1");
    let returned = relay_modify.transport.as_ref().unwrap();
    assert!(returned.fingerprints.iter().all(|f| f.setup == DtlsSetup::Passive));
}

#[tokio::test]
async fn test_bridge_error_fails_session_and_reports_endpoints() {
    let transport = MockBridgeTransport::new();
    let registry = fleet_registry();
    let manager = manager(transport.clone(), registry.clone());

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    manager.subscribe("test", move |e| sink.lock().push(e.clone()));

    manager.allocate(allocation("e1", "eu")).await.unwrap();
    manager.allocate(allocation("e2", "eu")).await.unwrap();

    // The bridge starts rejecting updates.
    transport.fail_bridge(&BridgeId::from("b1"));
    manager
        .update_sources(&EndpointId::from("e1"), camera_sources(100))
        .await;

    let recorded = events.lock().clone();
    let Some(ColibriSessionEvent::SessionFailed { bridge, endpoints }) = recorded.first() else {
        panic!("expected SessionFailed, got {:?}", recorded);
    };
    assert_eq!(*bridge, BridgeId::from("b1"));
    let mut ids: Vec<&str> = endpoints.iter().map(|e| e.as_str()).collect();
    ids.sort();
    assert_eq!(ids, vec!["e1", "e2"]);
    assert_eq!(manager.session_count().await, 0);

    // A fresh allocation lands on the next best bridge with create set.
    let fresh = manager.allocate(allocation("e1", "eu")).await.unwrap();
    assert_eq!(fresh.bridge, BridgeId::from("b2"));
    let requests = transport.requests_to(&BridgeId::from("b2"));
    assert!(requests[0].create);
}

#[tokio::test]
async fn test_unreachable_bridge_marked_non_operational() {
    let transport = MockBridgeTransport::new();
    let registry = fleet_registry();
    let manager = manager(transport.clone(), registry.clone());

    transport.make_unreachable(&BridgeId::from("b1"));
    let err = manager.allocate(allocation("e1", "eu")).await.unwrap_err();
    assert!(matches!(err, AllocationFailure::BridgeFailed { restart: true, .. }));
    assert!(!registry.get(&BridgeId::from("b1")).unwrap().operational);

    // The next attempt avoids the dead bridge.
    let allocation = manager.allocate(allocation("e1", "eu")).await.unwrap();
    assert_eq!(allocation.bridge, BridgeId::from("b2"));
}

#[tokio::test]
async fn test_expire_is_idempotent_and_expires_empty_session() {
    let transport = MockBridgeTransport::new();
    let manager = manager(transport.clone(), fleet_registry());

    manager.allocate(allocation("e1", "eu")).await.unwrap();
    assert_eq!(manager.session_count().await, 1);

    manager.expire_participant(&EndpointId::from("e1")).await;
    assert_eq!(manager.session_count().await, 0);

    let before = transport.request_count();
    manager.expire_participant(&EndpointId::from("e1")).await;
    // The second expire is a local no-op.
    assert_eq!(transport.request_count(), before);
}

#[tokio::test]
async fn test_force_mute_coalesced_per_session() {
    let transport = MockBridgeTransport::new();
    let manager = manager(transport.clone(), fleet_registry());

    manager.allocate(allocation("e1", "eu")).await.unwrap();
    manager.allocate(allocation("e2", "eu")).await.unwrap();

    let before = transport.request_count();
    manager
        .set_force_mute(vec![
            (EndpointId::from("e1"), Some(true), None),
            (EndpointId::from("e2"), Some(true), Some(true)),
        ])
        .await;

    // Both endpoints share one session, so exactly one request.
    assert_eq!(transport.request_count(), before + 1);
    let last = transport.requests.lock().last().cloned().unwrap();
    assert_eq!(last.endpoints.len(), 2);
    assert!(last.endpoints.iter().all(|d| d.audio_force_muted == Some(true)));
}

#[tokio::test]
async fn test_disposed_manager_rejects_allocations() {
    let transport = MockBridgeTransport::new();
    let manager = manager(transport.clone(), fleet_registry());

    manager.allocate(allocation("e1", "eu")).await.unwrap();
    manager.dispose().await;

    let err = manager.allocate(allocation("e2", "eu")).await.unwrap_err();
    assert_eq!(err, AllocationFailure::Disposed);
}

#[tokio::test]
async fn test_bridges_down_returns_affected_endpoints() {
    let transport = MockBridgeTransport::new();
    let manager = manager(transport.clone(), fleet_registry());

    manager.allocate(allocation("e1", "eu")).await.unwrap();
    manager.allocate(allocation("e2", "us")).await.unwrap();
    assert_eq!(manager.session_count().await, 2);

    let affected = manager.bridges_down(&[BridgeId::from("b1")]).await;
    assert_eq!(affected, vec![EndpointId::from("e1")]);
    assert_eq!(manager.session_count().await, 1);

    let cascade = manager.cascade_snapshot().await;
    assert!(!cascade.contains(&BridgeId::from("b1")));
}
