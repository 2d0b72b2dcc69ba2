//! Branches talking to each other over loopback TCP. Each branch advertises
//! to its own unicast port so that only `connect_to` links them.

use std::io::Write;
use std::net::{Ipv4Addr, SocketAddr, TcpStream, UdpSocket};
use std::sync::mpsc;
use std::time::{Duration as StdDuration, Instant};

use serde_json::{json, Value};
use yogi_core::wire::{encode_advertising, encode_info, Advertisement};
use yogi_runtime::{
    Branch, BranchEvent, BranchEvents, Context, Duration, ErrorCode, EventOutcome,
};

const WAIT: StdDuration = StdDuration::from_secs(10);

fn free_udp_port() -> u16 {
    UdpSocket::bind((Ipv4Addr::LOCALHOST, 0))
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn props(name: &str, extra: Value) -> Value {
    let mut props = json!({
        "name": name,
        "network_name": "yogi-test",
        "advertising_address": "127.0.0.1",
        "advertising_port": free_udp_port(),
    });
    if let (Value::Object(p), Value::Object(e)) = (&mut props, extra) {
        p.extend(e);
    }
    props
}

fn background_context() -> Context {
    let ctx = Context::new().unwrap();
    ctx.run_in_background().unwrap();
    ctx
}

fn endpoint(branch: &Branch) -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, branch.info().identity.tcp_server_port))
}

fn advertising_endpoint(branch: &Branch) -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, branch.info().network.advertising_port))
}

fn advertisement_of(branch: &Branch) -> [u8; 25] {
    encode_advertising(&Advertisement {
        uuid: branch.uuid(),
        tcp_port: endpoint(branch).port(),
    })
}

fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(StdDuration::from_millis(20));
    }
    cond()
}

fn subscribe(branch: &Branch, mask: BranchEvents) -> mpsc::Receiver<EventOutcome> {
    let (tx, rx) = mpsc::channel();
    branch.await_event(mask, 10_000, move |outcome| {
        let _ = tx.send(outcome);
    });
    rx
}

fn next_event(rx: &mpsc::Receiver<EventOutcome>) -> (BranchEvent, String, yogi_runtime::Result<()>) {
    match rx.recv_timeout(WAIT).expect("no event delivered") {
        EventOutcome::Event { event, json, result } => (event, json, result),
        other => panic!("unexpected outcome {:?}", other),
    }
}

#[test]
fn connect_to_links_both_branches() {
    let ctx = background_context();
    let a = Branch::new(&ctx, &props("a", json!({}))).unwrap();
    let b = Branch::new(&ctx, &props("b", json!({"path": "/plant/b"}))).unwrap();

    a.connect_to(endpoint(&b));
    assert!(wait_until(|| a.connected_branches().unwrap().contains_key(&b.uuid())));
    assert!(wait_until(|| b.connected_branches().unwrap().contains_key(&a.uuid())));

    let remote = &a.connected_branches().unwrap()[&b.uuid()];
    assert_eq!(remote.name, "b");
    assert_eq!(remote.path, "/plant/b");
    assert_eq!(remote.network_name, "yogi-test");
    ctx.stop();
}

#[test]
fn connect_finished_is_reported() {
    let ctx = background_context();
    let a = Branch::new(&ctx, &props("a", json!({}))).unwrap();
    let b = Branch::new(&ctx, &props("b", json!({}))).unwrap();
    let events = subscribe(&b, BranchEvents::CONNECT_FINISHED);

    a.connect_to(endpoint(&b));
    let (event, json, result) = next_event(&events);
    assert_eq!(event, BranchEvent::ConnectFinished { uuid: a.uuid() });
    assert!(result.is_ok());
    let json: Value = serde_json::from_str(&json).unwrap();
    assert_eq!(json["uuid"], a.uuid().to_string());
    ctx.stop();
}

#[test]
fn queried_event_carries_remote_info() {
    let ctx = background_context();
    let a = Branch::new(&ctx, &props("a", json!({"description": "first"}))).unwrap();
    let b = Branch::new(&ctx, &props("b", json!({}))).unwrap();
    let events = subscribe(&b, BranchEvents::BRANCH_QUERIED);

    a.connect_to(endpoint(&b));
    let (event, json, result) = next_event(&events);
    assert!(result.is_ok());
    match event {
        BranchEvent::BranchQueried { uuid, info } => {
            assert_eq!(uuid, a.uuid());
            assert_eq!(info.unwrap().description, "first");
        }
        other => panic!("unexpected event {:?}", other),
    }
    let json: Value = serde_json::from_str(&json).unwrap();
    assert_eq!(json["name"], "a");
    ctx.stop();
}

fn expect_rejection(a_extra: Value, b_extra: Value, expected: ErrorCode) {
    let ctx = background_context();
    let a = Branch::new(&ctx, &props("a", a_extra)).unwrap();
    let b = Branch::new(&ctx, &props("b", b_extra)).unwrap();
    let a_events = subscribe(&a, BranchEvents::CONNECT_FINISHED);
    let b_events = subscribe(&b, BranchEvents::CONNECT_FINISHED);

    a.connect_to(endpoint(&b));
    let (event, _, result) = next_event(&a_events);
    assert_eq!(event.uuid(), b.uuid());
    assert_eq!(result.unwrap_err().code(), expected);
    let (event, _, result) = next_event(&b_events);
    assert_eq!(event.uuid(), a.uuid());
    assert_eq!(result.unwrap_err().code(), expected);

    assert!(a.connected_branches().unwrap().is_empty());
    assert!(b.connected_branches().unwrap().is_empty());
    ctx.stop();
}

#[test]
fn password_mismatch() {
    expect_rejection(
        json!({"network_password": "secret"}),
        json!({"network_password": "other"}),
        ErrorCode::PasswordMismatch,
    );
}

#[test]
fn network_name_mismatch() {
    expect_rejection(
        json!({"network_name": "one"}),
        json!({"network_name": "two"}),
        ErrorCode::NetNameMismatch,
    );
}

#[test]
fn duplicate_branch_path() {
    expect_rejection(
        json!({"path": "/same"}),
        json!({"path": "/same"}),
        ErrorCode::DuplicateBranchPath,
    );
}

#[test]
fn connecting_to_itself_is_a_loopback() {
    let ctx = background_context();
    let a = Branch::new(&ctx, &props("a", json!({}))).unwrap();
    let events = subscribe(&a, BranchEvents::CONNECT_FINISHED);

    a.connect_to(endpoint(&a));
    let (event, _, result) = next_event(&events);
    assert_eq!(event.uuid(), a.uuid());
    assert_eq!(result.unwrap_err().code(), ErrorCode::LoopbackConnection);
    assert!(a.connected_branches().unwrap().is_empty());
    ctx.stop();
}

#[test]
fn accepted_loopback_is_dropped_silently() {
    let ctx = background_context();
    let a = Branch::new(&ctx, &props("a", json!({}))).unwrap();
    let events = subscribe(&a, BranchEvents::CONNECT_FINISHED);

    // A client presenting a's own identity looks like the accepting half of a
    // self-connection; only the dialing half reports it.
    let mut stream = TcpStream::connect(endpoint(&a)).unwrap();
    stream.write_all(&encode_info(&a.info().identity).unwrap()).unwrap();
    std::thread::sleep(StdDuration::from_millis(300));
    assert!(events.try_recv().is_err());
    assert!(a.connected_branches().unwrap().is_empty());
    ctx.stop();
}

#[test]
fn advertisements_are_filtered_then_discovered() {
    let ctx = background_context();
    let a = Branch::new(&ctx, &props("a", json!({}))).unwrap();
    let b = Branch::new(&ctx, &props("b", json!({}))).unwrap();
    let events = subscribe(&a, BranchEvents::ALL);
    let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();

    let own = advertisement_of(&a);
    let mut bad_magic = advertisement_of(&b);
    bad_magic[0] = b'X';
    let datagrams: [&[u8]; 3] = [&own, b"not an advertisement", &bad_magic];
    for datagram in datagrams {
        socket.send_to(datagram, advertising_endpoint(&a)).unwrap();
    }
    std::thread::sleep(StdDuration::from_millis(200));
    assert!(events.try_recv().is_err());
    assert!(a.connected_branches().unwrap().is_empty());

    socket.send_to(&advertisement_of(&b), advertising_endpoint(&a)).unwrap();
    let (event, _, result) = next_event(&events);
    assert!(result.is_ok());
    assert_eq!(
        event,
        BranchEvent::BranchDiscovered {
            uuid: b.uuid(),
            tcp_server_address: "127.0.0.1".into(),
            tcp_server_port: endpoint(&b).port(),
        }
    );

    if b.uuid() > a.uuid() {
        assert!(wait_until(|| a.connected_branches().unwrap().contains_key(&b.uuid())));
    } else {
        // The lower uuid dials, so a waits for b.
        std::thread::sleep(StdDuration::from_millis(300));
        assert!(a.connected_branches().unwrap().is_empty());
        socket.send_to(&advertisement_of(&a), advertising_endpoint(&b)).unwrap();
        assert!(wait_until(|| a.connected_branches().unwrap().contains_key(&b.uuid())));
    }
    assert!(wait_until(|| b.connected_branches().unwrap().contains_key(&a.uuid())));
    ctx.stop();
}

#[test]
fn ghost_queries_without_connecting() {
    let ctx = background_context();
    let a = Branch::new(&ctx, &props("a", json!({}))).unwrap();
    let ghost = Branch::new(&ctx, &props("ghost", json!({"ghost_mode": true}))).unwrap();
    let events = subscribe(&a, BranchEvents::BRANCH_QUERIED);

    ghost.connect_to(endpoint(&a));
    let (event, _, result) = next_event(&events);
    assert!(result.is_ok());
    assert_eq!(event.uuid(), ghost.uuid());

    std::thread::sleep(StdDuration::from_millis(200));
    assert!(a.connected_branches().unwrap().is_empty());
    assert!(ghost.connected_branches().unwrap().is_empty());
    ctx.stop();
}

#[test]
fn dropped_branch_is_reported_lost() {
    let ctx = background_context();
    let a = Branch::new(&ctx, &props("a", json!({}))).unwrap();
    let b = Branch::new(&ctx, &props("b", json!({}))).unwrap();
    a.connect_to(endpoint(&b));
    assert!(wait_until(|| a.connected_branches().unwrap().len() == 1));

    let events = subscribe(&a, BranchEvents::CONNECTION_LOST);
    let b_uuid = b.uuid();
    drop(b);
    let (event, _, result) = next_event(&events);
    assert_eq!(event, BranchEvent::ConnectionLost { uuid: b_uuid });
    assert!(result.is_err());
    assert!(wait_until(|| a.connected_branches().unwrap().is_empty()));
    ctx.stop();
}

#[test]
fn connected_branches_does_not_depend_on_buffer_hint() {
    let ctx = background_context();
    let a = Branch::new(&ctx, &props("a", json!({}))).unwrap();
    let b = Branch::new(&ctx, &props("b", json!({}))).unwrap();
    let c = Branch::new(&ctx, &props("c", json!({}))).unwrap();
    a.connect_to(endpoint(&b));
    a.connect_to(endpoint(&c));
    assert!(wait_until(|| a.connected_branches().unwrap().len() == 2));

    let small = a.connected_branches_with_hint(1).unwrap();
    let large = a.connected_branches_with_hint(1 << 20).unwrap();
    assert_eq!(small, large);
    assert!(small.contains_key(&c.uuid()));
    ctx.stop();
}

#[test]
fn info_round_trips_configuration() {
    let ctx = Context::new().unwrap();
    let a = Branch::new(
        &ctx,
        &props(
            "My Branch",
            json!({
                "description": "Stuff",
                "path": "/some/path",
                "advertising_interval": 0.5,
                "timeout": 2.25,
                "tx_queue_size": 40000,
            }),
        ),
    )
    .unwrap();
    let info = a.info();
    assert_eq!(info.identity.uuid, a.uuid());
    assert_eq!(info.identity.name, "My Branch");
    assert_eq!(info.identity.description, "Stuff");
    assert_eq!(info.identity.path, "/some/path");
    assert_eq!(info.identity.advertising_interval, Duration::from_millis(500));
    assert_eq!(info.identity.timeout, Duration::from_millis(2250));
    assert_eq!(info.identity.pid, std::process::id());
    assert_ne!(info.identity.tcp_server_port, 0);
    assert_eq!(info.network.advertising_address, "127.0.0.1");
    assert_eq!(info.network.tx_queue_size, 40000);

    let json = info.to_json();
    assert_eq!(json["advertising_interval"], 0.5);
    assert_eq!(json["timeout"], 2.25);
    assert_eq!(json["uuid"], a.uuid().to_string());
}

#[test]
fn invalid_properties_are_rejected() {
    let ctx = Context::new().unwrap();
    let err = Branch::new(&ctx, &props("a", json!({"path": "relative"}))).unwrap_err();
    assert_eq!(err.code(), ErrorCode::ConfigNotValid);
    let err = Branch::new(&ctx, &props("a", json!({"colour": "red"}))).unwrap_err();
    assert_eq!(err.code(), ErrorCode::ConfigNotValid);
    let err = Branch::new(&ctx, &props("a", json!({"tx_queue_size": 10}))).unwrap_err();
    assert_eq!(err.code(), ErrorCode::ConfigNotValid);
}

#[test]
fn newer_wait_cancels_older_one() {
    let ctx = Context::new().unwrap();
    let a = Branch::new(&ctx, &props("a", json!({}))).unwrap();
    let first = subscribe(&a, BranchEvents::ALL);
    let second = subscribe(&a, BranchEvents::ALL);
    ctx.poll();
    assert_eq!(first.try_recv().unwrap(), EventOutcome::Canceled);
    assert!(second.try_recv().is_err());

    assert!(a.cancel_await_event());
    assert!(!a.cancel_await_event());
    ctx.poll();
    assert_eq!(second.try_recv().unwrap(), EventOutcome::Canceled);
    assert!(first.try_recv().is_err());
    assert!(second.try_recv().is_err());
}

#[test]
fn dropping_branch_cancels_wait() {
    let ctx = Context::new().unwrap();
    let a = Branch::new(&ctx, &props("a", json!({}))).unwrap();
    let events = subscribe(&a, BranchEvents::ALL);
    drop(a);
    ctx.poll();
    assert_eq!(events.try_recv().unwrap(), EventOutcome::Canceled);
}

#[test]
#[ignore = "needs a multicast-capable network interface"]
fn multicast_discovery() {
    let ctx = background_context();
    let network = format!("yogi-test-{}", std::process::id());
    let port = free_udp_port();
    let make = |name: &str| {
        Branch::new(
            &ctx,
            &json!({
                "name": name,
                "network_name": network,
                "advertising_address": "ff31::8000:2439",
                "advertising_port": port,
                "advertising_interval": 0.1,
            }),
        )
        .unwrap()
    };
    let a = make("a");
    let b = make("b");
    assert!(wait_until(|| a.connected_branches().unwrap().contains_key(&b.uuid())));
    assert!(wait_until(|| b.connected_branches().unwrap().contains_key(&a.uuid())));
    ctx.stop();
}
