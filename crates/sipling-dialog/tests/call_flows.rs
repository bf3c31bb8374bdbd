// sipling - a signalling-only SIP user agent client
// Copyright (C) 2025 The sipling Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! End-to-end call flows against a scripted UDP peer on loopback.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use smol_str::SmolStr;
use tokio::net::UdpSocket;
use tokio::time::timeout;

use sipling_core::{parse_msg, Addr, Method, Msg, Payload, Uri, Via};
use sipling_dialog::{Dialog, DialogError, DialogStatus, Manager, ManagerConfig};
use sipling_dns::StaticResolver;
use sipling_sdp::{Codec, Sdp};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

async fn udp_peer() -> (UdpSocket, SocketAddr) {
    let sock = UdpSocket::bind("127.0.0.1:0").await.expect("bind peer");
    let addr = sock.local_addr().expect("peer addr");
    (sock, addr)
}

async fn recv_from(sock: &UdpSocket) -> (Msg, SocketAddr) {
    let mut buf = [0u8; 2048];
    let (amount, src) = timeout(RECV_TIMEOUT, sock.recv_from(&mut buf))
        .await
        .expect("timed out waiting for a packet")
        .expect("recv");
    let msg = parse_msg(&buf[..amount]).expect("peer failed to parse packet");
    (msg, src)
}

/// Receives until the predicate matches, absorbing retransmitted duplicates.
async fn recv_matching<F>(sock: &UdpSocket, mut pred: F) -> (Msg, SocketAddr)
where
    F: FnMut(&Msg) -> bool,
{
    loop {
        let (msg, src) = recv_from(sock).await;
        if pred(&msg) {
            return (msg, src);
        }
    }
}

async fn send_to(sock: &UdpSocket, msg: &Msg, to: SocketAddr) {
    sock.send_to(&msg.to_bytes(), to).await.expect("peer send");
}

async fn expect_silence(sock: &UdpSocket, window: Duration) {
    let mut buf = [0u8; 2048];
    if let Ok(received) = timeout(window, sock.recv_from(&mut buf)).await {
        let (amount, _) = received.expect("recv");
        panic!(
            "expected silence, got: {}",
            String::from_utf8_lossy(&buf[..amount])
        );
    }
}

async fn expect_state(dialog: &mut Dialog, expected: DialogStatus) {
    let state = timeout(RECV_TIMEOUT, dialog.on_state.recv())
        .await
        .expect("timed out waiting for a state transition")
        .expect("state stream closed early");
    assert_eq!(state, expected);
}

async fn expect_closed(dialog: &mut Dialog) {
    let state = timeout(RECV_TIMEOUT, dialog.on_state.recv())
        .await
        .expect("timed out waiting for the state stream to close");
    assert_eq!(state, None);
}

async fn expect_err(dialog: &mut Dialog) -> DialogError {
    timeout(RECV_TIMEOUT, dialog.on_err.recv())
        .await
        .expect("timed out waiting for an error event")
        .expect("error stream closed early")
}

/// Run tests with `RUST_LOG=sipling_dialog=debug` to watch the signalling.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

async fn quiet_manager() -> Manager {
    manager_with(ManagerConfig::new()).await
}

async fn manager_with(config: ManagerConfig) -> Manager {
    init_tracing();
    // A long resend interval keeps retransmissions out of happy-path flows.
    Manager::new(
        config
            .listen_string("127.0.0.1:0")
            .resend_interval(Duration::from_secs(2)),
    )
    .await
    .expect("manager")
}

fn invite_to(addr: SocketAddr) -> Msg {
    Msg::request(
        Method::Invite,
        Uri::parse(&format!("sip:bob@{addr}")).expect("uri"),
    )
}

fn test_sdp() -> Sdp {
    Sdp::audio(
        "127.0.0.1:30000".parse().unwrap(),
        vec![Codec::from_payload_type(0).unwrap()],
    )
}

/// Mirrors a request into a response the way a remote UA would.
fn respond(req: &Msg, code: u16) -> Msg {
    let mut resp = Msg::response(code);
    resp.via = req.via.clone();
    resp.from = req.from.clone();
    resp.to = req.to.clone();
    resp.call_id = req.call_id.clone();
    resp.cseq = req.cseq;
    resp.cseq_method = req.cseq_method.clone();
    resp
}

/// A 200 answering an INVITE: To tag, Contact, and optionally an SDP body.
fn answer(req: &Msg, to_tag: &str, contact_addr: SocketAddr, with_sdp: bool) -> Msg {
    let mut resp = respond(req, 200);
    let mut to = resp.to.take().expect("invite had a to");
    to.params.push("tag", Some(SmolStr::new(to_tag)));
    resp.to = Some(to);
    resp.contact = Some(Addr::parse(&format!("<sip:bob@{contact_addr}>")).unwrap());
    if with_sdp {
        resp.payload = Payload::Sdp(test_sdp());
    }
    resp
}

/// An in-dialog request from the peer's side of an answered call.
fn peer_request(method: Method, invite: &Msg, to_tag: &str, peer: SocketAddr, cseq: u32) -> Msg {
    let contact = invite.contact.as_ref().expect("invite has contact");
    let mut msg = Msg::request(method.clone(), contact.uri.clone());
    msg.via.push(
        Via::parse(&format!(
            "SIP/2.0/UDP 127.0.0.1:{};branch=z9hG4bKpeer{}",
            peer.port(),
            cseq
        ))
        .unwrap(),
    );
    let mut from = invite.to.clone().expect("invite has to");
    if from.tag().is_none() {
        from.params.push("tag", Some(SmolStr::new(to_tag)));
    }
    msg.from = Some(from);
    msg.to = invite.from.clone();
    msg.call_id = invite.call_id.clone();
    msg.cseq = cseq;
    msg.cseq_method = Some(method);
    msg.max_forwards = 70;
    msg
}

#[tokio::test]
async fn simple_call() {
    let (peer, peer_addr) = udp_peer().await;
    let manager = quiet_manager().await;
    let mut dialog = manager.new_dialog(invite_to(peer_addr)).unwrap();

    let (invite, manager_addr) = recv_from(&peer).await;
    assert_eq!(invite.method, Some(Method::Invite));
    assert!(invite.via[0].branch().unwrap().starts_with("z9hG4bK"));
    assert!(invite.from.as_ref().unwrap().tag().is_some());
    assert!(!invite.call_id.is_empty());
    // Max-Forwards decremented on the way out.
    assert_eq!(invite.max_forwards, 69);

    send_to(&peer, &respond(&invite, 100), manager_addr).await;
    expect_state(&mut dialog, DialogStatus::Proceeding).await;

    send_to(&peer, &respond(&invite, 180), manager_addr).await;
    expect_state(&mut dialog, DialogStatus::Ringing).await;

    send_to(&peer, &answer(&invite, "peer-tag", peer_addr, true), manager_addr).await;
    expect_state(&mut dialog, DialogStatus::Answered).await;

    // The peer's session description is surfaced exactly once.
    let sdp = timeout(RECV_TIMEOUT, dialog.on_peer.recv())
        .await
        .expect("timed out waiting for peer sdp")
        .expect("peer stream closed early");
    assert_eq!(sdp.addr.as_str(), "127.0.0.1");
    assert_eq!(sdp.media[0].port, 30000);

    // The 200 is ACKed end to end, to the Contact we advertised.
    let (ack, _) = recv_matching(&peer, |m| m.method == Some(Method::Ack)).await;
    assert_eq!(ack.cseq, invite.cseq);
    assert_eq!(ack.request.as_ref().unwrap().host.as_str(), "127.0.0.1");
    assert_eq!(ack.request.as_ref().unwrap().port, peer_addr.port());

    // Peer hangs up.
    let bye = peer_request(Method::Bye, &invite, "peer-tag", peer_addr, 1);
    send_to(&peer, &bye, manager_addr).await;
    let (reply, _) = recv_matching(&peer, |m| m.is_response()).await;
    assert_eq!(reply.status, 200);
    assert_eq!(reply.cseq_method, Some(Method::Bye));

    expect_state(&mut dialog, DialogStatus::Hangup).await;
    expect_closed(&mut dialog).await;
    assert!(dialog.on_err.recv().await.is_none());
    assert!(dialog.on_peer.recv().await.is_none());
}

#[tokio::test]
async fn caller_hangup_before_answer_sends_cancel() {
    let (peer, peer_addr) = udp_peer().await;
    let manager = quiet_manager().await;
    let mut dialog = manager.new_dialog(invite_to(peer_addr)).unwrap();

    let (invite, manager_addr) = recv_from(&peer).await;
    send_to(&peer, &respond(&invite, 100), manager_addr).await;
    expect_state(&mut dialog, DialogStatus::Proceeding).await;

    dialog.hangup();
    // A second trigger must be a silent no-op.
    dialog.hangup();

    let (cancel, _) = recv_matching(&peer, |m| m.method == Some(Method::Cancel)).await;
    assert_eq!(cancel.cseq, invite.cseq);
    assert_eq!(cancel.cseq_method, Some(Method::Cancel));
    // CANCEL shares the INVITE's transaction branch.
    assert_eq!(cancel.via[0].branch(), invite.via[0].branch());

    send_to(&peer, &respond(&cancel, 200), manager_addr).await;
    expect_state(&mut dialog, DialogStatus::Hangup).await;
    expect_closed(&mut dialog).await;

    // Exactly one CANCEL went out.
    expect_silence(&peer, Duration::from_millis(300)).await;
}

#[tokio::test]
async fn caller_hangup_after_answer_sends_bye() {
    let (peer, peer_addr) = udp_peer().await;
    let manager = quiet_manager().await;
    let mut dialog = manager.new_dialog(invite_to(peer_addr)).unwrap();

    let (invite, manager_addr) = recv_from(&peer).await;
    send_to(&peer, &answer(&invite, "peer-tag", peer_addr, false), manager_addr).await;
    expect_state(&mut dialog, DialogStatus::Answered).await;
    let (_ack, _) = recv_matching(&peer, |m| m.method == Some(Method::Ack)).await;

    dialog.hangup();

    let (bye, _) = recv_matching(&peer, |m| m.method == Some(Method::Bye)).await;
    // BYE continues the dialog's CSeq sequence.
    assert_eq!(bye.cseq, invite.cseq + 1);
    assert_eq!(bye.request.as_ref().unwrap().port, peer_addr.port());
    assert_eq!(bye.to.as_ref().unwrap().tag(), Some("peer-tag"));

    send_to(&peer, &respond(&bye, 200), manager_addr).await;
    expect_state(&mut dialog, DialogStatus::Hangup).await;
    expect_closed(&mut dialog).await;
}

#[tokio::test]
async fn route_failover_on_503() {
    let (peer_a, addr_a) = udp_peer().await;
    let (peer_b, addr_b) = udp_peer().await;
    let resolver = StaticResolver::new().with_route("sip.example.test", vec![addr_a, addr_b]);
    let manager = manager_with(ManagerConfig::new().resolver(Arc::new(resolver))).await;

    let invite = Msg::request(Method::Invite, Uri::parse("sip:bob@sip.example.test").unwrap());
    let mut dialog = manager.new_dialog(invite).unwrap();

    let (invite_a, manager_addr) = recv_from(&peer_a).await;
    send_to(&peer_a, &respond(&invite_a, 503), manager_addr).await;

    // The dialog retargets transparently; same call, fresh branch.
    let (invite_b, manager_addr) = recv_from(&peer_b).await;
    assert_eq!(invite_b.call_id, invite_a.call_id);
    assert_ne!(invite_b.via[0].branch(), invite_a.via[0].branch());

    send_to(&peer_b, &respond(&invite_b, 100), manager_addr).await;
    expect_state(&mut dialog, DialogStatus::Proceeding).await;
    send_to(&peer_b, &answer(&invite_b, "b-tag", addr_b, true), manager_addr).await;
    expect_state(&mut dialog, DialogStatus::Answered).await;
    recv_matching(&peer_b, |m| m.method == Some(Method::Ack)).await;

    // The application never saw an error.
    assert!(dialog.on_err.try_recv().is_err());
}

#[tokio::test]
async fn redirect_chases_new_contact() {
    let (peer_a, addr_a) = udp_peer().await;
    let (peer_b, addr_b) = udp_peer().await;
    let manager = quiet_manager().await;
    let mut dialog = manager.new_dialog(invite_to(addr_a)).unwrap();

    let (invite_a, manager_addr) = recv_from(&peer_a).await;
    let mut moved = respond(&invite_a, 302);
    moved.contact = Some(Addr::parse(&format!("<sip:bob@{addr_b}>")).unwrap());
    send_to(&peer_a, &moved, manager_addr).await;

    // The redirect response is ACKed where it came from.
    let (ack, _) = recv_matching(&peer_a, |m| m.method == Some(Method::Ack)).await;
    assert_eq!(ack.cseq, invite_a.cseq);

    // The INVITE goes back out, aimed at the redirect Contact.
    let (invite_b, manager_addr) = recv_from(&peer_b).await;
    assert_eq!(invite_b.request.as_ref().unwrap().host.as_str(), "127.0.0.1");
    assert_eq!(invite_b.request.as_ref().unwrap().port, addr_b.port());
    assert_eq!(invite_b.call_id, invite_a.call_id);
    assert!(invite_b.route.is_empty());

    send_to(&peer_b, &answer(&invite_b, "b-tag", addr_b, false), manager_addr).await;
    expect_state(&mut dialog, DialogStatus::Answered).await;
    recv_matching(&peer_b, |m| m.method == Some(Method::Ack)).await;
    assert!(dialog.on_err.try_recv().is_err());
}

#[tokio::test]
async fn inbound_loop_is_rejected_with_483() {
    let (peer, peer_addr) = udp_peer().await;
    let manager = quiet_manager().await;
    let mut dialog = manager.new_dialog(invite_to(peer_addr)).unwrap();

    let (invite, manager_addr) = recv_from(&peer).await;

    let mut bye = peer_request(Method::Bye, &invite, "peer-tag", peer_addr, 1);
    bye.max_forwards = 0;
    send_to(&peer, &bye, manager_addr).await;

    let (reply, _) = recv_matching(&peer, |m| m.is_response()).await;
    assert_eq!(reply.status, 483);

    let err = expect_err(&mut dialog).await;
    assert!(
        err.to_string().contains("remote loop detected"),
        "unexpected error: {err}"
    );
    expect_closed(&mut dialog).await;
}

#[tokio::test]
async fn out_of_order_cseq_is_rejected_with_500() {
    let (peer, peer_addr) = udp_peer().await;
    let manager = quiet_manager().await;
    let mut dialog = manager.new_dialog(invite_to(peer_addr)).unwrap();

    let (invite, manager_addr) = recv_from(&peer).await;
    send_to(&peer, &answer(&invite, "peer-tag", peer_addr, false), manager_addr).await;
    expect_state(&mut dialog, DialogStatus::Answered).await;
    recv_matching(&peer, |m| m.method == Some(Method::Ack)).await;

    // A keep-alive ping establishes the remote CSeq high-water mark.
    let options = peer_request(Method::Options, &invite, "peer-tag", peer_addr, 10);
    send_to(&peer, &options, manager_addr).await;
    let (reply, _) = recv_matching(&peer, |m| m.is_response()).await;
    assert_eq!(reply.status, 200);

    // Stale CSeq: rejected, state unchanged.
    let stale = peer_request(Method::Options, &invite, "peer-tag", peer_addr, 5);
    send_to(&peer, &stale, manager_addr).await;
    let (reply, _) = recv_matching(&peer, |m| m.is_response()).await;
    assert_eq!(reply.status, 500);
    assert_eq!(reply.cseq, 5);

    // The dialog is still alive and in order.
    let bye = peer_request(Method::Bye, &invite, "peer-tag", peer_addr, 11);
    send_to(&peer, &bye, manager_addr).await;
    let (reply, _) = recv_matching(&peer, |m| m.is_response()).await;
    assert_eq!(reply.status, 200);
    expect_state(&mut dialog, DialogStatus::Hangup).await;
}

#[tokio::test]
async fn retransmissions_are_bounded_then_routes_fail() {
    let (peer, peer_addr) = udp_peer().await;
    let manager = Manager::new(
        ManagerConfig::new()
            .listen_string("127.0.0.1:0")
            .resend_interval_ms(30)
            .max_resends(2),
    )
    .await
    .expect("manager");
    let mut dialog = manager.new_dialog(invite_to(peer_addr)).unwrap();

    // Initial send plus max_resends retries, all with the same branch.
    let (first, _) = recv_from(&peer).await;
    let branch = first.via[0].branch().unwrap().to_owned();
    for _ in 0..2 {
        let (resent, _) = recv_from(&peer).await;
        assert_eq!(resent.method, Some(Method::Invite));
        assert_eq!(resent.via[0].branch(), Some(branch.as_str()));
    }

    // The single route is then declared dead.
    let err = expect_err(&mut dialog).await;
    assert!(
        matches!(err, DialogError::RouteExhausted { .. }),
        "unexpected error: {err}"
    );
    expect_closed(&mut dialog).await;
    expect_silence(&peer, Duration::from_millis(200)).await;
}

#[tokio::test]
async fn reinvite_is_answered_reliably_until_acked() {
    let (peer, peer_addr) = udp_peer().await;
    let manager = Manager::new(
        ManagerConfig::new()
            .listen_string("127.0.0.1:0")
            .resend_interval_ms(150)
            .allow_reinvite(true),
    )
    .await
    .expect("manager");
    let mut dialog = manager.new_dialog(invite_to(peer_addr)).unwrap();

    let (invite, manager_addr) = recv_from(&peer).await;
    send_to(&peer, &answer(&invite, "peer-tag", peer_addr, true), manager_addr).await;
    expect_state(&mut dialog, DialogStatus::Answered).await;
    recv_matching(&peer, |m| m.method == Some(Method::Ack)).await;
    dialog.on_peer.recv().await.expect("first sdp");

    // Peer renegotiates the media path.
    let mut reinvite = peer_request(Method::Invite, &invite, "peer-tag", peer_addr, 2);
    reinvite.payload = Payload::Sdp(test_sdp());
    send_to(&peer, &reinvite, manager_addr).await;

    let sdp = timeout(RECV_TIMEOUT, dialog.on_peer.recv())
        .await
        .expect("timed out waiting for renegotiated sdp")
        .expect("peer stream closed early");
    assert_eq!(sdp.media[0].port, 30000);

    // The 200 is delivered reliably: at least one retransmission before the
    // peer gets around to ACKing.
    let (ok, _) = recv_matching(&peer, |m| m.is_response() && m.status == 200).await;
    assert_eq!(ok.cseq, 2);
    assert_eq!(ok.allow.as_str(), "INVITE, ACK, CANCEL, BYE, OPTIONS");
    recv_matching(&peer, |m| m.is_response() && m.status == 200).await;

    let ack = peer_request(Method::Ack, &invite, "peer-tag", peer_addr, 2);
    send_to(&peer, &ack, manager_addr).await;

    // Give the ACK time to land, then expect the retransmissions to stop.
    tokio::time::sleep(Duration::from_millis(50)).await;
    drain(&peer).await;
    expect_silence(&peer, Duration::from_millis(400)).await;
}

/// Discards whatever is already queued on the socket.
async fn drain(sock: &UdpSocket) {
    let mut buf = [0u8; 2048];
    while timeout(Duration::from_millis(10), sock.recv_from(&mut buf))
        .await
        .is_ok()
    {}
}

#[tokio::test]
async fn unknown_call_id_gets_481_with_rport_annotations() {
    let (peer, peer_addr) = udp_peer().await;
    let manager = quiet_manager().await;
    let manager_addr: SocketAddr = format!("127.0.0.1:{}", manager.local_port())
        .parse()
        .unwrap();

    // Via deliberately claims a different host and port than the packet's
    // real source.
    let mut options = Msg::request(
        Method::Options,
        Uri::parse(&format!("sip:bob@{manager_addr}")).unwrap(),
    );
    options
        .via
        .push(Via::parse("SIP/2.0/UDP 10.99.99.99:9999;branch=z9hG4bKlost").unwrap());
    options.from = Some(Addr::parse("<sip:peer@10.99.99.99>;tag=p").unwrap());
    options.to = Some(Addr::parse(&format!("<sip:bob@{manager_addr}>")).unwrap());
    options.call_id = SmolStr::new("nobody-home");
    options.cseq = 1;
    options.cseq_method = Some(Method::Options);
    options.max_forwards = 70;
    send_to(&peer, &options, manager_addr).await;

    // The 481 reaches us because the response is routed by received/rport,
    // and the mirrored Via carries both annotations.
    let (reply, _) = recv_from(&peer).await;
    assert_eq!(reply.status, 481);
    let via = &reply.via[0];
    assert_eq!(via.params.value("received"), Some("127.0.0.1"));
    assert_eq!(
        via.params.value("rport"),
        Some(peer_addr.port().to_string().as_str())
    );
}

#[tokio::test]
async fn unsupported_sip_version_gets_505() {
    let (peer, peer_addr) = udp_peer().await;
    let manager = quiet_manager().await;
    let manager_addr: SocketAddr = format!("127.0.0.1:{}", manager.local_port())
        .parse()
        .unwrap();

    let raw = format!(
        "OPTIONS sip:bob@{manager_addr} SIP/3.0\r\n\
         Via: SIP/2.0/UDP 127.0.0.1:{};branch=z9hG4bKfuture\r\n\
         From: <sip:peer@127.0.0.1>;tag=p\r\n\
         To: <sip:bob@{manager_addr}>\r\n\
         Call-ID: from-the-future\r\n\
         CSeq: 1 OPTIONS\r\n\
         Max-Forwards: 70\r\n\
         Content-Length: 0\r\n\r\n",
        peer_addr.port()
    );
    peer.send_to(raw.as_bytes(), manager_addr).await.unwrap();

    let (reply, _) = recv_from(&peer).await;
    assert_eq!(reply.status, 505);
}

#[tokio::test]
async fn new_dialog_requires_an_invite() {
    let manager = quiet_manager().await;
    let options = Msg::request(Method::Options, Uri::parse("sip:bob@example.com").unwrap());
    assert!(manager.new_dialog(options).is_err());
}

#[tokio::test]
async fn proxy_mode_sends_all_egress_upstream() {
    let (proxy, proxy_addr) = udp_peer().await;
    let manager = manager_with(ManagerConfig::new().proxy_addr_port(proxy_addr)).await;

    // The Request-URI points somewhere unrelated; the packet still lands on
    // the proxy.
    let invite = Msg::request(
        Method::Invite,
        Uri::parse("sip:bob@192.0.2.55:5060").unwrap(),
    );
    let mut dialog = manager.new_dialog(invite).unwrap();

    let (invite, manager_addr) = recv_from(&proxy).await;
    assert_eq!(invite.request.as_ref().unwrap().host.as_str(), "192.0.2.55");

    send_to(&proxy, &respond(&invite, 100), manager_addr).await;
    expect_state(&mut dialog, DialogStatus::Proceeding).await;
}
