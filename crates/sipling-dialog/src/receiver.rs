// sipling - a signalling-only SIP user agent client
// Copyright (C) 2025 The sipling Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The receive task: read, parse, annotate, dispatch by Call-ID.

use smol_str::SmolStr;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};

use sipling_core::{
    or_5060, parse_msg, status, Msg, Uri,
};

use crate::manager::Inner;

/// Standard SIP-over-UDP MTU assumption; larger datagrams are truncated and
/// will fail to parse.
const RECV_BUFFER_SIZE: usize = 2048;

pub(crate) async fn receive_loop(inner: Arc<Inner>) {
    let mut buf = [0u8; RECV_BUFFER_SIZE];
    debug!(listen = %inner.local_addr, "starting read from udp port");
    loop {
        tokio::select! {
            _ = inner.shutdown.notified() => {
                info!(listen = %inner.local_addr, "closed sip port");
                break;
            }
            received = inner.sock.recv_from(&mut buf) => {
                let (amount, src) = match received {
                    Ok(pair) => pair,
                    Err(err) => {
                        error!(%err, "error reading from sip port");
                        continue;
                    }
                };
                let packet = &buf[..amount];
                if inner.raw_trace {
                    debug!(
                        source = %src,
                        packet = %String::from_utf8_lossy(packet),
                        "incoming sip packet"
                    );
                }
                let mut msg = match parse_msg(packet) {
                    Ok(msg) => msg,
                    Err(err) => {
                        warn!(%err, source = %src, "unable to parse sip message");
                        continue;
                    }
                };
                inner.add_received(&mut msg, src);
                inner.add_timestamp(&mut msg);
                // A leading Route naming this host is us talking to
                // ourselves through a proxy; drop the hop.
                let leading_local = msg
                    .route
                    .first()
                    .map(|first| inner.is_local_host_port(&first.uri))
                    .unwrap_or(false);
                if leading_local {
                    msg.route.remove(0);
                }
                inner.handle_incoming(msg).await;
            }
        }
    }
    debug!(listen = %inner.local_addr, "finished read from udp port");
}

impl Inner {
    /// Routes an incoming message to its dialog, or answers 481/505.
    pub(crate) async fn handle_incoming(&self, msg: Msg) {
        if msg.version_major != 2 || msg.version_minor != 0 {
            warn!(
                version = %format!("{}.{}", msg.version_major, msg.version_minor),
                "received unknown sip version in incoming message"
            );
            let mut reply = self.new_response(&msg, status::STATUS_VERSION_NOT_SUPPORTED);
            if let Err(err) = self.transmit(&mut reply, None).await {
                error!(%err, "unable to send '505 version not supported' reply");
            }
            return;
        }

        let msg = match self.dispatch_to_dialog(msg) {
            Ok(()) => return,
            Err(msg) => msg,
        };

        warn!(call_id = %msg.call_id, "received incoming message for unknown transaction");
        let mut reply = self.new_response(&msg, status::STATUS_CALL_TRANSACTION_DOES_NOT_EXIST);
        if let Err(err) = self.transmit(&mut reply, None).await {
            error!(%err, "unable to send '481 call/transaction does not exist' reply");
        }
    }

    /// Hands the message to its dialog task. Returns the message when there
    /// is no live dialog for its Call-ID.
    fn dispatch_to_dialog(&self, msg: Msg) -> Result<(), Msg> {
        let call_id = msg.call_id.clone();
        match self.dialogs.get(&call_id) {
            Some(entry) => entry.value().send(msg).map_err(|err| err.0),
            None => Err(msg),
        }
    }

    /// RFC 3581 annotation: record the observed source when it differs from
    /// what the topmost Via claims.
    pub(crate) fn add_received(&self, msg: &mut Msg, src: SocketAddr) {
        if msg.is_response() {
            return;
        }
        let Some(via) = msg.via.first_mut() else {
            return;
        };
        // Raw comparison: a sent-by with no port still gets annotated even
        // when the source port happens to be 5060.
        if via.port != src.port() {
            let port = SmolStr::new(src.port().to_string());
            if via.params.has("rport") {
                // The implied rport is 5060, but a NAT in the path may have
                // picked another port; record the real one.
                if let Some(rport) = via.params.get_mut("rport") {
                    if rport.value.as_deref().unwrap_or("").is_empty() {
                        rport.value = Some(port);
                    }
                }
            } else {
                via.params.push_front("rport", Some(port));
            }
        }
        let ip = canonical_ip(src);
        if via.host.as_str() != ip.as_str() && !via.params.has("received") {
            via.params.push_front("received", Some(SmolStr::new(ip)));
        }
    }

    /// Optional microsecond trace tag on the topmost Via.
    pub(crate) fn add_timestamp(&self, msg: &mut Msg) {
        if !self.timestamp_tags {
            return;
        }
        if let Some(via) = msg.via.first_mut() {
            let micros = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_micros())
                .unwrap_or(0);
            via.params
                .push_front("usi", Some(SmolStr::new(micros.to_string())));
        }
    }

    /// True when the URI names this manager's public identity.
    pub(crate) fn is_local_host_port(&self, uri: &Uri) -> bool {
        uri.host.as_str() == self.public_ip().to_string()
            && uri.port_or_5060() == or_5060(self.public_port())
    }
}

/// The source IP as peers would write it, with IPv4-mapped addresses unmapped.
fn canonical_ip(src: SocketAddr) -> String {
    match src.ip() {
        std::net::IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => v4.to_string(),
            None => v6.to_string(),
        },
        ip => ip.to_string(),
    }
}
