// sipling - a signalling-only SIP user agent client
// Copyright (C) 2025 The sipling Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The manager: socket owner, dialog registry, outbound send path.

use dashmap::DashMap;
use smol_str::SmolStr;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Notify};
use tracing::debug;

use sipling_core::{Addr, Msg, Uri, Via};
use sipling_dns::{DnsResolver, Resolver};

use crate::config::ManagerConfig;
use crate::error::DialogError;
use crate::receiver;
use crate::route;

/// Multiplexer for SIP dialogs sharing one UDP socket.
///
/// Owns the receive task and the Call-ID registry. Dialogs are created with
/// [`Manager::new_dialog`](crate::Manager::new_dialog); each runs its own task
/// and is dispatched to by the receive loop.
pub struct Manager {
    pub(crate) inner: Arc<Inner>,
}

pub(crate) struct Inner {
    pub(crate) sock: UdpSocket,
    pub(crate) local_addr: SocketAddr,
    pub(crate) public_addr: Option<SocketAddr>,
    pub(crate) proxy_addr: Option<SocketAddr>,
    pub(crate) max_resends: u32,
    pub(crate) resend_interval: Duration,
    pub(crate) timestamp_tags: bool,
    pub(crate) raw_trace: bool,
    pub(crate) user_agent: SmolStr,
    pub(crate) allow_reinvite: bool,
    pub(crate) resolver: Arc<dyn Resolver>,
    /// Local identity templates stamped onto outbound requests.
    pub(crate) contact: Addr,
    pub(crate) via: Via,
    /// Call-ID to the owning dialog task's input channel.
    pub(crate) dialogs: DashMap<SmolStr, mpsc::UnboundedSender<Msg>>,
    pub(crate) shutdown: Notify,
}

impl Manager {
    /// Binds the UDP socket, builds the local identity, and spawns the
    /// receive task.
    pub async fn new(config: ManagerConfig) -> Result<Manager, DialogError> {
        let listen = config.listen_addr()?;
        let sock = UdpSocket::bind(&listen)
            .await
            .map_err(|err| DialogError::Config(format!("bind {listen}: {err}")))?;
        let local_addr = sock
            .local_addr()
            .map_err(|err| DialogError::Config(format!("local addr: {err}")))?;

        let public = config.public_addr.unwrap_or(local_addr);
        let host = SmolStr::new(public.ip().to_string());

        let mut contact_uri = Uri::sip(host.clone());
        contact_uri.port = public.port();
        contact_uri.params.push("transport", Some(SmolStr::new("udp")));
        let contact = Addr::new(contact_uri);
        let via = Via::udp(host, public.port());

        let resolver = match config.resolver.clone() {
            Some(resolver) => resolver,
            None => Arc::new(DnsResolver::from_system()),
        };

        let inner = Arc::new(Inner {
            sock,
            local_addr,
            public_addr: config.public_addr,
            proxy_addr: config.proxy_addr,
            max_resends: config.max_resends,
            resend_interval: config.resend_interval,
            timestamp_tags: config.timestamp_tags,
            raw_trace: config.raw_trace,
            user_agent: config.user_agent.clone(),
            allow_reinvite: config.allow_reinvite,
            resolver,
            contact,
            via,
            dialogs: DashMap::new(),
            shutdown: Notify::new(),
        });

        tokio::spawn(receiver::receive_loop(inner.clone()));

        Ok(Manager { inner })
    }

    /// The local port receiving SIP traffic.
    pub fn local_port(&self) -> u16 {
        self.inner.local_addr.port()
    }

    /// The configured public IP, or the socket's own.
    pub fn public_addr(&self) -> IpAddr {
        self.inner.public_ip()
    }

    /// The configured public port, or the socket's own.
    pub fn public_port(&self) -> u16 {
        self.inner.public_port()
    }

    /// Populates missing headers and sends the message toward its SIP-level
    /// destination (or the proxy, when configured).
    pub async fn send(&self, msg: &mut Msg) -> Result<(), DialogError> {
        self.inner.transmit(msg, None).await
    }

    /// Builds a response template mirroring a request's transaction headers.
    pub fn new_response(&self, msg: &Msg, status: u16) -> Msg {
        self.inner.new_response(msg, status)
    }

    /// Stops the receive task; the socket closes once the last dialog task
    /// drops its handle.
    pub fn close(&self) {
        self.inner.shutdown.notify_one();
    }
}

impl Inner {
    pub(crate) fn public_ip(&self) -> IpAddr {
        self.public_addr.unwrap_or(self.local_addr).ip()
    }

    pub(crate) fn public_port(&self) -> u16 {
        self.public_addr.unwrap_or(self.local_addr).port()
    }

    pub(crate) fn new_response(&self, msg: &Msg, status: u16) -> Msg {
        crate::messages::new_response(msg, status, &self.user_agent, self.allow_reinvite)
    }

    /// Sends a message. `dest` pins the wire destination (a dialog's selected
    /// route); otherwise the proxy or SIP-level routing decides.
    pub(crate) async fn transmit(
        &self,
        msg: &mut Msg,
        dest: Option<SocketAddr>,
    ) -> Result<(), DialogError> {
        route::populate_message(&self.via, &self.contact, &self.user_agent, msg);

        let destination = if let Some(proxy) = self.proxy_addr {
            proxy
        } else if let Some(dest) = dest {
            dest
        } else {
            let (host, port) = route::route_message(Some(&self.via), Some(&self.contact), msg)?;
            let addrs = self.resolver.route_address(&host, port, false).await?;
            *addrs
                .first()
                .ok_or_else(|| DialogError::Resolve(anyhow::anyhow!("no addresses for '{host}'")))?
        };

        if msg.max_forwards > 0 {
            msg.max_forwards -= 1;
            // Only meaningful when the header was set before the decrement.
            if msg.max_forwards == 0 {
                return Err(DialogError::LocalLoop);
            }
        }

        self.add_timestamp(msg);

        let packet = msg.to_bytes();
        if self.raw_trace {
            debug!(
                destination = %destination,
                packet = %String::from_utf8_lossy(&packet),
                "outgoing sip packet"
            );
        }
        self.sock
            .send_to(&packet, destination)
            .await
            .map_err(|err| DialogError::Transport(format!("send to {destination}: {err}")))?;
        Ok(())
    }
}
