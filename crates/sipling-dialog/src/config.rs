// sipling - a signalling-only SIP user agent client
// Copyright (C) 2025 The sipling Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Manager configuration.
//!
//! Chainable setters over an owned value; validation happens when the
//! [`Manager`](crate::Manager) is constructed. The three listen setters are
//! mutually exclusive.

use smol_str::SmolStr;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use sipling_dns::Resolver;

use crate::error::DialogError;

pub(crate) const DEFAULT_MAX_RESENDS: u32 = 2;
pub(crate) const DEFAULT_RESEND_INTERVAL: Duration = Duration::from_secs(1);
pub(crate) const DEFAULT_USER_AGENT: &str = "sipmanager/1.0";

#[derive(Clone)]
enum Listen {
    AddrPort(SocketAddr),
    Port(u16),
    Str(String),
}

/// Options accepted by [`Manager::new`](crate::Manager::new).
#[derive(Clone)]
pub struct ManagerConfig {
    listen: Option<Listen>,
    listen_conflict: bool,
    pub(crate) public_addr: Option<SocketAddr>,
    pub(crate) proxy_addr: Option<SocketAddr>,
    pub(crate) max_resends: u32,
    pub(crate) resend_interval: Duration,
    pub(crate) timestamp_tags: bool,
    pub(crate) raw_trace: bool,
    pub(crate) user_agent: SmolStr,
    pub(crate) allow_reinvite: bool,
    pub(crate) resolver: Option<Arc<dyn Resolver>>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            listen: None,
            listen_conflict: false,
            public_addr: None,
            proxy_addr: None,
            max_resends: DEFAULT_MAX_RESENDS,
            resend_interval: DEFAULT_RESEND_INTERVAL,
            timestamp_tags: false,
            raw_trace: false,
            user_agent: SmolStr::new(DEFAULT_USER_AGENT),
            allow_reinvite: false,
            resolver: None,
        }
    }
}

impl ManagerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Listen on a specific address and port.
    pub fn listen_addr_port(mut self, addr: SocketAddr) -> Self {
        self.set_listen(Listen::AddrPort(addr));
        self
    }

    /// Listen on all addresses at a specific port.
    pub fn listen_port(mut self, port: u16) -> Self {
        self.set_listen(Listen::Port(port));
        self
    }

    /// Listen on an address given in `host:port` string form.
    pub fn listen_string(mut self, addr: impl Into<String>) -> Self {
        self.set_listen(Listen::Str(addr.into()));
        self
    }

    /// Local identity override for 1:1 NAT: this address goes into Via and
    /// Contact instead of the socket's own.
    pub fn public_addr_port(mut self, addr: SocketAddr) -> Self {
        self.public_addr = Some(addr);
        self
    }

    /// Send every outbound packet to this upstream instead of resolving the
    /// SIP-level destination.
    pub fn proxy_addr_port(mut self, addr: SocketAddr) -> Self {
        self.proxy_addr = Some(addr);
        self
    }

    /// How many times to resend a message nobody answered (default 2).
    pub fn max_resends(mut self, count: u32) -> Self {
        self.max_resends = count;
        self
    }

    /// How long to wait before resending (default 1s).
    pub fn resend_interval(mut self, interval: Duration) -> Self {
        self.resend_interval = interval;
        self
    }

    /// Convenience form of [`resend_interval`](Self::resend_interval).
    pub fn resend_interval_ms(self, millis: u64) -> Self {
        self.resend_interval(Duration::from_millis(millis))
    }

    /// Add a microsecond `usi` timestamp parameter to Via headers, for
    /// tracing.
    pub fn timestamp_tags(mut self, enabled: bool) -> Self {
        self.timestamp_tags = enabled;
        self
    }

    /// Log the raw bytes of every packet sent and received.
    pub fn raw_trace(mut self, enabled: bool) -> Self {
        self.raw_trace = enabled;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<SmolStr>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Advertise INVITE in Allow so peers may renegotiate media paths.
    pub fn allow_reinvite(mut self, enabled: bool) -> Self {
        self.allow_reinvite = enabled;
        self
    }

    /// Replace the system DNS resolver.
    pub fn resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    fn set_listen(&mut self, listen: Listen) {
        if self.listen.is_some() {
            self.listen_conflict = true;
        } else {
            self.listen = Some(listen);
        }
    }

    /// The bind target, or a configuration error when listen options collided.
    pub(crate) fn listen_addr(&self) -> Result<String, DialogError> {
        if self.listen_conflict {
            return Err(DialogError::Config(
                "socket listen address/port can only be set once".to_owned(),
            ));
        }
        Ok(match &self.listen {
            None => "0.0.0.0:0".to_owned(),
            Some(Listen::AddrPort(addr)) => addr.to_string(),
            Some(Listen::Port(port)) => format!("0.0.0.0:{port}"),
            Some(Listen::Str(addr)) => addr.clone(),
        })
    }
}
