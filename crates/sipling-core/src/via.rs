// sipling - a signalling-only SIP user agent client
// Copyright (C) 2025 The sipling Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Via header (RFC 3261 §20.42).
//!
//! Each hop records where the response should be sent and carries the
//! transaction `branch` plus the RFC 3581 `received`/`rport` annotations.

use smol_str::SmolStr;
use std::fmt;

use crate::or_5060;
use crate::param::Params;
use crate::parse::MsgError;
use crate::uri::parse_host_port;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Via {
    pub host: SmolStr,
    /// 0 when the hop did not name a port (implying 5060).
    pub port: u16,
    /// Transport token from the sent-protocol, e.g. `UDP`.
    pub transport: SmolStr,
    pub params: Params,
}

impl Via {
    /// Builds a UDP hop for the given local identity.
    pub fn udp(host: impl Into<SmolStr>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            transport: SmolStr::new("UDP"),
            params: Params::new(),
        }
    }

    /// Parses one Via value: `SIP/2.0/UDP host[:port][;params]`.
    pub fn parse(s: &str) -> Result<Via, MsgError> {
        let s = s.trim();
        let rest = s
            .strip_prefix("SIP/2.0/")
            .ok_or_else(|| MsgError::Via(format!("bad sent-protocol in '{s}'")))?;
        let (transport, rest) = rest
            .split_once(char::is_whitespace)
            .ok_or_else(|| MsgError::Via(format!("no sent-by in '{s}'")))?;
        let (sent_by, params) = match rest.split_once(';') {
            Some((head, tail)) => (head.trim(), Params::parse(tail)),
            None => (rest.trim(), Params::new()),
        };
        let (host, port) = parse_host_port(sent_by)
            .ok_or_else(|| MsgError::Via(format!("bad sent-by in '{s}'")))?;
        Ok(Via {
            host,
            port,
            transport: SmolStr::new(transport),
            params,
        })
    }

    /// The transaction branch parameter, if present.
    pub fn branch(&self) -> Option<&str> {
        self.params.value("branch")
    }

    /// True when both hops name the same transport endpoint.
    pub fn compare_host_port(&self, other: &Via) -> bool {
        self.host == other.host && or_5060(self.port) == or_5060(other.port)
    }

    /// True when both hops carry the same branch.
    pub fn compare_branch(&self, other: &Via) -> bool {
        self.branch() == other.branch()
    }
}

impl fmt::Display for Via {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let transport = if self.transport.is_empty() {
            "UDP"
        } else {
            self.transport.as_str()
        };
        write!(f, "SIP/2.0/{} ", transport)?;
        if self.host.contains(':') {
            write!(f, "[{}]", self.host)?;
        } else {
            f.write_str(&self.host)?;
        }
        if self.port != 0 {
            write!(f, ":{}", self.port)?;
        }
        write!(f, "{}", self.params)
    }
}
