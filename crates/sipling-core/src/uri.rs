// sipling - a signalling-only SIP user agent client
// Copyright (C) 2025 The sipling Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! SIP URIs, just deep enough for routing: scheme, user, host, port, params.

use smol_str::SmolStr;
use std::fmt;

use crate::or_5060;
use crate::param::Params;
use crate::parse::MsgError;

/// A `sip:` (or `sips:`) URI.
///
/// Port 0 means "unspecified"; use [`Uri::port_or_5060`] when routing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Uri {
    pub scheme: SmolStr,
    pub user: SmolStr,
    pub host: SmolStr,
    pub port: u16,
    pub params: Params,
}

impl Uri {
    /// Builds a bare `sip:host` URI.
    pub fn sip(host: impl Into<SmolStr>) -> Self {
        Self {
            scheme: SmolStr::new("sip"),
            host: host.into(),
            ..Self::default()
        }
    }

    /// Parses `scheme:[user@]host[:port][;params]`.
    ///
    /// IPv6 hosts are written in brackets: `sip:[dead:beef::666]:5060`.
    pub fn parse(s: &str) -> Result<Uri, MsgError> {
        let s = s.trim();
        let (scheme, rest) = s
            .split_once(':')
            .ok_or_else(|| MsgError::Uri(format!("no scheme in '{s}'")))?;
        if scheme.is_empty() || rest.is_empty() {
            return Err(MsgError::Uri(format!("malformed uri '{s}'")));
        }

        let (rest, params) = match rest.split_once(';') {
            Some((head, tail)) => (head, Params::parse(tail)),
            None => (rest, Params::new()),
        };

        let (user, hostport) = match rest.rsplit_once('@') {
            Some((user, hostport)) => (user, hostport),
            None => ("", rest),
        };

        let (host, port) = parse_host_port(hostport)
            .ok_or_else(|| MsgError::Uri(format!("bad host/port in '{s}'")))?;

        Ok(Uri {
            scheme: SmolStr::new(scheme),
            user: SmolStr::new(user),
            host,
            port,
            params,
        })
    }

    pub fn port_or_5060(&self) -> u16 {
        or_5060(self.port)
    }

    /// True when both URIs name the same transport endpoint, defaulting
    /// absent ports to 5060.
    pub fn host_port_eq(&self, other: &Uri) -> bool {
        self.host == other.host && self.port_or_5060() == other.port_or_5060()
    }
}

/// Splits `host[:port]`, handling bracketed IPv6 literals.
pub(crate) fn parse_host_port(s: &str) -> Option<(SmolStr, u16)> {
    if s.is_empty() {
        return None;
    }
    if let Some(rest) = s.strip_prefix('[') {
        let (host, tail) = rest.split_once(']')?;
        let port = match tail.strip_prefix(':') {
            Some(port) => port.parse().ok()?,
            None if tail.is_empty() => 0,
            None => return None,
        };
        return Some((SmolStr::new(host), port));
    }
    // A bare IPv6 literal has more than one colon and no brackets.
    if s.matches(':').count() > 1 {
        return Some((SmolStr::new(s), 0));
    }
    match s.split_once(':') {
        Some((host, port)) => Some((SmolStr::new(host), port.parse().ok()?)),
        None => Some((SmolStr::new(s), 0)),
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.scheme)?;
        if !self.user.is_empty() {
            write!(f, "{}@", self.user)?;
        }
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
