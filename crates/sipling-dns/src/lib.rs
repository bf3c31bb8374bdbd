// sipling - a signalling-only SIP user agent client
// Copyright (C) 2025 The sipling Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Resolver interface mapping a SIP hop to an ordered fallback list of
//! transport addresses.
//!
//! The dialog layer walks the returned list front to back: when a route dies
//! (503 or retransmission timeout), the next address is tried. [`DnsResolver`]
//! is the production implementation; [`StaticResolver`] serves tests and
//! fixed topologies.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use tracing::debug;
use trust_dns_resolver::{
    config::{ResolverConfig, ResolverOpts},
    TokioAsyncResolver,
};

/// Maps `(host, port, want_srv)` to an ordered fallback list.
///
/// `want_srv` is set while a dialog is still being established: with no
/// explicit port, `_sip._udp.<host>` SRV records are consulted before A/AAAA.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn route_address(
        &self,
        host: &str,
        port: u16,
        want_srv: bool,
    ) -> Result<Vec<SocketAddr>>;
}

/// DNS-backed resolver: literal IPs pass through, SRV records are tried when
/// wanted, A/AAAA otherwise.
pub struct DnsResolver {
    resolver: TokioAsyncResolver,
}

impl DnsResolver {
    /// Creates a resolver with default upstream configuration.
    pub fn from_system() -> Self {
        let resolver = TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default());
        Self { resolver }
    }

    /// Creates a resolver with explicit configuration.
    pub fn with_config(config: ResolverConfig, opts: ResolverOpts) -> Self {
        let resolver = TokioAsyncResolver::tokio(config, opts);
        Self { resolver }
    }

    /// SRV lookup for `_sip._udp.<host>`, resolving each target to its first
    /// address. Returns records in deterministic order: priority ascending,
    /// weight descending as a tie-break (no RFC 2782 weighted shuffle).
    async fn lookup_srv(&self, host: &str) -> Result<Vec<SocketAddr>> {
        let name = format!("_sip._udp.{}.", host);
        let lookup = self.resolver.srv_lookup(name.as_str()).await?;

        let mut records: Vec<_> = lookup.iter().collect();
        records.sort_by(|a, b| {
            a.priority()
                .cmp(&b.priority())
                .then(b.weight().cmp(&a.weight()))
        });

        let mut targets = Vec::new();
        for srv in records {
            let target = srv.target().to_utf8();
            let target = target.trim_end_matches('.');
            match self.first_ip(target).await {
                Ok(ip) => targets.push(SocketAddr::new(ip, srv.port())),
                Err(err) => {
                    debug!(srv_target = target, %err, "skipping unresolvable srv target");
                }
            }
        }
        if targets.is_empty() {
            Err(anyhow!("no usable srv targets for '{}'", host))
        } else {
            Ok(targets)
        }
    }

    async fn first_ip(&self, host: &str) -> Result<IpAddr> {
        let lookup = self.resolver.lookup_ip(host).await?;
        lookup
            .iter()
            .next()
            .ok_or_else(|| anyhow!("no addresses for '{}'", host))
    }
}

#[async_trait]
impl Resolver for DnsResolver {
    async fn route_address(
        &self,
        host: &str,
        port: u16,
        want_srv: bool,
    ) -> Result<Vec<SocketAddr>> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(vec![SocketAddr::new(ip, or_5060(port))]);
        }
        if port == 0 && want_srv {
            match self.lookup_srv(host).await {
                Ok(targets) => {
                    debug!(host, count = targets.len(), "found srv routes to service");
                    return Ok(targets);
                }
                Err(err) => {
                    debug!(host, %err, "srv lookup failed; falling back to a/aaaa");
                }
            }
        }
        let ip = self.first_ip(host).await?;
        Ok(vec![SocketAddr::new(ip, or_5060(port))])
    }
}

/// Fixed route table for tests and topologies with no DNS.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    routes: HashMap<String, Vec<SocketAddr>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the fallback list returned for a host, tried front to back.
    pub fn with_route(mut self, host: &str, addrs: Vec<SocketAddr>) -> Self {
        self.routes.insert(host.to_owned(), addrs);
        self
    }
}

#[async_trait]
impl Resolver for StaticResolver {
    async fn route_address(
        &self,
        host: &str,
        port: u16,
        _want_srv: bool,
    ) -> Result<Vec<SocketAddr>> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(vec![SocketAddr::new(ip, or_5060(port))]);
        }
        self.routes
            .get(host)
            .filter(|addrs| !addrs.is_empty())
            .cloned()
            .ok_or_else(|| anyhow!("no addresses for '{}'", host))
    }
}

fn or_5060(port: u16) -> u16 {
    if port == 0 {
        5060
    } else {
        port
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn literal_ips_pass_through() {
        let resolver = StaticResolver::new();
        let addrs = resolver.route_address("10.0.0.7", 0, true).await.unwrap();
        assert_eq!(addrs, vec!["10.0.0.7:5060".parse().unwrap()]);
        let addrs = resolver.route_address("10.0.0.7", 5080, false).await.unwrap();
        assert_eq!(addrs, vec!["10.0.0.7:5080".parse().unwrap()]);
    }

    #[tokio::test]
    async fn literal_ipv6_passes_through() {
        let resolver = StaticResolver::new();
        let addrs = resolver
            .route_address("dead:beef::666", 0, false)
            .await
            .unwrap();
        assert_eq!(addrs, vec!["[dead:beef::666]:5060".parse().unwrap()]);
    }

    #[tokio::test]
    async fn static_routes_keep_their_order() {
        let a: SocketAddr = "127.0.0.1:5061".parse().unwrap();
        let b: SocketAddr = "127.0.0.1:5062".parse().unwrap();
        let resolver = StaticResolver::new().with_route("sip.example.com", vec![a, b]);
        let addrs = resolver
            .route_address("sip.example.com", 0, true)
            .await
            .unwrap();
        assert_eq!(addrs, vec![a, b]);
    }

    #[tokio::test]
    async fn unknown_hosts_are_errors() {
        let resolver = StaticResolver::new();
        let err = resolver
            .route_address("nowhere.example.com", 0, true)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("nowhere.example.com"));
    }
}
