// sipling - a signalling-only SIP user agent client
// Copyright (C) 2025 The sipling Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Outbound message population and next-hop selection.

use smol_str::SmolStr;

use sipling_core::{
    gen, Addr, Method, Msg, Via,
};

use crate::error::DialogError;

/// Fills whatever an outbound request is missing: Via (with a fresh branch),
/// Contact, To (the Request-URI wrapped), From (our Contact minus URI params,
/// plus a tag), Call-ID, CSeq, CSeq method, Max-Forwards, User-Agent.
/// Responses are never re-populated.
pub(crate) fn populate_message(via: &Via, contact: &Addr, user_agent: &SmolStr, msg: &mut Msg) {
    if msg.is_response() {
        return;
    }
    if msg.via.is_empty() {
        msg.via.push(via.clone());
    }
    if msg.contact.is_none() {
        msg.contact = Some(contact.clone());
    }
    if msg.to.is_none() {
        msg.to = msg.request.clone().map(|uri| Addr::new(uri));
    }
    if msg.from.is_none() {
        let mut from = msg.contact.clone().unwrap_or_else(|| contact.clone());
        from.uri.params = Default::default();
        msg.from = Some(from);
    }
    if msg.call_id.is_empty() {
        msg.call_id = gen::generate_call_id();
    }
    if msg.cseq == 0 {
        msg.cseq = gen::generate_cseq();
    }
    if msg.cseq_method.is_none() {
        msg.cseq_method = msg.method.clone();
    }
    if msg.max_forwards == 0 {
        msg.max_forwards = 70;
    }
    if msg.user_agent.is_empty() {
        msg.user_agent = user_agent.clone();
    }
    if let Some(first) = msg.via.first_mut() {
        if !first.params.has("branch") {
            first.params.push_front("branch", Some(gen::generate_branch()));
        }
    }
    if let Some(from) = msg.from.as_mut() {
        if !from.params.has("tag") {
            from.params.push_front("tag", Some(gen::generate_tag()));
        }
    }
}

/// Selects the next hop `(host, port)` for an outbound message, stripping a
/// leading hop that names this host.
///
/// Responses follow the topmost remaining Via, preferring `received` over the
/// host and `rport` over the port (RFC 3581). Requests follow the Route chain
/// when present (with the RFC 3261 §16.12.1.2 strict-router swap), else the
/// Request-URI.
pub(crate) fn route_message(
    via: Option<&Via>,
    contact: Option<&Addr>,
    msg: &mut Msg,
) -> Result<(SmolStr, u16), DialogError> {
    if msg.is_response() {
        if let (Some(local), Some(first)) = (via, msg.via.first()) {
            if local.compare_host_port(first) {
                msg.via.remove(0);
            }
        }
        let first = msg
            .via
            .first()
            .ok_or_else(|| DialogError::Protocol("response has no via to route on".to_owned()))?;

        let mut host = first.host.clone();
        let mut port = first.port;
        if let Some(received) = first.params.value("received") {
            host = SmolStr::new(received);
        }
        // A NAT between us may have rewritten the source port; rport is the
        // port the peer actually sees.
        if let Some(rport) = first.params.value("rport") {
            if !rport.is_empty() {
                port = rport
                    .parse()
                    .map_err(|_| DialogError::Protocol(format!("bad rport '{rport}'")))?;
            }
        }
        return Ok((host, port));
    }

    if let (Some(local), Some(first)) = (contact, msg.route.first()) {
        if local.uri.host_port_eq(&first.uri) {
            msg.route.remove(0);
        }
    }

    if let Some(first) = msg.route.first() {
        if msg.method == Some(Method::Register) {
            return Err(DialogError::Protocol(
                "don't route REGISTER requests".to_owned(),
            ));
        }
        if first.uri.params.has("lr") {
            // RFC 3261 §16.12.1.1 basic SIP trapezoid.
            return Ok((first.uri.host.clone(), first.uri.port));
        }
        // RFC 3261 §16.12.1.2: traversing a strict-routing proxy. The
        // Request-URI moves to the tail of the Route chain and the head of
        // the chain becomes the Request-URI.
        let request = msg
            .request
            .take()
            .ok_or_else(|| DialogError::Protocol("request has no request-uri".to_owned()))?;
        let mut chain = std::mem::take(&mut msg.route);
        chain.push(Addr::new(request));
        let head = chain.remove(0);
        let next_hop = (head.uri.host.clone(), head.uri.port);
        msg.route = chain;
        msg.request = Some(head.uri);
        return Ok(next_hop);
    }

    let uri = msg
        .request
        .as_ref()
        .ok_or_else(|| DialogError::Protocol("request has no request-uri".to_owned()))?;
    Ok((uri.host.clone(), uri.port))
}
