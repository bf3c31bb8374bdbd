// sipling - a signalling-only SIP user agent client
// Copyright (C) 2025 The sipling Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Message serializer. Emits typed fields in canonical order and always
//! recomputes `Content-Length` from the payload.

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt::Write;

use crate::msg::{Msg, Payload};

pub fn serialize_msg(msg: &Msg) -> Bytes {
    let mut head = String::with_capacity(512);

    if msg.is_response() {
        let _ = write!(
            head,
            "SIP/{}.{} {} {}\r\n",
            msg.version_major, msg.version_minor, msg.status, msg.phrase
        );
    } else {
        let method = msg.method.as_ref().map(|m| m.as_str()).unwrap_or("");
        let uri = msg
            .request
            .as_ref()
            .map(|u| u.to_string())
            .unwrap_or_default();
        let _ = write!(
            head,
            "{} {} SIP/{}.{}\r\n",
            method, uri, msg.version_major, msg.version_minor
        );
    }

    for via in &msg.via {
        let _ = write!(head, "Via: {}\r\n", via);
    }
    for route in &msg.route {
        let _ = write!(head, "Route: {}\r\n", route);
    }
    for record_route in &msg.record_route {
        let _ = write!(head, "Record-Route: {}\r\n", record_route);
    }
    if let Some(from) = &msg.from {
        let _ = write!(head, "From: {}\r\n", from);
    }
    if let Some(to) = &msg.to {
        let _ = write!(head, "To: {}\r\n", to);
    }
    if !msg.call_id.is_empty() {
        let _ = write!(head, "Call-ID: {}\r\n", msg.call_id);
    }
    if let Some(cseq_method) = msg.cseq_method.as_ref().or(msg.method.as_ref()) {
        let _ = write!(head, "CSeq: {} {}\r\n", msg.cseq, cseq_method);
    }
    if let Some(contact) = &msg.contact {
        let _ = write!(head, "Contact: {}\r\n", contact);
    }
    if msg.max_forwards > 0 {
        let _ = write!(head, "Max-Forwards: {}\r\n", msg.max_forwards);
    }
    if !msg.user_agent.is_empty() {
        let _ = write!(head, "User-Agent: {}\r\n", msg.user_agent);
    }
    if !msg.allow.is_empty() {
        let _ = write!(head, "Allow: {}\r\n", msg.allow);
    }
    if !msg.authorization.is_empty() {
        let _ = write!(head, "Authorization: {}\r\n", msg.authorization);
    }
    if !msg.proxy_authorization.is_empty() {
        let _ = write!(head, "Proxy-Authorization: {}\r\n", msg.proxy_authorization);
    }
    for (name, value) in &msg.extra {
        let _ = write!(head, "{}: {}\r\n", name, value);
    }

    let body = match &msg.payload {
        Payload::None => Vec::new(),
        Payload::Sdp(sdp) => sdp.to_string().into_bytes(),
        Payload::Raw { data, .. } => data.to_vec(),
    };
    if let Some(content_type) = msg.payload.content_type() {
        let _ = write!(head, "Content-Type: {}\r\n", content_type);
    }
    let _ = write!(head, "Content-Length: {}\r\n", body.len());
    head.push_str("\r\n");

    let mut out = BytesMut::with_capacity(head.len() + body.len());
    out.put_slice(head.as_bytes());
    out.put_slice(&body);
    out.freeze()
}
