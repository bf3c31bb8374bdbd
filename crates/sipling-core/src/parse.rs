// sipling - a signalling-only SIP user agent client
// Copyright (C) 2025 The sipling Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Datagram parser: raw UDP bytes to [`Msg`].

use smol_str::SmolStr;
use std::fmt;

use sipling_sdp::{Sdp, SdpError};

use crate::addr::Addr;
use crate::method::Method;
use crate::msg::{Msg, Payload};
use crate::uri::Uri;
use crate::via::Via;

/// Why a datagram could not be understood as a SIP message.
#[derive(Debug, Clone, PartialEq)]
pub enum MsgError {
    /// Header section is not valid UTF-8.
    NotUtf8,
    /// No blank line terminating the header section.
    NoHeaderTerminator,
    StartLine(String),
    Header(String),
    Uri(String),
    Via(String),
    Addr(String),
    /// The `application/sdp` body failed to parse.
    Sdp(SdpError),
}

impl fmt::Display for MsgError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MsgError::NotUtf8 => write!(f, "message is not valid utf-8"),
            MsgError::NoHeaderTerminator => write!(f, "no blank line after headers"),
            MsgError::StartLine(msg) => write!(f, "bad start line: {}", msg),
            MsgError::Header(msg) => write!(f, "bad header: {}", msg),
            MsgError::Uri(msg) => write!(f, "bad uri: {}", msg),
            MsgError::Via(msg) => write!(f, "bad via: {}", msg),
            MsgError::Addr(msg) => write!(f, "bad address: {}", msg),
            MsgError::Sdp(err) => write!(f, "bad sdp body: {}", err),
        }
    }
}

impl std::error::Error for MsgError {}

impl From<SdpError> for MsgError {
    fn from(err: SdpError) -> Self {
        MsgError::Sdp(err)
    }
}

/// Parses one UDP datagram into a message.
pub fn parse_msg(packet: &[u8]) -> Result<Msg, MsgError> {
    let split = find_header_end(packet).ok_or(MsgError::NoHeaderTerminator)?;
    let head = std::str::from_utf8(&packet[..split]).map_err(|_| MsgError::NotUtf8)?;
    let body = &packet[split + 4..];

    let mut lines = head.split("\r\n");
    let start = lines.next().ok_or(MsgError::NoHeaderTerminator)?;
    let mut msg = parse_start_line(start)?;

    let mut content_length: Option<usize> = None;
    let mut content_type = SmolStr::default();

    for line in lines {
        if line.is_empty() {
            continue;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| MsgError::Header(format!("no colon in '{line}'")))?;
        let name = name.trim();
        let value = value.trim();
        // Long and compact header names per RFC 3261 §7.3.3.
        if eq(name, "Via") || eq(name, "v") {
            for part in split_commas(value) {
                msg.via.push(Via::parse(part)?);
            }
        } else if eq(name, "From") || eq(name, "f") {
            msg.from = Some(Addr::parse(value)?);
        } else if eq(name, "To") || eq(name, "t") {
            msg.to = Some(Addr::parse(value)?);
        } else if eq(name, "Contact") || eq(name, "m") {
            if value != "*" {
                msg.contact = Some(Addr::parse(value)?);
            }
        } else if eq(name, "Call-ID") || eq(name, "i") {
            msg.call_id = SmolStr::new(value);
        } else if eq(name, "CSeq") {
            let (number, method) = value
                .split_once(char::is_whitespace)
                .ok_or_else(|| MsgError::Header(format!("bad cseq '{value}'")))?;
            msg.cseq = number
                .trim()
                .parse()
                .map_err(|_| MsgError::Header(format!("bad cseq number '{number}'")))?;
            msg.cseq_method = Some(Method::from_token(method.trim()));
        } else if eq(name, "Max-Forwards") {
            msg.max_forwards = value
                .parse()
                .map_err(|_| MsgError::Header(format!("bad max-forwards '{value}'")))?;
        } else if eq(name, "Route") {
            msg.route.extend(Addr::parse_list(value)?);
        } else if eq(name, "Record-Route") {
            msg.record_route.extend(Addr::parse_list(value)?);
        } else if eq(name, "Content-Length") || eq(name, "l") {
            let length = value
                .parse()
                .map_err(|_| MsgError::Header(format!("bad content-length '{value}'")))?;
            content_length = Some(length);
        } else if eq(name, "Content-Type") || eq(name, "c") {
            content_type = SmolStr::new(value);
        } else if eq(name, "User-Agent") {
            msg.user_agent = SmolStr::new(value);
        } else if eq(name, "Allow") {
            msg.allow = SmolStr::new(value);
        } else if eq(name, "Authorization") {
            msg.authorization = SmolStr::new(value);
        } else if eq(name, "Proxy-Authorization") {
            msg.proxy_authorization = SmolStr::new(value);
        } else {
            msg.extra.push((SmolStr::new(name), SmolStr::new(value)));
        }
    }

    let body = match content_length {
        Some(length) if length > body.len() => {
            return Err(MsgError::Header(format!(
                "content-length {} exceeds {} remaining bytes",
                length,
                body.len()
            )));
        }
        Some(length) => &body[..length],
        None => body,
    };
    msg.payload = parse_payload(content_type, body)?;

    Ok(msg)
}

fn parse_start_line(line: &str) -> Result<Msg, MsgError> {
    if let Some(rest) = line.strip_prefix("SIP/") {
        // Status-Line: SIP/2.0 SP code SP phrase
        let mut tokens = rest.splitn(3, ' ');
        let version = tokens.next().unwrap_or("");
        let code = tokens
            .next()
            .ok_or_else(|| MsgError::StartLine(format!("no status code in '{line}'")))?;
        let phrase = tokens.next().unwrap_or("");
        let (major, minor) = parse_version(version)
            .ok_or_else(|| MsgError::StartLine(format!("bad version in '{line}'")))?;
        let status: u16 = code
            .parse()
            .map_err(|_| MsgError::StartLine(format!("bad status code '{code}'")))?;
        if !(100..700).contains(&status) {
            return Err(MsgError::StartLine(format!("status code {status} out of range")));
        }
        let mut msg = Msg::response(status);
        msg.phrase = SmolStr::new(phrase);
        msg.version_major = major;
        msg.version_minor = minor;
        Ok(msg)
    } else {
        // Request-Line: method SP uri SP SIP/2.0
        let mut tokens = line.split(' ');
        let (method, uri, version) = match (tokens.next(), tokens.next(), tokens.next()) {
            (Some(m), Some(u), Some(v)) if tokens.next().is_none() => (m, u, v),
            _ => return Err(MsgError::StartLine(format!("malformed request line '{line}'"))),
        };
        let version = version
            .strip_prefix("SIP/")
            .ok_or_else(|| MsgError::StartLine(format!("bad version in '{line}'")))?;
        let (major, minor) = parse_version(version)
            .ok_or_else(|| MsgError::StartLine(format!("bad version in '{line}'")))?;
        let mut msg = Msg::request(Method::from_token(method), Uri::parse(uri)?);
        msg.version_major = major;
        msg.version_minor = minor;
        Ok(msg)
    }
}

fn parse_version(s: &str) -> Option<(u8, u8)> {
    let (major, minor) = s.split_once('.')?;
    Some((major.parse().ok()?, minor.parse().ok()?))
}

fn parse_payload(content_type: SmolStr, body: &[u8]) -> Result<Payload, MsgError> {
    if body.is_empty() {
        return Ok(Payload::None);
    }
    if content_type.eq_ignore_ascii_case(sipling_sdp::CONTENT_TYPE) {
        let text = std::str::from_utf8(body).map_err(|_| MsgError::NotUtf8)?;
        // Lenient here: the dialog layer only cares about what did parse.
        let parsed = Sdp::parse(text, false)?;
        return Ok(Payload::Sdp(parsed.sdp));
    }
    Ok(Payload::Raw {
        content_type,
        data: bytes::Bytes::copy_from_slice(body),
    })
}

fn find_header_end(packet: &[u8]) -> Option<usize> {
    packet.windows(4).position(|w| w == b"\r\n\r\n")
}

fn eq(name: &str, other: &str) -> bool {
    name.eq_ignore_ascii_case(other)
}

/// Splits a header value on top-level commas (Via lists never nest brackets).
fn split_commas(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty())
}
