// sipling - a signalling-only SIP user agent client
// Copyright (C) 2025 The sipling Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The SIP message record.

use bytes::Bytes;
use smol_str::SmolStr;
use std::fmt;

use sipling_sdp::Sdp;

use crate::addr::Addr;
use crate::method::Method;
use crate::status;
use crate::uri::Uri;
use crate::via::Via;

/// Message body, tagged by what we understood it to be.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Payload {
    #[default]
    None,
    /// An `application/sdp` body, parsed.
    Sdp(Sdp),
    /// Anything else, carried opaquely.
    Raw { content_type: SmolStr, data: Bytes },
}

impl Payload {
    pub fn is_none(&self) -> bool {
        matches!(self, Payload::None)
    }

    pub fn content_type(&self) -> Option<&str> {
        match self {
            Payload::None => None,
            Payload::Sdp(_) => Some(sipling_sdp::CONTENT_TYPE),
            Payload::Raw { content_type, .. } => Some(content_type.as_str()),
        }
    }

    /// The SDP, when that is what the body is.
    pub fn sdp(&self) -> Option<&Sdp> {
        match self {
            Payload::Sdp(sdp) => Some(sdp),
            _ => None,
        }
    }
}

/// One SIP message, request or response.
///
/// A single mutable record: requests carry `method`/`request`, responses
/// carry `status`/`phrase`, and everything else is shared. Header chains are
/// vectors in wire order; `via[0]` is the topmost hop.
#[derive(Debug, Clone, PartialEq)]
pub struct Msg {
    /// Request method; `None` on responses.
    pub method: Option<Method>,
    /// Request-URI; `None` on responses.
    pub request: Option<Uri>,
    /// Response status code; 0 on requests.
    pub status: u16,
    pub phrase: SmolStr,
    pub version_major: u8,
    pub version_minor: u8,

    pub via: Vec<Via>,
    pub from: Option<Addr>,
    pub to: Option<Addr>,
    pub call_id: SmolStr,
    pub cseq: u32,
    pub cseq_method: Option<Method>,
    pub contact: Option<Addr>,
    pub route: Vec<Addr>,
    pub record_route: Vec<Addr>,
    /// 0 means the header was absent.
    pub max_forwards: u32,
    pub user_agent: SmolStr,
    pub allow: SmolStr,
    /// Credentials are carried opaquely; we only ever copy them into ACKs.
    pub authorization: SmolStr,
    pub proxy_authorization: SmolStr,
    /// Headers we do not model, preserved verbatim in order.
    pub extra: Vec<(SmolStr, SmolStr)>,
    pub payload: Payload,
}

impl Default for Msg {
    fn default() -> Self {
        Self {
            method: None,
            request: None,
            status: 0,
            phrase: SmolStr::default(),
            version_major: 2,
            version_minor: 0,
            via: Vec::new(),
            from: None,
            to: None,
            call_id: SmolStr::default(),
            cseq: 0,
            cseq_method: None,
            contact: None,
            route: Vec::new(),
            record_route: Vec::new(),
            max_forwards: 0,
            user_agent: SmolStr::default(),
            allow: SmolStr::default(),
            authorization: SmolStr::default(),
            proxy_authorization: SmolStr::default(),
            extra: Vec::new(),
            payload: Payload::None,
        }
    }
}

impl Msg {
    /// Starts a request skeleton; the populator fills the rest before send.
    pub fn request(method: Method, uri: Uri) -> Self {
        Self {
            method: Some(method),
            request: Some(uri),
            ..Self::default()
        }
    }

    /// Starts a response with the conventional reason phrase.
    pub fn response(status: u16) -> Self {
        Self {
            status,
            phrase: SmolStr::new(status::phrase(status)),
            ..Self::default()
        }
    }

    pub fn is_response(&self) -> bool {
        self.status > 0
    }

    /// Serializes onto the wire.
    pub fn to_bytes(&self) -> Bytes {
        crate::serialize::serialize_msg(self)
    }
}

impl fmt::Display for Msg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.to_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_and_response_shapes() {
        let req = Msg::request(Method::Invite, Uri::parse("sip:bob@example.com").unwrap());
        assert!(!req.is_response());
        assert_eq!(req.method, Some(Method::Invite));

        let resp = Msg::response(486);
        assert!(resp.is_response());
        assert_eq!(resp.phrase.as_str(), "Busy Here");
    }

    #[test]
    fn payload_accessors() {
        assert!(Payload::None.is_none());
        assert_eq!(Payload::None.content_type(), None);
        let raw = Payload::Raw {
            content_type: SmolStr::new("text/plain"),
            data: Bytes::from_static(b"hi"),
        };
        assert_eq!(raw.content_type(), Some("text/plain"));
        assert!(raw.sdp().is_none());
    }
}
