// sipling - a signalling-only SIP user agent client
// Copyright (C) 2025 The sipling Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Typed SIP message model per RFC 3261, with a datagram parser and
//! serializer sized for SIP-over-UDP.
//!
//! A [`Msg`] is one mutable record covering both requests and responses; the
//! headers the dialog layer routes on (Via, From, To, Contact, Route,
//! Record-Route, CSeq, Call-ID) are typed fields, and anything else is
//! preserved verbatim. Header chains are plain vectors; parameter lists keep
//! insertion order.
//!
//! # Example
//! ```
//! use sipling_core::{parse_msg, Method};
//!
//! let raw = b"INVITE sip:bob@example.com SIP/2.0\r\n\
//!             Via: SIP/2.0/UDP pc33.example.com;branch=z9hG4bK776asdhds\r\n\
//!             Max-Forwards: 70\r\n\
//!             To: <sip:bob@example.com>\r\n\
//!             From: Alice <sip:alice@example.com>;tag=1928301774\r\n\
//!             Call-ID: a84b4c76e66710@pc33.example.com\r\n\
//!             CSeq: 314159 INVITE\r\n\
//!             Content-Length: 0\r\n\r\n";
//! let msg = parse_msg(raw).unwrap();
//! assert_eq!(msg.method, Some(Method::Invite));
//! assert_eq!(msg.cseq, 314159);
//! ```

pub mod addr;
pub mod gen;
pub mod method;
pub mod msg;
pub mod param;
pub mod parse;
pub mod serialize;
pub mod status;
pub mod uri;
pub mod via;

pub use addr::Addr;
pub use gen::{
    generate_branch, generate_call_id, generate_cseq, generate_tag, BRANCH_MAGIC_COOKIE,
};
pub use method::Method;
pub use msg::{Msg, Payload};
pub use param::{Param, Params};
pub use parse::{parse_msg, MsgError};
pub use status::*;
pub use uri::Uri;
pub use via::Via;

/// SIP's default port, substituted whenever a URI or Via leaves it out.
pub fn or_5060(port: u16) -> u16 {
    if port == 0 {
        5060
    } else {
        port
    }
}
