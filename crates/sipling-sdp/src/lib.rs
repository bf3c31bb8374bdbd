// sipling - a signalling-only SIP user agent client
// Copyright (C) 2025 The sipling Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Session Description Protocol (RFC 4566) payloads.
//!
//! This is the stuff peers embed in SIP packets to tell each other how to
//! establish audio and/or video sessions. A typical offer from Asterisk:
//!
//! ```text
//! v=0
//! o=root 31589 31589 IN IP4 10.0.0.38
//! s=session
//! c=IN IP4 10.0.0.38                  <- ip we should connect to
//! t=0 0
//! m=audio 30126 RTP/AVP 0 101         <- audio port number and codecs
//! a=rtpmap:0 PCMU/8000                <- mu-law at 8000 hz
//! a=rtpmap:101 telephone-event/8000   <- rfc2833 dtmf tones
//! a=fmtp:101 0-16
//! a=ptime:20                          <- send a packet every 20 ms
//! a=sendrecv
//! ```
//!
//! Parsing is line-oriented with a strict and a lenient mode: strict turns
//! every anomaly into a hard error, lenient collects anomalies into a warning
//! list and returns the partial session description.
//!
//! # Example
//! ```
//! use sipling_sdp::Sdp;
//!
//! let text = "v=0\r\n\
//!             o=root 31589 31589 IN IP4 10.0.0.38\r\n\
//!             s=session\r\n\
//!             c=IN IP4 10.0.0.38\r\n\
//!             t=0 0\r\n\
//!             m=audio 30126 RTP/AVP 0\r\n\
//!             a=rtpmap:0 PCMU/8000\r\n";
//! let parsed = Sdp::parse(text, true).unwrap();
//! assert_eq!(parsed.sdp.addr.as_str(), "10.0.0.38");
//! assert_eq!(parsed.sdp.media[0].port, 30126);
//! ```

pub mod codec;
pub mod parse;
pub mod serialize;

pub use codec::{is_dynamic_pt, standard_codec, Codec};
pub use parse::{Parsed, SdpError};

use rand::Rng;
use smol_str::SmolStr;
use std::fmt;
use std::net::SocketAddr;

/// MIME type for SDP bodies in SIP messages.
pub const CONTENT_TYPE: &str = "application/sdp";

/// Recommended maximum payload length, keeping the full SIP packet under the
/// usual UDP MTU once headers are added.
pub const MAX_LENGTH: usize = 1450;

/// Origin line (`o=`) per RFC 4566 §5.2.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Origin {
    pub user: SmolStr,
    pub id: SmolStr,
    pub version: SmolStr,
    pub addr: SmolStr,
}

/// Stream direction attribute per RFC 4566 §6.7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    SendRecv,
    SendOnly,
    RecvOnly,
    Inactive,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::SendRecv => "sendrecv",
            Direction::SendOnly => "sendonly",
            Direction::RecvOnly => "recvonly",
            Direction::Inactive => "inactive",
        }
    }

    /// Parses a direction attribute token, if it is one.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "sendrecv" => Some(Direction::SendRecv),
            "sendonly" => Some(Direction::SendOnly),
            "recvonly" => Some(Direction::RecvOnly),
            "inactive" => Some(Direction::Inactive),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Media types from RFC 8866 §5.14 and §8.2.2, plus image (RFC 6466).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaType {
    Audio,
    Video,
    Text,
    Application,
    Message,
    Image,
    /// Token we do not recognize, preserved verbatim.
    Other(SmolStr),
}

impl MediaType {
    pub fn as_str(&self) -> &str {
        match self {
            MediaType::Audio => "audio",
            MediaType::Video => "video",
            MediaType::Text => "text",
            MediaType::Application => "application",
            MediaType::Message => "message",
            MediaType::Image => "image",
            MediaType::Other(token) => token.as_str(),
        }
    }

    pub fn from_token(token: &str) -> Self {
        match token {
            "audio" => MediaType::Audio,
            "video" => MediaType::Video,
            "text" => MediaType::Text,
            "application" => MediaType::Application,
            "message" => MediaType::Message,
            "image" => MediaType::Image,
            _ => MediaType::Other(SmolStr::new(token)),
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, MediaType::Other(_))
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport protocol tokens we recognize on an `m=` line.
const KNOWN_PROTOS: [&str; 6] = ["RTP/AVP", "RTP/AVPF", "RTP/SAVP", "RTP/SAVPF", "TCP/IP", "udp"];

pub fn is_known_proto(token: &str) -> bool {
    KNOWN_PROTOS.contains(&token)
}

/// One `m=` section together with the `c=`/`a=` lines attached to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Media {
    pub media_type: MediaType,
    /// Transport protocol token (RTP/AVP, RTP/SAVP, ...), kept verbatim.
    pub proto: SmolStr,
    pub port: u16,
    /// Port count from a `port/count` span; 0 when a single port.
    pub num_ports: u16,
    /// Address from a media-specific `c=` line; empty when inherited from the
    /// session.
    pub addr: SmolStr,
    pub direction: Option<Direction>,
    /// Codecs in `m=` line preference order.
    pub codecs: Vec<Codec>,
    /// Transmit a frame every N milliseconds; 0 when unset.
    pub ptime: u32,
    /// Maximum milliseconds of media per packet; 0 when unset.
    pub maxptime: u32,
    /// `a=` lines we do not recognize, in insertion order.
    pub attrs: Vec<(SmolStr, SmolStr)>,
    /// Non-`a=` lines we do not recognize, in insertion order.
    pub other: Vec<(SmolStr, SmolStr)>,
}

impl Default for Media {
    fn default() -> Self {
        Self {
            media_type: MediaType::Audio,
            proto: SmolStr::new("RTP/AVP"),
            port: 0,
            num_ports: 0,
            addr: SmolStr::default(),
            direction: None,
            codecs: Vec::new(),
            ptime: 0,
            maxptime: 0,
            attrs: Vec::new(),
            other: Vec::new(),
        }
    }
}

impl Media {
    /// Looks up a codec by payload type.
    pub fn codec(&self, pt: u8) -> Option<&Codec> {
        self.codecs.iter().find(|c| c.pt == pt)
    }
}

/// A parsed session description.
///
/// `origin` and `addr` are mandatory on the wire; everything else falls back
/// to conventional defaults when absent (`session` = "-", `time` = "0 0").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sdp {
    pub origin: Origin,
    /// Session-level connection address from `c=`.
    pub addr: SmolStr,
    /// Session name from `s=`.
    pub session: SmolStr,
    /// Active time span from `t=`.
    pub time: SmolStr,
    pub direction: Option<Direction>,
    pub media: Vec<Media>,
    /// Session-level `a=` lines we do not recognize.
    pub attrs: Vec<(SmolStr, SmolStr)>,
    /// Session-level non-`a=` lines we do not recognize.
    pub other: Vec<(SmolStr, SmolStr)>,
}

impl Default for Sdp {
    fn default() -> Self {
        Self {
            origin: Origin::default(),
            addr: SmolStr::default(),
            session: SmolStr::new("-"),
            time: SmolStr::new("0 0"),
            direction: None,
            media: Vec::new(),
            attrs: Vec::new(),
            other: Vec::new(),
        }
    }
}

impl Sdp {
    /// Parses session description text.
    ///
    /// In strict mode any anomaly is a hard error. In lenient mode anomalies
    /// are collected into [`Parsed::warnings`] and the partial session
    /// description is returned; only damage to mandatory structure remains a
    /// hard error.
    pub fn parse(text: &str, strict: bool) -> Result<Parsed, SdpError> {
        parse::parse_sdp(text, strict)
    }

    /// Builds a basic, everyday audio offer for VoIP.
    ///
    /// The origin ID doubles as the version, matching what softswitches emit
    /// for an initial offer.
    pub fn audio(addr: SocketAddr, codecs: Vec<Codec>) -> Self {
        let ip = SmolStr::new(addr.ip().to_string());
        let id = generate_origin_id();
        Self {
            origin: Origin {
                user: SmolStr::new("-"),
                id: id.clone(),
                version: id,
                addr: ip.clone(),
            },
            addr: ip,
            media: vec![Media {
                media_type: MediaType::Audio,
                proto: SmolStr::new("RTP/AVP"),
                port: addr.port(),
                codecs,
                ..Media::default()
            }],
            ..Sdp::default()
        }
    }

    /// First media section of the given type, if any.
    pub fn find_media(&self, media_type: &MediaType) -> Option<&Media> {
        self.media.iter().find(|m| &m.media_type == media_type)
    }

    pub fn content_type(&self) -> &'static str {
        CONTENT_TYPE
    }
}

impl fmt::Display for Sdp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        serialize::append_sdp(self, f)
    }
}

/// Generates a numeric origin ID in the range softswitches usually emit.
pub fn generate_origin_id() -> SmolStr {
    let n: u32 = rand::thread_rng().gen_range(1_000_000_000..u32::MAX);
    SmolStr::new(n.to_string())
}

/// Returns true if the address literal is IPv6.
pub(crate) fn is_ipv6(addr: &str) -> bool {
    addr.contains(':')
}
