// sipling - a signalling-only SIP user agent client
// Copyright (C) 2025 The sipling Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Errors surfaced to the embedding application.
//!
//! Transient conditions (a lost packet, a dead route with fallbacks left) are
//! handled internally and never reach the error stream; everything here is
//! either a construction failure or fatal to its dialog.

use std::fmt;

use sipling_core::Msg;

#[derive(Debug)]
pub enum DialogError {
    /// Rejected configuration; construction time only.
    Config(String),
    /// UDP send failed and the attempt cannot be retried.
    Transport(String),
    /// The remote side violated SIP semantics.
    Protocol(String),
    /// The remote side answered with a final response >= 300 that is not
    /// handled locally (redirects and 503-on-INVITE are).
    Response(Box<Msg>),
    /// Every resolver-provided target for the destination failed.
    RouteExhausted { dest: String },
    /// The destination could not be resolved at all.
    Resolve(anyhow::Error),
    /// Max-Forwards hit zero on an outbound message before it left this host.
    LocalLoop,
}

impl fmt::Display for DialogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DialogError::Config(msg) => write!(f, "configuration error: {}", msg),
            DialogError::Transport(msg) => write!(f, "transport error: {}", msg),
            DialogError::Protocol(msg) => write!(f, "protocol error: {}", msg),
            DialogError::Response(msg) => {
                write!(f, "remote returned {} {}", msg.status, msg.phrase)
            }
            DialogError::RouteExhausted { dest } => write!(f, "failed to contact: {}", dest),
            DialogError::Resolve(err) => write!(f, "{}", err),
            DialogError::LocalLoop => write!(f, "local loop detected - max-forwards exceeded"),
        }
    }
}

impl std::error::Error for DialogError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DialogError::Resolve(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for DialogError {
    fn from(err: anyhow::Error) -> Self {
        DialogError::Resolve(err)
    }
}
