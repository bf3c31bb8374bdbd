// sipling - a signalling-only SIP user agent client
// Copyright (C) 2025 The sipling Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Address headers (From, To, Contact, Route, Record-Route): an optional
//! display name, a URI, and address-level parameters such as `tag`.

use smol_str::SmolStr;
use std::fmt;

use crate::param::Params;
use crate::parse::MsgError;
use crate::uri::Uri;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Addr {
    pub display: SmolStr,
    pub uri: Uri,
    /// Parameters outside the angle brackets, e.g. `;tag=`.
    pub params: Params,
}

impl Addr {
    pub fn new(uri: Uri) -> Self {
        Self {
            display: SmolStr::default(),
            uri,
            params: Params::new(),
        }
    }

    /// The `tag` parameter, present on From/To within a dialog.
    pub fn tag(&self) -> Option<&str> {
        self.params.value("tag")
    }

    /// Parses one address header value:
    /// `"Display" <sip:uri>;params` or `sip:uri;params`.
    ///
    /// Without angle brackets the `;` parameters belong to the address, the
    /// reading every user agent applies to From/To tags.
    pub fn parse(s: &str) -> Result<Addr, MsgError> {
        let s = s.trim();
        if let Some(open) = find_unquoted(s, '<') {
            let display = parse_display(&s[..open]);
            let rest = &s[open + 1..];
            let close = rest
                .find('>')
                .ok_or_else(|| MsgError::Addr(format!("unterminated '<' in '{s}'")))?;
            let uri = Uri::parse(&rest[..close])?;
            let params = Params::parse(&rest[close + 1..]);
            Ok(Addr {
                display,
                uri,
                params,
            })
        } else {
            let (uri_part, params) = match s.split_once(';') {
                Some((head, tail)) => (head, Params::parse(tail)),
                None => (s, Params::new()),
            };
            Ok(Addr {
                display: SmolStr::default(),
                uri: Uri::parse(uri_part)?,
                params,
            })
        }
    }

    /// Parses a comma-separated list of addresses, respecting quotes and
    /// angle brackets.
    pub fn parse_list(s: &str) -> Result<Vec<Addr>, MsgError> {
        let mut addrs = Vec::new();
        for part in split_list(s) {
            addrs.push(Addr::parse(part)?);
        }
        Ok(addrs)
    }
}

/// Returns a deep copy of the chain in reverse order, the shape a Route set
/// takes when built from a Record-Route.
pub fn reversed(chain: &[Addr]) -> Vec<Addr> {
    chain.iter().rev().cloned().collect()
}

fn parse_display(s: &str) -> SmolStr {
    let s = s.trim();
    let s = s.strip_prefix('"').unwrap_or(s);
    let s = s.strip_suffix('"').unwrap_or(s);
    SmolStr::new(s.trim())
}

/// Finds a character outside double quotes.
fn find_unquoted(s: &str, needle: char) -> Option<usize> {
    let mut in_quotes = false;
    for (idx, ch) in s.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            c if c == needle && !in_quotes => return Some(idx),
            _ => {}
        }
    }
    None
}

/// Splits on commas that sit outside quotes and angle brackets.
fn split_list(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut depth = 0usize;
    let mut start = 0usize;
    for (idx, ch) in s.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            '<' if !in_quotes => depth += 1,
            '>' if !in_quotes => depth = depth.saturating_sub(1),
            ',' if !in_quotes && depth == 0 => {
                let part = s[start..idx].trim();
                if !part.is_empty() {
                    parts.push(part);
                }
                start = idx + 1;
            }
            _ => {}
        }
    }
    let part = s[start..].trim();
    if !part.is_empty() {
        parts.push(part);
    }
    parts
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.display.is_empty() {
            write!(f, "\"{}\" ", self.display)?;
        }
        write!(f, "<{}>{}", self.uri, self.params)
    }
}
