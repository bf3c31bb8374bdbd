// sipling - a signalling-only SIP user agent client
// Copyright (C) 2025 The sipling Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Ordered `;name=value` parameter lists for Via, address, and URI headers.
//!
//! Membership is what matters semantically, but insertion order is preserved
//! end to end: a parameter prepended by the transport (`received`, `rport`)
//! serializes before whatever the peer sent.

use smol_str::SmolStr;
use std::fmt;

/// One `;name` or `;name=value` parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: SmolStr,
    /// `None` for valueless parameters such as `;lr`.
    pub value: Option<SmolStr>,
}

/// Parameter list preserving insertion order. Names compare ASCII
/// case-insensitively per RFC 3261 §7.3.1.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(Vec<Param>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Param> {
        self.0.iter()
    }

    /// Finds a parameter by name.
    pub fn get(&self, name: &str) -> Option<&Param> {
        self.0.iter().find(|p| p.name.eq_ignore_ascii_case(name))
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Param> {
        self.0
            .iter_mut()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    /// Returns the parameter's value, if the parameter exists and has one.
    pub fn value(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|p| p.value.as_deref())
    }

    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Appends a parameter at the tail (wire order while parsing).
    pub fn push(&mut self, name: impl Into<SmolStr>, value: Option<SmolStr>) {
        self.0.push(Param {
            name: name.into(),
            value,
        });
    }

    /// Prepends a parameter, the way the transport annotates incoming Via
    /// headers.
    pub fn push_front(&mut self, name: impl Into<SmolStr>, value: Option<SmolStr>) {
        self.0.insert(
            0,
            Param {
                name: name.into(),
                value,
            },
        );
    }

    /// Replaces an existing parameter's value in place, or prepends it.
    pub fn set_front(&mut self, name: impl Into<SmolStr>, value: Option<SmolStr>) {
        let name = name.into();
        let existing = self
            .0
            .iter()
            .position(|p| p.name.eq_ignore_ascii_case(&name));
        match existing {
            Some(idx) => self.0[idx].value = value,
            None => self.push_front(name, value),
        }
    }

    /// Parses the `;a=b;c` tail of a header value. The input starts after the
    /// first `;` (or is the whole tail including it; empty segments are
    /// skipped).
    pub fn parse(tail: &str) -> Self {
        let mut params = Params::new();
        for segment in tail.split(';') {
            let segment = segment.trim();
            if segment.is_empty() {
                continue;
            }
            match segment.split_once('=') {
                Some((name, value)) => {
                    params.push(SmolStr::new(name.trim()), Some(SmolStr::new(value.trim())))
                }
                None => params.push(SmolStr::new(segment), None),
            }
        }
        params
    }
}

impl fmt::Display for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for param in &self.0 {
            match &param.value {
                Some(value) => write!(f, ";{}={}", param.name, value)?,
                None => write!(f, ";{}", param.name)?,
            }
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a Params {
    type Item = &'a Param;
    type IntoIter = std::slice::Iter<'a, Param>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
