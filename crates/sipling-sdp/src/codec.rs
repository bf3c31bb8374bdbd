// sipling - a signalling-only SIP user agent client
// Copyright (C) 2025 The sipling Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Codec descriptions and the IANA static payload type table (RFC 3551).

use smol_str::SmolStr;

use crate::parse::SdpError;

/// One codec slot from an `m=` line.
///
/// For a well-known payload type (< 96) the name and rate are filled from the
/// static table when the offer omits the `a=rtpmap:` line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Codec {
    /// 7-bit payload type carried in RTP packets.
    pub pt: u8,
    /// Encoding name, e.g. PCMU, G729, telephone-event.
    pub name: SmolStr,
    /// Clock rate in hertz, usually 8000.
    pub rate: u32,
    /// Encoding parameter, usually the channel count.
    pub param: SmolStr,
    /// Format parameters, e.g. "0-16" for rfc2833 DTMF.
    pub fmtp: SmolStr,
}

impl Codec {
    /// Builds a codec for the given payload type.
    ///
    /// Static payload types come back fully described from the IANA table;
    /// dynamic ones come back empty, to be completed by an `a=rtpmap:` line.
    pub fn from_payload_type(pt: u8) -> Result<Codec, SdpError> {
        if is_dynamic_pt(pt) {
            return Ok(Codec {
                pt,
                ..Codec::default()
            });
        }
        standard_codec(pt).ok_or(SdpError::UnknownPayloadType(pt))
    }

    /// Fills name/rate/param from the payload of an `a=rtpmap:` line, the part
    /// that looks like `PCMU/8000` or `L16/16000/2`.
    pub(crate) fn apply_rtpmap(&mut self, entry: &str) -> Result<(), SdpError> {
        let mut tokens = entry.split('/');
        let name = tokens.next().unwrap_or("");
        let rate = tokens.next();
        match (name, rate) {
            ("", _) | (_, None) => Err(SdpError::Invalid(format!("invalid rtpmap '{entry}'"))),
            (name, Some(rate)) => {
                self.name = SmolStr::new(name);
                self.rate = rate
                    .parse()
                    .map_err(|_| SdpError::Invalid(format!("invalid rtpmap rate '{rate}'")))?;
                if let Some(param) = tokens.next() {
                    self.param = SmolStr::new(param);
                }
                Ok(())
            }
        }
    }

    /// A dynamic payload type is only usable once an rtpmap described it.
    pub fn is_valid(&self) -> bool {
        !is_dynamic_pt(self.pt) || !self.name.is_empty()
    }
}

/// Returns true if IANA says this payload type is dynamic.
pub fn is_dynamic_pt(pt: u8) -> bool {
    pt >= 96
}

/// Static payload type assignments from RFC 3551 tables 4 and 5.
pub fn standard_codec(pt: u8) -> Option<Codec> {
    let (name, rate, param) = match pt {
        0 => ("PCMU", 8000, ""),
        3 => ("GSM", 8000, ""),
        4 => ("G723", 8000, ""),
        5 => ("DVI4", 8000, ""),
        6 => ("DVI4", 16000, ""),
        7 => ("LPC", 8000, ""),
        8 => ("PCMA", 8000, ""),
        9 => ("G722", 8000, ""),
        10 => ("L16", 44100, "2"),
        11 => ("L16", 44100, ""),
        12 => ("QCELP", 8000, ""),
        13 => ("CN", 8000, ""),
        14 => ("MPA", 90000, ""),
        15 => ("G728", 8000, ""),
        16 => ("DVI4", 11025, ""),
        17 => ("DVI4", 22050, ""),
        18 => ("G729", 8000, ""),
        25 => ("CelB", 90000, ""),
        26 => ("JPEG", 90000, ""),
        28 => ("nv", 90000, ""),
        31 => ("H261", 90000, ""),
        32 => ("MPV", 90000, ""),
        33 => ("MP2T", 90000, ""),
        34 => ("H263", 90000, ""),
        _ => return None,
    };
    Some(Codec {
        pt,
        name: SmolStr::new(name),
        rate,
        param: SmolStr::new(param),
        fmtp: SmolStr::default(),
    })
}
