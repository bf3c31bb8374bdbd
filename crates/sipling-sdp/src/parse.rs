// sipling - a signalling-only SIP user agent client
// Copyright (C) 2025 The sipling Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Line-oriented SDP parser with strict and lenient modes.

use smol_str::SmolStr;
use std::fmt;

use crate::{Codec, Direction, Media, MediaType, Origin, Sdp};

/// Hard parse failures. Anomalies that lenient mode tolerates are reported
/// through [`Parsed::warnings`] instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SdpError {
    /// Input does not begin with `v=0`.
    BadVersion,
    /// Too few lines to be a session description.
    TooShort,
    /// Missing the mandatory `o=` or session-level `c=` line.
    MissingMandatory,
    /// No usable media sections.
    NoMedia,
    /// A static payload type with no IANA assignment.
    UnknownPayloadType(u8),
    /// Malformed content, with context.
    Invalid(String),
}

impl fmt::Display for SdpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SdpError::BadVersion => write!(f, "sdp must start with v=0"),
            SdpError::TooShort => write!(f, "too few lines in sdp"),
            SdpError::MissingMandatory => write!(f, "sdp missing mandatory o= or c= line"),
            SdpError::NoMedia => write!(f, "no media descriptions found"),
            SdpError::UnknownPayloadType(pt) => write!(f, "unknown iana codec id '{}'", pt),
            SdpError::Invalid(msg) => write!(f, "invalid sdp: {}", msg),
        }
    }
}

impl std::error::Error for SdpError {}

/// Result of a successful parse: the session description plus whatever
/// anomalies lenient mode tolerated. Strict parses always have an empty
/// warning list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parsed {
    pub sdp: Sdp,
    pub warnings: Vec<String>,
}

/// Which part of the description subsequent `c=`/`a=` lines attach to.
enum Section {
    Session,
    Media,
    /// A disabled or unusable media section; its lines are dropped.
    Skipped,
}

fn anomaly(strict: bool, warnings: &mut Vec<String>, msg: String) -> Result<(), SdpError> {
    if strict {
        Err(SdpError::Invalid(msg))
    } else {
        warnings.push(msg);
        Ok(())
    }
}

pub fn parse_sdp(text: &str, strict: bool) -> Result<Parsed, SdpError> {
    let rest = text.strip_prefix("v=0\r\n").ok_or(SdpError::BadVersion)?;
    let lines: Vec<&str> = rest.split("\r\n").collect();
    if lines.len() < 2 {
        return Err(SdpError::TooShort);
    }

    let mut sdp = Sdp::default();
    let mut warnings = Vec::new();
    let mut found_origin = false;
    let mut found_conn = false;
    let mut section = Section::Session;

    for line in lines {
        if line.is_empty() {
            continue;
        }
        if line.len() < 3 || line.as_bytes()[1] != b'=' {
            anomaly(strict, &mut warnings, format!("invalid line '{line}'"))?;
            continue;
        }
        match line.as_bytes()[0] {
            b's' => sdp.session = SmolStr::new(&line[2..]),
            b't' => sdp.time = SmolStr::new(&line[2..]),
            b'm' => match parse_media_line(&line[2..], strict, &mut warnings) {
                Ok(Some(media)) => {
                    sdp.media.push(media);
                    section = Section::Media;
                }
                Ok(None) => section = Section::Skipped,
                Err(err) => {
                    anomaly(strict, &mut warnings, format!("{err} - '{line}'"))?;
                    section = Section::Skipped;
                }
            },
            b'c' => match section {
                Section::Skipped => continue,
                Section::Session => {
                    if found_conn {
                        anomaly(
                            strict,
                            &mut warnings,
                            format!("dropping extra c= line '{line}' for session"),
                        )?;
                        continue;
                    }
                    sdp.addr = parse_conn_line(line)?;
                    found_conn = true;
                }
                Section::Media => {
                    let Some(media) = sdp.media.last_mut() else {
                        continue;
                    };
                    if !media.addr.is_empty() {
                        anomaly(
                            strict,
                            &mut warnings,
                            format!("dropping extra c= line '{line}' for media"),
                        )?;
                        continue;
                    }
                    media.addr = parse_conn_line(line)?;
                }
            },
            b'o' => {
                if !matches!(section, Section::Session) {
                    anomaly(
                        strict,
                        &mut warnings,
                        format!("ignoring o= line '{line}' after media"),
                    )?;
                    continue;
                }
                if found_origin {
                    anomaly(
                        strict,
                        &mut warnings,
                        format!("dropping extra o= line '{line}' for session"),
                    )?;
                    continue;
                }
                sdp.origin = parse_origin_line(line)?;
                found_origin = true;
            }
            b'a' => match section {
                Section::Skipped => continue,
                Section::Session => session_attribute(&mut sdp, &line[2..], strict, &mut warnings)?,
                Section::Media => {
                    let Some(media) = sdp.media.last_mut() else {
                        continue;
                    };
                    media_attribute(media, &line[2..], strict, &mut warnings)?;
                }
            },
            _ => {
                if matches!(section, Section::Skipped) {
                    continue;
                }
                let (key, value) = line.split_once('=').unwrap_or((line, ""));
                if key.is_empty() {
                    anomaly(strict, &mut warnings, format!("evil field '{line}'"))?;
                    continue;
                }
                let entry = (SmolStr::new(key), SmolStr::new(value));
                match section {
                    Section::Session => sdp.other.push(entry),
                    _ => {
                        if let Some(media) = sdp.media.last_mut() {
                            media.other.push(entry);
                        }
                    }
                }
            }
        }
    }

    if !found_conn || !found_origin {
        return Err(SdpError::MissingMandatory);
    }
    if sdp.media.is_empty() {
        return Err(SdpError::NoMedia);
    }

    for media in &sdp.media {
        for codec in &media.codecs {
            if !codec.is_valid() {
                anomaly(
                    strict,
                    &mut warnings,
                    format!("missing rtpmap for dynamic codec '{}'", codec.pt),
                )?;
            }
        }
    }

    Ok(Parsed { sdp, warnings })
}

/// Parses the payload of an `m=` line, e.g. `audio 30126 RTP/AVP 0 101`.
///
/// `Ok(None)` means a disabled media section (port 0), which is skipped along
/// with its attached lines.
fn parse_media_line(
    line: &str,
    strict: bool,
    warnings: &mut Vec<String>,
) -> Result<Option<Media>, SdpError> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < 4 {
        return Err(SdpError::Invalid(format!(
            "not enough tokens in m= line: {}",
            tokens.len()
        )));
    }

    let media_type = MediaType::from_token(tokens[0]);
    if !media_type.is_known() {
        if strict {
            return Err(SdpError::Invalid(format!(
                "unsupported media type '{}'",
                tokens[0]
            )));
        }
        warnings.push(format!("unsupported media type '{}'", tokens[0]));
    }

    let (port_str, count_str) = match tokens[1].split_once('/') {
        Some((p, c)) => (p, Some(c)),
        None => (tokens[1], None),
    };
    let port: u16 = port_str
        .parse()
        .map_err(|_| SdpError::Invalid(format!("invalid m= port '{port_str}'")))?;
    if port == 0 {
        // Port zero means the media stream is declined.
        return Ok(None);
    }
    let num_ports = match count_str {
        Some(c) => c
            .parse()
            .map_err(|_| SdpError::Invalid(format!("invalid m= port range '{c}'")))?,
        None => 0,
    };

    let proto = tokens[2];
    if !crate::is_known_proto(proto) {
        if strict {
            return Err(SdpError::Invalid(format!(
                "unsupported media protocol '{proto}'"
            )));
        }
        warnings.push(format!("unsupported media protocol '{proto}'"));
    }

    let mut codecs = Vec::with_capacity(tokens.len() - 3);
    for token in &tokens[3..] {
        let pt: u8 = token
            .parse()
            .map_err(|_| SdpError::Invalid(format!("invalid pt '{token}' in m= line")))?;
        codecs.push(Codec::from_payload_type(pt)?);
    }

    Ok(Some(Media {
        media_type,
        proto: SmolStr::new(proto),
        port,
        num_ports,
        codecs,
        ..Media::default()
    }))
}

fn session_attribute(
    sdp: &mut Sdp,
    attr: &str,
    strict: bool,
    warnings: &mut Vec<String>,
) -> Result<(), SdpError> {
    if let Some(direction) = Direction::from_token(attr) {
        if sdp.direction.is_some() {
            return anomaly(
                strict,
                warnings,
                format!("dropping extra direction line '{attr}' for session"),
            );
        }
        sdp.direction = Some(direction);
        return Ok(());
    }
    match attr.split_once(':') {
        Some(("", _)) => anomaly(strict, warnings, format!("evil attribute '{attr}'")),
        Some((key, value)) => {
            sdp.attrs.push((SmolStr::new(key), SmolStr::new(value)));
            Ok(())
        }
        None => {
            sdp.attrs.push((SmolStr::new(attr), SmolStr::default()));
            Ok(())
        }
    }
}

/// Handles one media-level `a=` line per RFC 8866 §6.
fn media_attribute(
    media: &mut Media,
    attr: &str,
    strict: bool,
    warnings: &mut Vec<String>,
) -> Result<(), SdpError> {
    if let Some(direction) = Direction::from_token(attr) {
        if media.direction.is_some() {
            return anomaly(
                strict,
                warnings,
                format!("dropping extra direction line '{attr}' for media"),
            );
        }
        media.direction = Some(direction);
        return Ok(());
    }

    let (key, value) = match attr.split_once(':') {
        Some((key, value)) => (key, value),
        None => {
            media.attrs.push((SmolStr::new(attr), SmolStr::default()));
            return Ok(());
        }
    };
    match key {
        "ptime" => match value.parse::<u32>() {
            Ok(ptime) if ptime > 0 => media.ptime = ptime,
            _ => return anomaly(strict, warnings, format!("invalid ptime value '{value}'")),
        },
        "maxptime" => match value.parse::<u32>() {
            Ok(maxptime) if maxptime > 0 => media.maxptime = maxptime,
            _ => {
                return anomaly(strict, warnings, format!("invalid maxptime value '{value}'"));
            }
        },
        "rtpmap" => {
            let (pt_token, entry) = match value.split_once(' ') {
                Some(pair) => pair,
                None => {
                    return anomaly(strict, warnings, format!("invalid rtpmap line '{attr}'"));
                }
            };
            let pt: u8 = match pt_token.parse() {
                Ok(pt) => pt,
                Err(_) => {
                    return anomaly(
                        strict,
                        warnings,
                        format!("invalid pt '{pt_token}' in rtpmap"),
                    );
                }
            };
            match media.codecs.iter_mut().find(|c| c.pt == pt) {
                Some(codec) => {
                    if let Err(err) = codec.apply_rtpmap(entry) {
                        return anomaly(strict, warnings, err.to_string());
                    }
                }
                None => {
                    return anomaly(
                        strict,
                        warnings,
                        format!("codec id '{pt}' in rtpmap not found in media description"),
                    );
                }
            }
        }
        "fmtp" => {
            let (pt_token, rest) = match value.split_once(' ') {
                Some(pair) => pair,
                None => {
                    return anomaly(strict, warnings, format!("invalid fmtp line '{attr}'"));
                }
            };
            let pt: u8 = match pt_token.parse() {
                Ok(pt) => pt,
                Err(_) => {
                    return anomaly(strict, warnings, format!("invalid pt '{pt_token}' in fmtp"));
                }
            };
            match media.codecs.iter_mut().find(|c| c.pt == pt) {
                Some(codec) => codec.fmtp = SmolStr::new(rest),
                None => {
                    return anomaly(
                        strict,
                        warnings,
                        format!("codec id '{pt}' in fmtp not found in media description"),
                    );
                }
            }
        }
        "" => return anomaly(strict, warnings, format!("evil attribute '{attr}'")),
        _ => media.attrs.push((SmolStr::new(key), SmolStr::new(value))),
    }
    Ok(())
}

/// Parses a line that looks like `c=IN IP4 10.0.0.38`.
fn parse_conn_line(line: &str) -> Result<SmolStr, SdpError> {
    let tokens: Vec<&str> = line[2..].split_whitespace().collect();
    if tokens.len() != 3 {
        return Err(SdpError::Invalid("invalid conn line".to_owned()));
    }
    if tokens[0] != "IN" || (tokens[1] != "IP4" && tokens[1] != "IP6") {
        return Err(SdpError::Invalid("unsupported conn net type".to_owned()));
    }
    if tokens[2].contains('/') {
        return Err(SdpError::Invalid("multicast address in c= line".to_owned()));
    }
    Ok(SmolStr::new(tokens[2]))
}

/// Parses a line that looks like `o=root 31589 31589 IN IP4 10.0.0.38`.
fn parse_origin_line(line: &str) -> Result<Origin, SdpError> {
    let tokens: Vec<&str> = line[2..].split_whitespace().collect();
    if tokens.len() != 6 {
        return Err(SdpError::Invalid("invalid origin line".to_owned()));
    }
    if tokens[3] != "IN" || (tokens[4] != "IP4" && tokens[4] != "IP6") {
        return Err(SdpError::Invalid("unsupported origin net type".to_owned()));
    }
    if tokens[5].contains('/') {
        return Err(SdpError::Invalid("multicast address in o= line".to_owned()));
    }
    Ok(Origin {
        user: SmolStr::new(tokens[0]),
        id: SmolStr::new(tokens[1]),
        version: SmolStr::new(tokens[2]),
        addr: SmolStr::new(tokens[5]),
    })
}
