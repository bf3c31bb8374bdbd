// sipling - a signalling-only SIP user agent client
// Copyright (C) 2025 The sipling Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Canonical SDP serialization.
//!
//! Output order is fixed regardless of the order lines arrived in: session
//! description first (`v= o= s= c= t=`, attributes, direction, unrecognized
//! lines), then each media block. Within a media block codecs are rendered as
//! `a=rtpmap:` (and `a=fmtp:` when present) in `m=` line order.

use std::fmt::{self, Write};

use crate::{is_ipv6, Media, Sdp};

/// Address from the RFC 5735 TEST-NET-1 block; never routes anywhere.
const FALLBACK_ADDR: &str = "192.0.2.1";

pub(crate) fn append_sdp<W: Write>(sdp: &Sdp, w: &mut W) -> fmt::Result {
    w.write_str("v=0\r\n")?;

    let origin_addr = if sdp.origin.addr.is_empty() {
        if sdp.addr.is_empty() {
            FALLBACK_ADDR
        } else {
            sdp.addr.as_str()
        }
    } else {
        sdp.origin.addr.as_str()
    };
    let user = if sdp.origin.user.is_empty() {
        "-"
    } else {
        sdp.origin.user.as_str()
    };
    write!(
        w,
        "o={} {} {} IN {} {}\r\n",
        user,
        sdp.origin.id,
        sdp.origin.version,
        ip_version(origin_addr),
        origin_addr
    )?;

    let session = if sdp.session.is_empty() {
        "-"
    } else {
        sdp.session.as_str()
    };
    write!(w, "s={}\r\n", session)?;

    let addr = if sdp.addr.is_empty() {
        FALLBACK_ADDR
    } else {
        sdp.addr.as_str()
    };
    write!(w, "c=IN {} {}\r\n", ip_version(addr), addr)?;

    let time = if sdp.time.is_empty() {
        "0 0"
    } else {
        sdp.time.as_str()
    };
    write!(w, "t={}\r\n", time)?;

    append_attrs(&sdp.attrs, w)?;
    if let Some(direction) = sdp.direction {
        write!(w, "a={}\r\n", direction)?;
    }
    for (key, value) in &sdp.other {
        write!(w, "{}={}\r\n", key, value)?;
    }

    for media in &sdp.media {
        append_media(media, w)?;
    }
    Ok(())
}

fn append_media<W: Write>(media: &Media, w: &mut W) -> fmt::Result {
    write!(w, "m={} {}", media.media_type, media.port)?;
    if media.num_ports > 1 {
        write!(w, "/{}", media.num_ports)?;
    }
    if media.proto.is_empty() {
        w.write_str(" RTP/AVP")?;
    } else {
        write!(w, " {}", media.proto)?;
    }
    for codec in &media.codecs {
        write!(w, " {}", codec.pt)?;
    }
    w.write_str("\r\n")?;

    if !media.addr.is_empty() {
        write!(w, "c=IN {} {}\r\n", ip_version(&media.addr), media.addr)?;
    }

    for codec in &media.codecs {
        if !codec.name.is_empty() {
            write!(w, "a=rtpmap:{} {}/{}", codec.pt, codec.name, codec.rate)?;
            if !codec.param.is_empty() {
                write!(w, "/{}", codec.param)?;
            }
            w.write_str("\r\n")?;
        }
        if !codec.fmtp.is_empty() {
            write!(w, "a=fmtp:{} {}\r\n", codec.pt, codec.fmtp)?;
        }
    }

    append_attrs(&media.attrs, w)?;

    if media.ptime > 0 {
        write!(w, "a=ptime:{}\r\n", media.ptime)?;
    }
    if media.maxptime > 0 {
        write!(w, "a=maxptime:{}\r\n", media.maxptime)?;
    }
    if let Some(direction) = media.direction {
        write!(w, "a={}\r\n", direction)?;
    }
    for (key, value) in &media.other {
        write!(w, "{}={}\r\n", key, value)?;
    }
    Ok(())
}

fn append_attrs<W: Write>(attrs: &[(smol_str::SmolStr, smol_str::SmolStr)], w: &mut W) -> fmt::Result {
    for (key, value) in attrs {
        if value.is_empty() {
            write!(w, "a={}\r\n", key)?;
        } else {
            write!(w, "a={}:{}\r\n", key, value)?;
        }
    }
    Ok(())
}

fn ip_version(addr: &str) -> &'static str {
    if is_ipv6(addr) {
        "IP6"
    } else {
        "IP4"
    }
}
