// sipling - a signalling-only SIP user agent client
// Copyright (C) 2025 The sipling Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Constructors deriving ACK/CANCEL/BYE/response templates from prior
//! messages, and the transaction matchers.

use smol_str::SmolStr;
use tracing::error;

use sipling_core::{addr, Method, Msg};

/// Methods we accept in-dialog.
pub const ALLOW: &str = "ACK, CANCEL, BYE, OPTIONS";
/// Same, advertising re-INVITE support.
pub const ALLOW_WITH_REINVITE: &str = "INVITE, ACK, CANCEL, BYE, OPTIONS";

/// Builds a response template mirroring the transaction headers of `msg`.
pub fn new_response(msg: &Msg, status: u16, user_agent: &SmolStr, allow_reinvite: bool) -> Msg {
    let mut resp = Msg::response(status);
    resp.via = msg.via.clone();
    resp.from = msg.from.clone();
    resp.to = msg.to.clone();
    resp.call_id = msg.call_id.clone();
    resp.cseq = msg.cseq;
    resp.cseq_method = msg.cseq_method.clone();
    resp.record_route = msg.record_route.clone();
    resp.user_agent = user_agent.clone();
    resp.allow = SmolStr::new(if allow_reinvite {
        ALLOW_WITH_REINVITE
    } else {
        ALLOW
    });
    resp
}

/// Builds the end-to-end ACK for a final response to an INVITE
/// (RFC 3261 §17.1.1.3): Request-URI from the response's Contact, a single
/// detached Via hop, the reversed Record-Route as the Route, and credentials
/// copied from the INVITE.
pub fn new_ack(resp: &Msg, invite: &Msg, user_agent: &SmolStr) -> Msg {
    let mut ack = Msg {
        method: Some(Method::Ack),
        request: resp.contact.as_ref().map(|c| c.uri.clone()),
        ..Msg::default()
    };
    ack.from = resp.from.clone();
    ack.to = resp.to.clone();
    ack.via = resp.via.first().cloned().into_iter().collect();
    ack.call_id = resp.call_id.clone();
    ack.cseq = resp.cseq;
    ack.cseq_method = Some(Method::Ack);
    ack.route = addr::reversed(&resp.record_route);
    ack.authorization = invite.authorization.clone();
    ack.proxy_authorization = invite.proxy_authorization.clone();
    ack.user_agent = user_agent.clone();
    ack
}

/// Builds a CANCEL for an in-flight INVITE: same Request-URI, Via (branch
/// included), From/To/Call-ID/CSeq number, and Route.
pub fn new_cancel(invite: &Msg) -> Msg {
    if invite.is_response() || invite.method != Some(Method::Invite) {
        error!(msg = %invite, "trying to CANCEL something that is not an INVITE");
    }
    let mut cancel = Msg {
        method: Some(Method::Cancel),
        request: invite.request.clone(),
        ..Msg::default()
    };
    cancel.via = invite.via.clone();
    cancel.from = invite.from.clone();
    cancel.to = invite.to.clone();
    cancel.call_id = invite.call_id.clone();
    cancel.cseq = invite.cseq;
    cancel.cseq_method = Some(Method::Cancel);
    cancel.route = invite.route.clone();
    cancel
}

/// Builds the BYE tearing down an answered dialog. Increments `l_seq` (or
/// continues from the INVITE's CSeq when the dialog never tracked one);
/// targets the remote's Contact through the reversed Record-Route.
pub fn new_bye(invite: &Msg, remote: &Msg, l_seq: Option<&mut u32>) -> Msg {
    let cseq = match l_seq {
        Some(l_seq) => {
            *l_seq += 1;
            *l_seq
        }
        None => invite.cseq + 1,
    };
    let mut bye = Msg {
        method: Some(Method::Bye),
        request: remote.contact.as_ref().map(|c| c.uri.clone()),
        ..Msg::default()
    };
    bye.from = invite.from.clone();
    bye.to = remote.to.clone();
    bye.call_id = invite.call_id.clone();
    bye.cseq = cseq;
    bye.cseq_method = Some(Method::Bye);
    bye.route = addr::reversed(&remote.record_route);
    bye
}

/// Returns true if `rsp` answers `req`: CSeq number and method agree and the
/// topmost Via matches by host/port and branch. Do not use for ACKs.
pub fn response_match(req: &Msg, rsp: &Msg) -> bool {
    rsp.is_response()
        && rsp.cseq == req.cseq
        && rsp.cseq_method == req.method
        && match (rsp.via.first(), req.via.first()) {
            (Some(rsp_via), Some(req_via)) => {
                rsp_via.compare_host_port(req_via) && rsp_via.compare_branch(req_via)
            }
            _ => false,
        }
}

/// Returns true if `ack` acknowledges `msg`. The Via branch is not enforced
/// because some endpoints regenerate it for ACKs.
pub fn ack_match(msg: &Msg, ack: &Msg) -> bool {
    !ack.is_response()
        && ack.method == Some(Method::Ack)
        && ack.cseq == msg.cseq
        && ack.cseq_method == Some(Method::Ack)
        && match (ack.via.first(), msg.via.first()) {
            (Some(ack_via), Some(msg_via)) => ack_via.compare_host_port(msg_via),
            _ => false,
        }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sipling_core::{Addr, Uri, Via};

    fn invite() -> Msg {
        let mut msg = Msg::request(
            Method::Invite,
            Uri::parse("sip:bob@example.com").unwrap(),
        );
        msg.via
            .push(Via::parse("SIP/2.0/UDP 10.0.0.2:5062;branch=z9hG4bKouja").unwrap());
        msg.from = Some(Addr::parse("<sip:alice@10.0.0.2:5062>;tag=fromtag").unwrap());
        msg.to = Some(Addr::parse("<sip:bob@example.com>").unwrap());
        msg.call_id = SmolStr::new("call-1");
        msg.cseq = 4902;
        msg.cseq_method = Some(Method::Invite);
        msg.authorization = SmolStr::new("Digest username=\"alice\"");
        msg
    }

    fn ok_response(req: &Msg) -> Msg {
        let mut resp = Msg::response(200);
        resp.via = req.via.clone();
        resp.from = req.from.clone();
        let mut to = req.to.clone().unwrap();
        to.params.push("tag", Some(SmolStr::new("totag")));
        resp.to = Some(to);
        resp.call_id = req.call_id.clone();
        resp.cseq = req.cseq;
        resp.cseq_method = req.method.clone();
        resp.contact = Some(Addr::parse("<sip:bob@192.0.2.5:5060>").unwrap());
        resp.record_route = Addr::parse_list(
            "<sip:p1.example.com;lr>, <sip:p2.example.com;lr>",
        )
        .unwrap();
        resp
    }

    #[test]
    fn response_mirrors_transaction_headers() {
        let ua = SmolStr::new("sipmanager/1.0");
        let req = invite();
        let resp = new_response(&req, 486, &ua, false);
        assert_eq!(resp.status, 486);
        assert_eq!(resp.phrase.as_str(), "Busy Here");
        assert_eq!(resp.via, req.via);
        assert_eq!(resp.call_id, req.call_id);
        assert_eq!(resp.cseq, req.cseq);
        assert_eq!(resp.cseq_method, Some(Method::Invite));
        assert_eq!(resp.allow.as_str(), ALLOW);
    }

    #[test]
    fn allow_extends_with_reinvite() {
        let ua = SmolStr::new("sipmanager/1.0");
        let resp = new_response(&invite(), 200, &ua, true);
        assert_eq!(resp.allow.as_str(), ALLOW_WITH_REINVITE);
    }

    #[test]
    fn ack_targets_contact_through_reversed_record_route() {
        let ua = SmolStr::new("sipmanager/1.0");
        let req = invite();
        let resp = ok_response(&req);
        let ack = new_ack(&resp, &req, &ua);

        assert_eq!(ack.method, Some(Method::Ack));
        assert_eq!(ack.request.as_ref().unwrap().host.as_str(), "192.0.2.5");
        assert_eq!(ack.cseq, req.cseq);
        assert_eq!(ack.cseq_method, Some(Method::Ack));
        assert_eq!(ack.via.len(), 1);
        assert_eq!(ack.route.len(), 2);
        assert_eq!(ack.route[0].uri.host.as_str(), "p2.example.com");
        assert_eq!(ack.route[1].uri.host.as_str(), "p1.example.com");
        assert_eq!(ack.authorization, req.authorization);
    }

    #[test]
    fn cancel_shares_the_invite_transaction() {
        let req = invite();
        let cancel = new_cancel(&req);
        assert_eq!(cancel.method, Some(Method::Cancel));
        assert_eq!(cancel.cseq, req.cseq);
        assert_eq!(cancel.cseq_method, Some(Method::Cancel));
        assert_eq!(cancel.via, req.via);
        assert_eq!(cancel.request, req.request);
        assert_eq!(cancel.call_id, req.call_id);
    }

    #[test]
    fn bye_increments_the_dialog_cseq() {
        let req = invite();
        let remote = ok_response(&req);
        let mut l_seq = 4902;
        let bye = new_bye(&req, &remote, Some(&mut l_seq));
        assert_eq!(bye.cseq, 4903);
        assert_eq!(l_seq, 4903);
        assert_eq!(bye.request.as_ref().unwrap().host.as_str(), "192.0.2.5");
        assert_eq!(bye.to.as_ref().unwrap().tag(), Some("totag"));
        assert_eq!(bye.route[0].uri.host.as_str(), "p2.example.com");

        let bye = new_bye(&req, &remote, None);
        assert_eq!(bye.cseq, 4903);
    }

    #[test]
    fn response_matching_requires_branch_agreement() {
        let req = invite();
        let mut resp = ok_response(&req);
        assert!(response_match(&req, &resp));

        resp.via[0].params.get_mut("branch").unwrap().value =
            Some(SmolStr::new("z9hG4bKother"));
        assert!(!response_match(&req, &resp));
    }

    #[test]
    fn response_matching_requires_cseq_agreement() {
        let req = invite();
        let mut resp = ok_response(&req);
        resp.cseq += 1;
        assert!(!response_match(&req, &resp));

        let mut resp = ok_response(&req);
        resp.cseq_method = Some(Method::Bye);
        assert!(!response_match(&req, &resp));
    }

    #[test]
    fn ack_matching_ignores_branch() {
        let req = invite();
        let mut ack = new_ack(&ok_response(&req), &req, &SmolStr::new("ua"));
        // Some endpoints regenerate the branch on ACK.
        ack.via[0].params.get_mut("branch").unwrap().value =
            Some(SmolStr::new("z9hG4bKregenerated"));
        assert!(ack_match(&req, &ack));
    }
}
