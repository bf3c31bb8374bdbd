// sipling - a signalling-only SIP user agent client
// Copyright (C) 2025 The sipling Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-call state machine and the task that runs it.
//!
//! Every dialog is one tokio task selecting over four inputs: messages
//! dispatched by the receive loop, the request resend deadline, the response
//! resend deadline (reliable 200s to re-INVITEs), and the application's
//! hangup trigger. All dialog state lives on that task; nothing is shared.

use smol_str::SmolStr;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Duration, Instant};
use tracing::{error, warn};

use sipling_core::{gen, status, Addr, Method, Msg, Payload, Uri, Via};
use sipling_sdp::Sdp;

use crate::error::DialogError;
use crate::manager::{Inner, Manager};
use crate::messages;
use crate::route;

/// Dialog lifecycle states, in the order they may be entered. `Hangup` and
/// `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DialogStatus {
    Proceeding,
    Ringing,
    Answered,
    Hangup,
    Failed,
}

/// Application handle for one call.
///
/// The three streams deliver errors, state transitions, and peer session
/// descriptions; all of them close when the dialog is gone. Dropping the
/// handle does not hang up.
pub struct Dialog {
    pub on_err: mpsc::UnboundedReceiver<DialogError>,
    pub on_state: mpsc::UnboundedReceiver<DialogStatus>,
    pub on_peer: mpsc::UnboundedReceiver<Sdp>,
    hangup_tx: Option<oneshot::Sender<()>>,
}

impl Dialog {
    /// Requests teardown: CANCEL before answer, BYE after. At most once;
    /// repeated calls are no-ops.
    pub fn hangup(&mut self) {
        if let Some(tx) = self.hangup_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Manager {
    /// Registers a new dialog under the INVITE's Call-ID (generated when
    /// empty) and spawns its task, which sends the INVITE and runs the timer
    /// loop.
    pub fn new_dialog(&self, mut invite: Msg) -> Result<Dialog, DialogError> {
        if invite.is_response() || invite.method != Some(Method::Invite) {
            return Err(DialogError::Protocol(
                "new_dialog requires an INVITE request".to_owned(),
            ));
        }
        if invite.call_id.is_empty() {
            invite.call_id = gen::generate_call_id();
        }
        let call_id = invite.call_id.clone();

        let (err_tx, on_err) = mpsc::unbounded_channel();
        let (state_tx, on_state) = mpsc::unbounded_channel();
        let (peer_tx, on_peer) = mpsc::unbounded_channel();
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (hangup_tx, hangup_rx) = oneshot::channel();

        let state = DialogState {
            manager: Arc::downgrade(&self.inner),
            err_tx,
            state_tx,
            peer_tx,
            state: None,
            call_id: call_id.clone(),
            dest: SmolStr::default(),
            addr: None,
            routes: VecDeque::new(),
            invite,
            remote: None,
            request: None,
            request_is_invite: false,
            request_resends: 0,
            request_deadline: None,
            response: None,
            response_resends: 0,
            response_deadline: None,
            l_seq: 0,
            r_seq: 0,
        };

        self.inner.dialogs.insert(call_id, input_tx);
        tokio::spawn(state.run(input_rx, hangup_rx));

        Ok(Dialog {
            on_err,
            on_state,
            on_peer,
            hangup_tx: Some(hangup_tx),
        })
    }
}

struct DialogState {
    manager: Weak<Inner>,
    err_tx: mpsc::UnboundedSender<DialogError>,
    state_tx: mpsc::UnboundedSender<DialogStatus>,
    peer_tx: mpsc::UnboundedSender<Sdp>,
    /// `None` until the first provisional response (pre-Proceeding).
    state: Option<DialogStatus>,
    call_id: SmolStr,
    /// Destination hostname queried from the resolver.
    dest: SmolStr,
    /// Currently selected transport address.
    addr: Option<SocketAddr>,
    /// Remaining fallback addresses; truncated, never extended.
    routes: VecDeque<SocketAddr>,
    /// Our INVITE, kept for resends and CANCEL/BYE construction.
    invite: Msg,
    /// Latest message from the remote UA that established the dialog.
    remote: Option<Msg>,
    /// Current outstanding outbound request.
    request: Option<Msg>,
    /// Whether `request` is the dialog-establishing INVITE.
    request_is_invite: bool,
    request_resends: u32,
    request_deadline: Option<Instant>,
    /// Reliably-delivered 200 to a re-INVITE, if one is in flight.
    response: Option<Msg>,
    response_resends: u32,
    response_deadline: Option<Instant>,
    /// Next local CSeq.
    l_seq: u32,
    /// Last accepted remote CSeq, 0 if none yet.
    r_seq: u32,
}

impl DialogState {
    async fn run(
        mut self,
        mut input: mpsc::UnboundedReceiver<Msg>,
        mut hangup: oneshot::Receiver<()>,
    ) {
        let invite = self.invite.clone();
        let mut alive = self.send_request(invite).await;
        let mut hangup_armed = true;

        while alive && !self.terminal() {
            tokio::select! {
                incoming = input.recv() => match incoming {
                    Some(msg) if msg.is_response() => alive = self.handle_response(msg).await,
                    Some(msg) => alive = self.handle_request(msg).await,
                    None => break,
                },
                outcome = &mut hangup, if hangup_armed => {
                    hangup_armed = false;
                    if outcome.is_ok() {
                        alive = self.hangup().await;
                    }
                },
                _ = sleep_until(self.request_deadline.unwrap_or_else(far_future)),
                    if self.request_deadline.is_some() =>
                {
                    alive = self.resend_request().await;
                },
                _ = sleep_until(self.response_deadline.unwrap_or_else(far_future)),
                    if self.response_deadline.is_some() =>
                {
                    alive = self.resend_response().await;
                },
            }
        }

        self.cleanup();
    }

    fn terminal(&self) -> bool {
        matches!(
            self.state,
            Some(DialogStatus::Hangup) | Some(DialogStatus::Failed)
        )
    }

    fn pre_answered(&self) -> bool {
        match self.state {
            None => true,
            Some(state) => state < DialogStatus::Answered,
        }
    }

    /// Deregisters the Call-ID. The event streams close when this state (and
    /// its senders) drop with the task.
    fn cleanup(&mut self) {
        if let Some(inner) = self.manager.upgrade() {
            inner.dialogs.remove(&self.call_id);
        }
    }

    fn emit_err(&self, err: DialogError) {
        let _ = self.err_tx.send(err);
    }

    /// Advances the state machine. States only move forward; a straggling
    /// provisional response cannot regress an answered call.
    fn transition(&mut self, status: DialogStatus) {
        if let Some(current) = self.state {
            if status < current {
                return;
            }
        }
        self.state = Some(status);
        let _ = self.state_tx.send(status);
    }

    /// If the message carries an SDP payload, hand it to the application.
    fn check_sdp(&self, msg: &Msg) {
        if let Payload::Sdp(sdp) = &msg.payload {
            let _ = self.peer_tx.send(sdp.clone());
        }
    }

    /// Prepares an INVITE or BYE for sending: computes the route fallback
    /// list and transmits to the first usable address.
    async fn send_request(&mut self, mut request: Msg) -> bool {
        let Some(inner) = self.manager.upgrade() else {
            return false;
        };
        let (host, port) = match route::route_message(None, None, &mut request) {
            Ok(pair) => pair,
            Err(err) => {
                self.emit_err(err);
                return false;
            }
        };
        let want_srv = self.pre_answered();
        let routes = match inner.resolver.route_address(&host, port, want_srv).await {
            Ok(routes) => routes,
            Err(err) => {
                self.emit_err(err.into());
                return false;
            }
        };
        self.request_is_invite = request.method == Some(Method::Invite);
        self.request = Some(request);
        self.routes = routes.into();
        self.dest = host;
        self.pop_route(&inner).await
    }

    /// Selects the next route, re-populates the outstanding request, and
    /// transmits. Dead routes are discarded until the list is exhausted,
    /// which fails the dialog.
    async fn pop_route(&mut self, inner: &Inner) -> bool {
        loop {
            let Some(addr) = self.routes.pop_front() else {
                self.emit_err(DialogError::RouteExhausted {
                    dest: self.dest.to_string(),
                });
                return false;
            };
            self.addr = Some(addr);
            if !self.connect() {
                continue;
            }
            let Some(mut request) = self.request.take() else {
                return true;
            };
            self.populate(inner, &mut request);
            if self.pre_answered() {
                self.r_seq = 0;
                self.remote = None;
                self.l_seq = request.cseq;
            }
            self.request_resends = 0;
            self.request_deadline = Some(Instant::now() + inner.resend_interval);
            let sent = inner.transmit(&mut request, self.addr).await;
            if self.request_is_invite {
                self.invite = request.clone();
            }
            self.request = Some(request);
            match sent {
                Ok(()) => return true,
                Err(err) => {
                    error!(
                        resends = self.request_resends,
                        %err,
                        "error sending request message"
                    );
                    continue;
                }
            }
        }
    }

    /// Reserved per-destination handshake hook. Nothing to do over plain UDP.
    fn connect(&self) -> bool {
        true
    }

    /// Dialog-level population: local Via identity with a fresh branch per
    /// route attempt, Contact port/transport, and SDP origin defaults, then
    /// the generic fill.
    fn populate(&self, inner: &Inner, msg: &mut Msg) {
        let host = SmolStr::new(inner.public_ip().to_string());
        let port = inner.public_port();

        if msg.via.is_empty() {
            msg.via.push(Via::udp(host.clone(), port));
        }
        let via = &mut msg.via[0];
        via.port = port;
        // Each route attempt is a new transaction.
        via.params.set_front("branch", Some(gen::generate_branch()));

        if msg.contact.is_none() {
            msg.contact = Some(Addr::new(Uri::sip(host.clone())));
        }
        if let Some(contact) = msg.contact.as_mut() {
            contact.uri.port = port;
            if !contact.uri.params.has("transport") {
                contact
                    .uri
                    .params
                    .push_front("transport", Some(SmolStr::new("udp")));
            }
        }

        if msg.method == Some(Method::Invite) {
            if let Payload::Sdp(sdp) = &mut msg.payload {
                if sdp.addr.is_empty() {
                    sdp.addr = host.clone();
                }
                if sdp.origin.addr.is_empty() {
                    sdp.origin.addr = host.clone();
                }
                if sdp.origin.id.is_empty() {
                    sdp.origin.id = sipling_sdp::generate_origin_id();
                }
            }
        }

        route::populate_message(&inner.via, &inner.contact, &inner.user_agent, msg);
    }

    async fn resend_request(&mut self) -> bool {
        let Some(inner) = self.manager.upgrade() else {
            return false;
        };
        // Nothing outstanding, or the timer was cancelled under us.
        if self.request.is_none() {
            self.request_deadline = None;
            return true;
        }
        if self.request_resends < inner.max_resends {
            let Some(mut request) = self.request.take() else {
                return true;
            };
            let sent = inner.transmit(&mut request, self.addr).await;
            self.request = Some(request);
            if let Err(err) = sent {
                error!(%err, "unable to resend message");
                self.emit_err(err);
                return false;
            }
            self.request_resends += 1;
            self.request_deadline = Some(Instant::now() + inner.resend_interval);
            true
        } else {
            error!(
                resends = self.request_resends,
                dest = %self.dest,
                addr = ?self.addr,
                "timeout sending request message"
            );
            self.pop_route(&inner).await
        }
    }

    /// Reliably sends a 2xx answer to a re-INVITE, arming its resend timer.
    async fn send_response(&mut self, inner: &Inner, msg: Msg) -> bool {
        let mut response = msg;
        if let Err(err) = inner.transmit(&mut response, None).await {
            error!(%err, "unable to send response to invite");
            self.emit_err(err);
            return false;
        }
        self.response = Some(response);
        self.response_resends = 0;
        self.response_deadline = Some(Instant::now() + inner.resend_interval);
        true
    }

    async fn resend_response(&mut self) -> bool {
        let Some(inner) = self.manager.upgrade() else {
            return false;
        };
        if self.response.is_none() {
            self.response_deadline = None;
            return true;
        }
        if self.response_resends < inner.max_resends {
            let Some(mut response) = self.response.take() else {
                return true;
            };
            let sent = inner.transmit(&mut response, None).await;
            self.response = Some(response);
            if let Err(err) = sent {
                error!(%err, "unable to resend response");
                self.emit_err(err);
                return false;
            }
            self.response_resends += 1;
            self.response_deadline = Some(Instant::now() + inner.resend_interval);
            true
        } else {
            error!(
                resends = self.response_resends,
                dest = %self.dest,
                "timeout sending response message"
            );
            self.response_deadline = None;
            self.pop_route(&inner).await
        }
    }

    /// Handles a response dispatched to this dialog.
    async fn handle_response(&mut self, msg: Msg) -> bool {
        let Some(inner) = self.manager.upgrade() else {
            return false;
        };
        let Some(request) = self.request.as_ref() else {
            warn!(msg = %msg, "received response with no outstanding request");
            return true;
        };
        if !messages::response_match(request, &msg) {
            warn!(
                original_request = %request,
                msg = %msg,
                "received response doesn't match transaction"
            );
            return true;
        }

        // Final responses to an INVITE are ACKed end to end. A 2xx must name
        // a Contact to ACK toward; a non-2xx without one simply is not ACKed.
        if msg.status >= status::STATUS_OK && request.method == Some(Method::Invite) {
            if msg.contact.is_some() {
                let mut ack = messages::new_ack(&msg, &self.invite, &inner.user_agent);
                if let Err(err) = inner.transmit(&mut ack, self.addr).await {
                    error!(%err, msg = %msg, "unable to send ack message");
                    self.emit_err(err);
                    return false;
                }
            } else if msg.status < 300 {
                self.emit_err(DialogError::Protocol(
                    "remote ua sent >=200 response w/o contact".to_owned(),
                ));
                return false;
            }
        }

        if msg.status <= status::STATUS_OK {
            self.check_sdp(&msg);
        }

        // A response reached us, so stop resending; the request object stays
        // because more responses may follow a provisional.
        self.request_deadline = None;

        let cseq_method = msg.cseq_method.clone();
        match msg.status {
            status::STATUS_TRYING => self.transition(DialogStatus::Proceeding),
            status::STATUS_RINGING | status::STATUS_SESSION_PROGRESS => {
                self.transition(DialogStatus::Ringing)
            }
            status::STATUS_OK => match cseq_method {
                Some(Method::Invite) => {
                    if self.remote.is_none() {
                        self.transition(DialogStatus::Answered);
                    }
                    self.routes.clear();
                    self.remote = Some(msg);
                }
                Some(Method::Bye) | Some(Method::Cancel) => {
                    self.transition(DialogStatus::Hangup);
                    return false;
                }
                _ => {}
            },
            status::STATUS_SERVICE_UNAVAILABLE => {
                if self.request_is_invite {
                    error!(
                        dest = %self.dest,
                        addr = ?self.addr,
                        "received '503 service unavailable' reply to invite"
                    );
                    return self.pop_route(&inner).await;
                }
                self.emit_err(DialogError::Response(Box::new(msg)));
                return false;
            }
            status::STATUS_MOVED_PERMANENTLY | status::STATUS_MOVED_TEMPORARILY => {
                let Some(contact) = msg.contact else {
                    self.emit_err(DialogError::Protocol(
                        "redirect without contact".to_owned(),
                    ));
                    return false;
                };
                // Chase the redirect: new Request-URI, fresh routing.
                self.invite.request = Some(contact.uri.clone());
                self.invite.route.clear();
                let invite = self.invite.clone();
                return self.send_request(invite).await;
            }
            code if code > status::STATUS_OK => {
                self.emit_err(DialogError::Response(Box::new(msg)));
                return false;
            }
            _ => {}
        }
        true
    }

    /// Handles an in-dialog request from the remote side.
    async fn handle_request(&mut self, msg: Msg) -> bool {
        let Some(inner) = self.manager.upgrade() else {
            return false;
        };
        if msg.max_forwards == 0 {
            let mut reply = inner.new_response(&msg, status::STATUS_TOO_MANY_HOPS);
            if let Err(err) = inner.transmit(&mut reply, None).await {
                error!(%err, "unable to send '483 too many hops' reply");
                return false;
            }
            self.emit_err(DialogError::Protocol("remote loop detected".to_owned()));
            return false;
        }

        if self.r_seq == 0 {
            self.r_seq = msg.cseq;
        } else {
            if msg.cseq < self.r_seq {
                // RFC 3261 mandates a 500 for out-of-order requests.
                let mut reply =
                    inner.new_response(&msg, status::STATUS_INTERNAL_SERVER_ERROR);
                if let Err(err) = inner.transmit(&mut reply, None).await {
                    error!(%err, "unable to send '500' reply to out-of-sequence message");
                    return false;
                }
                return true;
            }
            self.r_seq = msg.cseq;
        }

        match msg.method.clone() {
            Some(Method::Bye) => {
                let mut reply = inner.new_response(&msg, status::STATUS_OK);
                if let Err(err) = inner.transmit(&mut reply, None).await {
                    error!(%err, "unable to send '200 ok' reply to incoming 'bye'");
                    return false;
                }
                self.transition(DialogStatus::Hangup);
                false
            }
            Some(Method::Options) => {
                // Probably a keep-alive ping.
                let mut reply = inner.new_response(&msg, status::STATUS_OK);
                if let Err(err) = inner.transmit(&mut reply, None).await {
                    error!(%err, "unable to send '200 ok' reply to incoming 'options'");
                    return false;
                }
                true
            }
            Some(Method::Invite) => {
                // Re-INVITEs change the media or signalling path.
                self.check_sdp(&msg);
                let reply = inner.new_response(&msg, status::STATUS_OK);
                self.remote = Some(msg);
                self.send_response(&inner, reply).await
            }
            Some(Method::Ack) => {
                // Our 2xx to a re-INVITE has been acknowledged.
                if let Some(response) = &self.response {
                    if messages::ack_match(response, &msg) {
                        self.response = None;
                        self.response_deadline = None;
                    }
                }
                true
            }
            _ => {
                let mut reply = inner.new_response(&msg, status::STATUS_METHOD_NOT_ALLOWED);
                if let Err(err) = inner.transmit(&mut reply, None).await {
                    error!(%err, "unable to send '405 method not allowed' reply");
                    return false;
                }
                true
            }
        }
    }

    /// Application-requested teardown, dispatched on current state.
    async fn hangup(&mut self) -> bool {
        let Some(inner) = self.manager.upgrade() else {
            return false;
        };
        match self.state {
            Some(DialogStatus::Proceeding) | Some(DialogStatus::Ringing) => {
                let mut cancel = messages::new_cancel(&self.invite);
                match inner.transmit(&mut cancel, self.addr).await {
                    Ok(()) => {
                        // The CANCEL becomes the outstanding request so its
                        // 200 matches and drives the dialog to Hangup.
                        self.request_is_invite = false;
                        self.request = Some(cancel);
                        self.request_deadline = None;
                        true
                    }
                    Err(err) => {
                        error!(%err, "unable to send 'cancel' message");
                        self.emit_err(err);
                        false
                    }
                }
            }
            Some(DialogStatus::Answered) => {
                let Some(remote) = self.remote.as_ref() else {
                    self.transition(DialogStatus::Hangup);
                    return false;
                };
                let bye = messages::new_bye(&self.invite, remote, Some(&mut self.l_seq));
                self.send_request(bye).await
            }
            Some(DialogStatus::Hangup) => {
                error!("trying to hang up a call that is already hung up");
                true
            }
            _ => {
                // A UA cannot CANCEL a transaction before a provisional
                // response (RFC 3261 §9.1).
                self.transition(DialogStatus::Hangup);
                false
            }
        }
    }
}

fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(86400)
}
