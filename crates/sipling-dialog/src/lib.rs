// sipling - a signalling-only SIP user agent client
// Copyright (C) 2025 The sipling Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! SIP dialog lifecycle management over UDP.
//!
//! A [`Manager`] owns one UDP socket and multiplexes any number of concurrent
//! dialogs over it, dispatching incoming datagrams by Call-ID. Each dialog is
//! driven by its own task: it sends the INVITE, retransmits what the network
//! loses, fails over across resolver-provided routes, and tears the call down
//! with CANCEL or BYE.
//!
//! This is signalling only. Media never touches this crate; SDP payloads are
//! parsed and handed to the application, which wires up its own engine.
//!
//! # Example
//! ```no_run
//! use sipling_core::{Method, Msg, Uri};
//! use sipling_dialog::{DialogStatus, Manager, ManagerConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = Manager::new(ManagerConfig::new().listen_port(5060)).await?;
//! let invite = Msg::request(Method::Invite, Uri::parse("sip:bob@example.com")?);
//! let mut dialog = manager.new_dialog(invite)?;
//! while let Some(state) = dialog.on_state.recv().await {
//!     if state == DialogStatus::Answered {
//!         dialog.hangup();
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod config;
mod dialog;
mod error;
mod manager;
pub mod messages;
mod receiver;
mod route;

pub use config::ManagerConfig;
pub use dialog::{Dialog, DialogStatus};
pub use error::DialogError;
pub use manager::Manager;
