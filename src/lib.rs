//! # voltage_iec61850
//!
//! IEC 61850 control-object client logic for Rust.
//!
//! This crate implements the Select-Before-Operate (SBO) and Direct-Operate
//! command sequences used to control switchgear and other equipment in
//! substations, including the defensive fallback strategies real IEDs
//! require in practice.
//!
//! ## Features
//!
//! - **Full SBO Handshake**: select, ctlNum tracking, timed operate window
//! - **Fallback Tiers**: raw `SBO`/`SBOw`/`Oper` structure writes when the
//!   formal control services misbehave
//! - **ctlNum Tracking**: bounded polling plus asynchronous callback capture
//!   of the IED-assigned sequence number
//! - **Context Registry**: per-object runtime state cached under every
//!   address alias, including breaker-to-`CSWI` redirection
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use voltage_iec61850::{CommandParams, ControlCoordinator, MmsValue};
//!
//! #[tokio::main]
//! async fn main() -> voltage_iec61850::Result<()> {
//!     // `conn` is any IedConnection + IedDirectory implementation,
//!     // typically a wrapper over a native MMS client stack.
//!     let coordinator = ControlCoordinator::new(conn);
//!
//!     coordinator.init_control_context("IED1/CSWI1.Pos").await;
//!
//!     let params = CommandParams::new().sbo_timeout_ms(100);
//!     coordinator
//!         .send_command("IED1/CSWI1.Pos", &MmsValue::Bool(true), &params)
//!         .await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Protocol Overview
//!
//! IEC 61850 controls a Data Object through its `ctlModel`:
//!
//! - **Direct operate** (models 1 and 3): a single operate request
//! - **SBO** (models 2 and 4): the object must be selected first; the IED
//!   assigns a modulo-256 `ctlNum` to the reservation and the matching
//!   operate must echo it within the select-to-operate window
//!
//! Transport establishment and model discovery are external collaborators;
//! the coordinator works against the [`IedConnection`] and [`IedDirectory`]
//! trait seams and serializes every call through one lock, because the
//! underlying stacks are not safe for concurrent use on a single
//! association.

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod address;
pub mod coordinator;
pub mod error;
pub mod originator;
pub mod payload;
pub mod provider;
pub mod session;
pub mod tracker;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

// Re-export main types
pub use coordinator::{CommandParams, ControlCoordinator, CoordinatorConfig, DEFAULT_SBO_TIMEOUT};
pub use error::{service_error_description, ControlError, Result};
pub use originator::Originator;
pub use provider::{ConnectionAccess, ConnectionState, ControlId, IedConnection, IedDirectory};
pub use session::ControlClientSession;
pub use tracker::CtlNumTracker;
pub use types::*;
