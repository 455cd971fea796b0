//! Collaborator interfaces consumed by the control coordinator.
//!
//! Transport establishment and model discovery live outside this crate;
//! the coordinator only needs a live connection handle exposing the raw
//! read/write/control primitives, plus a directory lookup for one-shot
//! capability probing. Implementations typically wrap a native MMS client
//! stack; the types here are the seam the coordinator is tested against.
//!
//! The underlying stacks are not safe for concurrent use on a single
//! connection, so every method takes `&mut self` and the coordinator
//! serializes all calls through one lock.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::originator::Originator;
use crate::types::{FunctionalConstraint, MmsValue};

/// Connection state as reported by the transport collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection
    Closed,
    /// TCP/MMS association being established
    Connecting,
    /// Association up, services available
    Connected,
    /// Association being torn down
    Closing,
}

/// Opaque handle to a provider-side control session.
///
/// Issued by [`IedConnection::control_open`] and valid until
/// [`IedConnection::control_close`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ControlId(pub u64);

/// Raw connection primitives the coordinator calls under its lock.
///
/// Service rejections by the device surface as
/// [`ControlError::ServiceRejected`](crate::ControlError::ServiceRejected)
/// so the fallback tiers can record the device-reported code.
#[async_trait]
pub trait IedConnection {
    /// Whether the association is currently usable.
    fn is_connected(&self) -> bool;

    /// Current transport state.
    fn state(&self) -> ConnectionState;

    /// Read an attribute value.
    async fn read_value(
        &mut self,
        reference: &str,
        fc: FunctionalConstraint,
    ) -> Result<MmsValue>;

    /// Write an attribute value.
    async fn write_value(
        &mut self,
        reference: &str,
        fc: FunctionalConstraint,
        value: &MmsValue,
    ) -> Result<()>;

    /// Open a control session bound to a Data-Object reference.
    async fn control_open(&mut self, object_reference: &str) -> Result<ControlId>;

    /// Attach originator information to a control session.
    async fn control_set_originator(
        &mut self,
        id: ControlId,
        originator: &Originator,
    ) -> Result<()>;

    /// Plain select. `Ok(false)` means the IED refused the reservation.
    async fn control_select(&mut self, id: ControlId) -> Result<bool>;

    /// Select-with-value (enhanced-security SBO variant).
    async fn control_select_with_value(
        &mut self,
        id: ControlId,
        value: &MmsValue,
    ) -> Result<bool>;

    /// Operate with the given control value and sequence number.
    async fn control_operate(
        &mut self,
        id: ControlId,
        value: &MmsValue,
        ctl_num: u8,
    ) -> Result<bool>;

    /// Cancel an outstanding selection.
    async fn control_cancel(&mut self, id: ControlId) -> Result<bool>;

    /// Asynchronous select variant that captures the IED-assigned ctlNum
    /// from the completion callback's action handle.
    ///
    /// Waits at most `wait` for the callback; `Ok(None)` when the callback
    /// did not fire or carried no usable sequence number.
    async fn control_select_capture_ctlnum(
        &mut self,
        id: ControlId,
        wait: Duration,
    ) -> Result<Option<u8>>;

    /// Last device error code recorded on a control session, 0 when none.
    fn control_last_error(&self, id: ControlId) -> i32;

    /// Release a control session and its native resources.
    fn control_close(&mut self, id: ControlId);
}

/// Directory lookup used once per object during context initialization.
#[async_trait]
pub trait IedDirectory {
    /// Names of the immediate child attributes of a Data Object.
    async fn data_directory(&mut self, object_reference: &str) -> Result<Vec<String>>;
}

/// Access to the connection inside a larger lock-protected state bundle.
///
/// The coordinator keeps its connection and its runtime registry behind a
/// single mutex; helpers that only need the connection (the ctlNum
/// tracker) go through this accessor instead of the whole bundle.
pub trait ConnectionAccess {
    /// The wrapped connection type.
    type Conn: IedConnection;

    /// Borrow the connection.
    fn connection(&mut self) -> &mut Self::Conn;
}
