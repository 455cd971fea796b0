//! Thin session wrapper over one provider-side control handle.
//!
//! A session is bound to one Data-Object reference and lives for at most
//! one select/operate pair. The coordinator owns the session exclusively
//! and closes it on every exit path; a session must never outlive the
//! call sequence that opened it.

use std::time::Duration;

use crate::error::Result;
use crate::originator::Originator;
use crate::provider::{ControlId, IedConnection};
use crate::types::MmsValue;

/// One control session bound to a Data-Object reference.
#[derive(Debug)]
pub struct ControlClientSession {
    id: ControlId,
    object_reference: String,
}

impl ControlClientSession {
    /// Open a session for the given Data Object.
    pub async fn open<C: IedConnection>(conn: &mut C, object_reference: &str) -> Result<Self> {
        let id = conn.control_open(object_reference).await?;
        Ok(Self {
            id,
            object_reference: object_reference.to_string(),
        })
    }

    /// The Data-Object reference this session is bound to.
    #[inline]
    pub fn object_reference(&self) -> &str {
        &self.object_reference
    }

    /// Attach originator information.
    pub async fn set_originator<C: IedConnection>(
        &self,
        conn: &mut C,
        originator: &Originator,
    ) -> Result<()> {
        conn.control_set_originator(self.id, originator).await
    }

    /// Plain select.
    pub async fn select<C: IedConnection>(&self, conn: &mut C) -> Result<bool> {
        conn.control_select(self.id).await
    }

    /// Select-with-value (enhanced SBO).
    pub async fn select_with_value<C: IedConnection>(
        &self,
        conn: &mut C,
        value: &MmsValue,
    ) -> Result<bool> {
        conn.control_select_with_value(self.id, value).await
    }

    /// Operate with the current sequence number.
    pub async fn operate<C: IedConnection>(
        &self,
        conn: &mut C,
        value: &MmsValue,
        ctl_num: u8,
    ) -> Result<bool> {
        conn.control_operate(self.id, value, ctl_num).await
    }

    /// Cancel an outstanding selection.
    pub async fn cancel<C: IedConnection>(&self, conn: &mut C) -> Result<bool> {
        conn.control_cancel(self.id).await
    }

    /// Asynchronous select capturing the IED-assigned ctlNum.
    pub async fn capture_ctlnum<C: IedConnection>(
        &self,
        conn: &mut C,
        wait: Duration,
    ) -> Result<Option<u8>> {
        conn.control_select_capture_ctlnum(self.id, wait).await
    }

    /// Last device error code recorded on this session.
    pub fn last_error<C: IedConnection>(&self, conn: &C) -> i32 {
        conn.control_last_error(self.id)
    }

    /// Release the session and its native resources.
    pub fn close<C: IedConnection>(self, conn: &mut C) {
        conn.control_close(self.id);
    }
}
