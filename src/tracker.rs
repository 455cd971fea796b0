//! Determination of the IED-assigned control sequence number.
//!
//! After a successful select, the operate must carry the ctlNum the IED
//! assigned to the reservation. Devices differ in where (and whether) that
//! number becomes readable, so the tracker polls several read paths and,
//! as a last resort, re-runs the select through the asynchronous service
//! variant whose completion callback carries the number.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::debug;

use crate::error::{ControlError, Result};
use crate::payload;
use crate::provider::{ConnectionAccess, IedConnection};
use crate::session::ControlClientSession;
use crate::types::FunctionalConstraint;

/// Default overall polling budget.
pub const DEFAULT_TRACKER_TIMEOUT: Duration = Duration::from_millis(600);

/// Delay between poll iterations.
pub const DEFAULT_TRACKER_INTERVAL: Duration = Duration::from_millis(80);

/// Upper bound on the async-fallback wait.
const ASYNC_FALLBACK_CAP: Duration = Duration::from_millis(500);

/// Bounded polling + fallback algorithm for the post-select ctlNum.
#[derive(Debug, Clone, Copy)]
pub struct CtlNumTracker {
    /// Overall budget for the poll loop
    pub timeout: Duration,
    /// Delay between poll iterations
    pub interval: Duration,
}

impl Default for CtlNumTracker {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TRACKER_TIMEOUT,
            interval: DEFAULT_TRACKER_INTERVAL,
        }
    }
}

impl CtlNumTracker {
    /// Tracker with the default budget and interval.
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracker with a custom overall budget.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }

    /// Resolve the IED-assigned ctlNum for a just-selected object.
    ///
    /// `link` is the coordinator's lock; it is acquired per attempt so the
    /// connection is never held across a sleep. Fails with
    /// [`ControlError::CtlNumUnavailable`] when polling and the async
    /// fallback are both exhausted.
    pub async fn resolve<T>(
        &self,
        link: &Mutex<T>,
        object_reference: &str,
        sbo_reference: Option<&str>,
    ) -> Result<u8>
    where
        T: ConnectionAccess + Send,
    {
        self.resolve_within(link, object_reference, sbo_reference, self.timeout)
            .await
    }

    /// Same as [`resolve`](Self::resolve) with an explicit budget, used by
    /// `send_command` to honor the caller's SBO timeout.
    pub async fn resolve_within<T>(
        &self,
        link: &Mutex<T>,
        object_reference: &str,
        sbo_reference: Option<&str>,
        budget: Duration,
    ) -> Result<u8>
    where
        T: ConnectionAccess + Send,
    {
        let deadline = Instant::now() + budget;

        loop {
            {
                let mut guard = link.lock().await;
                let conn = guard.connection();
                if let Some(num) = poll_once(conn, object_reference, sbo_reference).await {
                    return Ok(num);
                }
            }
            if Instant::now() + self.interval > deadline {
                break;
            }
            sleep(self.interval).await;
        }

        // Polling exhausted; re-select through the async service variant
        // and capture the ctlNum from its completion callback. The wait is
        // bounded by what is left of the budget so the caller's deadline
        // still holds.
        let remaining = deadline.saturating_duration_since(Instant::now());
        let wait = ASYNC_FALLBACK_CAP.min(remaining);
        let captured = {
            let mut guard = link.lock().await;
            let conn = guard.connection();
            async_capture(conn, object_reference, wait).await
        };
        captured.ok_or(ControlError::CtlNumUnavailable)
    }
}

/// One poll iteration: SBO attribute, base-object attribute, then the
/// whole select structure. First hit wins.
async fn poll_once<C>(
    conn: &mut C,
    object_reference: &str,
    sbo_reference: Option<&str>,
) -> Option<u8>
where
    C: IedConnection,
{
    if let Some(sbo) = sbo_reference {
        let reference = format!("{sbo}.ctlNum");
        match conn.read_value(&reference, FunctionalConstraint::St).await {
            Ok(value) => {
                if let Ok(num) = value.to_ctlnum() {
                    return Some(num);
                }
            }
            Err(err) => debug!(%reference, %err, "ctlNum read failed"),
        }
    }

    let reference = format!("{object_reference}.ctlNum");
    match conn.read_value(&reference, FunctionalConstraint::St).await {
        Ok(value) => {
            if let Ok(num) = value.to_ctlnum() {
                return Some(num);
            }
        }
        Err(err) => debug!(%reference, %err, "ctlNum read failed"),
    }

    if let Some(sbo) = sbo_reference {
        match conn.read_value(sbo, FunctionalConstraint::Co).await {
            Ok(structure) => {
                if let Some(num) = payload::extract_ctlnum(&structure, true) {
                    return Some(num);
                }
            }
            Err(err) => debug!(reference = %sbo, %err, "select structure read failed"),
        }
    }

    None
}

/// Async-select fallback: short-lived session, callback capture.
async fn async_capture<C>(conn: &mut C, object_reference: &str, wait: Duration) -> Option<u8>
where
    C: IedConnection,
{
    let session = match ControlClientSession::open(conn, object_reference).await {
        Ok(session) => session,
        Err(err) => {
            debug!(%object_reference, %err, "async ctlNum capture: session open failed");
            return None;
        }
    };
    let captured = match session.capture_ctlnum(conn, wait).await {
        Ok(num) => num,
        Err(err) => {
            debug!(%object_reference, %err, "async ctlNum capture failed");
            None
        }
    };
    session.close(conn);
    captured
}
