//! Scripted mock IED shared by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{ControlError, Result};
use crate::originator::Originator;
use crate::provider::{
    ConnectionAccess, ConnectionState, ControlId, IedConnection, IedDirectory,
};
use crate::types::{FunctionalConstraint, MmsValue};

/// In-memory IED double with scripted read/control behavior.
///
/// Reads consult a per-reference script queue first (`push_read` /
/// `fail_reads`), then a sticky value map (`set_read`); everything else
/// fails with a service rejection, which is what a real device does for
/// an attribute it does not expose.
#[derive(Debug, Default)]
pub(crate) struct MockIed {
    pub connected: bool,

    read_queue: HashMap<String, VecDeque<Option<MmsValue>>>,
    read_sticky: HashMap<String, MmsValue>,
    pub reads: Vec<String>,

    accept_writes: Vec<String>,
    pub writes: Vec<(String, MmsValue)>,

    directory: HashMap<String, Vec<String>>,

    next_session: u64,
    pub open_count: usize,
    pub close_count: usize,
    pub open_fails: bool,

    pub select_ok: bool,
    pub select_calls: usize,
    pub select_with_value_calls: usize,
    pub operate_ok: bool,
    pub operate_calls: usize,
    pub operate_log: Vec<(MmsValue, u8)>,
    pub cancel_ok: bool,
    pub cancel_calls: usize,

    pub last_originator: Option<Originator>,
    pub async_ctlnum: Option<u8>,
    pub capture_waits: Vec<Duration>,
    pub device_error_code: i32,
}

impl MockIed {
    /// A connected device with permissive control defaults.
    pub fn connected() -> Self {
        Self {
            connected: true,
            select_ok: true,
            operate_ok: true,
            cancel_ok: true,
            ..Self::default()
        }
    }

    /// Queue one successful read for a reference.
    pub fn push_read(&mut self, reference: &str, value: MmsValue) {
        self.read_queue
            .entry(reference.to_string())
            .or_default()
            .push_back(Some(value));
    }

    /// Queue `n` failing reads for a reference.
    pub fn fail_reads(&mut self, reference: &str, n: usize) {
        let queue = self.read_queue.entry(reference.to_string()).or_default();
        for _ in 0..n {
            queue.push_back(None);
        }
    }

    /// Sticky value returned whenever the script queue is empty.
    pub fn set_read(&mut self, reference: &str, value: MmsValue) {
        self.read_sticky.insert(reference.to_string(), value);
    }

    /// Allow raw writes to a reference (recorded in `writes`).
    pub fn allow_write(&mut self, reference: &str) {
        self.accept_writes.push(reference.to_string());
    }

    /// Set the child-attribute directory of a Data Object.
    pub fn set_directory(&mut self, reference: &str, children: &[&str]) {
        self.directory.insert(
            reference.to_string(),
            children.iter().map(|c| c.to_string()).collect(),
        );
    }

    fn reject(&self) -> ControlError {
        ControlError::service_rejected(if self.device_error_code != 0 {
            self.device_error_code
        } else {
            14 // object undefined
        })
    }
}

#[async_trait]
impl IedConnection for MockIed {
    fn is_connected(&self) -> bool {
        self.connected
    }

    fn state(&self) -> ConnectionState {
        if self.connected {
            ConnectionState::Connected
        } else {
            ConnectionState::Closed
        }
    }

    async fn read_value(
        &mut self,
        reference: &str,
        _fc: FunctionalConstraint,
    ) -> Result<MmsValue> {
        self.reads.push(reference.to_string());
        if let Some(queue) = self.read_queue.get_mut(reference) {
            if let Some(scripted) = queue.pop_front() {
                return scripted.ok_or_else(|| self.reject());
            }
        }
        match self.read_sticky.get(reference) {
            Some(value) => Ok(value.clone()),
            None => Err(self.reject()),
        }
    }

    async fn write_value(
        &mut self,
        reference: &str,
        _fc: FunctionalConstraint,
        value: &MmsValue,
    ) -> Result<()> {
        if self.accept_writes.iter().any(|r| r == reference) {
            self.writes.push((reference.to_string(), value.clone()));
            Ok(())
        } else {
            Err(self.reject())
        }
    }

    async fn control_open(&mut self, _object_reference: &str) -> Result<ControlId> {
        if self.open_fails {
            return Err(ControlError::service_rejected(4));
        }
        self.next_session += 1;
        self.open_count += 1;
        Ok(ControlId(self.next_session))
    }

    async fn control_set_originator(
        &mut self,
        _id: ControlId,
        originator: &Originator,
    ) -> Result<()> {
        self.last_originator = Some(originator.clone());
        Ok(())
    }

    async fn control_select(&mut self, _id: ControlId) -> Result<bool> {
        self.select_calls += 1;
        Ok(self.select_ok)
    }

    async fn control_select_with_value(
        &mut self,
        _id: ControlId,
        _value: &MmsValue,
    ) -> Result<bool> {
        self.select_calls += 1;
        self.select_with_value_calls += 1;
        Ok(self.select_ok)
    }

    async fn control_operate(
        &mut self,
        _id: ControlId,
        value: &MmsValue,
        ctl_num: u8,
    ) -> Result<bool> {
        self.operate_calls += 1;
        if self.operate_ok {
            self.operate_log.push((value.clone(), ctl_num));
        }
        Ok(self.operate_ok)
    }

    async fn control_cancel(&mut self, _id: ControlId) -> Result<bool> {
        self.cancel_calls += 1;
        Ok(self.cancel_ok)
    }

    async fn control_select_capture_ctlnum(
        &mut self,
        _id: ControlId,
        wait: Duration,
    ) -> Result<Option<u8>> {
        self.capture_waits.push(wait);
        Ok(self.async_ctlnum)
    }

    fn control_last_error(&self, _id: ControlId) -> i32 {
        self.device_error_code
    }

    fn control_close(&mut self, _id: ControlId) {
        self.close_count += 1;
    }
}

#[async_trait]
impl IedDirectory for MockIed {
    async fn data_directory(&mut self, object_reference: &str) -> Result<Vec<String>> {
        self.directory
            .get(object_reference)
            .cloned()
            .ok_or_else(|| self.reject())
    }
}

impl ConnectionAccess for MockIed {
    type Conn = Self;

    fn connection(&mut self) -> &mut Self {
        self
    }
}
