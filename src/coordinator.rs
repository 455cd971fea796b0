//! Control coordinator: the top-level select/operate state machine.
//!
//! The coordinator owns the single connection handle and the per-object
//! runtime registry behind one `tokio::sync::Mutex`; the underlying MMS
//! stacks are not safe for concurrent use on a single association, and
//! runtime mutation is interleaved with connection I/O in every sequence,
//! so both live in the same critical section.
//!
//! Command flow: `send_command` resolves (or initializes) the object's
//! runtime context, then either runs the full Select-Before-Operate
//! handshake (select, ctlNum tracking, select-to-operate wait, operate) or
//! a direct operate, depending on the discovered control model. Select and
//! operate each carry a raw-write fallback tier for IEDs whose formal
//! control services misbehave.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::address::{breaker_redirect_candidate, flattened_reference, resolve_control_object};
use crate::error::{service_error_description, ControlError, Result};
use crate::originator::Originator;
use crate::payload;
use crate::provider::{ConnectionAccess, IedConnection, IedDirectory};
use crate::session::ControlClientSession;
use crate::tracker::CtlNumTracker;
use crate::types::{ControlObjectRuntime, ControlState, FunctionalConstraint, MmsValue};

/// Default select-to-operate window.
pub const DEFAULT_SBO_TIMEOUT: Duration = Duration::from_millis(100);

/// Per-command options recognized by [`ControlCoordinator::send_command`].
#[derive(Debug, Clone)]
pub struct CommandParams {
    /// Select-to-operate window; also bounds the ctlNum tracker
    pub sbo_timeout: Duration,
    /// Originator identity override, written through to the runtime context
    pub originator_id: Option<String>,
    /// Originator category override (1..=7)
    pub originator_cat: Option<u8>,
    /// Skip the select phase regardless of the control model
    pub force_direct: bool,
}

impl Default for CommandParams {
    fn default() -> Self {
        Self {
            sbo_timeout: DEFAULT_SBO_TIMEOUT,
            originator_id: None,
            originator_cat: None,
            force_direct: false,
        }
    }
}

impl CommandParams {
    /// Create params with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the select-to-operate window in milliseconds.
    pub fn sbo_timeout_ms(mut self, ms: u64) -> Self {
        self.sbo_timeout = Duration::from_millis(ms);
        self
    }

    /// Set the originator identity presented to the IED.
    pub fn originator_id(mut self, id: impl Into<String>) -> Self {
        self.originator_id = Some(id.into());
        self
    }

    /// Set the originator category (1..=7).
    pub fn originator_cat(mut self, cat: u8) -> Self {
        self.originator_cat = Some(cat);
        self
    }

    /// Force direct operate, skipping select.
    pub fn force_direct(mut self, force: bool) -> Self {
        self.force_direct = force;
        self
    }
}

/// Coordinator-wide configuration.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Invert boolean control values before encoding.
    ///
    /// The target equipment line reports and accepts breaker positions with
    /// reversed polarity; disable for standard-conforming devices.
    pub inverted_bool_polarity: bool,
    /// ctlNum tracker tuning
    pub tracker: CtlNumTracker,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            inverted_bool_polarity: true,
            tracker: CtlNumTracker::new(),
        }
    }
}

impl CoordinatorConfig {
    /// Create a config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the boolean polarity inversion flag.
    pub fn inverted_bool_polarity(mut self, inverted: bool) -> Self {
        self.inverted_bool_polarity = inverted;
        self
    }

    /// Set the ctlNum tracker tuning.
    pub fn tracker(mut self, tracker: CtlNumTracker) -> Self {
        self.tracker = tracker;
        self
    }
}

/// Arena of runtime contexts with an alias map.
///
/// The same Data Object is addressed by the caller-supplied signal address,
/// the resolved Data-Object path, and possibly a redirected path; all alias
/// to one canonically-owned [`ControlObjectRuntime`].
#[derive(Debug, Default)]
struct ControlRegistry {
    slots: Vec<Option<ControlObjectRuntime>>,
    aliases: HashMap<String, usize>,
}

impl ControlRegistry {
    fn index_of(&self, address: &str) -> Option<usize> {
        self.aliases
            .get(address)
            .copied()
            .filter(|&idx| matches!(self.slots.get(idx), Some(Some(_))))
    }

    fn get(&self, address: &str) -> Option<&ControlObjectRuntime> {
        self.slots.get(self.index_of(address)?)?.as_ref()
    }

    fn runtime(&self, idx: usize) -> Option<&ControlObjectRuntime> {
        self.slots.get(idx)?.as_ref()
    }

    fn runtime_mut(&mut self, idx: usize) -> Option<&mut ControlObjectRuntime> {
        self.slots.get_mut(idx)?.as_mut()
    }

    fn insert(&mut self, runtime: ControlObjectRuntime, aliases: &[&str]) -> usize {
        // reuse a freed slot before growing the arena
        let idx = match self.slots.iter().position(Option::is_none) {
            Some(free) => {
                self.slots[free] = Some(runtime);
                free
            }
            None => {
                self.slots.push(Some(runtime));
                self.slots.len() - 1
            }
        };
        for alias in aliases {
            self.aliases.insert(alias.to_string(), idx);
        }
        idx
    }

    fn remove(&mut self, address: &str) {
        if let Some(idx) = self.index_of(address) {
            self.aliases.retain(|_, i| *i != idx);
            self.slots[idx] = None;
        }
    }

    fn clear(&mut self) {
        self.slots.clear();
        self.aliases.clear();
    }
}

/// Everything the coordinator's lock protects.
#[derive(Debug)]
struct Inner<C> {
    conn: C,
    registry: ControlRegistry,
    last_error: Option<String>,
}

impl<C: IedConnection> ConnectionAccess for Inner<C> {
    type Conn = C;

    fn connection(&mut self) -> &mut C {
        &mut self.conn
    }
}

/// IEC 61850 control coordinator bound to one IED connection.
pub struct ControlCoordinator<C> {
    inner: Mutex<Inner<C>>,
    config: CoordinatorConfig,
}

impl<C> ControlCoordinator<C>
where
    C: IedConnection + IedDirectory + Send,
{
    /// Create a coordinator with the default configuration.
    pub fn new(conn: C) -> Self {
        Self::with_config(conn, CoordinatorConfig::default())
    }

    /// Create a coordinator with a custom configuration.
    pub fn with_config(conn: C, config: CoordinatorConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                conn,
                registry: ControlRegistry::default(),
                last_error: None,
            }),
            config,
        }
    }

    /// Tear down the coordinator and recover the connection handle.
    pub fn into_connection(self) -> C {
        self.inner.into_inner().conn
    }

    /// Last error message recorded by any control sequence.
    pub async fn last_error(&self) -> Option<String> {
        self.inner.lock().await.last_error.clone()
    }

    /// Initialize (or fetch) the runtime context for an address.
    ///
    /// Resolves the address to its Data-Object reference, applies the
    /// breaker-to-control-interface redirection when the paired `CSWI`
    /// object answers, reads the control model and current ctlNum echo from
    /// the device, and probes the object's children for `Oper`/`SBO`/`SBOw`
    /// capabilities. The context is cached under the original address, the
    /// resolved reference and the redirected reference.
    ///
    /// Returns `None` when the connection is down or the address cannot be
    /// resolved; a snapshot of the cached context otherwise.
    pub async fn init_control_context(&self, address: &str) -> Option<ControlObjectRuntime> {
        let mut inner = self.inner.lock().await;
        match self.ensure_context(&mut inner, address).await {
            Ok(idx) => inner.registry.runtime(idx).cloned(),
            Err(err) => {
                debug!(address, %err, "control context initialization failed");
                None
            }
        }
    }

    /// Snapshot of a cached runtime context, if any.
    pub async fn control_context(&self, address: &str) -> Option<ControlObjectRuntime> {
        self.inner.lock().await.registry.get(address).cloned()
    }

    /// Drop the cached context for an address (all aliases).
    pub async fn clear_control_context(&self, address: &str) {
        self.inner.lock().await.registry.remove(address);
    }

    /// Drop every cached context, e.g. on connection teardown.
    pub async fn clear_all_contexts(&self) {
        self.inner.lock().await.registry.clear();
    }

    /// Issue a control command against an address.
    ///
    /// Runs the full SBO handshake when the control model requires it,
    /// direct operate otherwise. `params.force_direct` skips the select
    /// phase unconditionally. If the IED-assigned ctlNum cannot be
    /// determined after a successful select, the sequence is abandoned with
    /// [`ControlError::CtlNumUnavailable`] and operate is never issued.
    pub async fn send_command(
        &self,
        address: &str,
        value: &MmsValue,
        params: &CommandParams,
    ) -> Result<()> {
        let (idx, reference, use_sbo, sbo_reference) = {
            let mut inner = self.inner.lock().await;
            let idx = self.ensure_context(&mut inner, address).await?;
            self.apply_params(&mut inner, idx, params);
            let ctx = inner.registry.runtime(idx).ok_or_else(stale_context)?;
            let use_sbo = !params.force_direct && ctx.ctl_model.is_sbo();
            (
                idx,
                ctx.object_reference.clone(),
                use_sbo,
                ctx.sbo_reference.clone(),
            )
        };

        if !use_sbo {
            let mut inner = self.inner.lock().await;
            let session = self.open_session(&mut inner, &reference).await;
            let result = self.do_operate(&mut inner, session.as_ref(), idx, value).await;
            if let Some(session) = session {
                session.close(&mut inner.conn);
            }
            return result;
        }

        let session = {
            let mut inner = self.inner.lock().await;
            let session = self.open_session(&mut inner, &reference).await;
            if let Err(err) = self
                .do_select(&mut inner, session.as_ref(), idx, Some(value))
                .await
            {
                if let Some(session) = session {
                    session.close(&mut inner.conn);
                }
                return Err(err);
            }
            session
        };

        let resolved = self
            .config
            .tracker
            .resolve_within(
                &self.inner,
                &reference,
                sbo_reference.as_deref(),
                params.sbo_timeout,
            )
            .await;

        let ctl_num = match resolved {
            Ok(num) => num,
            Err(err) => {
                let mut inner = self.inner.lock().await;
                if let Some(session) = session {
                    session.close(&mut inner.conn);
                }
                self.record_failure(&mut inner, idx, 0, &err);
                return Err(err);
            }
        };

        {
            let mut inner = self.inner.lock().await;
            if let Some(ctx) = inner.registry.runtime_mut(idx) {
                ctx.ctl_num = ctl_num;
            }
        }

        // respect the device's select-to-operate window
        sleep(params.sbo_timeout).await;

        let mut inner = self.inner.lock().await;
        let result = self.do_operate(&mut inner, session.as_ref(), idx, value).await;
        if let Some(session) = session {
            session.close(&mut inner.conn);
        }
        result
    }

    /// Boolean convenience form of [`send_command`](Self::send_command).
    pub async fn send_bool_command(
        &self,
        address: &str,
        value: bool,
        params: &CommandParams,
    ) -> Result<()> {
        self.send_command(address, &MmsValue::Bool(value), params).await
    }

    /// Run the select phase on its own session.
    pub async fn select(
        &self,
        address: &str,
        value: Option<&MmsValue>,
        params: &CommandParams,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let idx = self.ensure_context(&mut inner, address).await?;
        self.apply_params(&mut inner, idx, params);
        let reference = inner
            .registry
            .runtime(idx)
            .ok_or_else(stale_context)?
            .object_reference
            .clone();
        let session = self.open_session(&mut inner, &reference).await;
        let result = self.do_select(&mut inner, session.as_ref(), idx, value).await;
        if let Some(session) = session {
            session.close(&mut inner.conn);
        }
        result
    }

    /// Run the operate phase on its own session.
    pub async fn operate(
        &self,
        address: &str,
        value: &MmsValue,
        params: &CommandParams,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let idx = self.ensure_context(&mut inner, address).await?;
        self.apply_params(&mut inner, idx, params);
        let reference = inner
            .registry
            .runtime(idx)
            .ok_or_else(stale_context)?
            .object_reference
            .clone();
        let session = self.open_session(&mut inner, &reference).await;
        let result = self.do_operate(&mut inner, session.as_ref(), idx, value).await;
        if let Some(session) = session {
            session.close(&mut inner.conn);
        }
        result
    }

    /// Cancel an outstanding selection: formal cancel service first, then
    /// a raw write to the object's Cancel attribute, trying both path
    /// conventions.
    pub async fn cancel(&self, address: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let idx = self.ensure_context(&mut inner, address).await?;
        let reference = inner
            .registry
            .runtime(idx)
            .ok_or_else(stale_context)?
            .object_reference
            .clone();

        if let Some(session) = self.open_session(&mut inner, &reference).await {
            let outcome = session.cancel(&mut inner.conn).await;
            session.close(&mut inner.conn);
            match outcome {
                Ok(true) => {
                    info!(%reference, "selection cancelled");
                    if let Some(ctx) = inner.registry.runtime_mut(idx) {
                        ctx.reset();
                    }
                    return Ok(());
                }
                Ok(false) => debug!(%reference, "cancel refused by device"),
                Err(err) => debug!(%reference, %err, "cancel service failed"),
            }
        }

        let cancel_reference = format!("{reference}.Cancel.ctlVal");
        let candidates = [
            cancel_reference.clone(),
            flattened_reference(&cancel_reference, FunctionalConstraint::Co),
        ];
        let value = MmsValue::Bool(false);
        for target in &candidates {
            match inner
                .conn
                .write_value(target, FunctionalConstraint::Co, &value)
                .await
            {
                Ok(()) => {
                    info!(reference = %target, "selection cancelled");
                    if let Some(ctx) = inner.registry.runtime_mut(idx) {
                        ctx.reset();
                    }
                    return Ok(());
                }
                Err(err) => debug!(reference = %target, %err, "cancel write failed"),
            }
        }
        warn!(%reference, "cancel attempts failed");
        Err(ControlError::AllStrategiesExhausted {
            operation: "cancel",
        })
    }

    /// Resolve or build the runtime context for an address, caching it
    /// under every alias. Fails when the connection is down.
    async fn ensure_context(&self, inner: &mut Inner<C>, address: &str) -> Result<usize> {
        if !inner.conn.is_connected() {
            return Err(ControlError::NotConnected);
        }
        if let Some(idx) = inner.registry.index_of(address) {
            return Ok(idx);
        }

        let resolved = resolve_control_object(address);
        if resolved.is_empty() {
            return Err(ControlError::invalid_address(address));
        }

        let mut object_reference = resolved.clone();
        if let Some(candidate) = breaker_redirect_candidate(&resolved) {
            let probe = format!("{candidate}.ctlModel");
            if inner
                .conn
                .read_value(&probe, FunctionalConstraint::Cf)
                .await
                .is_ok()
            {
                debug!(from = %resolved, to = %candidate, "redirected breaker object to control interface");
                object_reference = candidate;
            }
        }

        let mut ctx = ControlObjectRuntime::new(&object_reference);

        // ctlModel, across the two naming conventions devices expose it under
        let model_code = match inner
            .conn
            .read_value(
                &format!("{object_reference}.ctlModel"),
                FunctionalConstraint::Cf,
            )
            .await
        {
            Ok(v) => v.as_i64(),
            Err(_) => inner
                .conn
                .read_value(
                    &format!("{object_reference}.Oper.ctlModel"),
                    FunctionalConstraint::Co,
                )
                .await
                .ok()
                .and_then(|v| v.as_i64()),
        };
        if let Some(code) = model_code {
            ctx.set_ctl_model_code(code as i32);
        }

        // current ctlNum echo, best effort
        let echoed = match inner
            .conn
            .read_value(
                &format!("{object_reference}.ctlNum"),
                FunctionalConstraint::St,
            )
            .await
        {
            Ok(v) => v.to_ctlnum().ok(),
            Err(_) => inner
                .conn
                .read_value(
                    &format!("{object_reference}.Oper.ctlNum"),
                    FunctionalConstraint::Co,
                )
                .await
                .ok()
                .and_then(|v| v.to_ctlnum().ok()),
        };
        if let Some(num) = echoed {
            ctx.ctl_num = num;
        }

        if let Ok(children) = inner.conn.data_directory(&object_reference).await {
            ctx.supports_direct = children.iter().any(|c| c == "Oper");
            ctx.supports_sbo = children.iter().any(|c| c == "SBO");
            ctx.supports_sbo_enhanced = children.iter().any(|c| c == "SBOw");
            ctx.sbo_reference = if ctx.supports_sbo_enhanced {
                Some(format!("{object_reference}.SBOw"))
            } else if ctx.supports_sbo {
                Some(format!("{object_reference}.SBO"))
            } else {
                None
            };
        }

        info!(address, reference = %object_reference, model = ?ctx.ctl_model, "control context initialized");
        Ok(inner
            .registry
            .insert(ctx, &[address, &resolved, &object_reference]))
    }

    /// Write originator overrides through to the runtime context.
    fn apply_params(&self, inner: &mut Inner<C>, idx: usize, params: &CommandParams) {
        if params.originator_id.is_none() && params.originator_cat.is_none() {
            return;
        }
        if let Some(ctx) = inner.registry.runtime_mut(idx) {
            if let Some(id) = &params.originator_id {
                ctx.originator_id = id.clone();
            }
            if let Some(cat) = params.originator_cat {
                ctx.originator_cat = cat;
            }
        }
    }

    async fn open_session(
        &self,
        inner: &mut Inner<C>,
        reference: &str,
    ) -> Option<ControlClientSession> {
        match ControlClientSession::open(&mut inner.conn, reference).await {
            Ok(session) => Some(session),
            Err(err) => {
                debug!(%reference, %err, "control session open failed, raw-write tier only");
                None
            }
        }
    }

    /// Select with the two-tier strategy: formal service, then raw write to
    /// the SBO/SBOw attribute.
    async fn do_select(
        &self,
        inner: &mut Inner<C>,
        session: Option<&ControlClientSession>,
        idx: usize,
        value: Option<&MmsValue>,
    ) -> Result<()> {
        let (model, sbo_reference, ctl_num, originator) = {
            let ctx = inner.registry.runtime(idx).ok_or_else(stale_context)?;
            (
                ctx.ctl_model,
                ctx.sbo_reference.clone(),
                ctx.ctl_num,
                Originator::compute(Some(ctx)),
            )
        };

        if model.is_sbo() && sbo_reference.is_none() {
            return Err(ControlError::invalid_address(format!(
                "SBO control model but no SBO/SBOw attribute discovered for {}",
                session
                    .map(ControlClientSession::object_reference)
                    .unwrap_or("object")
            )));
        }

        if let Some(session) = session {
            if let Err(err) = session.set_originator(&mut inner.conn, &originator).await {
                debug!(%err, "set originator failed");
            }

            let formal = match value {
                Some(value) if model.is_enhanced() => {
                    let encoded = self.encode(value);
                    session.select_with_value(&mut inner.conn, &encoded).await
                }
                _ => session.select(&mut inner.conn).await,
            };
            match formal {
                Ok(true) => {
                    info!(reference = %session.object_reference(), "select accepted");
                    if let Some(ctx) = inner.registry.runtime_mut(idx) {
                        ctx.note_selected();
                    }
                    return Ok(());
                }
                Ok(false) => {
                    debug!(reference = %session.object_reference(), "select refused by device")
                }
                Err(err) => {
                    debug!(reference = %session.object_reference(), %err, "select service failed")
                }
            }
        }

        let Some(sbo_reference) = sbo_reference else {
            let code = session.map_or(0, |s| s.last_error(&inner.conn));
            let err = ControlError::AllStrategiesExhausted {
                operation: "select",
            };
            self.record_failure(inner, idx, code, &err);
            return Err(err);
        };

        let encoded = value.map_or(MmsValue::Bool(true), |v| self.encode(v));
        match self
            .fallback_write(
                &mut inner.conn,
                "select",
                &sbo_reference,
                true,
                &encoded,
                ctl_num,
                &originator,
            )
            .await
        {
            Ok(captured) => {
                if let Some(ctx) = inner.registry.runtime_mut(idx) {
                    if let Some(num) = captured {
                        ctx.ctl_num = num;
                    }
                    ctx.note_selected();
                }
                Ok(())
            }
            Err(err) => {
                let code = session.map_or(0, |s| s.last_error(&inner.conn));
                self.record_failure(inner, idx, code, &err);
                Err(err)
            }
        }
    }

    /// Operate with the two-tier strategy: formal service, then raw write
    /// to the Oper attribute.
    async fn do_operate(
        &self,
        inner: &mut Inner<C>,
        session: Option<&ControlClientSession>,
        idx: usize,
        value: &MmsValue,
    ) -> Result<()> {
        let (reference, ctl_num, originator) = {
            let ctx = inner.registry.runtime(idx).ok_or_else(stale_context)?;
            (
                ctx.object_reference.clone(),
                ctx.ctl_num,
                Originator::compute(Some(ctx)),
            )
        };
        let encoded = self.encode(value);

        if let Some(ctx) = inner.registry.runtime_mut(idx) {
            ctx.state = ControlState::Operating;
        }

        if let Some(session) = session {
            if let Err(err) = session.set_originator(&mut inner.conn, &originator).await {
                debug!(%err, "set originator failed");
            }

            match session.operate(&mut inner.conn, &encoded, ctl_num).await {
                Ok(true) => {
                    info!(reference = %session.object_reference(), ctl_num, "operate accepted");
                    if let Some(ctx) = inner.registry.runtime_mut(idx) {
                        ctx.note_operated();
                    }
                    return Ok(());
                }
                Ok(false) => {
                    debug!(reference = %session.object_reference(), "operate refused by device")
                }
                Err(err) => {
                    debug!(reference = %session.object_reference(), %err, "operate service failed")
                }
            }
        }

        let oper_reference = format!("{reference}.Oper");
        match self
            .fallback_write(
                &mut inner.conn,
                "operate",
                &oper_reference,
                false,
                &encoded,
                ctl_num,
                &originator,
            )
            .await
        {
            Ok(_) => {
                if let Some(ctx) = inner.registry.runtime_mut(idx) {
                    ctx.note_operated();
                }
                Ok(())
            }
            Err(err) => {
                let code = session.map_or(0, |s| s.last_error(&inner.conn));
                self.record_failure(inner, idx, code, &err);
                Err(err)
            }
        }
    }

    /// Raw-write fallback tier, trying the hierarchical then the flattened
    /// rendition of `reference`.
    ///
    /// Each attempt reads the live attribute as a template first so that
    /// fields the IED populated (origin identity in particular) survive the
    /// round trip; a minimal structure is synthesized when the read fails.
    /// Per-attempt failures are collected for diagnostics, never surfaced
    /// individually. On success, returns the ctlNum found in the template
    /// when one was readable.
    async fn fallback_write(
        &self,
        conn: &mut C,
        operation: &'static str,
        reference: &str,
        is_select: bool,
        value: &MmsValue,
        ctl_num: u8,
        originator: &Originator,
    ) -> Result<Option<u8>> {
        let mut attempts: Vec<String> = Vec::new();
        let candidates = [
            reference.to_string(),
            flattened_reference(reference, FunctionalConstraint::Co),
        ];
        for target in &candidates {
            let (structure, captured) =
                match conn.read_value(target, FunctionalConstraint::Co).await {
                    Ok(template) => {
                        let captured = payload::extract_ctlnum(&template, is_select);
                        match payload::fill_template(&template, is_select, value, ctl_num) {
                            Some(filled) => (filled, captured),
                            None => (payload::synthesize(value, ctl_num, originator), captured),
                        }
                    }
                    Err(err) => {
                        attempts.push(format!("{target}: template read failed ({err})"));
                        (payload::synthesize(value, ctl_num, originator), None)
                    }
                };
            match conn
                .write_value(target, FunctionalConstraint::Co, &structure)
                .await
            {
                Ok(()) => {
                    debug!(reference = %target, operation, "fallback write accepted");
                    return Ok(captured);
                }
                Err(err) => attempts.push(format!("{target}: write failed ({err})")),
            }
        }
        warn!(operation, attempts = ?attempts, "all fallback writes failed");
        Err(ControlError::AllStrategiesExhausted { operation })
    }

    /// Encode a control value, applying the configured polarity quirk.
    fn encode(&self, value: &MmsValue) -> MmsValue {
        match value {
            MmsValue::Bool(v) if self.config.inverted_bool_polarity => MmsValue::Bool(!v),
            other => other.clone(),
        }
    }

    /// Record a failed sequence on the runtime context and the coordinator.
    fn record_failure(&self, inner: &mut Inner<C>, idx: usize, code: i32, err: &ControlError) {
        let message = if code != 0 {
            format!("{err} ({})", service_error_description(code))
        } else {
            err.to_string()
        };
        if let Some(ctx) = inner.registry.runtime_mut(idx) {
            ctx.fail(message.clone());
        }
        inner.last_error = Some(message);
    }
}

fn stale_context() -> ControlError {
    ControlError::Internal("control context removed while in use".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockIed;
    use crate::types::ControlModel;

    const POS: &str = "IED/CSWI1.Pos";

    fn ied_with_model(code: i64) -> MockIed {
        let mut ied = MockIed::connected();
        ied.set_read("IED/CSWI1.Pos.ctlModel", MmsValue::Int(code));
        ied.set_directory(POS, &["Oper", "SBO", "SBOw", "stVal"]);
        ied
    }

    #[tokio::test(start_paused = true)]
    async fn test_init_caches_under_all_aliases() {
        let coordinator = ControlCoordinator::new(ied_with_model(2));

        let ctx = coordinator
            .init_control_context("IED/CSWI1.Pos.Oper.ctlVal")
            .await
            .unwrap();
        assert_eq!(ctx.object_reference, POS);
        assert_eq!(ctx.ctl_model, ControlModel::SboNormal);
        assert!(ctx.supports_direct);
        assert!(ctx.supports_sbo_enhanced);
        assert_eq!(ctx.sbo_reference.as_deref(), Some("IED/CSWI1.Pos.SBOw"));

        // both the original address and the resolved path hit the cache
        assert!(coordinator.control_context("IED/CSWI1.Pos.Oper.ctlVal").await.is_some());
        assert!(coordinator.control_context(POS).await.is_some());

        coordinator.clear_control_context(POS).await;
        assert!(coordinator.control_context("IED/CSWI1.Pos.Oper.ctlVal").await.is_none());
        assert!(coordinator.control_context(POS).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_init_redirects_breaker_to_control_interface() {
        let coordinator = ControlCoordinator::new(ied_with_model(2));

        let ctx = coordinator
            .init_control_context("IED/XCBR1.Pos.stVal")
            .await
            .unwrap();
        assert_eq!(ctx.object_reference, POS);
        // the redirected reference aliases the same context
        assert!(coordinator.control_context(POS).await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_init_returns_none_when_disconnected() {
        let coordinator = ControlCoordinator::new(MockIed::default());
        assert!(coordinator.init_control_context(POS).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sbo_sequence_tracks_ctlnum_and_increments() {
        let mut ied = ied_with_model(2);
        // tracker resolves on its second poll of the SBOw attribute
        ied.fail_reads("IED/CSWI1.Pos.SBOw.ctlNum", 1);
        ied.push_read("IED/CSWI1.Pos.SBOw.ctlNum", MmsValue::Int(5));

        let coordinator = ControlCoordinator::new(ied);
        coordinator
            .send_command(POS, &MmsValue::Bool(true), &CommandParams::new())
            .await
            .unwrap();

        let ctx = coordinator.control_context(POS).await.unwrap();
        assert_eq!(ctx.state, ControlState::Operated);
        assert_eq!(ctx.ctl_num, 6);

        let ied = coordinator.into_connection();
        assert_eq!(ied.select_calls, 1);
        assert_eq!(ied.operate_calls, 1);
        // operate used the tracked number; boolean polarity is inverted
        assert_eq!(ied.operate_log, vec![(MmsValue::Bool(false), 5)]);
        assert_eq!(ied.open_count, ied.close_count);
    }

    #[tokio::test(start_paused = true)]
    async fn test_select_falls_back_to_raw_write() {
        let mut ied = ied_with_model(2);
        ied.select_ok = false;
        ied.allow_write("IED/CSWI1.Pos.SBOw");

        let coordinator = ControlCoordinator::new(ied);
        coordinator
            .select(POS, Some(&MmsValue::Bool(true)), &CommandParams::new())
            .await
            .unwrap();

        let ctx = coordinator.control_context(POS).await.unwrap();
        assert_eq!(ctx.state, ControlState::Selected);

        let ied = coordinator.into_connection();
        assert_eq!(ied.select_calls, 1);
        assert_eq!(ied.writes.len(), 1);
        assert_eq!(ied.writes[0].0, "IED/CSWI1.Pos.SBOw");
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_command_succeeds_via_select_fallback() {
        let mut ied = ied_with_model(2);
        ied.select_ok = false;
        ied.allow_write("IED/CSWI1.Pos.SBOw");
        ied.set_read("IED/CSWI1.Pos.SBOw.ctlNum", MmsValue::Int(9));

        let coordinator = ControlCoordinator::new(ied);
        coordinator
            .send_command(POS, &MmsValue::Bool(true), &CommandParams::new())
            .await
            .unwrap();

        let ctx = coordinator.control_context(POS).await.unwrap();
        assert_eq!(ctx.state, ControlState::Operated);
        assert_eq!(ctx.ctl_num, 10);

        let ied = coordinator.into_connection();
        assert_eq!(ied.operate_log, vec![(MmsValue::Bool(false), 9)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ctlnum_guard_aborts_before_operate() {
        // no ctlNum readable anywhere and no async capture
        let coordinator = ControlCoordinator::new(ied_with_model(2));
        let err = coordinator
            .send_command(POS, &MmsValue::Bool(true), &CommandParams::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::CtlNumUnavailable));

        let ctx = coordinator.control_context(POS).await.unwrap();
        assert_eq!(ctx.state, ControlState::Failed);

        let ied = coordinator.into_connection();
        assert_eq!(ied.select_calls, 1);
        assert_eq!(ied.operate_calls, 0);
        assert_eq!(ied.open_count, ied.close_count);
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_direct_skips_select() {
        let coordinator = ControlCoordinator::new(ied_with_model(2));
        coordinator
            .send_command(
                POS,
                &MmsValue::Bool(true),
                &CommandParams::new().force_direct(true),
            )
            .await
            .unwrap();

        let ied = coordinator.into_connection();
        assert_eq!(ied.select_calls, 0);
        assert_eq!(ied.operate_calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_direct_model_operates_without_select() {
        let coordinator = ControlCoordinator::new(ied_with_model(1));
        coordinator
            .send_command(POS, &MmsValue::Bool(true), &CommandParams::new())
            .await
            .unwrap();

        let ctx = coordinator.control_context(POS).await.unwrap();
        assert_eq!(ctx.state, ControlState::Operated);

        let ied = coordinator.into_connection();
        assert_eq!(ied.select_calls, 0);
        assert_eq!(ied.operate_calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_originator_params_reach_the_device() {
        let coordinator = ControlCoordinator::new(ied_with_model(1));
        let params = CommandParams::new().originator_id("OPER7").originator_cat(5);
        coordinator
            .send_command(POS, &MmsValue::Bool(true), &params)
            .await
            .unwrap();

        let ied = coordinator.into_connection();
        assert_eq!(
            ied.last_originator,
            Some(Originator {
                id: "OPER7".to_string(),
                category: 5,
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_polarity_inversion_is_configurable() {
        let config = CoordinatorConfig::new().inverted_bool_polarity(false);
        let coordinator = ControlCoordinator::with_config(ied_with_model(1), config);
        coordinator
            .send_command(POS, &MmsValue::Bool(true), &CommandParams::new())
            .await
            .unwrap();

        let ied = coordinator.into_connection();
        assert_eq!(ied.operate_log[0].0, MmsValue::Bool(true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_operate_records_failure() {
        let mut ied = ied_with_model(1);
        ied.operate_ok = false;

        let coordinator = ControlCoordinator::new(ied);
        let err = coordinator
            .send_command(POS, &MmsValue::Bool(true), &CommandParams::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ControlError::AllStrategiesExhausted {
                operation: "operate"
            }
        ));

        let ctx = coordinator.control_context(POS).await.unwrap();
        assert_eq!(ctx.state, ControlState::Failed);
        assert!(ctx.last_error.is_some());
        assert!(coordinator.last_error().await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_returns_to_idle() {
        let coordinator = ControlCoordinator::new(ied_with_model(2));
        coordinator
            .select(POS, Some(&MmsValue::Bool(true)), &CommandParams::new())
            .await
            .unwrap();
        coordinator.cancel(POS).await.unwrap();

        let ctx = coordinator.control_context(POS).await.unwrap();
        assert_eq!(ctx.state, ControlState::Idle);

        let ied = coordinator.into_connection();
        // the formal cancel service sufficed, no raw write needed
        assert_eq!(ied.cancel_calls, 1);
        assert!(ied.writes.is_empty());
        assert_eq!(ied.open_count, ied.close_count);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_falls_back_to_raw_write() {
        let mut ied = ied_with_model(2);
        ied.cancel_ok = false;
        ied.allow_write("IED/CSWI1.Pos.Cancel.ctlVal");

        let coordinator = ControlCoordinator::new(ied);
        coordinator
            .select(POS, Some(&MmsValue::Bool(true)), &CommandParams::new())
            .await
            .unwrap();
        coordinator.cancel(POS).await.unwrap();

        let ctx = coordinator.control_context(POS).await.unwrap();
        assert_eq!(ctx.state, ControlState::Idle);

        let ied = coordinator.into_connection();
        assert_eq!(ied.cancel_calls, 1);
        assert_eq!(
            ied.writes.last().map(|(r, _)| r.as_str()),
            Some("IED/CSWI1.Pos.Cancel.ctlVal")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_enhanced_sbo_uses_select_with_value() {
        let mut ied = ied_with_model(4);
        ied.set_read("IED/CSWI1.Pos.SBOw.ctlNum", MmsValue::Int(0));

        let coordinator = ControlCoordinator::new(ied);
        coordinator
            .send_command(POS, &MmsValue::Bool(false), &CommandParams::new())
            .await
            .unwrap();

        let ied = coordinator.into_connection();
        assert_eq!(ied.select_with_value_calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_select_requires_sbo_reference() {
        let mut ied = MockIed::connected();
        ied.set_read("IED/CSWI1.Pos.ctlModel", MmsValue::Int(2));
        // directory exposes no SBO/SBOw child
        ied.set_directory(POS, &["Oper", "stVal"]);

        let coordinator = ControlCoordinator::new(ied);
        let err = coordinator
            .select(POS, Some(&MmsValue::Bool(true)), &CommandParams::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::InvalidAddress(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_command_fails_when_disconnected() {
        let coordinator = ControlCoordinator::new(MockIed::default());
        let err = coordinator
            .send_command(POS, &MmsValue::Bool(true), &CommandParams::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::NotConnected));
    }

    #[test]
    fn test_registry_reuses_freed_slots() {
        let mut registry = ControlRegistry::default();
        for _ in 0..3 {
            let idx = registry.insert(ControlObjectRuntime::new(POS), &[POS]);
            assert_eq!(idx, 0);
            registry.remove(POS);
        }
        assert_eq!(registry.slots.len(), 1);
        assert!(registry.get(POS).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_all_contexts() {
        let coordinator = ControlCoordinator::new(ied_with_model(1));
        coordinator.init_control_context(POS).await.unwrap();
        coordinator.clear_all_contexts().await;
        assert!(coordinator.control_context(POS).await.is_none());
    }
}
