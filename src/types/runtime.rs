//! Per-control-object runtime state.

use std::time::SystemTime;

use super::{ControlModel, ControlState};

/// Default originator identity presented to the IED.
pub const DEFAULT_ORIGINATOR_ID: &str = "SCADA";

/// Default originator category (3 = remote control).
pub const DEFAULT_ORIGINATOR_CAT: u8 = 3;

/// Mutable runtime context for one IEC 61850 control object.
///
/// Created by the coordinator on first reference to an address and cached
/// under every alias the caller might use for the same Data Object. One
/// instance tracks one select/operate sequence at a time; serialization is
/// the coordinator's responsibility.
#[derive(Debug, Clone)]
pub struct ControlObjectRuntime {
    /// Resolved Data-Object path (`LD/LN.DO`), the canonical key
    pub object_reference: String,
    /// Control model discovered from the device
    pub ctl_model: ControlModel,
    /// Object has an `Oper` child
    pub supports_direct: bool,
    /// Object has an `SBO` child
    pub supports_sbo: bool,
    /// Object has an `SBOw` child
    pub supports_sbo_enhanced: bool,
    /// Current protocol state (advisory)
    pub state: ControlState,
    /// Control sequence number, modulo 256, echoing the IED-assigned value
    pub ctl_num: u8,
    /// Originator identity presented on control services
    pub originator_id: String,
    /// Originator category, valid range 1..=7
    pub originator_cat: u8,
    /// Full reference of the SBO/SBOw attribute, when the object has one
    pub sbo_reference: Option<String>,
    /// Last error recorded for this object
    pub last_error: Option<String>,
    /// Time of the last successful select
    pub last_select_time: Option<SystemTime>,
    /// Time of the last successful operate
    pub last_operate_time: Option<SystemTime>,
}

impl ControlObjectRuntime {
    /// Create a fresh runtime for a resolved Data-Object reference.
    pub fn new(object_reference: impl Into<String>) -> Self {
        Self {
            object_reference: object_reference.into(),
            ctl_model: ControlModel::StatusOnly,
            supports_direct: false,
            supports_sbo: false,
            supports_sbo_enhanced: false,
            state: ControlState::Idle,
            ctl_num: 0,
            originator_id: DEFAULT_ORIGINATOR_ID.to_string(),
            originator_cat: DEFAULT_ORIGINATOR_CAT,
            sbo_reference: None,
            last_error: None,
            last_select_time: None,
            last_operate_time: None,
        }
    }

    /// Apply the integer `ctlModel` code read from the device.
    pub fn set_ctl_model_code(&mut self, code: i32) {
        self.ctl_model = ControlModel::from_code(code);
    }

    /// Record a successful select.
    pub fn note_selected(&mut self) {
        self.state = ControlState::Selected;
        self.last_select_time = Some(SystemTime::now());
        self.last_error = None;
    }

    /// Record a successful operate and advance the sequence number.
    ///
    /// The ctlNum wraps modulo 256 per the standard.
    pub fn note_operated(&mut self) {
        self.state = ControlState::Operated;
        self.ctl_num = self.ctl_num.wrapping_add(1);
        self.last_operate_time = Some(SystemTime::now());
        self.last_error = None;
    }

    /// Record a failed sequence.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.state = ControlState::Failed;
        self.last_error = Some(message.into());
    }

    /// Return to the idle state, keeping discovery results.
    pub fn reset(&mut self) {
        self.state = ControlState::Idle;
        self.last_error = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_defaults() {
        let ctx = ControlObjectRuntime::new("IED/CSWI1.Pos");
        assert_eq!(ctx.object_reference, "IED/CSWI1.Pos");
        assert_eq!(ctx.ctl_model, ControlModel::StatusOnly);
        assert_eq!(ctx.state, ControlState::Idle);
        assert_eq!(ctx.ctl_num, 0);
        assert_eq!(ctx.originator_id, DEFAULT_ORIGINATOR_ID);
        assert_eq!(ctx.originator_cat, DEFAULT_ORIGINATOR_CAT);
        assert!(ctx.sbo_reference.is_none());
    }

    #[test]
    fn test_note_operated_increments_mod_256() {
        let mut ctx = ControlObjectRuntime::new("IED/CSWI1.Pos");
        ctx.ctl_num = 255;
        ctx.note_operated();
        assert_eq!(ctx.ctl_num, 0);
        assert_eq!(ctx.state, ControlState::Operated);
        assert!(ctx.last_operate_time.is_some());

        ctx.note_operated();
        assert_eq!(ctx.ctl_num, 1);
    }

    #[test]
    fn test_fail_and_reset() {
        let mut ctx = ControlObjectRuntime::new("IED/CSWI1.Pos");
        ctx.fail("operate rejected");
        assert_eq!(ctx.state, ControlState::Failed);
        assert_eq!(ctx.last_error.as_deref(), Some("operate rejected"));

        ctx.reset();
        assert_eq!(ctx.state, ControlState::Idle);
        assert!(ctx.last_error.is_none());
    }

    #[test]
    fn test_note_selected_clears_error() {
        let mut ctx = ControlObjectRuntime::new("IED/CSWI1.Pos");
        ctx.fail("old");
        ctx.note_selected();
        assert_eq!(ctx.state, ControlState::Selected);
        assert!(ctx.last_error.is_none());
        assert!(ctx.last_select_time.is_some());
    }
}
