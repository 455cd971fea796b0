//! IEC 61850 control model and control state.
//!
//! The control model (`ctlModel`) is read from the device during context
//! initialization and decides whether a command needs a select phase.

/// IEC 61850 control model (`ctlModel` attribute values).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ControlModel {
    /// Status only, not controllable (0)
    StatusOnly = 0,

    /// Direct control with normal security (1)
    DirectNormal = 1,

    /// Select-before-operate with normal security (2)
    SboNormal = 2,

    /// Direct control with enhanced security (3)
    DirectEnhanced = 3,

    /// Select-before-operate with enhanced security (4)
    SboEnhanced = 4,
}

impl ControlModel {
    /// Construct from the integer code read from the device.
    ///
    /// Unrecognized codes map to [`ControlModel::StatusOnly`], the safe
    /// default: an unknown model must never be operated.
    pub const fn from_code(code: i32) -> Self {
        match code {
            1 => Self::DirectNormal,
            2 => Self::SboNormal,
            3 => Self::DirectEnhanced,
            4 => Self::SboEnhanced,
            _ => Self::StatusOnly,
        }
    }

    /// The integer code for this model.
    #[inline]
    pub const fn code(self) -> i32 {
        self as i32
    }

    /// Whether this model requires a select phase before operate.
    #[inline]
    pub const fn is_sbo(self) -> bool {
        matches!(self, Self::SboNormal | Self::SboEnhanced)
    }

    /// Whether this model uses enhanced security (select-with-value,
    /// command termination).
    #[inline]
    pub const fn is_enhanced(self) -> bool {
        matches!(self, Self::DirectEnhanced | Self::SboEnhanced)
    }

    /// Whether the object can be controlled at all.
    #[inline]
    pub const fn is_controllable(self) -> bool {
        !matches!(self, Self::StatusOnly)
    }
}

impl Default for ControlModel {
    fn default() -> Self {
        Self::StatusOnly
    }
}

/// Protocol state of a control object.
///
/// The state is advisory: it records what the last sequence achieved, but
/// callers may re-attempt a select from any state, including `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ControlState {
    /// No sequence in progress
    #[default]
    Idle,

    /// Select accepted by the IED, operate window open
    Selected,

    /// Operate sent, awaiting outcome
    Operating,

    /// Last operate succeeded
    Operated,

    /// Last sequence failed
    Failed,
}
