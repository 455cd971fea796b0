//! Fallback control payload construction.
//!
//! When the formal control services fail, select and operate fall back to
//! raw writes against the object's `SBO`/`SBOw` or `Oper` attribute. The
//! structure written there varies between IEDs: with or without an
//! `operTm` element, and select images on some devices omit the `Check`
//! field. Layouts are keyed by `(is_select, element_count)` and expose
//! named field positions instead of magic indices.

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;

use crate::originator::Originator;
use crate::types::MmsValue;

/// Named element positions inside an `Oper`/`SBOw` structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadLayout {
    /// Total number of elements
    pub element_count: usize,
    /// `ctlVal` position
    pub ctl_val: usize,
    /// `operTm` position, only in the 7-element variant
    pub oper_tm: Option<usize>,
    /// `origin` position
    pub origin: usize,
    /// `ctlNum` position
    pub ctl_num: usize,
    /// `T` (timestamp) position
    pub t: usize,
    /// `Test` position
    pub test: usize,
    /// `Check` position, absent on short select images
    pub check: Option<usize>,
}

impl PayloadLayout {
    // ctlVal, operTm, origin, ctlNum, T, Test, Check
    const SEVEN: Self = Self {
        element_count: 7,
        ctl_val: 0,
        oper_tm: Some(1),
        origin: 2,
        ctl_num: 3,
        t: 4,
        test: 5,
        check: Some(6),
    };

    // ctlVal, origin, ctlNum, T, Test, Check
    const SIX: Self = Self {
        element_count: 6,
        ctl_val: 0,
        oper_tm: None,
        origin: 1,
        ctl_num: 2,
        t: 3,
        test: 4,
        check: Some(5),
    };

    // Short select image: ctlVal, origin, ctlNum, T, Test
    const FIVE_SELECT: Self = Self {
        element_count: 5,
        ctl_val: 0,
        oper_tm: None,
        origin: 1,
        ctl_num: 2,
        t: 3,
        test: 4,
        check: None,
    };

    /// Layout for a control structure of the given shape.
    ///
    /// Returns `None` when the element count does not match any variant
    /// this client knows how to fill in.
    pub const fn for_shape(is_select: bool, element_count: usize) -> Option<Self> {
        match (is_select, element_count) {
            (_, 7) => Some(Self::SEVEN),
            (_, 6) => Some(Self::SIX),
            (true, 5) => Some(Self::FIVE_SELECT),
            _ => None,
        }
    }
}

/// Build the `origin` sub-structure (`orCat`, `orIdent`).
pub fn origin_struct(originator: &Originator) -> MmsValue {
    MmsValue::Struct(vec![
        MmsValue::Int(i64::from(originator.category)),
        MmsValue::OctetString(Bytes::copy_from_slice(originator.id.as_bytes())),
    ])
}

fn now_utc_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Overwrite the value and sequence-number fields of a structure read back
/// from the device, preserving everything else the IED put there (origin
/// identity in particular).
///
/// Returns `None` when the template is not a structure of a known shape.
pub fn fill_template(
    template: &MmsValue,
    is_select: bool,
    value: &MmsValue,
    ctl_num: u8,
) -> Option<MmsValue> {
    let count = template.element_count()?;
    let layout = PayloadLayout::for_shape(is_select, count)?;
    let MmsValue::Struct(elements) = template else {
        return None;
    };
    let mut elements = elements.clone();
    elements[layout.ctl_val] = value.clone();
    elements[layout.ctl_num] = MmsValue::UInt(u64::from(ctl_num));
    elements[layout.t] = MmsValue::UtcTime(now_utc_ms());
    Some(MmsValue::Struct(elements))
}

/// Pull the sequence-number element out of a control structure of a known
/// shape.
pub fn extract_ctlnum(structure: &MmsValue, is_select: bool) -> Option<u8> {
    let count = structure.element_count()?;
    let layout = PayloadLayout::for_shape(is_select, count)?;
    structure.element(layout.ctl_num)?.to_ctlnum().ok()
}

/// Synthesize a minimal control structure when no template could be read.
///
/// Uses the 6-element shape, the most widely accepted variant for both
/// select images and operate requests.
pub fn synthesize(value: &MmsValue, ctl_num: u8, originator: &Originator) -> MmsValue {
    let layout = PayloadLayout::SIX;
    let mut elements = vec![MmsValue::Bool(false); layout.element_count];
    elements[layout.ctl_val] = value.clone();
    elements[layout.origin] = origin_struct(originator);
    elements[layout.ctl_num] = MmsValue::UInt(u64::from(ctl_num));
    elements[layout.t] = MmsValue::UtcTime(now_utc_ms());
    elements[layout.test] = MmsValue::Bool(false);
    if let Some(check) = layout.check {
        elements[check] = MmsValue::BitString { value: 0, size: 2 };
    }
    MmsValue::Struct(elements)
}
