//! IEC 61850 control-object type definitions.
//!
//! This module contains the core types of the control client:
//!
//! - `ControlModel` - the five standard `ctlModel` values
//! - `ControlState` - advisory protocol state of an object
//! - `ControlObjectRuntime` - per-object mutable runtime context
//! - `MmsValue` - tagged attribute value representation
//! - `FunctionalConstraint` - attribute access qualifier

mod control_model;
mod mms;
mod runtime;

pub use control_model::*;
pub use mms::*;
pub use runtime::*;
