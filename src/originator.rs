//! Originator identity policy.
//!
//! Every control service presents an originator (identity + category) to
//! the IED. The values come from the object's runtime context but are
//! validated here: category must stay inside the standard 1..=7 range and
//! the legacy placeholder identity is replaced.

use crate::types::{ControlObjectRuntime, DEFAULT_ORIGINATOR_CAT, DEFAULT_ORIGINATOR_ID};

/// Placeholder identity left behind by older configurations; replaced by
/// the default on the wire.
const PLACEHOLDER_ORIGINATOR_ID: &str = "ScadaScout";

/// Validated originator information attached to a control session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Originator {
    /// Identity string (`orIdent`)
    pub id: String,
    /// Category (`orCat`), 1..=7
    pub category: u8,
}

impl Originator {
    /// Compute the originator for a control call.
    ///
    /// - no context: `("SCADA", 3)`
    /// - category outside 1..=7 (including unset 0): replaced with 3 (remote)
    /// - empty or placeholder identity: replaced with `"SCADA"`
    pub fn compute(ctx: Option<&ControlObjectRuntime>) -> Self {
        let Some(ctx) = ctx else {
            return Self::default();
        };

        let category = if (1..=7).contains(&ctx.originator_cat) {
            ctx.originator_cat
        } else {
            DEFAULT_ORIGINATOR_CAT
        };

        let id = if ctx.originator_id.is_empty() || ctx.originator_id == PLACEHOLDER_ORIGINATOR_ID
        {
            DEFAULT_ORIGINATOR_ID.to_string()
        } else {
            ctx.originator_id.clone()
        };

        Self { id, category }
    }
}

impl Default for Originator {
    fn default() -> Self {
        Self {
            id: DEFAULT_ORIGINATOR_ID.to_string(),
            category: DEFAULT_ORIGINATOR_CAT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx_with(cat: u8, id: &str) -> ControlObjectRuntime {
        let mut ctx = ControlObjectRuntime::new("IED/CSWI1.Pos");
        ctx.originator_cat = cat;
        ctx.originator_id = id.to_string();
        ctx
    }

    #[test]
    fn test_defaults_when_no_context() {
        let o = Originator::compute(None);
        assert_eq!(o.id, "SCADA");
        assert_eq!(o.category, 3);
    }

    #[test]
    fn test_zero_category_normalized() {
        let o = Originator::compute(Some(&ctx_with(0, "X")));
        assert_eq!(o.id, "X");
        assert_eq!(o.category, 3);
    }

    #[test]
    fn test_out_of_range_category_normalized() {
        let o = Originator::compute(Some(&ctx_with(8, "X")));
        assert_eq!(o.category, 3);
    }

    #[test]
    fn test_valid_values_pass_through() {
        let o = Originator::compute(Some(&ctx_with(5, "X")));
        assert_eq!(o.id, "X");
        assert_eq!(o.category, 5);
    }

    #[test]
    fn test_placeholder_identity_replaced() {
        let o = Originator::compute(Some(&ctx_with(2, "ScadaScout")));
        assert_eq!(o.id, "SCADA");
        assert_eq!(o.category, 2);
    }

    #[test]
    fn test_empty_identity_replaced() {
        let o = Originator::compute(Some(&ctx_with(4, "")));
        assert_eq!(o.id, "SCADA");
        assert_eq!(o.category, 4);
    }
}
