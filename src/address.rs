//! Address resolution for control objects.
//!
//! Callers hand the coordinator signal addresses that usually point at a
//! leaf attribute (`IED/CSWI1.Pos.Oper.ctlVal`, `IED/CSWI1.Pos.stVal`).
//! Control services operate on the Data-Object path, so known attribute
//! suffixes are stripped, longest first, across both the hierarchical (`.`)
//! and flattened (`$`) naming conventions.

use crate::types::FunctionalConstraint;

/// Attribute-path suffixes recognized below a control Data Object.
///
/// Ordered longest-first so that `.Oper.ctlVal` is stripped as a whole and
/// never truncated at the shorter `.ctlVal` match.
pub const CONTROL_SUFFIXES: [&str; 12] = [
    "Cancel.ctlVal",
    "SBOw.ctlVal",
    "Oper.ctlVal",
    "SBO.ctlVal",
    "Cancel",
    "ctlVal",
    "stVal",
    "SBOw",
    "Oper",
    "SBO",
    "q",
    "t",
];

/// Resolve a caller-supplied address to its Data-Object reference.
///
/// If no known suffix matches, the address is returned unchanged; it is
/// assumed to already name a Data Object.
pub fn resolve_control_object(address: &str) -> String {
    let address = address.trim_end_matches('/');
    for suffix in CONTROL_SUFFIXES {
        let dotted = format!(".{suffix}");
        if let Some(stripped) = address.strip_suffix(&dotted) {
            return stripped.to_string();
        }
        let flat = format!("${}", suffix.replace('.', "$"));
        if let Some(stripped) = address.strip_suffix(&flat) {
            return stripped.to_string();
        }
    }
    address.to_string()
}

/// Rewrite a breaker-status reference to its paired control-interface
/// reference, if the shape matches.
///
/// The IEC 61850 control chain terminates at the `CSWI` logical node, not
/// at the `XCBR` breaker node, so `LD/XCBR1.Pos` is re-addressed as
/// `LD/CSWI1.Pos`. The caller must still probe the candidate before
/// trusting it; not every IED exposes the paired node.
pub fn breaker_redirect_candidate(object_reference: &str) -> Option<String> {
    let (prefix, tail) = match object_reference.rsplit_once('/') {
        Some((p, t)) => (Some(p), t),
        None => (None, object_reference),
    };
    let (ln, rest) = tail.split_once('.')?;
    if !rest.starts_with("Pos") {
        return None;
    }
    let instance = ln.strip_prefix("XCBR")?;
    let redirected_ln = format!("CSWI{instance}");
    Some(match prefix {
        Some(p) => format!("{p}/{redirected_ln}.{rest}"),
        None => format!("{redirected_ln}.{rest}"),
    })
}

/// Render a hierarchical reference in the flattened MMS variable-name
/// convention, inserting the functional-constraint token after the
/// logical node: `LD/LN.DO.attr` becomes `LD/LN$CO$DO$attr`.
pub fn flattened_reference(reference: &str, fc: FunctionalConstraint) -> String {
    match reference.rsplit_once('/') {
        Some((prefix, tail)) => match tail.split_once('.') {
            Some((ln, rest)) => {
                format!("{prefix}/{ln}${}${}", fc.token(), rest.replace('.', "$"))
            }
            None => format!("{prefix}/{tail}"),
        },
        None => reference.replace('.', "$"),
    }
}
