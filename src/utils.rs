//! Identifier and reference number helpers

use bech32::Bech32m;
use uuid7::uuid7;

use crate::error::WorkflowError;

/// Human readable prefix of requisition ids.
pub const REQUISITION_HRP: &str = "req";

// construct a unique, time ordered record id then encode using bech32m
pub fn new_record_id(hrp: &str) -> Result<String, WorkflowError> {
    let hrp = bech32::Hrp::parse(hrp).map_err(|e| WorkflowError::Codec(e.to_string()))?;
    bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())
        .map_err(|e| WorkflowError::Codec(e.to_string()))
}

/// Formats `PREFIX-YYYY-NNN`, zero padding the sequence to `width` digits.
pub fn format_reference(prefix: &str, year: i32, sequence: u64, width: usize) -> String {
    format!("{prefix}-{year}-{sequence:0width$}")
}

/// Splits a reference produced by [`format_reference`] back into year and sequence.
pub fn parse_reference(prefix: &str, reference: &str) -> Option<(i32, u64)> {
    let rest = reference.strip_prefix(prefix)?.strip_prefix('-')?;
    let (year, sequence) = rest.split_once('-')?;
    if year.len() != 4 || sequence.is_empty() {
        return None;
    }
    Some((year.parse().ok()?, sequence.parse().ok()?))
}
