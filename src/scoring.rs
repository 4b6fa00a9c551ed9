//! Confidence scoring for a pipeline's finding set.

use crate::models::Finding;

/// Added to the mean severity weight of a non-empty finding set.
pub const CONFIDENCE_BOOST: f64 = 0.2;

/// Confidence in [0, 1] derived from the severity distribution of `findings`.
///
/// No findings means full confidence that nothing is wrong. Otherwise the
/// mean severity weight plus [`CONFIDENCE_BOOST`], clamped to 1.0.
pub fn confidence(findings: &[Finding]) -> f64 {
    if findings.is_empty() {
        return 1.0;
    }

    let total: f64 = findings.iter().map(|f| f.severity.weight()).sum();
    let mean = total / findings.len() as f64;

    (mean + CONFIDENCE_BOOST).clamp(0.0, 1.0)
}
