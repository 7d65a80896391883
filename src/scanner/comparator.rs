//! Response comparison used by the boolean oracle and crawl-side probes

use crate::models::CapturedResponse;

/// Whether two responses differ enough to count as different application behavior.
///
/// Different status codes always differ. Otherwise bodies differ when the length
/// gap exceeds both `tolerance` of the longer body and `floor` characters, or when
/// the lengths are within `floor` of each other but the bodies are not identical.
/// Symmetric in `a` and `b`.
pub fn responses_differ(a: &CapturedResponse, b: &CapturedResponse, tolerance: f64, floor: usize) -> bool {
    if a.status != b.status {
        return true;
    }
    bodies_differ(&a.body, &b.body, tolerance, floor)
}

pub fn bodies_differ(a: &str, b: &str, tolerance: f64, floor: usize) -> bool {
    let len_a = a.chars().count();
    let len_b = b.chars().count();
    let gap = len_a.abs_diff(len_b);

    if gap > floor {
        let longest = len_a.max(len_b) as f64;
        return gap as f64 > longest * tolerance;
    }
    a != b
}
