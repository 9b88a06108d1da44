//! Pure submission-time parsing rules shared by the submitter CLI: frame
//! range expansion into per-task slices, and the `archived` truthy-string
//! convention inherited from the original's loose boolean parsing.

/// Maximum length accepted for a `Command`/`MayaPy` job's `script` field at
/// submission time.
pub const MAX_SCRIPT_LEN: usize = 2048;

/// Expand `start..=end` into per-task frame slices of width `by`, each
/// inclusive of its own end frame. The final slice is clamped to `end` even
/// when `by` overshoots it, so the expansion always covers the full range
/// with no gap and no frame past `end`.
pub fn expand_frame_slices(start: i32, end: i32, by: i32) -> Vec<(i32, i32)> {
    let by = by.max(1);
    let mut slices = Vec::new();
    let mut cur = start;
    while cur <= end {
        let slice_end = (cur + by - 1).min(end);
        slices.push((cur, slice_end));
        cur += by;
    }
    slices
}

/// Parse a submission-time truthy string for `archived`: any value whose
/// string form starts with `t`/`T` is true, anything else is false.
pub fn parse_archived_flag(value: &str) -> bool {
    value
        .chars()
        .next()
        .is_some_and(|c| c == 't' || c == 'T')
}
