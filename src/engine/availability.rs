use ulid::Ulid;

use crate::model::*;

// ── Reconciliation ────────────────────────────────────────────────

/// Ids of every stored interval of `user` that overlaps `span`.
///
/// Strict half-open test: an interval that only touches `span` at a boundary
/// is not returned. Partial overlaps are returned whole; the caller deletes
/// them in full rather than clipping.
pub fn overlapping_ids(user: &UserState, span: &Span) -> Vec<Ulid> {
    user.overlapping(span).map(|i| i.id).collect()
}

// ── Coverage sweep ────────────────────────────────────────────────

/// Sweep-line over possibly overlapping spans, returning the maximal segments
/// where at least `min_count` spans are simultaneously active, each with its
/// exact count. Adjacent segments with equal counts are merged.
pub fn coverage_sweep(spans: &[Span], min_count: u32) -> Vec<CoverageSpan> {
    let threshold = min_count.max(1) as i64;

    let mut events: Vec<(Ms, i64)> = Vec::with_capacity(spans.len() * 2);
    for s in spans {
        events.push((s.start, 1));
        events.push((s.end, -1));
    }
    // Ends before starts at the same instant: touching spans don't stack.
    events.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

    let mut result: Vec<CoverageSpan> = Vec::new();
    let mut count: i64 = 0;
    let mut prev: Option<Ms> = None;

    for (time, delta) in events {
        if let Some(p) = prev
            && time > p
            && count >= threshold
        {
            let count = count as u32;
            match result.last_mut() {
                Some(last) if last.count == count && last.span.end == p => last.span.end = time,
                _ => result.push(CoverageSpan {
                    span: Span::new(p, time),
                    count,
                }),
            }
        }
        count += delta;
        prev = Some(time);
    }

    result
}
