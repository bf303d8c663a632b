use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

pub type Timestamp = DateTime<Utc>;

/// Half-open time interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl Span {
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        debug_assert!(start <= end, "span start must not be after end");
        Self { start, end }
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn covers(&self, other: &Span) -> bool {
        self.start <= other.start && self.end >= other.end
    }

    pub fn contains_instant(&self, t: Timestamp) -> bool {
        self.start <= t && t < self.end
    }
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut() {
            if span.start <= last.end {
                last.end = last.end.max(span.end);
                continue;
            }
        }
        merged.push(span);
    }
    merged
}

/// Removes every interval of `to_remove` from `base`. Both inputs must be sorted by start.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Span::new(current_start, current_end));
        }
    }

    result
}

/// True when the sorted `blockers` leave a free stretch of at least `needed` inside `window`.
pub fn has_gap(window: &Span, blockers: &[Span], needed: Duration) -> bool {
    let mut cursor = window.start;
    for blocker in blockers {
        if blocker.end <= cursor {
            continue;
        }
        if blocker.start >= window.end {
            break;
        }
        if blocker.start.min(window.end) - cursor >= needed {
            return true;
        }
        cursor = cursor.max(blocker.end);
    }
    window.end - cursor >= needed
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> Timestamp {
        Utc.with_ymd_and_hms(2030, 3, 4, hour, 0, 0)
            .single()
            .expect("valid timestamp")
    }

    fn span(from: u32, to: u32) -> Span {
        Span::new(at(from), at(to))
    }

    #[test]
    fn merges_adjacent_and_overlapping() {
        let merged = merge_overlapping(&[span(8, 10), span(9, 11), span(11, 12), span(14, 15)]);
        assert_eq!(merged, vec![span(8, 12), span(14, 15)]);
    }

    #[test]
    fn subtracts_blockers_from_free_time() {
        let free = subtract_intervals(&[span(8, 16)], &[span(9, 10), span(12, 13)]);
        assert_eq!(free, vec![span(8, 9), span(10, 12), span(13, 16)]);
    }

    #[test]
    fn subtract_handles_full_cover() {
        assert!(subtract_intervals(&[span(9, 10)], &[span(8, 12)]).is_empty());
    }

    #[test]
    fn gap_search_skips_blocked_stretches() {
        let window = span(8, 12);
        let blockers = [span(8, 9), span(10, 12)];
        assert!(has_gap(&window, &blockers, Duration::minutes(60)));
        assert!(!has_gap(&window, &blockers, Duration::minutes(61)));
        assert!(has_gap(&window, &[], Duration::hours(4)));
    }

    #[test]
    fn overlap_is_half_open() {
        assert!(!span(8, 9).overlaps(&span(9, 10)));
        assert!(span(8, 10).overlaps(&span(9, 10)));
        assert!(span(8, 12).covers(&span(9, 10)));
    }
}
