use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. Every timestamp in the system uses this.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Checked constructor for caller-supplied ranges.
    pub fn try_new(start: Ms, end: Ms) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && self.end > other.start
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AvailabilityStatus {
    Available,
    Maybe,
    Unavailable,
}

impl AvailabilityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AvailabilityStatus::Available => "available",
            AvailabilityStatus::Maybe => "maybe",
            AvailabilityStatus::Unavailable => "unavailable",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "available" => Some(AvailabilityStatus::Available),
            "maybe" => Some(AvailabilityStatus::Maybe),
            "unavailable" => Some(AvailabilityStatus::Unavailable),
            _ => None,
        }
    }
}

/// Tenting phase of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TentType {
    #[default]
    Black,
    Blue,
    White,
}

impl TentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TentType::Black => "Black",
            TentType::Blue => "Blue",
            TentType::White => "White",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "black" => Some(TentType::Black),
            "blue" => Some(TentType::Blue),
            "white" => Some(TentType::White),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Role {
    Captain,
    #[default]
    Member,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Captain => "Captain",
            Role::Member => "Member",
        }
    }
}

/// One stored availability range of a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Availability {
    pub id: Ulid,
    /// Tent the user belonged to when this range was painted.
    pub tent_id: Ulid,
    pub span: Span,
    pub status: AvailabilityStatus,
}

/// Everything owned by one user: profile plus availability ranges.
/// The per-user lock around this is the reconciliation transaction boundary.
#[derive(Debug, Clone)]
pub struct UserState {
    pub id: Ulid,
    pub full_name: Option<String>,
    pub tent_id: Option<Ulid>,
    pub role: Role,
    /// Pairwise non-overlapping, sorted by `span.start`.
    pub intervals: Vec<Availability>,
}

impl UserState {
    pub fn new(id: Ulid, full_name: Option<String>, tent_id: Option<Ulid>, role: Role) -> Self {
        Self {
            id,
            full_name,
            tent_id,
            role,
            intervals: Vec::new(),
        }
    }

    /// Insert interval maintaining sort order by span.start.
    pub fn insert_interval(&mut self, interval: Availability) {
        let pos = self
            .intervals
            .binary_search_by_key(&interval.span.start, |i| i.span.start)
            .unwrap_or_else(|e| e);
        self.intervals.insert(pos, interval);
    }

    /// Remove interval by id.
    pub fn remove_interval(&mut self, id: Ulid) -> Option<Availability> {
        if let Some(pos) = self.intervals.iter().position(|i| i.id == id) {
            Some(self.intervals.remove(pos))
        } else {
            None
        }
    }

    /// Return only intervals whose span overlaps the query window.
    /// Uses binary search to skip intervals starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Availability> {
        let right_bound = self
            .intervals
            .partition_point(|i| i.span.start < query.end);
        self.intervals[..right_bound]
            .iter()
            .filter(move |i| i.span.end > query.start)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub id: Ulid,
    pub user_id: Ulid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shift {
    pub id: Ulid,
    pub span: Span,
    pub required_count: u32,
    pub is_grace: bool,
    pub assignments: Vec<Assignment>,
}

#[derive(Debug, Clone)]
pub struct TentState {
    pub id: Ulid,
    pub name: String,
    pub join_code: String,
    pub tent_type: TentType,
    pub image_url: Option<String>,
    pub created_by: Ulid,
    /// Sorted by `span.start`.
    pub shifts: Vec<Shift>,
}

impl TentState {
    pub fn new(id: Ulid, name: String, join_code: String, tent_type: TentType, created_by: Ulid) -> Self {
        Self {
            id,
            name,
            join_code,
            tent_type,
            image_url: None,
            created_by,
            shifts: Vec::new(),
        }
    }

    pub fn insert_shift(&mut self, shift: Shift) {
        let pos = self
            .shifts
            .binary_search_by_key(&shift.span.start, |s| s.span.start)
            .unwrap_or_else(|e| e);
        self.shifts.insert(pos, shift);
    }

    pub fn remove_shift(&mut self, id: Ulid) -> Option<Shift> {
        let pos = self.shifts.iter().position(|s| s.id == id)?;
        Some(self.shifts.remove(pos))
    }

    pub fn shift_mut(&mut self, id: Ulid) -> Option<&mut Shift> {
        self.shifts.iter_mut().find(|s| s.id == id)
    }
}

/// The event types, flat with no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    /// Also moves `created_by` into the new tent as its Captain.
    TentCreated {
        id: Ulid,
        name: String,
        join_code: String,
        tent_type: TentType,
        created_by: Ulid,
    },
    TentUpdated {
        id: Ulid,
        name: String,
        image_url: Option<String>,
    },
    ProfileUpserted {
        id: Ulid,
        full_name: Option<String>,
        tent_id: Option<Ulid>,
        role: Role,
    },
    /// One reconciliation: `replaced` are deleted and the new range inserted
    /// as a single record, so replay can never see one without the other.
    AvailabilitySubmitted {
        id: Ulid,
        user_id: Ulid,
        tent_id: Ulid,
        span: Span,
        status: AvailabilityStatus,
        replaced: Vec<Ulid>,
    },
    ShiftCreated {
        id: Ulid,
        tent_id: Ulid,
        span: Span,
        required_count: u32,
        is_grace: bool,
    },
    ShiftDeleted {
        id: Ulid,
        tent_id: Ulid,
    },
    AssignmentAdded {
        id: Ulid,
        tent_id: Ulid,
        shift_id: Ulid,
        user_id: Ulid,
    },
    AssignmentRemoved {
        id: Ulid,
        tent_id: Ulid,
        shift_id: Ulid,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TentInfo {
    pub id: Ulid,
    pub name: String,
    pub join_code: String,
    pub tent_type: TentType,
    pub image_url: Option<String>,
    pub created_by: Ulid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileInfo {
    pub id: Ulid,
    pub full_name: Option<String>,
    pub tent_id: Option<Ulid>,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailabilityInfo {
    pub id: Ulid,
    pub user_id: Ulid,
    pub tent_id: Ulid,
    pub start: Ms,
    pub end: Ms,
    pub status: AvailabilityStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShiftInfo {
    pub id: Ulid,
    pub tent_id: Ulid,
    pub start: Ms,
    pub end: Ms,
    pub required_count: u32,
    pub is_grace: bool,
    pub assignees: Vec<Ulid>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShiftSummary {
    pub shift_id: Ulid,
    pub start: Ms,
    pub end: Ms,
    pub assigned: u32,
    pub required: u32,
    pub is_safe: bool,
}

/// A span during which `count` members share the queried status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoverageSpan {
    pub span: Span,
    pub count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn avail(start: Ms, end: Ms) -> Availability {
        Availability {
            id: Ulid::new(),
            tent_id: Ulid::nil(),
            span: Span::new(start, end),
            status: AvailabilityStatus::Available,
        }
    }

    #[test]
    fn span_basics() {
        let s = Span::new(100, 200);
        assert_eq!(s.duration_ms(), 100);
        assert!(s.contains_instant(100));
        assert!(s.contains_instant(199));
        assert!(!s.contains_instant(200)); // half-open
    }

    #[test]
    fn span_overlap() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(a.overlaps(&a));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
        assert!(!c.overlaps(&a));
    }

    #[test]
    fn span_overlap_matches_predicate() {
        let points = [0, 5, 10, 15, 20];
        for &a0 in &points {
            for &a1 in &points {
                for &b0 in &points {
                    for &b1 in &points {
                        if a0 >= a1 || b0 >= b1 {
                            continue;
                        }
                        let a = Span::new(a0, a1);
                        let b = Span::new(b0, b1);
                        assert_eq!(a.overlaps(&b), a0 < b1 && a1 > b0);
                        assert_eq!(a.overlaps(&b), b.overlaps(&a));
                    }
                }
            }
        }
    }

    #[test]
    fn span_try_new_rejects_empty_and_inverted() {
        assert!(Span::try_new(10, 10).is_none());
        assert!(Span::try_new(10, 5).is_none());
        assert_eq!(Span::try_new(5, 10), Some(Span::new(5, 10)));
    }

    #[test]
    fn status_parse() {
        assert_eq!(AvailabilityStatus::parse("Available"), Some(AvailabilityStatus::Available));
        assert_eq!(AvailabilityStatus::parse("maybe"), Some(AvailabilityStatus::Maybe));
        assert_eq!(AvailabilityStatus::parse("UNAVAILABLE"), Some(AvailabilityStatus::Unavailable));
        assert_eq!(AvailabilityStatus::parse("busy"), None);
        assert_eq!(TentType::parse("blue"), Some(TentType::Blue));
        assert_eq!(TentType::parse("green"), None);
    }

    #[test]
    fn interval_ordering() {
        let mut us = UserState::new(Ulid::new(), None, None, Role::Member);
        us.insert_interval(avail(300, 400));
        us.insert_interval(avail(100, 200));
        us.insert_interval(avail(200, 300));
        assert_eq!(us.intervals[0].span.start, 100);
        assert_eq!(us.intervals[1].span.start, 200);
        assert_eq!(us.intervals[2].span.start, 300);
    }

    #[test]
    fn remove_nonexistent_returns_none() {
        let mut us = UserState::new(Ulid::new(), None, None, Role::Member);
        us.insert_interval(avail(100, 200));
        assert!(us.remove_interval(Ulid::new()).is_none());
        assert_eq!(us.intervals.len(), 1);
    }

    #[test]
    fn overlapping_skips_past_and_future() {
        let mut us = UserState::new(Ulid::new(), None, None, Role::Member);
        us.insert_interval(avail(100, 200));
        us.insert_interval(avail(450, 600));
        us.insert_interval(avail(1000, 1100));

        let hits: Vec<_> = us.overlapping(&Span::new(500, 800)).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].span, Span::new(450, 600));
    }

    #[test]
    fn overlapping_adjacent_not_included() {
        let mut us = UserState::new(Ulid::new(), None, None, Role::Member);
        us.insert_interval(avail(100, 200));
        us.insert_interval(avail(300, 400));
        let hits: Vec<_> = us.overlapping(&Span::new(200, 300)).collect();
        assert!(hits.is_empty());
    }

    #[test]
    fn overlapping_large_interval_spanning_query() {
        let mut us = UserState::new(Ulid::new(), None, None, Role::Member);
        us.insert_interval(avail(0, 10_000));
        let hits: Vec<_> = us.overlapping(&Span::new(500, 600)).collect();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn shifts_kept_sorted() {
        let mut ts = TentState::new(Ulid::new(), "Tent".into(), "ABC123".into(), TentType::Black, Ulid::new());
        for start in [300, 100, 200] {
            ts.insert_shift(Shift {
                id: Ulid::new(),
                span: Span::new(start, start + 50),
                required_count: 2,
                is_grace: false,
                assignments: Vec::new(),
            });
        }
        let starts: Vec<Ms> = ts.shifts.iter().map(|s| s.span.start).collect();
        assert_eq!(starts, vec![100, 200, 300]);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::AvailabilitySubmitted {
            id: Ulid::new(),
            user_id: Ulid::new(),
            tent_id: Ulid::new(),
            span: Span::new(0, 1000),
            status: AvailabilityStatus::Maybe,
            replaced: vec![Ulid::new(), Ulid::new()],
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
