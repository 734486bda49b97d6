use ulid::Ulid;

use crate::auth::Session;
use crate::model::*;

use super::availability::coverage_sweep;
use super::mutations::tent_info;
use super::validate::validate_window;
use super::{Engine, EngineError};

fn availability_info(user_id: Ulid, a: &Availability) -> AvailabilityInfo {
    AvailabilityInfo {
        id: a.id,
        user_id,
        tent_id: a.tent_id,
        start: a.span.start,
        end: a.span.end,
        status: a.status,
    }
}

fn shift_info(tent_id: Ulid, s: &Shift) -> ShiftInfo {
    ShiftInfo {
        id: s.id,
        tent_id,
        start: s.span.start,
        end: s.span.end,
        required_count: s.required_count,
        is_grace: s.is_grace,
        assignees: s.assignments.iter().map(|a| a.user_id).collect(),
    }
}

impl Engine {
    pub async fn get_tent(&self, tent_id: Ulid) -> Option<TentInfo> {
        let ts = self.get_tent_state(&tent_id)?;
        let guard = ts.read().await;
        Some(tent_info(&guard))
    }

    /// The caller's current tent.
    pub async fn my_tent(&self, session: &Session) -> Result<TentInfo, EngineError> {
        let user_id = session.require_user()?;
        let profile = self.get_profile(user_id).await.ok_or(EngineError::NoTent)?;
        let tent_id = profile.tent_id.ok_or(EngineError::NoTent)?;
        self.get_tent(tent_id).await.ok_or(EngineError::NotFound(tent_id))
    }

    pub async fn get_profile(&self, user_id: Ulid) -> Option<ProfileInfo> {
        let us = self.get_user(&user_id)?;
        let guard = us.read().await;
        Some(ProfileInfo {
            id: guard.id,
            full_name: guard.full_name.clone(),
            tent_id: guard.tent_id,
            role: guard.role,
        })
    }

    pub async fn list_members(&self, tent_id: Ulid) -> Vec<ProfileInfo> {
        let mut out = Vec::new();
        for user_id in self.member_ids(&tent_id) {
            if let Some(p) = self.get_profile(user_id).await
                && p.tent_id == Some(tent_id)
            {
                out.push(p);
            }
        }
        out.sort_by_key(|p| p.id);
        out
    }

    /// A user's stored intervals, optionally restricted to those overlapping `window`.
    pub async fn user_availability(&self, user_id: Ulid, window: Option<Span>) -> Vec<AvailabilityInfo> {
        let Some(us) = self.get_user(&user_id) else {
            return Vec::new();
        };
        let guard = us.read().await;
        match window {
            Some(w) => guard.overlapping(&w).map(|a| availability_info(user_id, a)).collect(),
            None => guard.intervals.iter().map(|a| availability_info(user_id, a)).collect(),
        }
    }

    /// Everything the tent's current members have painted for this tent: the
    /// data behind the shared availability grid.
    pub async fn tent_availability(
        &self,
        session: &Session,
        tent_id: Ulid,
        window: Option<Span>,
    ) -> Result<Vec<AvailabilityInfo>, EngineError> {
        let user_id = session.require_user()?;
        if let Some(ref w) = window {
            validate_window(w)?;
        }
        self.require_member(user_id, tent_id).await?;

        let mut out = Vec::new();
        for member in self.member_ids(&tent_id) {
            out.extend(
                self.user_availability(member, window)
                    .await
                    .into_iter()
                    .filter(|a| a.tent_id == tent_id),
            );
        }
        out.sort_by(|a, b| a.start.cmp(&b.start).then(a.user_id.cmp(&b.user_id)));
        Ok(out)
    }

    /// Spans inside `window` where at least `min_count` members of the tent are
    /// marked `status`, with the exact head count for each span.
    pub async fn coverage(
        &self,
        session: &Session,
        tent_id: Ulid,
        window: Span,
        status: AvailabilityStatus,
        min_count: u32,
    ) -> Result<Vec<CoverageSpan>, EngineError> {
        let intervals = self.tent_availability(session, tent_id, Some(window)).await?;
        let spans: Vec<Span> = intervals
            .iter()
            .filter(|a| a.status == status)
            .map(|a| Span::new(a.start.max(window.start), a.end.min(window.end)))
            .collect();
        Ok(coverage_sweep(&spans, min_count))
    }

    pub async fn tent_shifts(&self, tent_id: Ulid) -> Vec<ShiftInfo> {
        let Some(ts) = self.get_tent_state(&tent_id) else {
            return Vec::new();
        };
        let guard = ts.read().await;
        guard.shifts.iter().map(|s| shift_info(tent_id, s)).collect()
    }

    /// Shifts the user is assigned to, across every tent.
    pub async fn member_shifts(&self, user_id: Ulid) -> Vec<ShiftInfo> {
        let tents: Vec<_> = self.tents.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::new();
        for ts in tents {
            let guard = ts.read().await;
            out.extend(
                guard
                    .shifts
                    .iter()
                    .filter(|s| s.assignments.iter().any(|a| a.user_id == user_id))
                    .map(|s| shift_info(guard.id, s)),
            );
        }
        out.sort_by_key(|s| s.start);
        out
    }

    /// Staffing status of each shift: `is_safe` once enough people are assigned.
    pub async fn shift_summary(&self, tent_id: Ulid) -> Vec<ShiftSummary> {
        self.tent_shifts(tent_id)
            .await
            .into_iter()
            .map(|s| {
                let assigned = s.assignees.len() as u32;
                ShiftSummary {
                    shift_id: s.id,
                    start: s.start,
                    end: s.end,
                    assigned,
                    required: s.required_count,
                    is_safe: assigned >= s.required_count,
                }
            })
            .collect()
    }
}
