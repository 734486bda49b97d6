use ulid::Ulid;

use crate::auth::Session;
use crate::limits::*;
use crate::model::*;

use super::availability::overlapping_ids;
use super::validate::{checked_span, validate_span};
use super::{Engine, EngineError};

impl Engine {
    /// Record the caller's latest intent for `[start, end)`.
    ///
    /// Every stored interval of the user overlapping the range is deleted in
    /// full and the new one inserted, as a single WAL record applied under the
    /// user's write lock. A failed append leaves the previous intervals intact.
    pub async fn submit_availability(
        &self,
        session: &Session,
        start: Ms,
        end: Ms,
        status: AvailabilityStatus,
    ) -> Result<AvailabilityInfo, EngineError> {
        let user_id = session.require_user()?;
        let span = checked_span(start, end)?;
        validate_span(&span)?;

        let _commit = self.commit_gate.read().await;
        let us = self.get_user(&user_id).ok_or(EngineError::NoTent)?;
        let mut guard = us.write().await;
        let tent_id = guard.tent_id.ok_or(EngineError::NoTent)?;

        let replaced = overlapping_ids(&guard, &span);
        if guard.intervals.len() - replaced.len() >= MAX_INTERVALS_PER_USER {
            return Err(EngineError::LimitExceeded("too many availability intervals"));
        }

        let id = Ulid::new();
        let replaced_count = replaced.len();
        let event = Event::AvailabilitySubmitted {
            id,
            user_id,
            tent_id,
            span,
            status,
            replaced,
        };
        self.persist_user(&mut guard, &event).await?;

        metrics::counter!(crate::observability::INTERVALS_REPLACED_TOTAL)
            .increment(replaced_count as u64);
        tracing::debug!(
            "user {user_id} marked [{start}, {end}) {} in tent {tent_id}, replaced {replaced_count}",
            status.as_str()
        );

        Ok(AvailabilityInfo {
            id,
            user_id,
            tent_id,
            start,
            end,
            status,
        })
    }
}
