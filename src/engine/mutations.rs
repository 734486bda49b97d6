use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::auth::Session;
use crate::limits::*;
use crate::model::*;

use super::validate::*;
use super::{Engine, EngineError};

const JOIN_CODE_ATTEMPTS: usize = 16;

impl Engine {
    /// Errors unless `user_id` currently belongs to `tent_id`.
    pub async fn require_member(&self, user_id: Ulid, tent_id: Ulid) -> Result<(), EngineError> {
        let us = self.get_user(&user_id).ok_or(EngineError::NoTent)?;
        let guard = us.read().await;
        match guard.tent_id {
            None => Err(EngineError::NoTent),
            Some(t) if t == tent_id => Ok(()),
            Some(_) => Err(EngineError::NotMember(tent_id)),
        }
    }

    /// Create a tent and make the caller its Captain. One WAL record carries
    /// both, so a crash can never leave a tent without its captain.
    pub async fn create_tent(
        &self,
        session: &Session,
        id: Ulid,
        name: &str,
        tent_type: TentType,
    ) -> Result<TentInfo, EngineError> {
        let user_id = session.require_user()?;
        let name = validate_name(name)?;

        let _commit = self.commit_gate.read().await;
        let _reservation = self.reserve_id(id)?;
        if self.tents.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if self.tents.len() >= MAX_TENTS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many tents"));
        }

        let join_code = self.reserve_join_code(id)?;
        let us = self.user_entry(user_id);
        let mut guard = us.write().await;

        let event = Event::TentCreated {
            id,
            name: name.clone(),
            join_code: join_code.clone(),
            tent_type,
            created_by: user_id,
        };
        if let Err(e) = self.wal_append(&event).await {
            self.join_codes.remove(&join_code);
            return Err(e);
        }
        let ts = TentState::new(id, name.clone(), join_code.clone(), tent_type, user_id);
        self.tents.insert(id, Arc::new(RwLock::new(ts)));
        self.apply_user_committed(&mut guard, &event);
        tracing::info!("tent {id} created by {user_id}");

        Ok(TentInfo {
            id,
            name,
            join_code,
            tent_type,
            image_url: None,
            created_by: user_id,
        })
    }

    fn reserve_join_code(&self, tent_id: Ulid) -> Result<String, EngineError> {
        for _ in 0..JOIN_CODE_ATTEMPTS {
            let code = generate_join_code();
            if let Entry::Vacant(slot) = self.join_codes.entry(code.clone()) {
                slot.insert(tent_id);
                return Ok(code);
            }
        }
        Err(EngineError::LimitExceeded("could not allocate a join code"))
    }

    /// Join the tent owning `code`. Re-joining one's own tent keeps the role.
    pub async fn join_tent(&self, session: &Session, code: &str) -> Result<TentInfo, EngineError> {
        let user_id = session.require_user()?;
        let code = normalize_join_code(code);

        let _commit = self.commit_gate.read().await;
        let tent_id = self
            .join_codes
            .get(&code)
            .map(|e| *e.value())
            .ok_or_else(|| EngineError::InvalidJoinCode(code.clone()))?;
        let ts = self.get_tent_state(&tent_id).ok_or(EngineError::NotFound(tent_id))?;

        let us = self.user_entry(user_id);
        let mut guard = us.write().await;
        // Joins into one tent serialize here, so the head count below cannot
        // go stale before the new member is applied.
        let tent = ts.write().await;
        let role = if guard.tent_id == Some(tent_id) {
            guard.role
        } else {
            if self.member_ids(&tent_id).len() >= MAX_MEMBERS_PER_TENT {
                return Err(EngineError::LimitExceeded("tent is full"));
            }
            Role::Member
        };

        let event = Event::ProfileUpserted {
            id: user_id,
            full_name: guard.full_name.clone(),
            tent_id: Some(tent_id),
            role,
        };
        self.persist_user(&mut guard, &event).await?;
        tracing::info!("user {user_id} joined tent {tent_id}");
        Ok(tent_info(&tent))
    }

    pub async fn rename_tent(&self, session: &Session, tent_id: Ulid, name: &str) -> Result<(), EngineError> {
        let name = validate_name(name)?;
        self.update_tent(session, tent_id, |ts| (name, ts.image_url.clone())).await
    }

    pub async fn update_tent_image(
        &self,
        session: &Session,
        tent_id: Ulid,
        image_url: Option<String>,
    ) -> Result<(), EngineError> {
        if let Some(ref url) = image_url {
            validate_url(url)?;
        }
        self.update_tent(session, tent_id, |ts| (ts.name.clone(), image_url)).await
    }

    async fn update_tent(
        &self,
        session: &Session,
        tent_id: Ulid,
        change: impl FnOnce(&TentState) -> (String, Option<String>),
    ) -> Result<(), EngineError> {
        let user_id = session.require_user()?;
        let _commit = self.commit_gate.read().await;
        let ts = self.get_tent_state(&tent_id).ok_or(EngineError::NotFound(tent_id))?;
        self.require_member(user_id, tent_id).await?;

        let mut guard = ts.write().await;
        let (name, image_url) = change(&guard);
        let event = Event::TentUpdated { id: tent_id, name, image_url };
        self.persist_tent(&mut guard, &event).await
    }

    /// Set the caller's display name, creating the profile if needed.
    pub async fn update_profile(&self, session: &Session, full_name: Option<String>) -> Result<ProfileInfo, EngineError> {
        let user_id = session.require_user()?;
        if let Some(ref n) = full_name
            && n.len() > MAX_NAME_LEN
        {
            return Err(EngineError::LimitExceeded("name too long"));
        }

        let _commit = self.commit_gate.read().await;
        let us = self.user_entry(user_id);
        let mut guard = us.write().await;
        let event = Event::ProfileUpserted {
            id: user_id,
            full_name,
            tent_id: guard.tent_id,
            role: guard.role,
        };
        self.persist_user(&mut guard, &event).await?;
        Ok(ProfileInfo {
            id: guard.id,
            full_name: guard.full_name.clone(),
            tent_id: guard.tent_id,
            role: guard.role,
        })
    }

    // ── Shifts ───────────────────────────────────────────────

    pub async fn create_shift(
        &self,
        session: &Session,
        id: Ulid,
        tent_id: Ulid,
        start: Ms,
        end: Ms,
        required_count: u32,
        is_grace: bool,
    ) -> Result<(), EngineError> {
        let user_id = session.require_user()?;
        let span = checked_span(start, end)?;
        validate_span(&span)?;
        if required_count > MAX_REQUIRED_COUNT {
            return Err(EngineError::LimitExceeded("required count too high"));
        }

        let _commit = self.commit_gate.read().await;
        let ts = self.get_tent_state(&tent_id).ok_or(EngineError::NotFound(tent_id))?;
        self.require_member(user_id, tent_id).await?;
        let _reservation = self.reserve_id(id)?;
        if self.entity_to_tent.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let mut guard = ts.write().await;
        if guard.shifts.len() >= MAX_SHIFTS_PER_TENT {
            return Err(EngineError::LimitExceeded("too many shifts in tent"));
        }
        let event = Event::ShiftCreated {
            id,
            tent_id,
            span,
            required_count,
            is_grace,
        };
        self.persist_tent(&mut guard, &event).await
    }

    pub async fn delete_shift(&self, session: &Session, id: Ulid) -> Result<Ulid, EngineError> {
        let user_id = session.require_user()?;
        let _commit = self.commit_gate.read().await;
        let tent_id = self.get_tent_for_entity(&id).ok_or(EngineError::NotFound(id))?;
        self.require_member(user_id, tent_id).await?;

        let (tent_id, mut guard) = self.resolve_entity_write(&id).await?;
        if !guard.shifts.iter().any(|s| s.id == id) {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::ShiftDeleted { id, tent_id };
        self.persist_tent(&mut guard, &event).await?;
        Ok(tent_id)
    }

    /// Put `user_id` on a shift. The assignee must belong to the shift's tent.
    pub async fn assign(
        &self,
        session: &Session,
        id: Ulid,
        shift_id: Ulid,
        user_id: Ulid,
    ) -> Result<(), EngineError> {
        let caller = session.require_user()?;
        let _commit = self.commit_gate.read().await;
        let tent_id = self
            .get_tent_for_entity(&shift_id)
            .ok_or(EngineError::NotFound(shift_id))?;
        self.require_member(caller, tent_id).await?;
        self.require_member(user_id, tent_id)
            .await
            .map_err(|_| EngineError::NotMember(tent_id))?;
        let _reservation = self.reserve_id(id)?;
        if self.entity_to_tent.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let (tent_id, mut guard) = self.resolve_entity_write(&shift_id).await?;
        let shift = guard
            .shifts
            .iter()
            .find(|s| s.id == shift_id)
            .ok_or(EngineError::NotFound(shift_id))?;
        if shift.assignments.iter().any(|a| a.user_id == user_id) {
            return Err(EngineError::AlreadyExists(user_id));
        }

        let event = Event::AssignmentAdded {
            id,
            tent_id,
            shift_id,
            user_id,
        };
        self.persist_tent(&mut guard, &event).await
    }

    pub async fn unassign(&self, session: &Session, id: Ulid) -> Result<Ulid, EngineError> {
        let caller = session.require_user()?;
        let _commit = self.commit_gate.read().await;
        let tent_id = self.get_tent_for_entity(&id).ok_or(EngineError::NotFound(id))?;
        self.require_member(caller, tent_id).await?;

        let (tent_id, mut guard) = self.resolve_entity_write(&id).await?;
        let shift_id = guard
            .shifts
            .iter()
            .find(|s| s.assignments.iter().any(|a| a.id == id))
            .map(|s| s.id)
            .ok_or(EngineError::NotFound(id))?;
        let event = Event::AssignmentRemoved { id, tent_id, shift_id };
        self.persist_tent(&mut guard, &event).await?;
        Ok(tent_id)
    }
}

pub(super) fn tent_info(ts: &TentState) -> TentInfo {
    TentInfo {
        id: ts.id,
        name: ts.name.clone(),
        join_code: ts.join_code.clone(),
        tent_type: ts.tent_type,
        image_url: ts.image_url.clone(),
        created_by: ts.created_by,
    }
}
