mod availability;
mod error;
mod mutations;
mod queries;
mod reconcile;
mod validate;

pub use availability::{coverage_sweep, overlapping_ids};
pub use error::EngineError;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedUserState = Arc<RwLock<UserState>>;
pub type SharedTentState = Arc<RwLock<TentState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit.
/// Blocks for the first append, drains whatever else is already queued,
/// then commits the batch with a single fsync and answers every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };

        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    // Commit what we have before the non-append command runs.
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        commit_batch(&mut wal, &mut batch);
        if let Some(other) = deferred {
            handle_non_append(&mut wal, other);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(ref e) = result {
        tracing::error!("WAL batch of {} events failed: {e}", batch.len());
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

/// Commit a batch or nothing: on any error the log is cut back to where it
/// stood before the batch.
fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let mark = wal.mark()?;
    let result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event))
        .and_then(|()| wal.flush_sync());
    if result.is_err()
        && let Err(e) = wal.rollback(mark)
    {
        tracing::error!("WAL rollback failed, log may hold uncommitted entries: {e}");
    }
    result
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

// ── Engine ───────────────────────────────────────────────

pub(super) struct IdReservation<'a> {
    ids: &'a DashSet<Ulid>,
    id: Ulid,
}

impl Drop for IdReservation<'_> {
    fn drop(&mut self) {
        self.ids.remove(&self.id);
    }
}

/// In-memory state of one tenancy season, rebuilt from its WAL at startup.
pub struct Engine {
    pub(super) users: DashMap<Ulid, SharedUserState>,
    pub(super) tents: DashMap<Ulid, SharedTentState>,
    pub(super) join_codes: DashMap<String, Ulid>,
    /// Tent → member user ids.
    pub(super) members: DashMap<Ulid, Vec<Ulid>>,
    /// Reverse lookup: shift/assignment id → tent id.
    pub(super) entity_to_tent: DashMap<Ulid, Ulid>,
    /// Tent, shift and assignment ids claimed by a create still in flight.
    pub(super) reserved_ids: DashSet<Ulid>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Mutations hold this for reading across append + apply; compaction
    /// holds it for writing so its snapshot matches the log exactly.
    pub(super) commit_gate: RwLock<()>,
    pub notify: Arc<NotifyHub>,
}

/// Apply a user-scoped event (no locking: caller holds the lock).
fn apply_to_user(us: &mut UserState, event: &Event) {
    match event {
        Event::ProfileUpserted { full_name, tent_id, role, .. } => {
            us.full_name = full_name.clone();
            us.tent_id = *tent_id;
            us.role = *role;
        }
        Event::TentCreated { id, .. } => {
            us.tent_id = Some(*id);
            us.role = Role::Captain;
        }
        Event::AvailabilitySubmitted { id, tent_id, span, status, replaced, .. } => {
            for old in replaced {
                us.remove_interval(*old);
            }
            us.insert_interval(Availability {
                id: *id,
                tent_id: *tent_id,
                span: *span,
                status: *status,
            });
        }
        _ => {}
    }
}

/// Apply a tent-scoped event (no locking: caller holds the lock).
fn apply_to_tent(ts: &mut TentState, event: &Event, entity_map: &DashMap<Ulid, Ulid>) {
    match event {
        Event::TentUpdated { name, image_url, .. } => {
            ts.name = name.clone();
            ts.image_url = image_url.clone();
        }
        Event::ShiftCreated { id, tent_id, span, required_count, is_grace } => {
            ts.insert_shift(Shift {
                id: *id,
                span: *span,
                required_count: *required_count,
                is_grace: *is_grace,
                assignments: Vec::new(),
            });
            entity_map.insert(*id, *tent_id);
        }
        Event::ShiftDeleted { id, .. } => {
            if let Some(shift) = ts.remove_shift(*id) {
                for a in &shift.assignments {
                    entity_map.remove(&a.id);
                }
            }
            entity_map.remove(id);
        }
        Event::AssignmentAdded { id, tent_id, shift_id, user_id } => {
            if let Some(shift) = ts.shift_mut(*shift_id) {
                shift.assignments.push(Assignment { id: *id, user_id: *user_id });
                entity_map.insert(*id, *tent_id);
            }
        }
        Event::AssignmentRemoved { id, shift_id, .. } => {
            if let Some(shift) = ts.shift_mut(*shift_id) {
                shift.assignments.retain(|a| a.id != *id);
            }
            entity_map.remove(id);
        }
        _ => {}
    }
}

/// Tent whose availability view an event invalidates.
fn event_tent_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::TentCreated { id, .. } | Event::TentUpdated { id, .. } => Some(*id),
        Event::ProfileUpserted { tent_id, .. } => *tent_id,
        Event::AvailabilitySubmitted { tent_id, .. }
        | Event::ShiftCreated { tent_id, .. }
        | Event::ShiftDeleted { tent_id, .. }
        | Event::AssignmentAdded { tent_id, .. }
        | Event::AssignmentRemoved { tent_id, .. } => Some(*tent_id),
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            users: DashMap::new(),
            tents: DashMap::new(),
            join_codes: DashMap::new(),
            members: DashMap::new(),
            entity_to_tent: DashMap::new(),
            reserved_ids: DashSet::new(),
            wal_tx,
            commit_gate: RwLock::new(()),
            notify,
        };

        // We're the sole owner of every Arc during replay, so try_read/try_write
        // always succeed. Never block here: this may run inside an async context
        // (lazy tenant creation).
        for event in &events {
            engine.replay_event(event);
        }
        tracing::debug!(
            "replayed {} events: {} tents, {} users",
            events.len(),
            engine.tents.len(),
            engine.users.len()
        );

        Ok(engine)
    }

    fn replay_event(&self, event: &Event) {
        match event {
            Event::TentCreated { id, name, join_code, tent_type, created_by } => {
                let ts = TentState::new(*id, name.clone(), join_code.clone(), *tent_type, *created_by);
                self.tents.insert(*id, Arc::new(RwLock::new(ts)));
                self.join_codes.insert(join_code.clone(), *id);
                self.replay_profile(*created_by, event);
            }
            Event::ProfileUpserted { id, .. } => self.replay_profile(*id, event),
            Event::AvailabilitySubmitted { user_id, .. } => {
                if let Some(us) = self.get_user(user_id) {
                    let mut guard = us.try_write().expect("replay: uncontended write");
                    apply_to_user(&mut guard, event);
                }
            }
            other => {
                if let Some(tent_id) = event_tent_id(other)
                    && let Some(ts) = self.get_tent_state(&tent_id)
                {
                    let mut guard = ts.try_write().expect("replay: uncontended write");
                    apply_to_tent(&mut guard, other, &self.entity_to_tent);
                }
            }
        }
    }

    fn replay_profile(&self, user_id: Ulid, event: &Event) {
        let us = self.user_entry(user_id);
        let mut guard = us.try_write().expect("replay: uncontended write");
        let previous = guard.tent_id;
        apply_to_user(&mut guard, event);
        self.move_member(user_id, previous, guard.tent_id);
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Transaction("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Transaction("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Transaction(e.to_string()))
    }

    pub fn get_user(&self, id: &Ulid) -> Option<SharedUserState> {
        self.users.get(id).map(|e| e.value().clone())
    }

    pub fn get_tent_state(&self, id: &Ulid) -> Option<SharedTentState> {
        self.tents.get(id).map(|e| e.value().clone())
    }

    pub fn get_tent_for_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.entity_to_tent.get(entity_id).map(|e| *e.value())
    }

    /// Existing user state, or a fresh profile-less one.
    pub(super) fn user_entry(&self, id: Ulid) -> SharedUserState {
        self.users
            .entry(id)
            .or_insert_with(|| Arc::new(RwLock::new(UserState::new(id, None, None, Role::Member))))
            .clone()
    }

    pub(super) fn move_member(&self, user_id: Ulid, from: Option<Ulid>, to: Option<Ulid>) {
        if from == to {
            return;
        }
        if let Some(old) = from
            && let Some(mut list) = self.members.get_mut(&old)
        {
            list.retain(|u| *u != user_id);
        }
        if let Some(new) = to {
            self.members.entry(new).or_default().push(user_id);
        }
    }

    pub(super) fn member_ids(&self, tent_id: &Ulid) -> Vec<Ulid> {
        self.members
            .get(tent_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    /// WAL-append + apply + notify for a user-scoped event. Caller holds the
    /// user's write lock, so readers see either none or all of the event.
    pub(super) async fn persist_user(&self, us: &mut UserState, event: &Event) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.apply_user_committed(us, event);
        Ok(())
    }

    /// Apply + notify for a user-scoped event already in the WAL.
    pub(super) fn apply_user_committed(&self, us: &mut UserState, event: &Event) {
        let previous = us.tent_id;
        apply_to_user(us, event);
        self.move_member(us.id, previous, us.tent_id);
        if let Some(old) = previous
            && Some(old) != us.tent_id
        {
            self.notify.send(old, event);
        }
        if let Some(tent_id) = event_tent_id(event) {
            self.notify.send(tent_id, event);
        }
    }

    /// Claim a new entity id until the returned guard drops. Callers check the
    /// committed maps only after claiming.
    pub(super) fn reserve_id(&self, id: Ulid) -> Result<IdReservation<'_>, EngineError> {
        if !self.reserved_ids.insert(id) {
            return Err(EngineError::AlreadyExists(id));
        }
        Ok(IdReservation { ids: &self.reserved_ids, id })
    }

    /// WAL-append + apply + notify for a tent-scoped event.
    pub(super) async fn persist_tent(&self, ts: &mut TentState, event: &Event) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_tent(ts, event, &self.entity_to_tent);
        self.notify.send(ts.id, event);
        Ok(())
    }

    /// Lookup entity → tent, acquire the tent's write lock.
    pub(super) async fn resolve_entity_write(
        &self,
        entity_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<TentState>), EngineError> {
        let tent_id = self
            .get_tent_for_entity(entity_id)
            .ok_or(EngineError::NotFound(*entity_id))?;
        let ts = self
            .get_tent_state(&tent_id)
            .ok_or(EngineError::NotFound(tent_id))?;
        Ok((tent_id, ts.write_owned().await))
    }

    /// Compact the WAL to the minimal event set that recreates current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.commit_gate.write().await;
        let mut events = Vec::new();

        let tents: Vec<SharedTentState> = self.tents.iter().map(|e| e.value().clone()).collect();
        let mut tent_guards = Vec::with_capacity(tents.len());
        for ts in &tents {
            let guard = ts.read().await;
            events.push(Event::TentCreated {
                id: guard.id,
                name: guard.name.clone(),
                join_code: guard.join_code.clone(),
                tent_type: guard.tent_type,
                created_by: guard.created_by,
            });
            if guard.image_url.is_some() {
                events.push(Event::TentUpdated {
                    id: guard.id,
                    name: guard.name.clone(),
                    image_url: guard.image_url.clone(),
                });
            }
            tent_guards.push(guard);
        }

        let users: Vec<SharedUserState> = self.users.iter().map(|e| e.value().clone()).collect();
        for us in &users {
            let guard = us.read().await;
            events.push(Event::ProfileUpserted {
                id: guard.id,
                full_name: guard.full_name.clone(),
                tent_id: guard.tent_id,
                role: guard.role,
            });
            for interval in &guard.intervals {
                events.push(Event::AvailabilitySubmitted {
                    id: interval.id,
                    user_id: guard.id,
                    tent_id: interval.tent_id,
                    span: interval.span,
                    status: interval.status,
                    replaced: Vec::new(),
                });
            }
        }

        for guard in &tent_guards {
            for shift in &guard.shifts {
                events.push(Event::ShiftCreated {
                    id: shift.id,
                    tent_id: guard.id,
                    span: shift.span,
                    required_count: shift.required_count,
                    is_grace: shift.is_grace,
                });
                for a in &shift.assignments {
                    events.push(Event::AssignmentAdded {
                        id: a.id,
                        tent_id: guard.id,
                        shift_id: shift.id,
                        user_id: a.user_id,
                    });
                }
            }
        }
        drop(tent_guards);

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::Transaction("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Transaction("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Transaction(e.to_string()))?;
        tracing::info!("compacted WAL to {count} events");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
