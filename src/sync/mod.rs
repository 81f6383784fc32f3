//! Synchronisation state machine for one inventory backend instance.
//!
//! [`SyncCoordinator`] owns the local copy of inventory state, the journal of
//! staged mutations, and the [`SyncState`] bookkeeping. It performs no I/O:
//! the owning instance asks it for a ticket, talks to the driver, and hands
//! the driver's answer back. Nothing is cleared until the driver has
//! confirmed it, so a failed or cancelled round trip leaves the coordinator
//! exactly where it was.
//!
//! ```text
//! Uninitialized --load/init--> Clean <--sync/write-- Dirty
//!                                |                    ^
//!                                +---local mutation---+
//! any --close--> Closed
//! ```

use std::time::SystemTime;

use tracing::{debug, warn};

use crate::backend::{BackendError, Resource};
use crate::model::{BatchId, InventorySnapshot, Mutation, SyncState, VersionToken};

/// Externally visible phase of an instance.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SyncPhase {
    /// Nothing has been loaded yet.
    Uninitialized,
    /// The local model matches the last confirmed backend version.
    Clean,
    /// The local model holds changes the backend has not confirmed.
    Dirty,
    /// The instance was shut down.
    Closed,
}

/// Work handed to the driver for a `sync_state` round trip.
#[derive(Clone, Debug)]
pub struct SyncTicket {
    base: VersionToken,
    batch: BatchId,
    pending: Vec<Mutation>,
    generation: u64,
}

impl SyncTicket {
    /// Version the local model was built from.
    #[must_use]
    pub const fn base(&self) -> &VersionToken {
        &self.base
    }

    /// Identifier of the batch; repeated on every retry of the same batch.
    #[must_use]
    pub const fn batch(&self) -> &BatchId {
        &self.batch
    }

    /// Staged mutations to push, oldest first.
    #[must_use]
    pub fn pending(&self) -> &[Mutation] {
        &self.pending
    }
}

/// Batch handed out by a sync that has not been confirmed yet: its id and
/// how many journal entries, from the front, it covers.
#[derive(Clone, Debug)]
struct UnconfirmedBatch {
    id: BatchId,
    len: usize,
}

/// Work handed to the driver for a `write_data` round trip.
#[derive(Clone, Debug)]
pub struct WriteTicket {
    snapshot: InventorySnapshot,
    pushed: usize,
    generation: u64,
}

impl WriteTicket {
    /// Full local model to push.
    #[must_use]
    pub const fn snapshot(&self) -> &InventorySnapshot {
        &self.snapshot
    }
}

/// Local model plus the load, sync, and write state machine around it.
#[derive(Debug)]
pub struct SyncCoordinator {
    name: String,
    closed: bool,
    state: Option<SyncState>,
    cache: InventorySnapshot,
    pending: Vec<Mutation>,
    unconfirmed: Option<UnconfirmedBatch>,
    generation: u64,
}

impl SyncCoordinator {
    /// Creates an uninitialised coordinator for the named instance.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            closed: false,
            state: None,
            cache: InventorySnapshot::default(),
            pending: Vec::new(),
            unconfirmed: None,
            generation: 0,
        }
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> SyncPhase {
        if self.closed {
            return SyncPhase::Closed;
        }
        match &self.state {
            None => SyncPhase::Uninitialized,
            Some(state) if state.dirty => SyncPhase::Dirty,
            Some(_) => SyncPhase::Clean,
        }
    }

    /// Bookkeeping from the last load, sync, or write.
    #[must_use]
    pub const fn state(&self) -> Option<&SyncState> {
        self.state.as_ref()
    }

    /// Local model, once loaded.
    #[must_use]
    pub const fn cache(&self) -> Option<&InventorySnapshot> {
        match self.state {
            Some(_) => Some(&self.cache),
            None => None,
        }
    }

    /// Staged mutations not yet confirmed by the backend.
    #[must_use]
    pub fn pending(&self) -> &[Mutation] {
        &self.pending
    }

    /// Fails once the instance is closed.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Closed`] after [`SyncCoordinator::close`].
    pub fn ensure_open(&self) -> Result<(), BackendError> {
        if self.closed {
            return Err(BackendError::Closed {
                name: self.name.clone(),
            });
        }
        Ok(())
    }

    /// Checks whether the local model may be replaced.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Conflict`] when the model is dirty and
    /// `force` is not set, or [`BackendError::Closed`] after shutdown.
    pub fn check_discard(&self, force: bool) -> Result<(), BackendError> {
        self.ensure_open()?;
        if self.phase() != SyncPhase::Dirty || force {
            return Ok(());
        }
        let message = if self.pending.is_empty() {
            format!(
                "local model no longer matches backend version {}; sync first or reload with force to refresh it",
                self.cache.version
            )
        } else {
            format!(
                "local model has {} unsynchronised change(s); sync first or reload with force to discard them",
                self.pending.len()
            )
        };
        Err(BackendError::conflict(Resource::Instance(self.name.clone()), message))
    }

    /// Replaces the local model with a freshly loaded snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Closed`] if the instance closed meanwhile.
    pub fn loaded(
        &mut self,
        snapshot: InventorySnapshot,
        now: SystemTime,
    ) -> Result<SyncState, BackendError> {
        self.ensure_open()?;
        if !self.pending.is_empty() {
            debug!(
                instance = %self.name,
                discarded = self.pending.len(),
                "discarding staged changes on reload"
            );
        }
        self.pending.clear();
        self.unconfirmed = None;
        self.generation += 1;
        let state = SyncState {
            last_loaded_at: now,
            dirty: false,
            version: snapshot.version.clone(),
        };
        self.cache = snapshot;
        self.state = Some(state.clone());
        debug!(instance = %self.name, version = %state.version, "inventory loaded");
        Ok(state)
    }

    /// Applies a mutation to the local model only and journals it.
    ///
    /// # Errors
    ///
    /// Returns the kind reported by [`InventorySnapshot::apply`] when the
    /// mutation does not fit the local model, [`BackendError::Conflict`]
    /// when nothing is loaded, or [`BackendError::Closed`] after shutdown.
    pub fn stage(&mut self, mutation: Mutation) -> Result<(), BackendError> {
        self.require_loaded()?;
        self.cache
            .apply(&mutation)
            .map_err(|err| err.with_context(format!("stage {}", mutation.describe())))?;
        self.pending.push(mutation);
        self.mark_dirty();
        Ok(())
    }

    /// Folds a change the backend already confirmed into the local model.
    /// The cached version token is stale afterwards, so the model turns
    /// dirty until the next sync. Ignored before the first load.
    pub fn record(&mut self, change: impl FnOnce(&mut InventorySnapshot)) {
        if self.closed || self.state.is_none() {
            return;
        }
        change(&mut self.cache);
        self.mark_dirty();
    }

    /// Starts a sync round trip.
    ///
    /// While an earlier batch is unconfirmed the ticket repeats it, same id
    /// and same mutations, so a backend that committed it before the caller
    /// gave up can recognise the retry. Changes staged since then wait for
    /// the following sync.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Conflict`] when nothing is loaded, or
    /// [`BackendError::Closed`] after shutdown.
    pub fn begin_sync(&mut self) -> Result<SyncTicket, BackendError> {
        self.require_loaded()?;
        let batch = match self.unconfirmed.take() {
            Some(batch) if batch.len > 0 && batch.len <= self.pending.len() => {
                debug!(instance = %self.name, batch = %batch.id, "retrying unconfirmed batch");
                batch
            }
            _ => UnconfirmedBatch {
                id: BatchId::fresh(),
                len: self.pending.len(),
            },
        };
        let ticket = SyncTicket {
            base: self.cache.version.clone(),
            batch: batch.id.clone(),
            pending: self.pending.iter().take(batch.len).cloned().collect(),
            generation: self.generation,
        };
        self.unconfirmed = Some(batch);
        Ok(ticket)
    }

    /// Finishes a sync round trip with the driver's resulting snapshot.
    ///
    /// Mutations staged after the ticket was issued are replayed on top of
    /// the new snapshot and keep the model dirty.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Closed`] if the instance closed meanwhile.
    pub fn complete_sync(
        &mut self,
        ticket: &SyncTicket,
        snapshot: InventorySnapshot,
        now: SystemTime,
    ) -> Result<SyncState, BackendError> {
        self.require_loaded()?;
        let pushed = ticket.pending.len().min(self.pending.len());
        self.pending.drain(..pushed);
        self.unconfirmed = None;
        self.cache = snapshot;
        for mutation in &self.pending {
            if let Err(err) = self.cache.apply(mutation) {
                warn!(
                    instance = %self.name,
                    mutation = %mutation.describe(),
                    error = %err,
                    "staged change no longer applies to backend state"
                );
            }
        }
        let dirty = !self.pending.is_empty() || self.generation != ticket.generation;
        let state = SyncState {
            last_loaded_at: now,
            dirty,
            version: self.cache.version.clone(),
        };
        self.state = Some(state.clone());
        debug!(
            instance = %self.name,
            pushed,
            version = %state.version,
            dirty,
            "inventory synchronised"
        );
        Ok(state)
    }

    /// Starts a full write round trip.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Conflict`] when nothing is loaded, or
    /// [`BackendError::Closed`] after shutdown.
    pub fn begin_write(&self) -> Result<WriteTicket, BackendError> {
        self.require_loaded()?;
        Ok(WriteTicket {
            snapshot: self.cache.clone(),
            pushed: self.pending.len(),
            generation: self.generation,
        })
    }

    /// Finishes a write round trip with the version the backend issued.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Closed`] if the instance closed meanwhile.
    pub fn complete_write(
        &mut self,
        ticket: &WriteTicket,
        version: VersionToken,
    ) -> Result<SyncState, BackendError> {
        self.require_loaded()?;
        let pushed = ticket.pushed.min(self.pending.len());
        self.pending.drain(..pushed);
        self.unconfirmed = None;
        self.cache.version = version.clone();
        let dirty = !self.pending.is_empty() || self.generation != ticket.generation;
        let last_loaded_at = self
            .state
            .as_ref()
            .map_or_else(SystemTime::now, |state| state.last_loaded_at);
        let state = SyncState {
            last_loaded_at,
            dirty,
            version,
        };
        self.state = Some(state.clone());
        debug!(instance = %self.name, version = %state.version, dirty, "inventory written");
        Ok(state)
    }

    /// Shuts the coordinator down, discarding the model and its state.
    pub fn close(&mut self) {
        if !self.pending.is_empty() {
            warn!(
                instance = %self.name,
                discarded = self.pending.len(),
                "closing with unsynchronised changes"
            );
        }
        self.closed = true;
        self.state = None;
        self.cache = InventorySnapshot::default();
        self.pending.clear();
        self.unconfirmed = None;
    }

    fn require_loaded(&self) -> Result<(), BackendError> {
        self.ensure_open()?;
        if self.state.is_none() {
            return Err(BackendError::conflict(
                Resource::Instance(self.name.clone()),
                "no inventory loaded; call load_data or init_data first",
            ));
        }
        Ok(())
    }

    fn mark_dirty(&mut self) {
        self.generation += 1;
        if let Some(state) = self.state.as_mut() {
            state.dirty = true;
        }
    }
}
