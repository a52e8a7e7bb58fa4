use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use chrono::{Duration, Utc};
use log::debug;
use rocket::tokio::sync::Mutex as AsyncMutex;

use crate::error::{Error, Result, VoteError};
use crate::model::{api::TallySnapshot, common::ElectionStatus, mongodb::Id};

use super::TallyEngine;

/// Cached snapshot of one election.
#[derive(Default)]
struct Slot {
    /// Set by every ledger change since the snapshot was computed.
    dirty: AtomicBool,
    /// Held while computing, so concurrent readers share one computation.
    latest: AsyncMutex<Option<(TallySnapshot, Instant)>>,
}

/// Serves tally snapshots, recomputing them lazily.
///
/// A snapshot is recomputed on read when the ledger has changed since it was
/// taken and it is at least `min_interval` old. Readers therefore see results
/// at most `min_interval` behind the ledger. The election status does not
/// come from the ledger and is always current.
#[derive(Clone)]
pub struct ResultCache {
    engine: TallyEngine,
    min_interval: std::time::Duration,
    slots: Arc<Mutex<HashMap<Id, Arc<Slot>>>>,
}

impl ResultCache {
    pub fn new(engine: TallyEngine, min_interval: Duration) -> Self {
        Self {
            engine,
            min_interval: min_interval.to_std().unwrap_or_default(),
            slots: Default::default(),
        }
    }

    fn slot(&self, election_id: Id) -> Arc<Slot> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.entry(election_id).or_default().clone()
    }

    pub async fn get_snapshot(&self, election_id: Id) -> Result<TallySnapshot> {
        let slot = self.slot(election_id);
        let mut latest = slot.latest.lock().await;
        if let Some((snapshot, taken)) = latest.as_ref() {
            if !slot.dirty.load(Ordering::Acquire) || taken.elapsed() < self.min_interval {
                let mut snapshot = snapshot.clone();
                let election = &mut snapshot.election;
                election.status =
                    ElectionStatus::at(election.start_time, election.end_time, Utc::now());
                return Ok(snapshot);
            }
        }

        // Cleared before reading, so a vote landing mid-computation dirties
        // the new snapshot.
        slot.dirty.store(false, Ordering::Release);
        match self.engine.compute_tally(election_id).await {
            Ok(snapshot) => {
                debug!(
                    "Recomputed tally for election {election_id}: {} ballots",
                    snapshot.total_ballots
                );
                *latest = Some((snapshot.clone(), Instant::now()));
                Ok(snapshot)
            }
            Err(e) => {
                slot.dirty.store(true, Ordering::Release);
                drop(latest);
                if matches!(e, Error::Vote(VoteError::InvalidElection)) {
                    self.forget(election_id);
                }
                Err(e)
            }
        }
    }

    /// Mark the election's snapshot stale. Cheap; never computes.
    pub fn invalidate(&self, election_id: Id) {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = slots.get(&election_id) {
            slot.dirty.store(true, Ordering::Release);
        }
    }

    /// Mark every cached snapshot stale.
    pub fn invalidate_all(&self) {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        for slot in slots.values() {
            slot.dirty.store(true, Ordering::Release);
        }
    }

    /// Recompute now, regardless of age.
    pub async fn refresh(&self, election_id: Id) -> Result<TallySnapshot> {
        self.slot(election_id).dirty.store(true, Ordering::Release);
        let min_interval = std::time::Duration::ZERO;
        let cache = Self {
            min_interval,
            ..self.clone()
        };
        cache.get_snapshot(election_id).await
    }

    fn forget(&self, election_id: Id) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.remove(&election_id);
    }
}
