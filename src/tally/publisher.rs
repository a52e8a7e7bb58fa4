use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use log::{debug, error, info, warn};
use rocket::{
    fairing::{Fairing, Info, Kind},
    futures::future::{BoxFuture, FutureExt},
    http::Status,
    tokio::sync::Mutex,
    Build, Rocket,
};

use crate::error::{Error, Result};
use crate::ledger::VoteStore;
use crate::model::{api::TallySnapshot, db::Election, mongodb::Id};
use crate::scheduled_task::ScheduledTask;

use super::ResultCache;

/// Delay before a failed publication is attempted again.
const RETRY_INTERVAL_SECONDS: i64 = 60;

type TaskMap = HashMap<Id, ScheduledTask<Result<TallySnapshot>>>;

/// Scheduled jobs that compute each election's final results the moment it
/// closes, so the first reader after closing does not pay for the count.
pub struct TallyPublishers {
    tasks: Arc<Mutex<TaskMap>>,
    cache: ResultCache,
}

impl TallyPublishers {
    pub fn new(cache: ResultCache) -> Self {
        Self {
            tasks: Default::default(),
            cache,
        }
    }

    pub async fn has_publisher(&self, election_id: Id) -> bool {
        self.tasks.lock().await.contains_key(&election_id)
    }

    /// Schedule a publisher for every election that has not closed yet.
    pub async fn schedule_elections(&self, store: &dyn VoteStore) -> Result<()> {
        let now = Utc::now();
        for election in store.elections().await? {
            if election.end_time > now {
                self.schedule_election(&election).await;
            }
        }
        Ok(())
    }

    /// Schedule a publisher for the election's end time, replacing any
    /// existing one.
    pub async fn schedule_election(&self, election: &Election) {
        let publisher = Self::publisher(election.id, self.cache.clone(), self.tasks.clone());
        let mut tasks = self.tasks.lock().await;
        if let Some(task) = tasks.remove(&election.id) {
            if task.cancel().await {
                debug!("Publisher for election {} had already finished", election.id);
            }
        }
        tasks.insert(election.id, ScheduledTask::new(publisher, election.end_time));
    }

    /// Publish the election's results now, through its scheduled publisher
    /// if it has one.
    pub async fn publish_now(&self, election_id: Id) -> Result<TallySnapshot> {
        let task = self.tasks.lock().await.remove(&election_id);
        match task {
            Some(publisher) => {
                publisher.trigger_now();
                publisher.await.unwrap_or_else(|_| {
                    Err(Error::Status(
                        Status::InternalServerError,
                        format!("Publisher for election {election_id} was interrupted"),
                    ))
                })
            }
            None => publish(election_id, &self.cache).await,
        }
    }

    /// Boxed, as a failed publisher schedules a copy of itself.
    fn publisher(
        election_id: Id,
        cache: ResultCache,
        tasks: Arc<Mutex<TaskMap>>,
    ) -> BoxFuture<'static, Result<TallySnapshot>> {
        async move {
            let result = publish(election_id, &cache).await;
            match result {
                Ok(_) => {
                    tasks.lock().await.remove(&election_id);
                }
                Err(ref e) => {
                    error!("Publishing results for election {election_id} failed: {e}");
                    let retry = Self::publisher(election_id, cache, tasks.clone());
                    let retry_at = Utc::now() + Duration::seconds(RETRY_INTERVAL_SECONDS);
                    tasks
                        .lock()
                        .await
                        .insert(election_id, ScheduledTask::new(retry, retry_at));
                    warn!("Will retry in {RETRY_INTERVAL_SECONDS} seconds");
                }
            }
            result
        }
        .boxed()
    }
}

async fn publish(election_id: Id, cache: &ResultCache) -> Result<TallySnapshot> {
    let snapshot = cache.refresh(election_id).await?;
    match &snapshot.winner {
        Some(winner) => info!(
            "Published results for election {election_id}: {} ballots, won by {}",
            snapshot.total_ballots, winner.name
        ),
        None => info!("Published results for election {election_id}: no ballots cast"),
    }
    Ok(snapshot)
}

/// A fairing that schedules publishers for all open and upcoming elections
/// during ignition, and manages [`TallyPublishers`].
/// Must be attached after the ledger fairing, which manages the cache.
pub struct TallyPublisherFairing;

#[rocket::async_trait]
impl Fairing for TallyPublisherFairing {
    fn info(&self) -> Info {
        Info {
            name: "Tally publishers",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        let (cache, store) = match (
            rocket.state::<ResultCache>(),
            rocket.state::<Arc<dyn VoteStore>>(),
        ) {
            (Some(cache), Some(store)) => (cache.clone(), store.clone()),
            _ => {
                error!("Result cache and vote store must be managed before scheduling publishers");
                return Err(rocket);
            }
        };

        info!("Scheduling tally publishers...");
        let publishers = TallyPublishers::new(cache);
        if let Err(e) = publishers.schedule_elections(store.as_ref()).await {
            error!("Failed to schedule tally publishers: {e}");
            return Err(rocket);
        }
        info!("...tally publishers scheduled!");

        rocket = rocket.manage(publishers);
        Ok(rocket)
    }
}
