use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use log::{error, info};
use mongodb::Client as MongoClient;
use rocket::{
    fairing::{Fairing, Info, Kind},
    Build, Rocket,
};
use serde::Deserialize;

use crate::{
    integrity::IntegrityKeys,
    ledger::{MemoryStore, MongoStore, RetryPolicy, VoteLedger, VoteStore},
    tally::{ResultCache, TallyEngine},
};

/// Which storage backend holds the ledger.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// MongoDB replica set; required for production.
    Mongodb,
    /// In-process store. Everything is lost on shutdown.
    Memory,
}

impl Default for StoreKind {
    fn default() -> Self {
        Self::Mongodb
    }
}

/// Application configuration, derived from `Rocket.toml` and `ROCKET_*`
/// environment variables. This struct becomes managed state and can be
/// inspected by any endpoint.
#[derive(Deserialize)]
pub struct Config {
    // non-secrets
    #[serde(default)]
    store: StoreKind,
    #[serde(default = "default_tally_min_interval")]
    tally_min_interval: u32,
    #[serde(default = "default_ledger_max_attempts")]
    ledger_max_attempts: u32,
    #[serde(default = "default_ledger_backoff_ms")]
    ledger_backoff_ms: u32,
    // secrets
    jwt_secret: String,
    hmac_secret: String,
}

fn default_tally_min_interval() -> u32 {
    5
}

fn default_ledger_max_attempts() -> u32 {
    5
}

fn default_ledger_backoff_ms() -> u32 {
    20
}

impl Config {
    /// The storage backend to use.
    pub fn store(&self) -> StoreKind {
        self.store
    }

    /// Minimum age of a tally snapshot before an invalidation causes it to be
    /// recomputed. Zero recomputes on every read after an invalidation.
    pub fn tally_min_interval(&self) -> Duration {
        Duration::seconds(self.tally_min_interval.into())
    }

    /// Retry policy for transient failures on the vote write path.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.ledger_max_attempts.max(1),
            base_delay: StdDuration::from_millis(self.ledger_backoff_ms.into()),
        }
    }

    /// Shared secret used to verify identity provider JWTs.
    pub fn jwt_secret(&self) -> &[u8] {
        self.jwt_secret.as_bytes()
    }

    /// Root secret from which all ballot and receipt keys are derived.
    pub fn hmac_secret(&self) -> &[u8] {
        self.hmac_secret.as_bytes()
    }
}

/// A fairing that loads the application config and puts it in managed state.
pub struct ConfigFairing;

#[rocket::async_trait]
impl Fairing for ConfigFairing {
    fn info(&self) -> Info {
        Info {
            name: "Config",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        let config = match rocket.figment().extract::<Config>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load application config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };
        if config.hmac_secret.is_empty() {
            error!("`hmac_secret` must not be empty");
            return Err(rocket);
        }

        rocket = rocket.manage(config);
        Ok(rocket)
    }
}

/// Configuration for the database.
#[derive(Deserialize)]
struct DbConfig {
    // secrets
    db_uri: String,
}

/// A fairing that constructs the configured [`VoteStore`] and places it into
/// managed state. For MongoDB this also connects, ensures the indexes exist,
/// and manages the `Client` and `Database`.
/// Must be attached after [`ConfigFairing`].
pub struct StoreFairing;

#[rocket::async_trait]
impl Fairing for StoreFairing {
    fn info(&self) -> Info {
        Info {
            name: "Vote store",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        let kind = match rocket.state::<Config>() {
            Some(config) => config.store(),
            None => {
                error!("Config was not available when building the vote store");
                return Err(rocket);
            }
        };

        let store: Arc<dyn VoteStore> = match kind {
            StoreKind::Memory => {
                info!("Using the in-memory vote store; ballots will not survive a restart");
                Arc::new(MemoryStore::new())
            }
            StoreKind::Mongodb => {
                let config = match rocket.figment().extract::<DbConfig>() {
                    Ok(config) => config,
                    Err(e) => {
                        error!("Failed to load database config");
                        rocket::config::pretty_print_error(e);
                        return Err(rocket);
                    }
                };
                info!("Loaded database config, connecting...");
                let client = match MongoClient::with_uri_str(config.db_uri).await {
                    Ok(client) => client,
                    Err(e) => {
                        error!("Failed to connect to database: {e}");
                        return Err(rocket);
                    }
                };
                let db = client.database(&get_database_name());
                let store = match MongoStore::connect(client.clone(), db.clone()).await {
                    Ok(store) => store,
                    Err(e) => {
                        error!("Failed to prepare database: {e}");
                        return Err(rocket);
                    }
                };
                info!("...database connection online!");
                rocket = rocket.manage(client).manage(db);
                Arc::new(store)
            }
        };

        rocket = rocket.manage(store);
        Ok(rocket)
    }
}

/// A fairing that assembles the vote ledger and the result cache on top of
/// the managed store, and places both into managed state.
/// Must be attached after [`ConfigFairing`] and after the store is managed.
pub struct LedgerFairing;

#[rocket::async_trait]
impl Fairing for LedgerFairing {
    fn info(&self) -> Info {
        Info {
            name: "Vote ledger",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        let (config, store) = match (
            rocket.state::<Config>(),
            rocket.state::<Arc<dyn VoteStore>>(),
        ) {
            (Some(config), Some(store)) => (config, store.clone()),
            _ => {
                error!("Config and vote store must be managed before the ledger");
                return Err(rocket);
            }
        };

        let keys = IntegrityKeys::derive(config.hmac_secret());
        let cache = ResultCache::new(TallyEngine::new(store.clone()), config.tally_min_interval());
        let ledger = VoteLedger::new(store, keys, config.retry_policy(), cache.clone());
        info!(
            "Vote ledger ready (max {} attempts per vote, tally staleness bound {}s)",
            config.retry_policy().max_attempts,
            config.tally_min_interval().num_seconds()
        );

        rocket = rocket.manage(ledger).manage(cache);
        Ok(rocket)
    }
}

/// Get the name of the database to use (production version).
#[cfg(not(test))]
pub(crate) fn get_database_name() -> String {
    "evote".to_string()
}

/// Get the name of the database to use (test version).
/// Use a random name to avoid collisions between tests.
#[cfg(test)]
pub(crate) fn get_database_name() -> String {
    let random: u32 = rand::random();
    let db = format!("test{random}");
    info!("Using database {db}");
    db
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_missing_non_secrets() {
        let figment = rocket::figment::Figment::new()
            .merge(("jwt_secret", "jwt"))
            .merge(("hmac_secret", "hmac"));
        let config: Config = figment.extract().unwrap();

        assert_eq!(config.store(), StoreKind::Mongodb);
        assert_eq!(config.tally_min_interval(), Duration::seconds(5));
        assert_eq!(config.retry_policy().max_attempts, 5);
        assert_eq!(config.retry_policy().base_delay, StdDuration::from_millis(20));
    }

    #[test]
    fn secrets_are_required() {
        let figment = rocket::figment::Figment::new().merge(("store", "memory"));
        assert!(figment.extract::<Config>().is_err());
    }

    #[test]
    fn zero_attempts_still_tries_once() {
        let figment = crate::test_figment().merge(("ledger_max_attempts", 0));
        let config: Config = figment.extract().unwrap();
        assert_eq!(config.retry_policy().max_attempts, 1);
        assert_eq!(config.store(), StoreKind::Memory);
    }
}
