#[macro_use]
extern crate rocket;

#[cfg(test)]
#[macro_use]
extern crate backend_test;

use rocket::{figment::Figment, Build, Rocket};

pub mod api;
pub mod config;
pub mod error;
pub mod integrity;
pub mod ledger;
pub mod logging;
pub mod model;
pub mod scheduled_task;
pub mod tally;

pub use config::Config;

use config::{ConfigFairing, LedgerFairing, StoreFairing};
use ledger::SharedStore;
use logging::LoggerFairing;
use tally::TallyPublisherFairing;

/// Build the server, configured from `Rocket.toml` and `ROCKET_*` environment variables.
pub fn build() -> Rocket<Build> {
    rocket::build()
        .mount("/", api::routes())
        .register("/", api::catchers())
        .attach(LoggerFairing)
        .attach(ConfigFairing)
        .attach(StoreFairing)
        .attach(LedgerFairing)
        .attach(TallyPublisherFairing)
}

/// Build the server around an existing store instead of configuring one.
/// The figment must still provide the application [`Config`].
pub fn rocket_for_store(figment: Figment, store: SharedStore) -> Rocket<Build> {
    rocket::custom(figment)
        .mount("/", api::routes())
        .register("/", api::catchers())
        .manage(store)
        .attach(LoggerFairing)
        .attach(ConfigFairing)
        .attach(LedgerFairing)
        .attach(TallyPublisherFairing)
}

/// Figment used by the test suite: debug defaults plus fixed secrets.
#[cfg(test)]
pub(crate) fn test_figment() -> Figment {
    rocket::Config::figment()
        .merge(("store", "memory"))
        .merge(("jwt_secret", "test-jwt-secret"))
        .merge(("hmac_secret", "test-hmac-secret"))
        .merge(("tally_min_interval", 0))
        .merge(("ledger_max_attempts", 3))
        .merge(("ledger_backoff_ms", 1))
        .merge(("log_level", "off"))
}
