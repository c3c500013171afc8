use chrono::Duration;
use mongodb::Client as MongoClient;
use rocket::{
    fairing::{Fairing, Info, Kind},
    Build, Rocket,
};
use serde::Deserialize;

use crate::model::mongodb::ensure_indexes_exist;
use crate::store::{MemoryStore, MongoStore, Store};

fn default_auth_ttl() -> u32 {
    3600
}

/// Application configuration, derived from `Rocket.toml` and `ROCKET_*`
/// environment variables. This struct becomes managed state and can be
/// inspected by any endpoint.
#[derive(Deserialize)]
pub struct Config {
    // non-secrets
    #[serde(default = "default_auth_ttl")]
    auth_ttl: u32,
    // secrets
    jwt_secret: String,
}

impl Config {
    /// Valid lifetime of auth token cookies minted by [`crate::model::api::auth::AuthToken::into_cookie`].
    pub fn auth_ttl(&self) -> Duration {
        Duration::seconds(self.auth_ttl.into())
    }

    /// Secret key used to sign and verify JWTs.
    pub fn jwt_secret(&self) -> &[u8] {
        self.jwt_secret.as_bytes()
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

        rocket = rocket.manage(config);
        Ok(rocket)
    }
}

/// Which [`crate::store::VoteStore`] backend to run against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Mongodb,
    Memory,
}

fn default_db_name() -> String {
    "ballotbox".to_string()
}

fn default_txn_attempts() -> u32 {
    5
}

/// Configuration for the vote store.
#[derive(Deserialize)]
struct StoreConfig {
    // non-secrets
    #[serde(default)]
    store: StoreKind,
    #[serde(default = "default_db_name")]
    db_name: String,
    #[serde(default = "default_txn_attempts")]
    txn_attempts: u32,
    // secrets
    db_uri: Option<String>,
}

/// A fairing that loads the store config, connects to the database if there
/// is one, performs any setup necessary, and places a [`Store`] into managed
/// state.
pub struct StoreFairing;

#[rocket::async_trait]
impl Fairing for StoreFairing {
    fn info(&self) -> Info {
        Info {
            name: "Vote store",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, rocket: Rocket<Build>) -> rocket::fairing::Result {
        let config = match rocket.figment().extract::<StoreConfig>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load store config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };

        if config.store == StoreKind::Memory {
            warn!("Using the in-memory vote store: nothing will survive a restart");
            return Ok(rocket.manage(Store::new(MemoryStore::new())));
        }

        let Some(db_uri) = config.db_uri else {
            error!("`db_uri` must be set to use the MongoDB vote store");
            return Err(rocket);
        };
        info!("Loaded database config, connecting...");
        let client = match MongoClient::with_uri_str(db_uri).await {
            Ok(client) => client,
            Err(e) => {
                error!("Failed to connect to database: {e}");
                return Err(rocket);
            }
        };
        let db = client.database(&config.db_name);

        if let Err(e) = ensure_indexes_exist(&db).await {
            error!("Failed to create database indexes: {e}");
            return Err(rocket);
        }
        info!("...database connection online!");

        let store = MongoStore::new(client, &db, config.txn_attempts);
        Ok(rocket.manage(Store::new(store)))
    }
}

/// Example data for tests.
#[cfg(test)]
pub(crate) mod examples {
    use super::*;

    /// Signing secret used by every test server.
    pub const TEST_JWT_SECRET: &str = "test-only jwt secret";

    impl Config {
        pub fn example() -> Self {
            Self::with_secret(TEST_JWT_SECRET)
        }

        pub fn with_secret(secret: &str) -> Self {
            Self {
                auth_ttl: default_auth_ttl(),
                jwt_secret: secret.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use rocket::figment::Figment;

    use super::*;

    #[test]
    fn store_config_defaults() {
        let config: StoreConfig = Figment::new().extract().unwrap();
        assert_eq!(config.store, StoreKind::Mongodb);
        assert_eq!(config.db_name, "ballotbox");
        assert_eq!(config.txn_attempts, 5);
        assert!(config.db_uri.is_none());

        let config: StoreConfig = Figment::new()
            .merge(("store", "memory"))
            .extract()
            .unwrap();
        assert_eq!(config.store, StoreKind::Memory);
    }

    #[test]
    fn config_requires_secret() {
        assert!(Figment::new().extract::<Config>().is_err());
        let config: Config = Figment::new()
            .merge(("jwt_secret", "shh"))
            .extract()
            .unwrap();
        assert_eq!(config.jwt_secret(), b"shh");
        assert_eq!(config.auth_ttl(), Duration::hours(1));
    }
}
