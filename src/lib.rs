#[macro_use]
extern crate rocket;
#[macro_use]
extern crate log;

#[cfg(test)]
#[macro_use]
extern crate backend_test;

use rocket::{figment::Figment, Build, Rocket};

use crate::config::{ConfigFairing, StoreFairing};
use crate::logging::LoggerFairing;
use crate::store::Store;

pub mod api;
pub mod ballot_box;
pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod registry;
pub mod store;
pub mod tally;

/// Build the server from `Rocket.toml` and `ROCKET_*` variables, connecting
/// to whichever store they name.
pub fn build() -> Rocket<Build> {
    assemble(rocket::build()).attach(StoreFairing)
}

/// Build the server around an existing store.
pub fn rocket_for_store(figment: Figment, store: Store) -> Rocket<Build> {
    assemble(rocket::custom(figment)).manage(store)
}

fn assemble(rocket: Rocket<Build>) -> Rocket<Build> {
    rocket
        .mount("/", api::routes())
        .register("/", api::catchers())
        .attach(ConfigFairing)
        .attach(LoggerFairing)
}

/// Figment for test servers: the usual sources plus a fixed JWT secret.
#[cfg(test)]
pub(crate) fn test_figment() -> Figment {
    rocket::Config::figment().merge(("jwt_secret", config::examples::TEST_JWT_SECRET))
}

/// A local client on a test server over the given store.
#[cfg(test)]
pub(crate) async fn test_client(store: Store) -> rocket::local::asynchronous::Client {
    rocket::local::asynchronous::Client::tracked(rocket_for_store(test_figment(), store))
        .await
        .unwrap()
}

/// A MongoDB store on a fresh, randomly named database, or `None` when no
/// database is configured through `ROCKET_DB_URI`.
#[cfg(test)]
pub(crate) async fn test_mongo_store() -> Option<(store::MongoStore, mongodb::Database)> {
    let db_uri = std::env::var("ROCKET_DB_URI").ok()?;
    let client = mongodb::Client::with_uri_str(&db_uri).await.unwrap();
    let random: u32 = rand::random();
    let db = client.database(&format!("test{random}"));
    info!("Using database {}", db.name());
    model::mongodb::ensure_indexes_exist(&db).await.unwrap();
    Some((store::MongoStore::new(client, &db, 5), db))
}

/// An auth cookie for the voter with the given ID.
#[cfg(test)]
pub(crate) fn voter_cookie(id: model::mongodb::Id) -> rocket::http::Cookie<'static> {
    use model::api::auth::{AuthToken, Voter};
    AuthToken::<Voter>::new(id)
        .into_cookie(&config::Config::example())
        .unwrap()
}

/// An auth cookie for the admin with the given ID.
#[cfg(test)]
pub(crate) fn admin_cookie(id: model::mongodb::Id) -> rocket::http::Cookie<'static> {
    use model::api::auth::{Admin, AuthToken};
    AuthToken::<Admin>::new(id)
        .into_cookie(&config::Config::example())
        .unwrap()
}
