use mongodb::{
    bson::doc,
    options::{FindOneAndUpdateOptions, ReturnDocument},
    ClientSession,
};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::mongodb::{Coll, Id};

/// A counter object used to implement auto-increment fields.
///
/// Each election owns one, keyed by the election's ID, which hands out the
/// creation sequence numbers of its candidates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Counter {
    #[serde(rename = "_id")]
    pub id: Id,
    pub next: u64,
}

impl Counter {
    /// Atomically retrieve the next value of the counter with the given ID,
    /// creating the counter (starting from zero) if it does not exist yet.
    pub async fn next(
        counters: &Coll<Counter>,
        id: Id,
        session: &mut ClientSession,
    ) -> Result<u64> {
        let update = doc! {
            "$inc": { "next": 1_i64 }
        };
        let options = FindOneAndUpdateOptions::builder()
            .upsert(true)
            .return_document(ReturnDocument::After)
            .build();
        let counter = counters
            .find_one_and_update_with_session(id.as_doc(), update, options, session)
            .await?;
        // With `upsert` and `ReturnDocument::After` a document always comes back.
        Ok(counter.map(|c| c.next.saturating_sub(1)).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use mongodb::{Client, Database};

    use super::*;

    #[backend_test(mongo)]
    async fn counter_starts_at_zero_and_increments(db: Database) {
        // Mongo tests only run with a database URI configured.
        let db_uri = std::env::var("ROCKET_DB_URI").unwrap();
        let client = Client::with_uri_str(&db_uri).await.unwrap();
        let counters = Coll::<Counter>::from_db(&db);
        let id = Id::new();
        let mut session = client.start_session(None).await.unwrap();

        assert_eq!(Counter::next(&counters, id, &mut session).await.unwrap(), 0);
        assert_eq!(Counter::next(&counters, id, &mut session).await.unwrap(), 1);

        let stored = counters.find_one(id.as_doc(), None).await.unwrap().unwrap();
        assert_eq!(stored.next, 2);
    }
}
