//! Log store (C3): diagnostic-only, append-only agent logs in MongoDB. Not
//! load-bearing for control flow — `task_id` is a plain field with no
//! referential constraint back to the relational store (`spec.md` §9).

use crate::error::Result;
use crate::models::LogEntry;
use mongodb::bson::doc;
use mongodb::options::IndexOptions;
use mongodb::{Client, Collection, IndexModel};

pub struct MongoLogStore {
    collection: Collection<LogEntry>,
}

impl MongoLogStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::with_uri_str(url).await?;
        let db = client.database("taskhub");
        let collection = db.collection::<LogEntry>("agent_logs");

        collection
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "agent_id": 1, "created_at": 1 })
                    .build(),
            )
            .await?;
        collection
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "task_id": 1 })
                    .options(IndexOptions::builder().sparse(true).build())
                    .build(),
            )
            .await?;

        Ok(Self { collection })
    }

    pub async fn append_log(&self, entry: LogEntry) -> Result<()> {
        self.collection.insert_one(entry).await?;
        Ok(())
    }
}
