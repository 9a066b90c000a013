//! The store capability the client is built on, and its MongoDB implementation.

use async_trait::async_trait;
use bson::{doc, Bson, Document};
use futures::stream::{BoxStream, StreamExt};
use mongodb::{Client, Collection, Database};
use serde::Serialize;
use tracing::info;

use crate::config::{ConnectOptions, Target};
use crate::error::{Error, Result};

/// Lazy sequence of documents returned by a read.
pub type DocumentCursor = BoxStream<'static, Result<Document>>;

/// Outcome of an update. `raw` is rebuilt from the counts in the shape of
/// the server's reply (`n`, `nModified`, `ok`, `updatedExisting`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateOutcome {
  pub matched_count: u64,
  pub modified_count: u64,
  pub upserted_id: Option<Bson>,
  pub raw: Document,
}

impl UpdateOutcome {
  pub fn new(matched_count: u64, modified_count: u64, upserted_id: Option<Bson>) -> Self {
    let n = matched_count + u64::from(upserted_id.is_some());
    let raw = doc! {
      "n": n as i64,
      "nModified": modified_count as i64,
      "ok": 1.0,
      "updatedExisting": matched_count > 0,
    };
    Self {
      matched_count,
      modified_count,
      upserted_id,
      raw,
    }
  }
}

/// Outcome of a delete. `raw` is rebuilt from the count in the shape of
/// the server's reply (`n`, `ok`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeleteOutcome {
  pub deleted_count: u64,
  pub raw: Document,
}

impl DeleteOutcome {
  pub fn new(deleted_count: u64) -> Self {
    Self {
      deleted_count,
      raw: doc! { "n": deleted_count as i64, "ok": 1.0 },
    }
  }
}

/// Operations a document store must provide for one collection.
///
/// Every error returned here is a store fault; the client logs it and
/// reports a sentinel instead of propagating it.
#[async_trait]
pub trait DocumentStore: Send + Sync {
  /// No-op round trip proving the connection and credentials work.
  async fn ping(&self) -> Result<()>;

  async fn find(&self, filter: Document) -> Result<DocumentCursor>;

  async fn find_one(&self, filter: Document) -> Result<Option<Document>>;

  /// Insert a document, returning its `_id`.
  async fn insert_one(&self, document: Document) -> Result<Bson>;

  /// Apply an operator update to every match.
  async fn update_many(&self, filter: Document, update: Document) -> Result<UpdateOutcome>;

  async fn delete_many(&self, filter: Document) -> Result<DeleteOutcome>;
}

/// MongoDB-backed store for one collection.
#[derive(Clone)]
pub struct MongoStore {
  client: Client,
  collection: Collection<Document>,
}

impl MongoStore {
  /// Build the driver client. The driver connects lazily, so an unreachable
  /// server or bad credentials only surface on the first command.
  pub async fn connect(options: &ConnectOptions, target: &Target) -> Result<Self> {
    info!("Attempting connection to MongoDB server @ {}", options.endpoint());

    let client = Client::with_uri_str(options.uri(target)).await?;
    let database: Database = client.database(&target.database);
    let collection = database.collection::<Document>(&target.collection);

    Ok(Self { client, collection })
  }
}

#[async_trait]
impl DocumentStore for MongoStore {
  async fn ping(&self) -> Result<()> {
    self
      .client
      .database("admin")
      .run_command(doc! { "ping": 1 })
      .await?;
    Ok(())
  }

  async fn find(&self, filter: Document) -> Result<DocumentCursor> {
    let cursor = self.collection.find(filter).await?;
    Ok(cursor.map(|doc| doc.map_err(Error::from)).boxed())
  }

  async fn find_one(&self, filter: Document) -> Result<Option<Document>> {
    Ok(self.collection.find_one(filter).await?)
  }

  async fn insert_one(&self, document: Document) -> Result<Bson> {
    let result = self.collection.insert_one(document).await?;
    Ok(result.inserted_id)
  }

  async fn update_many(&self, filter: Document, update: Document) -> Result<UpdateOutcome> {
    let result = self.collection.update_many(filter, update).await?;
    Ok(UpdateOutcome::new(
      result.matched_count,
      result.modified_count,
      result.upserted_id,
    ))
  }

  async fn delete_many(&self, filter: Document) -> Result<DeleteOutcome> {
    let result = self.collection.delete_many(filter).await?;
    Ok(DeleteOutcome::new(result.deleted_count))
  }
}
