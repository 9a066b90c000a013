//! CRUD client bound to a single collection.

use bson::{doc, Document};
use tracing::{error, info, warn};

use crate::config::{ConnectOptions, Target};
use crate::error::{Error, Result};
use crate::filter::{combine_filters, contains_match_all, set_fields, to_json};
use crate::store::{DeleteOutcome, DocumentCursor, DocumentStore, MongoStore, UpdateOutcome};

/// CRUD operations against one `database.collection`.
///
/// The connection is attempted once, when the client is built. If it fails
/// the client stays disconnected for good and every operation returns
/// [`Error::ConnectionFailure`].
///
/// Misuse (no connection, an unguarded match-all delete, an insert that
/// cannot be read back) is returned as `Err`. Faults reported by the store
/// are logged and turned into `false` or `None`.
pub struct DocumentStoreClient<S = MongoStore> {
  target: Target,
  store: Option<S>,
}

impl DocumentStoreClient<MongoStore> {
  /// Connect to the local MongoDB server, authenticating against the
  /// target's database.
  pub async fn connect(
    target: &str,
    username: impl Into<String>,
    password: impl Into<String>,
  ) -> Self {
    let options = ConnectOptions::new().with_credentials(username, password);
    Self::connect_with_options(target, options).await
  }

  pub async fn connect_with_options(target: &str, options: ConnectOptions) -> Self {
    let target = Target::parse(target);
    if let Err(e) = target.validate() {
      error!("On CONNECT: {}", e);
      return Self::disconnected(target);
    }

    match MongoStore::connect(&options, &target).await {
      Ok(store) => Self::attach(target, store).await,
      Err(e) => {
        error!("On CONNECT: {}", e);
        Self::disconnected(target)
      }
    }
  }
}

impl<S: DocumentStore> DocumentStoreClient<S> {
  /// Bind to an already-built store, probing it with a ping.
  pub async fn with_store(target: &str, store: S) -> Self {
    let target = Target::parse(target);
    if let Err(e) = target.validate() {
      error!("On CONNECT: {}", e);
      return Self::disconnected(target);
    }
    Self::attach(target, store).await
  }

  async fn attach(target: Target, store: S) -> Self {
    match store.ping().await {
      Ok(()) => {
        info!("Connection successful! Using {}", target);
        Self {
          target,
          store: Some(store),
        }
      }
      Err(e) => {
        error!("On CONNECT: {}", e);
        Self::disconnected(target)
      }
    }
  }

  fn disconnected(target: Target) -> Self {
    Self {
      target,
      store: None,
    }
  }

  pub fn database(&self) -> &str {
    &self.target.database
  }

  pub fn collection(&self) -> &str {
    &self.target.collection
  }

  pub fn is_connected(&self) -> bool {
    self.store.is_some()
  }

  fn verify_connection(&self) -> Result<&S> {
    self.store.as_ref().ok_or_else(|| {
      Error::ConnectionFailure(
        "Cannot perform CRUD operation without an active connection to MongoDB server.".to_string(),
      )
    })
  }

  /// Insert a document and read it back by its `_id`.
  ///
  /// Returns `Ok(false)` for an empty document (nothing is sent) or when the
  /// store reports a fault, and [`Error::WriteError`] when the insert was
  /// acknowledged but the document cannot be found afterwards.
  pub async fn create(&self, document: &Document) -> Result<bool> {
    if document.is_empty() {
      warn!("Nothing to save, because document is empty.");
      return Ok(false);
    }

    let store = self.verify_connection()?;
    info!("Performing insert: {}", to_json(document));

    let Some(id) = swallow("CREATE", store.insert_one(document.clone()).await) else {
      return Ok(false);
    };
    let Some(found) = swallow("CREATE", store.find_one(doc! { "_id": id.clone() }).await) else {
      return Ok(false);
    };
    if found.is_none() {
      return Err(Error::WriteError(format!(
        "Document was not successfully verified in database ({} not found).",
        id
      )));
    }

    info!("Data inserted successfully with ObjectID {}", id);
    Ok(true)
  }

  /// Find documents matching any of `queries`.
  ///
  /// The cursor is handed back unread. `Ok(None)` means the store rejected
  /// the query.
  pub async fn read(&self, queries: &[Document]) -> Result<Option<DocumentCursor>> {
    let store = self.verify_connection()?;
    let search = combine_filters(queries);
    info!("Performing query: {}", to_json(&search));

    Ok(swallow("READ", store.find(search).await))
  }

  /// Merge `update` into every document matching `filter`.
  ///
  /// Fields not named in `update` are left alone. An empty `update` is a
  /// no-op returning `Ok(None)` without contacting the store.
  pub async fn update(&self, filter: &Document, update: &Document) -> Result<Option<UpdateOutcome>> {
    if update.is_empty() {
      warn!("Nothing to update, because update document is empty.");
      return Ok(None);
    }

    let store = self.verify_connection()?;
    let update = set_fields(update);
    info!(
      "Performing update: {} with filter: {}",
      to_json(&update),
      to_json(filter)
    );

    let outcome = swallow("UPDATE", store.update_many(filter.clone(), update).await);
    if let Some(outcome) = &outcome {
      info!(
        "{} document(s) updated. {}",
        outcome.modified_count,
        to_json(&outcome.raw)
      );
    }
    Ok(outcome)
  }

  /// Delete every document matching any of `filters`.
  ///
  /// With `safety_on`, a filter set that would match every document (an
  /// empty filter, or no filters at all) is refused with
  /// [`Error::InvalidOperation`] and nothing is sent to the store.
  pub async fn delete(&self, filters: &[Document], safety_on: bool) -> Result<Option<DeleteOutcome>> {
    let store = self.verify_connection()?;
    let search = combine_filters(filters);

    if safety_on && contains_match_all(filters) {
      let chosen: Vec<serde_json::Value> = filters.iter().map(to_json).collect();
      return Err(Error::InvalidOperation(format!(
        "The chosen filter {} may delete ALL entries. \
         If you would like to do this, pass safety_on = false. No action was performed.",
        serde_json::Value::Array(chosen)
      )));
    }

    info!("Performing delete: {}", to_json(&search));
    let outcome = swallow("DELETE", store.delete_many(search).await);
    if let Some(outcome) = &outcome {
      info!(
        "{} document(s) deleted. {}",
        outcome.deleted_count,
        to_json(&outcome.raw)
      );
    }
    Ok(outcome)
  }
}

/// Log a store fault and drop it.
fn swallow<T>(operation: &str, result: Result<T>) -> Option<T> {
  match result {
    Ok(value) => Some(value),
    Err(e) => {
      error!("On {}: {}", operation, e);
      None
    }
  }
}
