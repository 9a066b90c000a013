//! In-memory document store.
//!
//! Implements [`DocumentStore`] over a vector of documents with a practical
//! subset of the MongoDB query language, so the client can be exercised
//! without a server. Clones share state, letting a test keep a handle on the
//! store it gave to a client.

use std::cmp::Ordering;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

use async_trait::async_trait;
use bson::{doc, oid::ObjectId, Bson, Document};
use futures::stream::{self, StreamExt};
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::store::{DeleteOutcome, DocumentCursor, DocumentStore, UpdateOutcome};

#[derive(Default)]
struct Inner {
  documents: Mutex<Vec<Document>>,
  offline: AtomicBool,
  discard_inserts: AtomicBool,
  fail_lookups: AtomicBool,
  calls: AtomicUsize,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
  inner: Arc<Inner>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Seed the store. Documents without `_id` get one.
  pub fn with_documents(documents: impl IntoIterator<Item = Document>) -> Self {
    let seeded = documents.into_iter().map(with_id).collect();
    Self {
      inner: Arc::new(Inner {
        documents: Mutex::new(seeded),
        ..Default::default()
      }),
    }
  }

  /// While offline every call fails, as if the server were unreachable.
  pub fn set_offline(&self, offline: bool) {
    self.inner.offline.store(offline, AtomicOrdering::SeqCst);
  }

  /// Acknowledge inserts without keeping them.
  pub fn set_discard_inserts(&self, discard: bool) {
    self.inner.discard_inserts.store(discard, AtomicOrdering::SeqCst);
  }

  /// Fail `find_one` while every other call keeps working.
  pub fn set_fail_lookups(&self, fail: bool) {
    self.inner.fail_lookups.store(fail, AtomicOrdering::SeqCst);
  }

  /// Number of store calls made so far, including failed ones.
  pub fn call_count(&self) -> usize {
    self.inner.calls.load(AtomicOrdering::SeqCst)
  }

  pub async fn documents(&self) -> Vec<Document> {
    self.inner.documents.lock().await.clone()
  }

  pub async fn len(&self) -> usize {
    self.inner.documents.lock().await.len()
  }

  pub async fn is_empty(&self) -> bool {
    self.len().await == 0
  }

  fn enter(&self) -> Result<()> {
    self.inner.calls.fetch_add(1, AtomicOrdering::SeqCst);
    if self.inner.offline.load(AtomicOrdering::SeqCst) {
      return Err(Error::Store("connection refused".to_string()));
    }
    Ok(())
  }
}

#[async_trait]
impl DocumentStore for MemoryStore {
  async fn ping(&self) -> Result<()> {
    self.enter()
  }

  async fn find(&self, filter: Document) -> Result<DocumentCursor> {
    self.enter()?;
    validate_filter(&filter)?;
    let documents = self.inner.documents.lock().await;
    let mut found = Vec::new();
    for document in documents.iter() {
      if matches(document, &filter)? {
        found.push(Ok(document.clone()));
      }
    }
    Ok(stream::iter(found).boxed())
  }

  async fn find_one(&self, filter: Document) -> Result<Option<Document>> {
    self.enter()?;
    if self.inner.fail_lookups.load(AtomicOrdering::SeqCst) {
      return Err(Error::Store("lookup failed".to_string()));
    }
    validate_filter(&filter)?;
    let documents = self.inner.documents.lock().await;
    for document in documents.iter() {
      if matches(document, &filter)? {
        return Ok(Some(document.clone()));
      }
    }
    Ok(None)
  }

  async fn insert_one(&self, document: Document) -> Result<Bson> {
    self.enter()?;
    let document = with_id(document);
    let id = document.get("_id").cloned().unwrap_or(Bson::Null);

    let mut documents = self.inner.documents.lock().await;
    if documents.iter().any(|existing| existing.get("_id") == Some(&id)) {
      return Err(Error::Store(format!("E11000 duplicate key error: _id {}", id)));
    }
    if !self.inner.discard_inserts.load(AtomicOrdering::SeqCst) {
      documents.push(document);
    }
    Ok(id)
  }

  async fn update_many(&self, filter: Document, update: Document) -> Result<UpdateOutcome> {
    self.enter()?;
    validate_filter(&filter)?;
    let mut documents = self.inner.documents.lock().await;

    // Stage every change first so a bad update leaves the collection untouched.
    let mut staged = Vec::new();
    for (index, document) in documents.iter().enumerate() {
      if matches(document, &filter)? {
        let mut updated = document.clone();
        apply_update(&mut updated, &update)?;
        staged.push((index, updated));
      }
    }

    let matched = staged.len() as u64;
    let mut modified = 0;
    for (index, updated) in staged {
      if documents[index] != updated {
        documents[index] = updated;
        modified += 1;
      }
    }
    Ok(UpdateOutcome::new(matched, modified, None))
  }

  async fn delete_many(&self, filter: Document) -> Result<DeleteOutcome> {
    self.enter()?;
    validate_filter(&filter)?;
    let mut documents = self.inner.documents.lock().await;

    let mut keep = Vec::with_capacity(documents.len());
    for document in documents.iter() {
      keep.push(!matches(document, &filter)?);
    }
    let before = documents.len();
    let mut flags = keep.into_iter();
    documents.retain(|_| flags.next().unwrap_or(true));

    Ok(DeleteOutcome::new((before - documents.len()) as u64))
  }
}

fn with_id(document: Document) -> Document {
  if document.contains_key("_id") {
    return document;
  }
  let mut identified = doc! { "_id": ObjectId::new() };
  for (key, value) in document {
    identified.insert(key, value);
  }
  identified
}

const FIELD_OPERATORS: &[&str] = &[
  "$eq", "$ne", "$gt", "$gte", "$lt", "$lte", "$in", "$nin", "$exists",
];

/// Reject malformed filters up front, whether or not any document is
/// ever compared against them.
fn validate_filter(filter: &Document) -> Result<()> {
  for (key, condition) in filter {
    match key.as_str() {
      "$or" | "$and" | "$nor" => {
        for clause in clauses(key, condition)? {
          validate_filter(clause)?;
        }
      }
      op if op.starts_with('$') => {
        return Err(Error::Store(format!("unknown top level operator: {}", op)));
      }
      _ => {
        let Bson::Document(ops) = condition else { continue };
        if !is_operator_document(condition) {
          continue;
        }
        for (op, arg) in ops {
          if !FIELD_OPERATORS.contains(&op.as_str()) {
            return Err(Error::Store(format!("unknown operator: {}", op)));
          }
          if (op == "$in" || op == "$nin") && arg.as_array().is_none() {
            return Err(Error::Store(format!("{} needs an array", op)));
          }
        }
      }
    }
  }
  Ok(())
}

/// Evaluate a query filter against one document.
fn matches(document: &Document, filter: &Document) -> Result<bool> {
  for (key, condition) in filter {
    let satisfied = match key.as_str() {
      "$or" => {
        let mut any = false;
        for clause in clauses(key, condition)? {
          if matches(document, clause)? {
            any = true;
            break;
          }
        }
        any
      }
      "$and" => {
        let mut all = true;
        for clause in clauses(key, condition)? {
          if !matches(document, clause)? {
            all = false;
            break;
          }
        }
        all
      }
      "$nor" => {
        let mut none = true;
        for clause in clauses(key, condition)? {
          if matches(document, clause)? {
            none = false;
            break;
          }
        }
        none
      }
      op if op.starts_with('$') => {
        return Err(Error::Store(format!("unknown top level operator: {}", op)));
      }
      path => matches_field(lookup(document, path), condition)?,
    };
    if !satisfied {
      return Ok(false);
    }
  }
  Ok(true)
}

fn clauses<'a>(operator: &str, condition: &'a Bson) -> Result<Vec<&'a Document>> {
  let invalid = || Error::Store(format!("{} must be a nonempty array of documents", operator));
  let array = condition.as_array().filter(|a| !a.is_empty()).ok_or_else(invalid)?;
  array
    .iter()
    .map(|clause| clause.as_document().ok_or_else(invalid))
    .collect()
}

fn lookup<'a>(document: &'a Document, path: &str) -> Option<&'a Bson> {
  let mut segments = path.split('.');
  let mut current = document.get(segments.next()?)?;
  for segment in segments {
    current = current.as_document()?.get(segment)?;
  }
  Some(current)
}

fn is_operator_document(condition: &Bson) -> bool {
  match condition {
    Bson::Document(ops) => !ops.is_empty() && ops.keys().all(|k| k.starts_with('$')),
    _ => false,
  }
}

fn matches_field(value: Option<&Bson>, condition: &Bson) -> Result<bool> {
  let Bson::Document(ops) = condition else {
    return Ok(equals(value, condition));
  };
  if !is_operator_document(condition) {
    return Ok(equals(value, condition));
  }

  for (op, arg) in ops {
    let satisfied = match op.as_str() {
      "$eq" => equals(value, arg),
      "$ne" => !equals(value, arg),
      "$gt" => compares(value, arg, |o| o == Ordering::Greater),
      "$gte" => compares(value, arg, |o| o != Ordering::Less),
      "$lt" => compares(value, arg, |o| o == Ordering::Less),
      "$lte" => compares(value, arg, |o| o != Ordering::Greater),
      "$in" => in_array(op, value, arg)?,
      "$nin" => !in_array(op, value, arg)?,
      "$exists" => value.is_some() == truthy(arg),
      other => return Err(Error::Store(format!("unknown operator: {}", other))),
    };
    if !satisfied {
      return Ok(false);
    }
  }
  Ok(true)
}

/// Equality with numeric widening; an array field matches if any element does.
fn equals(value: Option<&Bson>, expected: &Bson) -> bool {
  match value {
    None => matches!(expected, Bson::Null),
    Some(actual) => {
      same_value(actual, expected)
        || matches!(actual, Bson::Array(items) if items.iter().any(|i| same_value(i, expected)))
    }
  }
}

fn same_value(a: &Bson, b: &Bson) -> bool {
  match (as_number(a), as_number(b)) {
    (Some(x), Some(y)) => x == y,
    _ => a == b,
  }
}

fn compares(value: Option<&Bson>, arg: &Bson, accept: impl Fn(Ordering) -> bool) -> bool {
  value.and_then(|v| compare(v, arg)).map_or(false, accept)
}

fn compare(a: &Bson, b: &Bson) -> Option<Ordering> {
  if let (Some(x), Some(y)) = (as_number(a), as_number(b)) {
    return x.partial_cmp(&y);
  }
  match (a, b) {
    (Bson::String(x), Bson::String(y)) => Some(x.cmp(y)),
    (Bson::Boolean(x), Bson::Boolean(y)) => Some(x.cmp(y)),
    (Bson::DateTime(x), Bson::DateTime(y)) => Some(x.cmp(y)),
    (Bson::ObjectId(x), Bson::ObjectId(y)) => Some(x.cmp(y)),
    _ => None,
  }
}

fn as_number(value: &Bson) -> Option<f64> {
  match value {
    Bson::Int32(n) => Some(f64::from(*n)),
    Bson::Int64(n) => Some(*n as f64),
    Bson::Double(n) => Some(*n),
    _ => None,
  }
}

fn in_array(op: &str, value: Option<&Bson>, arg: &Bson) -> Result<bool> {
  let candidates = arg
    .as_array()
    .ok_or_else(|| Error::Store(format!("{} needs an array", op)))?;
  Ok(candidates.iter().any(|c| equals(value, c)))
}

fn truthy(value: &Bson) -> bool {
  match value {
    Bson::Boolean(b) => *b,
    Bson::Null => false,
    other => as_number(other).map_or(true, |n| n != 0.0),
  }
}

/// Apply an operator update (`$set`, `$unset`) to a document in place.
fn apply_update(document: &mut Document, update: &Document) -> Result<()> {
  if update.is_empty() || !update.keys().all(|k| k.starts_with('$')) {
    return Err(Error::Store("update document requires atomic operators".to_string()));
  }

  for (op, arg) in update {
    let fields = arg
      .as_document()
      .ok_or_else(|| Error::Store(format!("modifier {} needs a document argument", op)))?;
    for (path, value) in fields {
      if path == "_id" || path.starts_with("_id.") {
        if op == "$set" && document.get("_id") == Some(value) {
          continue;
        }
        return Err(Error::Store(format!(
          "performing an update on the path '{}' would modify the immutable field '_id'",
          path
        )));
      }
      match op.as_str() {
        "$set" => set_path(document, path, value.clone())?,
        "$unset" => unset_path(document, path),
        other => return Err(Error::Store(format!("unknown update operator: {}", other))),
      }
    }
  }
  Ok(())
}

fn set_path(document: &mut Document, path: &str, value: Bson) -> Result<()> {
  match path.split_once('.') {
    None => {
      document.insert(path, value);
      Ok(())
    }
    Some((head, rest)) => {
      if !document.contains_key(head) {
        document.insert(head, Document::new());
      }
      match document.get_mut(head) {
        Some(Bson::Document(child)) => set_path(child, rest, value),
        _ => Err(Error::Store(format!(
          "cannot create field '{}' in non-document element '{}'",
          rest, head
        ))),
      }
    }
  }
}

fn unset_path(document: &mut Document, path: &str) {
  match path.split_once('.') {
    None => {
      document.remove(path);
    }
    Some((head, rest)) => {
      if let Some(Bson::Document(child)) = document.get_mut(head) {
        unset_path(child, rest);
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn rex() -> Document {
    doc! {
      "name": "Rex",
      "age": 3,
      "tags": ["good", "loud"],
      "owner": { "name": "Ann", "city": "Austin" },
    }
  }

  #[test]
  fn test_equality_and_dotted_paths() {
    let doc = rex();
    assert!(matches(&doc, &doc! { "name": "Rex" }).unwrap());
    assert!(matches(&doc, &doc! { "owner.city": "Austin" }).unwrap());
    assert!(!matches(&doc, &doc! { "owner.city": "Dallas" }).unwrap());
    assert!(matches(&doc, &doc! {}).unwrap());
  }

  #[test]
  fn test_numeric_widening() {
    let doc = rex();
    assert!(matches(&doc, &doc! { "age": 3_i64 }).unwrap());
    assert!(matches(&doc, &doc! { "age": 3.0 }).unwrap());
  }

  #[test]
  fn test_array_membership() {
    let doc = rex();
    assert!(matches(&doc, &doc! { "tags": "loud" }).unwrap());
    assert!(!matches(&doc, &doc! { "tags": "quiet" }).unwrap());
  }

  #[test]
  fn test_comparison_operators() {
    let doc = rex();
    assert!(matches(&doc, &doc! { "age": { "$gt": 2, "$lte": 3 } }).unwrap());
    assert!(!matches(&doc, &doc! { "age": { "$lt": 3 } }).unwrap());
    assert!(matches(&doc, &doc! { "age": { "$ne": 4 } }).unwrap());
    assert!(matches(&doc, &doc! { "name": { "$in": ["Rex", "Max"] } }).unwrap());
    assert!(matches(&doc, &doc! { "name": { "$nin": ["Max"] } }).unwrap());
    assert!(matches(&doc, &doc! { "breed": { "$exists": false } }).unwrap());
    assert!(!matches(&doc, &doc! { "missing": { "$gt": 1 } }).unwrap());
  }

  #[test]
  fn test_logical_operators() {
    let doc = rex();
    assert!(matches(&doc, &doc! { "$or": [{ "name": "Max" }, { "age": 3 }] }).unwrap());
    assert!(!matches(&doc, &doc! { "$and": [{ "name": "Rex" }, { "age": 4 }] }).unwrap());
    assert!(matches(&doc, &doc! { "$nor": [{ "name": "Max" }] }).unwrap());
  }

  #[test]
  fn test_malformed_filters_are_store_faults() {
    let doc = rex();
    assert!(matches!(
      matches(&doc, &doc! { "$or": [] }),
      Err(Error::Store(_))
    ));
    assert!(matches!(
      matches(&doc, &doc! { "age": { "$near": 1 } }),
      Err(Error::Store(_))
    ));
    assert!(matches!(
      matches(&doc, &doc! { "$where": "true" }),
      Err(Error::Store(_))
    ));
  }

  #[test]
  fn test_validate_filter_walks_every_clause() {
    assert!(validate_filter(&doc! { "name": "Rex", "age": { "$gte": 3 } }).is_ok());
    assert!(validate_filter(&doc! { "owner": { "name": "Ann" } }).is_ok());
    assert!(validate_filter(&doc! { "$or": [{}, { "$bogus": 1 }] }).is_err());
    assert!(validate_filter(&doc! { "name": "Rex", "age": { "$near": 1 } }).is_err());
    assert!(validate_filter(&doc! { "name": { "$in": "Rex" } }).is_err());
  }

  #[tokio::test]
  async fn test_malformed_filter_rejected_on_empty_store() {
    let store = MemoryStore::new();
    let bad = doc! { "$or": [{}, { "$bogus": 1 }] };
    assert!(store.find(bad.clone()).await.is_err());
    assert!(store.find_one(bad.clone()).await.is_err());
    assert!(store.delete_many(bad.clone()).await.is_err());
    assert!(store
      .update_many(bad, doc! { "$set": { "age": 1 } })
      .await
      .is_err());
  }

  #[tokio::test]
  async fn test_fail_lookups_only_breaks_find_one() {
    let store = MemoryStore::new();
    store.set_fail_lookups(true);
    let id = store.insert_one(rex()).await.unwrap();
    assert!(store.find_one(doc! { "_id": id }).await.is_err());
    assert!(store.find(doc! {}).await.is_ok());
    assert_eq!(store.len().await, 1);
  }

  #[test]
  fn test_set_merges_fields() {
    let mut doc = rex();
    apply_update(&mut doc, &doc! { "$set": { "age": 4, "owner.city": "Dallas" } }).unwrap();
    assert_eq!(doc.get_i32("age").unwrap(), 4);
    assert_eq!(doc.get_str("name").unwrap(), "Rex");
    let owner = doc.get_document("owner").unwrap();
    assert_eq!(owner.get_str("city").unwrap(), "Dallas");
    assert_eq!(owner.get_str("name").unwrap(), "Ann");
  }

  #[test]
  fn test_unset_removes_fields() {
    let mut doc = rex();
    apply_update(&mut doc, &doc! { "$unset": { "tags": "", "owner.city": "" } }).unwrap();
    assert!(!doc.contains_key("tags"));
    assert!(!doc.get_document("owner").unwrap().contains_key("city"));
  }

  #[test]
  fn test_update_requires_operators() {
    let mut doc = rex();
    assert!(apply_update(&mut doc, &doc! { "age": 4 }).is_err());
    assert!(apply_update(&mut doc, &doc! { "$rename": { "age": "years" } }).is_err());
    assert!(apply_update(&mut doc, &doc! { "$set": { "name.first": "R" } }).is_err());
  }

  #[test]
  fn test_update_cannot_change_id() {
    let mut doc = with_id(rex());
    let id = doc.get("_id").cloned().unwrap();
    assert!(apply_update(&mut doc, &doc! { "$set": { "_id": 7 } }).is_err());
    assert!(apply_update(&mut doc, &doc! { "$set": { "_id": id } }).is_ok());
  }

  #[tokio::test]
  async fn test_insert_assigns_id() {
    let store = MemoryStore::new();
    let id = store.insert_one(rex()).await.unwrap();
    assert!(matches!(id, Bson::ObjectId(_)));

    let stored = store.find_one(doc! { "_id": id }).await.unwrap().unwrap();
    assert_eq!(stored.keys().next().map(String::as_str), Some("_id"));
    assert_eq!(stored.get_str("name").unwrap(), "Rex");
  }

  #[tokio::test]
  async fn test_insert_rejects_duplicate_id() {
    let store = MemoryStore::new();
    store.insert_one(doc! { "_id": 1, "name": "Rex" }).await.unwrap();
    let err = store.insert_one(doc! { "_id": 1, "name": "Max" }).await.unwrap_err();
    assert!(matches!(err, Error::Store(_)));
    assert_eq!(store.len().await, 1);
  }

  #[tokio::test]
  async fn test_find_is_lazy_stream() {
    let store = MemoryStore::with_documents(vec![rex(), doc! { "name": "Max", "age": 5 }]);
    let cursor = store.find(doc! { "age": { "$gte": 3 } }).await.unwrap();
    let found: Vec<Document> = cursor.map(|d| d.unwrap()).collect().await;
    assert_eq!(found.len(), 2);
  }

  #[tokio::test]
  async fn test_failed_update_leaves_store_untouched() {
    let store = MemoryStore::with_documents(vec![
      doc! { "name": "Rex", "owner": "Ann" },
      doc! { "name": "Rex", "owner": { "name": "Bo" } },
    ]);
    let before = store.documents().await;
    let result = store
      .update_many(doc! { "name": "Rex" }, doc! { "$set": { "owner.name": "Cy" } })
      .await;
    assert!(result.is_err());
    assert_eq!(store.documents().await, before);
  }

  #[tokio::test]
  async fn test_offline_store_fails_and_counts_calls() {
    let store = MemoryStore::new();
    store.set_offline(true);
    assert!(store.ping().await.is_err());
    assert!(store.delete_many(doc! {}).await.is_err());
    assert_eq!(store.call_count(), 2);
  }
}
