//! Filter and update-term construction.
//!
//! Several filters passed to a read or delete are OR'd together; an update
//! document is always applied as a `$set` so untouched fields survive.

use bson::{doc, Bson, Document};

/// Combine filters into the one submitted to the store.
///
/// No filters match everything, a single filter passes through unchanged,
/// and two or more become `{"$or": [...]}` in the order given.
///
/// # Example
/// ```
/// use bson::doc;
/// use mongo_crud::filter::combine_filters;
///
/// let search = combine_filters(&[doc! { "name": "Bob" }, doc! { "age": 45 }]);
/// assert_eq!(search, doc! { "$or": [{ "name": "Bob" }, { "age": 45 }] });
/// ```
pub fn combine_filters(filters: &[Document]) -> Document {
  match filters {
    [] => Document::new(),
    [single] => single.clone(),
    many => {
      let terms: Vec<Bson> = many.iter().cloned().map(Bson::Document).collect();
      doc! { "$or": terms }
    }
  }
}

/// Wrap an update document in `$set`.
pub fn set_fields(update: &Document) -> Document {
  doc! { "$set": update.clone() }
}

/// True for the universal `{}` filter.
pub fn is_match_all(filter: &Document) -> bool {
  filter.is_empty()
}

/// True if any filter in the set matches every document. An empty set
/// combines to `{}` and so counts too.
pub fn contains_match_all(filters: &[Document]) -> bool {
  filters.is_empty() || filters.iter().any(is_match_all)
}

/// Relaxed extended JSON, for log output.
pub fn to_json(document: &Document) -> serde_json::Value {
  Bson::Document(document.clone()).into_relaxed_extjson()
}
