//! Basic example demonstrating the CRUD client.
//!
//! Runs against a local MongoDB when `MONGO_USER` and `MONGO_PASSWORD` are
//! set, otherwise against the in-memory store.

use bson::doc;
use futures::StreamExt;
use mongo_crud::{DocumentStore, DocumentStoreClient, MemoryStore};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> mongo_crud::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  match (std::env::var("MONGO_USER"), std::env::var("MONGO_PASSWORD")) {
    (Ok(user), Ok(password)) => {
      let client = DocumentStoreClient::connect("AAC.animals", user, password).await;
      run(&client).await
    }
    _ => {
      let client = DocumentStoreClient::with_store("AAC.animals", MemoryStore::new()).await;
      run(&client).await
    }
  }
}

async fn run<S: DocumentStore>(client: &DocumentStoreClient<S>) -> mongo_crud::Result<()> {
  println!("Connected: {}", client.is_connected());

  // Insert a couple of documents
  client.create(&doc! { "name": "Rex", "age": 3, "breed": "Beagle" }).await?;
  client.create(&doc! { "name": "Max", "age": 5, "breed": "Boxer" }).await?;

  // Rex OR any Boxer
  if let Some(mut cursor) = client
    .read(&[doc! { "name": "Rex" }, doc! { "breed": "Boxer" }])
    .await?
  {
    while let Some(animal) = cursor.next().await {
      println!("Found: {:?}", animal?);
    }
  }

  // Partial update
  if let Some(outcome) = client.update(&doc! { "name": "Rex" }, &doc! { "age": 4 }).await? {
    println!("Updated {} document(s)", outcome.modified_count);
  }

  // The safety gate refuses a match-all delete
  if let Err(e) = client.delete(&[doc! {}], true).await {
    println!("Refused: {}", e);
  }

  if let Some(outcome) = client.delete(&[doc! { "name": "Rex" }, doc! { "name": "Max" }], true).await? {
    println!("Deleted {} document(s)", outcome.deleted_count);
  }

  Ok(())
}
