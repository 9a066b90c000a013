//! MongoDB CRUD client
//!
//! A thin authenticated client over one `database.collection`, exposing
//! create/read/update/delete with consistent filter handling and error
//! reporting.
//!
//! # Example
//!
//! ```no_run
//! use bson::doc;
//! use futures::StreamExt;
//! use mongo_crud::DocumentStoreClient;
//!
//! #[tokio::main]
//! async fn main() -> mongo_crud::Result<()> {
//!     // Connect to localhost:27017, authenticating against AAC
//!     let client = DocumentStoreClient::connect("AAC.animals", "aacuser", "secret").await;
//!
//!     // Insert a document
//!     client.create(&doc! { "name": "Rex", "age": 3 }).await?;
//!
//!     // Dogs named Rex OR anything aged 3
//!     if let Some(mut cursor) = client
//!         .read(&[doc! { "name": "Rex" }, doc! { "age": 3 }])
//!         .await?
//!     {
//!         while let Some(animal) = cursor.next().await {
//!             println!("Found: {:?}", animal);
//!         }
//!     }
//!
//!     // Partial update; other fields are kept
//!     client.update(&doc! { "name": "Rex" }, &doc! { "age": 4 }).await?;
//!
//!     // Refused unless the safety gate is turned off
//!     client.delete(&[doc! {}], true).await.unwrap_err();
//!
//!     Ok(())
//! }
//! ```

mod client;
mod config;
mod error;
pub mod filter;
pub mod memory;
mod store;

pub use client::DocumentStoreClient;
pub use config::{ConnectOptions, Target, DEFAULT_HOST, DEFAULT_PORT, DEFAULT_TIMEOUT};
pub use error::{Error, Result};
pub use memory::MemoryStore;
pub use store::{DeleteOutcome, DocumentCursor, DocumentStore, MongoStore, UpdateOutcome};
