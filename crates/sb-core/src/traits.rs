//! # Core Traits (Ports)
//!
//! Any storage plugin must implement `Connector`, `Connection` and `Session`
//! to be pooled and driven by the engine.

use async_trait::async_trait;

use crate::document::{Collection, Document, Filter, FindOptions, TransactionOptions};
use crate::error::Result;
use crate::models::Event;

/// Dials new connections to a storage backend.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Connection: Connection;

    /// Establishes a fresh, live connection.
    async fn connect(&self) -> Result<Self::Connection>;

    /// Short backend label for logs (e.g. "sqlite").
    fn backend(&self) -> &'static str;
}

/// A live handle to the backend. Only ever used by one operation at a time.
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    type Session: Session;

    async fn find_one(&self, collection: Collection, filter: &Filter) -> Result<Option<Document>>;
    async fn find(&self, collection: Collection, filter: &Filter, options: &FindOptions) -> Result<Vec<Document>>;
    async fn count(&self, collection: Collection, filter: &Filter) -> Result<u64>;
    async fn insert_one(&self, collection: Collection, document: Document) -> Result<()>;

    /// Sets top-level fields on the first matching document. Returns the match count.
    async fn update_one(&self, collection: Collection, filter: &Filter, set: Document) -> Result<u64>;

    async fn delete_one(&self, collection: Collection, filter: &Filter) -> Result<u64>;
    async fn delete_many(&self, collection: Collection, filter: &Filter) -> Result<u64>;

    /// Opens a transaction bound to this connection.
    async fn start_transaction(&self, options: TransactionOptions) -> Result<Self::Session>;

    /// False when the handle must not go back to the idle set
    /// (e.g. it is still inside an unfinished transaction).
    fn is_reusable(&self) -> bool {
        true
    }
}

/// An open transaction. Clones share the same transaction, so concurrent
/// tasks can all write through it.
#[async_trait]
pub trait Session: Clone + Send + Sync + 'static {
    async fn find(&self, collection: Collection, filter: &Filter, options: &FindOptions) -> Result<Vec<Document>>;
    async fn delete_one(&self, collection: Collection, filter: &Filter) -> Result<u64>;
    async fn delete_many(&self, collection: Collection, filter: &Filter) -> Result<u64>;

    /// Makes every write visible atomically. Fails if already finished.
    async fn commit(&self) -> Result<()>;

    /// Discards every write. Fails if already finished.
    async fn abort(&self) -> Result<()>;
}

/// Outbound domain events. Delivery is fire-and-forget for the caller.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: Event) -> anyhow::Result<()>;
}
