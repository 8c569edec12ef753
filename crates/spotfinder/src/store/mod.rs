//! Document store abstraction.
//!
//! Collections are addressed hierarchically: a top-level collection holds
//! documents, and each document may own sub-collections. Every listener
//! delivery is a full, ordered snapshot of the collection.

pub mod sqlite;

use std::{
    fmt,
    pin::Pin,
    task::{Context, Poll},
};

use async_trait::async_trait;
use futures::Stream;
use serde_json::{Map, Value};
use tokio::{sync::mpsc, task::JoinHandle};

use crate::error::Result;

pub use sqlite::SqliteStore;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionPath(String);

impl CollectionPath {
    pub fn root(name: &str) -> Self {
        Self(name.to_string())
    }

    pub fn doc(&self, id: &str) -> DocumentPath {
        DocumentPath {
            collection: self.clone(),
            id: id.to_string(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentPath {
    pub collection: CollectionPath,
    pub id: String,
}

impl DocumentPath {
    pub fn collection(&self, name: &str) -> CollectionPath {
        CollectionPath(format!("{}/{}/{}", self.collection, self.id, name))
    }
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: CollectionPath,
    pub order_by: Option<(String, Direction)>,
}

impl Query {
    pub fn all(collection: CollectionPath) -> Self {
        Self {
            collection,
            order_by: None,
        }
    }

    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.order_by = Some((field.to_string(), direction));
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSnapshot {
    pub id: String,
    pub data: Value,
}

#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    /// Add a document with a store-assigned id and return the id.
    async fn add_document(&self, collection: &CollectionPath, data: Value) -> Result<String>;

    async fn get_document(&self, doc: &DocumentPath) -> Result<Option<DocumentSnapshot>>;

    /// Atomically create the document unless it exists. Returns whatever is
    /// stored afterwards.
    async fn create_if_absent(&self, doc: &DocumentPath, data: Value) -> Result<DocumentSnapshot>;

    /// Merge `fields` into an existing document.
    async fn update_fields(&self, doc: &DocumentPath, fields: Map<String, Value>) -> Result<()>;

    async fn delete_document(&self, doc: &DocumentPath) -> Result<()>;

    async fn query(&self, query: &Query) -> Result<Vec<DocumentSnapshot>>;

    /// Standing listener. The first delivery is the current snapshot.
    async fn subscribe(&self, query: Query) -> Result<Subscription>;
}

/// Full-snapshot deliveries for one query. Dropping it unsubscribes.
pub struct Subscription {
    rx: mpsc::Receiver<Result<Vec<DocumentSnapshot>>>,
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn new(rx: mpsc::Receiver<Result<Vec<DocumentSnapshot>>>, task: JoinHandle<()>) -> Self {
        Self { rx, task }
    }

    /// Next snapshot, or `None` once the listener has stopped.
    pub async fn next_snapshot(&mut self) -> Option<Result<Vec<DocumentSnapshot>>> {
        self.rx.recv().await
    }

    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Stream for Subscription {
    type Item = Result<Vec<DocumentSnapshot>>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sub_collection_paths_nest_under_document() {
        let spots = CollectionPath::root("skateSpots");
        let comments = spots.doc("abc").collection("comments");
        assert_eq!(comments.as_str(), "skateSpots/abc/comments");
        assert_eq!(comments.doc("c1").to_string(), "skateSpots/abc/comments/c1");
    }
}
