// SQLite-backed document store.
// Each collection path gets a broadcast room; every committed write pings the
// room and every listener re-reads its query and delivers the full snapshot.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::{broadcast, mpsc, RwLock};
use uuid::Uuid;

use super::{
    CollectionPath, Direction, DocumentPath, DocumentSnapshot, DocumentStore, Query, Subscription,
};
use crate::{
    db::Database,
    error::{AppError, Result},
};

const CHANGE_CHANNEL_CAPACITY: usize = 64;
const SNAPSHOT_CHANNEL_CAPACITY: usize = 16;

pub struct Room {
    pub changes: broadcast::Sender<()>,
}

impl Room {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self { changes }
    }
}

impl Default for Room {
    fn default() -> Self {
        Self::new()
    }
}

// Keyed by collection path
pub type RoomRegistry = Arc<RwLock<HashMap<String, Arc<Room>>>>;

#[derive(Clone)]
pub struct SqliteStore {
    db: Database,
    rooms: RoomRegistry,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            rooms: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn listen(&self, collection: &CollectionPath) -> RoomListener {
        let mut rooms = self.rooms.write().await;
        let changes = rooms
            .entry(collection.as_str().to_string())
            .or_insert_with(|| Arc::new(Room::new()))
            .changes
            .subscribe();
        RoomListener {
            rooms: Arc::clone(&self.rooms),
            key: collection.as_str().to_string(),
            changes: Some(changes),
        }
    }

    async fn notify(&self, collection: &CollectionPath) {
        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get(collection.as_str()) {
            // Nobody listening any more
            if room.changes.send(()).is_err() {
                rooms.remove(collection.as_str());
            }
        }
    }

    #[cfg(test)]
    async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}

/// One listener's membership in a room. Dropping it (the listener task ending
/// or being aborted) releases the room once nobody else is in it.
struct RoomListener {
    rooms: RoomRegistry,
    key: String,
    changes: Option<broadcast::Receiver<()>>,
}

impl RoomListener {
    /// Wait for the next committed write. `false` once the room is closed.
    async fn changed(&mut self) -> bool {
        let Some(changes) = self.changes.as_mut() else {
            return false;
        };
        match changes.recv().await {
            Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => true,
            Err(broadcast::error::RecvError::Closed) => false,
        }
    }
}

impl Drop for RoomListener {
    fn drop(&mut self) {
        // Leave the room before counting who is left in it
        self.changes.take();
        let rooms = Arc::clone(&self.rooms);
        let key = std::mem::take(&mut self.key);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move { prune_room(&rooms, &key).await });
        }
    }
}

async fn prune_room(rooms: &RoomRegistry, key: &str) {
    let mut rooms = rooms.write().await;
    if rooms
        .get(key)
        .is_some_and(|room| room.changes.receiver_count() == 0)
    {
        rooms.remove(key);
        tracing::trace!(collection = %key, "Room released");
    }
}

fn ensure_object(data: &Value) -> Result<()> {
    if data.is_object() {
        Ok(())
    } else {
        Err(AppError::Validation(
            "Document data must be an object".to_string(),
        ))
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn add_document(&self, collection: &CollectionPath, data: Value) -> Result<String> {
        ensure_object(&data)?;
        let id = Uuid::new_v4().to_string();

        sqlx::query("INSERT INTO documents (collection, id, data) VALUES (?, ?, ?)")
            .bind(collection.as_str())
            .bind(&id)
            .bind(data.to_string())
            .execute(&self.db.pool)
            .await?;

        self.notify(collection).await;
        Ok(id)
    }

    async fn get_document(&self, doc: &DocumentPath) -> Result<Option<DocumentSnapshot>> {
        let row = sqlx::query_scalar::<_, String>(
            "SELECT data FROM documents WHERE collection = ? AND id = ?",
        )
        .bind(doc.collection.as_str())
        .bind(&doc.id)
        .fetch_optional(&self.db.pool)
        .await?;

        row.map(|data| -> Result<DocumentSnapshot> {
            Ok(DocumentSnapshot {
                id: doc.id.clone(),
                data: serde_json::from_str(&data)?,
            })
        })
        .transpose()
    }

    async fn create_if_absent(&self, doc: &DocumentPath, data: Value) -> Result<DocumentSnapshot> {
        ensure_object(&data)?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO documents (collection, id, data) VALUES (?, ?, ?)
            ON CONFLICT(collection, id) DO NOTHING
            "#,
        )
        .bind(doc.collection.as_str())
        .bind(&doc.id)
        .bind(data.to_string())
        .execute(&self.db.pool)
        .await?
        .rows_affected();

        if inserted > 0 {
            self.notify(&doc.collection).await;
        }

        self.get_document(doc)
            .await?
            .ok_or_else(|| AppError::Internal(format!("Document vanished after create: {doc}")))
    }

    async fn update_fields(&self, doc: &DocumentPath, fields: Map<String, Value>) -> Result<()> {
        let patch = Value::Object(fields).to_string();

        let updated = sqlx::query(
            "UPDATE documents SET data = json_patch(data, ?) WHERE collection = ? AND id = ?",
        )
        .bind(&patch)
        .bind(doc.collection.as_str())
        .bind(&doc.id)
        .execute(&self.db.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(AppError::NotFound(format!("Document not found: {doc}")));
        }

        self.notify(&doc.collection).await;
        Ok(())
    }

    async fn delete_document(&self, doc: &DocumentPath) -> Result<()> {
        let deleted = sqlx::query("DELETE FROM documents WHERE collection = ? AND id = ?")
            .bind(doc.collection.as_str())
            .bind(&doc.id)
            .execute(&self.db.pool)
            .await?
            .rows_affected();

        if deleted > 0 {
            self.notify(&doc.collection).await;
        }
        Ok(())
    }

    async fn query(&self, query: &Query) -> Result<Vec<DocumentSnapshot>> {
        let sql = match &query.order_by {
            Some((_, Direction::Ascending)) => {
                "SELECT id, data FROM documents WHERE collection = ? ORDER BY json_extract(data, ?) ASC, seq ASC"
            }
            Some((_, Direction::Descending)) => {
                "SELECT id, data FROM documents WHERE collection = ? ORDER BY json_extract(data, ?) DESC, seq DESC"
            }
            None => "SELECT id, data FROM documents WHERE collection = ? ORDER BY seq ASC",
        };

        let mut rows = sqlx::query_as::<_, (String, String)>(sql).bind(query.collection.as_str());
        if let Some((field, _)) = &query.order_by {
            rows = rows.bind(format!("$.{field}"));
        }

        rows.fetch_all(&self.db.pool)
            .await?
            .into_iter()
            .map(|(id, data)| -> Result<DocumentSnapshot> {
                Ok(DocumentSnapshot {
                    id,
                    data: serde_json::from_str(&data)?,
                })
            })
            .collect()
    }

    async fn subscribe(&self, query: Query) -> Result<Subscription> {
        // Join the room before the first read so no change slips between them
        let mut changes = self.listen(&query.collection).await;
        let initial = self.query(&query).await?;

        let (tx, rx) = mpsc::channel(SNAPSHOT_CHANNEL_CAPACITY);
        tx.send(Ok(initial))
            .await
            .map_err(|_| AppError::Internal("Listener closed".to_string()))?;

        let store = self.clone();
        let task = tokio::spawn(async move {
            while changes.changed().await {
                let snapshot = store.query(&query).await;
                if tx.send(snapshot).await.is_err() {
                    break;
                }
            }
            tracing::debug!(collection = %query.collection, "Listener stopped");
        });

        Ok(Subscription::new(rx, task))
    }
}
