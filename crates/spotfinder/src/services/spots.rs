use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde_json::{json, Map};
use tokio::{sync::watch, task::JoinHandle};
use tokio_stream::wrappers::WatchStream;

use super::{authorize_owner, spots_collection};
use crate::{
    auth::Identity,
    db::models::{decode_all, Coordinate, Record, Spot},
    error::{AppError, Result},
    store::{Direction, DocumentStore, Query},
};

/// Stored when a spot is submitted without a description.
pub const DEFAULT_DESCRIPTION: &str = "No comment";

pub type SpotList = Arc<Vec<Spot>>;

pub struct SpotService {
    store: Arc<dyn DocumentStore>,
    identity: Arc<dyn Identity>,
    spots: Arc<watch::Sender<SpotList>>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

fn newest_first() -> Query {
    Query::all(spots_collection()).order_by("createdAt", Direction::Descending)
}

impl SpotService {
    pub fn new(store: Arc<dyn DocumentStore>, identity: Arc<dyn Identity>) -> Self {
        let (spots, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            store,
            identity,
            spots: Arc::new(spots),
            listener: Mutex::new(None),
        }
    }

    /// The most recently published list.
    pub fn spots(&self) -> SpotList {
        self.spots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SpotList> {
        self.spots.subscribe()
    }

    /// The current list, then every replacement.
    pub fn stream(&self) -> WatchStream<SpotList> {
        WatchStream::new(self.spots.subscribe())
    }

    /// One-shot refresh of the published list.
    pub async fn fetch_spots(&self) {
        match self.store.query(&newest_first()).await {
            Ok(docs) => {
                let spots: Vec<Spot> = decode_all(docs);
                tracing::debug!(count = spots.len(), "Fetched spots");
                self.spots.send_replace(Arc::new(spots));
            }
            Err(e) => tracing::error!(error = %e, "Error fetching spots"),
        }
    }

    /// Keep the published list in sync with the store until
    /// [`stop_listening`](Self::stop_listening) or drop. Replaces any earlier
    /// listener.
    pub async fn listen_to_spots(&self) {
        let mut subscription = match self.store.subscribe(newest_first()).await {
            Ok(subscription) => subscription,
            Err(e) => {
                tracing::error!(error = %e, "Error subscribing to spots");
                return;
            }
        };

        let spots = Arc::clone(&self.spots);
        let task = tokio::spawn(async move {
            while let Some(delivery) = subscription.next_snapshot().await {
                match delivery {
                    Ok(docs) => {
                        let list: Vec<Spot> = decode_all(docs);
                        tracing::debug!(count = list.len(), "Spot snapshot");
                        spots.send_replace(Arc::new(list));
                    }
                    Err(e) => tracing::warn!(error = %e, "Error fetching spots snapshot"),
                }
            }
        });

        let mut listener = self.listener.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = listener.replace(task) {
            previous.abort();
        }
    }

    pub fn stop_listening(&self) {
        let mut listener = self.listener.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(task) = listener.take() {
            task.abort();
            tracing::debug!("Spot listener stopped");
        }
    }

    pub fn is_listening(&self) -> bool {
        self.listener
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Returns the id the store assigned. The published list only picks the
    /// spot up through the listener (or the next fetch).
    pub async fn add_spot(
        &self,
        name: &str,
        latitude: f64,
        longitude: f64,
        comment: &str,
    ) -> Result<String> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::Validation("Spot name is required".to_string()));
        }

        let user = self
            .identity
            .current_user()
            .ok_or(AppError::Unauthenticated)?;

        let coordinate = Coordinate::new(latitude, longitude);
        if !coordinate.is_valid() {
            return Err(AppError::Validation("Invalid coordinates".to_string()));
        }

        let comment = if comment.trim().is_empty() {
            DEFAULT_DESCRIPTION
        } else {
            comment
        };

        let spot = Spot::new(name, coordinate, comment, user.id);
        let id = self
            .store
            .add_document(&spots_collection(), spot.to_data()?)
            .await
            .inspect_err(|e| tracing::error!(error = %e, "Error adding spot"))?;

        tracing::info!(spot_id = %id, %name, "Spot added");
        Ok(id)
    }

    /// A spot that was never stored has nothing to move; that is not an error.
    pub async fn update_spot_location(&self, spot: &Spot, latitude: f64, longitude: f64) -> Result<()> {
        let Some(spot_id) = spot.id.as_deref() else {
            tracing::debug!("Spot has no id, skipping location update");
            return Ok(());
        };

        authorize_owner(self.identity.as_ref(), spot, "move")?;

        let coordinate = Coordinate::new(latitude, longitude);
        if !coordinate.is_valid() {
            return Err(AppError::Validation("Invalid coordinates".to_string()));
        }

        let mut fields = Map::new();
        fields.insert("latitude".to_string(), json!(coordinate.latitude));
        fields.insert("longitude".to_string(), json!(coordinate.longitude));
        fields.insert("updatedAt".to_string(), json!(Utc::now().timestamp_micros()));

        self.store
            .update_fields(&spots_collection().doc(spot_id), fields)
            .await
            .inspect_err(|e| tracing::error!(%spot_id, error = %e, "Error updating spot location"))?;

        tracing::info!(%spot_id, "Spot moved");
        Ok(())
    }

    pub async fn delete_spot(&self, spot: &Spot) -> Result<()> {
        let Some(spot_id) = spot.id.as_deref() else {
            tracing::debug!("Spot has no id, nothing to delete");
            return Ok(());
        };

        authorize_owner(self.identity.as_ref(), spot, "delete")?;

        self.store
            .delete_document(&spots_collection().doc(spot_id))
            .await
            .inspect_err(|e| tracing::error!(%spot_id, error = %e, "Error deleting spot"))?;

        tracing::info!(%spot_id, "Spot deleted");
        Ok(())
    }
}

impl Drop for SpotService {
    fn drop(&mut self) {
        self.stop_listening();
    }
}
