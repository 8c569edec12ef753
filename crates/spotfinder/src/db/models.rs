use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::{error::Result, store::DocumentSnapshot};

/// A stored document type. The id lives in the document path, never in the
/// payload, so it is skipped during (de)serialization and filled in here.
pub trait Record: Serialize + DeserializeOwned {
    fn set_id(&mut self, id: String);

    fn from_snapshot(snapshot: DocumentSnapshot) -> Result<Self> {
        let mut record: Self = serde_json::from_value(snapshot.data)?;
        record.set_id(snapshot.id);
        Ok(record)
    }

    fn to_data(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Decode a whole snapshot, dropping records that fail to decode.
pub fn decode_all<T: Record>(snapshots: Vec<DocumentSnapshot>) -> Vec<T> {
    snapshots
        .into_iter()
        .filter_map(|snapshot| {
            let id = snapshot.id.clone();
            match T::from_snapshot(snapshot) {
                Ok(record) => Some(record),
                Err(e) => {
                    tracing::warn!(%id, error = %e, "Dropping undecodable document");
                    None
                }
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Spot {
    #[serde(skip)]
    pub id: Option<String>,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub comment: String,
    pub created_by: String,
    #[serde(with = "chrono::serde::ts_microseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_microseconds")]
    pub updated_at: DateTime<Utc>,
}

impl Spot {
    pub fn new(
        name: impl Into<String>,
        coordinate: Coordinate,
        comment: impl Into<String>,
        created_by: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            name: name.into(),
            latitude: coordinate.latitude,
            longitude: coordinate.longitude,
            comment: comment.into(),
            created_by: created_by.into(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.created_by == user_id
    }
}

impl Record for Spot {
    fn set_id(&mut self, id: String) {
        self.id = Some(id);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    #[serde(skip)]
    pub id: Option<String>,
    pub text: String,
    pub created_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by_username: Option<String>,
    #[serde(with = "chrono::serde::ts_microseconds")]
    pub created_at: DateTime<Utc>,
}

impl Comment {
    pub fn new(
        text: impl Into<String>,
        created_by: impl Into<String>,
        created_by_username: Option<String>,
    ) -> Self {
        Self {
            id: None,
            text: text.into(),
            created_by: created_by.into(),
            created_by_username,
            created_at: Utc::now(),
        }
    }

    /// Name to show next to the comment.
    pub fn display_name(&self) -> &str {
        self.created_by_username.as_deref().unwrap_or("Anonymous")
    }
}

impl Record for Comment {
    fn set_id(&mut self, id: String) {
        self.id = Some(id);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    /// The auth id of the user.
    #[serde(skip)]
    pub id: Option<String>,
    pub username: String,
    pub email: String,
    #[serde(with = "chrono::serde::ts_microseconds")]
    pub created_at: DateTime<Utc>,
}

impl UserProfile {
    pub fn new(id: impl Into<String>, username: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            username: username.into(),
            email: email.into(),
            created_at: Utc::now(),
        }
    }
}

impl Record for UserProfile {
    fn set_id(&mut self, id: String) {
        self.id = Some(id);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    /// Positioning services report (0, 0) before they have a real fix.
    pub fn is_usable_fix(&self) -> bool {
        self.is_valid() && (self.latitude != 0.0 || self.longitude != 0.0)
    }
}

const FALLBACK_MAP_WIDTH: f64 = 400.0;
const FALLBACK_MAP_HEIGHT: f64 = 600.0;

/// The visible part of the map: a centre and the degrees it spans.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapRegion {
    pub center: Coordinate,
    pub latitude_delta: f64,
    pub longitude_delta: f64,
}

impl MapRegion {
    /// Span used when centring on the user's location.
    pub const NEIGHBOURHOOD_SPAN: f64 = 0.05;

    pub fn around(center: Coordinate) -> Self {
        Self {
            center,
            latitude_delta: Self::NEIGHBOURHOOD_SPAN,
            longitude_delta: Self::NEIGHBOURHOOD_SPAN,
        }
    }

    /// Where a pin at `origin` lands after being dragged by (`dx`, `dy`)
    /// screen points on a `width` x `height` map view. Screen y grows
    /// downwards, latitude grows upwards.
    pub fn drag_target(
        &self,
        origin: Coordinate,
        dx: f64,
        dy: f64,
        width: f64,
        height: f64,
    ) -> Coordinate {
        let width = if width > 0.0 { width } else { FALLBACK_MAP_WIDTH };
        let height = if height > 0.0 { height } else { FALLBACK_MAP_HEIGHT };

        Coordinate::new(
            origin.latitude - dy * self.latitude_delta / height,
            origin.longitude + dx * self.longitude_delta / width,
        )
    }
}
