pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod location;
pub mod services;
pub mod store;

pub use auth::{AuthGateway, AuthUser, Identity};
pub use config::Config;
pub use db::{
    models::{Comment, Coordinate, MapRegion, Spot, UserProfile},
    Database,
};
pub use error::{AppError, Result};
pub use services::{
    comments::{CommentFeed, CommentService},
    profiles::ProfileService,
    spots::SpotService,
};
pub use store::{DocumentStore, SqliteStore};
