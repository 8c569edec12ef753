use std::sync::Arc;

use tokio_stream::StreamExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use spotfinder::{AuthGateway, Config, Database, DocumentStore, Identity, SpotService, SqliteStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "spotfinder=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env();

    // Initialize database
    let db = Database::connect(&config.database_url).await?;
    db.run_migrations().await?;

    let store: Arc<dyn DocumentStore> = Arc::new(SqliteStore::new(db.clone()));
    let auth = AuthGateway::new(db, config.clone());

    if let Some(token) = &config.session_token {
        match auth.restore_session(token).await {
            Ok(user) => tracing::info!(user_id = %user.id, email = %user.email, "Logged in"),
            Err(e) => tracing::warn!(error = %e, "Could not restore session"),
        }
    }

    let spots = SpotService::new(store, Arc::new(auth.clone()));
    spots.listen_to_spots().await;

    let mut updates = spots.stream();
    tracing::info!(
        signed_in = auth.current_user().is_some(),
        "Following spot feed, press Ctrl-C to stop"
    );

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            next = updates.next() => {
                let Some(list) = next else {
                    break;
                };
                tracing::info!(count = list.len(), "Spots updated");
                for spot in list.iter() {
                    tracing::debug!(
                        id = spot.id.as_deref().unwrap_or("-"),
                        name = %spot.name,
                        latitude = spot.latitude,
                        longitude = spot.longitude,
                        created_by = %spot.created_by,
                        "Spot"
                    );
                }
            }
            _ = &mut shutdown => break,
        }
    }

    spots.stop_listening();
    tracing::info!("Stopped");

    Ok(())
}
