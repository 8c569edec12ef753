use std::env;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub session_ttl_days: i64,
    pub session_token: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./data/spotfinder.db?mode=rwc".to_string()),
            jwt_secret: env::var("JWT_SECRET")
                .unwrap_or_else(|_| "development-secret-change-in-production".to_string()),
            session_ttl_days: env::var("SESSION_TTL_DAYS")
                .ok()
                .and_then(|d| d.parse().ok())
                .filter(|d: &i64| *d > 0)
                .unwrap_or(7),
            session_token: env::var("SESSION_TOKEN").ok().filter(|t| !t.is_empty()),
        }
    }

    /// Configuration for a throwaway database file, used by tests and demos.
    pub fn for_database(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            jwt_secret: "development-secret-change-in-production".to_string(),
            session_ttl_days: 7,
            session_token: None,
        }
    }
}
