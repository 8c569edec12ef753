pub mod token;

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use uuid::Uuid;

use crate::{
    config::Config,
    db::Database,
    error::{AppError, Result},
};

pub const MIN_PASSWORD_LEN: usize = 6;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthUser {
    pub id: String,
    pub email: String,
}

/// Who is signed in right now. Repositories only ever need this much.
pub trait Identity: Send + Sync {
    fn current_user(&self) -> Option<AuthUser>;
}

#[derive(Clone, Debug)]
pub struct Session {
    pub user: AuthUser,
    pub token: String,
}

#[derive(Clone)]
pub struct AuthGateway {
    db: Database,
    config: Config,
    session: Arc<watch::Sender<Option<Session>>>,
    logged_in: Arc<watch::Sender<bool>>,
}

impl AuthGateway {
    pub fn new(db: Database, config: Config) -> Self {
        let (session, _) = watch::channel(None);
        let (logged_in, _) = watch::channel(false);
        Self {
            db,
            config,
            session: Arc::new(session),
            logged_in: Arc::new(logged_in),
        }
    }

    pub async fn sign_up(&self, email: &str, password: &str) -> Result<AuthUser> {
        let email = normalize_email(email);
        if email.is_empty() || !email.contains('@') {
            return Err(AppError::Validation("Invalid email address".to_string()));
        }
        if password.len() < MIN_PASSWORD_LEN {
            return Err(AppError::Validation(format!(
                "Password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }

        let existing = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM accounts WHERE email = ?")
            .bind(&email)
            .fetch_one(&self.db.pool)
            .await?;

        if existing > 0 {
            return Err(AppError::Validation("Email already registered".to_string()));
        }

        let password_hash = token::hash_password(password)?;
        let user_id = Uuid::new_v4().to_string();

        sqlx::query("INSERT INTO accounts (id, email, password_hash, created_at) VALUES (?, ?, ?, ?)")
            .bind(&user_id)
            .bind(&email)
            .bind(&password_hash)
            .bind(Utc::now().to_rfc3339())
            .execute(&self.db.pool)
            .await?;

        tracing::info!(%user_id, "Sign up successful");
        self.start_session(AuthUser { id: user_id, email })
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<AuthUser> {
        let email = normalize_email(email);

        let (user_id, password_hash) = sqlx::query_as::<_, (String, String)>(
            "SELECT id, password_hash FROM accounts WHERE email = ?",
        )
        .bind(&email)
        .fetch_optional(&self.db.pool)
        .await?
        .ok_or(AppError::Unauthenticated)?;

        if !token::verify_password(password, &password_hash)? {
            tracing::warn!(%user_id, "Sign in rejected");
            return Err(AppError::Unauthenticated);
        }

        tracing::info!(%user_id, "Sign in successful");
        self.start_session(AuthUser { id: user_id, email })
    }

    /// Re-establish a session from a token issued by an earlier sign-in.
    pub async fn restore_session(&self, token: &str) -> Result<AuthUser> {
        let claims = token::verify_token(token, &self.config.jwt_secret)?;

        // The account may have been removed since the token was issued
        let email = sqlx::query_scalar::<_, String>("SELECT email FROM accounts WHERE id = ?")
            .bind(&claims.sub)
            .fetch_optional(&self.db.pool)
            .await?
            .ok_or(AppError::Unauthenticated)?;

        let user = AuthUser {
            id: claims.sub,
            email,
        };
        self.publish(Some(Session {
            user: user.clone(),
            token: token.to_string(),
        }));
        tracing::info!(user_id = %user.id, "Session restored");
        Ok(user)
    }

    pub fn sign_out(&self) {
        if let Some(session) = self.publish(None) {
            tracing::info!(user_id = %session.user.id, "Signed out");
        }
    }

    pub fn is_logged_in(&self) -> bool {
        self.session.borrow().is_some()
    }

    pub fn session_token(&self) -> Option<String> {
        self.session.borrow().as_ref().map(|s| s.token.clone())
    }

    /// Logged-in state. Only sign-in and sign-out transitions notify.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.logged_in.subscribe()
    }

    /// Replace the session and return the previous one.
    fn publish(&self, session: Option<Session>) -> Option<Session> {
        let now = session.is_some();
        let previous = self.session.send_replace(session);
        self.logged_in.send_if_modified(|logged_in| {
            let changed = *logged_in != now;
            *logged_in = now;
            changed
        });
        previous
    }

    fn start_session(&self, user: AuthUser) -> Result<AuthUser> {
        let token = token::create_token(
            &user.id,
            &user.email,
            &self.config.jwt_secret,
            self.config.session_ttl_days,
        )?;
        self.publish(Some(Session {
            user: user.clone(),
            token,
        }));
        Ok(user)
    }
}

impl Identity for AuthGateway {
    fn current_user(&self) -> Option<AuthUser> {
        self.session.borrow().as_ref().map(|s| s.user.clone())
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn gateway() -> (AuthGateway, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}/auth.db?mode=rwc", dir.path().display());
        let db = Database::connect(&url).await.unwrap();
        db.run_migrations().await.unwrap();
        (AuthGateway::new(db, Config::for_database(url)), dir)
    }

    #[tokio::test]
    async fn sign_up_signs_in_and_publishes() {
        let (auth, _dir) = gateway().await;
        let mut rx = auth.subscribe();
        assert!(!auth.is_logged_in());

        let user = auth.sign_up("Rider@Example.com", "secret1").await.unwrap();
        assert_eq!(user.email, "rider@example.com");
        assert!(auth.is_logged_in());
        assert!(rx.has_changed().unwrap());
        assert!(*rx.borrow_and_update());
        assert_eq!(auth.current_user().map(|u| u.id), Some(user.id.clone()));

        // Signing in again while signed in is not a transition
        auth.sign_in("rider@example.com", "secret1").await.unwrap();
        assert!(!rx.has_changed().unwrap());

        auth.sign_out();
        assert!(rx.has_changed().unwrap());
        assert!(!*rx.borrow_and_update());
        assert!(!auth.is_logged_in());
        assert!(auth.current_user().is_none());
    }

    #[tokio::test]
    async fn sign_up_validates_input() {
        let (auth, _dir) = gateway().await;
        assert!(matches!(
            auth.sign_up("no-at-sign", "secret1").await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            auth.sign_up("a@b.com", "short").await,
            Err(AppError::Validation(_))
        ));

        auth.sign_up("a@b.com", "secret1").await.unwrap();
        assert!(matches!(
            auth.sign_up("a@b.com", "secret2").await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn sign_in_checks_password() {
        let (auth, _dir) = gateway().await;
        let created = auth.sign_up("a@b.com", "secret1").await.unwrap();
        auth.sign_out();

        assert!(matches!(
            auth.sign_in("a@b.com", "wrong-pass").await,
            Err(AppError::Unauthenticated)
        ));
        assert!(matches!(
            auth.sign_in("nobody@b.com", "secret1").await,
            Err(AppError::Unauthenticated)
        ));
        assert!(!auth.is_logged_in());

        let user = auth.sign_in("a@b.com", "secret1").await.unwrap();
        assert_eq!(user, created);
    }

    #[tokio::test]
    async fn restores_session_from_token() {
        let (auth, _dir) = gateway().await;
        let user = auth.sign_up("a@b.com", "secret1").await.unwrap();
        let token = auth.session_token().unwrap();
        auth.sign_out();

        let restored = auth.restore_session(&token).await.unwrap();
        assert_eq!(restored, user);
        assert!(auth.is_logged_in());

        assert!(matches!(
            auth.restore_session("garbage").await,
            Err(AppError::Unauthenticated)
        ));
    }
}
