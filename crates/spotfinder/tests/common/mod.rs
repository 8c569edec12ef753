#![allow(dead_code)]

use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::{mpsc, watch};

use spotfinder::{
    store::{CollectionPath, DocumentPath, DocumentSnapshot, Query, Subscription},
    AppError, AuthUser, CommentService, Database, DocumentStore, Identity, Result, SpotService,
    SqliteStore,
};

/// Wraps the SQLite store, counts every call that would hit the network and
/// can be switched into a failing mode.
pub struct CountingStore {
    inner: SqliteStore,
    calls: AtomicUsize,
    subscriptions: AtomicUsize,
    live: Arc<AtomicUsize>,
    failing: Arc<AtomicBool>,
}

fn unavailable() -> AppError {
    AppError::Internal("store unavailable".to_string())
}

/// Held by a forwarding task for as long as it runs.
struct LiveSubscription(Arc<AtomicUsize>);

impl Drop for LiveSubscription {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl CountingStore {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn subscriptions(&self) -> usize {
        self.subscriptions.load(Ordering::SeqCst)
    }

    /// Subscriptions whose listener is still running.
    pub fn live_subscriptions(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// While set, calls fail and open listeners deliver errors.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// The wrapped store, for writes that bypass counting and failures.
    pub fn inner(&self) -> &SqliteStore {
        &self.inner
    }

    fn hit(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for CountingStore {
    async fn add_document(&self, collection: &CollectionPath, data: Value) -> Result<String> {
        self.hit()?;
        self.inner.add_document(collection, data).await
    }

    async fn get_document(&self, doc: &DocumentPath) -> Result<Option<DocumentSnapshot>> {
        self.hit()?;
        self.inner.get_document(doc).await
    }

    async fn create_if_absent(&self, doc: &DocumentPath, data: Value) -> Result<DocumentSnapshot> {
        self.hit()?;
        self.inner.create_if_absent(doc, data).await
    }

    async fn update_fields(&self, doc: &DocumentPath, fields: Map<String, Value>) -> Result<()> {
        self.hit()?;
        self.inner.update_fields(doc, fields).await
    }

    async fn delete_document(&self, doc: &DocumentPath) -> Result<()> {
        self.hit()?;
        self.inner.delete_document(doc).await
    }

    async fn query(&self, query: &Query) -> Result<Vec<DocumentSnapshot>> {
        self.hit()?;
        self.inner.query(query).await
    }

    async fn subscribe(&self, query: Query) -> Result<Subscription> {
        self.hit()?;
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        let mut upstream = self.inner.subscribe(query).await?;

        self.live.fetch_add(1, Ordering::SeqCst);
        let live = LiveSubscription(Arc::clone(&self.live));
        let failing = Arc::clone(&self.failing);
        let (tx, rx) = mpsc::channel(16);
        let task = tokio::spawn(async move {
            let _live = live;
            while let Some(delivery) = upstream.next_snapshot().await {
                let delivery = if failing.load(Ordering::SeqCst) {
                    Err(unavailable())
                } else {
                    delivery
                };
                if tx.send(delivery).await.is_err() {
                    break;
                }
            }
        });

        Ok(Subscription::new(rx, task))
    }
}

/// Stand-in for the auth gateway; tests pick who is signed in.
#[derive(Default)]
pub struct TestIdentity {
    user: Mutex<Option<AuthUser>>,
}

impl TestIdentity {
    pub fn sign_in_as(&self, id: &str, email: &str) {
        *self.user.lock().unwrap() = Some(AuthUser {
            id: id.to_string(),
            email: email.to_string(),
        });
    }

    pub fn sign_out(&self) {
        *self.user.lock().unwrap() = None;
    }
}

impl Identity for TestIdentity {
    fn current_user(&self) -> Option<AuthUser> {
        self.user.lock().unwrap().clone()
    }
}

pub struct TestEnv {
    pub store: Arc<CountingStore>,
    pub identity: Arc<TestIdentity>,
    pub spots: SpotService,
    pub comments: CommentService,
    _dir: tempfile::TempDir,
}

impl TestEnv {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}/spotfinder.db?mode=rwc", dir.path().display());
        let db = Database::connect(&url).await.unwrap();
        db.run_migrations().await.unwrap();

        let store = Arc::new(CountingStore {
            inner: SqliteStore::new(db),
            calls: AtomicUsize::new(0),
            subscriptions: AtomicUsize::new(0),
            live: Arc::new(AtomicUsize::new(0)),
            failing: Arc::new(AtomicBool::new(false)),
        });
        let identity = Arc::new(TestIdentity::default());

        let spots = SpotService::new(store.clone(), identity.clone());
        let comments = CommentService::new(store.clone(), identity.clone());

        Self {
            store,
            identity,
            spots,
            comments,
            _dir: dir,
        }
    }
}

/// Wait until the watched value satisfies `pred` and return it.
pub async fn wait_for<T: Clone>(rx: &mut watch::Receiver<T>, pred: impl Fn(&T) -> bool) -> T {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            {
                let value = rx.borrow_and_update();
                if pred(&value) {
                    return value.clone();
                }
            }
            rx.changed().await.expect("publisher dropped");
        }
    })
    .await
    .expect("timed out waiting for snapshot")
}
