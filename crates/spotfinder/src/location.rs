// Wraps a device positioning service and republishes what it reports.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use tokio::sync::watch;

use crate::db::models::Coordinate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationStatus {
    NotDetermined,
    Denied,
    AuthorizedWhenInUse,
    AuthorizedAlways,
}

impl AuthorizationStatus {
    pub fn is_authorized(self) -> bool {
        matches!(
            self,
            AuthorizationStatus::AuthorizedWhenInUse | AuthorizationStatus::AuthorizedAlways
        )
    }
}

/// The native positioning service. Results come back through
/// [`LocationManager::on_location`] and friends.
pub trait LocationSource: Send + Sync {
    fn authorization_status(&self) -> AuthorizationStatus;
    fn request_authorization(&self);
    fn start_updating(&self);
    fn stop_updating(&self);
    /// Ask for a single fix.
    fn request_location(&self);
}

pub struct LocationManager<S> {
    source: S,
    location: watch::Sender<Option<Coordinate>>,
    status: watch::Sender<AuthorizationStatus>,
}

impl<S: LocationSource> LocationManager<S> {
    pub fn new(source: S) -> Self {
        let (location, _) = watch::channel(None);
        let (status, _) = watch::channel(source.authorization_status());
        Self {
            source,
            location,
            status,
        }
    }

    pub fn location(&self) -> Option<Coordinate> {
        *self.location.borrow()
    }

    pub fn authorization_status(&self) -> AuthorizationStatus {
        *self.status.borrow()
    }

    pub fn subscribe_location(&self) -> watch::Receiver<Option<Coordinate>> {
        self.location.subscribe()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<AuthorizationStatus> {
        self.status.subscribe()
    }

    pub fn request_permission(&self) {
        self.source.request_authorization();
    }

    pub fn start_updates(&self) {
        if !self.source.authorization_status().is_authorized() {
            self.request_permission();
            return;
        }
        self.begin();
    }

    pub fn stop_updates(&self) {
        self.source.stop_updating();
    }

    pub fn on_location(&self, coordinate: Coordinate) {
        if !coordinate.is_valid() {
            tracing::warn!(?coordinate, "Ignoring invalid location fix");
            return;
        }
        self.location.send_replace(Some(coordinate));
    }

    pub fn on_authorization_change(&self, status: AuthorizationStatus) {
        self.status.send_replace(status);
        if status.is_authorized() {
            self.begin();
        }
    }

    pub fn on_error(&self, message: &str) {
        tracing::warn!(%message, "Location error");
    }

    fn begin(&self) {
        self.source.start_updating();
        if self.location.borrow().is_none() {
            self.source.request_location();
        }
    }
}

/// A positioning source driven by hand, for headless runs and tests.
#[derive(Clone)]
pub struct ManualLocationSource {
    status: Arc<watch::Sender<AuthorizationStatus>>,
    grant_on_request: bool,
    pub authorization_requests: Arc<AtomicUsize>,
    pub starts: Arc<AtomicUsize>,
    pub stops: Arc<AtomicUsize>,
    pub fix_requests: Arc<AtomicUsize>,
}

impl ManualLocationSource {
    pub fn new(status: AuthorizationStatus) -> Self {
        let (status, _) = watch::channel(status);
        Self {
            status: Arc::new(status),
            grant_on_request: false,
            authorization_requests: Arc::new(AtomicUsize::new(0)),
            starts: Arc::new(AtomicUsize::new(0)),
            stops: Arc::new(AtomicUsize::new(0)),
            fix_requests: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Grant when-in-use permission as soon as it is requested.
    pub fn granting(mut self) -> Self {
        self.grant_on_request = true;
        self
    }

    pub fn set_status(&self, status: AuthorizationStatus) {
        self.status.send_replace(status);
    }
}

impl LocationSource for ManualLocationSource {
    fn authorization_status(&self) -> AuthorizationStatus {
        *self.status.borrow()
    }

    fn request_authorization(&self) {
        self.authorization_requests.fetch_add(1, Ordering::SeqCst);
        if self.grant_on_request {
            self.set_status(AuthorizationStatus::AuthorizedWhenInUse);
        }
    }

    fn start_updating(&self) {
        self.starts.fetch_add(1, Ordering::SeqCst);
    }

    fn stop_updating(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }

    fn request_location(&self) {
        self.fix_requests.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_without_permission_requests_it() {
        let source = ManualLocationSource::new(AuthorizationStatus::NotDetermined);
        let manager = LocationManager::new(source.clone());

        manager.start_updates();
        assert_eq!(source.authorization_requests.load(Ordering::SeqCst), 1);
        assert_eq!(source.starts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn authorization_change_starts_updates_and_asks_for_fix() {
        let source = ManualLocationSource::new(AuthorizationStatus::NotDetermined);
        let manager = LocationManager::new(source.clone());
        let status = manager.subscribe_status();

        manager.on_authorization_change(AuthorizationStatus::AuthorizedWhenInUse);
        assert_eq!(*status.borrow(), AuthorizationStatus::AuthorizedWhenInUse);
        assert_eq!(source.starts.load(Ordering::SeqCst), 1);
        assert_eq!(source.fix_requests.load(Ordering::SeqCst), 1);

        // Already have a fix, so no one-shot request this time
        source.set_status(AuthorizationStatus::AuthorizedWhenInUse);
        manager.on_location(Coordinate::new(37.77, -122.42));
        manager.start_updates();
        assert_eq!(source.starts.load(Ordering::SeqCst), 2);
        assert_eq!(source.fix_requests.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn publishes_valid_fixes_only() {
        let source = ManualLocationSource::new(AuthorizationStatus::AuthorizedAlways);
        let manager = LocationManager::new(source);
        let rx = manager.subscribe_location();

        manager.on_location(Coordinate::new(120.0, 0.0));
        assert!(manager.location().is_none());

        manager.on_location(Coordinate::new(37.77, -122.42));
        assert_eq!(*rx.borrow(), Some(Coordinate::new(37.77, -122.42)));
    }

    #[test]
    fn denied_is_not_authorized() {
        assert!(!AuthorizationStatus::Denied.is_authorized());
        assert!(!AuthorizationStatus::NotDetermined.is_authorized());
        assert!(AuthorizationStatus::AuthorizedAlways.is_authorized());
    }
}
