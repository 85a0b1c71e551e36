//! Tracking sessions.
//!
//! [`LocationTracker`] is either inactive or running exactly one
//! [`TrackingSession`]. While active it pumps [`ProviderEvent`]s from the fix
//! provider, pins the first fix of the session, and spawns one resolution
//! task per fix. A finished resolution reaches the [`DisplaySink`] only if
//! its session is still the active one and no newer fix of that session has
//! been shown yet; everything else is dropped as stale. The check and the
//! `show` call happen under the state lock, so once [`LocationTracker::stop`]
//! returns nothing from the old session can be displayed.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::display::DisplaySink;
use crate::fix::GeoFix;
use crate::geocoder::Geocoder;
use crate::provider::{FixProvider, ProviderEvent};
use crate::resolver::AddressResolver;

/// Provider events buffered between the provider task and the pump.
const EVENT_BUFFER: usize = 32;

/// State of one start..stop span.
#[derive(Debug, Clone)]
pub struct TrackingSession {
    id: u64,
    first_fix: Option<GeoFix>,
    /// Fixes received so far; also the sequence number of the latest one.
    fixes: u64,
    /// Sequence number of the last result shown.
    shown: u64,
}

impl TrackingSession {
    fn new(id: u64) -> Self {
        Self {
            id,
            first_fix: None,
            fixes: 0,
            shown: 0,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// The baseline for distance, absent until the session's first fix.
    pub fn first_fix(&self) -> Option<GeoFix> {
        self.first_fix
    }

    pub fn fixes(&self) -> u64 {
        self.fixes
    }
}

/// Identifies which session and which fix a resolution belongs to.
#[derive(Debug, Clone, Copy)]
struct Ticket {
    session: u64,
    seq: u64,
}

#[derive(Default)]
struct TrackerState {
    session: Option<TrackingSession>,
    sessions_started: u64,
    pump: Option<JoinHandle<()>>,
}

struct Inner<P, G, S> {
    provider: P,
    resolver: AddressResolver<G>,
    sink: S,
    state: Mutex<TrackerState>,
}

/// Cloneable handle to the tracker; clones share one state.
pub struct LocationTracker<P, G, S> {
    inner: Arc<Inner<P, G, S>>,
}

impl<P, G, S> Clone for LocationTracker<P, G, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P, G, S> LocationTracker<P, G, S>
where
    P: FixProvider,
    G: Geocoder,
    S: DisplaySink,
{
    /// New tracker, initially inactive.
    pub fn new(provider: P, resolver: AddressResolver<G>, sink: S) -> Self {
        Self {
            inner: Arc::new(Inner {
                provider,
                resolver,
                sink,
                state: Mutex::new(TrackerState::default()),
            }),
        }
    }

    /// Begin a new session and subscribe to the provider. No-op when active.
    pub async fn start(&self) -> Result<(), String> {
        let mut state = self.inner.state.lock().await;
        if state.session.is_some() {
            debug!("Tracker: start ignored, already active");
            return Ok(());
        }

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        self.inner.provider.subscribe(tx)?;

        state.sessions_started += 1;
        let id = state.sessions_started;
        state.session = Some(TrackingSession::new(id));
        state.pump = Some(tokio::spawn(pump(self.clone(), rx)));

        self.inner.sink.show(&self.inner.resolver.messages().loading);
        info!("Tracker: session {id} started");
        Ok(())
    }

    /// End the session and unsubscribe. No-op when inactive.
    ///
    /// Returns once the provider has released its source, so a following
    /// [`start`](Self::start) never overlaps the previous provider task.
    pub async fn stop(&self) {
        let mut state = self.inner.state.lock().await;
        let Some(session) = state.session.take() else {
            debug!("Tracker: stop ignored, not active");
            return;
        };
        if let Some(pump) = state.pump.take() {
            pump.abort();
        }
        self.inner.provider.unsubscribe().await;

        self.inner.sink.show(&self.inner.resolver.messages().idle_hint);
        info!(
            "Tracker: session {} stopped after {} fixes",
            session.id, session.fixes
        );
    }

    /// Start when inactive, stop when active. Returns the new active state.
    pub async fn toggle(&self) -> Result<bool, String> {
        if self.is_active().await {
            self.stop().await;
            Ok(false)
        } else {
            self.start().await?;
            Ok(true)
        }
    }

    /// Record a fix and spawn its resolution.
    ///
    /// Returns the resolution task, or `None` when no session is active.
    pub async fn on_fix(&self, fix: GeoFix) -> Option<JoinHandle<()>> {
        let mut state = self.inner.state.lock().await;
        let Some(session) = state.session.as_mut() else {
            debug!("Tracker: fix ignored, not active");
            return None;
        };

        let first = *session.first_fix.get_or_insert(fix);
        session.fixes += 1;
        let ticket = Ticket {
            session: session.id,
            seq: session.fixes,
        };
        drop(state);

        debug!(
            "Tracker: fix #{} {:.6},{:.6} (session {})",
            ticket.seq, fix.latitude, fix.longitude, ticket.session
        );

        let tracker = self.clone();
        Some(tokio::spawn(async move {
            let text = tracker.inner.resolver.resolve_text(first, fix).await;
            tracker.deliver(ticket, &text).await;
        }))
    }

    /// Surface provider availability as a notification.
    pub fn on_availability(&self, available: bool) {
        let messages = self.inner.resolver.messages();
        let text = if available {
            &messages.location_available
        } else {
            &messages.location_unavailable
        };
        info!("Tracker: location available = {available}");
        self.inner.sink.notify(text);
    }

    pub async fn is_active(&self) -> bool {
        self.inner.state.lock().await.session.is_some()
    }

    /// Snapshot of the active session, if any.
    pub async fn session(&self) -> Option<TrackingSession> {
        self.inner.state.lock().await.session.clone()
    }

    pub async fn first_fix(&self) -> Option<GeoFix> {
        self.session().await.and_then(|s| s.first_fix)
    }

    async fn deliver(&self, ticket: Ticket, text: &str) {
        let mut state = self.inner.state.lock().await;
        match state.session.as_mut() {
            Some(session) if session.id == ticket.session && ticket.seq > session.shown => {
                session.shown = ticket.seq;
                self.inner.sink.show(text);
            }
            Some(session) if session.id == ticket.session => {
                debug!(
                    "Tracker: dropping result for fix #{}, #{} already shown",
                    ticket.seq, session.shown
                );
            }
            _ => debug!(
                "Tracker: dropping result from ended session {}",
                ticket.session
            ),
        }
    }
}

/// Routes provider events into the tracker until the channel closes or the
/// task is aborted by [`LocationTracker::stop`].
async fn pump<P, G, S>(tracker: LocationTracker<P, G, S>, mut rx: mpsc::Receiver<ProviderEvent>)
where
    P: FixProvider,
    G: Geocoder,
    S: DisplaySink,
{
    while let Some(event) = rx.recv().await {
        match event {
            ProviderEvent::Fix(fix) => {
                tracker.on_fix(fix).await;
            }
            ProviderEvent::Availability(available) => tracker.on_availability(available),
        }
    }
    debug!("Tracker: provider channel closed");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::sync::Semaphore;

    use super::*;
    use crate::config::Messages;
    use crate::geocoder::{Address, GeocodeError};

    /// Provider whose events are pushed by the test.
    #[derive(Default)]
    struct ManualProvider {
        tx: std::sync::Mutex<Option<mpsc::Sender<ProviderEvent>>>,
        subscribes: AtomicUsize,
        unsubscribes: AtomicUsize,
    }

    impl FixProvider for Arc<ManualProvider> {
        fn subscribe(&self, events: mpsc::Sender<ProviderEvent>) -> Result<(), String> {
            self.subscribes.fetch_add(1, Ordering::SeqCst);
            *self.tx.lock().unwrap() = Some(events);
            Ok(())
        }

        async fn unsubscribe(&self) {
            self.unsubscribes.fetch_add(1, Ordering::SeqCst);
            self.tx.lock().unwrap().take();
        }
    }

    /// Geocoder that answers with a canned result; lookups for `gated_lat`
    /// block until the test adds a permit to `gate`.
    struct TestGeocoder {
        result: Result<Vec<Address>, GeocodeError>,
        gated_lat: Option<f64>,
        gate: Semaphore,
    }

    impl TestGeocoder {
        fn answering(result: Result<Vec<Address>, GeocodeError>) -> Self {
            Self {
                result,
                gated_lat: None,
                gate: Semaphore::new(0),
            }
        }

        fn gated(lat: f64) -> Self {
            Self {
                gated_lat: Some(lat),
                ..Self::answering(Ok(vec![Address::new(["Gated"])]))
            }
        }
    }

    impl Geocoder for TestGeocoder {
        async fn reverse_geocode(
            &self,
            latitude: f64,
            longitude: f64,
            _max_results: usize,
        ) -> Result<Vec<Address>, GeocodeError> {
            if self.gated_lat.is_some_and(|lat| (lat - latitude).abs() < 1e-12) {
                self.gate.acquire().await.unwrap().forget();
            }
            self.result.clone().map(|mut addrs| {
                for a in &mut addrs {
                    a.lines.push(format!("@{latitude},{longitude}"));
                }
                addrs
            })
        }
    }

    #[derive(Clone, Default)]
    struct RecordingSink {
        shown: Arc<std::sync::Mutex<Vec<String>>>,
        notes: Arc<std::sync::Mutex<Vec<String>>>,
    }

    impl RecordingSink {
        fn shown(&self) -> Vec<String> {
            self.shown.lock().unwrap().clone()
        }
    }

    impl DisplaySink for RecordingSink {
        fn show(&self, text: &str) {
            self.shown.lock().unwrap().push(text.to_string());
        }

        fn notify(&self, text: &str) {
            self.notes.lock().unwrap().push(text.to_string());
        }
    }

    type TestTracker = LocationTracker<Arc<ManualProvider>, TestGeocoder, RecordingSink>;

    fn tracker_with(geocoder: TestGeocoder) -> (TestTracker, Arc<ManualProvider>, RecordingSink) {
        let (tracker, provider, sink, _) = gated_tracker(geocoder);
        (tracker, provider, sink)
    }

    fn gated_tracker(
        geocoder: TestGeocoder,
    ) -> (TestTracker, Arc<ManualProvider>, RecordingSink, Arc<TestGeocoder>) {
        let provider = Arc::new(ManualProvider::default());
        let sink = RecordingSink::default();
        let geocoder = Arc::new(geocoder);
        let resolver = AddressResolver::new(Arc::clone(&geocoder), Messages::default());
        let tracker = LocationTracker::new(Arc::clone(&provider), resolver, sink.clone());
        (tracker, provider, sink, geocoder)
    }

    fn taipei_tracker() -> (TestTracker, Arc<ManualProvider>, RecordingSink) {
        tracker_with(TestGeocoder::answering(Ok(vec![Address::new([
            "No. 1, Sec 1, Some Rd",
            "Taipei City",
        ])])))
    }

    fn fix(lat: f64, lon: f64) -> GeoFix {
        GeoFix {
            latitude: lat,
            longitude: lon,
            recorded_at: 0,
        }
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_initially_inactive_and_ignores_fixes() {
        let (tracker, _, sink) = taipei_tracker();
        assert!(!tracker.is_active().await);
        assert!(tracker.on_fix(fix(1.0, 1.0)).await.is_none());
        assert!(tracker.first_fix().await.is_none());
        assert!(sink.shown().is_empty());
    }

    #[tokio::test]
    async fn test_start_twice_is_idempotent() {
        let (tracker, provider, sink) = taipei_tracker();
        tracker.start().await.unwrap();
        let a = fix(25.0330, 121.5654);
        tracker.on_fix(a).await.unwrap().await.unwrap();

        tracker.start().await.unwrap();
        assert_eq!(tracker.first_fix().await, Some(a));
        assert_eq!(provider.subscribes.load(Ordering::SeqCst), 1);
        let loading = Messages::default().loading;
        assert_eq!(sink.shown().iter().filter(|t| **t == loading).count(), 1);
    }

    #[tokio::test]
    async fn test_first_fix_is_pinned() {
        let (tracker, _, sink) = taipei_tracker();
        tracker.start().await.unwrap();
        let a = fix(25.0330, 121.5654);
        let b = fix(25.0340, 121.5664);

        tracker.on_fix(a).await.unwrap().await.unwrap();
        assert_eq!(tracker.first_fix().await, Some(a));
        tracker.on_fix(b).await.unwrap().await.unwrap();
        assert_eq!(tracker.first_fix().await, Some(a));

        let last = sink.shown().pop().unwrap();
        let expected = format!(
            "No. 1, Sec 1, Some Rd\nTaipei City\n@25.034,121.5664\nDistance from first location: {:.4}",
            a.distance_to(&b)
        );
        assert_eq!(last, expected);
    }

    #[tokio::test]
    async fn test_restart_resets_first_fix() {
        let (tracker, provider, _) = taipei_tracker();
        tracker.start().await.unwrap();
        tracker.on_fix(fix(1.0, 1.0)).await.unwrap().await.unwrap();
        tracker.stop().await;
        assert!(!tracker.is_active().await);
        assert_eq!(provider.unsubscribes.load(Ordering::SeqCst), 1);

        tracker.start().await.unwrap();
        assert!(tracker.first_fix().await.is_none());
        let c = fix(2.0, 2.0);
        tracker.on_fix(c).await.unwrap().await.unwrap();
        assert_eq!(tracker.first_fix().await, Some(c));
        assert_eq!(tracker.session().await.unwrap().id(), 2);
    }

    #[tokio::test]
    async fn test_stop_twice_is_noop() {
        let (tracker, provider, sink) = taipei_tracker();
        tracker.stop().await;
        assert!(sink.shown().is_empty());
        tracker.start().await.unwrap();
        tracker.stop().await;
        tracker.stop().await;
        assert_eq!(provider.unsubscribes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_result_after_stop_is_discarded() {
        let (tracker, _, sink, geocoder) = gated_tracker(TestGeocoder::gated(10.0));
        tracker.start().await.unwrap();
        let pending = tracker.on_fix(fix(10.0, 10.0)).await.unwrap();
        tracker.stop().await;

        geocoder.gate.add_permits(1);
        pending.await.unwrap();

        assert!(sink.shown().iter().all(|t| !t.contains("Gated")));
    }

    #[tokio::test]
    async fn test_result_from_previous_session_is_discarded() {
        let (tracker, _, sink, geocoder) = gated_tracker(TestGeocoder::gated(10.0));
        tracker.start().await.unwrap();
        let pending = tracker.on_fix(fix(10.0, 10.0)).await.unwrap();
        tracker.stop().await;
        tracker.start().await.unwrap();

        geocoder.gate.add_permits(1);
        pending.await.unwrap();

        assert!(sink.shown().iter().all(|t| !t.contains("Gated")));
    }

    #[tokio::test]
    async fn test_late_result_for_older_fix_is_dropped() {
        let (tracker, _, sink, geocoder) = gated_tracker(TestGeocoder::gated(10.0));
        tracker.start().await.unwrap();
        let slow = tracker.on_fix(fix(10.0, 10.0)).await.unwrap();
        let fast = tracker.on_fix(fix(11.0, 11.0)).await.unwrap();
        fast.await.unwrap();

        geocoder.gate.add_permits(1);
        slow.await.unwrap();

        let shown = sink.shown();
        assert!(shown.last().unwrap().contains("@11,11"));
        assert!(shown.iter().all(|t| !t.contains("@10,10")));
    }

    #[tokio::test]
    async fn test_geocoder_io_error_shows_no_network_message() {
        let (tracker, _, sink) = tracker_with(TestGeocoder::answering(Err(GeocodeError::Io(
            "connection reset".into(),
        ))));
        tracker.start().await.unwrap();
        tracker.on_fix(fix(1.0, 1.0)).await.unwrap().await.unwrap();

        assert_eq!(
            sink.shown().last().unwrap(),
            &Messages::default().service_not_available
        );
        assert!(tracker.is_active().await);
    }

    #[tokio::test]
    async fn test_invalid_coordinates_message_keeps_session_running() {
        let (tracker, _, sink) = tracker_with(TestGeocoder::answering(Err(
            GeocodeError::InvalidArgument("latitude 95 out of range".into()),
        )));
        tracker.start().await.unwrap();
        tracker.on_fix(fix(95.0, 10.0)).await.unwrap().await.unwrap();

        assert_eq!(
            sink.shown().last().unwrap(),
            &format!(
                "{}. Latitude = 95, Longitude = 10",
                Messages::default().invalid_lat_long_used
            )
        );
        assert!(tracker.is_active().await);
        assert_eq!(tracker.session().await.unwrap().fixes(), 1);
    }

    #[tokio::test]
    async fn test_empty_geocoder_result_shows_no_address_message() {
        let (tracker, _, sink) = tracker_with(TestGeocoder::answering(Ok(Vec::new())));
        tracker.start().await.unwrap();
        tracker.on_fix(fix(1.0, 1.0)).await.unwrap().await.unwrap();

        assert_eq!(
            sink.shown().last().unwrap(),
            &Messages::default().no_address_found
        );
        assert!(tracker.is_active().await);
    }

    #[tokio::test]
    async fn test_pump_routes_provider_events() {
        let (tracker, provider, sink) = taipei_tracker();
        tracker.start().await.unwrap();
        let tx = provider.tx.lock().unwrap().clone().unwrap();

        tx.send(ProviderEvent::Availability(true)).await.unwrap();
        tx.send(ProviderEvent::Fix(fix(25.0330, 121.5654))).await.unwrap();
        settle().await;

        assert_eq!(
            sink.notes.lock().unwrap().as_slice(),
            &[Messages::default().location_available]
        );
        assert!(tracker.first_fix().await.is_some());
        assert!(sink.shown().last().unwrap().contains("Taipei City"));
    }

    #[tokio::test]
    async fn test_toggle() {
        let (tracker, _, sink) = taipei_tracker();
        assert!(tracker.toggle().await.unwrap());
        assert!(!tracker.toggle().await.unwrap());
        assert_eq!(
            sink.shown(),
            vec![Messages::default().loading, Messages::default().idle_hint]
        );
    }
}
