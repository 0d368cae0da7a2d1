use std::sync::Arc;

use chrono::Local;
use futures::StreamExt;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::agents::client::{PushAck, RegistryClient};
use crate::agents::position::{PositionSource, WatchOptions};
use crate::agents::renderer::MapRenderer;
use crate::models::error::TransportError;
use crate::models::location::PositionReport;
use crate::models::position::{accuracy_label, Position};
use crate::task::AutoCancelTask;

/// Zoom used when the map first centers on the vehicle.
pub const OWN_MARKER_ZOOM: u8 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SharingState {
    Idle,
    Active,
    /// Last push or fix failed; cleared by the next successful push.
    ErrorReporting,
}

/// What the driver sees on their dashboard.
#[derive(Debug, Clone, PartialEq)]
pub struct PublisherStatus {
    pub state: SharingState,
    pub sharing_label: String,
    pub message: String,
    pub last_sent: Option<String>,
    pub updates_count: u64,
    pub accuracy: Option<String>,
}

impl Default for PublisherStatus {
    fn default() -> Self {
        Self {
            state: SharingState::Idle,
            sharing_label: "Inactive".to_string(),
            message: String::new(),
            last_sent: None,
            updates_count: 0,
            accuracy: None,
        }
    }
}

struct PublisherInner<R: MapRenderer> {
    status: PublisherStatus,
    renderer: R,
    marker: Option<R::Marker>,
    /// Bumped on every start and stop; results from older sessions are dropped.
    session: u64,
    next_seq: u64,
    /// Highest push sequence whose position has been shown.
    shown_seq: u64,
}

impl<R: MapRenderer> PublisherInner<R> {
    fn record_push(
        &mut self,
        seq: u64,
        report: PositionReport,
        result: Result<PushAck, TransportError>,
    ) {
        match result {
            Ok(ack) => {
                debug!("Location accepted at {:?}", ack.timestamp);
                self.status.updates_count += 1;
                self.status.state = SharingState::Active;
                self.status.last_sent =
                    Some(format!("Last sent: {}", Local::now().format("%H:%M:%S")));

                if seq <= self.shown_seq {
                    debug!("Push {} finished after a newer one, keeping shown position", seq);
                    return;
                }
                self.shown_seq = seq;
                let at = Position::new(report.lat, report.lng);
                self.status.message = format!("Sharing: {}", at.display());
                self.status.accuracy = Some(accuracy_label(report.accuracy));
                self.show_position(at);
            }
            Err(e) => {
                warn!("Unable to send location: {}", e);
                self.status.state = SharingState::ErrorReporting;
                self.status.message = match e {
                    TransportError::Status { .. } => "Error sending location",
                    TransportError::Network(_) => "Connection error",
                }
                .to_string();
            }
        }
    }

    fn show_position(&mut self, at: Position) {
        match self.marker.as_mut() {
            Some(marker) => self.renderer.move_marker(marker, at),
            None => {
                let marker = self.renderer.create_marker("me", at, "You");
                self.marker = Some(marker);
                self.renderer.set_view(at, OWN_MARKER_ZOOM);
            }
        }
    }
}

/// Runs on a vehicle: watches the device position and pushes every change.
pub struct PublisherAgent<C, S, R: MapRenderer> {
    client: Arc<C>,
    source: S,
    options: WatchOptions,
    inner: Arc<Mutex<PublisherInner<R>>>,
    watch: Option<AutoCancelTask<()>>,
}

impl<C, S, R> PublisherAgent<C, S, R>
where
    C: RegistryClient,
    S: PositionSource,
    R: MapRenderer,
{
    pub fn new(client: Arc<C>, source: S, renderer: R) -> Self {
        Self::with_options(client, source, renderer, WatchOptions::default())
    }

    pub fn with_options(client: Arc<C>, source: S, renderer: R, options: WatchOptions) -> Self {
        Self {
            client,
            source,
            options,
            inner: Arc::new(Mutex::new(PublisherInner {
                status: PublisherStatus::default(),
                renderer,
                marker: None,
                session: 0,
                next_seq: 0,
                shown_seq: 0,
            })),
            watch: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.watch.is_some()
    }

    pub fn status(&self) -> PublisherStatus {
        self.inner.lock().status.clone()
    }

    pub fn with_renderer<T>(&self, f: impl FnOnce(&R) -> T) -> T {
        f(&self.inner.lock().renderer)
    }

    /// Subscribes to the position source. Every fix triggers exactly one push.
    pub fn start(&mut self) {
        if self.watch.is_some() {
            warn!("Location sharing already active");
            return;
        }

        let session = {
            let mut inner = self.inner.lock();
            inner.session += 1;
            inner.status.state = SharingState::Active;
            inner.status.sharing_label = "Active".to_string();
            inner.status.message = "Starting location sharing...".to_string();
            inner.session
        };

        let mut positions = self.source.watch(self.options);
        let client = self.client.clone();
        let inner = self.inner.clone();

        info!("Location sharing started");
        self.watch = Some(AutoCancelTask::spawn(async move {
            while let Some(event) = positions.next().await {
                match event {
                    Ok(fix) => {
                        let seq = {
                            let mut inner = inner.lock();
                            if inner.session != session {
                                return;
                            }
                            inner.next_seq += 1;
                            inner.next_seq
                        };
                        let report = fix.report();
                        tokio::spawn(push(client.clone(), inner.clone(), session, seq, report));
                    }
                    Err(e) => {
                        warn!("Position source error: {}", e);
                        let mut inner = inner.lock();
                        if inner.session != session {
                            return;
                        }
                        inner.status.state = SharingState::ErrorReporting;
                        inner.status.message = format!("Error: {}", e);
                    }
                }
            }
            debug!("Position source ended");
        }));
    }

    /// Cancels the subscription. Pushes already in flight complete but their
    /// results are ignored.
    pub fn stop(&mut self) {
        if self.watch.take().is_some() {
            info!("Location sharing stopped");
        }
        let mut inner = self.inner.lock();
        inner.session += 1;
        inner.status.state = SharingState::Idle;
        inner.status.sharing_label = "Inactive".to_string();
        inner.status.message = "Stopped sharing".to_string();
        inner.status.last_sent = None;
    }
}

async fn push<C, R>(
    client: Arc<C>,
    inner: Arc<Mutex<PublisherInner<R>>>,
    session: u64,
    seq: u64,
    report: PositionReport,
) where
    C: RegistryClient,
    R: MapRenderer,
{
    let result = client.push_location(&report).await;

    let mut inner = inner.lock();
    if inner.session != session {
        debug!("Discarding result of push {} from a stopped session", seq);
        return;
    }
    inner.record_push(seq, report, result);
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use reqwest::StatusCode;

    use super::*;
    use crate::agents::position::{ChannelPositionSource, PositionFix};
    use crate::agents::renderer::{MemoryRenderer, RenderOp};
    use crate::models::error::PollError;
    use crate::models::location::Snapshot;

    /// Records pushes; fails them while `reject` is set.
    #[derive(Default)]
    struct FakeClient {
        pushed: Mutex<Vec<PositionReport>>,
        reject: Mutex<bool>,
        delay: Mutex<Option<Duration>>,
        /// Extra delay for pushes reporting this latitude.
        slow_lat: Mutex<Option<(f64, Duration)>>,
    }

    #[async_trait]
    impl RegistryClient for FakeClient {
        async fn push_location(&self, report: &PositionReport) -> Result<PushAck, TransportError> {
            let delay = match *self.slow_lat.lock() {
                Some((lat, slow)) if lat == report.lat => Some(slow),
                _ => *self.delay.lock(),
            };
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.pushed.lock().push(*report);
            if *self.reject.lock() {
                return Err(TransportError::Status {
                    status: StatusCode::UNAUTHORIZED,
                    message: "Not authenticated".into(),
                });
            }
            Ok(PushAck::default())
        }

        async fn fetch_locations(&self) -> Result<Snapshot, PollError> {
            Err(PollError::EmptyResult)
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn each_fix_is_pushed_once_and_first_push_centers_map() {
        let client = Arc::new(FakeClient::default());
        let (source, feed) = ChannelPositionSource::new();
        let mut agent = PublisherAgent::new(client.clone(), source, MemoryRenderer::new());

        agent.start();
        assert_eq!(agent.status().message, "Starting location sharing...");
        assert_eq!(agent.status().sharing_label, "Active");

        feed.send_fix(PositionFix::new(15.3, 75.7, 8.0));
        settle().await;
        feed.send_fix(PositionFix::new(15.31, 75.71, 6.4));
        settle().await;

        assert_eq!(client.pushed.lock().len(), 2);
        let status = agent.status();
        assert_eq!(status.updates_count, 2);
        assert_eq!(status.message, "Sharing: 15.31000, 75.71000");
        assert_eq!(status.accuracy.as_deref(), Some("±6m"));
        assert!(status.last_sent.unwrap().starts_with("Last sent: "));

        agent.with_renderer(|map| {
            assert_eq!(map.markers.len(), 1);
            assert_eq!(map.count(|op| matches!(op, RenderOp::SetView(_, OWN_MARKER_ZOOM))), 1);
            assert_eq!(map.count(|op| matches!(op, RenderOp::Move(_))), 1);
            let (_, me) = map.marker_for("me").unwrap();
            assert_eq!(me.position, Position::new(15.31, 75.71));
        });
    }

    #[tokio::test]
    async fn late_older_push_does_not_roll_back_shown_position() {
        let client = Arc::new(FakeClient::default());
        *client.slow_lat.lock() = Some((1.0, Duration::from_millis(150)));
        let (source, feed) = ChannelPositionSource::new();
        let mut agent = PublisherAgent::new(client.clone(), source, MemoryRenderer::new());
        agent.start();

        feed.send_fix(PositionFix::new(1.0, 1.0, 20.0));
        tokio::time::sleep(Duration::from_millis(20)).await;
        feed.send_fix(PositionFix::new(2.0, 2.0, 5.0));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(agent.status().message, "Sharing: 2.00000, 2.00000");

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(client.pushed.lock().len(), 2);

        let status = agent.status();
        assert_eq!(status.updates_count, 2);
        assert_eq!(status.message, "Sharing: 2.00000, 2.00000");
        assert_eq!(status.accuracy.as_deref(), Some("±5m"));
        agent.with_renderer(|map| {
            let (_, me) = map.marker_for("me").unwrap();
            assert_eq!(me.position, Position::new(2.0, 2.0));
            assert_eq!(map.count(|op| matches!(op, RenderOp::Move(_))), 0);
        });
    }

    #[tokio::test]
    async fn failed_push_reports_and_keeps_subscription() {
        let client = Arc::new(FakeClient::default());
        *client.reject.lock() = true;
        let (source, feed) = ChannelPositionSource::new();
        let mut agent = PublisherAgent::new(client.clone(), source, MemoryRenderer::new());
        agent.start();

        feed.send_fix(PositionFix::new(15.3, 75.7, 8.0));
        settle().await;
        let status = agent.status();
        assert_eq!(status.message, "Error sending location");
        assert_eq!(status.state, SharingState::ErrorReporting);
        assert_eq!(status.updates_count, 0);
        assert!(agent.is_active());

        *client.reject.lock() = false;
        feed.send_fix(PositionFix::new(15.3, 75.7, 8.0));
        settle().await;
        let status = agent.status();
        assert_eq!(status.state, SharingState::Active);
        assert_eq!(status.updates_count, 1);
        assert_eq!(client.pushed.lock().len(), 2);
    }

    #[tokio::test]
    async fn source_error_is_surfaced_without_unsubscribing() {
        let client = Arc::new(FakeClient::default());
        let (source, feed) = ChannelPositionSource::new();
        let mut agent = PublisherAgent::new(client.clone(), source, MemoryRenderer::new());
        agent.start();
        settle().await;

        feed.fail(crate::models::error::SourceError::PermissionDenied);
        settle().await;
        assert_eq!(agent.status().message, "Error: User denied Geolocation");
        assert_eq!(feed.watchers(), 1);
    }

    #[tokio::test]
    async fn stop_cancels_subscription_and_discards_late_results() {
        let client = Arc::new(FakeClient::default());
        *client.delay.lock() = Some(Duration::from_millis(100));
        let (source, feed) = ChannelPositionSource::new();
        let mut agent = PublisherAgent::new(client.clone(), source, MemoryRenderer::new());
        agent.start();

        feed.send_fix(PositionFix::new(15.3, 75.7, 8.0));
        tokio::time::sleep(Duration::from_millis(20)).await;
        agent.stop();
        agent.stop();

        tokio::time::sleep(Duration::from_millis(200)).await;
        // the in-flight push still reached the server
        assert_eq!(client.pushed.lock().len(), 1);

        let status = agent.status();
        assert_eq!(status.state, SharingState::Idle);
        assert_eq!(status.message, "Stopped sharing");
        assert_eq!(status.sharing_label, "Inactive");
        assert_eq!(status.last_sent, None);
        assert_eq!(status.updates_count, 0);
        assert!(agent.with_renderer(|map| map.markers.is_empty()));
        assert_eq!(feed.watchers(), 0);
        assert!(!agent.is_active());
    }

    #[tokio::test]
    async fn restart_after_stop_resumes_pushing() {
        let client = Arc::new(FakeClient::default());
        let (source, feed) = ChannelPositionSource::new();
        let mut agent = PublisherAgent::new(client.clone(), source, MemoryRenderer::new());

        agent.start();
        agent.stop();
        agent.start();
        feed.send_fix(PositionFix::new(1.0, 2.0, 3.0));
        settle().await;

        assert_eq!(agent.status().updates_count, 1);
        assert_eq!(feed.watchers(), 1);
    }
}
