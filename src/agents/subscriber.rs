use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::agents::client::RegistryClient;
use crate::agents::reconciler::MarkerSet;
use crate::agents::renderer::MapRenderer;
use crate::models::error::PollError;
use crate::models::location::Snapshot;
use crate::models::position::accuracy_label;

pub const POLL_INTERVAL: Duration = Duration::from_millis(3000);

/// Zoom used when the viewer focuses a single bus.
pub const FOCUS_ZOOM: u8 = 16;

pub const NO_PUBLISHERS_NOTICE: &str = "No active buses found. Drivers need to start sharing.";

/// One entry of the bus list next to the map.
#[derive(Debug, Clone, PartialEq)]
pub struct BusCard {
    pub id: String,
    pub position: String,
    pub updated: String,
    pub accuracy: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ViewerDisplay {
    pub tracking_label: String,
    pub active_count: usize,
    pub buses: Vec<BusCard>,
    pub notice: Option<String>,
    pub last_update: Option<String>,
}

impl Default for ViewerDisplay {
    fn default() -> Self {
        Self {
            tracking_label: "Not Tracking".to_string(),
            active_count: 0,
            buses: Vec::new(),
            notice: None,
            last_update: None,
        }
    }
}

struct ViewerInner<R: MapRenderer> {
    renderer: R,
    markers: MarkerSet<R::Marker>,
    display: ViewerDisplay,
    latest: Snapshot,
    /// Bumped on every start and stop; poll results from older runs are dropped.
    generation: u64,
}

impl<R: MapRenderer> ViewerInner<R> {
    fn apply_poll(&mut self, result: Result<Snapshot, PollError>) {
        match result {
            Ok(snapshot) => {
                let summary = self.markers.reconcile(&snapshot, &mut self.renderer);
                debug!(
                    "Reconciled {} bus(es): {} created, {} updated, {} removed",
                    snapshot.len(),
                    summary.created,
                    summary.updated,
                    summary.removed
                );

                self.display.active_count = snapshot.len();
                self.display.buses = snapshot
                    .iter()
                    .map(|(id, record)| BusCard {
                        id: id.to_string(),
                        position: record.position().display(),
                        updated: record.timestamp.clone(),
                        accuracy: accuracy_label(record.accuracy),
                    })
                    .collect();
                self.display.notice =
                    snapshot.is_empty().then(|| NO_PUBLISHERS_NOTICE.to_string());
                self.display.last_update =
                    Some(format!("Updated: {}", Local::now().format("%H:%M:%S")));
                self.latest = snapshot;
            }
            Err(e) => {
                match &e {
                    PollError::EmptyResult => info!("No bus has reported yet"),
                    PollError::Transport(_) => warn!("Poll failed ({}): {}", e.as_label(), e),
                }
                let dropped = self.markers.clear(&mut self.renderer);
                if dropped > 0 {
                    debug!("Dropped {} marker(s)", dropped);
                }
                self.display.active_count = 0;
                self.display.buses.clear();
                self.display.notice = Some(NO_PUBLISHERS_NOTICE.to_string());
                self.latest = Snapshot::default();
            }
        }
    }
}

/// Runs on a viewer: polls the registry and keeps the map in sync.
pub struct SubscriberAgent<C, R: MapRenderer> {
    client: Arc<C>,
    inner: Arc<Mutex<ViewerInner<R>>>,
    interval: Duration,
    /// Dropping the sender ends the polling loop at its next tick.
    poller: Option<oneshot::Sender<()>>,
}

impl<C, R> SubscriberAgent<C, R>
where
    C: RegistryClient,
    R: MapRenderer,
{
    pub fn new(client: Arc<C>, renderer: R) -> Self {
        Self::with_interval(client, renderer, POLL_INTERVAL)
    }

    pub fn with_interval(client: Arc<C>, renderer: R, interval: Duration) -> Self {
        Self {
            client,
            inner: Arc::new(Mutex::new(ViewerInner {
                renderer,
                markers: MarkerSet::new(),
                display: ViewerDisplay::default(),
                latest: Snapshot::default(),
                generation: 0,
            })),
            interval,
            poller: None,
        }
    }

    pub fn is_tracking(&self) -> bool {
        self.poller.is_some()
    }

    pub fn display(&self) -> ViewerDisplay {
        self.inner.lock().display.clone()
    }

    pub fn marker_ids(&self) -> Vec<String> {
        self.inner.lock().markers.ids()
    }

    pub fn with_renderer<T>(&self, f: impl FnOnce(&R) -> T) -> T {
        f(&self.inner.lock().renderer)
    }

    /// Polls once immediately, then every interval until stopped.
    ///
    /// Each poll is awaited before the next tick is taken, so results are
    /// applied in request order. Stopping does not abort a fetch in flight;
    /// its result is discarded when it arrives.
    pub fn start_tracking(&mut self) {
        if self.poller.is_some() {
            warn!("Tracking already started");
            return;
        }

        let generation = {
            let mut inner = self.inner.lock();
            inner.generation += 1;
            inner.display.tracking_label = "Tracking".to_string();
            inner.generation
        };

        let client = self.client.clone();
        let inner = self.inner.clone();
        let period = self.interval;

        let (stop, mut stopped) = oneshot::channel::<()>();

        info!("Tracking started, polling every {:?}", period);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = &mut stopped => return,
                    _ = ticker.tick() => {}
                }
                let result = client.fetch_locations().await;
                let mut inner = inner.lock();
                if inner.generation != generation {
                    debug!("Discarding poll result after stop");
                    return;
                }
                inner.apply_poll(result);
            }
        });
        self.poller = Some(stop);
    }

    /// Cancels polling. Markers already on the map stay where they are.
    pub fn stop_tracking(&mut self) {
        if self.poller.take().is_some() {
            info!("Tracking stopped");
        }
        let mut inner = self.inner.lock();
        inner.generation += 1;
        inner.display.tracking_label = "Not Tracking".to_string();
    }

    /// Fetches and applies a single snapshot outside the polling loop.
    pub async fn poll_once(&self) {
        let generation = self.inner.lock().generation;
        let result = self.client.fetch_locations().await;
        let mut inner = self.inner.lock();
        if inner.generation != generation {
            debug!("Discarding poll result after tracking state changed");
            return;
        }
        inner.apply_poll(result);
    }

    /// Centers the map on one bus and opens its popup. Returns `false` if
    /// the bus is not currently shown.
    pub fn focus(&self, id: &str) -> bool {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let Some(record) = inner.latest.get(id) else {
            return false;
        };
        let Some(marker) = inner.markers.get(id) else {
            return false;
        };
        inner.renderer.set_view(record.position(), FOCUS_ZOOM);
        inner.renderer.open_popup(marker);
        true
    }
}
