use std::time::Duration;

use async_stream::stream;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;

use crate::models::error::SourceError;
use crate::models::location::PositionReport;
use crate::models::position::Position;

/// Options passed to the device when subscribing to position changes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WatchOptions {
    /// Ask for the best fix the device can give. Without it a source may
    /// report a coarser one.
    pub high_accuracy: bool,
    /// Oldest cached fix the source may hand out.
    pub maximum_age: Duration,
    /// How long to wait for a fix before reporting [`SourceError::Timeout`].
    pub timeout: Duration,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            high_accuracy: true,
            maximum_age: Duration::from_millis(2000),
            timeout: Duration::from_millis(5000),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionFix {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: f64,
    pub observed_at: DateTime<Utc>,
}

impl PositionFix {
    pub fn new(latitude: f64, longitude: f64, accuracy: f64) -> Self {
        Self { latitude, longitude, accuracy, observed_at: Utc::now() }
    }

    pub fn report(&self) -> PositionReport {
        PositionReport::new(self.latitude, self.longitude, self.accuracy)
    }

    pub fn position(&self) -> Position {
        Position::new(self.latitude, self.longitude)
    }

    fn is_fresh(&self, maximum_age: Duration) -> bool {
        // a fix stamped in the future counts as fresh
        (Utc::now() - self.observed_at)
            .to_std()
            .map(|age| age <= maximum_age)
            .unwrap_or(true)
    }
}

/// Continuous position updates. Dropping the stream ends the subscription.
pub type PositionStream = BoxStream<'static, Result<PositionFix, SourceError>>;

pub trait PositionSource: Send + Sync + 'static {
    fn watch(&self, options: WatchOptions) -> PositionStream;
}

type FixResult = Result<PositionFix, SourceError>;

/// Position source fed from elsewhere in the process through a [`PositionFeed`].
pub struct ChannelPositionSource {
    tx: broadcast::Sender<FixResult>,
}

#[derive(Clone)]
pub struct PositionFeed {
    tx: broadcast::Sender<FixResult>,
}

impl PositionFeed {
    /// Returns the number of active watchers that received the fix.
    pub fn send_fix(&self, fix: PositionFix) -> usize {
        self.tx.send(Ok(fix)).unwrap_or(0)
    }

    pub fn fail(&self, error: SourceError) -> usize {
        self.tx.send(Err(error)).unwrap_or(0)
    }

    pub fn watchers(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl ChannelPositionSource {
    pub fn new() -> (Self, PositionFeed) {
        let (tx, _) = broadcast::channel(64);
        (Self { tx: tx.clone() }, PositionFeed { tx })
    }
}

impl PositionSource for ChannelPositionSource {
    fn watch(&self, options: WatchOptions) -> PositionStream {
        let mut rx = self.tx.subscribe();
        Box::pin(stream! {
            loop {
                match tokio::time::timeout(options.timeout, rx.recv()).await {
                    Ok(Ok(Ok(fix))) => {
                        if fix.is_fresh(options.maximum_age) {
                            yield Ok(fix);
                        } else {
                            debug!("Dropping stale fix from {}", fix.observed_at);
                        }
                    }
                    Ok(Ok(Err(e))) => yield Err(e),
                    Ok(Err(RecvError::Lagged(skipped))) => {
                        debug!("Position watcher lagged, skipped {} fixes", skipped);
                    }
                    Ok(Err(RecvError::Closed)) => break,
                    Err(_) => yield Err(SourceError::Timeout),
                }
            }
        })
    }
}

/// Drives a vehicle along a polyline, emitting one fix per step.
#[derive(Debug, Clone)]
pub struct SimulatedRoute {
    pub waypoints: Vec<Position>,
    pub steps_per_leg: usize,
    pub step: Duration,
    pub accuracy: f64,
    /// Reported instead of `accuracy` when high accuracy was not requested.
    pub coarse_accuracy: f64,
    pub looping: bool,
}

impl SimulatedRoute {
    pub fn new(waypoints: Vec<Position>, step: Duration) -> Self {
        Self {
            waypoints,
            steps_per_leg: 10,
            step,
            accuracy: 8.0,
            coarse_accuracy: 50.0,
            looping: true,
        }
    }

    /// Every point the route visits in one pass, endpoints included.
    pub fn points(&self) -> Vec<Position> {
        let steps = self.steps_per_leg.max(1);
        let mut points = Vec::new();
        for leg in self.waypoints.windows(2) {
            let (from, to) = (leg[0], leg[1]);
            for i in 0..steps {
                let t = i as f64 / steps as f64;
                points.push(Position::new(
                    from.lat + (to.lat - from.lat) * t,
                    from.lng + (to.lng - from.lng) * t,
                ));
            }
        }
        if let Some(last) = self.waypoints.last() {
            points.push(*last);
        }
        points
    }
}

impl PositionSource for SimulatedRoute {
    fn watch(&self, options: WatchOptions) -> PositionStream {
        let points = self.points();
        let step = self.step;
        let accuracy = if options.high_accuracy { self.accuracy } else { self.coarse_accuracy };
        let looping = self.looping;
        Box::pin(stream! {
            if points.is_empty() {
                yield Err(SourceError::Unavailable("route has no waypoints".to_string()));
                return;
            }
            loop {
                for p in &points {
                    yield Ok(PositionFix::new(p.lat, p.lng, accuracy));
                    tokio::time::sleep(step).await;
                }
                if !looping {
                    break;
                }
            }
        })
    }
}
