//! Turns successive registry snapshots into marker operations.
//!
//! [`plan`] is the pure diff; [`MarkerSet`] owns the marker handles and
//! applies a plan to a [`MapRenderer`]. Markers that survive from one
//! snapshot to the next are updated in place, never recreated, so renderer
//! state attached to them (an open popup) is kept.

use std::collections::{BTreeSet, HashMap};

use crate::agents::renderer::{Bounds, MapRenderer};
use crate::models::location::{LocationRecord, Snapshot};
use crate::models::position::Position;

/// Padding in pixels around the fitted viewport.
pub const FIT_PADDING: u32 = 50;

#[derive(Debug, Clone, PartialEq)]
pub enum MarkerOp {
    Remove { id: String },
    Create { id: String, position: Position, label: String },
    Update { id: String, position: Position, label: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub created: usize,
    pub updated: usize,
    pub removed: usize,
}

pub fn marker_label(id: &str, record: &LocationRecord) -> String {
    format!("Bus: {}\nUpdated: {}", id, record.timestamp)
}

/// Removals for every tracked id missing from `snapshot`, then a create or
/// update for every id in it.
pub fn plan<'a, I>(tracked: I, snapshot: &Snapshot) -> Vec<MarkerOp>
where
    I: IntoIterator<Item = &'a str>,
{
    let tracked: BTreeSet<&str> = tracked.into_iter().collect();

    let removals = tracked
        .iter()
        .filter(|id| !snapshot.contains(id))
        .map(|id| MarkerOp::Remove { id: id.to_string() });

    let upserts = snapshot.iter().map(|(id, record)| {
        let position = record.position();
        let label = marker_label(id, record);
        if tracked.contains(id) {
            MarkerOp::Update { id: id.to_string(), position, label }
        } else {
            MarkerOp::Create { id: id.to_string(), position, label }
        }
    });

    removals.chain(upserts).collect()
}

/// Bounding box the map should fit after showing `snapshot`.
pub fn viewport(snapshot: &Snapshot) -> Option<Bounds> {
    Bounds::around(snapshot.iter().map(|(_, record)| record.position()))
}

pub struct MarkerSet<M> {
    markers: HashMap<String, M>,
}

impl<M> Default for MarkerSet<M> {
    fn default() -> Self {
        Self { markers: HashMap::new() }
    }
}

impl<M> MarkerSet<M> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&M> {
        self.markers.get(id)
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.markers.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Brings the marker set in line with `snapshot` and fits the viewport
    /// when there is anything to show.
    pub fn reconcile<R>(&mut self, snapshot: &Snapshot, renderer: &mut R) -> ReconcileSummary
    where
        R: MapRenderer<Marker = M>,
    {
        let ops = plan(self.markers.keys().map(String::as_str), snapshot);
        let summary = self.apply(ops, renderer);
        if let Some(bounds) = viewport(snapshot) {
            renderer.fit_bounds(bounds, FIT_PADDING);
        }
        summary
    }

    pub fn apply<R>(&mut self, ops: Vec<MarkerOp>, renderer: &mut R) -> ReconcileSummary
    where
        R: MapRenderer<Marker = M>,
    {
        let mut summary = ReconcileSummary::default();
        for op in ops {
            match op {
                MarkerOp::Remove { id } => {
                    if let Some(marker) = self.markers.remove(&id) {
                        renderer.remove_marker(marker);
                        summary.removed += 1;
                    }
                }
                MarkerOp::Create { id, position, label }
                | MarkerOp::Update { id, position, label } => {
                    match self.markers.get_mut(&id) {
                        Some(marker) => {
                            renderer.move_marker(marker, position);
                            renderer.set_label(marker, &label);
                            summary.updated += 1;
                        }
                        None => {
                            let marker = renderer.create_marker(&id, position, &label);
                            self.markers.insert(id, marker);
                            summary.created += 1;
                        }
                    }
                }
            }
        }
        summary
    }

    /// Removes every marker from the map. Returns how many were dropped.
    pub fn clear<R>(&mut self, renderer: &mut R) -> usize
    where
        R: MapRenderer<Marker = M>,
    {
        let count = self.markers.len();
        for (_, marker) in self.markers.drain() {
            renderer.remove_marker(marker);
        }
        count
    }
}
