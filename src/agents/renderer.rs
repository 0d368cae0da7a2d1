use std::collections::HashMap;

use tracing::info;

use crate::models::position::Position;

/// Axis-aligned box in degrees. Does not handle the antimeridian.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub south_west: Position,
    pub north_east: Position,
}

impl Bounds {
    /// Smallest box covering every position, or `None` for no positions.
    pub fn around<I: IntoIterator<Item = Position>>(positions: I) -> Option<Self> {
        positions.into_iter().fold(None, |acc, p| {
            Some(match acc {
                None => Bounds { south_west: p, north_east: p },
                Some(b) => Bounds {
                    south_west: Position::new(
                        b.south_west.lat.min(p.lat),
                        b.south_west.lng.min(p.lng),
                    ),
                    north_east: Position::new(
                        b.north_east.lat.max(p.lat),
                        b.north_east.lng.max(p.lng),
                    ),
                },
            })
        })
    }

    pub fn contains(&self, p: Position) -> bool {
        (self.south_west.lat..=self.north_east.lat).contains(&p.lat)
            && (self.south_west.lng..=self.north_east.lng).contains(&p.lng)
    }

    pub fn center(&self) -> Position {
        Position::new(
            (self.south_west.lat + self.north_east.lat) / 2.0,
            (self.south_west.lng + self.north_east.lng) / 2.0,
        )
    }
}

/// The map widget markers are drawn on.
///
/// Marker handles are owned by the caller; the renderer never hands out a
/// second handle for the same marker.
pub trait MapRenderer: Send + 'static {
    type Marker: Send + 'static;

    fn create_marker(&mut self, id: &str, at: Position, label: &str) -> Self::Marker;
    fn move_marker(&mut self, marker: &mut Self::Marker, at: Position);
    fn set_label(&mut self, marker: &mut Self::Marker, label: &str);
    fn remove_marker(&mut self, marker: Self::Marker);
    fn fit_bounds(&mut self, bounds: Bounds, padding: u32);
    fn set_view(&mut self, center: Position, zoom: u8);
    fn open_popup(&mut self, marker: &Self::Marker);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MarkerId(pub u64);

#[derive(Debug, Clone, PartialEq)]
pub struct MarkerState {
    pub key: String,
    pub position: Position,
    pub label: String,
    pub popup_open: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RenderOp {
    Create(MarkerId),
    Move(MarkerId),
    Relabel(MarkerId),
    Remove(MarkerId),
    FitBounds(Bounds),
    SetView(Position, u8),
    OpenPopup(MarkerId),
}

/// Keeps the scene in memory. Useful headless and for inspecting what a
/// real map would show.
#[derive(Debug, Default)]
pub struct MemoryRenderer {
    next_id: u64,
    pub markers: HashMap<MarkerId, MarkerState>,
    pub view: Option<(Position, u8)>,
    pub fitted: Option<(Bounds, u32)>,
    pub log: Vec<RenderOp>,
}

impl MemoryRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn marker_for(&self, key: &str) -> Option<(MarkerId, &MarkerState)> {
        self.markers
            .iter()
            .find(|(_, state)| state.key == key)
            .map(|(id, state)| (*id, state))
    }

    pub fn marker_keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.markers.values().map(|m| m.key.clone()).collect();
        keys.sort();
        keys
    }

    pub fn count(&self, matches: impl Fn(&RenderOp) -> bool) -> usize {
        self.log.iter().filter(|op| matches(op)).count()
    }
}

impl MapRenderer for MemoryRenderer {
    type Marker = MarkerId;

    fn create_marker(&mut self, id: &str, at: Position, label: &str) -> MarkerId {
        self.next_id += 1;
        let marker = MarkerId(self.next_id);
        self.markers.insert(
            marker,
            MarkerState {
                key: id.to_string(),
                position: at,
                label: label.to_string(),
                popup_open: false,
            },
        );
        self.log.push(RenderOp::Create(marker));
        marker
    }

    fn move_marker(&mut self, marker: &mut MarkerId, at: Position) {
        if let Some(state) = self.markers.get_mut(marker) {
            state.position = at;
        }
        self.log.push(RenderOp::Move(*marker));
    }

    fn set_label(&mut self, marker: &mut MarkerId, label: &str) {
        if let Some(state) = self.markers.get_mut(marker) {
            state.label = label.to_string();
        }
        self.log.push(RenderOp::Relabel(*marker));
    }

    fn remove_marker(&mut self, marker: MarkerId) {
        self.markers.remove(&marker);
        self.log.push(RenderOp::Remove(marker));
    }

    fn fit_bounds(&mut self, bounds: Bounds, padding: u32) {
        self.fitted = Some((bounds, padding));
        self.log.push(RenderOp::FitBounds(bounds));
    }

    fn set_view(&mut self, center: Position, zoom: u8) {
        self.view = Some((center, zoom));
        self.log.push(RenderOp::SetView(center, zoom));
    }

    fn open_popup(&mut self, marker: &MarkerId) {
        for (id, state) in self.markers.iter_mut() {
            state.popup_open = id == marker;
        }
        self.log.push(RenderOp::OpenPopup(*marker));
    }
}

#[derive(Debug)]
pub struct TracedMarker {
    pub key: String,
    pub seq: u64,
}

/// Writes every map operation to the log instead of drawing it.
#[derive(Debug, Default)]
pub struct TracingRenderer {
    next_seq: u64,
}

impl MapRenderer for TracingRenderer {
    type Marker = TracedMarker;

    fn create_marker(&mut self, id: &str, at: Position, label: &str) -> TracedMarker {
        self.next_seq += 1;
        info!("+ marker {} at {} ({})", id, at.display(), label.replace('\n', " | "));
        TracedMarker { key: id.to_string(), seq: self.next_seq }
    }

    fn move_marker(&mut self, marker: &mut TracedMarker, at: Position) {
        info!("~ marker {} -> {}", marker.key, at.display());
    }

    fn set_label(&mut self, marker: &mut TracedMarker, label: &str) {
        info!("~ marker {} label {}", marker.key, label.replace('\n', " | "));
    }

    fn remove_marker(&mut self, marker: TracedMarker) {
        info!("- marker {}", marker.key);
    }

    fn fit_bounds(&mut self, bounds: Bounds, padding: u32) {
        info!(
            "fit [{}] .. [{}] padding {}",
            bounds.south_west.display(),
            bounds.north_east.display(),
            padding
        );
    }

    fn set_view(&mut self, center: Position, zoom: u8) {
        info!("view {} zoom {}", center.display(), zoom);
    }

    fn open_popup(&mut self, marker: &TracedMarker) {
        info!("popup {}", marker.key);
    }
}
