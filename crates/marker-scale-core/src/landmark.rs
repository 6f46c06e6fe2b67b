//! Marker-corner landmarks and their per-view observations.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use nalgebra::{Point2, Point3};
use serde::{Deserialize, Serialize};

/// Numeric view identifier of the SfM scene.
pub type ViewId = u32;

/// A landmark needs at least this many observations to be triangulated.
pub const MIN_TRIANGULATION_OBSERVATIONS: usize = 3;

/// Corner of a square marker, in the marker's own frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MarkerCorner {
    TopLeft = 0,
    TopRight = 1,
    BottomRight = 2,
    BottomLeft = 3,
}

impl MarkerCorner {
    pub const ALL: [MarkerCorner; 4] = [
        MarkerCorner::TopLeft,
        MarkerCorner::TopRight,
        MarkerCorner::BottomRight,
        MarkerCorner::BottomLeft,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(i: usize) -> Option<Self> {
        Self::ALL.get(i).copied()
    }

    /// The corner sharing an edge with `self`, going clockwise.
    pub fn next(self) -> Self {
        Self::ALL[(self.index() + 1) % 4]
    }
}

/// Stable landmark identity: one corner of one marker.
///
/// Displayed and parsed as `"<marker>.<corner>"`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LandmarkKey {
    pub marker: u32,
    pub corner: MarkerCorner,
}

impl LandmarkKey {
    pub fn new(marker: u32, corner: MarkerCorner) -> Self {
        Self { marker, corner }
    }
}

impl fmt::Display for LandmarkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.marker, self.corner.index())
    }
}

impl FromStr for LandmarkKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (marker, corner) = s
            .split_once('.')
            .ok_or_else(|| format!("landmark key `{s}` is not `<marker>.<corner>`"))?;
        let marker = marker
            .parse()
            .map_err(|_| format!("invalid marker id in `{s}`"))?;
        let corner = corner
            .parse::<usize>()
            .ok()
            .and_then(MarkerCorner::from_index)
            .ok_or_else(|| format!("invalid corner index in `{s}`"))?;
        Ok(Self { marker, corner })
    }
}

/// One sighting of a landmark.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub view: ViewId,
    /// Pixel position in the (possibly undistorted) image of `view`.
    pub pixel: Point2<f64>,
}

/// Whether a landmark has been placed in 3D yet.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "point", rename_all = "snake_case")]
pub enum LandmarkPosition {
    #[default]
    Pending,
    Triangulated(Point3<f64>),
}

impl LandmarkPosition {
    pub fn point(&self) -> Option<&Point3<f64>> {
        match self {
            LandmarkPosition::Pending => None,
            LandmarkPosition::Triangulated(p) => Some(p),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub key: LandmarkKey,
    pub observations: Vec<Observation>,
    pub position: LandmarkPosition,
}

impl Landmark {
    fn new(key: LandmarkKey) -> Self {
        Self {
            key,
            observations: Vec::new(),
            position: LandmarkPosition::Pending,
        }
    }

    pub fn is_triangulable(&self) -> bool {
        self.observations.len() >= MIN_TRIANGULATION_OBSERVATIONS
    }
}

/// All landmarks of a run, ordered by key so statistics are reproducible.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LandmarkStore {
    landmarks: BTreeMap<LandmarkKey, Landmark>,
    markers: BTreeSet<u32>,
}

impl LandmarkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the four corners of one detected marker in one view.
    ///
    /// `corners` must be ordered top-left, top-right, bottom-right,
    /// bottom-left in the marker's frame.
    pub fn record_marker(&mut self, view: ViewId, marker: u32, corners: &[Point2<f64>; 4]) {
        for (corner, pixel) in MarkerCorner::ALL.into_iter().zip(corners.iter()) {
            self.record(LandmarkKey::new(marker, corner), view, *pixel);
        }
    }

    /// Append one observation, creating the landmark on first sight.
    pub fn record(&mut self, key: LandmarkKey, view: ViewId, pixel: Point2<f64>) {
        self.landmarks
            .entry(key)
            .or_insert_with(|| Landmark::new(key))
            .observations
            .push(Observation { view, pixel });
        self.markers.insert(key.marker);
    }

    pub fn get(&self, key: &LandmarkKey) -> Option<&Landmark> {
        self.landmarks.get(key)
    }

    pub fn position(&self, key: &LandmarkKey) -> Option<&Point3<f64>> {
        self.landmarks.get(key).and_then(|l| l.position.point())
    }

    pub fn set_position(&mut self, key: &LandmarkKey, point: Point3<f64>) -> bool {
        match self.landmarks.get_mut(key) {
            Some(l) => {
                l.position = LandmarkPosition::Triangulated(point);
                true
            }
            None => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Landmark> {
        self.landmarks.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Landmark> {
        self.landmarks.values_mut()
    }

    pub fn len(&self) -> usize {
        self.landmarks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.landmarks.is_empty()
    }

    /// Marker ids seen in any view, ascending.
    pub fn marker_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.markers.iter().copied()
    }

    pub fn marker_count(&self) -> usize {
        self.markers.len()
    }

    pub fn observation_count(&self) -> usize {
        self.landmarks.values().map(|l| l.observations.len()).sum()
    }

    pub fn triangulable_count(&self) -> usize {
        self.landmarks.values().filter(|l| l.is_triangulable()).count()
    }

    pub fn triangulated_count(&self) -> usize {
        self.landmarks
            .values()
            .filter(|l| l.position.point().is_some())
            .count()
    }

    /// Triangulated positions in key order.
    pub fn triangulated_points(&self) -> Vec<Point3<f64>> {
        self.landmarks
            .values()
            .filter_map(|l| l.position.point().copied())
            .collect()
    }

    /// A copy with every triangulated position multiplied by `scale`.
    pub fn scaled(&self, scale: f64) -> Self {
        let mut out = self.clone();
        for l in out.landmarks.values_mut() {
            if let LandmarkPosition::Triangulated(p) = &mut l.position {
                *p = Point3::from(p.coords * scale);
            }
        }
        out
    }
}
