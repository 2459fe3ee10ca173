// Project Domain Model - the parent resource a job's output augments.
// Owned by the external API layer; the engine reads it to locate inputs
// and writes derived references back once per successful run.

use serde::{Deserialize, Serialize};

pub type ProjectId = String;

/// Coordinate reference system info, as supplied at project creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Crs {
    /// EPSG code, e.g. "26916"
    pub epsg: Option<String>,
    pub name: Option<String>,
    /// Full proj4 string; required by the point-cloud converter.
    pub proj4: Option<String>,
}

/// Mean center location in WGS84.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
    pub z: f64,
}

/// Overlay bounds in EPSG:4326, [[south, west], [north, east]].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OverlayBounds(pub [[f64; 2]; 2]);

impl OverlayBounds {
    pub fn new(south: f64, west: f64, north: f64, east: f64) -> Self {
        Self([[south, west], [north, east]])
    }

    pub fn south(&self) -> f64 {
        self.0[0][0]
    }

    pub fn west(&self) -> f64 {
        self.0[0][1]
    }

    pub fn north(&self) -> f64 {
        self.0[1][0]
    }

    pub fn east(&self) -> f64 {
        self.0[1][1]
    }
}

/// Raster overlay references persisted after a successful ortho run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrthoOverlay {
    pub url: Option<String>,
    pub thumbnail: Option<String>,
    pub bounds: Option<OverlayBounds>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: Option<String>,
    pub crs: Option<Crs>,
    pub location: Option<Location>,
    pub point_count: Option<u64>,
    /// Access reference to the converted point cloud (entry artifact URL).
    pub cloud_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub ortho: Option<OrthoOverlay>,
}

impl Project {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            crs: None,
            location: None,
            point_count: None,
            cloud_url: None,
            thumbnail_url: None,
            ortho: None,
        }
    }

    /// proj4 string for the external converters, if the project carries one.
    pub fn proj4(&self) -> Option<&str> {
        self.crs.as_ref().and_then(|c| c.proj4.as_deref())
    }
}
