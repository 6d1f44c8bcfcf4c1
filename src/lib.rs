//! # Episode Router
//!
//! Turns the raw GPS fix stream of a tracking device into travel episodes,
//! map-matched trip routes and route-choice variables for transportation
//! behaviour research.
//!
//! This library provides:
//! - Episode segmentation (drive / walk / stop) with hysteresis on mode switches
//! - Trip and stop segment extraction with minimum point spacing
//! - Nearest-edge map matching onto a road network with jitter correction
//! - Gap detection and shortest-path gap filling
//! - Route assembly and route-choice variables (distance, turns, longest leg)
//!
//! ## Features
//!
//! - **`parallel`** - Process serial ids in parallel with rayon
//! - **`serde`** - Serialize the public data model
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use episode_router::{segment_fixes, GpsFix, SegmentationConfig, TravelMode};
//!
//! // A device parked for four minutes
//! let fixes: Vec<GpsFix> = (0..5)
//!     .map(|i| GpsFix::new(i, "dev-1", &format!("3/14/2023 10:0{}", i), 43.26, -79.92, 0.0))
//!     .collect();
//!
//! let episodes = segment_fixes(&fixes, &SegmentationConfig::default()).unwrap();
//! assert_eq!(episodes.len(), 1);
//! assert_eq!(episodes[0].mode, TravelMode::Stop);
//! ```

use std::fmt;

pub mod error;
pub mod geo_utils;
pub mod timing;
pub mod preprocess;
pub mod segmentation;
pub mod extract;
pub mod network;
pub mod matching;
pub mod gaps;
pub mod route;
pub mod variables;
pub mod pipeline;

pub use error::{PipelineError, Result};
pub use preprocess::{group_by_serial, preprocess, PreprocessConfig};
pub use segmentation::{
    classify_speed, segment_fixes, segment_with_times, Episode, SegmentationConfig,
};
pub use extract::{
    extract_stop_segment, extract_trip_segment, fill_episodes, relax_trip,
    ExtractConfig, LabeledFix, NetworkMode, StopSegment, TripSegment,
};
pub use geo_utils::LocalProjection;
pub use network::{EdgeId, EdgeInfo, NetworkEdge, NetworkNode, RoadNetwork};
pub use matching::{match_points, match_trip, MatchConfig, MatchedPoint};
pub use gaps::{
    apply_patches, detect_and_fill_gaps, is_gap, Gap, GapConfig, GapFillResult, SnapPatch,
    UnfilledGap,
};
pub use route::{assemble_route, Route};
pub use variables::{
    count_turns, generate_variables, longest_leg, LongestLeg, RouteVariables, TurnConfig,
    TurnCounts,
};
pub use pipeline::{
    process_device, process_devices, DeviceOutput, PipelineConfig, RouteStatus, SkipReason,
};

#[cfg(feature = "parallel")]
pub use pipeline::process_devices_parallel;

// ============================================================================
// Core Types
// ============================================================================

/// A single GPS fix reported by a tracking device.
///
/// Fixes are immutable once ingested. `record_id` increases monotonically per
/// `serial_id`; `local_time` keeps the device's minute-resolution string.
///
/// # Example
/// ```
/// use episode_router::GpsFix;
/// let fix = GpsFix::new(1, "dev-1", "3/14/2023 10:05", 43.2609, -79.9192, 32.5);
/// assert!(fix.is_valid());
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GpsFix {
    pub record_id: i64,
    pub serial_id: String,
    pub local_time: String,
    pub latitude: f64,
    pub longitude: f64,
    pub speed_kmh: f64,
}

impl GpsFix {
    /// Create a new GPS fix.
    pub fn new(
        record_id: i64,
        serial_id: &str,
        local_time: &str,
        latitude: f64,
        longitude: f64,
        speed_kmh: f64,
    ) -> Self {
        Self {
            record_id,
            serial_id: serial_id.to_string(),
            local_time: local_time.to_string(),
            latitude,
            longitude,
            speed_kmh,
        }
    }

    /// Check if the fix has usable coordinates and speed.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
            && self.speed_kmh.is_finite()
            && self.speed_kmh >= 0.0
    }
}

/// Travel mode assigned to an episode or a labeled fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TravelMode {
    Drive,
    Walk,
    Stop,
    /// Too short to stand on its own; absorbed by the following episode.
    Invalid,
}

impl TravelMode {
    /// Walk and drive fixes make up trip segments.
    pub fn is_travel(self) -> bool {
        matches!(self, TravelMode::Walk | TravelMode::Drive)
    }
}

impl fmt::Display for TravelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TravelMode::Drive => "Drive",
            TravelMode::Walk => "Walk",
            TravelMode::Stop => "Stop",
            TravelMode::Invalid => "Invalid",
        };
        f.write_str(name)
    }
}

/// Bounding box in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl Bounds {
    /// Create bounds from GPS fixes.
    pub fn from_fixes(fixes: &[GpsFix]) -> Option<Self> {
        if fixes.is_empty() {
            return None;
        }
        Some(geo_utils::compute_bounds(fixes))
    }

    /// Grow the box by `degrees` on every side.
    pub fn padded(&self, degrees: f64) -> Self {
        Self {
            min_lat: self.min_lat - degrees,
            max_lat: self.max_lat + degrees,
            min_lng: self.min_lng - degrees,
            max_lng: self.max_lng + degrees,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
