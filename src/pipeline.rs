//! # Device Pipeline
//!
//! Runs every stage for one device:
//! segmentation → extraction → matching → gap filling → assembly →
//! variables.
//!
//! Devices share nothing but the read-only [`RoadNetwork`], so a batch can
//! be spread over a rayon pool with the `parallel` feature.

use std::collections::BTreeMap;

use log::{info, warn};

use crate::error::Result;
use crate::extract::{
    extract_stop_segment, extract_trip_segment, fill_episodes, ExtractConfig, NetworkMode,
    StopSegment, TripSegment,
};
use crate::gaps::{apply_patches, detect_and_fill_gaps, Gap, GapConfig, UnfilledGap};
use crate::geo_utils::padded_bounds;
use crate::matching::{match_trip, MatchConfig, MatchedPoint};
use crate::network::RoadNetwork;
use crate::preprocess::{group_by_serial, preprocess, PreprocessConfig};
use crate::route::{assemble_route, Route};
use crate::segmentation::{segment_fixes, Episode, SegmentationConfig};
use crate::variables::{generate_variables, RouteVariables, TurnConfig};
use crate::GpsFix;

/// Configuration for the whole pipeline
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PipelineConfig {
    pub preprocess: PreprocessConfig,
    pub segmentation: SegmentationConfig,
    pub extract: ExtractConfig,
    pub matching: MatchConfig,
    pub gaps: GapConfig,
    pub turns: TurnConfig,
    /// Padding around a trip's bounding box that the network must reach
    /// into (degrees). Default: 0.005
    pub coverage_padding_deg: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            preprocess: PreprocessConfig::default(),
            segmentation: SegmentationConfig::default(),
            extract: ExtractConfig::default(),
            matching: MatchConfig::default(),
            gaps: GapConfig::default(),
            turns: TurnConfig::default(),
            coverage_padding_deg: 0.005,
        }
    }
}

/// Why a device got no route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SkipReason {
    /// Fewer than two trip points survived extraction.
    TooFewPoints,
    /// The road network has no edges.
    EmptyNetwork,
    /// No network edge falls inside the trip's padded bounding box.
    OutOfCoverage,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RouteStatus {
    Routed {
        route: Route,
        variables: RouteVariables,
        /// Matched points with snap patches applied.
        matched: Vec<MatchedPoint>,
        gaps: Vec<Gap>,
        unfilled: Vec<UnfilledGap>,
    },
    Skipped(SkipReason),
}

impl RouteStatus {
    pub fn route(&self) -> Option<&Route> {
        match self {
            RouteStatus::Routed { route, .. } => Some(route),
            RouteStatus::Skipped(_) => None,
        }
    }

    pub fn variables(&self) -> Option<&RouteVariables> {
        match self {
            RouteStatus::Routed { variables, .. } => Some(variables),
            RouteStatus::Skipped(_) => None,
        }
    }
}

/// Everything produced for one device.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceOutput {
    pub serial_id: String,
    pub episodes: Vec<Episode>,
    pub trip: TripSegment,
    pub stops: StopSegment,
    /// Great-circle length of the trip before matching (meters).
    pub trip_length_m: f64,
    /// Network type the trip needs, `None` without walk or drive fixes.
    pub network_mode: Option<NetworkMode>,
    pub status: RouteStatus,
}

/// Run the full pipeline for one device.
///
/// `fixes` must belong to `serial_id` and be sorted by record id (see
/// [`group_by_serial`]). Fails only on an unparsable timestamp; a network
/// that cannot serve the trip yields [`RouteStatus::Skipped`].
pub fn process_device(
    serial_id: &str,
    fixes: &[GpsFix],
    network: &RoadNetwork,
    config: &PipelineConfig,
) -> Result<DeviceOutput> {
    let episodes = segment_fixes(fixes, &config.segmentation)?;
    let labeled = fill_episodes(fixes, &episodes);
    let trip = extract_trip_segment(serial_id, &labeled, &config.extract);
    let stops = extract_stop_segment(serial_id, &labeled);
    let network_mode = trip.network_mode();
    let trip_length_m = trip.length();

    let status = route_trip(&trip, network, config);

    Ok(DeviceOutput {
        serial_id: serial_id.to_string(),
        episodes,
        trip,
        stops,
        trip_length_m,
        network_mode,
        status,
    })
}

fn route_trip(trip: &TripSegment, network: &RoadNetwork, config: &PipelineConfig) -> RouteStatus {
    if trip.len() < 2 {
        info!("{}: {} trip points, nothing to route", trip.serial_id, trip.len());
        return RouteStatus::Skipped(SkipReason::TooFewPoints);
    }
    if network.is_empty() {
        warn!("{}: road network is empty, skipping matching", trip.serial_id);
        return RouteStatus::Skipped(SkipReason::EmptyNetwork);
    }

    let trip_fixes: Vec<GpsFix> = trip.points.iter().map(|p| p.fix.clone()).collect();
    let covered = padded_bounds(&trip_fixes, config.coverage_padding_deg)
        .is_some_and(|area| network.covers(&area));
    if !covered {
        warn!("{}: road network does not cover the trip area, skipping matching", trip.serial_id);
        return RouteStatus::Skipped(SkipReason::OutOfCoverage);
    }

    let matched = match_trip(trip, network, &config.matching);
    let filled = detect_and_fill_gaps(&matched, network, &config.matching, &config.gaps);
    let matched = apply_patches(&matched, &filled.patches);

    let route = assemble_route(&trip.serial_id, &matched, &filled.gaps);
    let variables = generate_variables(&route, network, &config.turns);

    RouteStatus::Routed {
        route,
        variables,
        matched,
        gaps: filled.gaps,
        unfilled: filled.unfilled,
    }
}

/// Clean a mixed fix stream, split it by device and run each device in
/// turn. Results are keyed by serial id.
pub fn process_devices(
    fixes: &[GpsFix],
    network: &RoadNetwork,
    config: &PipelineConfig,
) -> BTreeMap<String, Result<DeviceOutput>> {
    let groups = group_by_serial(preprocess(fixes, &config.preprocess));
    info!("Processing {} devices", groups.len());

    groups
        .into_iter()
        .map(|(serial, device_fixes)| {
            let output = process_device(&serial, &device_fixes, network, config);
            (serial, output)
        })
        .collect()
}

/// Same as [`process_devices`], one device per rayon task.
#[cfg(feature = "parallel")]
pub fn process_devices_parallel(
    fixes: &[GpsFix],
    network: &RoadNetwork,
    config: &PipelineConfig,
) -> BTreeMap<String, Result<DeviceOutput>> {
    use rayon::prelude::*;

    let groups = group_by_serial(preprocess(fixes, &config.preprocess));
    info!("Processing {} devices in parallel", groups.len());

    groups
        .into_par_iter()
        .map(|(serial, device_fixes)| {
            let output = process_device(&serial, &device_fixes, network, config);
            (serial, output)
        })
        .collect()
}
