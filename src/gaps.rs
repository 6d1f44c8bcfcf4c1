//! # Gap Detection and Filling
//!
//! Consecutive matched points that jump between unrelated edges, or change
//! street name, leave a hole in the route. Each hole is bridged with the
//! shortest network path between the nodes nearest to its two ends.
//!
//! A fill can run past raw points that come after the gap. Those points are
//! moved onto the fill's last coordinate so the assembled route does not
//! double back over them. The moves are returned as [`SnapPatch`]es and
//! applied with [`apply_patches`]; the matched points themselves are never
//! modified here.

use geo::{Coord, LineString};
use log::{debug, info, warn};

use crate::geo_utils::{planar_distance, point_to_line_string};
use crate::matching::{match_points, MatchConfig, MatchedPoint};
use crate::network::{EdgeId, RoadNetwork};

/// Configuration for gap detection
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GapConfig {
    /// Points on different edges further apart than this are a gap
    /// (meters). Default: 50.0
    pub max_same_street_jump_m: f64,
    /// Distance under which a later point counts as covered by a fill
    /// line (meters). Default: 1e-8
    pub snap_tolerance: f64,
}

impl Default for GapConfig {
    fn default() -> Self {
        Self {
            max_same_street_jump_m: 50.0,
            snap_tolerance: 1e-8,
        }
    }
}

/// A filled discontinuity between two consecutive matched points.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Gap {
    pub serial_id: String,
    /// Record id of the point just before the gap.
    pub origin_record_id: i64,
    /// Planar fill geometry, from the node nearest the origin point.
    pub line: LineString,
    /// Edges the fill travels, in first-seen order.
    pub edges: Vec<EdgeId>,
}

/// A discontinuity left open because the network has no path across it.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct UnfilledGap {
    pub serial_id: String,
    pub origin_record_id: i64,
    pub next_record_id: i64,
}

/// Replacement coordinate for the matched point at `index`.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SnapPatch {
    pub index: usize,
    pub coord: Coord,
}

#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GapFillResult {
    pub gaps: Vec<Gap>,
    pub unfilled: Vec<UnfilledGap>,
    pub patches: Vec<SnapPatch>,
}

/// Gap predicate between two consecutive matched points.
///
/// True when the points sit on different edges more than
/// `max_same_street_jump_m` apart, or when the street name changes.
pub fn is_gap(prev: &MatchedPoint, next: &MatchedPoint, config: &GapConfig) -> bool {
    discontinuous(prev, prev.coord, next, next.coord, config)
}

fn discontinuous(
    prev: &MatchedPoint,
    prev_coord: Coord,
    next: &MatchedPoint,
    next_coord: Coord,
    config: &GapConfig,
) -> bool {
    (prev.edge != next.edge
        && planar_distance(prev_coord, next_coord) > config.max_same_street_jump_m)
        || prev.edge_name != next.edge_name
}

/// Find and bridge every gap in one device's matched points.
///
/// Detection walks the points in order and sees coordinates already moved
/// by earlier fills. A gap with no path through the network is reported
/// in [`GapFillResult::unfilled`] and skipped.
pub fn detect_and_fill_gaps(
    points: &[MatchedPoint],
    network: &RoadNetwork,
    match_config: &MatchConfig,
    config: &GapConfig,
) -> GapFillResult {
    let mut result = GapFillResult::default();
    let mut coords: Vec<Coord> = points.iter().map(|p| p.coord).collect();

    for i in 1..points.len() {
        let (prev, next) = (&points[i - 1], &points[i]);
        if !discontinuous(prev, coords[i - 1], next, coords[i], config) {
            continue;
        }

        let Some(line) = fill_line(network, coords[i - 1], coords[i]) else {
            warn!(
                "{}: no network path between records {} and {}, leaving the gap open",
                prev.serial_id, prev.record_id, next.record_id
            );
            result.unfilled.push(UnfilledGap {
                serial_id: prev.serial_id.clone(),
                origin_record_id: prev.record_id,
                next_record_id: next.record_id,
            });
            continue;
        };

        let edges = traversed_edges(&prev.serial_id, prev.record_id, &line, network, match_config);

        // Points the fill already passes over collapse onto its end
        let Some(&terminal) = line.0.last() else { continue };
        for (j, coord) in coords.iter_mut().enumerate().skip(i) {
            if point_to_line_string(&line, *coord) >= config.snap_tolerance {
                break;
            }
            debug!(
                "{}: record {} snapped to the end of the fill",
                prev.serial_id, points[j].record_id
            );
            *coord = terminal;
            result.patches.push(SnapPatch { index: j, coord: terminal });
        }

        result.gaps.push(Gap {
            serial_id: prev.serial_id.clone(),
            origin_record_id: prev.record_id,
            line,
            edges,
        });
    }

    if let Some(first) = points.first() {
        info!(
            "{}: {} gaps filled, {} left open, {} points snapped",
            first.serial_id,
            result.gaps.len(),
            result.unfilled.len(),
            result.patches.len()
        );
    }
    result
}

/// Shortest path between the nodes nearest to `from` and `to`, as planar
/// coordinates. A single-node path is replaced by the straight hop
/// between the two points.
fn fill_line(network: &RoadNetwork, from: Coord, to: Coord) -> Option<LineString> {
    let start = network.nearest_node(from)?;
    let end = network.nearest_node(to)?;
    let path = network.shortest_path(start, end)?;

    if path.len() == 1 {
        return Some(LineString::new(vec![from, to]));
    }
    path.iter()
        .map(|&node| network.node_coord(node))
        .collect::<Option<Vec<Coord>>>()
        .map(LineString::new)
}

fn traversed_edges(
    serial_id: &str,
    record_id: i64,
    line: &LineString,
    network: &RoadNetwork,
    match_config: &MatchConfig,
) -> Vec<EdgeId> {
    let nodes: Vec<(i64, Coord)> = line.0.iter().map(|&c| (record_id, c)).collect();
    let mut edges: Vec<EdgeId> = Vec::new();
    for matched in match_points(serial_id, &nodes, network, match_config) {
        if !edges.contains(&matched.edge) {
            edges.push(matched.edge);
        }
    }
    edges
}

/// Copy of `points` with every patch applied.
pub fn apply_patches(points: &[MatchedPoint], patches: &[SnapPatch]) -> Vec<MatchedPoint> {
    let mut patched = points.to_vec();
    for patch in patches {
        if let Some(point) = patched.get_mut(patch.index) {
            point.coord = patch.coord;
        }
    }
    patched
}
