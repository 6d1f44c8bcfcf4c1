//! Nearest-edge map matching.
//!
//! Every point is snapped to the closest network edge, with two local
//! corrections for the typical misassignments around intersections, then
//! projected onto the nearest straight leg of that edge. Matching is
//! strictly sequential: each correction reads the already-corrected
//! assignment of the previous point.

use geo::{Coord, Line};
use log::{debug, info};

use crate::extract::TripSegment;
use crate::geo_utils::{line_string_gap, point_to_leg, project_onto_leg};
use crate::network::{EdgeId, RoadNetwork};

/// Configuration for map matching
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MatchConfig {
    /// The last point moves to the previous point's edge when the two edges
    /// lie within this distance of each other (meters). Default: 10.0
    pub terminal_snap_m: f64,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self { terminal_snap_m: 10.0 }
    }
}

/// A trip point snapped onto the road network. Coordinates are planar
/// meters of the network projection.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MatchedPoint {
    pub serial_id: String,
    pub record_id: i64,
    pub edge: EdgeId,
    pub edge_name: Option<String>,
    /// Straight piece of the edge the point was projected onto.
    pub leg: Line,
    pub coord: Coord,
}

/// Match a trip segment, projecting its fixes with the network projection.
pub fn match_trip(
    trip: &TripSegment,
    network: &RoadNetwork,
    config: &MatchConfig,
) -> Vec<MatchedPoint> {
    let proj = network.projection();
    let points: Vec<(i64, Coord)> = trip
        .points
        .iter()
        .map(|p| (p.fix.record_id, proj.project_fix(&p.fix)))
        .collect();
    match_points(&trip.serial_id, &points, network, config)
}

/// Match `(record_id, planar coordinate)` points in order.
///
/// Returns an empty list for an empty network or empty input.
pub fn match_points(
    serial_id: &str,
    points: &[(i64, Coord)],
    network: &RoadNetwork,
    config: &MatchConfig,
) -> Vec<MatchedPoint> {
    let Some(mut edges) = points
        .iter()
        .map(|&(_, p)| network.nearest_edge(p))
        .collect::<Option<Vec<EdgeId>>>()
    else {
        return vec![];
    };
    let n = edges.len();

    for i in 1..n.saturating_sub(1) {
        if edges[i - 1] == edges[i + 1] && edges[i] != edges[i - 1] {
            debug!(
                "Record {} moved from edge {} to {} between neighbours",
                points[i].0, edges[i], edges[i - 1]
            );
            edges[i] = edges[i - 1];
        }
    }

    if n >= 2 && edges[n - 1] != edges[n - 2] {
        let close = match (network.edge(&edges[n - 1]), network.edge(&edges[n - 2])) {
            (Some(last), Some(prev)) => {
                line_string_gap(&last.line, &prev.line) <= config.terminal_snap_m
            }
            _ => false,
        };
        if close {
            debug!("Last record {} moved onto edge {}", points[n - 1].0, edges[n - 2]);
            edges[n - 1] = edges[n - 2];
        }
    }

    let matched: Vec<MatchedPoint> = points
        .iter()
        .zip(edges)
        .filter_map(|(&(record_id, p), edge)| {
            let info = network.edge(&edge)?;
            let leg = nearest_leg(info.line.lines(), p)?;
            Some(MatchedPoint {
                serial_id: serial_id.to_string(),
                record_id,
                edge,
                edge_name: info.name.clone(),
                leg,
                coord: project_onto_leg(&leg, p),
            })
        })
        .collect();

    info!("Matched {} points for {}", matched.len(), serial_id);
    matched
}

/// First leg at minimum distance from `p`.
fn nearest_leg(legs: impl Iterator<Item = Line>, p: Coord) -> Option<Line> {
    let mut best: Option<(Line, f64)> = None;
    for leg in legs {
        let d = point_to_leg(&leg, p);
        if best.map_or(true, |(_, best_d)| d < best_d) {
            best = Some((leg, d));
        }
    }
    best.map(|(leg, _)| leg)
}
