//! Route assembly from matched points and gap fills.

use std::collections::{BTreeSet, HashMap};

use geo::{Coord, LineString};
use log::info;

use crate::gaps::Gap;
use crate::geo_utils::{planar_length, LocalProjection};
use crate::matching::MatchedPoint;
use crate::network::EdgeId;

/// One device's reconstructed path through the network.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Route {
    pub serial_id: String,
    /// Every edge a matched point sits on or a gap fill travels.
    pub edges: BTreeSet<EdgeId>,
    /// Planar meters of the network projection, no repeated vertices.
    pub line: LineString,
}

impl Route {
    pub fn length(&self) -> f64 {
        planar_length(&self.line)
    }

    /// Route geometry as lon/lat degrees.
    pub fn to_lon_lat(&self, projection: &LocalProjection) -> LineString {
        self.line.0.iter().map(|&c| projection.unproject(c)).collect()
    }
}

/// Join matched points (with snap patches already applied) and gap fills
/// into one line.
///
/// A point that opens a gap contributes the fill's coordinates instead of
/// its own. Consecutive duplicate coordinates are dropped.
pub fn assemble_route(serial_id: &str, points: &[MatchedPoint], gaps: &[Gap]) -> Route {
    let fills: HashMap<i64, &Gap> = gaps.iter().map(|g| (g.origin_record_id, g)).collect();

    let mut coords: Vec<Coord> = Vec::with_capacity(points.len());
    let mut push = |c: Coord| {
        if coords.last() != Some(&c) {
            coords.push(c);
        }
    };
    for point in points {
        match fills.get(&point.record_id) {
            Some(gap) => gap.line.0.iter().for_each(|&c| push(c)),
            None => push(point.coord),
        }
    }

    let edges: BTreeSet<EdgeId> = points
        .iter()
        .map(|p| p.edge)
        .chain(gaps.iter().flat_map(|g| g.edges.iter().copied()))
        .collect();

    let route = Route {
        serial_id: serial_id.to_string(),
        edges,
        line: LineString::new(coords),
    };
    info!(
        "Assembled route for {}: {} vertices, {} edges, {:.0} m",
        serial_id,
        route.line.0.len(),
        route.edges.len(),
        route.length()
    );
    route
}
