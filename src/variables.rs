//! # Route-Choice Variables
//!
//! Summary statistics of an assembled route used in route choice models:
//! travelled distance, left and right turns, and the longest stretch along
//! a single street.
//!
//! Street identity at a route vertex is the name of the nearest edge among
//! the edges the route uses. A bend counts as a turn only when the street
//! before it and the street after it differ, so a curving road is not a
//! turn.

use std::collections::BTreeSet;

use geo::{Coord, LineString};
use log::debug;

use crate::geo_utils::{planar_distance, planar_length, point_to_line_string};
use crate::network::RoadNetwork;
use crate::route::Route;

/// Configuration for turn detection
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TurnConfig {
    /// Minimum deviation from straight ahead for a bend to count
    /// (degrees). Default: 30.0
    pub min_deflection_deg: f64,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self { min_deflection_deg: 30.0 }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TurnCounts {
    pub left: usize,
    pub right: usize,
    pub total: usize,
}

/// Longest run along one street and the number of streets seen.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LongestLeg {
    pub street: Option<String>,
    pub length: f64,
    pub num_streets: usize,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RouteVariables {
    pub serial_id: String,
    pub distance: f64,
    pub left_turns: usize,
    pub right_turns: usize,
    pub total_turns: usize,
    pub num_streets: usize,
    pub longest_leg_street: Option<String>,
    pub longest_leg_length: f64,
}

/// Edges of one route with their street names, in edge id order.
struct Streets<'a> {
    candidates: Vec<(&'a LineString, Option<&'a str>)>,
}

impl<'a> Streets<'a> {
    fn new(route: &Route, network: &'a RoadNetwork) -> Self {
        let candidates = route
            .edges
            .iter()
            .filter_map(|id| network.edge(id))
            .map(|e| (&e.line, e.name.as_deref()))
            .collect();
        Self { candidates }
    }

    /// Name of the first edge at minimum distance from `p`.
    fn nearest(&self, p: Coord) -> Option<&'a str> {
        let mut best: Option<(f64, Option<&'a str>)> = None;
        for &(line, name) in &self.candidates {
            let d = point_to_line_string(line, p);
            if best.map_or(true, |(best_d, _)| d < best_d) {
                best = Some((d, name));
            }
        }
        best.and_then(|(_, name)| name)
    }
}

/// Count left and right turns along the route.
///
/// At each interior vertex the angle between the incoming and outgoing
/// segments is measured; a deviation from straight of more than
/// `min_deflection_deg`, with different streets on either side, is a turn.
/// The sign of the cross product of the chord and the incoming segment
/// gives the direction: negative is left.
pub fn count_turns(route: &Route, network: &RoadNetwork, config: &TurnConfig) -> TurnCounts {
    let streets = Streets::new(route, network);
    count_turns_with(&route.line, &streets, config)
}

fn count_turns_with(line: &LineString, streets: &Streets<'_>, config: &TurnConfig) -> TurnCounts {
    let mut counts = TurnCounts::default();

    for w in line.0.windows(3) {
        let (before, at, after) = (w[0], w[1], w[2]);
        let incoming = at - before;
        let outgoing = at - after;
        let (m1, m2) = (incoming.x.hypot(incoming.y), outgoing.x.hypot(outgoing.y));
        if m1 == 0.0 || m2 == 0.0 {
            continue;
        }

        let dot = incoming.x * outgoing.x + incoming.y * outgoing.y;
        let cos = (dot / (m1 * m2)).clamp(-1.0, 1.0);
        let angle = cos.acos().to_degrees();
        if (180.0 - angle).abs() <= config.min_deflection_deg {
            continue;
        }
        if streets.nearest(before) == streets.nearest(after) {
            continue;
        }

        let chord = after - before;
        let cross = chord.x * incoming.y - incoming.x * chord.y;
        if cross < 0.0 {
            counts.left += 1;
        } else if cross > 0.0 {
            counts.right += 1;
        }
    }

    counts.total = counts.left + counts.right;
    counts
}

/// Longest contiguous stretch of the route along one street.
///
/// Each segment is credited to the street of the vertex it starts from.
/// Coming back to a street starts a fresh stretch. Ties keep the first
/// stretch found.
pub fn longest_leg(route: &Route, network: &RoadNetwork) -> LongestLeg {
    let streets = Streets::new(route, network);
    longest_leg_with(&route.line, &streets)
}

fn longest_leg_with(line: &LineString, streets: &Streets<'_>) -> LongestLeg {
    let coords = &line.0;
    let Some(&first) = coords.first() else {
        return LongestLeg::default();
    };

    let mut current = streets.nearest(first);
    let mut seen: BTreeSet<Option<&str>> = BTreeSet::from([current]);
    let mut run = 0.0;
    let mut best = (current, 0.0);

    for w in coords.windows(2) {
        run += planar_distance(w[0], w[1]);
        if run > best.1 {
            best = (current, run);
        }
        let street = streets.nearest(w[1]);
        if street != current {
            current = street;
            run = 0.0;
            seen.insert(street);
        }
    }

    LongestLeg {
        street: best.0.map(str::to_string),
        length: best.1,
        num_streets: seen.len(),
    }
}

/// All route-choice variables for one route.
pub fn generate_variables(
    route: &Route,
    network: &RoadNetwork,
    config: &TurnConfig,
) -> RouteVariables {
    let streets = Streets::new(route, network);
    let turns = count_turns_with(&route.line, &streets, config);
    let leg = longest_leg_with(&route.line, &streets);

    let variables = RouteVariables {
        serial_id: route.serial_id.clone(),
        distance: planar_length(&route.line),
        left_turns: turns.left,
        right_turns: turns.right,
        total_turns: turns.total,
        num_streets: leg.num_streets,
        longest_leg_street: leg.street,
        longest_leg_length: leg.length,
    };
    debug!("Route variables for {}: {:?}", route.serial_id, variables);
    variables
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{EdgeId, NetworkEdge, NetworkNode};

    fn approx_eq(a: f64, b: f64, epsilon: f64) -> bool {
        (a - b).abs() < epsilon
    }

    /// A plus-shaped junction at node 0: King St runs west-east through it,
    /// Bay St south-north. Arms are roughly 100 m long.
    fn junction() -> RoadNetwork {
        let nodes = vec![
            NetworkNode { id: 0, lon: -79.9200, lat: 43.2600 },
            NetworkNode { id: 1, lon: -79.9212, lat: 43.2600 }, // west
            NetworkNode { id: 2, lon: -79.9188, lat: 43.2600 }, // east
            NetworkNode { id: 3, lon: -79.9200, lat: 43.2591 }, // south
            NetworkNode { id: 4, lon: -79.9200, lat: 43.2609 }, // north
        ];
        let edge = |u, v, name: &str| NetworkEdge {
            id: EdgeId::new(u, v, 0),
            geometry: vec![],
            name: Some(name.to_string()),
            length: None,
        };
        let edges = vec![
            edge(1, 0, "King St"),
            edge(0, 2, "King St"),
            edge(3, 0, "Bay St"),
            edge(0, 4, "Bay St"),
        ];
        RoadNetwork::new(nodes, edges).unwrap()
    }

    fn route_through(network: &RoadNetwork, nodes: &[i64]) -> Route {
        let line: LineString = nodes.iter().map(|&n| network.node_coord(n).unwrap()).collect();
        let edges = nodes
            .windows(2)
            .map(|w| EdgeId::new(w[0], w[1], 0))
            .filter(|id| network.edge(id).is_some())
            .collect();
        Route { serial_id: "dev".to_string(), edges, line }
    }

    #[test]
    fn test_straight_route_has_no_turns() {
        let network = junction();
        let route = route_through(&network, &[1, 0, 2]);
        let turns = count_turns(&route, &network, &TurnConfig::default());
        assert_eq!(turns, TurnCounts::default());
    }

    #[test]
    fn test_left_turn() {
        let network = junction();
        // Eastbound on King, then north on Bay
        let route = route_through(&network, &[1, 0, 4]);
        let turns = count_turns(&route, &network, &TurnConfig::default());
        assert_eq!(turns, TurnCounts { left: 1, right: 0, total: 1 });
    }

    #[test]
    fn test_right_turn() {
        let network = junction();
        // Northbound on Bay, then east on King
        let route = route_through(&network, &[3, 0, 2]);
        let turns = count_turns(&route, &network, &TurnConfig::default());
        assert_eq!(turns, TurnCounts { left: 0, right: 1, total: 1 });
    }

    #[test]
    fn test_bend_on_one_street_is_not_a_turn() {
        let network = junction();
        let proj = *network.projection();
        // Sharp bend, but every vertex is nearest to King St
        let line = LineString::new(vec![
            proj.project(-79.9210, 43.26000),
            proj.project(-79.9205, 43.26003),
            proj.project(-79.9210, 43.26006),
        ]);
        let route = Route {
            serial_id: "dev".to_string(),
            edges: [EdgeId::new(1, 0, 0), EdgeId::new(0, 4, 0)].into_iter().collect(),
            line,
        };
        assert_eq!(count_turns(&route, &network, &TurnConfig::default()).total, 0);
    }

    #[test]
    fn test_zero_length_segments_skipped() {
        let network = junction();
        let mut route = route_through(&network, &[1, 0, 4]);
        let at = route.line.0[1];
        route.line.0.insert(1, at);
        // Both windows around the doubled vertex have a zero-length side
        let turns = count_turns(&route, &network, &TurnConfig::default());
        assert_eq!(turns.total, 0);
    }

    #[test]
    fn test_longest_leg_and_street_count() {
        let network = junction();
        let route = route_through(&network, &[1, 0, 4]);
        let west = planar_distance(network.node_coord(1).unwrap(), network.node_coord(0).unwrap());
        let north = planar_distance(network.node_coord(0).unwrap(), network.node_coord(4).unwrap());
        assert!(north > west);

        let leg = longest_leg(&route, &network);
        assert_eq!(leg.num_streets, 2);
        assert_eq!(leg.street.as_deref(), Some("Bay St"));
        assert!(approx_eq(leg.length, north, 1e-6));
    }

    #[test]
    fn test_revisit_resets_leg() {
        let a = LineString::new(vec![Coord { x: -10.0, y: 0.0 }, Coord { x: 200.0, y: 0.0 }]);
        let b = LineString::new(vec![Coord { x: -10.0, y: 2.0 }, Coord { x: 200.0, y: 2.0 }]);
        let streets = Streets { candidates: vec![(&a, Some("A")), (&b, Some("B"))] };
        // A for 32 m, B for 22 m, back on A for 40 m
        let line = LineString::new(vec![
            Coord { x: 0.0, y: 0.0 },
            Coord { x: 30.0, y: 0.0 },
            Coord { x: 30.0, y: 2.0 },
            Coord { x: 50.0, y: 2.0 },
            Coord { x: 50.0, y: 0.0 },
            Coord { x: 90.0, y: 0.0 },
        ]);
        let leg = longest_leg_with(&line, &streets);
        assert_eq!(leg.street.as_deref(), Some("A"));
        assert!(approx_eq(leg.length, 40.0, 1e-9));
        assert_eq!(leg.num_streets, 2);
    }

    #[test]
    fn test_empty_route_variables() {
        let streets = Streets { candidates: vec![] };
        assert_eq!(longest_leg_with(&LineString::new(vec![]), &streets), LongestLeg::default());
    }

    #[test]
    fn test_generate_variables() {
        let network = junction();
        let route = route_through(&network, &[1, 0, 4]);
        let vars = generate_variables(&route, &network, &TurnConfig::default());
        assert_eq!(vars.serial_id, "dev");
        assert_eq!(vars.left_turns, 1);
        assert_eq!(vars.total_turns, 1);
        assert!(approx_eq(vars.distance, route.length(), 1e-9));
        assert_eq!(vars.num_streets, 2);
    }
}
