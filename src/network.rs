//! # Road Network
//!
//! Read-only directed road graph with the three queries the matcher needs:
//! nearest edge, nearest node and shortest path.
//!
//! Node and edge geometry arrive as WGS84 lon/lat and are projected once,
//! on construction, into the planar meters of the network's own
//! [`LocalProjection`]. Every query takes and returns planar coordinates.
//!
//! - Edges are indexed leg by leg (each straight piece of their polyline)
//!   in an R-tree, so nearest-edge is exact point-to-segment distance.
//! - Nodes are indexed in a second R-tree for nearest-node.
//! - Shortest paths run A* with a zero heuristic over edge lengths.

use std::collections::HashMap;
use std::fmt;

use geo::{Coord, Line, LineString};
use log::info;
use ordered_float::OrderedFloat;
use petgraph::algo::astar;
use petgraph::graph::{DiGraph, NodeIndex};
use rstar::{PointDistance, RTree, RTreeObject, AABB};

use crate::error::{PipelineError, Result};
use crate::geo_utils::{planar_length, point_to_leg, LocalProjection};
use crate::Bounds;

/// Squared distance below which two legs are equally near a point.
const TIE_TOLERANCE_M2: f64 = 1e-12;

// =============================================================================
// Public Types
// =============================================================================

/// Edge key as used by OSM-derived multigraphs: origin node, destination
/// node and a discriminator for parallel edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EdgeId {
    pub u: i64,
    pub v: i64,
    pub key: u32,
}

impl EdgeId {
    pub fn new(u: i64, v: i64, key: u32) -> Self {
        Self { u, v, key }
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.u, self.v, self.key)
    }
}

/// Network node as supplied by the caller, in lon/lat degrees.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NetworkNode {
    pub id: i64,
    pub lon: f64,
    pub lat: f64,
}

/// Network edge as supplied by the caller.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NetworkEdge {
    pub id: EdgeId,
    /// Polyline as (lon, lat) pairs. Empty means a straight line between
    /// the end nodes.
    pub geometry: Vec<(f64, f64)>,
    pub name: Option<String>,
    /// Length in meters. Computed from the geometry when absent.
    pub length: Option<f64>,
}

/// An edge as stored by the network, geometry in planar meters.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeInfo {
    pub id: EdgeId,
    pub name: Option<String>,
    pub length: f64,
    pub line: LineString,
}

// =============================================================================
// R-tree Entries
// =============================================================================

/// One straight piece of an edge polyline.
#[derive(Debug, Clone, Copy)]
struct IndexedLeg {
    edge: usize,
    start: [f64; 2],
    end: [f64; 2],
}

impl IndexedLeg {
    fn line(&self) -> Line {
        Line::new(
            Coord { x: self.start[0], y: self.start[1] },
            Coord { x: self.end[0], y: self.end[1] },
        )
    }
}

impl RTreeObject for IndexedLeg {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(self.start, self.end)
    }
}

impl PointDistance for IndexedLeg {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let d = point_to_leg(&self.line(), Coord { x: point[0], y: point[1] });
        d * d
    }
}

#[derive(Debug, Clone, Copy)]
struct IndexedNode {
    idx: NodeIndex,
    x: f64,
    y: f64,
}

impl RTreeObject for IndexedNode {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point([self.x, self.y])
    }
}

impl PointDistance for IndexedNode {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let dx = self.x - point[0];
        let dy = self.y - point[1];
        dx * dx + dy * dy
    }
}

// =============================================================================
// Road Network
// =============================================================================

/// Shared, read-only road network.
#[derive(Debug)]
pub struct RoadNetwork {
    projection: LocalProjection,
    /// Node weights are caller node ids, edge weights index `edges`.
    graph: DiGraph<i64, usize>,
    node_lookup: HashMap<i64, NodeIndex>,
    node_coords: Vec<Coord>,
    edges: Vec<EdgeInfo>,
    edge_lookup: HashMap<EdgeId, usize>,
    leg_tree: RTree<IndexedLeg>,
    node_tree: RTree<IndexedNode>,
}

impl RoadNetwork {
    /// Build the graph and spatial indexes.
    ///
    /// Fails if an edge references a node that was not supplied, or if an
    /// edge has no usable geometry (a self-loop without a polyline).
    ///
    /// ```
    /// use episode_router::{EdgeId, NetworkEdge, NetworkNode, RoadNetwork};
    /// let nodes = vec![
    ///     NetworkNode { id: 1, lon: -79.920, lat: 43.26 },
    ///     NetworkNode { id: 2, lon: -79.915, lat: 43.26 },
    /// ];
    /// let edges = vec![NetworkEdge {
    ///     id: EdgeId::new(1, 2, 0),
    ///     geometry: vec![],
    ///     name: Some("Main St".to_string()),
    ///     length: None,
    /// }];
    /// let network = RoadNetwork::new(nodes, edges).unwrap();
    /// assert_eq!(network.shortest_path(1, 2), Some(vec![1, 2]));
    /// assert_eq!(network.shortest_path(2, 1), None);
    /// ```
    pub fn new(nodes: Vec<NetworkNode>, edges: Vec<NetworkEdge>) -> Result<Self> {
        let lon_lat: Vec<Coord> = nodes.iter().map(|n| Coord { x: n.lon, y: n.lat }).collect();
        let projection = LocalProjection::centered_on(&lon_lat);

        let mut graph = DiGraph::with_capacity(nodes.len(), edges.len());
        let mut node_lookup = HashMap::with_capacity(nodes.len());
        let mut node_coords = Vec::with_capacity(nodes.len());
        for node in &nodes {
            let idx = graph.add_node(node.id);
            node_lookup.insert(node.id, idx);
            node_coords.push(projection.project(node.lon, node.lat));
        }

        let mut stored = Vec::with_capacity(edges.len());
        let mut edge_lookup = HashMap::with_capacity(edges.len());
        let mut legs = Vec::new();
        for edge in edges {
            let resolve = |node: i64| {
                node_lookup
                    .get(&node)
                    .copied()
                    .ok_or(PipelineError::UnknownNode { edge: edge.id, node })
            };
            let (u, v) = (resolve(edge.id.u)?, resolve(edge.id.v)?);

            let line: LineString = if edge.geometry.len() >= 2 {
                edge.geometry.iter().map(|&(lon, lat)| projection.project(lon, lat)).collect()
            } else if u != v {
                LineString::new(vec![node_coords[u.index()], node_coords[v.index()]])
            } else {
                return Err(PipelineError::EmptyEdgeGeometry { edge: edge.id });
            };

            let idx = stored.len();
            legs.extend(line.lines().map(|leg| IndexedLeg {
                edge: idx,
                start: [leg.start.x, leg.start.y],
                end: [leg.end.x, leg.end.y],
            }));
            graph.add_edge(u, v, idx);
            edge_lookup.insert(edge.id, idx);
            stored.push(EdgeInfo {
                id: edge.id,
                length: edge.length.unwrap_or_else(|| planar_length(&line)),
                name: edge.name,
                line,
            });
        }

        let node_tree = RTree::bulk_load(
            node_coords
                .iter()
                .enumerate()
                .map(|(i, c)| IndexedNode { idx: NodeIndex::new(i), x: c.x, y: c.y })
                .collect(),
        );
        let leg_tree = RTree::bulk_load(legs);

        info!(
            "Built road network with {} nodes, {} edges and {} indexed legs",
            graph.node_count(),
            stored.len(),
            leg_tree.size()
        );

        Ok(Self {
            projection,
            graph,
            node_lookup,
            node_coords,
            edges: stored,
            edge_lookup,
            leg_tree,
            node_tree,
        })
    }

    pub fn projection(&self) -> &LocalProjection {
        &self.projection
    }

    /// True when there is nothing to match against.
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Edge whose polyline passes closest to `p`. Ties (a point on a shared
    /// node) go to the edge supplied first.
    pub fn nearest_edge(&self, p: Coord) -> Option<EdgeId> {
        let mut candidates = self.leg_tree.nearest_neighbor_iter_with_distance_2(&[p.x, p.y]);
        let (first, best) = candidates.next()?;
        let mut chosen = first.edge;
        for (leg, d2) in candidates {
            if d2 > best + TIE_TOLERANCE_M2 {
                break;
            }
            chosen = chosen.min(leg.edge);
        }
        Some(self.edges[chosen].id)
    }

    /// Id of the node closest to `p`.
    pub fn nearest_node(&self, p: Coord) -> Option<i64> {
        self.node_tree
            .nearest_neighbor(&[p.x, p.y])
            .map(|n| self.graph[n.idx])
    }

    /// Node ids along the shortest length-weighted path, both ends
    /// included. `None` when either node is unknown or unreachable.
    pub fn shortest_path(&self, from: i64, to: i64) -> Option<Vec<i64>> {
        let start = *self.node_lookup.get(&from)?;
        let goal = *self.node_lookup.get(&to)?;

        let (_, path) = astar(
            &self.graph,
            start,
            |n| n == goal,
            |e| OrderedFloat(self.edges[*e.weight()].length),
            |_| OrderedFloat(0.0),
        )?;

        Some(path.into_iter().map(|idx| self.graph[idx]).collect())
    }

    pub fn edge(&self, id: &EdgeId) -> Option<&EdgeInfo> {
        self.edge_lookup.get(id).map(|&idx| &self.edges[idx])
    }

    /// Planar coordinate of a node.
    pub fn node_coord(&self, id: i64) -> Option<Coord> {
        self.node_lookup.get(&id).map(|idx| self.node_coords[idx.index()])
    }

    /// True if any edge passes through the lon/lat box.
    pub fn covers(&self, bounds: &Bounds) -> bool {
        let low = self.projection.project(bounds.min_lng, bounds.min_lat);
        let high = self.projection.project(bounds.max_lng, bounds.max_lat);
        let envelope = AABB::from_corners([low.x, low.y], [high.x, high.y]);
        self.leg_tree.locate_in_envelope_intersecting(&envelope).next().is_some()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
