//! Error type shared by every pipeline stage.
//!
//! Only conditions that make a stage's output meaningless are errors.
//! Recoverable situations (a network that does not cover a trip, a gap with
//! no path through the graph, implausible reconstructed seconds) are reported
//! through the stage results instead.

use thiserror::Error;

use crate::network::EdgeId;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// The fix's local time does not look like `month/day/year hour:minute`.
    #[error("record {record_id}: unparsable local timestamp {value:?}")]
    InvalidTimestamp { record_id: i64, value: String },

    /// The reconstructed time falls outside the representable calendar.
    #[error("record {record_id}: reconstructed time is out of range")]
    InvalidTime { record_id: i64 },

    /// An edge refers to a node id that was not supplied with the network.
    #[error("edge {edge}: unknown node {node}")]
    UnknownNode { edge: EdgeId, node: i64 },

    /// An edge has no usable geometry.
    #[error("edge {edge}: geometry needs at least two coordinates")]
    EmptyEdgeGeometry { edge: EdgeId },
}

pub type Result<T> = std::result::Result<T, PipelineError>;
