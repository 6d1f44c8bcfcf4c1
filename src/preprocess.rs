//! Raw fix cleanup ahead of segmentation.
//!
//! Repeated positions and physically implausible speeds come from the
//! receiver, not from the traveller, and would otherwise skew both time
//! reconstruction and mode classification.

use std::collections::{BTreeMap, HashSet};

use log::info;

use crate::GpsFix;

/// Configuration for fix cleanup
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PreprocessConfig {
    /// Fixes reporting more than this speed are dropped (km/h).
    /// Default: 180.0
    pub max_speed_kmh: f64,
    /// Drop fixes whose latitude/longitude repeat an earlier fix.
    /// Default: true
    pub drop_duplicate_positions: bool,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            max_speed_kmh: 180.0,
            drop_duplicate_positions: true,
        }
    }
}

/// Remove invalid fixes, repeated positions (first one wins) and speed
/// outliers. Input order is preserved.
pub fn preprocess(fixes: &[GpsFix], config: &PreprocessConfig) -> Vec<GpsFix> {
    let mut seen: HashSet<(u64, u64)> = HashSet::new();

    let kept: Vec<GpsFix> = fixes
        .iter()
        .filter(|f| f.is_valid())
        .filter(|f| {
            !config.drop_duplicate_positions
                || seen.insert((f.latitude.to_bits(), f.longitude.to_bits()))
        })
        .filter(|f| f.speed_kmh <= config.max_speed_kmh)
        .cloned()
        .collect();

    if kept.len() != fixes.len() {
        info!("Preprocess dropped {} of {} fixes", fixes.len() - kept.len(), fixes.len());
    }
    kept
}

/// Partition a mixed stream by serial id, each device's fixes sorted by
/// record id.
pub fn group_by_serial(fixes: Vec<GpsFix>) -> BTreeMap<String, Vec<GpsFix>> {
    let mut groups: BTreeMap<String, Vec<GpsFix>> = BTreeMap::new();
    for fix in fixes {
        groups.entry(fix.serial_id.clone()).or_default().push(fix);
    }
    for group in groups.values_mut() {
        group.sort_by_key(|f| f.record_id);
    }
    groups
}
