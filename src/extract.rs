//! Trip and stop segment extraction.
//!
//! Episodes only mark where the travel mode changes. This module spreads
//! each episode's mode over the raw fixes it spans and splits the labeled
//! stream into a trip segment (walk and drive, thinned to a minimum point
//! spacing) and a stop segment.

use log::{debug, info};

use crate::geo_utils::{haversine_distance, polyline_length};
use crate::segmentation::Episode;
use crate::{GpsFix, TravelMode};

/// Configuration for segment extraction
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ExtractConfig {
    /// Minimum great-circle spacing between retained trip points (meters).
    /// Default: 5.0
    pub min_spacing_m: f64,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self { min_spacing_m: 5.0 }
    }
}

/// A raw fix tagged with the mode of the episode it falls in.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LabeledFix {
    pub fix: GpsFix,
    pub mode: TravelMode,
}

/// Walk and drive fixes of one device, ready for map matching.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TripSegment {
    pub serial_id: String,
    pub points: Vec<LabeledFix>,
}

impl TripSegment {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Great-circle length through the retained points, in meters.
    pub fn length(&self) -> f64 {
        polyline_length(self.points.iter().map(|p| &p.fix))
    }

    /// Network type needed to match this trip.
    pub fn network_mode(&self) -> Option<NetworkMode> {
        NetworkMode::from_modes(self.points.iter().map(|p| p.mode))
    }
}

/// Stationary fixes of one device.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StopSegment {
    pub serial_id: String,
    pub points: Vec<LabeledFix>,
}

/// Which road network a trip has to be matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum NetworkMode {
    Walk,
    Drive,
    All,
}

impl NetworkMode {
    /// `None` when neither walking nor driving occurs.
    ///
    /// ```
    /// use episode_router::{NetworkMode, TravelMode};
    /// let modes = [TravelMode::Walk, TravelMode::Drive];
    /// assert_eq!(NetworkMode::from_modes(modes), Some(NetworkMode::All));
    /// assert_eq!(NetworkMode::from_modes([TravelMode::Stop]), None);
    /// ```
    pub fn from_modes(modes: impl IntoIterator<Item = TravelMode>) -> Option<Self> {
        let (mut walk, mut drive) = (false, false);
        for mode in modes {
            walk |= mode == TravelMode::Walk;
            drive |= mode == TravelMode::Drive;
        }
        match (walk, drive) {
            (true, false) => Some(NetworkMode::Walk),
            (false, true) => Some(NetworkMode::Drive),
            (true, true) => Some(NetworkMode::All),
            (false, false) => None,
        }
    }
}

/// Label every fix with the mode of the episode boundary preceding it.
///
/// Boundaries are the representative fixes of the non-invalid episodes.
/// Fixes strictly between two boundaries take the earlier boundary's mode;
/// fixes after the last boundary take the last mode. The result is sorted
/// by record id. Fixes before the first boundary have no mode and are left
/// out.
pub fn fill_episodes(fixes: &[GpsFix], episodes: &[Episode]) -> Vec<LabeledFix> {
    let mut boundaries: Vec<(i64, TravelMode)> = episodes
        .iter()
        .filter(|e| e.mode != TravelMode::Invalid)
        .filter_map(|e| fixes.get(e.representative_index).map(|f| (f.record_id, e.mode)))
        .collect();
    boundaries.sort_by_key(|&(record_id, _)| record_id);

    let Some(&(first_record, _)) = boundaries.first() else {
        return vec![];
    };

    let mut labeled: Vec<LabeledFix> = fixes
        .iter()
        .filter(|f| f.record_id >= first_record)
        .map(|f| {
            // Last boundary at or before this record
            let at = boundaries.partition_point(|&(record_id, _)| record_id <= f.record_id);
            LabeledFix { fix: f.clone(), mode: boundaries[at - 1].1 }
        })
        .collect();
    labeled.sort_by_key(|l| l.fix.record_id);

    debug!("Filled {} episode boundaries over {} fixes", boundaries.len(), labeled.len());
    labeled
}

/// Drop every point closer than `min_spacing_m` to the last retained one.
///
/// The first point is always kept. The last point gets no special
/// treatment, so it is dropped if it sits too close.
///
/// ```
/// use episode_router::{relax_trip, GpsFix, LabeledFix, TravelMode};
/// let points: Vec<LabeledFix> = (0..5)
///     .map(|i| LabeledFix {
///         fix: GpsFix::new(i, "d", "1/1/2023 10:00", 43.26, -79.92 + i as f64 * 1e-5, 20.0),
///         mode: TravelMode::Drive,
///     })
///     .collect();
/// // About 0.8 m apart each: only the first survives
/// assert_eq!(relax_trip(points, 5.0).len(), 1);
/// ```
pub fn relax_trip(points: Vec<LabeledFix>, min_spacing_m: f64) -> Vec<LabeledFix> {
    let mut retained: Vec<LabeledFix> = Vec::with_capacity(points.len());
    for point in points {
        let keep = match retained.last() {
            Some(last) => haversine_distance(&last.fix, &point.fix) >= min_spacing_m,
            None => true,
        };
        if keep {
            retained.push(point);
        }
    }
    retained
}

/// Walk and drive fixes, relaxed to the configured spacing.
pub fn extract_trip_segment(
    serial_id: &str,
    labeled: &[LabeledFix],
    config: &ExtractConfig,
) -> TripSegment {
    let travel: Vec<LabeledFix> = labeled.iter().filter(|l| l.mode.is_travel()).cloned().collect();
    let before = travel.len();
    let points = relax_trip(travel, config.min_spacing_m);
    let trip = TripSegment { serial_id: serial_id.to_string(), points };
    info!(
        "Trip segment for {}: {} travel fixes, {} after relaxing, {:.0} m",
        serial_id,
        before,
        trip.len(),
        trip.length()
    );
    trip
}

pub fn extract_stop_segment(serial_id: &str, labeled: &[LabeledFix]) -> StopSegment {
    StopSegment {
        serial_id: serial_id.to_string(),
        points: labeled.iter().filter(|l| l.mode == TravelMode::Stop).cloned().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo_utils::{haversine_distance, polyline_length};

    fn fix(id: i64, lat: f64, lng: f64) -> GpsFix {
        GpsFix::new(id, "dev", "1/1/2023 10:00", lat, lng, 10.0)
    }

    fn episode(start: usize, end: usize, mode: TravelMode) -> Episode {
        Episode {
            start_index: start,
            end_index: end,
            mode,
            representative_index: start,
            forced_by_gap: false,
        }
    }

    fn labeled(id: i64, lat: f64, lng: f64, mode: TravelMode) -> LabeledFix {
        LabeledFix { fix: fix(id, lat, lng), mode }
    }

    #[test]
    fn test_fill_labels_between_boundaries() {
        let fixes: Vec<GpsFix> =
            (0..8).map(|i| fix(100 + i, 43.0, -79.0 + i as f64 * 0.001)).collect();
        let episodes = vec![
            episode(0, 2, TravelMode::Stop),
            episode(3, 5, TravelMode::Walk),
            episode(6, 7, TravelMode::Drive),
        ];
        let filled = fill_episodes(&fixes, &episodes);
        let modes: Vec<TravelMode> = filled.iter().map(|l| l.mode).collect();
        assert_eq!(
            modes,
            vec![
                TravelMode::Stop,
                TravelMode::Stop,
                TravelMode::Stop,
                TravelMode::Walk,
                TravelMode::Walk,
                TravelMode::Walk,
                TravelMode::Drive,
                TravelMode::Drive,
            ]
        );
    }

    #[test]
    fn test_fill_uses_inherited_representative() {
        let fixes: Vec<GpsFix> = (0..6).map(|i| fix(i, 43.0, -79.0 + i as f64 * 0.001)).collect();
        let mut drive = episode(2, 5, TravelMode::Drive);
        drive.representative_index = 0;
        let episodes = vec![episode(0, 1, TravelMode::Invalid), drive];
        let filled = fill_episodes(&fixes, &episodes);
        assert_eq!(filled.len(), 6);
        assert!(filled.iter().all(|l| l.mode == TravelMode::Drive));
    }

    #[test]
    fn test_fill_with_only_invalid_is_empty() {
        let fixes = vec![fix(1, 43.0, -79.0)];
        assert!(fill_episodes(&fixes, &[episode(0, 0, TravelMode::Invalid)]).is_empty());
    }

    #[test]
    fn test_relax_keeps_only_first_of_tight_cluster() {
        // Five points within ~3 m of each other
        let points: Vec<LabeledFix> = (0..5)
            .map(|i| labeled(i, 43.26 + i as f64 * 5e-6, -79.92, TravelMode::Walk))
            .collect();
        let relaxed = relax_trip(points, 5.0);
        assert_eq!(relaxed.len(), 1);
        assert_eq!(relaxed[0].fix.record_id, 0);
    }

    #[test]
    fn test_relax_spacing_holds() {
        let points: Vec<LabeledFix> = (0..50)
            .map(|i| {
                let lat = 43.26 + (i as f64 * 1.7).sin() * 2e-5 + i as f64 * 2e-5;
                labeled(i, lat, -79.92, TravelMode::Drive)
            })
            .collect();
        let relaxed = relax_trip(points, 5.0);
        assert_eq!(relaxed[0].fix.record_id, 0);
        for w in relaxed.windows(2) {
            assert!(haversine_distance(&w[0].fix, &w[1].fix) >= 5.0);
        }
    }

    #[test]
    fn test_trip_and_stop_split() {
        let stream = vec![
            labeled(1, 43.000, -79.0, TravelMode::Stop),
            labeled(2, 43.001, -79.0, TravelMode::Walk),
            labeled(3, 43.002, -79.0, TravelMode::Drive),
            labeled(4, 43.003, -79.0, TravelMode::Stop),
        ];
        let trip = extract_trip_segment("dev", &stream, &ExtractConfig::default());
        let stop = extract_stop_segment("dev", &stream);
        assert_eq!(trip.len(), 2);
        assert_eq!(trip.network_mode(), Some(NetworkMode::All));
        // 0.001 degrees of latitude between the two travel fixes
        assert!((trip.length() - 111.32).abs() < 0.01);
        assert_eq!(stop.points.len(), 2);
        assert!(stop.points.iter().all(|l| l.mode == TravelMode::Stop));
    }

    #[test]
    fn test_network_mode_from_modes() {
        assert_eq!(
            NetworkMode::from_modes([TravelMode::Walk, TravelMode::Stop]),
            Some(NetworkMode::Walk)
        );
        assert_eq!(NetworkMode::from_modes([TravelMode::Drive]), Some(NetworkMode::Drive));
        assert_eq!(NetworkMode::from_modes(Vec::new()), None);
    }
}
