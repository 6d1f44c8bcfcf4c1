//! # Episode Segmentation
//!
//! Splits one device's time-ordered fixes into travel episodes.
//!
//! ## Algorithm
//! 1. Classify each fix by speed: stop (< 0.36 km/h), walk (up to
//!    10.008 km/h) or drive.
//! 2. Rebuild sub-minute timestamps (see [`crate::timing`]).
//! 3. Run a hysteresis state machine over the fixes:
//!    - a jump of 120 s or more between two fixes is a sensor gap and always
//!      becomes its own stop episode spanning exactly those two fixes;
//!    - leaving a drive waits until the slower span lasts 60 s with every
//!      fix stationary, or 120 s otherwise;
//!    - walk to stop waits for 120 s of the stop span;
//!    - every other switch closes the current episode straight away.
//! 4. An episode shorter than its mode's minimum is merged into the
//!    previous episode. With no previous episode it is kept aside as a
//!    leading invalid span whose start becomes the representative fix of
//!    the next valid episode.
//!
//! Episodes cover every fix exactly once, in order.

use chrono::NaiveDateTime;
use log::{debug, info};

use crate::error::Result;
use crate::timing::{reconstruct_times, seconds_between};
use crate::{GpsFix, TravelMode};

/// Configuration for episode segmentation
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SegmentationConfig {
    /// Speeds below this are stationary (km/h). Default: 0.36
    pub stop_speed_kmh: f64,
    /// Speeds up to and including this are walking (km/h). Default: 10.008
    pub walk_max_speed_kmh: f64,
    /// Time between fixes that forces a stop episode (seconds). Default: 120
    pub sensor_gap_secs: f64,
    /// Minimum drive episode duration (seconds). Default: 120
    pub drive_min_secs: f64,
    /// Minimum walk episode duration (seconds). Default: 60
    pub walk_min_secs: f64,
    /// Minimum stop episode duration (seconds). Default: 120
    pub stop_min_secs: f64,
    /// Stationary span that ends a drive (seconds). Default: 60
    pub valid_stop_switch_secs: f64,
    /// Mixed slow span that ends a drive (seconds). Default: 120
    pub drive_switch_secs: f64,
    /// Stationary span that ends a walk (seconds). Default: 120
    pub walk_to_stop_switch_secs: f64,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            stop_speed_kmh: 0.36,
            walk_max_speed_kmh: 10.008,
            sensor_gap_secs: 120.0,
            drive_min_secs: 120.0,
            walk_min_secs: 60.0,
            stop_min_secs: 120.0,
            valid_stop_switch_secs: 60.0,
            drive_switch_secs: 120.0,
            walk_to_stop_switch_secs: 120.0,
        }
    }
}

impl SegmentationConfig {
    /// Minimum duration for an episode of `mode` to stand on its own.
    pub fn min_duration(&self, mode: TravelMode) -> f64 {
        match mode {
            TravelMode::Drive => self.drive_min_secs,
            TravelMode::Walk => self.walk_min_secs,
            TravelMode::Stop => self.stop_min_secs,
            TravelMode::Invalid => f64::INFINITY,
        }
    }
}

/// A contiguous, inclusive range of fixes travelled in one mode.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Episode {
    pub start_index: usize,
    pub end_index: usize,
    pub mode: TravelMode,
    /// Fix that stands for the episode downstream. Equal to `start_index`
    /// except for the first valid episode after a leading invalid span.
    pub representative_index: usize,
    /// Stop episode created by a sensor gap rather than by speed.
    pub forced_by_gap: bool,
}

impl Episode {
    fn new(start_index: usize, end_index: usize, mode: TravelMode) -> Self {
        Self {
            start_index,
            end_index,
            mode,
            representative_index: start_index,
            forced_by_gap: false,
        }
    }
}

/// Classify a single fix by its reported speed.
///
/// ```
/// use episode_router::{classify_speed, SegmentationConfig, TravelMode};
/// let config = SegmentationConfig::default();
/// assert_eq!(classify_speed(0.0, &config), TravelMode::Stop);
/// assert_eq!(classify_speed(10.008, &config), TravelMode::Walk);
/// assert_eq!(classify_speed(10.01, &config), TravelMode::Drive);
/// ```
pub fn classify_speed(speed_kmh: f64, config: &SegmentationConfig) -> TravelMode {
    if speed_kmh < config.stop_speed_kmh {
        TravelMode::Stop
    } else if speed_kmh <= config.walk_max_speed_kmh {
        TravelMode::Walk
    } else {
        TravelMode::Drive
    }
}

/// Segment one device's fixes into episodes.
///
/// Fails if any fix carries an unparsable local time.
pub fn segment_fixes(fixes: &[GpsFix], config: &SegmentationConfig) -> Result<Vec<Episode>> {
    let times = reconstruct_times(fixes)?;
    Ok(segment_with_times(fixes, &times, config))
}

/// Segment fixes whose precise timestamps are already known.
///
/// `times` must hold one timestamp per fix.
pub fn segment_with_times(
    fixes: &[GpsFix],
    times: &[NaiveDateTime],
    config: &SegmentationConfig,
) -> Vec<Episode> {
    debug_assert_eq!(fixes.len(), times.len());
    let n = fixes.len().min(times.len());
    if n == 0 {
        return vec![];
    }

    let mut segmenter = Segmenter { times, config, segments: Vec::new() };
    let mut state = MachineState::fresh(0);

    for i in 0..n {
        let mode = classify_speed(fixes[i].speed_kmh, config);
        state = if i > 0 && seconds_between(times[i - 1], times[i]) >= config.sensor_gap_secs {
            segmenter.sensor_gap(state, i)
        } else {
            let dt = if i > 0 { seconds_between(times[i - 1], times[i]) } else { 0.0 };
            segmenter.step(state, i, mode, dt)
        };
    }
    segmenter.finish(state, n - 1);

    let episodes = absorb_leading_invalid(segmenter.segments);
    info!("Segmented {} fixes into {} episodes", n, episodes.len());
    episodes
}

// =============================================================================
// State Machine
// =============================================================================

/// Slower span observed while holding on to the current mode.
#[derive(Debug, Clone, Copy)]
struct Tentative {
    start: usize,
    len: f64,
    /// Every fix in the span was stationary.
    clean_stop: bool,
}

#[derive(Debug, Clone, Copy)]
struct MachineState {
    /// `None` until the fix at `start` has been classified.
    mode: Option<TravelMode>,
    start: usize,
    tentative: Option<Tentative>,
}

impl MachineState {
    fn fresh(start: usize) -> Self {
        Self { mode: None, start, tentative: None }
    }

    fn accumulating(mode: TravelMode, start: usize) -> Self {
        Self { mode: Some(mode), start, tentative: None }
    }
}

/// Result of closing a range: either a standalone episode or a span too
/// short to stand on its own that nothing precedes.
#[derive(Debug, Clone)]
enum Segment {
    Valid(Episode),
    Pending { start: usize, end: usize },
}

impl Segment {
    fn extend_to(&mut self, end: usize) {
        match self {
            Segment::Valid(e) => e.end_index = end,
            Segment::Pending { end: e, .. } => *e = end,
        }
    }
}

struct Segmenter<'a> {
    times: &'a [NaiveDateTime],
    config: &'a SegmentationConfig,
    segments: Vec<Segment>,
}

impl Segmenter<'_> {
    fn step(
        &mut self,
        state: MachineState,
        i: usize,
        new_mode: TravelMode,
        dt: f64,
    ) -> MachineState {
        let Some(mode) = state.mode else {
            return MachineState::accumulating(new_mode, state.start);
        };

        match (mode, new_mode) {
            (TravelMode::Drive, TravelMode::Drive)
            | (TravelMode::Walk, TravelMode::Walk)
            | (TravelMode::Stop, TravelMode::Stop) => MachineState { tentative: None, ..state },

            (TravelMode::Drive, slower) => {
                let mut t =
                    state.tentative.unwrap_or(Tentative { start: i, len: 0.0, clean_stop: true });
                t.len += dt;
                t.clean_stop &= slower == TravelMode::Stop;

                let settled = (t.clean_stop && t.len >= self.config.valid_stop_switch_secs)
                    || t.len >= self.config.drive_switch_secs;
                if !settled {
                    return MachineState { tentative: Some(t), ..state };
                }

                let next = if t.clean_stop { TravelMode::Stop } else { TravelMode::Walk };
                debug!(
                    "Drive ends at fix {} after {:.1}s of slower travel, switching to {}",
                    t.start - 1,
                    t.len,
                    next
                );
                self.close(state.start, t.start - 1, TravelMode::Drive);
                MachineState::accumulating(next, t.start)
            }

            (TravelMode::Walk, TravelMode::Stop) => {
                let mut t =
                    state.tentative.unwrap_or(Tentative { start: i, len: 0.0, clean_stop: true });
                t.len += dt;
                if t.len < self.config.walk_to_stop_switch_secs {
                    return MachineState { tentative: Some(t), ..state };
                }
                debug!("Walk ends at fix {} after {:.1}s stationary", t.start - 1, t.len);
                self.close(state.start, t.start - 1, TravelMode::Walk);
                MachineState::accumulating(TravelMode::Stop, t.start)
            }

            (current, next) => {
                self.close(state.start, i - 1, current);
                MachineState::accumulating(next, i)
            }
        }
    }

    /// Close whatever was accumulating before the gap and emit a stop over
    /// the two fixes either side of it.
    fn sensor_gap(&mut self, state: MachineState, i: usize) -> MachineState {
        debug!(
            "Sensor gap of {:.1}s between fixes {} and {}",
            seconds_between(self.times[i - 1], self.times[i]),
            i - 1,
            i
        );
        match state.mode {
            Some(mode) => {
                if i >= 2 {
                    self.close(state.start, i - 2, mode);
                }
                let mut stop = Episode::new(i - 1, i, TravelMode::Stop);
                stop.forced_by_gap = true;
                self.segments.push(Segment::Valid(stop));
            }
            // Back-to-back gaps: the previous gap stop already ends at i - 1.
            None => match self.segments.last_mut() {
                Some(last) => last.extend_to(i),
                None => {
                    let mut stop = Episode::new(i - 1, i, TravelMode::Stop);
                    stop.forced_by_gap = true;
                    self.segments.push(Segment::Valid(stop));
                }
            },
        }
        MachineState::fresh(i + 1)
    }

    fn finish(&mut self, state: MachineState, last: usize) {
        if let Some(mode) = state.mode {
            self.close(state.start, last, mode);
        }
    }

    fn close(&mut self, start: usize, end: usize, mode: TravelMode) {
        if start > end {
            return;
        }
        let duration = seconds_between(self.times[start], self.times[end]);
        if duration >= self.config.min_duration(mode) {
            self.segments.push(Segment::Valid(Episode::new(start, end, mode)));
            return;
        }

        match self.segments.last_mut() {
            Some(previous) => {
                debug!(
                    "{} span {}..={} ({:.1}s) merged into previous episode",
                    mode, start, end, duration
                );
                previous.extend_to(end);
            }
            None => self.segments.push(Segment::Pending { start, end }),
        }
    }
}

/// Emit pending spans as invalid episodes and hand their start to the
/// next valid episode as its representative fix.
fn absorb_leading_invalid(segments: Vec<Segment>) -> Vec<Episode> {
    let mut episodes = Vec::with_capacity(segments.len());
    let mut inherited: Option<usize> = None;

    for segment in segments {
        match segment {
            Segment::Pending { start, end } => {
                episodes.push(Episode::new(start, end, TravelMode::Invalid));
                inherited.get_or_insert(start);
            }
            Segment::Valid(mut episode) => {
                if let Some(start) = inherited.take() {
                    episode.representative_index = start;
                }
                episodes.push(episode);
            }
        }
    }
    episodes
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn base_time() -> NaiveDateTime {
        crate::timing::parse_local_timestamp("6/1/2023 8:00").unwrap()
    }

    /// Fixes at the given (offset seconds, speed) pairs, with precise times.
    fn stream(samples: &[(f64, f64)]) -> (Vec<GpsFix>, Vec<NaiveDateTime>) {
        let base = base_time();
        let fixes = samples
            .iter()
            .enumerate()
            .map(|(i, &(_, speed))| {
                let lat = 43.26 + i as f64 * 1e-4;
                GpsFix::new(i as i64 + 1, "dev", "6/1/2023 8:00", lat, -79.92, speed)
            })
            .collect();
        let times = samples
            .iter()
            .map(|&(t, _)| base + Duration::milliseconds((t * 1000.0) as i64))
            .collect();
        (fixes, times)
    }

    /// `count` fixes every `step` seconds from `from`, all at `speed`.
    fn run(from: f64, step: f64, count: usize, speed: f64) -> Vec<(f64, f64)> {
        (0..count).map(|k| (from + k as f64 * step, speed)).collect()
    }

    fn modes(episodes: &[Episode]) -> Vec<TravelMode> {
        episodes.iter().map(|e| e.mode).collect()
    }

    fn assert_covering(episodes: &[Episode], n: usize) {
        assert_eq!(episodes.first().map(|e| e.start_index), Some(0));
        assert_eq!(episodes.last().map(|e| e.end_index), Some(n - 1));
        for w in episodes.windows(2) {
            assert_eq!(w[1].start_index, w[0].end_index + 1, "episodes must be contiguous");
        }
    }

    #[test]
    fn test_classify_speed_boundaries() {
        let config = SegmentationConfig::default();
        assert_eq!(classify_speed(0.0, &config), TravelMode::Stop);
        assert_eq!(classify_speed(0.3599, &config), TravelMode::Stop);
        assert_eq!(classify_speed(0.36, &config), TravelMode::Walk);
        assert_eq!(classify_speed(10.008, &config), TravelMode::Walk);
        assert_eq!(classify_speed(10.0081, &config), TravelMode::Drive);
    }

    #[test]
    fn test_empty_stream() {
        let (fixes, times) = stream(&[]);
        assert!(segment_with_times(&fixes, &times, &SegmentationConfig::default()).is_empty());
    }

    #[test]
    fn test_single_fix_is_invalid() {
        let (fixes, times) = stream(&[(0.0, 40.0)]);
        let episodes = segment_with_times(&fixes, &times, &SegmentationConfig::default());
        assert_eq!(modes(&episodes), vec![TravelMode::Invalid]);
    }

    #[test]
    fn test_sensor_gap_forces_stop() {
        // Stationary at t0, t0+30s, then nothing until t0+200s
        let (fixes, times) = stream(&[(0.0, 0.0), (30.0, 0.0), (200.0, 0.0)]);
        let episodes = segment_with_times(&fixes, &times, &SegmentationConfig::default());
        assert_covering(&episodes, 3);

        let forced = episodes.iter().find(|e| e.forced_by_gap).unwrap();
        assert_eq!((forced.start_index, forced.end_index), (1, 2));
        assert_eq!(forced.mode, TravelMode::Stop);
        // The lone fix before the gap is too short and leads the stream
        assert_eq!(episodes[0].mode, TravelMode::Invalid);
        assert_eq!(forced.representative_index, 0);
    }

    #[test]
    fn test_back_to_back_sensor_gaps_extend_stop() {
        let mut samples = vec![(0.0, 40.0), (150.0, 40.0)];
        samples.extend(run(300.0, 10.0, 20, 40.0));
        let (fixes, times) = stream(&samples);
        let episodes = segment_with_times(&fixes, &times, &SegmentationConfig::default());
        assert_covering(&episodes, samples.len());
        let forced: Vec<&Episode> = episodes.iter().filter(|e| e.forced_by_gap).collect();
        assert_eq!(forced.len(), 1);
        assert_eq!((forced[0].start_index, forced[0].end_index), (0, 2));
        assert_eq!(episodes.last().map(|e| e.mode), Some(TravelMode::Drive));
    }

    #[test]
    fn test_drive_then_clean_stop_switches_after_60s() {
        let mut samples = run(0.0, 10.0, 20, 50.0); // 190 s driving
        samples.extend(run(200.0, 10.0, 20, 0.0)); // parked
        let (fixes, times) = stream(&samples);
        let episodes = segment_with_times(&fixes, &times, &SegmentationConfig::default());

        assert_covering(&episodes, 40);
        assert_eq!(modes(&episodes), vec![TravelMode::Drive, TravelMode::Stop]);
        // Drive ends right before the first stationary fix
        assert_eq!(episodes[0].end_index, 19);
    }

    #[test]
    fn test_drive_hysteresis_ignores_short_slowdown() {
        let mut samples = run(0.0, 10.0, 15, 50.0);
        samples.extend(run(150.0, 10.0, 4, 5.0)); // 40 s at walking pace
        samples.extend(run(190.0, 10.0, 15, 50.0));
        let (fixes, times) = stream(&samples);
        let episodes = segment_with_times(&fixes, &times, &SegmentationConfig::default());
        assert_eq!(modes(&episodes), vec![TravelMode::Drive]);
        assert_covering(&episodes, samples.len());
    }

    #[test]
    fn test_drive_then_walk_needs_120s() {
        let mut samples = run(0.0, 10.0, 20, 50.0);
        // Walking with a stationary fix mixed in: not a clean stop
        samples.extend(run(200.0, 10.0, 9, 4.0));
        samples.push((290.0, 0.0));
        samples.extend(run(300.0, 10.0, 20, 4.0));
        let (fixes, times) = stream(&samples);
        let episodes = segment_with_times(&fixes, &times, &SegmentationConfig::default());
        assert_eq!(modes(&episodes), vec![TravelMode::Drive, TravelMode::Walk]);
        assert_eq!(episodes[1].start_index, 20);
    }

    #[test]
    fn test_walk_to_stop_hysteresis() {
        let mut samples = run(0.0, 10.0, 10, 4.0); // 90 s walking
        samples.extend(run(100.0, 10.0, 5, 0.0)); // 40 s pause, too short
        samples.extend(run(150.0, 10.0, 5, 4.0));
        samples.extend(run(200.0, 10.0, 20, 0.0)); // long stop
        let (fixes, times) = stream(&samples);
        let episodes = segment_with_times(&fixes, &times, &SegmentationConfig::default());
        assert_eq!(modes(&episodes), vec![TravelMode::Walk, TravelMode::Stop]);
        assert_eq!(episodes[1].start_index, 20);
    }

    #[test]
    fn test_clean_stop_of_70s_ends_drive() {
        let mut samples = run(0.0, 10.0, 20, 50.0);
        samples.extend(run(200.0, 10.0, 7, 0.0)); // stationary 200..=260 s
        samples.extend(run(270.0, 10.0, 15, 50.0));
        let (fixes, times) = stream(&samples);
        let episodes = segment_with_times(&fixes, &times, &SegmentationConfig::default());

        // The drive is closed once the stop reaches 60 s. The 60 s stop is
        // too short to stand alone and joins the closed drive.
        assert_covering(&episodes, samples.len());
        assert_eq!(modes(&episodes), vec![TravelMode::Drive, TravelMode::Drive]);
        assert_eq!(episodes[0].end_index, 26);
        assert_eq!(episodes[1].start_index, 27);
    }

    #[test]
    fn test_walking_pace_of_70s_keeps_drive() {
        let mut samples = run(0.0, 10.0, 20, 50.0);
        samples.extend(run(200.0, 10.0, 7, 4.0)); // walking pace 200..=260 s
        samples.extend(run(270.0, 10.0, 15, 50.0));
        let (fixes, times) = stream(&samples);
        let episodes = segment_with_times(&fixes, &times, &SegmentationConfig::default());

        assert_eq!(modes(&episodes), vec![TravelMode::Drive]);
        assert_covering(&episodes, samples.len());
    }

    #[test]
    fn test_walk_pause_of_90s_keeps_walk() {
        let mut samples = run(0.0, 10.0, 20, 4.0);
        samples.extend(run(200.0, 10.0, 9, 0.0)); // pause 200..=280 s
        samples.extend(run(290.0, 10.0, 20, 4.0));
        let (fixes, times) = stream(&samples);
        let episodes = segment_with_times(&fixes, &times, &SegmentationConfig::default());

        assert_eq!(modes(&episodes), vec![TravelMode::Walk]);
        assert_covering(&episodes, samples.len());
    }

    #[test]
    fn test_walk_pause_of_130s_becomes_stop() {
        let mut samples = run(0.0, 10.0, 20, 4.0);
        samples.extend(run(200.0, 10.0, 14, 0.0)); // pause 200..=330 s
        samples.extend(run(340.0, 10.0, 20, 4.0));
        let (fixes, times) = stream(&samples);
        let episodes = segment_with_times(&fixes, &times, &SegmentationConfig::default());

        assert_covering(&episodes, samples.len());
        assert_eq!(modes(&episodes), vec![TravelMode::Walk, TravelMode::Stop, TravelMode::Walk]);
        assert_eq!((episodes[1].start_index, episodes[1].end_index), (20, 33));
    }

    #[test]
    fn test_short_episode_merges_into_previous() {
        let mut samples = run(0.0, 10.0, 20, 0.0); // 190 s stop
        samples.extend(run(200.0, 10.0, 3, 4.0)); // 20 s walk, too short
        samples.extend(run(230.0, 10.0, 20, 50.0)); // drive
        let (fixes, times) = stream(&samples);
        let episodes = segment_with_times(&fixes, &times, &SegmentationConfig::default());
        assert_eq!(modes(&episodes), vec![TravelMode::Stop, TravelMode::Drive]);
        assert_eq!(episodes[0].end_index, 22);
    }

    #[test]
    fn test_leading_invalid_is_inherited() {
        let mut samples = run(0.0, 10.0, 3, 4.0); // 20 s walk at the start
        samples.extend(run(30.0, 10.0, 20, 50.0));
        let (fixes, times) = stream(&samples);
        let episodes = segment_with_times(&fixes, &times, &SegmentationConfig::default());
        assert_eq!(modes(&episodes), vec![TravelMode::Invalid, TravelMode::Drive]);
        assert_eq!(episodes[1].start_index, 3);
        assert_eq!(episodes[1].representative_index, 0);
    }

    #[test]
    fn test_episode_invariants_on_noisy_stream() {
        let config = SegmentationConfig::default();
        let speeds = [0.0, 0.1, 2.0, 5.0, 9.0, 12.0, 30.0, 60.0];
        let mut seed: u64 = 0x9E37_79B9_7F4A_7C15;
        let mut next = || {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            seed
        };

        for _ in 0..50 {
            let mut t = 0.0;
            let mut samples = Vec::new();
            let mut speed = speeds[0];
            for _ in 0..200 {
                if next() % 10 == 0 {
                    speed = speeds[(next() % speeds.len() as u64) as usize];
                }
                t += match next() % 40 {
                    0 => 150.0,
                    k => (k % 15) as f64 + 1.0,
                };
                samples.push((t, speed));
            }
            let (fixes, times) = stream(&samples);
            let episodes = segment_with_times(&fixes, &times, &config);
            assert_covering(&episodes, samples.len());

            for e in &episodes {
                assert!(e.start_index <= e.end_index);
                assert!(e.representative_index <= e.start_index);
                if e.mode == TravelMode::Invalid || e.forced_by_gap {
                    continue;
                }
                let duration = seconds_between(times[e.start_index], times[e.end_index]);
                assert!(
                    duration >= config.min_duration(e.mode),
                    "{:?} lasts only {}s",
                    e,
                    duration
                );
            }
            // Only a leading span may be invalid
            assert!(episodes.iter().skip(1).all(|e| e.mode != TravelMode::Invalid));
        }
    }

    #[test]
    fn test_segment_fixes_from_strings() {
        let fixes = vec![
            GpsFix::new(1, "dev", "1/1/2023 10:00", 0.0, 0.0, 0.0),
            GpsFix::new(2, "dev", "1/1/2023 10:00", 0.0, 0.00002, 0.0),
            GpsFix::new(3, "dev", "1/1/2023 10:03", 0.0, 0.00004, 0.0),
        ];
        let episodes = segment_fixes(&fixes, &SegmentationConfig::default()).unwrap();
        let forced = episodes.iter().find(|e| e.forced_by_gap).unwrap();
        assert_eq!((forced.start_index, forced.end_index), (1, 2));

        let bad = vec![GpsFix::new(1, "dev", "yesterday", 0.0, 0.0, 0.0)];
        assert!(segment_fixes(&bad, &SegmentationConfig::default()).is_err());
    }
}
