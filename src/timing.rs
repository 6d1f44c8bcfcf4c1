//! Elapsed-time reconstruction for minute-resolution fixes.
//!
//! Devices report local time only to the minute. Within each minute the
//! seconds are rebuilt from the distance to the next fix divided by the
//! reported speed, accumulated over the fixes of that minute. Stationary
//! fixes carry no usable speed, so once a minute is complete they share
//! whatever is left of it evenly.
//!
//! Speed and distance come from independent, noisy sensors, so the rebuilt
//! offset may exceed the minute. It is clamped rather than rejected.

use chrono::{Duration, NaiveDateTime};
use log::debug;

use crate::error::{PipelineError, Result};
use crate::geo_utils::travel_seconds;
use crate::GpsFix;

/// `month/day/year hour:minute`, as written by the tracking devices.
const LOCAL_TIME_FORMAT: &str = "%m/%d/%Y %H:%M";

/// Time a completed minute is assumed to cover when sharing it out.
const MINUTE_SPAN_SECS: f64 = 59.99;

/// Parse a device timestamp. Text after the minute (e.g. `:SS`) is ignored.
///
/// ```
/// use episode_router::timing::parse_local_timestamp;
/// let t = parse_local_timestamp("3/7/2023 9:05").unwrap();
/// assert_eq!(t.to_string(), "2023-03-07 09:05:00");
/// ```
pub fn parse_local_timestamp(value: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_and_remainder(value.trim(), LOCAL_TIME_FORMAT)
        .ok()
        .map(|(t, _)| t)
}

/// Signed seconds from `earlier` to `later`, with microsecond precision.
pub fn seconds_between(earlier: NaiveDateTime, later: NaiveDateTime) -> f64 {
    let delta = later.signed_duration_since(earlier);
    match delta.num_microseconds() {
        Some(us) => us as f64 / 1e6,
        None => delta.num_seconds() as f64,
    }
}

/// Fixes that share one reported minute.
struct MinuteBucket {
    minute: NaiveDateTime,
    members: Vec<usize>,
    /// Seconds accumulated by moving fixes.
    sum: f64,
    /// Stationary fixes waiting for their share of the minute.
    zeros: Vec<usize>,
}

impl MinuteBucket {
    fn new(minute: NaiveDateTime) -> Self {
        Self { minute, members: Vec::new(), sum: 0.0, zeros: Vec::new() }
    }

    /// Settle the bucket: hand out the remaining minute to stationary fixes
    /// (only once the minute is known to be complete) and turn per-fix
    /// seconds into running offsets from the start of the minute.
    fn flush(self, seconds: &mut [f64], offsets: &mut [f64], minute_complete: bool) {
        if minute_complete && !self.zeros.is_empty() {
            let share = (self.sum.max(MINUTE_SPAN_SECS) - self.sum) / self.zeros.len() as f64;
            for &i in &self.zeros {
                seconds[i] = share;
            }
        }

        let mut running = 0.0;
        for &i in &self.members {
            running += seconds[i];
            offsets[i] = running;
        }
    }
}

/// Rebuild a precise timestamp for every fix.
///
/// Fails on the first fix whose local time cannot be parsed: skipping it
/// would shift every later minute bucket.
pub fn reconstruct_times(fixes: &[GpsFix]) -> Result<Vec<NaiveDateTime>> {
    let minutes = fixes
        .iter()
        .map(|f| {
            parse_local_timestamp(&f.local_time).ok_or_else(|| PipelineError::InvalidTimestamp {
                record_id: f.record_id,
                value: f.local_time.clone(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let n = fixes.len();
    let mut seconds = vec![0.0; n];
    let mut offsets = vec![0.0; n];
    let mut bucket: Option<MinuteBucket> = None;

    for i in 0..n {
        let mut current = match bucket.take() {
            Some(b) if b.minute == minutes[i] => b,
            Some(b) => {
                b.flush(&mut seconds, &mut offsets, true);
                MinuteBucket::new(minutes[i])
            }
            None => MinuteBucket::new(minutes[i]),
        };

        let speed = fixes[i].speed_kmh;
        if speed == 0.0 {
            current.zeros.push(i);
        } else if i + 1 < n {
            seconds[i] = travel_seconds(&fixes[i], &fixes[i + 1], speed);
            current.sum += seconds[i];
        }
        current.members.push(i);
        bucket = Some(current);
    }

    // The last minute may still be running, so its stationary fixes keep 0.
    if let Some(b) = bucket {
        b.flush(&mut seconds, &mut offsets, false);
    }

    minutes
        .iter()
        .zip(offsets.iter())
        .zip(fixes.iter())
        .map(|((minute, offset), fix)| {
            let (second, micros) = split_offset(*offset);
            minute
                .checked_add_signed(Duration::seconds(second) + Duration::microseconds(micros))
                .ok_or(PipelineError::InvalidTime { record_id: fix.record_id })
        })
        .collect()
}

/// Whole seconds clamped to 59 plus the sub-second remainder clamped to
/// the microsecond field's range.
fn split_offset(offset: f64) -> (i64, i64) {
    if !offset.is_finite() || offset <= 0.0 {
        return (0, 0);
    }
    let second = offset.floor().min(59.0);
    let micros = ((offset - second) * 1e6).floor().clamp(0.0, 999_999.0);
    if offset >= 60.0 {
        debug!("Clamped implausible intra-minute offset of {:.2}s", offset);
    }
    (second as i64, micros as i64)
}
