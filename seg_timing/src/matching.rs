//! Candidate search: shortlist track points near the segment endpoints, pick
//! the closest one for each end, and cut the windows the interpolator scans.

use std::collections::BTreeSet;

use geo::Point;

use crate::geom;
use crate::{MatchParams, SegTimingError, Segment, SegmentEnd, TrackPoint};

/// Axis-aligned proximity test: true when both coordinates of `trackpoint`
/// are within `tolerance_deg` of `target`, bounds included. A coarse box, not
/// a radius; it only shortlists candidates for the exact distance comparison.
pub fn is_close(trackpoint: &TrackPoint, target: Point<f64>, tolerance_deg: f64) -> bool {
    (trackpoint.point.x() - target.x()).abs() <= tolerance_deg
        && (trackpoint.point.y() - target.y()).abs() <= tolerance_deg
}

/// Single forward sweep that picks the track point closest to each segment
/// endpoint. The end search only opens once a start candidate exists, and a
/// start candidate that later moves past a chosen end discards that end, so
/// the returned indices always satisfy `end >= start`. Distance ties keep the
/// earliest point.
pub fn locate_candidates(
    segment: &Segment,
    trackpoints: &[TrackPoint],
    params: &MatchParams,
) -> Result<(usize, usize), SegTimingError> {
    let tolerance = params.proximity_tolerance_deg;
    let mut best_start: Option<(usize, f64)> = None;
    let mut best_end: Option<(usize, f64)> = None;

    for (idx, trackpoint) in trackpoints.iter().enumerate() {
        if is_close(trackpoint, segment.start, tolerance) {
            let dist = geom::point_distance(trackpoint.point, segment.start);
            if best_start.map_or(true, |(_, best)| dist < best) {
                best_start = Some((idx, dist));
                if let Some((end_idx, _)) = best_end {
                    if end_idx < idx {
                        best_end = None;
                    }
                }
            }
        }
        if best_start.is_some() && is_close(trackpoint, segment.end, tolerance) {
            let dist = geom::point_distance(trackpoint.point, segment.end);
            if best_end.map_or(true, |(_, best)| dist < best) {
                best_end = Some((idx, dist));
            }
        }
    }

    let (start_idx, _) = best_start.ok_or(SegTimingError::NoMatch(SegmentEnd::Start))?;
    let (end_idx, _) = best_end.ok_or(SegTimingError::NoMatch(SegmentEnd::End))?;
    Ok((start_idx, end_idx))
}

/// Union of the windows around the start and end candidates, in track order
/// with overlapping indices deduplicated.
pub fn combined_window(
    trackpoints: &[TrackPoint],
    start_idx: usize,
    end_idx: usize,
    radius: usize,
) -> Vec<TrackPoint> {
    if trackpoints.is_empty() {
        return Vec::new();
    }
    let mut indices = BTreeSet::new();
    indices.extend(window_indices(trackpoints.len(), start_idx, radius));
    indices.extend(window_indices(trackpoints.len(), end_idx, radius));
    indices.into_iter().map(|idx| trackpoints[idx]).collect()
}

/// Indices within `radius` positions of `center`, clipped to the track
/// bounds. Near an edge the window is simply smaller, and an oversized radius
/// saturates to the whole track. `len` must be nonzero.
fn window_indices(len: usize, center: usize, radius: usize) -> std::ops::RangeInclusive<usize> {
    let lo = center.saturating_sub(radius);
    let hi = center.saturating_add(radius).min(len - 1);
    lo..=hi
}
