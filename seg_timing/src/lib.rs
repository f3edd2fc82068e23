//! Precise timing of segment efforts from GPS activity tracks.
//!
//! A segment is a pair of geographic endpoints. Given an activity's track
//! points, the library finds the samples closest to each endpoint, cuts a
//! small window around them and re-derives the exact crossing instants by
//! projecting the endpoints onto the track between samples, so an effort's
//! elapsed time does not snap to the device's sampling interval.
//!
//! Latitude and longitude are treated as a local Euclidean plane: distances
//! and projections are computed on raw degree coordinates. That holds up well
//! for segments up to a few kilometres at moderate latitudes (roughly below
//! 70 degrees); it degrades toward the poles and across the antimeridian,
//! which are out of scope.

use std::fmt;

use chrono::{DateTime, Utc};
use geo::Point;
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod geom;
mod interpolate;
mod matching;
mod track;

pub use track::parse_trackpoints;

/// Errors that can occur during track parsing or effort computation.
#[derive(Error, Debug)]
pub enum SegTimingError {
    #[error("segment start and end coincide")]
    DegenerateSegment,
    #[error("no track point within tolerance of the segment {0}")]
    NoMatch(SegmentEnd),
    #[error("unsupported activity format: {0}")]
    UnsupportedFormat(String),
    #[error("failed to parse TCX file: {0}")]
    TcxParse(String),
    #[error("failed to parse GPX file: {0}")]
    GpxParse(String),
    #[error("failed to parse FIT file: {0}")]
    FitParse(String),
}

/// Which endpoint of a segment a match refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegmentEnd {
    Start,
    End,
}

impl fmt::Display for SegmentEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SegmentEnd::Start => write!(f, "start"),
            SegmentEnd::End => write!(f, "end"),
        }
    }
}

/// A directed segment between two geographic points, x = longitude and
/// y = latitude in degrees.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Segment {
    pub start: Point<f64>,
    pub end: Point<f64>,
}

impl Segment {
    /// Build a segment, rejecting coincident endpoints.
    pub fn new(start: Point<f64>, end: Point<f64>) -> Result<Self, SegTimingError> {
        let segment = Self { start, end };
        if segment.is_degenerate() {
            return Err(SegTimingError::DegenerateSegment);
        }
        Ok(segment)
    }

    pub fn is_degenerate(&self) -> bool {
        geom::point_distance(self.start, self.end) <= geom::COINCIDENT_EPS_DEG
    }
}

/// One recorded track sample. `point` is (longitude, latitude) in degrees,
/// `elevation` is metres when the source carries it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrackPoint {
    pub point: Point<f64>,
    pub time: DateTime<Utc>,
    pub elevation: Option<f64>,
}

/// One timed traversal of a segment.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EffortResult {
    pub started_at: DateTime<Utc>,
    pub elapsed_s: f64,
}

/// Knobs for the candidate search.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MatchParams {
    /// Half-width in degrees of the box a track point must fall in to count
    /// as a candidate for a segment endpoint.
    pub proximity_tolerance_deg: f64,
    /// Track points kept on each side of a matched candidate.
    pub window_radius: usize,
}

impl Default for MatchParams {
    fn default() -> Self {
        Self {
            proximity_tolerance_deg: 0.0005,
            window_radius: 2,
        }
    }
}

/// Compute every timed traversal of `segment` in `trackpoints`.
///
/// `trackpoints` must be in recording order. The result is in track order;
/// an empty result means the track came near both endpoints but never
/// actually crossed the segment, which callers should report rather than
/// treat as an error.
pub fn segment_efforts(
    segment: &Segment,
    trackpoints: &[TrackPoint],
    params: &MatchParams,
) -> Result<Vec<EffortResult>, SegTimingError> {
    if segment.is_degenerate() {
        return Err(SegTimingError::DegenerateSegment);
    }
    let (start_idx, end_idx) = matching::locate_candidates(segment, trackpoints, params)?;
    let window = matching::combined_window(trackpoints, start_idx, end_idx, params.window_radius);
    Ok(interpolate::crossing_efforts(segment, &window))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 6, 1, 9, 0, 0).unwrap()
    }

    fn tp(lng: f64, lat: f64, offset_s: i64) -> TrackPoint {
        TrackPoint {
            point: Point::new(lng, lat),
            time: base_time() + Duration::seconds(offset_s),
            elevation: None,
        }
    }

    fn marienfeld() -> Segment {
        Segment::new(
            Point::new(7.436902, 50.884516),
            Point::new(7.441928, 50.883243),
        )
        .unwrap()
    }

    #[test]
    fn test_exact_endpoint_samples() {
        let track = vec![
            tp(7.436902, 50.884516, 0),
            tp(7.441928, 50.883243, 600),
        ];
        let efforts = segment_efforts(&marienfeld(), &track, &MatchParams::default()).unwrap();
        assert_eq!(efforts.len(), 1);
        assert_eq!(efforts[0].started_at, base_time());
        assert!((efforts[0].elapsed_s - 600.0).abs() < 1e-6);
    }

    #[test]
    fn test_interpolated_crossings() {
        // Both endpoints are straddled symmetrically, so each crossing lands
        // midway between its samples.
        let segment = Segment::new(Point::new(7.4400, 50.88), Point::new(7.4500, 50.88)).unwrap();
        let track = vec![
            tp(7.4380, 50.88, 0),
            tp(7.4396, 50.88, 10),
            tp(7.4404, 50.88, 12),
            tp(7.4450, 50.88, 35),
            tp(7.4496, 50.88, 58),
            tp(7.4504, 50.88, 60),
        ];
        let efforts = segment_efforts(&segment, &track, &MatchParams::default()).unwrap();
        assert_eq!(efforts.len(), 1);
        assert_eq!(efforts[0].started_at, base_time() + Duration::seconds(11));
        assert!((efforts[0].elapsed_s - 48.0).abs() < 1e-6);
    }

    #[test]
    fn test_far_track_is_start_mismatch() {
        let track = vec![tp(13.4050, 52.52, 0), tp(13.4060, 52.521, 60)];
        let err = segment_efforts(&marienfeld(), &track, &MatchParams::default()).unwrap_err();
        assert!(matches!(err, SegTimingError::NoMatch(SegmentEnd::Start)));
    }

    #[test]
    fn test_repeated_passes() {
        // Two forward traversals with a turnaround in between, compact enough
        // that both fall inside the combined window.
        let segment = Segment::new(Point::new(7.4400, 50.88), Point::new(7.4410, 50.88)).unwrap();
        let track = vec![
            tp(7.43960, 50.88, 0),
            tp(7.44135, 50.88, 10),
            tp(7.43950, 50.88, 20),
            tp(7.44140, 50.88, 30),
        ];
        let efforts = segment_efforts(&segment, &track, &MatchParams::default()).unwrap();
        assert_eq!(efforts.len(), 2);
        assert!(efforts[0].started_at < efforts[1].started_at);
        assert!((efforts[0].elapsed_s - 40.0 / 7.0).abs() < 1e-3);
        assert!((efforts[1].elapsed_s - 100.0 / 19.0).abs() < 1e-3);
    }

    #[test]
    fn test_grazing_without_crossing() {
        // The track stalls just short of the start, backs off the way it
        // came, detours wide to the north and stops just short of the end:
        // both endpoints get candidates but no step ever crosses one.
        let segment = Segment::new(Point::new(7.4400, 50.88), Point::new(7.4410, 50.88)).unwrap();
        let track = vec![
            tp(7.4394, 50.8800, 0),
            tp(7.4397, 50.8800, 10),
            tp(7.4394, 50.8800, 20),
            tp(7.4394, 50.8950, 30),
            tp(7.4413, 50.8806, 40),
            tp(7.4413, 50.8801, 50),
        ];
        let efforts = segment_efforts(&segment, &track, &MatchParams::default()).unwrap();
        assert!(efforts.is_empty());
    }

    #[test]
    fn test_deterministic_results() {
        let segment = Segment::new(Point::new(7.4400, 50.88), Point::new(7.4410, 50.88)).unwrap();
        let track = vec![
            tp(7.43960, 50.88, 0),
            tp(7.44135, 50.88, 10),
            tp(7.43950, 50.88, 20),
            tp(7.44140, 50.88, 30),
        ];
        let params = MatchParams::default();
        let first = segment_efforts(&segment, &track, &params).unwrap();
        let second = segment_efforts(&segment, &track, &params).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_degenerate_segment_rejected() {
        let point = Point::new(7.44, 50.88);
        assert!(matches!(
            Segment::new(point, point),
            Err(SegTimingError::DegenerateSegment)
        ));

        let segment = Segment {
            start: point,
            end: point,
        };
        let track = vec![tp(7.44, 50.88, 0), tp(7.4401, 50.88, 10)];
        let err = segment_efforts(&segment, &track, &MatchParams::default()).unwrap_err();
        assert!(matches!(err, SegTimingError::DegenerateSegment));
    }

    #[test]
    fn test_wider_tolerance() {
        let segment = Segment::new(Point::new(7.4400, 50.88), Point::new(7.4500, 50.88)).unwrap();
        // Samples sit 0.0008 deg off the endpoints, outside the default box.
        let track = vec![
            tp(7.4392, 50.88, 0),
            tp(7.4408, 50.88, 10),
            tp(7.4492, 50.88, 55),
            tp(7.4508, 50.88, 65),
        ];
        let err = segment_efforts(&segment, &track, &MatchParams::default()).unwrap_err();
        assert!(matches!(err, SegTimingError::NoMatch(SegmentEnd::Start)));

        let params = MatchParams {
            proximity_tolerance_deg: 0.001,
            ..MatchParams::default()
        };
        let efforts = segment_efforts(&segment, &track, &params).unwrap();
        assert_eq!(efforts.len(), 1);
        assert_eq!(efforts[0].started_at, base_time() + Duration::seconds(5));
        assert!((efforts[0].elapsed_s - 55.0).abs() < 1e-6);
    }

    #[test]
    fn test_oversized_window_radius() {
        // A huge radius must clip to the track bounds, not overflow the
        // window arithmetic.
        let track = vec![
            tp(7.436902, 50.884516, 0),
            tp(7.441928, 50.883243, 600),
        ];
        let params = MatchParams {
            window_radius: usize::MAX,
            ..MatchParams::default()
        };
        let efforts = segment_efforts(&marienfeld(), &track, &params).unwrap();
        assert_eq!(efforts.len(), 1);
        assert!((efforts[0].elapsed_s - 600.0).abs() < 1e-6);
    }
}
