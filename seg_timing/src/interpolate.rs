//! Crossing detection and sub-sample time interpolation.
//!
//! Scans a window point-pair by point-pair. A pair of adjacent samples forms
//! a micro-step; when the step passes a segment endpoint, the endpoint is
//! projected onto the step and the crossing timestamp is interpolated between
//! the samples in proportion to the projection's position.

use chrono::{DateTime, Duration, Utc};
use geo::{Line, Point};

use crate::geom;
use crate::{EffortResult, Segment, TrackPoint};

/// A synthesized crossing of one segment endpoint.
#[derive(Clone, Copy, Debug)]
struct CrossingEvent {
    _point: Point<f64>,
    time: DateTime<Utc>,
}

/// Pairs start and end crossings into efforts, in track order.
///
/// A later start crossing replaces a pending one, an end crossing only counts
/// once a start is pending, and an end crossing earlier than the pending
/// start (a reverse traversal within one step) is dropped. Each emitted
/// effort clears the pending state, so repeated passes inside one window
/// yield one result each.
pub fn crossing_efforts(segment: &Segment, window: &[TrackPoint]) -> Vec<EffortResult> {
    let mut efforts = Vec::new();
    let mut pending_start: Option<CrossingEvent> = None;

    for pair in window.windows(2) {
        let (ap1, ap2) = (pair[0], pair[1]);
        let step = Line::new(ap1.point, ap2.point);

        if let Some(crossing) = crossing_on_step(&step, ap1, ap2, segment.start) {
            pending_start = Some(crossing);
        }
        if let Some(start) = pending_start {
            if let Some(end) = crossing_on_step(&step, ap1, ap2, segment.end) {
                if end.time >= start.time {
                    efforts.push(EffortResult {
                        started_at: start.time,
                        elapsed_s: delta_seconds(end.time - start.time),
                    });
                    pending_start = None;
                }
            }
        }
    }

    efforts
}

/// Decides whether the step from `ap1` to `ap2` crosses `target` and, if so,
/// synthesizes the crossing event.
///
/// A sample coinciding with the target is the crossing itself. Otherwise the
/// step counts as a crossing only when its closed span comes strictly closer
/// to the target than either sample does, which puts the projection strictly
/// between the samples. Zero-length steps cannot be projected onto and never
/// cross.
fn crossing_on_step(
    step: &Line<f64>,
    ap1: TrackPoint,
    ap2: TrackPoint,
    target: Point<f64>,
) -> Option<CrossingEvent> {
    let d1 = geom::point_distance(ap1.point, target);
    let d2 = geom::point_distance(ap2.point, target);

    if d1 <= geom::COINCIDENT_EPS_DEG {
        return Some(CrossingEvent {
            _point: ap1.point,
            time: ap1.time,
        });
    }
    if d2 <= geom::COINCIDENT_EPS_DEG {
        return Some(CrossingEvent {
            _point: ap2.point,
            time: ap2.time,
        });
    }

    let step_dist = geom::step_distance(step, target)?;
    if step_dist >= d1.min(d2) {
        return None;
    }
    let fraction = geom::closest_fraction(step, target)?;
    let point = geom::point_at_fraction(step, fraction)?;
    Some(CrossingEvent {
        _point: point,
        time: interpolate_time(ap1.time, ap2.time, fraction),
    })
}

/// Timestamp at `fraction` of the way from `t1` to `t2`, rounded to the
/// microsecond and clamped into `[t1, t2]`.
fn interpolate_time(t1: DateTime<Utc>, t2: DateTime<Utc>, fraction: f64) -> DateTime<Utc> {
    let span = t2 - t1;
    let span_us = span
        .num_microseconds()
        .unwrap_or_else(|| span.num_milliseconds().saturating_mul(1000));
    let offset_us = (fraction * span_us as f64).round() as i64;
    t1 + Duration::microseconds(offset_us.clamp(0, span_us.max(0)))
}

fn delta_seconds(delta: Duration) -> f64 {
    match delta.num_microseconds() {
        Some(us) => us as f64 / 1_000_000.0,
        None => delta.num_milliseconds() as f64 / 1_000.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

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

    fn step_of(ap1: &TrackPoint, ap2: &TrackPoint) -> Line<f64> {
        Line::new(ap1.point, ap2.point)
    }

    fn short_segment() -> Segment {
        Segment::new(Point::new(7.4400, 50.8800), Point::new(7.4410, 50.8800)).unwrap()
    }

    #[test]
    fn test_midpoint_crossing() {
        let ap1 = tp(7.4390, 50.8800, 10);
        let ap2 = tp(7.4410, 50.8800, 12);
        let target = Point::new(7.4400, 50.8800);
        let crossing = crossing_on_step(&step_of(&ap1, &ap2), ap1, ap2, target).unwrap();
        assert_eq!(crossing.time, base_time() + Duration::seconds(11));
        assert!((crossing._point.x() - 7.4400).abs() < 1e-9);
        assert!((crossing._point.y() - 50.8800).abs() < 1e-9);
    }

    #[test]
    fn test_off_track_projection() {
        // Target sits 0.0004 deg north of the step; the projection foot is at
        // one quarter of the span.
        let ap1 = tp(7.4390, 50.8800, 0);
        let ap2 = tp(7.4410, 50.8800, 8);
        let target = Point::new(7.4395, 50.8804);
        let crossing = crossing_on_step(&step_of(&ap1, &ap2), ap1, ap2, target).unwrap();
        assert_eq!(crossing.time, base_time() + Duration::seconds(2));
        assert!((crossing._point.y() - 50.8800).abs() < 1e-9);
    }

    #[test]
    fn test_target_beyond_span() {
        let ap1 = tp(7.4390, 50.8800, 10);
        let ap2 = tp(7.4410, 50.8800, 12);
        let before = Point::new(7.4385, 50.8800);
        let beyond = Point::new(7.4415, 50.8800);
        assert!(crossing_on_step(&step_of(&ap1, &ap2), ap1, ap2, before).is_none());
        assert!(crossing_on_step(&step_of(&ap1, &ap2), ap1, ap2, beyond).is_none());
    }

    #[test]
    fn test_sample_on_target() {
        let ap1 = tp(7.4400, 50.8800, 10);
        let ap2 = tp(7.4410, 50.8800, 12);
        let target = Point::new(7.4400, 50.8800);
        let crossing = crossing_on_step(&step_of(&ap1, &ap2), ap1, ap2, target).unwrap();
        assert_eq!(crossing.time, ap1.time);
    }

    #[test]
    fn test_stationary_step_never_crosses() {
        let ap1 = tp(7.4401, 50.8800, 10);
        let ap2 = tp(7.4401, 50.8800, 20);
        let target = Point::new(7.4400, 50.8800);
        assert!(crossing_on_step(&step_of(&ap1, &ap2), ap1, ap2, target).is_none());
    }

    #[test]
    fn test_crossing_time_bounds() {
        let ap1 = tp(7.4390, 50.8807, 0);
        let ap2 = tp(7.4410, 50.8793, 60);
        let target = Point::new(7.4402, 50.8800);
        let crossing = crossing_on_step(&step_of(&ap1, &ap2), ap1, ap2, target).unwrap();
        assert!(crossing.time >= ap1.time);
        assert!(crossing.time <= ap2.time);
    }

    #[test]
    fn test_reverse_traversal_dropped() {
        // One step sweeping east to west crosses the end before the start, so
        // no effort is emitted.
        let segment = short_segment();
        let window = vec![tp(7.4415, 50.8800, 0), tp(7.4395, 50.8800, 20)];
        assert!(crossing_efforts(&segment, &window).is_empty());
    }

    #[test]
    fn test_forward_traversal_one_step() {
        let segment = short_segment();
        let window = vec![tp(7.4395, 50.8800, 0), tp(7.4415, 50.8800, 20)];
        let efforts = crossing_efforts(&segment, &window);
        assert_eq!(efforts.len(), 1);
        // Crossings at 1/4 and 3/4 of the 20 s step.
        assert_eq!(efforts[0].started_at, base_time() + Duration::seconds(5));
        assert!((efforts[0].elapsed_s - 10.0).abs() < 1e-6);
    }

    #[test]
    fn test_later_start_replaces_pending() {
        // The track dips back over the start before finally heading to the
        // end; the last start crossing is the one that counts.
        let segment = short_segment();
        let window = vec![
            tp(7.4395, 50.8800, 0),
            tp(7.4405, 50.8800, 10),
            tp(7.4395, 50.8800, 20),
            tp(7.4405, 50.8800, 30),
            tp(7.4415, 50.8800, 40),
        ];
        let efforts = crossing_efforts(&segment, &window);
        assert_eq!(efforts.len(), 1);
        assert_eq!(efforts[0].started_at, base_time() + Duration::seconds(25));
        assert!((efforts[0].elapsed_s - 10.0).abs() < 1e-6);
    }

    #[test]
    fn test_window_too_small() {
        let segment = short_segment();
        assert!(crossing_efforts(&segment, &[]).is_empty());
        assert!(crossing_efforts(&segment, &[tp(7.4400, 50.8800, 0)]).is_empty());
    }

    #[test]
    fn test_microsecond_rounding() {
        let t1 = base_time();
        let t2 = base_time() + Duration::seconds(1);
        let third = interpolate_time(t1, t2, 1.0 / 3.0);
        assert_eq!(third, t1 + Duration::microseconds(333_333));
    }

    #[test]
    fn test_fraction_clamped_to_span() {
        let t1 = base_time();
        let t2 = base_time() + Duration::seconds(10);
        assert_eq!(interpolate_time(t1, t2, -0.5), t1);
        assert_eq!(interpolate_time(t1, t2, 1.5), t2);
    }
}
