//! Planar geometry helpers over raw degree coordinates.

use geo::{Distance, Euclidean, Line, LineInterpolatePoint, LineLocatePoint, Point};

/// Coordinates closer than this (in degrees) are treated as coincident.
pub const COINCIDENT_EPS_DEG: f64 = 1e-9;

/// Straight-line distance between two points in degree space.
pub fn point_distance(a: Point<f64>, b: Point<f64>) -> f64 {
    Euclidean::distance(a, b)
}

/// Fraction in `[0, 1]` along `step` of the point closest to `target`.
/// `None` when the step's endpoints coincide and there is no span to project
/// onto; the underlying locator reports `Some(0.0)` for such a line.
pub fn closest_fraction(step: &Line<f64>, target: Point<f64>) -> Option<f64> {
    if point_distance(step.start_point(), step.end_point()) <= COINCIDENT_EPS_DEG {
        return None;
    }
    step.line_locate_point(&target)
}

/// The point at `fraction` along `step`.
pub fn point_at_fraction(step: &Line<f64>, fraction: f64) -> Option<Point<f64>> {
    step.line_interpolate_point(fraction)
}

/// Distance from `target` to the closed step, i.e. to the projection of
/// `target` clamped onto the step's span. `None` for degenerate steps.
pub fn step_distance(step: &Line<f64>, target: Point<f64>) -> Option<f64> {
    let fraction = closest_fraction(step, target)?;
    let closest = step.line_interpolate_point(fraction)?;
    Some(Euclidean::distance(closest, target))
}
