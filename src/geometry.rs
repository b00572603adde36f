//! Geometry kernel
//!
//! Pure functions over a landmark frame: distances, centroids and ratios.
//! The `try_*` forms report faults to the caller so extractors can isolate
//! them per feature. The total forms never fail: they log the fault and
//! return a fallback of 0 (or the origin for points).

use crate::error::GeometryError;
use crate::types::{LandmarkFrame, Point3};
use tracing::warn;

/// Denominators smaller than this are treated as degenerate
const RATIO_EPSILON: f64 = 1e-9;

/// Fetch a landmark, rejecting missing or non-finite points
pub fn try_point(frame: &LandmarkFrame, index: usize) -> Result<Point3, GeometryError> {
    let point = frame.get(index).ok_or(GeometryError::IndexOutOfRange {
        index,
        len: frame.len(),
    })?;
    if !point.is_finite() {
        return Err(GeometryError::NonFinite { index });
    }
    Ok(*point)
}

/// Euclidean distance between two points
pub fn point_distance(a: &Point3, b: &Point3) -> f64 {
    let dx = a.x - b.x;
    let dy = a.y - b.y;
    let dz = a.z - b.z;
    (dx * dx + dy * dy + dz * dz).sqrt()
}

/// Euclidean distance between two landmarks
pub fn try_distance(frame: &LandmarkFrame, a: usize, b: usize) -> Result<f64, GeometryError> {
    Ok(point_distance(&try_point(frame, a)?, &try_point(frame, b)?))
}

/// Centroid of a set of landmarks
pub fn try_centroid(frame: &LandmarkFrame, indices: &[usize]) -> Result<Point3, GeometryError> {
    if indices.is_empty() {
        return Err(GeometryError::EmptyIndexSet);
    }

    let mut sum = Point3::ORIGIN;
    for &index in indices {
        let p = try_point(frame, index)?;
        sum.x += p.x;
        sum.y += p.y;
        sum.z += p.z;
    }

    let n = indices.len() as f64;
    Ok(Point3::new(sum.x / n, sum.y / n, sum.z / n))
}

/// Ratio of two derived magnitudes
pub fn try_ratio(numerator: f64, denominator: f64) -> Result<f64, GeometryError> {
    if !denominator.is_finite() || denominator.abs() < RATIO_EPSILON {
        return Err(GeometryError::DegenerateRatio(denominator));
    }
    let ratio = numerator / denominator;
    if !ratio.is_finite() {
        return Err(GeometryError::DegenerateRatio(denominator));
    }
    Ok(ratio)
}

/// In-plane angle (radians) of the line from landmark `a` to landmark `b`
pub fn try_roll_angle(frame: &LandmarkFrame, a: usize, b: usize) -> Result<f64, GeometryError> {
    let pa = try_point(frame, a)?;
    let pb = try_point(frame, b)?;
    Ok((pb.y - pa.y).atan2(pb.x - pa.x))
}

/// Distance between two landmarks, or 0 when either is unusable
pub fn distance(frame: &LandmarkFrame, a: usize, b: usize) -> f64 {
    try_distance(frame, a, b).unwrap_or_else(|e| {
        warn!(a, b, error = %e, "distance fell back to 0");
        0.0
    })
}

/// Centroid of a set of landmarks, or the origin when any is unusable
pub fn centroid(frame: &LandmarkFrame, indices: &[usize]) -> Point3 {
    try_centroid(frame, indices).unwrap_or_else(|e| {
        warn!(?indices, error = %e, "centroid fell back to origin");
        Point3::ORIGIN
    })
}

/// `numerator / denominator`, or 0 when the denominator is degenerate
pub fn ratio(numerator: f64, denominator: f64) -> f64 {
    try_ratio(numerator, denominator).unwrap_or_else(|e| {
        warn!(error = %e, "ratio fell back to 0");
        0.0
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square_frame() -> LandmarkFrame {
        LandmarkFrame::from_triples(&[
            [0.0, 0.0, 0.0],
            [3.0, 0.0, 0.0],
            [3.0, 4.0, 0.0],
            [0.0, 4.0, 0.0],
        ])
    }

    #[test]
    fn test_distance() {
        let frame = square_frame();
        assert_eq!(distance(&frame, 0, 1), 3.0);
        assert_eq!(distance(&frame, 0, 2), 5.0);
        assert_eq!(distance(&frame, 2, 2), 0.0);
    }

    #[test]
    fn test_centroid() {
        let frame = square_frame();
        assert_eq!(centroid(&frame, &[0, 1, 2, 3]), Point3::new(1.5, 2.0, 0.0));
        assert_eq!(centroid(&frame, &[2]), Point3::new(3.0, 4.0, 0.0));
    }

    #[test]
    fn test_ratio() {
        assert_eq!(ratio(3.0, 4.0), 0.75);
        assert_eq!(ratio(1.0, 0.0), 0.0);
        assert_eq!(ratio(1.0, f64::NAN), 0.0);
        assert!(try_ratio(1.0, 0.0).is_err());
    }

    #[test]
    fn test_missing_index_falls_back() {
        let frame = square_frame();
        assert_eq!(distance(&frame, 0, 42), 0.0);
        assert_eq!(centroid(&frame, &[0, 42]), Point3::ORIGIN);
        assert_eq!(
            try_distance(&frame, 0, 42),
            Err(GeometryError::IndexOutOfRange { index: 42, len: 4 })
        );
    }

    #[test]
    fn test_non_finite_point_is_a_fault() {
        let mut frame = square_frame();
        frame.set(1, Point3::new(f64::NAN, 0.0, 0.0));
        assert_eq!(
            try_distance(&frame, 0, 1),
            Err(GeometryError::NonFinite { index: 1 })
        );
        assert_eq!(distance(&frame, 0, 1), 0.0);
    }

    #[test]
    fn test_empty_centroid() {
        let frame = square_frame();
        assert_eq!(try_centroid(&frame, &[]), Err(GeometryError::EmptyIndexSet));
    }

    #[test]
    fn test_roll_angle() {
        let frame = square_frame();
        assert_eq!(try_roll_angle(&frame, 0, 1).unwrap(), 0.0);
        let vertical = try_roll_angle(&frame, 1, 2).unwrap();
        assert!((vertical - std::f64::consts::FRAC_PI_2).abs() < 1e-12);
    }

    #[test]
    fn test_repeated_calls_are_bit_identical() {
        let frame = LandmarkFrame::from_triples(&[
            [0.123_456_789, 0.987_654_321, -0.0314],
            [0.555_555_555, 0.111_111_111, 0.2718],
            [0.333_333_333, 0.777_777_777, 0.1414],
        ]);
        let d = distance(&frame, 0, 1).to_bits();
        let c = centroid(&frame, &[0, 1, 2]);
        let r = ratio(distance(&frame, 0, 2), distance(&frame, 1, 2)).to_bits();
        for _ in 0..100 {
            assert_eq!(distance(&frame, 0, 1).to_bits(), d);
            let again = centroid(&frame, &[0, 1, 2]);
            assert_eq!(again.x.to_bits(), c.x.to_bits());
            assert_eq!(again.y.to_bits(), c.y.to_bits());
            assert_eq!(again.z.to_bits(), c.z.to_bits());
            assert_eq!(
                ratio(distance(&frame, 0, 2), distance(&frame, 1, 2)).to_bits(),
                r
            );
        }
    }
}
