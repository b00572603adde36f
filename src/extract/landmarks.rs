//! Geometric features from a face-mesh landmark frame

use super::FeatureFault;
use crate::geometry::{point_distance, try_centroid, try_distance, try_point, try_ratio, try_roll_angle};
use crate::types::{Feature, LandmarkFrame, Point3};
use std::f64::consts::{FRAC_PI_2, PI};

/// Face-mesh landmark indices used by the extractors
pub mod mesh {
    pub const NOSE_TIP: usize = 1;
    pub const FOREHEAD: usize = 10;
    pub const CHIN: usize = 152;
    pub const LEFT_CHEEK: usize = 234;
    pub const RIGHT_CHEEK: usize = 454;

    pub const LEFT_EYE_OUTER: usize = 33;
    pub const LEFT_EYE_INNER: usize = 133;
    pub const LEFT_EYE_UPPER: usize = 159;
    pub const LEFT_EYE_LOWER: usize = 145;
    pub const RIGHT_EYE_INNER: usize = 362;
    pub const RIGHT_EYE_OUTER: usize = 263;
    pub const RIGHT_EYE_UPPER: usize = 386;
    pub const RIGHT_EYE_LOWER: usize = 374;

    pub const LEFT_BROW: usize = 105;
    pub const RIGHT_BROW: usize = 334;

    pub const UPPER_LIP: usize = 13;
    pub const LOWER_LIP: usize = 14;
    pub const MOUTH_LEFT: usize = 61;
    pub const MOUTH_RIGHT: usize = 291;

    pub const LEFT_EYE: [usize; 4] = [LEFT_EYE_OUTER, LEFT_EYE_INNER, LEFT_EYE_UPPER, LEFT_EYE_LOWER];
    pub const RIGHT_EYE: [usize; 4] = [
        RIGHT_EYE_INNER,
        RIGHT_EYE_OUTER,
        RIGHT_EYE_UPPER,
        RIGHT_EYE_LOWER,
    ];
}

/// Landmark feature extractor.
///
/// Movement features compare against the last known position, which is the
/// only state carried between ticks. A faulted tick leaves that position
/// untouched.
#[derive(Debug, Clone, Default)]
pub struct LandmarkExtractor {
    last_head: Option<Point3>,
    last_eyes: Option<Point3>,
}

impl LandmarkExtractor {
    pub fn reset(&mut self) {
        self.last_head = None;
        self.last_eyes = None;
    }

    pub fn compute(&mut self, feature: Feature, frame: &LandmarkFrame) -> Result<f64, FeatureFault> {
        match feature {
            Feature::HeadMovement => {
                let head = try_point(frame, mesh::NOSE_TIP)?;
                Ok(movement(&mut self.last_head, head))
            }
            Feature::EyeMovement => {
                let eyes = eye_center(frame)?;
                Ok(movement(&mut self.last_eyes, eyes))
            }
            Feature::LipTension => lip_tension(frame),
            Feature::MouthAperture => mouth_aperture(frame),
            Feature::EyeAspectRatio => eye_aspect_ratio(frame),
            Feature::BrowRaise => brow_raise(frame),
            Feature::HeadTilt => head_tilt(frame),
            Feature::FaceAsymmetry => face_asymmetry(frame),
            Feature::FaceProportion => face_proportion(frame),
            Feature::EyeSpacing => eye_spacing(frame),
            other => Err(FeatureFault::NotPerTick(other)),
        }
    }
}

/// Distance moved since the last known position; 0 on the first observation
fn movement(last: &mut Option<Point3>, current: Point3) -> f64 {
    let moved = last.map(|prev| point_distance(&prev, &current)).unwrap_or(0.0);
    *last = Some(current);
    moved
}

fn eye_center(frame: &LandmarkFrame) -> Result<Point3, FeatureFault> {
    let left = try_centroid(frame, &mesh::LEFT_EYE)?;
    let right = try_centroid(frame, &mesh::RIGHT_EYE)?;
    Ok(Point3::new(
        (left.x + right.x) / 2.0,
        (left.y + right.y) / 2.0,
        (left.z + right.z) / 2.0,
    ))
}

fn face_height(frame: &LandmarkFrame) -> Result<f64, FeatureFault> {
    Ok(try_distance(frame, mesh::FOREHEAD, mesh::CHIN)?)
}

fn face_width(frame: &LandmarkFrame) -> Result<f64, FeatureFault> {
    Ok(try_distance(frame, mesh::LEFT_CHEEK, mesh::RIGHT_CHEEK)?)
}

/// Lip compression: 1 when the lips are pressed shut, falling as the mouth
/// opens relative to its width
fn lip_tension(frame: &LandmarkFrame) -> Result<f64, FeatureFault> {
    let aperture = try_distance(frame, mesh::UPPER_LIP, mesh::LOWER_LIP)?;
    let width = try_distance(frame, mesh::MOUTH_LEFT, mesh::MOUTH_RIGHT)?;
    Ok(1.0 - try_ratio(aperture, width)?.clamp(0.0, 1.0))
}

/// Inner-lip gap relative to face height
fn mouth_aperture(frame: &LandmarkFrame) -> Result<f64, FeatureFault> {
    let aperture = try_distance(frame, mesh::UPPER_LIP, mesh::LOWER_LIP)?;
    Ok(try_ratio(aperture, face_height(frame)?)?)
}

/// Mean eye aspect ratio (lid gap over eye width) of both eyes
fn eye_aspect_ratio(frame: &LandmarkFrame) -> Result<f64, FeatureFault> {
    let left = try_ratio(
        try_distance(frame, mesh::LEFT_EYE_UPPER, mesh::LEFT_EYE_LOWER)?,
        try_distance(frame, mesh::LEFT_EYE_OUTER, mesh::LEFT_EYE_INNER)?,
    )?;
    let right = try_ratio(
        try_distance(frame, mesh::RIGHT_EYE_UPPER, mesh::RIGHT_EYE_LOWER)?,
        try_distance(frame, mesh::RIGHT_EYE_INNER, mesh::RIGHT_EYE_OUTER)?,
    )?;
    Ok((left + right) / 2.0)
}

/// Mean brow-to-upper-lid distance relative to face height
fn brow_raise(frame: &LandmarkFrame) -> Result<f64, FeatureFault> {
    let height = face_height(frame)?;
    let left = try_distance(frame, mesh::LEFT_BROW, mesh::LEFT_EYE_UPPER)?;
    let right = try_distance(frame, mesh::RIGHT_BROW, mesh::RIGHT_EYE_UPPER)?;
    Ok(try_ratio((left + right) / 2.0, height)?)
}

/// Absolute roll of the eye line in radians, folded into [0, π/2]
fn head_tilt(frame: &LandmarkFrame) -> Result<f64, FeatureFault> {
    let angle = try_roll_angle(frame, mesh::LEFT_EYE_OUTER, mesh::RIGHT_EYE_OUTER)?.abs();
    Ok(if angle > FRAC_PI_2 { PI - angle } else { angle })
}

/// Left/right imbalance of nose-to-cheek distances relative to face width
fn face_asymmetry(frame: &LandmarkFrame) -> Result<f64, FeatureFault> {
    let left = try_distance(frame, mesh::NOSE_TIP, mesh::LEFT_CHEEK)?;
    let right = try_distance(frame, mesh::NOSE_TIP, mesh::RIGHT_CHEEK)?;
    Ok(try_ratio((left - right).abs(), face_width(frame)?)?)
}

/// Face height over face width
fn face_proportion(frame: &LandmarkFrame) -> Result<f64, FeatureFault> {
    Ok(try_ratio(face_height(frame)?, face_width(frame)?)?)
}

/// Inner eye-corner distance relative to face width
fn eye_spacing(frame: &LandmarkFrame) -> Result<f64, FeatureFault> {
    let spacing = try_distance(frame, mesh::LEFT_EYE_INNER, mesh::RIGHT_EYE_INNER)?;
    Ok(try_ratio(spacing, face_width(frame)?)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GeometryError;
    use crate::extract::test_support::frontal_face;

    fn compute(feature: Feature) -> f64 {
        LandmarkExtractor::default()
            .compute(feature, &frontal_face())
            .unwrap()
    }

    #[test]
    fn test_static_face_geometry() {
        // height 0.6, width 0.4
        assert!((compute(Feature::FaceProportion) - 1.5).abs() < 1e-9);
        // inner corners 0.44 -> 0.56
        assert!((compute(Feature::EyeSpacing) - 0.3).abs() < 1e-9);
        // nose centered between the cheeks
        assert!(compute(Feature::FaceAsymmetry).abs() < 1e-9);
        // eye line is level
        assert!(compute(Feature::HeadTilt).abs() < 1e-9);
    }

    #[test]
    fn test_eye_and_mouth_ratios() {
        // lid gap 0.03 over eye width 0.08
        assert!((compute(Feature::EyeAspectRatio) - 0.375).abs() < 1e-9);
        // lip gap 0.03 over face height 0.6
        assert!((compute(Feature::MouthAperture) - 0.05).abs() < 1e-9);
        // 1 - 0.03 / 0.12
        assert!((compute(Feature::LipTension) - 0.75).abs() < 1e-9);
        // brow-to-lid 0.045 over face height 0.6
        assert!((compute(Feature::BrowRaise) - 0.075).abs() < 1e-9);
    }

    #[test]
    fn test_head_tilt_folds_direction() {
        let mut frame = frontal_face();
        frame.set(mesh::RIGHT_EYE_OUTER, Point3::new(0.64, 0.48, 0.0));
        let tilted = LandmarkExtractor::default()
            .compute(Feature::HeadTilt, &frame)
            .unwrap();

        let mut mirrored = frontal_face();
        mirrored.set(mesh::LEFT_EYE_OUTER, Point3::new(0.36, 0.48, 0.0));
        let other_way = LandmarkExtractor::default()
            .compute(Feature::HeadTilt, &mirrored)
            .unwrap();

        assert!(tilted > 0.0 && tilted < FRAC_PI_2);
        assert!((tilted - other_way).abs() < 1e-9);
    }

    #[test]
    fn test_collapsed_mouth_is_a_fault() {
        let mut frame = frontal_face();
        frame.set(mesh::MOUTH_RIGHT, Point3::new(0.44, 0.655, 0.0));
        let result = LandmarkExtractor::default().compute(Feature::LipTension, &frame);
        assert!(matches!(
            result,
            Err(FeatureFault::Geometry(GeometryError::DegenerateRatio(_)))
        ));
    }

    #[test]
    fn test_faulted_tick_keeps_last_position() {
        let mut extractor = LandmarkExtractor::default();
        let face = frontal_face();
        extractor.compute(Feature::HeadMovement, &face).unwrap();

        let mut broken = face.clone();
        broken.set(mesh::NOSE_TIP, Point3::new(f64::NAN, 0.5, 0.0));
        assert!(extractor.compute(Feature::HeadMovement, &broken).is_err());

        let mut moved = face.clone();
        moved.set(mesh::NOSE_TIP, Point3::new(0.52, 0.50, 0.0));
        let m = extractor.compute(Feature::HeadMovement, &moved).unwrap();
        assert!((m - 0.02).abs() < 1e-9);
    }
}
