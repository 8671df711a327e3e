//! Analytic DOF gradients against central finite differences of the score.
//!
//! Both images are separable quadratics, for which central differences and
//! their linear interpolation are exact. A half-voxel translation keeps every
//! sample in the middle of a cell, where the slope of the trilinear
//! interpolant equals the interpolated gradient. A two-voxel padded shell on
//! the target keeps one-sided differences out of the overlap.

use regtk_core::interpolation::InterpolationMode;
use regtk_core::spatial::{Direction3, Point3, Spacing3};
use regtk_core::{ImageGeometry, Transform, Transformation, Volume};
use regtk_registration::optimizer::Objective;
use regtk_registration::registration::LevelObjective;
use regtk_registration::{
    Metric, MutualInformation, NormalizedMutualInformation, RegistrationSession, SumOfSquaredDifferences,
};

const DOFS: [f64; 6] = [0.5, 0.5, 0.5, 0.0, 0.0, 0.0];
const TARGET_PADDING: f32 = 0.0;
const SOURCE_PADDING: f32 = -1.0;

fn geometry() -> ImageGeometry {
    ImageGeometry::new([16, 16, 16], Point3::new([0.0; 3]), Spacing3::uniform(1.0), Direction3::identity())
        .unwrap()
}

fn bowl(geometry: &ImageGeometry, centre: [f64; 3], curvature: [f64; 3]) -> Volume {
    Volume::from_fn(geometry.clone(), |offset| {
        let p = geometry.voxel_to_world(offset);
        let r: f64 = (0..3).map(|a| curvature[a] * (p[a] - centre[a]).powi(2)).sum();
        (100.0 - r) as f32
    })
}

fn session() -> RegistrationSession {
    let g = geometry();
    let mut target = bowl(&g, [7.5; 3], [0.4, 0.3, 0.5]);
    let dims = g.dims();
    for offset in 0..target.len() {
        let index = g.grid_index(offset);
        if (0..3).any(|a| index[a] < 2 || index[a] + 2 >= dims[a]) {
            let [i, j, k] = index;
            target.set(i, j, k, -5.0);
        }
    }
    let source = bowl(&g, [6.0, 9.0, 7.0], [0.3, 0.4, 0.35]);
    RegistrationSession::new(target, source, TARGET_PADDING, SOURCE_PADDING, InterpolationMode::Linear)
}

fn ranges(session: &RegistrationSession) -> ((f64, f64), (f64, f64)) {
    let (tmin, tmax) = session.target().min_max(Some(TARGET_PADDING)).unwrap();
    let (smin, smax) = session.source().min_max(Some(SOURCE_PADDING)).unwrap();
    ((tmin as f64, tmax as f64), (smin as f64, smax as f64))
}

fn analytic_gradient(session: &mut RegistrationSession, metric: &dyn Metric) -> Vec<f64> {
    let mut transformation = Transformation::rigid();
    transformation.set_dofs(&DOFS).unwrap();
    let mut objective = LevelObjective::new(&mut transformation, session, metric);
    let mut gradient = vec![0.0; 6];
    objective.evaluate_with_gradient(&mut gradient).unwrap();
    gradient
}

/// Central differences of `score` along the translation DOFs.
fn numeric_gradient<F>(session: &mut RegistrationSession, step: f64, score: F) -> [f64; 3]
where
    F: Fn(&RegistrationSession) -> f64,
{
    let mut at = |delta: f64, axis: usize| {
        let mut dofs = DOFS;
        dofs[axis] += delta;
        let mut transformation = Transformation::rigid();
        transformation.set_dofs(&dofs).unwrap();
        session.update_source(&transformation);
        score(&*session)
    };
    std::array::from_fn(|axis| (at(step, axis) - at(-step, axis)) / (2.0 * step))
}

fn assert_gradients_agree(name: &str, analytic: &[f64], numeric: &[f64; 3], tolerance: f64) {
    let norm = numeric.iter().map(|g| g * g).sum::<f64>().sqrt();
    assert!(norm > 1e-6, "{}: flat score {:?}", name, numeric);
    for axis in 0..3 {
        let error = (analytic[axis] - numeric[axis]).abs() / norm;
        assert!(
            error < tolerance,
            "{} axis {}: analytic {:?} vs numeric {:?}",
            name,
            axis,
            &analytic[..3],
            numeric
        );
    }
}

#[test]
fn test_ssd_gradient_matches_finite_differences() {
    let mut session = session();
    let metric = SumOfSquaredDifferences::new();

    let analytic = analytic_gradient(&mut session, &metric);
    let numeric = numeric_gradient(&mut session, 1e-3, |s| metric.evaluate(s).unwrap());

    assert_gradients_agree("SSD", &analytic, &numeric, 1e-4);
}

#[test]
fn test_nmi_gradient_matches_finite_differences() {
    let mut session = session();
    let (target_range, source_range) = ranges(&session);
    let metric = NormalizedMutualInformation::new(16, target_range, source_range).unwrap();

    let analytic = analytic_gradient(&mut session, &metric);
    let numeric = numeric_gradient(&mut session, 1e-4, |s| metric.smoothed_score(s).unwrap());

    assert_gradients_agree("NMI", &analytic, &numeric, 1e-3);
}

#[test]
fn test_mi_gradient_matches_finite_differences() {
    let mut session = session();
    let (target_range, source_range) = ranges(&session);
    let metric = MutualInformation::new(16, target_range, source_range).unwrap();

    let analytic = analytic_gradient(&mut session, &metric);
    let numeric = numeric_gradient(&mut session, 1e-4, |s| metric.smoothed_score(s).unwrap());

    assert_gradients_agree("MI", &analytic, &numeric, 1e-3);
}

#[test]
fn test_smoothed_score_tracks_the_binned_score() {
    let mut session = session();
    let (target_range, source_range) = ranges(&session);
    let metric = NormalizedMutualInformation::new(16, target_range, source_range).unwrap();
    let mut transformation = Transformation::rigid();
    transformation.set_dofs(&DOFS).unwrap();
    session.update_source(&transformation);

    let binned = metric.evaluate(&session).unwrap();
    let smoothed = metric.smoothed_score(&session).unwrap();
    assert!(smoothed > 1.0 && smoothed < 2.0, "{}", smoothed);
    assert!((binned - smoothed).abs() < 0.5, "{} vs {}", binned, smoothed);
}
