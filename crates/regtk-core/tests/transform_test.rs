use nalgebra::Matrix3;
use proptest::prelude::*;
use regtk_core::image::ImageGeometry;
use regtk_core::spatial::{Direction3, Point3, Spacing3, Vector3};
use regtk_core::transform::{
    read_transformation, write_transformation, BSplineFfd, DofStatus, HomogeneousKind,
    HomogeneousTransform, MultiLevelTransform, Transform, Transformation,
};
use regtk_core::TransformError;

fn wavy_ffd() -> BSplineFfd {
    let lattice = ImageGeometry::new(
        [6, 6, 6],
        Point3::new([-15.0, -15.0, -15.0]),
        Spacing3::uniform(6.0),
        Direction3::identity(),
    )
    .unwrap();
    let mut ffd = BSplineFfd::new(lattice);
    for index in 0..ffd.number_of_dofs() {
        ffd.put_dof(index, (index as f64 * 0.37).sin()).unwrap();
    }
    ffd
}

fn chain() -> MultiLevelTransform {
    let rigid = HomogeneousTransform::rigid_from([2.0, -1.0, 0.5], [5.0, -10.0, 15.0]);
    let affine = HomogeneousTransform::with_parameters(
        HomogeneousKind::Affine,
        vec![0.0, 1.0, 0.0, 0.0, 3.0, 0.0, 105.0, 98.0, 101.0, 2.0, 0.0, -1.0],
    )
    .unwrap();
    MultiLevelTransform::new(vec![rigid.into(), wavy_ffd().into(), affine.into()])
}

proptest! {
    #[test]
    fn test_composite_applies_in_order(
        tx in -10.0f64..10.0, ty in -10.0f64..10.0, tz in -10.0f64..10.0,
        rx in -45.0f64..45.0, ry in -45.0f64..45.0, rz in -45.0f64..45.0,
        sx in 50.0f64..150.0, shear in -20.0f64..20.0,
        px in -20.0f64..20.0, py in -20.0f64..20.0, pz in -20.0f64..20.0
    ) {
        let a = HomogeneousTransform::rigid_from([tx, ty, tz], [rx, ry, rz]);
        let b = HomogeneousTransform::with_parameters(
            HomogeneousKind::Affine,
            vec![ty, tz, tx, rz, rx, ry, sx, 100.0, 100.0, shear, 0.0, 0.0],
        ).unwrap();
        let composite = MultiLevelTransform::new(vec![a.clone().into(), b.clone().into()]);

        let p = Point3::new([px, py, pz]);
        let expected = b.transform_point(&a.transform_point(&p));
        prop_assert!(composite.transform_point(&p).distance(&expected) < 1e-9);

        let expected_jacobian = b.jacobian(&expected) * a.jacobian(&p);
        prop_assert!((composite.jacobian(&p) - expected_jacobian).abs().max() < 1e-12);
    }

    #[test]
    fn test_rigid_identity_is_exact(px in -1e3f64..1e3, py in -1e3f64..1e3, pz in -1e3f64..1e3) {
        let p = Point3::new([px, py, pz]);
        prop_assert_eq!(HomogeneousTransform::rigid().transform_point(&p), p);
    }
}

#[test]
fn test_composite_jacobian_matches_finite_difference() {
    let t = chain();
    let p = Point3::new([3.0, -2.0, 4.5]);
    let h = 1e-6;
    let analytic = t.jacobian(&p);
    let mut numeric = Matrix3::<f64>::zeros();
    for s in 0..3 {
        let mut plus = p;
        let mut minus = p;
        plus[s] += h;
        minus[s] -= h;
        let column = (t.transform_point(&plus) - t.transform_point(&minus)) * (0.5 / h);
        for r in 0..3 {
            numeric[(r, s)] = column[r];
        }
    }
    assert!((analytic - numeric).abs().max() < 1e-5);
}

#[test]
fn test_composite_dof_derivative_matches_finite_difference() {
    let t = chain();
    let p = Point3::new([1.0, 2.0, -3.0]);
    let h = 1e-6;
    // one DOF from each level
    for index in [4, 6 + 100, 6 + 648 + 7] {
        let mut plus = t.clone();
        let mut minus = t.clone();
        plus.put_dof(index, t.dof(index).unwrap() + h).unwrap();
        minus.put_dof(index, t.dof(index).unwrap() - h).unwrap();
        let numeric = (plus.transform_point(&p) - minus.transform_point(&p)) * (0.5 / h);
        let analytic = t.dof_derivative(index, &p).unwrap();
        assert!((numeric - analytic).norm() < 1e-5, "dof {}", index);
    }
}

#[test]
fn test_composite_parameter_gradient_matches_dof_derivative() {
    let t = chain();
    let samples = vec![
        (Point3::new([1.0, 2.0, -3.0]), Vector3::new([0.5, -1.0, 0.25])),
        (Point3::new([-4.0, 0.5, 2.0]), Vector3::new([1.0, 1.0, 1.0])),
    ];
    let mut gradient = vec![0.0; t.number_of_dofs()];
    t.parameter_gradient(&samples, &mut gradient).unwrap();

    for index in [0, 3, 5, 6, 6 + 200, 6 + 647, 6 + 648, 6 + 648 + 11] {
        let expected: f64 = samples
            .iter()
            .map(|(p, g)| t.dof_derivative(index, p).unwrap().dot(g))
            .sum();
        assert!((gradient[index] - expected).abs() < 1e-6, "dof {}", index);
    }
}

#[test]
fn test_status_change_keeps_dof_count() {
    let mut t = Transformation::from(chain());
    let before = t.number_of_dofs();
    t.put_status(0, DofStatus::Passive).unwrap();
    t.put_status(before - 1, DofStatus::Passive).unwrap();
    assert_eq!(t.number_of_dofs(), before);
    assert_eq!(t.number_of_active_dofs(), before - 2);
    assert!(matches!(
        t.put_status(before, DofStatus::Passive),
        Err(TransformError::DofIndexOutOfRange { .. })
    ));
}

#[test]
fn test_file_roundtrip_all_variants() {
    let mut ffd = wavy_ffd();
    ffd.put_status(3, DofStatus::Passive).unwrap();
    let variants: Vec<Transformation> = vec![
        HomogeneousTransform::from_matrix(&nalgebra::Matrix4::new(
            1.0, 0.1, 0.0, 4.0,
            0.0, 0.9, 0.2, -1.0,
            0.3, 0.0, 1.1, 2.0,
            0.0, 0.0, 0.0, 1.0,
        ))
        .into(),
        Transformation::rigid(),
        Transformation::affine(),
        ffd.into(),
        chain().into(),
    ];

    let p = Point3::new([2.5, -1.5, 3.0]);
    for t in variants {
        let mut buffer = Vec::new();
        write_transformation(&t, &mut buffer).unwrap();
        let back = read_transformation(&mut buffer.as_slice()).unwrap();

        assert_eq!(back.name(), t.name());
        assert_eq!(back.dofs(), t.dofs());
        for i in 0..t.number_of_dofs() {
            assert_eq!(back.status(i).unwrap(), t.status(i).unwrap());
        }
        assert!(back.transform_point(&p).distance(&t.transform_point(&p)) < 1e-12);
    }
}

#[test]
fn test_file_roundtrip_on_disk() {
    let path = std::env::temp_dir().join(format!("regtk-transform-{}.dof", std::process::id()));
    let t = Transformation::from(HomogeneousTransform::rigid_from([1.0, 2.0, 3.0], [0.0, 30.0, 0.0]));
    t.write_file(&path).unwrap();
    let back = Transformation::read_file(&path).unwrap();
    std::fs::remove_file(&path).ok();
    assert_eq!(back.dofs(), t.dofs());
}

#[test]
fn test_invert_only_for_homogeneous() {
    let rigid = Transformation::from(HomogeneousTransform::rigid_from([1.0, 0.0, 0.0], [0.0, 0.0, 45.0]));
    let inverse = rigid.invert().unwrap();
    let p = Point3::new([3.0, 4.0, 5.0]);
    assert!(inverse.transform_point(&rigid.transform_point(&p)).distance(&p) < 1e-9);

    let ffd = Transformation::from(wavy_ffd());
    assert!(matches!(ffd.invert(), Err(TransformError::Unsupported(_))));
}
