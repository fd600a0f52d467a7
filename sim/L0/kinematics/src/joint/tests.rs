use super::*;
use crate::track::CircleTrack;
use approx::assert_relative_eq;
use nalgebra::Vector3;
use std::sync::Arc;

fn circle_track_kind() -> JointKind {
    JointKind::track(
        Arc::new(
            CircleTrack::new(Vector3::new(0.5, 0.0, 0.0), Vector3::z(), 2.0).with_pipe_radius(0.05),
        ),
        0.25,
    )
}

fn all_kinds() -> Vec<JointKind> {
    vec![
        JointKind::Slide,
        JointKind::Revolute,
        JointKind::RevSlide,
        JointKind::Cross,
        JointKind::Ball,
        JointKind::BallSlide,
        JointKind::Ball2Slide,
        circle_track_kind(),
    ]
}

/// Position, speed, accel and jerk per variable, varied per index.
fn sample_state(count: usize) -> Vec<[f64; 4]> {
    (0..count)
        .map(|i| {
            let k = i as f64;
            [0.3 - 0.15 * k, 0.7 + 0.2 * k, -0.4 + 0.3 * k, 0.9 - 0.25 * k]
        })
        .collect()
}

fn joint_with_state(kind: &JointKind, state: &[[f64; 4]]) -> Joint {
    let mut joint = Joint::new("sample", kind.clone());
    for (i, s) in state.iter().enumerate() {
        for stage in Stage::ALL {
            let _ = joint.set_rate(stage, i, s[stage.order()]).unwrap();
        }
    }
    joint
}

/// Composed transform when every variable follows its cubic Taylor path.
fn pos_along_path(kind: &JointKind, state: &[[f64; 4]], t: f64) -> Trf {
    let mut joint = Joint::new("path", kind.clone());
    for (i, s) in state.iter().enumerate() {
        let value = s[0] + s[1] * t + s[2] * t * t / 2.0 + s[3] * t * t * t / 6.0;
        let _ = joint.set_value(i, value).unwrap();
    }
    joint.pos()
}

fn numeric_time_jet(f: impl Fn(f64) -> Trf) -> TrfJet {
    let h = 1e-3;
    TrfJet::new(
        f(0.0),
        (f(h) - f(-h)) / (2.0 * h),
        (f(h) - 2.0 * f(0.0) + f(-h)) / (h * h),
        (f(2.0 * h) - 2.0 * f(h) + 2.0 * f(-h) - f(-2.0 * h)) / (2.0 * h * h * h),
    )
}

#[test]
fn test_var_derivatives_match_finite_differences() {
    let h = 1e-4;
    for kind in all_kinds() {
        let joint = Joint::new("sample", kind.clone());
        for var in 0..joint.var_count() {
            let at = 0.35 + 0.1 * var as f64;
            let d = joint.var_derivatives_at(var, at).unwrap();
            let plus = joint.var_derivatives_at(var, at + h).unwrap();
            let minus = joint.var_derivatives_at(var, at - h).unwrap();

            let num1 = (plus.pos - minus.pos) / (2.0 * h);
            let num2 = (plus.der1 - minus.der1) / (2.0 * h);
            let num3 = (plus.der2 - minus.der2) / (2.0 * h);

            assert_relative_eq!(d.der1, num1, epsilon = 1e-6);
            assert_relative_eq!(d.der2, num2, epsilon = 1e-6);
            assert_relative_eq!(d.der3, num3, epsilon = 1e-5);
            assert!(transform::is_derivative(&d.der1), "{} var {var}", kind.name());
        }
    }
}

#[test]
fn test_pos_is_product_of_factors_in_ascending_order() {
    for kind in all_kinds() {
        let joint = joint_with_state(&kind, &sample_state(kind.var_count()));
        let mut expected = Trf::identity();
        for var in 0..joint.var_count() {
            expected = joint.var_trf(var).unwrap() * expected;
        }
        assert_relative_eq!(joint.pos(), expected, epsilon = 1e-12);
    }
}

#[test]
fn test_time_derivatives_match_path_differences() {
    for kind in all_kinds() {
        let state = sample_state(kind.var_count());
        let joint = joint_with_state(&kind, &state);
        let num = numeric_time_jet(|t| pos_along_path(&kind, &state, t));

        assert_relative_eq!(joint.der1(), num.der1, epsilon = 1e-5);
        assert_relative_eq!(joint.der2(), num.der2, epsilon = 1e-4);
        assert_relative_eq!(joint.der3(), num.der3, epsilon = 2e-3);
    }
}

#[test]
fn test_inverse_derivatives_match_path_differences() {
    for kind in [JointKind::Ball2Slide, circle_track_kind()] {
        let state = sample_state(kind.var_count());
        let joint = joint_with_state(&kind, &state);
        let num = numeric_time_jet(|t| transform::inverse(&pos_along_path(&kind, &state, t)));

        assert_relative_eq!(joint.inv_der1(), num.der1, epsilon = 1e-5);
        assert_relative_eq!(joint.inv_der2(), num.der2, epsilon = 1e-4);
        assert_relative_eq!(joint.inv_der3(), num.der3, epsilon = 2e-3);
    }
}

#[test]
fn test_inverse_identity_and_product_rule() {
    for kind in all_kinds() {
        let mut joint = joint_with_state(&kind, &sample_state(kind.var_count()));
        let _ = joint.set_value(0, 1.2).unwrap();

        assert_relative_eq!(joint.pos() * joint.inv_pos(), Trf::identity(), epsilon = 1e-12);
        assert_relative_eq!(
            joint.der1() * joint.inv_pos() + joint.pos() * joint.inv_der1(),
            Trf::zeros(),
            epsilon = 1e-12
        );

        let prod = joint.jet().compose(&joint.inv_jet());
        assert_relative_eq!(prod.der2, Trf::zeros(), epsilon = 1e-10);
        assert_relative_eq!(prod.der3, Trf::zeros(), epsilon = 1e-9);
    }
}

#[test]
fn test_partial_derivatives() {
    let h = 1e-6;
    for kind in all_kinds() {
        let state = sample_state(kind.var_count());
        let joint = joint_with_state(&kind, &state);

        for var in 0..joint.var_count() {
            let mut plus = joint.clone();
            let mut minus = joint.clone();
            let _ = plus.set_value(var, state[var][0] + h).unwrap();
            let _ = minus.set_value(var, state[var][0] - h).unwrap();

            let num = (plus.pos() - minus.pos()) / (2.0 * h);
            let num_inv = (plus.inv_pos() - minus.inv_pos()) / (2.0 * h);

            assert_relative_eq!(joint.derivative(var).unwrap(), num, epsilon = 1e-7);
            assert_relative_eq!(joint.inv_derivative(var).unwrap(), num_inv, epsilon = 1e-7);
        }
        assert!(joint.derivative(joint.var_count()).is_none());
    }
}

#[test]
fn test_mixed_terms() {
    // A single variable has no cross terms.
    let rev = joint_with_state(&JointKind::Revolute, &sample_state(1));
    assert_relative_eq!(rev.acc_mixed(), Trf::zeros(), epsilon = 1e-15);
    assert_relative_eq!(rev.jerk_mixed(), Trf::zeros(), epsilon = 1e-15);

    // der2 = mixed + Σ per-variable terms embedded in the unchanged chain.
    let state = sample_state(3);
    let ball = joint_with_state(&JointKind::Ball, &state);
    let mut per_var = Trf::zeros();
    for var in 0..3 {
        let mut chain = Trf::identity();
        for k in 0..3 {
            let d = ball.var_derivatives_at(k, state[k][0]).unwrap();
            let factor = if k == var {
                let [_, sd, sa, _] = state[k];
                d.der2 * (sd * sd) + d.der1 * sa
            } else {
                d.pos
            };
            chain = factor * chain;
        }
        per_var += chain;
    }
    assert!(ball.acc_mixed().norm() > 1e-3);
    assert_relative_eq!(ball.der2(), ball.acc_mixed() + per_var, epsilon = 1e-12);

    // Only one variable moving: no cross terms either.
    let mut still = state.clone();
    still[1][1] = 0.0;
    still[2][1] = 0.0;
    let ball = joint_with_state(&JointKind::Ball, &still);
    assert_relative_eq!(ball.acc_mixed(), Trf::zeros(), epsilon = 1e-15);
}

#[test]
fn test_caches_follow_writes() {
    let mut joint = Joint::new("hinge", JointKind::Revolute);
    let before = joint.pos();
    assert_relative_eq!(before, Trf::identity());
    assert_eq!(joint.der1(), Trf::zeros());

    let change = joint.set_value(0, 0.4).unwrap();
    assert!(change.state && !change.topology);
    assert_relative_eq!(joint.pos()[(0, 1)], 0.4f64.sin(), epsilon = 1e-15);

    let _ = joint.set_speed(0, 3.0).unwrap();
    assert_relative_eq!(joint.der1()[(0, 0)], -3.0 * 0.4f64.sin(), epsilon = 1e-15);
    assert_relative_eq!(joint.derivative(0).unwrap()[(0, 0)], -(0.4f64.sin()), epsilon = 1e-15);
}

#[test]
fn test_range_checks() {
    let mut joint = Joint::new("slider", JointKind::Slide);
    assert_eq!(joint.value(1), None);
    assert_eq!(joint.is_fixed(3), None);
    assert_eq!(joint.var_trf(1), None);
    assert_eq!(joint.inv_derivative(1), None);

    let err = joint.set_value(1, 0.0).unwrap_err();
    assert_eq!(
        err,
        KinError::VarIndexOutOfRange {
            joint: "slider".to_string(),
            index: 1,
            count: 1
        }
    );
    assert!(joint.set_fixed(2, true).is_err());
}

#[test]
fn test_fixed_flags_report_topology_changes() {
    let mut joint = Joint::new("ball", JointKind::Ball);
    assert_eq!(joint.set_fixed(1, true).unwrap(), Change::TOPOLOGY);
    assert_eq!(joint.set_fixed(1, true).unwrap(), Change::NONE);
    assert_eq!(joint.set_fixed_all(true), Change::TOPOLOGY);
    assert_eq!(joint.set_fixed_all(true), Change::NONE);
    assert!((0..3).all(|i| joint.is_fixed(i) == Some(true)));

    joint.set_var_index(0, VarIndex::Fixed(4));
    assert_eq!(joint.var_index(0), Some(VarIndex::Fixed(4)));
    joint.clear_var_indices();
    assert_eq!(joint.var_index(0), Some(VarIndex::Unassigned));
}

#[test]
fn test_init_vars_from_pos_roundtrip() {
    let cases: Vec<(JointKind, Vec<f64>)> = vec![
        (JointKind::Slide, vec![0.8]),
        (JointKind::Revolute, vec![-2.1]),
        (JointKind::RevSlide, vec![1.1, -0.3]),
        (JointKind::Cross, vec![0.4, -0.6]),
        (JointKind::Ball, vec![0.3, -0.4, 0.7]),
        (JointKind::Ball, vec![1.4, 0.2, -0.5]),
        (JointKind::BallSlide, vec![-0.2, 0.5, 0.1, 1.5]),
        (JointKind::Ball2Slide, vec![0.4, 0.3, -0.2, 0.5, -0.7]),
        (circle_track_kind(), vec![2.5, 0.1, 0.2, 0.0]),
        (circle_track_kind(), vec![7.0, -0.15, 0.0, 0.3]),
    ];

    for (kind, values) in cases {
        let mut source = Joint::new("source", kind.clone());
        for (i, v) in values.iter().enumerate() {
            let _ = source.set_value(i, *v).unwrap();
        }

        let mut target = Joint::new("target", kind.clone());
        let _ = target.init_vars_from_pos(&source.pos(), true);

        for (i, v) in values.iter().enumerate() {
            assert_relative_eq!(target.value(i).unwrap(), *v, epsilon = 1e-9);
        }
        assert_relative_eq!(target.pos(), source.pos(), epsilon = 1e-9);
    }
}

#[test]
fn test_init_vars_keeps_fixed_values() {
    let mut source = Joint::new("source", JointKind::RevSlide);
    let _ = source.set_value(0, 0.9).unwrap();
    let _ = source.set_value(1, 0.2).unwrap();

    let mut target = Joint::new("target", JointKind::RevSlide);
    let _ = target.set_value(0, -1.0).unwrap();
    let _ = target.set_fixed(0, true).unwrap();
    let _ = target.init_vars_from_pos(&source.pos(), false);

    assert_eq!(target.value(0), Some(-1.0));
    assert_relative_eq!(target.value(1).unwrap(), 0.2, epsilon = 1e-12);

    let _ = target.init_vars_from_pos(&source.pos(), true);
    assert_relative_eq!(target.value(0).unwrap(), 0.9, epsilon = 1e-12);
}

#[test]
fn test_copy_state_from() {
    let source = joint_with_state(&JointKind::Cross, &sample_state(2));
    let mut target = Joint::new("copy", JointKind::Cross);
    assert_eq!(target.copy_state_from(&source), Change::STATE);
    assert_relative_eq!(target.der2(), source.der2(), epsilon = 1e-15);

    let mut other = Joint::new("other", JointKind::Ball);
    assert_eq!(other.copy_state_from(&source), Change::NONE);
}

#[test]
fn test_set_kind_resizes_variables() {
    let mut joint = Joint::new("swap", JointKind::Revolute);
    let _ = joint.set_value(0, 0.4).unwrap();
    let _ = joint.set_fixed(0, true).unwrap();
    joint.set_var_index(0, VarIndex::Fixed(0));

    assert_eq!(joint.set_kind(JointKind::Ball), Change::TOPOLOGY);
    assert_eq!(joint.var_count(), 3);
    assert_eq!(joint.value(0), Some(0.4));
    assert_eq!(joint.is_fixed(0), Some(true));
    assert_eq!(joint.is_fixed(2), Some(false));
    assert_eq!(joint.var_index(0), Some(VarIndex::Unassigned));

    // Seeding from a transform touches every variable of the new kind.
    let mut source = Joint::new("source", JointKind::Ball);
    for (i, v) in [0.3, -0.4, 0.7].into_iter().enumerate() {
        let _ = source.set_value(i, v).unwrap();
    }
    let _ = joint.init_vars_from_pos(&source.pos(), true);
    assert_relative_eq!(joint.pos(), source.pos(), epsilon = 1e-9);

    assert_eq!(joint.set_kind(JointKind::Slide), Change::TOPOLOGY);
    assert_eq!(joint.var_count(), 1);
    assert!(joint.set_value(1, 0.0).is_err());
}
