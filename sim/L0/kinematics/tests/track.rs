//! Track-follower joints on a circular track.

use std::f64::consts::PI;
use std::sync::Arc;

use approx::assert_relative_eq;
use nalgebra::Vector3;
use sim_kinematics::{
    Body, BodyId, CircleTrack, Grip, Joint, JointId, JointKind, Model, SolverConfig, Topology,
    Track,
};

const RADIUS: f64 = 3.0;
const PIPE: f64 = 0.05;
const WHEEL: f64 = 0.25;

fn circle() -> CircleTrack {
    CircleTrack::new(Vector3::new(1.0, -1.0, 0.5), Vector3::z(), RADIUS).with_pipe_radius(PIPE)
}

fn cart() -> (Model, Topology, JointId, BodyId) {
    let mut model = Model::new("track");
    let ground = model.add_body(Body::new("ground"));
    let cart = model.add_body(Body::new("cart"));
    let wheel = model.add_joint(Joint::new("wheel", JointKind::track(Arc::new(circle()), WHEEL)));
    model
        .add_grip(Grip::new("wheel", ground, cart).with_joint(wheel))
        .expect("grip should be valid");
    let topology = model.build_topologies().expect("build should succeed").remove(0);
    (model, topology, wheel, cart)
}

fn place(model: &mut Model, topology: &mut Topology, wheel: JointId, values: [f64; 4]) {
    for (var, value) in values.into_iter().enumerate() {
        model.set_joint_value(wheel, var, value).expect("variable exists");
    }
    let result = topology
        .solve_pos(model, &SolverConfig::default())
        .expect("solve should not fail");
    assert!(result.converged);
}

#[test]
fn test_tree_only_structure() {
    let (_, topology, ..) = cart();
    assert!(topology.loops().is_empty());
    assert_eq!(topology.free_count(), 0);
    assert_eq!(topology.bodies().len(), 2);
}

#[test]
fn test_cart_rides_on_the_circle() {
    let (mut model, mut topology, wheel, cart) = cart();
    let track = circle();
    let lift = Vector3::z() * (WHEEL + PIPE);

    place(&mut model, &mut topology, wheel, [0.0; 4]);
    let origin = model.body(cart).expect("cart exists").abs_origin();
    assert_relative_eq!(origin, track.point(0.0) + lift, epsilon = 1e-12);
    assert_relative_eq!(origin, Vector3::new(4.0, -1.0, 0.8), epsilon = 1e-12);

    place(&mut model, &mut topology, wheel, [PI * RADIUS, 0.0, 0.0, 0.0]);
    let origin = model.body(cart).expect("cart exists").abs_origin();
    assert_relative_eq!(origin, Vector3::new(-2.0, -1.0, 0.8), epsilon = 1e-12);
}

#[test]
fn test_cart_speed_is_along_the_track() {
    let (mut model, mut topology, wheel, cart) = cart();
    let track = circle();
    let s = 1.1;
    let s_dot = 0.7;

    place(&mut model, &mut topology, wheel, [s, 0.0, 0.0, 0.0]);
    let _ = model
        .update_joint(wheel, |j| j.set_speed(0, s_dot))
        .expect("joint exists");
    let free = topology.solve_speed(&mut model).expect("positions are valid");
    assert!(free.is_empty());

    let body = model.body(cart).expect("cart exists");
    assert_relative_eq!(body.abs_origin_speed(), track.dir(s) * s_dot, epsilon = 1e-12);
}

#[test]
fn test_rebuild_seeds_from_placement() {
    let (mut model, mut topology, wheel, _) = cart();
    let values = [2.5, 0.1, 0.2, 0.0];
    place(&mut model, &mut topology, wheel, values);

    // Scramble the joint, then rebuild: the joint is recovered from the
    // body placements.
    model.set_joint_value(wheel, 0, 0.0).expect("variable exists");
    let _ = model.build_topologies().expect("build should succeed");

    let joint = model.joint(wheel).expect("joint exists");
    for (var, expected) in values.into_iter().enumerate() {
        assert_relative_eq!(joint.value(var).expect("variable exists"), expected, epsilon = 1e-9);
    }
}
