//! Spanning-tree and loop discovery.
//!
//! Breadth-first scan from a root body. A grip to an unseen body becomes a
//! tree edge; a grip to a body already seen at the same or a deeper level
//! closes a loop, which is reconstructed by climbing both parent chains
//! until they meet or are bridged by a single grip.

use std::collections::VecDeque;

use tracing::{debug, trace, warn};

use super::{Loop, Topology, bandwidth};
use crate::ids::{BodyId, GripId};
use crate::model::Model;
use crate::{KinError, Result};

/// Build one topology per connected component that has at least one grip.
pub(crate) fn build_all(model: &mut Model) -> Result<Vec<Topology>> {
    reset(model);

    let mut topologies = Vec::new();
    while let Some(root) = first_unseen(model) {
        let topology = build(model, root).inspect_err(|err| {
            warn!(root = %root, error = %err, "topology build failed");
        })?;
        if topology.grips.is_empty() {
            trace!(body = %root, "skipping isolated body");
            continue;
        }
        topologies.push(topology);
    }
    Ok(topologies)
}

fn reset(model: &mut Model) {
    for body in model.bodies_mut() {
        body.tree_level = None;
    }
    for grip in model.grips_mut() {
        grip.loop_count = 0;
        grip.parent_rel = false;
    }
    for joint in model.joints_mut() {
        joint.clear_var_indices();
    }
}

fn first_unseen(model: &Model) -> Option<BodyId> {
    model
        .body_ids()
        .find(|&id| model.body(id).is_some_and(|b| b.tree_level.is_none()))
}

/// Scan the component containing `root` and prepare it for solving.
fn build(model: &mut Model, root: BodyId) -> Result<Topology> {
    model.body_mut_raw(root)?.tree_level = Some(0);
    let mut topology = Topology::empty(root, model.structure_epoch());
    let mut cycles = Vec::new();

    let mut next = 0;
    while next < topology.bodies.len() {
        body_scan(model, &mut topology, &mut cycles, next)?;
        next += 1;
    }

    topology.joints = topology
        .grips
        .iter()
        .map(|&g| model.grip_joint_id(g))
        .collect::<Result<_>>()?;

    let loops = cycles
        .into_iter()
        .map(|grips| resolve_loop(model, grips))
        .collect::<Result<Vec<_>>>()?;

    bandwidth::reduce(model, &mut topology, loops)?;
    set_loop_counts(model, &topology)?;

    for &grip in &topology.grips {
        model.init_joint_from_bodies(grip, true)?;
    }

    debug!(
        root = %root,
        bodies = topology.bodies.len(),
        grips = topology.grips.len(),
        loops = topology.loops.len(),
        free = topology.free_count,
        fixed = topology.fixed_count,
        band_width = topology.band_width,
        "topology built"
    );
    Ok(topology)
}

fn body_scan(
    model: &mut Model,
    topology: &mut Topology,
    cycles: &mut Vec<Vec<GripId>>,
    index: usize,
) -> Result<()> {
    let body = topology.bodies[index];
    let level = tree_level(model, body)?;
    let grips = model.body_ref(body)?.grips.clone();

    for id in grips {
        let grip = model.grip_ref(id)?;
        if grip.loop_count > 0 {
            // Same-level bridge already taken into a loop.
            continue;
        }
        let other = grip
            .other_body(body)
            .ok_or_else(|| {
                KinError::malformed_loop(format!("{id} is listed on {body} but does not touch it"))
            })?;

        let other_level = model.body_ref(other)?.tree_level;
        match other_level {
            None => {
                model.body_mut_raw(other)?.tree_level = Some(level + 1);
                model.grip_mut_raw(id)?.parent_rel = true;
                topology.grips.push(id);
                topology.bodies.push(other);
            }
            Some(l) if l < level => {}
            Some(_) => {
                topology.grips.push(id);
                cycles.push(build_loop(model, id)?);
            }
        }
    }
    Ok(())
}

/// Reconstruct the cycle closed by grip `start`.
fn build_loop(model: &mut Model, start: GripId) -> Result<Vec<GripId>> {
    let mut cycle = VecDeque::from([start]);

    let grip = model.grip_ref(start)?;
    let (mut body1, mut body2) = (grip.body1(), grip.body2());
    let (level1, level2) = (tree_level(model, body1)?, tree_level(model, body2)?);

    if level1 > level2 {
        let up = parent_grip(model, body1)?;
        cycle.push_front(up);
        body1 = parent_of(model, body1)?;
    } else if level1 < level2 {
        let up = parent_grip(model, body2)?;
        cycle.push_back(up);
        body2 = parent_of(model, body2)?;
    } else {
        model.grip_mut_raw(start)?.loop_count = 1;
    }

    // Parallel grips between a parent and its child close immediately.
    if body1 == body2 {
        return Ok(cycle.into());
    }

    loop {
        let parent1 = parent_of(model, body1)?;
        let parent2 = parent_of(model, body2)?;

        if parent1 == parent2 {
            cycle.push_front(parent_grip(model, body1)?);
            cycle.push_back(parent_grip(model, body2)?);
            break;
        }
        if let Some(bridge) = grip_to(model, body1, parent2)? {
            cycle.push_front(bridge);
            cycle.push_back(parent_grip(model, body2)?);
            break;
        }
        if let Some(bridge) = grip_to(model, body2, parent1)? {
            cycle.push_front(parent_grip(model, body1)?);
            cycle.push_back(bridge);
            break;
        }
        if let Some(bridge) = grip_to(model, parent1, parent2)? {
            cycle.push_front(parent_grip(model, body1)?);
            cycle.push_front(bridge);
            cycle.push_back(parent_grip(model, body2)?);
            break;
        }

        cycle.push_front(parent_grip(model, body1)?);
        body1 = parent1;
        cycle.push_back(parent_grip(model, body2)?);
        body2 = parent2;
    }

    Ok(cycle.into())
}

fn tree_level(model: &Model, body: BodyId) -> Result<usize> {
    model
        .body_ref(body)?
        .tree_level
        .ok_or_else(|| KinError::malformed_loop(format!("{body} was not reached by the tree scan")))
}

/// The tree edge from `body` to its parent.
fn parent_grip(model: &Model, body: BodyId) -> Result<GripId> {
    let level = tree_level(model, body)?;
    for &id in &model.body_ref(body)?.grips {
        let grip = model.grip_ref(id)?;
        if !grip.parent_rel {
            continue;
        }
        if let Some(other) = grip.other_body(body) {
            if model.body_ref(other)?.tree_level.is_some_and(|l| l < level) {
                return Ok(id);
            }
        }
    }
    Err(KinError::malformed_loop(format!("{body} has no parent in the spanning tree")))
}

fn parent_of(model: &Model, body: BodyId) -> Result<BodyId> {
    let grip = parent_grip(model, body)?;
    model
        .grip_ref(grip)?
        .other_body(body)
        .ok_or_else(|| KinError::malformed_loop(format!("{grip} does not touch {body}")))
}

/// A grip of `from` whose other end is `to`.
fn grip_to(model: &Model, from: BodyId, to: BodyId) -> Result<Option<GripId>> {
    for &id in &model.body_ref(from)?.grips {
        if model.grip_ref(id)?.other_body(from) == Some(to) {
            return Ok(Some(id));
        }
    }
    Ok(None)
}

/// Find the start body and the side each grip is entered from.
fn resolve_loop(model: &Model, grips: Vec<GripId>) -> Result<Loop> {
    let first_body = first_body(model, &grips)?;

    let mut body = first_body;
    let mut enters_body1 = Vec::with_capacity(grips.len());
    let mut joints = Vec::with_capacity(grips.len());

    for &id in &grips {
        let grip = model.grip_ref(id)?;
        joints.push(model.grip_joint_id(id)?);
        if body == grip.body1() {
            enters_body1.push(true);
            body = grip.body2();
        } else if body == grip.body2() {
            enters_body1.push(false);
            body = grip.body1();
        } else {
            return Err(KinError::malformed_loop(format!(
                "{id} does not continue the chain at {body}"
            )));
        }
    }

    if body != first_body {
        return Err(KinError::malformed_loop(format!(
            "chain ends at {body} instead of {first_body}"
        )));
    }

    Ok(Loop {
        grips,
        joints,
        enters_body1,
        first_body,
        peers: Vec::new(),
        level: 0,
    })
}

/// Body shared by the first and the last grip.
fn first_body(model: &Model, grips: &[GripId]) -> Result<BodyId> {
    let (Some(&first), Some(&last)) = (grips.first(), grips.last()) else {
        return Err(KinError::malformed_loop("empty loop"));
    };
    let first = model.grip_ref(first)?;
    let last = model.grip_ref(last)?;

    [first.body1(), first.body2()]
        .into_iter()
        .find(|&b| last.other_body(b).is_some())
        .ok_or_else(|| KinError::malformed_loop("first and last grip share no body"))
}

fn set_loop_counts(model: &mut Model, topology: &Topology) -> Result<()> {
    for &id in &topology.grips {
        model.grip_mut_raw(id)?.loop_count = 0;
    }
    for lp in &topology.loops {
        for &id in &lp.grips {
            model.grip_mut_raw(id)?.loop_count += 1;
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::body::Body;
    use crate::grip::Grip;
    use crate::joint::{Joint, JointKind};

    fn hinge(model: &mut Model, name: &str, a: BodyId, b: BodyId) -> GripId {
        let joint = model.add_joint(Joint::new(name, JointKind::Revolute));
        model.add_grip(Grip::new(name, a, b).with_joint(joint)).unwrap()
    }

    #[test]
    fn test_four_bar_loop() {
        let mut model = Model::new("four-bar");
        let ground = model.add_body(Body::new("ground"));
        let crank = model.add_body(Body::new("crank"));
        let coupler = model.add_body(Body::new("coupler"));
        let rocker = model.add_body(Body::new("rocker"));
        let g0 = hinge(&mut model, "g0", ground, crank);
        let g1 = hinge(&mut model, "g1", crank, coupler);
        let g2 = hinge(&mut model, "g2", coupler, rocker);
        let g3 = hinge(&mut model, "g3", ground, rocker);

        let topologies = model.build_topologies().unwrap();
        assert_eq!(topologies.len(), 1);
        let topology = &topologies[0];

        assert_eq!(topology.bodies(), &[ground, crank, rocker, coupler]);
        assert_eq!(topology.loops().len(), 1);
        let lp = &topology.loops()[0];
        assert_eq!(lp.grips(), &[g0, g1, g2, g3]);
        assert_eq!(lp.first_body(), ground);

        assert!(model.grip(g0).unwrap().is_parent_rel());
        assert!(!model.grip(g2).unwrap().is_parent_rel());
        assert!([g0, g1, g2, g3].iter().all(|&g| model.grip(g).unwrap().loop_count() == 1));
        assert_eq!(model.body(coupler).unwrap().tree_level(), Some(2));
        assert_eq!(topology.free_count(), 4);
        assert_eq!(topology.row_count(), 6);
    }

    #[test]
    fn test_same_level_bridge() {
        // Triangle: both non-root bodies sit at level 1.
        let mut model = Model::new("triangle");
        let a = model.add_body(Body::new("a"));
        let b = model.add_body(Body::new("b"));
        let c = model.add_body(Body::new("c"));
        let ab = hinge(&mut model, "ab", a, b);
        let ac = hinge(&mut model, "ac", a, c);
        let bc = hinge(&mut model, "bc", b, c);

        let topology = model.build_topologies().unwrap().remove(0);
        assert_eq!(topology.loops().len(), 1);
        assert_eq!(topology.loops()[0].grips(), &[ab, bc, ac]);
        assert_eq!(topology.grips().len(), 3);
    }

    #[test]
    fn test_parallel_grips() {
        let mut model = Model::new("parallel");
        let a = model.add_body(Body::new("a"));
        let b = model.add_body(Body::new("b"));
        let first = hinge(&mut model, "first", a, b);
        let second = hinge(&mut model, "second", a, b);

        let topology = model.build_topologies().unwrap().remove(0);
        assert_eq!(topology.loops()[0].grips(), &[second, first]);
        let lp = &topology.loops()[0];
        assert_eq!(lp.enters_body1(0), Some(true));
        assert_eq!(lp.enters_body1(1), Some(false));
    }

    #[test]
    fn test_components_and_missing_joint() {
        let mut model = Model::new("split");
        let a = model.add_body(Body::new("a"));
        let b = model.add_body(Body::new("b"));
        let c = model.add_body(Body::new("c"));
        let d = model.add_body(Body::new("d"));
        let _lonely = model.add_body(Body::new("lonely"));
        let _ = hinge(&mut model, "ab", a, b);
        let _ = hinge(&mut model, "cd", c, d);

        let topologies = model.build_topologies().unwrap();
        assert_eq!(topologies.len(), 2);
        assert_eq!(topologies[1].root(), c);
        assert!(topologies.iter().all(|t| t.loops().is_empty()));

        let _ = model.add_grip(Grip::new("bare", b, c)).unwrap();
        assert_eq!(
            model.build_topologies().unwrap_err(),
            KinError::missing_joint("bare")
        );
    }

    #[test]
    fn test_joints_seeded_from_bodies() {
        let mut model = Model::new("seed");
        let a = model.add_body(Body::new("a"));
        let b = model.add_body(Body::with_pos(
            "b",
            crate::transform::axis_rotation(crate::transform::Axis::Z, 0.25, 0),
        ));
        let g = hinge(&mut model, "ab", a, b);
        let joint = model.grip(g).unwrap().joint().unwrap();
        model.set_joint_value(joint, 0, 1.0).unwrap();

        let _ = model.build_topologies().unwrap();
        assert!((model.joint(joint).unwrap().value(0).unwrap() - 0.25).abs() < 1e-12);
    }
}
