//! The mechanism model: arenas of bodies, grips and joints.
//!
//! Entities live in owning arenas and are addressed by [`BodyId`],
//! [`GripId`] and [`JointId`]. Removal leaves a hole so handles stay
//! stable. Every mutation reports a [`Change`] that the model folds into
//! two dirty bits: *modified* (state changed) and *topology modified*
//! (structure changed; built topologies must be rebuilt). Structural
//! changes also advance [`Model::structure_epoch`], which built
//! [`Topology`] values compare against before solving.

use std::ops::{BitOr, BitOrAssign};

use nalgebra::Vector3;

use crate::body::Body;
use crate::function::JointFunction;
use crate::grip::Grip;
use crate::ids::{BodyId, GripId, JointId};
use crate::joint::Joint;
use crate::topology::{Topology, builder};
use crate::transform::{self, Trf};
use crate::{KinError, Result};

/// What a mutation changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[must_use]
pub struct Change {
    /// Variable values, rates or placements changed.
    pub state: bool,
    /// The solve structure changed (entities, fixed flags).
    pub topology: bool,
}

impl Change {
    /// Nothing changed.
    pub const NONE: Self = Self {
        state: false,
        topology: false,
    };

    /// State changed.
    pub const STATE: Self = Self {
        state: true,
        topology: false,
    };

    /// Structure changed.
    pub const TOPOLOGY: Self = Self {
        state: false,
        topology: true,
    };

    /// Whether nothing changed.
    #[must_use]
    pub const fn is_none(self) -> bool {
        !self.state && !self.topology
    }
}

impl BitOr for Change {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self {
            state: self.state || rhs.state,
            topology: self.topology || rhs.topology,
        }
    }
}

impl BitOrAssign for Change {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = *self | rhs;
    }
}

/// A mechanism: bodies connected by grips carrying joints.
#[derive(Debug, Clone, Default)]
pub struct Model {
    name: String,
    bodies: Vec<Option<Body>>,
    grips: Vec<Option<Grip>>,
    joints: Vec<Option<Joint>>,
    modified: bool,
    topology_modified: bool,
    structure_epoch: u64,
    offset: Vector3<f64>,
    functions: Vec<JointFunction>,
}

impl Model {
    /// Create an empty model.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Model name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fold a change into the dirty bits.
    pub fn record(&mut self, change: Change) {
        if change.state {
            self.modified = true;
        }
        if change.topology {
            self.modified = true;
            self.topology_modified = true;
            self.structure_epoch += 1;
        }
    }

    /// Whether anything changed since the last [`Self::clear_modified`].
    #[must_use]
    pub const fn is_modified(&self) -> bool {
        self.modified
    }

    /// Whether the structure changed since topologies were last built.
    #[must_use]
    pub const fn is_topology_modified(&self) -> bool {
        self.topology_modified
    }

    /// Counter advanced by every structural change.
    #[must_use]
    pub const fn structure_epoch(&self) -> u64 {
        self.structure_epoch
    }

    /// Reset the *modified* bit.
    pub fn clear_modified(&mut self) {
        self.modified = false;
    }

    // ==================== Entities ====================

    /// Add a body. The first body added is the default tree root.
    pub fn add_body(&mut self, body: Body) -> BodyId {
        let id = BodyId::from_index(self.bodies.len());
        self.bodies.push(Some(body));
        self.record(Change::TOPOLOGY);
        id
    }

    /// Add a joint, to be mounted on a grip.
    pub fn add_joint(&mut self, joint: Joint) -> JointId {
        let id = JointId::from_index(self.joints.len());
        self.joints.push(Some(joint));
        self.record(Change::TOPOLOGY);
        id
    }

    /// Add a grip between two existing, distinct bodies.
    ///
    /// # Errors
    ///
    /// Returns an error if a body or the joint does not exist, if both ends
    /// are the same body, or if the joint is already mounted on another grip.
    pub fn add_grip(&mut self, mut grip: Grip) -> Result<GripId> {
        self.body_ref(grip.body1())?;
        self.body_ref(grip.body2())?;
        if grip.body1() == grip.body2() {
            return Err(KinError::malformed_loop(format!(
                "grip {} connects {} to itself",
                grip.name(),
                grip.body1()
            )));
        }
        if let Some(joint) = grip.joint() {
            self.check_mountable(joint, None)?;
        }

        grip.parent_rel = false;
        grip.loop_count = 0;

        let id = GripId::from_index(self.grips.len());
        let (b1, b2) = (grip.body1(), grip.body2());
        self.grips.push(Some(grip));
        self.body_mut_raw(b1)?.grips.push(id);
        self.body_mut_raw(b2)?.grips.push(id);
        self.record(Change::TOPOLOGY);
        Ok(id)
    }

    /// Mount `joint` on `grip`, or unmount with `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if an ID is invalid or the joint is mounted elsewhere.
    pub fn mount_joint(&mut self, grip: GripId, joint: Option<JointId>) -> Result<()> {
        self.grip_ref(grip)?;
        if let Some(joint) = joint {
            self.check_mountable(joint, Some(grip))?;
        }
        self.grip_mut_raw(grip)?.set_joint(joint);
        self.record(Change::TOPOLOGY);
        Ok(())
    }

    fn check_mountable(&self, joint: JointId, except: Option<GripId>) -> Result<()> {
        self.joint_ref(joint)?;
        let taken = self
            .grip_ids()
            .filter(|&g| Some(g) != except)
            .any(|g| self.grips[g.index()].as_ref().and_then(Grip::joint) == Some(joint));
        if taken {
            return Err(KinError::InvalidJointId(joint.raw()));
        }
        Ok(())
    }

    /// Remove a grip and detach it from its bodies. Its joint stays in the
    /// model.
    ///
    /// # Errors
    ///
    /// Returns an error if the grip does not exist.
    pub fn remove_grip(&mut self, id: GripId) -> Result<Grip> {
        let grip = self
            .grips
            .get_mut(id.index())
            .and_then(Option::take)
            .ok_or(KinError::InvalidGripId(id.raw()))?;

        for body in [grip.body1(), grip.body2()] {
            if let Some(Some(b)) = self.bodies.get_mut(body.index()) {
                b.grips.retain(|&g| g != id);
            }
        }
        self.record(Change::TOPOLOGY);
        Ok(grip)
    }

    /// Remove a body together with every grip attached to it.
    ///
    /// # Errors
    ///
    /// Returns an error if the body does not exist.
    pub fn remove_body(&mut self, id: BodyId) -> Result<Body> {
        let attached = self.body_ref(id)?.grips.clone();
        for grip in attached {
            self.remove_grip(grip)?;
        }
        let body = self
            .bodies
            .get_mut(id.index())
            .and_then(Option::take)
            .ok_or(KinError::InvalidBodyId(id.raw()))?;
        self.record(Change::TOPOLOGY);
        Ok(body)
    }

    /// Live body IDs in insertion order.
    pub fn body_ids(&self) -> impl Iterator<Item = BodyId> + '_ {
        live_ids(&self.bodies).map(BodyId::from_index)
    }

    /// Live grip IDs in insertion order.
    pub fn grip_ids(&self) -> impl Iterator<Item = GripId> + '_ {
        live_ids(&self.grips).map(GripId::from_index)
    }

    /// Live joint IDs in insertion order.
    pub fn joint_ids(&self) -> impl Iterator<Item = JointId> + '_ {
        live_ids(&self.joints).map(JointId::from_index)
    }

    /// Number of live bodies.
    #[must_use]
    pub fn body_count(&self) -> usize {
        self.body_ids().count()
    }

    /// Number of live grips.
    #[must_use]
    pub fn grip_count(&self) -> usize {
        self.grip_ids().count()
    }

    /// Look up a body.
    #[must_use]
    pub fn body(&self, id: BodyId) -> Option<&Body> {
        self.bodies.get(id.index()).and_then(Option::as_ref)
    }

    /// Mutable access to a body. Marks the model modified.
    pub fn body_mut(&mut self, id: BodyId) -> Option<&mut Body> {
        self.modified = true;
        self.bodies.get_mut(id.index()).and_then(Option::as_mut)
    }

    /// Look up a grip.
    #[must_use]
    pub fn grip(&self, id: GripId) -> Option<&Grip> {
        self.grips.get(id.index()).and_then(Option::as_ref)
    }

    /// Replace a grip's offset frames.
    ///
    /// # Errors
    ///
    /// Returns an error if the grip does not exist.
    pub fn set_grip_offsets(&mut self, id: GripId, pos1: Trf, pos2: Trf) -> Result<()> {
        self.grip_mut_raw(id)?.set_offsets(pos1, pos2);
        self.record(Change::STATE);
        Ok(())
    }

    /// Look up a joint.
    #[must_use]
    pub fn joint(&self, id: JointId) -> Option<&Joint> {
        self.joints.get(id.index()).and_then(Option::as_ref)
    }

    /// Joint mounted on a grip.
    ///
    /// # Errors
    ///
    /// Returns an error if the grip does not exist or has no joint.
    pub fn grip_joint(&self, grip: GripId) -> Result<&Joint> {
        let g = self.grip_ref(grip)?;
        let id = g.joint().ok_or_else(|| KinError::missing_joint(g.name()))?;
        self.joint_ref(id)
    }

    /// Mutate a joint and record the change it reports.
    ///
    /// # Errors
    ///
    /// Returns an error if the joint does not exist or `f` fails.
    ///
    /// # Example
    ///
    /// ```
    /// use sim_kinematics::{Joint, JointKind, Model};
    ///
    /// let mut model = Model::new("m");
    /// let hinge = model.add_joint(Joint::new("hinge", JointKind::Revolute));
    /// let epoch = model.structure_epoch();
    ///
    /// let _ = model.update_joint(hinge, |j| j.set_fixed(0, true)).unwrap();
    /// assert!(model.structure_epoch() > epoch);
    /// ```
    pub fn update_joint<F>(&mut self, id: JointId, f: F) -> Result<Change>
    where
        F: FnOnce(&mut Joint) -> Result<Change>,
    {
        let change = f(self.joint_mut_raw(id)?)?;
        self.record(change);
        Ok(change)
    }

    /// Set a joint variable's value.
    ///
    /// # Errors
    ///
    /// Returns an error if the joint does not exist or `var` is out of range.
    pub fn set_joint_value(&mut self, id: JointId, var: usize, value: f64) -> Result<()> {
        self.update_joint(id, |j| j.set_value(var, value)).map(|_| ())
    }

    /// Fix or free a joint variable.
    ///
    /// # Errors
    ///
    /// Returns an error if the joint does not exist or `var` is out of range.
    pub fn set_joint_fixed(&mut self, id: JointId, var: usize, fixed: bool) -> Result<()> {
        self.update_joint(id, |j| j.set_fixed(var, fixed)).map(|_| ())
    }

    /// Fix or free every variable of every mounted joint.
    pub fn set_fixed_all(&mut self, fixed: bool) {
        let mounted: Vec<JointId> = self
            .grip_ids()
            .filter_map(|g| self.grips[g.index()].as_ref().and_then(Grip::joint))
            .collect();
        let mut change = Change::NONE;
        for id in mounted {
            if let Some(Some(joint)) = self.joints.get_mut(id.index()) {
                change |= joint.set_fixed_all(fixed);
            }
        }
        self.record(change);
    }

    /// Joint transform implied by the current placements of a grip's bodies:
    /// `pos2 · B2 · B1⁻¹ · pos1⁻¹`.
    ///
    /// # Errors
    ///
    /// Returns an error if the grip or one of its bodies does not exist.
    pub fn joint_pos_from_bodies(&self, grip: GripId) -> Result<Trf> {
        let g = self.grip_ref(grip)?;
        let b1 = self.body_ref(g.body1())?;
        let b2 = self.body_ref(g.body2())?;
        Ok(g.pos2() * b2.pos() * b1.inv_pos() * g.inv_pos1())
    }

    /// Seed a grip's joint variables from the current body placements.
    ///
    /// # Errors
    ///
    /// Returns an error if the grip does not exist or has no joint.
    pub fn init_joint_from_bodies(&mut self, grip: GripId, fixed_also: bool) -> Result<()> {
        let target = self.joint_pos_from_bodies(grip)?;
        let joint = self.grip_joint_id(grip)?;
        let change = self.joint_mut_raw(joint)?.init_vars_from_pos(&target, fixed_also);
        self.record(change);
        Ok(())
    }

    /// World placement of a grip's joint frame on the side of `body`.
    ///
    /// # Errors
    ///
    /// Returns an error if the grip or body does not exist, or
    /// [`KinError::MalformedLoop`] if `body` is not one of the grip's bodies.
    pub fn abs_grip_pos(&self, grip: GripId, body: BodyId) -> Result<Trf> {
        let g = self.grip_ref(grip)?;
        let inv_offset = if body == g.body1() {
            g.inv_pos1()
        } else if body == g.body2() {
            g.inv_pos2()
        } else {
            return Err(KinError::malformed_loop(format!("{grip} does not touch {body}")));
        };
        Ok(self.body_ref(body)?.inv_pos() * inv_offset)
    }

    /// Add a table coupling between two joint variables and return its
    /// index. Solvers apply it to every topology holding the driven joint.
    ///
    /// # Errors
    ///
    /// Returns an error if a joint or variable does not exist, or if the
    /// function drives its own input.
    pub fn add_function(&mut self, function: JointFunction) -> Result<usize> {
        for end in [function.input(), function.output()] {
            let joint = self.joint_ref(end.joint)?;
            if end.var >= joint.var_count() {
                return Err(KinError::VarIndexOutOfRange {
                    joint: joint.name().to_string(),
                    index: end.var,
                    count: joint.var_count(),
                });
            }
        }
        if function.input() == function.output() {
            return Err(KinError::invalid_config(format!(
                "function {} drives its own input",
                function.name()
            )));
        }
        self.functions.push(function);
        self.record(Change::STATE);
        Ok(self.functions.len() - 1)
    }

    /// Table couplings in application order.
    #[must_use]
    pub fn functions(&self) -> &[JointFunction] {
        &self.functions
    }

    /// Remove the coupling at `index`.
    pub fn remove_function(&mut self, index: usize) -> Option<JointFunction> {
        (index < self.functions.len()).then(|| {
            self.record(Change::STATE);
            self.functions.remove(index)
        })
    }

    // ==================== Placement ====================

    /// Right-multiply every body except the root (the first live body) by
    /// `trf`.
    pub fn transform(&mut self, trf: &Trf) {
        for body in self.bodies.iter_mut().flatten().skip(1) {
            body.transform(trf);
        }
        self.record(Change::STATE);
    }

    /// Remember an offset to be applied with [`Self::apply_offset`].
    pub fn set_offset(&mut self, offset: Vector3<f64>) {
        self.offset = offset;
    }

    /// The remembered offset.
    #[must_use]
    pub const fn offset(&self) -> Vector3<f64> {
        self.offset
    }

    /// Shift every non-root body by the remembered offset.
    pub fn apply_offset(&mut self) {
        let o = self.offset;
        self.transform(&transform::translation(-o.x, -o.y, -o.z));
    }

    // ==================== Topology ====================

    /// Decompose the mechanism into one [`Topology`] per connected component
    /// that has at least one grip.
    ///
    /// Resets tree levels, loop counts and variable indices, then seeds every
    /// mounted joint from the current body placements.
    ///
    /// # Errors
    ///
    /// Returns an error if a grip reached by the scan has no joint or a loop
    /// cannot be reconstructed.
    pub fn build_topologies(&mut self) -> Result<Vec<Topology>> {
        let topologies = builder::build_all(self)?;
        self.topology_modified = false;
        Ok(topologies)
    }

    // ==================== Crate-internal access ====================

    pub(crate) fn body_ref(&self, id: BodyId) -> Result<&Body> {
        self.body(id).ok_or(KinError::InvalidBodyId(id.raw()))
    }

    pub(crate) fn body_mut_raw(&mut self, id: BodyId) -> Result<&mut Body> {
        self.bodies
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or(KinError::InvalidBodyId(id.raw()))
    }

    pub(crate) fn grip_ref(&self, id: GripId) -> Result<&Grip> {
        self.grip(id).ok_or(KinError::InvalidGripId(id.raw()))
    }

    pub(crate) fn grip_mut_raw(&mut self, id: GripId) -> Result<&mut Grip> {
        self.grips
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or(KinError::InvalidGripId(id.raw()))
    }

    pub(crate) fn joint_ref(&self, id: JointId) -> Result<&Joint> {
        self.joint(id).ok_or(KinError::InvalidJointId(id.raw()))
    }

    pub(crate) fn joint_mut_raw(&mut self, id: JointId) -> Result<&mut Joint> {
        self.joints
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or(KinError::InvalidJointId(id.raw()))
    }

    pub(crate) fn grip_joint_id(&self, grip: GripId) -> Result<JointId> {
        let g = self.grip_ref(grip)?;
        g.joint().ok_or_else(|| KinError::missing_joint(g.name()))
    }

    pub(crate) fn bodies_mut(&mut self) -> impl Iterator<Item = &mut Body> {
        self.bodies.iter_mut().flatten()
    }

    pub(crate) fn grips_mut(&mut self) -> impl Iterator<Item = &mut Grip> {
        self.grips.iter_mut().flatten()
    }

    pub(crate) fn joints_mut(&mut self) -> impl Iterator<Item = &mut Joint> {
        self.joints.iter_mut().flatten()
    }
}

fn live_ids<T>(arena: &[Option<T>]) -> impl Iterator<Item = usize> + '_ {
    arena
        .iter()
        .enumerate()
        .filter_map(|(i, slot)| slot.as_ref().map(|_| i))
}
