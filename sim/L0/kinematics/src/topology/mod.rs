//! Topologies: spanning tree plus independent loops of one connected
//! component.
//!
//! A [`Topology`] is built by [`Model::build_topologies`] and then operates
//! on the model it was built from. It owns no entities, only handles and the
//! solve bookkeeping:
//!
//! - the bodies in breadth-first order (root first) and every grip the scan
//!   reached, tree edges (`parent_rel`) and loop-closing grips alike;
//! - the loops, each an ordered cycle of grips, in bandwidth-reduced order;
//! - the dense variable indexing and the band width of the normal matrix;
//! - the validity chain `position → speed → accel → jerk`.
//!
//! Validity: a stage can only be valid when the previous one is. Writing a
//! stage's vector invalidates every later stage; a vector of the wrong size
//! invalidates the stage itself.

pub(crate) mod bandwidth;
pub(crate) mod builder;
mod solver;
mod state;

pub use solver::PosSolveResult;
pub use state::{StageVectors, StateSequence, TopologyState};

use nalgebra::DVector;

use crate::ids::{BodyId, GripId, JointId};
use crate::joint::{Stage, VarIndex};
use crate::linalg::BandMatrix;
use crate::model::{Change, Model};
use crate::transform::{Trf, TrfJet};
use crate::{KinError, Result};

/// An ordered cycle of grips whose composed relative transforms equal the
/// identity when the loop is closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Loop {
    pub(crate) grips: Vec<GripId>,
    pub(crate) joints: Vec<JointId>,
    pub(crate) enters_body1: Vec<bool>,
    pub(crate) first_body: BodyId,
    pub(crate) peers: Vec<usize>,
    pub(crate) level: usize,
}

impl Loop {
    /// Grips in traversal order.
    #[must_use]
    pub fn grips(&self) -> &[GripId] {
        &self.grips
    }

    /// Body shared by the first and the last grip, where traversal starts
    /// and ends.
    #[must_use]
    pub const fn first_body(&self) -> BodyId {
        self.first_body
    }

    /// Whether traversal enters grip `i` on its body-1 side.
    #[must_use]
    pub fn enters_body1(&self, i: usize) -> Option<bool> {
        self.enters_body1.get(i).copied()
    }

    /// Indices (into [`Topology::loops`]) of loops sharing a grip with this
    /// one.
    #[must_use]
    pub fn peers(&self) -> &[usize] {
        &self.peers
    }

    /// Breadth-first level in the peer graph.
    #[must_use]
    pub const fn level(&self) -> usize {
        self.level
    }

    /// Number of grips.
    #[must_use]
    pub fn len(&self) -> usize {
        self.grips.len()
    }

    /// Whether the loop has no grips.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.grips.is_empty()
    }
}

/// Normal equations assembled by the last successful solve of a stage.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalSystem {
    /// `JᵀJ` (plus regularization) in band storage, before factorization.
    pub matrix: BandMatrix,
    /// Right-hand side `-Jᵀr`.
    pub rhs: DVector<f64>,
}

/// The solve structure of one connected component.
#[derive(Debug, Clone)]
pub struct Topology {
    pub(crate) root: BodyId,
    pub(crate) bodies: Vec<BodyId>,
    pub(crate) grips: Vec<GripId>,
    pub(crate) joints: Vec<JointId>,
    pub(crate) loops: Vec<Loop>,
    pub(crate) free_count: usize,
    pub(crate) fixed_count: usize,
    pub(crate) row_count: usize,
    pub(crate) band_width: usize,
    pub(crate) angular: Vec<bool>,
    pub(crate) valid: [bool; 4],
    pub(crate) epoch: u64,
    pub(crate) pos_system: Option<NormalSystem>,
    pub(crate) speed_system: Option<NormalSystem>,
}

impl Topology {
    pub(crate) fn empty(root: BodyId, epoch: u64) -> Self {
        Self {
            root,
            bodies: vec![root],
            grips: Vec::new(),
            joints: Vec::new(),
            loops: Vec::new(),
            free_count: 0,
            fixed_count: 0,
            row_count: 0,
            band_width: 1,
            angular: Vec::new(),
            valid: [false; 4],
            epoch,
            pos_system: None,
            speed_system: None,
        }
    }

    /// Root body (tree level 0).
    #[must_use]
    pub const fn root(&self) -> BodyId {
        self.root
    }

    /// Bodies in breadth-first order, root first.
    #[must_use]
    pub fn bodies(&self) -> &[BodyId] {
        &self.bodies
    }

    /// Every grip reached by the scan.
    #[must_use]
    pub fn grips(&self) -> &[GripId] {
        &self.grips
    }

    /// Independent loops in processing order.
    #[must_use]
    pub fn loops(&self) -> &[Loop] {
        &self.loops
    }

    /// Number of free (solved) variables.
    #[must_use]
    pub const fn free_count(&self) -> usize {
        self.free_count
    }

    /// Number of fixed (prescribed) variables taking part in loops.
    #[must_use]
    pub const fn fixed_count(&self) -> usize {
        self.fixed_count
    }

    /// Number of closure equations (six per loop).
    #[must_use]
    pub const fn row_count(&self) -> usize {
        self.row_count
    }

    /// Stored diagonals of the normal matrix (bandwidth plus one).
    #[must_use]
    pub const fn band_width(&self) -> usize {
        self.band_width
    }

    /// Whether free variable `index` is an angle.
    #[must_use]
    pub fn is_angular(&self, index: usize) -> Option<bool> {
        self.angular.get(index).copied()
    }

    /// Structure epoch of the model when this topology was built.
    #[must_use]
    pub const fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Whether `stage` holds a consistent state.
    #[must_use]
    pub const fn is_valid(&self, stage: Stage) -> bool {
        self.valid[stage.order()]
    }

    /// Whether the position state is valid.
    #[must_use]
    pub const fn is_pos_valid(&self) -> bool {
        self.is_valid(Stage::Position)
    }

    /// Whether the speed state is valid.
    #[must_use]
    pub const fn is_speed_valid(&self) -> bool {
        self.is_valid(Stage::Speed)
    }

    /// Whether the acceleration state is valid.
    #[must_use]
    pub const fn is_accel_valid(&self) -> bool {
        self.is_valid(Stage::Accel)
    }

    /// Whether the jerk state is valid.
    #[must_use]
    pub const fn is_jerk_valid(&self) -> bool {
        self.is_valid(Stage::Jerk)
    }

    /// Normal equations of the last converged position solve.
    #[must_use]
    pub const fn pos_system(&self) -> Option<&NormalSystem> {
        self.pos_system.as_ref()
    }

    /// Normal equations of the last speed solve.
    #[must_use]
    pub const fn speed_system(&self) -> Option<&NormalSystem> {
        self.speed_system.as_ref()
    }

    /// Mark `stage` and every later stage invalid.
    pub fn invalidate_from(&mut self, stage: Stage) {
        for flag in &mut self.valid[stage.order()..] {
            *flag = false;
        }
    }

    pub(crate) fn mark_valid(&mut self, stage: Stage) {
        let ok = stage.previous().is_none_or(|prev| self.is_valid(prev));
        self.valid[stage.order()] = ok;
    }

    pub(crate) fn check_epoch(&self, model: &Model) -> Result<()> {
        if model.structure_epoch() == self.epoch {
            Ok(())
        } else {
            Err(KinError::StaleTopology {
                built: self.epoch,
                current: model.structure_epoch(),
            })
        }
    }

    pub(crate) fn require(&self, stage: Stage, action: &'static str) -> Result<()> {
        if self.is_valid(stage) {
            Ok(())
        } else {
            Err(KinError::InvalidState {
                stage: action,
                required: stage.name(),
            })
        }
    }

    // ==================== State vectors ====================

    fn vector_len(&self, fixed: bool) -> usize {
        if fixed { self.fixed_count } else { self.free_count }
    }

    /// Gather the free (or fixed) variables of `stage` into a dense vector.
    ///
    /// Returns `None` unless the stage is valid.
    ///
    /// # Errors
    ///
    /// Returns an error if the topology is stale or a joint is missing.
    pub fn get_vector(
        &self,
        model: &Model,
        stage: Stage,
        fixed: bool,
    ) -> Result<Option<DVector<f64>>> {
        self.check_epoch(model)?;
        if !self.is_valid(stage) {
            return Ok(None);
        }
        self.gather(model, stage, fixed).map(Some)
    }

    pub(crate) fn gather(&self, model: &Model, stage: Stage, fixed: bool) -> Result<DVector<f64>> {
        let mut out = DVector::zeros(self.vector_len(fixed));
        for &id in &self.joints {
            let joint = model.joint_ref(id)?;
            for var in 0..joint.var_count() {
                let slot = match (joint.var_index(var), fixed) {
                    (Some(VarIndex::Free(i)), false) | (Some(VarIndex::Fixed(i)), true) => i,
                    _ => continue,
                };
                if let (Some(x), Some(value)) = (out.get_mut(slot), joint.rate(stage, var)) {
                    *x = value;
                }
            }
        }
        Ok(out)
    }

    pub(crate) fn scatter(
        &self,
        model: &mut Model,
        stage: Stage,
        values: &DVector<f64>,
        fixed: bool,
    ) -> Result<()> {
        let mut change = Change::NONE;
        for &id in &self.joints {
            let joint = model.joint_mut_raw(id)?;
            for var in 0..joint.var_count() {
                let slot = match (joint.var_index(var), fixed) {
                    (Some(VarIndex::Free(i)), false) | (Some(VarIndex::Fixed(i)), true) => i,
                    _ => continue,
                };
                if let Some(&value) = values.get(slot) {
                    change |= joint.set_rate(stage, var, value)?;
                }
            }
        }
        model.record(change);
        Ok(())
    }

    /// Write the free (or fixed) variables of `stage`.
    ///
    /// Later stages become invalid. The stage itself becomes valid if the
    /// previous stage is valid.
    ///
    /// # Errors
    ///
    /// Returns [`KinError::DimensionMismatch`] (and invalidates the stage)
    /// if the vector has the wrong length, or an error if the topology is
    /// stale.
    pub fn set_vector(
        &mut self,
        model: &mut Model,
        stage: Stage,
        values: &DVector<f64>,
        fixed: bool,
    ) -> Result<()> {
        self.check_epoch(model)?;
        self.invalidate_from(stage);

        let expected = self.vector_len(fixed);
        if values.len() != expected {
            return Err(KinError::DimensionMismatch {
                expected,
                actual: values.len(),
            });
        }

        self.scatter(model, stage, values, fixed)?;
        self.mark_valid(stage);
        Ok(())
    }

    /// Write both the free and the fixed variables of `stage`.
    ///
    /// # Errors
    ///
    /// Same as [`Self::set_vector`].
    pub fn set_vectors(
        &mut self,
        model: &mut Model,
        stage: Stage,
        free: &DVector<f64>,
        fixed: &DVector<f64>,
    ) -> Result<()> {
        self.check_epoch(model)?;
        self.invalidate_from(stage);

        for (values, expected) in [(free, self.free_count), (fixed, self.fixed_count)] {
            if values.len() != expected {
                return Err(KinError::DimensionMismatch {
                    expected,
                    actual: values.len(),
                });
            }
        }

        self.scatter(model, stage, free, false)?;
        self.scatter(model, stage, fixed, true)?;
        self.mark_valid(stage);
        Ok(())
    }

    /// Free position vector, `None` unless positions are valid.
    ///
    /// # Errors
    ///
    /// Returns an error if the topology is stale.
    pub fn get_pos_vector(&self, model: &Model, fixed: bool) -> Result<Option<DVector<f64>>> {
        self.get_vector(model, Stage::Position, fixed)
    }

    /// Write the position vector. See [`Self::set_vector`].
    ///
    /// # Errors
    ///
    /// Same as [`Self::set_vector`].
    pub fn set_pos_vector(
        &mut self,
        model: &mut Model,
        values: &DVector<f64>,
        fixed: bool,
    ) -> Result<()> {
        self.set_vector(model, Stage::Position, values, fixed)
    }

    /// Free speed vector, `None` unless speeds are valid.
    ///
    /// # Errors
    ///
    /// Returns an error if the topology is stale.
    pub fn get_speed_vector(&self, model: &Model, fixed: bool) -> Result<Option<DVector<f64>>> {
        self.get_vector(model, Stage::Speed, fixed)
    }

    /// Write the speed vector. See [`Self::set_vector`].
    ///
    /// # Errors
    ///
    /// Same as [`Self::set_vector`].
    pub fn set_speed_vector(
        &mut self,
        model: &mut Model,
        values: &DVector<f64>,
        fixed: bool,
    ) -> Result<()> {
        self.set_vector(model, Stage::Speed, values, fixed)
    }

    /// Free acceleration vector, `None` unless accelerations are valid.
    ///
    /// # Errors
    ///
    /// Returns an error if the topology is stale.
    pub fn get_accel_vector(&self, model: &Model, fixed: bool) -> Result<Option<DVector<f64>>> {
        self.get_vector(model, Stage::Accel, fixed)
    }

    /// Write the acceleration vector. See [`Self::set_vector`].
    ///
    /// # Errors
    ///
    /// Same as [`Self::set_vector`].
    pub fn set_accel_vector(
        &mut self,
        model: &mut Model,
        values: &DVector<f64>,
        fixed: bool,
    ) -> Result<()> {
        self.set_vector(model, Stage::Accel, values, fixed)
    }

    /// Free jerk vector, `None` unless jerks are valid.
    ///
    /// # Errors
    ///
    /// Returns an error if the topology is stale.
    pub fn get_jerk_vector(&self, model: &Model, fixed: bool) -> Result<Option<DVector<f64>>> {
        self.get_vector(model, Stage::Jerk, fixed)
    }

    /// Write the jerk vector. See [`Self::set_vector`].
    ///
    /// # Errors
    ///
    /// Same as [`Self::set_vector`].
    pub fn set_jerk_vector(
        &mut self,
        model: &mut Model,
        values: &DVector<f64>,
        fixed: bool,
    ) -> Result<()> {
        self.set_vector(model, Stage::Jerk, values, fixed)
    }

    // ==================== Propagation ====================

    /// Recompute body placements (and derivatives up to `stage`) from the
    /// root outward along the tree edges.
    pub(crate) fn propagate(&self, model: &mut Model, stage: Stage) -> Result<()> {
        let order = stage.order();
        for &id in &self.grips {
            let grip = model.grip_ref(id)?;
            if !grip.parent_rel {
                continue;
            }
            let (b1, b2) = (grip.body1(), grip.body2());
            let joint = model.grip_joint(id)?;
            let level1 = model.body_ref(b1)?.tree_level;
            let level2 = model.body_ref(b2)?.tree_level;

            let (child, jet) = if level1 < level2 {
                let parent = model.body_ref(b1)?.jet();
                let rel = joint.jet().after_constant(grip.inv_pos2()).then_constant(grip.pos1());
                (b2, rel.compose(&parent))
            } else {
                let parent = model.body_ref(b2)?.jet();
                let rel = joint
                    .inv_jet()
                    .after_constant(grip.inv_pos1())
                    .then_constant(grip.pos2());
                (b1, rel.compose(&parent))
            };
            model.body_mut_raw(child)?.set_jet(&truncate(jet, order), order);
        }
        model.record(Change::STATE);
        Ok(())
    }

    fn update(&self, model: &mut Model, stage: Stage, action: &'static str) -> Result<()> {
        self.check_epoch(model)?;
        self.require(stage, action)?;
        self.propagate(model, stage)
    }

    /// Recompute body placements from the current joint values.
    ///
    /// # Errors
    ///
    /// Returns an error if positions are not valid or the topology is stale.
    pub fn update_positions(&self, model: &mut Model) -> Result<()> {
        self.update(model, Stage::Position, "position update")
    }

    /// Recompute body placements and speeds.
    ///
    /// # Errors
    ///
    /// Returns an error if speeds are not valid or the topology is stale.
    pub fn update_speeds(&self, model: &mut Model) -> Result<()> {
        self.update(model, Stage::Speed, "speed update")
    }

    /// Recompute body placements, speeds and accelerations.
    ///
    /// # Errors
    ///
    /// Returns an error if accelerations are not valid or the topology is
    /// stale.
    pub fn update_accels(&self, model: &mut Model) -> Result<()> {
        self.update(model, Stage::Accel, "accel update")
    }

    /// Recompute body placements and all three derivatives.
    ///
    /// # Errors
    ///
    /// Returns an error if jerks are not valid or the topology is stale.
    pub fn update_jerks(&self, model: &mut Model) -> Result<()> {
        self.update(model, Stage::Jerk, "jerk update")
    }

    /// Right-multiply every body of this topology except the root by `trf`.
    ///
    /// # Errors
    ///
    /// Returns an error if a body no longer exists.
    pub fn transform(&self, model: &mut Model, trf: &Trf) -> Result<()> {
        for &id in self.bodies.iter().skip(1) {
            model.body_mut_raw(id)?.transform(trf);
        }
        model.record(Change::STATE);
        Ok(())
    }
}

/// Zero the components of a jet above `order`.
fn truncate(mut jet: TrfJet, order: usize) -> TrfJet {
    if order < 3 {
        jet.der3 = Trf::zeros();
    }
    if order < 2 {
        jet.der2 = Trf::zeros();
    }
    if order < 1 {
        jet.der1 = Trf::zeros();
    }
    jet
}
