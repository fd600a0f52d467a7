//! Loop-closure solves.
//!
//! Every loop contributes six residual rows: the closure product `L` of its
//! grips must be the identity. Positions are found by a damped Gauss-Newton
//! iteration on the banded normal equations `JᵀJ·Δ = -Jᵀr`. Speeds,
//! accelerations and jerks are linear in the free rates of their order, so
//! each is one solve of the same normal matrix.

use nalgebra::{DVector, Vector6};
use tracing::{debug, trace, warn};

use super::{Loop, NormalSystem, Topology};
use crate::config::SolverConfig;
use crate::function::JointFunction;
use crate::ids::JointId;
use crate::joint::{Stage, VarIndex};
use crate::linalg::BandMatrix;
use crate::model::Model;
use crate::transform::{self, Trf, TrfJet};
use crate::{KinError, Result};

/// Diagonal regularization of the rate solves.
const RATE_REGULARIZATION: f64 = 1e-14;

/// Outcome of [`Topology::solve_pos`].
#[derive(Debug, Clone, PartialEq)]
pub struct PosSolveResult {
    /// Whether both closure errors dropped below tolerance.
    pub converged: bool,
    /// Newton steps taken.
    pub iterations: usize,
    /// Free variable values after the last step.
    pub free_vars: DVector<f64>,
    /// Largest rotational closure error over all loops.
    pub max_rot: f64,
    /// Largest translational closure error over all loops.
    pub max_dist: f64,
}

/// Residual column of one free variable.
struct Column {
    index: usize,
    joint: JointId,
    var: usize,
    value: Vector6<f64>,
}

/// Closure product of one loop with its Jacobian columns.
struct Closure {
    jet: TrfJet,
    columns: Vec<Column>,
}

/// One grip of a loop as seen from the traversal direction.
struct Segment {
    joint: JointId,
    at_body1: bool,
    before: Trf,
    after: Trf,
    full: TrfJet,
}

fn evaluate(model: &Model, lp: &Loop) -> Result<Closure> {
    let mut segments = Vec::with_capacity(lp.len());
    let steps = lp.grips.iter().zip(&lp.joints).zip(&lp.enters_body1);
    for ((&grip_id, &joint_id), &at_body1) in steps {
        let grip = model.grip_ref(grip_id)?;
        let joint = model.joint_ref(joint_id)?;
        let (before, jet, after) = if at_body1 {
            (*grip.inv_pos1(), joint.inv_jet(), *grip.pos2())
        } else {
            (*grip.inv_pos2(), joint.jet(), *grip.pos1())
        };
        segments.push(Segment {
            joint: joint_id,
            at_body1,
            before,
            after,
            full: jet.after_constant(&before).then_constant(&after),
        });
    }

    // suffix[i] = full[i] · … · full[n-1]
    let mut suffix = vec![Trf::identity(); segments.len() + 1];
    for (i, seg) in segments.iter().enumerate().rev() {
        suffix[i] = seg.full.pos * suffix[i + 1];
    }

    let mut prefix = TrfJet::identity();
    let mut columns = Vec::new();
    for (i, seg) in segments.iter().enumerate() {
        let pre = prefix.pos * seg.before;
        let post = seg.after * suffix[i + 1];
        let joint = model.joint_ref(seg.joint)?;

        for var in 0..joint.var_count() {
            let Some(VarIndex::Free(index)) = joint.var_index(var) else {
                continue;
            };
            let partial = if seg.at_body1 {
                joint.inv_derivative(var)
            } else {
                joint.derivative(var)
            };
            if let Some(d) = partial {
                columns.push(Column {
                    index,
                    joint: seg.joint,
                    var,
                    value: transform::residual(&(pre * d * post)),
                });
            }
        }
        prefix = prefix.compose(&seg.full);
    }

    Ok(Closure {
        jet: prefix,
        columns,
    })
}

fn max_error(closures: &[Closure]) -> (f64, f64) {
    closures.iter().fold((0.0_f64, 0.0_f64), |(rot, dist), c| {
        let (r, d) = transform::closure_error(&c.jet.pos);
        (rot.max(r), dist.max(d))
    })
}

impl Topology {
    fn closures(&self, model: &Model) -> Result<Vec<Closure>> {
        self.loops.iter().map(|lp| evaluate(model, lp)).collect()
    }

    /// Normal equations `(JᵀJ + λI)·x = -Jᵀb` for per-loop right-hand sides `b`.
    fn assemble(
        &self,
        closures: &[Closure],
        residuals: &[Vector6<f64>],
        regularization: f64,
    ) -> Result<NormalSystem> {
        let n = self.free_count;
        let mut matrix = BandMatrix::new(n, self.band_width);
        let mut rhs = DVector::zeros(n);
        for i in 0..n {
            let _ = matrix.add(i, 0, regularization);
        }

        for (closure, r) in closures.iter().zip(residuals) {
            for a in &closure.columns {
                rhs[a.index] -= a.value.dot(r);
                for b in &closure.columns {
                    if b.index < a.index {
                        continue;
                    }
                    if !matrix.add(a.index, b.index - a.index, a.value.dot(&b.value)) {
                        return Err(KinError::malformed_loop(format!(
                            "variables {} and {} couple outside the band",
                            a.index, b.index
                        )));
                    }
                }
            }
        }
        Ok(NormalSystem { matrix, rhs })
    }

    /// Scale `delta` so no angular component exceeds `max_step`.
    fn clamp_step(&self, delta: &mut DVector<f64>, max_step: f64) {
        let largest = delta
            .iter()
            .zip(&self.angular)
            .filter(|&(_, &angular)| angular)
            .fold(0.0_f64, |m, (d, _)| m.max(d.abs()));
        if largest > max_step {
            *delta *= max_step / largest;
        }
    }

    /// Solve the loop-closure equations for the free joint values.
    ///
    /// Table couplings driving joints of this topology are applied first.
    /// Starts from the current joint values. Each step solves the banded
    /// normal equations, limits the largest angular correction to
    /// [`SolverConfig::max_angular_step`] and updates the free variables.
    /// Convergence is checked after at least one step, so an already closed
    /// mechanism reports one iteration.
    ///
    /// On convergence positions become valid, the bodies are placed along
    /// the spanning tree and the last assembled system is kept for
    /// [`Topology::pos_system`]. On failure positions stay invalid; the
    /// joints keep the last iterate. A topology without free variables only
    /// checks closure.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the topology is
    /// stale, or the normal matrix is singular.
    pub fn solve_pos(
        &mut self,
        model: &mut Model,
        config: &SolverConfig,
    ) -> Result<PosSolveResult> {
        config.validate()?;
        self.check_epoch(model)?;
        self.invalidate_from(Stage::Position);
        self.apply_functions(model, Stage::Position)?;

        if self.free_count == 0 {
            let (max_rot, max_dist) = max_error(&self.closures(model)?);
            let converged = max_rot <= config.rot_tolerance && max_dist <= config.pos_tolerance;
            if converged {
                self.mark_valid(Stage::Position);
                self.propagate(model, Stage::Position)?;
            } else {
                warn!(max_rot, max_dist, "fixed loops do not close");
            }
            return Ok(PosSolveResult {
                converged,
                iterations: 0,
                free_vars: DVector::zeros(0),
                max_rot,
                max_dist,
            });
        }

        let mut iterations = 0;
        let mut last_system = None;
        let (converged, max_rot, max_dist) = loop {
            let closures = self.closures(model)?;
            let (max_rot, max_dist) = max_error(&closures);
            trace!(iteration = iterations, max_rot, max_dist, "closure error");

            let closed = max_rot <= config.rot_tolerance && max_dist <= config.pos_tolerance;
            if iterations > 0 && closed {
                break (true, max_rot, max_dist);
            }
            let diverged = !max_rot.is_finite() || !max_dist.is_finite();
            if iterations >= config.max_iterations || diverged {
                break (false, max_rot, max_dist);
            }

            let residuals: Vec<Vector6<f64>> =
                closures.iter().map(|c| transform::residual(&c.jet.pos)).collect();
            let system = self.assemble(&closures, &residuals, config.regularization)?;

            let mut delta = system.rhs.clone();
            system.matrix.clone().solve_ldlt(&mut delta)?;
            self.clamp_step(&mut delta, config.max_angular_step);

            let values = self.gather(model, Stage::Position, false)? + delta;
            self.scatter(model, Stage::Position, &values, false)?;
            last_system = Some(system);
            iterations += 1;
        };

        let free_vars = self.gather(model, Stage::Position, false)?;
        if converged {
            self.pos_system = last_system;
            self.mark_valid(Stage::Position);
            self.propagate(model, Stage::Position)?;
            debug!(iterations, max_rot, max_dist, "position solve converged");
        } else {
            warn!(
                iterations,
                max_rot,
                max_dist,
                loops = self.loops.len(),
                "position solve did not converge"
            );
        }

        Ok(PosSolveResult {
            converged,
            iterations,
            free_vars,
            max_rot,
            max_dist,
        })
    }

    /// Solve the free speeds from the fixed speeds, after applying the
    /// table couplings.
    ///
    /// # Errors
    ///
    /// Returns [`KinError::InvalidState`] unless positions are valid, or an
    /// error if the topology is stale or the normal matrix is singular.
    pub fn solve_speed(&mut self, model: &mut Model) -> Result<DVector<f64>> {
        self.solve_rate(model, Stage::Speed, "speed solve")
    }

    /// Solve the free accelerations from the fixed accelerations.
    ///
    /// # Errors
    ///
    /// Returns [`KinError::InvalidState`] unless speeds are valid, or an
    /// error if the topology is stale or the normal matrix is singular.
    pub fn solve_accel(&mut self, model: &mut Model) -> Result<DVector<f64>> {
        self.solve_rate(model, Stage::Accel, "accel solve")
    }

    /// Solve the free jerks from the fixed jerks.
    ///
    /// # Errors
    ///
    /// Returns [`KinError::InvalidState`] unless accelerations are valid, or
    /// an error if the topology is stale or the normal matrix is singular.
    pub fn solve_jerk(&mut self, model: &mut Model) -> Result<DVector<f64>> {
        self.solve_rate(model, Stage::Jerk, "jerk solve")
    }

    /// Apply the model's table couplings that drive a joint of this
    /// topology, in the order they were added.
    fn apply_functions(&self, model: &mut Model, stage: Stage) -> Result<()> {
        let driven: Vec<JointFunction> = model
            .functions()
            .iter()
            .filter(|function| self.joints.contains(&function.output().joint))
            .cloned()
            .collect();
        for function in &driven {
            function.apply(model, stage)?;
        }
        if !driven.is_empty() {
            trace!(stage = stage.name(), count = driven.len(), "functions applied");
        }
        Ok(())
    }

    /// The k-th time derivative of a closure is linear in the k-th rates of
    /// the free variables with the position Jacobian as coefficients:
    /// `L⁽ᵏ⁾ = J·x + b`, where `b` collects everything else.
    fn solve_rate(
        &mut self,
        model: &mut Model,
        stage: Stage,
        action: &'static str,
    ) -> Result<DVector<f64>> {
        self.check_epoch(model)?;
        if let Some(previous) = stage.previous() {
            self.require(previous, action)?;
        }
        self.invalidate_from(stage);
        self.apply_functions(model, stage)?;

        if self.free_count == 0 {
            self.mark_valid(stage);
            self.propagate(model, stage)?;
            return Ok(DVector::zeros(0));
        }

        let order = stage.order();
        let closures = self.closures(model)?;
        let mut residuals = Vec::with_capacity(closures.len());
        for closure in &closures {
            let mut b = transform::residual(&closure.jet.order(order));
            for col in &closure.columns {
                let current = model.joint_ref(col.joint)?.rate(stage, col.var).unwrap_or(0.0);
                b -= col.value * current;
            }
            residuals.push(b);
        }

        let system = self.assemble(&closures, &residuals, RATE_REGULARIZATION)?;
        let mut x = system.rhs.clone();
        system.matrix.clone().solve_ldlt(&mut x)?;

        self.scatter(model, stage, &x, false)?;
        if stage == Stage::Speed {
            self.speed_system = Some(system);
        }
        self.mark_valid(stage);
        self.propagate(model, stage)?;
        trace!(stage = stage.name(), free = x.len(), "rate solve done");
        Ok(x)
    }
}
