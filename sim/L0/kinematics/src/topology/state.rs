//! Snapshots of a topology's solved state.
//!
//! A [`TopologyState`] holds the free and fixed vectors of every valid stage.
//! It is tied to the structure epoch it was captured at and can only be
//! restored into a topology built at that epoch.

use nalgebra::DVector;
use tracing::debug;

use super::Topology;
use crate::joint::{Joint, Stage, VarIndex};
use crate::model::Model;
use crate::{KinError, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Free and fixed variables of one stage.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StageVectors {
    /// Free variables by dense index.
    pub free: DVector<f64>,
    /// Fixed variables by dense index.
    pub fixed: DVector<f64>,
}

/// Captured state of a topology, up to its last valid stage.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TopologyState {
    epoch: u64,
    stages: Vec<StageVectors>,
}

impl TopologyState {
    /// Structure epoch of the topology the state came from.
    #[must_use]
    pub const fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Vectors of `stage`, if it was valid at capture time.
    #[must_use]
    pub fn stage(&self, stage: Stage) -> Option<&StageVectors> {
        self.stages.get(stage.order())
    }

    /// Last captured stage.
    #[must_use]
    pub fn last_stage(&self) -> Option<Stage> {
        self.stages.len().checked_sub(1).and_then(|i| Stage::ALL.get(i).copied())
    }

    /// Captured rate of `stage` for variable `var` of `joint`, looked up by
    /// the joint's dense index.
    #[must_use]
    pub fn rate(&self, stage: Stage, joint: &Joint, var: usize) -> Option<f64> {
        let vectors = self.stage(stage)?;
        match joint.var_index(var)? {
            VarIndex::Free(i) => vectors.free.get(i).copied(),
            VarIndex::Fixed(i) => vectors.fixed.get(i).copied(),
            VarIndex::Unassigned => None,
        }
    }
}

impl Topology {
    /// Capture the vectors of every valid stage.
    ///
    /// # Errors
    ///
    /// Returns an error if the topology is stale or a joint is missing.
    pub fn capture(&self, model: &Model) -> Result<TopologyState> {
        self.check_epoch(model)?;
        let mut stages = Vec::new();
        for stage in Stage::ALL.into_iter().take_while(|&s| self.is_valid(s)) {
            stages.push(StageVectors {
                free: self.gather(model, stage, false)?,
                fixed: self.gather(model, stage, true)?,
            });
        }
        Ok(TopologyState {
            epoch: self.epoch,
            stages,
        })
    }

    /// Write a captured state back stage by stage and place the bodies.
    ///
    /// Stages the state does not hold become invalid.
    ///
    /// # Errors
    ///
    /// Returns [`KinError::StaleTopology`] if the state was captured at a
    /// different structure epoch or the topology is stale, and
    /// [`KinError::DimensionMismatch`] if a vector has the wrong length.
    pub fn restore(&mut self, model: &mut Model, state: &TopologyState) -> Result<()> {
        self.check_epoch(model)?;
        if state.epoch != self.epoch {
            return Err(KinError::StaleTopology {
                built: state.epoch,
                current: self.epoch,
            });
        }

        self.invalidate_from(Stage::Position);
        for (stage, vectors) in Stage::ALL.into_iter().zip(&state.stages) {
            self.set_vectors(model, stage, &vectors.free, &vectors.fixed)?;
        }
        if let Some(last) = state.last_stage() {
            self.propagate(model, last)?;
        }
        debug!(stages = state.stages.len(), "topology state restored");
        Ok(())
    }
}

/// A named series of captured states, e.g. the frames of a motion.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StateSequence {
    name: String,
    states: Vec<TopologyState>,
}

impl StateSequence {
    /// Create an empty sequence.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            states: Vec::new(),
        }
    }

    /// Sequence name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Capture the topology's current state and append it. Returns its
    /// index.
    ///
    /// # Errors
    ///
    /// Same as [`Topology::capture`].
    pub fn record(&mut self, topology: &Topology, model: &Model) -> Result<usize> {
        self.states.push(topology.capture(model)?);
        Ok(self.states.len() - 1)
    }

    /// Append an already captured state.
    pub fn push(&mut self, state: TopologyState) {
        self.states.push(state);
    }

    /// State at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&TopologyState> {
        self.states.get(index)
    }

    /// Number of states.
    #[must_use]
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Whether no state was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// States in recording order.
    pub fn iter(&self) -> impl Iterator<Item = &TopologyState> {
        self.states.iter()
    }

    /// Restore the state at `index` into `topology`.
    ///
    /// # Errors
    ///
    /// Returns [`KinError::InvalidConfig`] for an index past the end, or the
    /// errors of [`Topology::restore`].
    pub fn restore(&self, index: usize, topology: &mut Topology, model: &mut Model) -> Result<()> {
        let state = self.states.get(index).ok_or_else(|| {
            KinError::invalid_config(format!("sequence {} has no state {index}", self.name))
        })?;
        topology.restore(model, state)
    }
}
