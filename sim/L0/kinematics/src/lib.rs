//! Closed-loop kinematics for mechanisms of rigid bodies and joints.
//!
//! A mechanism is a graph: **bodies** are nodes, **grips** are edges. Each
//! grip carries a constant offset frame on both of its bodies and a
//! parametric **joint** between those frames. Open chains are placed by
//! walking the graph from a root body; closed chains (four-bars, parallel
//! linkages, wheels on a track) additionally have to satisfy loop closure.
//!
//! # Pipeline
//!
//! ```text
//!   Model ── build_topologies ──► Topology (per connected component)
//!                                    │
//!          spanning tree + loops ◄───┤ builder
//!   loop order + variable indices ◄──┤ Cuthill-McKee reduction
//!                                    │
//!   solve_pos ──► solve_speed ──► solve_accel ──► solve_jerk
//! ```
//!
//! ## Joint Algebra
//!
//! A joint is a product of elementary factors, each driven by one variable:
//!
//! ```text
//! J = T(n-1) · … · T(1) · T(0)
//! ```
//!
//! Every joint exposes the composed transform, its inverse, the first three
//! time derivatives of both, and the partial derivative with respect to each
//! variable. Derivatives are cached and invalidated on writes.
//!
//! ## Loop Closure
//!
//! Walking a loop from its first body, the product of offset frames and
//! joint transforms must return the identity. Six entries of that product
//! (three rotational, three translational) form the residual. Positions are
//! solved by damped Gauss-Newton on banded normal equations; the bandwidth
//! is kept small by ordering the loops with Cuthill-McKee. The rate solves
//! are linear and reuse the same Jacobian.
//!
//! ## Validity
//!
//! Each topology tracks whether its position, speed, acceleration and jerk
//! state is consistent. A stage can only be valid when the previous one is,
//! and a successful solve of one stage invalidates all later stages.
//!
//! ## Couplings and Snapshots
//!
//! A [`JointFunction`] drives one joint variable from another through a
//! [`TableFunction`]; the solves apply it before each stage. A
//! [`TopologyState`] captures the vectors of every valid stage and restores
//! them later; a [`StateSequence`] keeps a named series of them.
//!
//! # Quick Start
//!
//! ```
//! use sim_kinematics::{
//!     Axis, Body, Grip, Joint, JointKind, Model, SolverConfig, axis_rotation, translation,
//! };
//!
//! // A link hinged to the ground at the origin and again one unit along X.
//! let mut model = Model::new("double hinge");
//! let ground = model.add_body(Body::new("ground"));
//! let link = model.add_body(Body::new("link"));
//! let a = model.add_joint(Joint::new("a", JointKind::Revolute));
//! let b = model.add_joint(Joint::new("b", JointKind::Revolute));
//! model.add_grip(Grip::new("a", ground, link).with_joint(a)).unwrap();
//! model
//!     .add_grip(Grip::new("b", ground, link).with_joint(b).with_offsets(
//!         translation(-1.0, 0.0, 0.0),
//!         axis_rotation(Axis::Z, 0.4, 0) * translation(-1.0, 0.0, 0.0),
//!     ))
//!     .unwrap();
//! model.set_joint_fixed(a, 0, true).unwrap();
//!
//! let mut topology = model.build_topologies().unwrap().remove(0);
//! model.set_joint_value(b, 0, 0.9).unwrap();
//!
//! let result = topology.solve_pos(&mut model, &SolverConfig::default()).unwrap();
//! assert!(result.converged);
//! assert!((model.joint(b).unwrap().value(0).unwrap() - 0.4).abs() < 1e-9);
//! ```
//!
//! # Layer 0 Crate
//!
//! This is a Layer 0 crate with **zero Bevy dependencies**. It can be used in:
//!
//! - Mechanism design and analysis tools
//! - Motion planning for linkages and track vehicles
//! - Headless simulation and test harnesses

#![doc(html_root_url = "https://docs.rs/sim-kinematics/0.7.0")]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![warn(missing_docs)]
#![allow(
    clippy::missing_const_for_fn,
    clippy::module_name_repetitions,
    clippy::doc_markdown,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::similar_names,
    clippy::too_many_lines,
    clippy::suboptimal_flops,
    clippy::cast_precision_loss,
    clippy::many_single_char_names
)]
#![cfg_attr(test, allow(clippy::float_cmp, clippy::let_underscore_must_use))]

pub mod body;
pub mod config;
pub mod error;
pub mod function;
pub mod grip;
pub mod ids;
pub mod joint;
pub mod linalg;
pub mod model;
pub mod topology;
pub mod track;
pub mod transform;

// Re-export main types at crate root
pub use body::Body;
pub use config::{DEFAULT_MAX_ANGULAR_STEP, SolverConfig};
pub use error::{KinError, Result};
pub use function::{JointFunction, LinearTable, TableFunction, VarRef};
pub use grip::Grip;
pub use ids::{BodyId, GripId, JointId};
pub use joint::{Joint, JointKind, Stage, TrackFollower, VarIndex};
pub use linalg::BandMatrix;
pub use model::{Change, Model};
pub use topology::{
    Loop, NormalSystem, PosSolveResult, StageVectors, StateSequence, Topology, TopologyState,
};
pub use track::{CircleTrack, Track};
pub use transform::{Axis, Trf, TrfJet, axis_rotation, translation};
