//! Loop ordering and variable indexing for a narrow normal matrix.
//!
//! Loops sharing a grip are peers. Visiting the peer graph breadth first
//! from a loop of minimum degree (Cuthill-McKee) keeps coupled loops close
//! together, and numbering free variables in that order keeps the nonzero
//! entries of `JᵀJ` near the diagonal.

use hashbrown::HashMap;
use tracing::trace;

use super::{Loop, Topology};
use crate::Result;
use crate::ids::{GripId, JointId};
use crate::joint::VarIndex;
use crate::model::Model;

/// For every loop, the indices of the other loops sharing at least one grip,
/// sorted by `(degree, index)`.
pub(crate) fn peer_sets(loops: &[Loop]) -> Vec<Vec<usize>> {
    let mut sharing: HashMap<GripId, Vec<usize>> = HashMap::new();
    for (i, lp) in loops.iter().enumerate() {
        for &grip in &lp.grips {
            sharing.entry(grip).or_default().push(i);
        }
    }

    let mut peers = vec![Vec::new(); loops.len()];
    for owners in sharing.values().filter(|owners| owners.len() > 1) {
        for &i in owners {
            peers[i].extend(owners.iter().copied().filter(|&j| j != i));
        }
    }
    for list in &mut peers {
        list.sort_unstable();
        list.dedup();
    }

    let degree: Vec<usize> = peers.iter().map(Vec::len).collect();
    for list in &mut peers {
        list.sort_by_key(|&j| (degree[j], j));
    }
    peers
}

/// Breadth-first visit order of the peer graph with the level of each
/// visited loop. Every component is started from its unvisited loop of
/// smallest degree.
pub(crate) fn cuthill_mckee(peers: &[Vec<usize>]) -> Vec<(usize, usize)> {
    let n = peers.len();
    let mut seen = vec![false; n];
    let mut level = vec![0; n];
    let mut order = Vec::with_capacity(n);

    while order.len() < n {
        let Some(start) = (0..n).filter(|&i| !seen[i]).min_by_key(|&i| peers[i].len()) else {
            break;
        };
        seen[start] = true;
        order.push(start);

        let mut head = order.len() - 1;
        while head < order.len() {
            let current = order[head];
            for &peer in &peers[current] {
                if !seen[peer] {
                    seen[peer] = true;
                    level[peer] = level[current] + 1;
                    order.push(peer);
                }
            }
            head += 1;
        }
    }

    order.into_iter().map(|i| (i, level[i])).collect()
}

/// Half bandwidth of `JᵀJ` given each free variable's row interval `[lwb, upb)`.
///
/// Two variables couple when their intervals overlap. For each variable only
/// partners further away than the current bandwidth are checked.
pub(crate) fn half_band_width(intervals: &[(usize, usize)]) -> usize {
    let overlap = |a: (usize, usize), b: (usize, usize)| a.0 < b.1 && b.0 < a.1;

    let mut bw = 0;
    for (i, &a) in intervals.iter().enumerate() {
        for (j, &b) in intervals.iter().enumerate().take(i.saturating_sub(bw)) {
            if overlap(a, b) {
                bw = i - j;
                break;
            }
        }
    }
    bw
}

/// Counts produced by [`assign_indices`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Indexing {
    pub free: usize,
    pub fixed: usize,
    /// Per free variable, whether it is an angle.
    pub angular: Vec<bool>,
}

/// Reorder `loops`, assign variable indices and size the normal matrix.
pub(crate) fn reduce(model: &mut Model, topology: &mut Topology, loops: Vec<Loop>) -> Result<()> {
    let ordered = order_loops(loops);
    let indexing = assign_indices(model, &topology.joints, &ordered)?;
    let intervals = row_intervals(model, &ordered, indexing.free)?;

    let bw = half_band_width(&intervals);
    trace!(
        loops = ordered.len(),
        free = indexing.free,
        fixed = indexing.fixed,
        half_band_width = bw,
        "variables indexed"
    );

    topology.row_count = 6 * ordered.len();
    topology.loops = ordered;
    topology.free_count = indexing.free;
    topology.fixed_count = indexing.fixed;
    topology.angular = indexing.angular;
    topology.band_width = bw + 1;
    Ok(())
}

/// Loops in Cuthill-McKee order with levels and peers filled in.
fn order_loops(loops: Vec<Loop>) -> Vec<Loop> {
    let peers = peer_sets(&loops);
    let visit = cuthill_mckee(&peers);

    let mut position = vec![0; loops.len()];
    for (new, &(old, _)) in visit.iter().enumerate() {
        position[old] = new;
    }

    let mut slots: Vec<Option<Loop>> = loops.into_iter().map(Some).collect();
    let mut ordered = Vec::with_capacity(slots.len());
    for &(old, level) in &visit {
        if let Some(mut lp) = slots[old].take() {
            lp.level = level;
            lp.peers = peers[old].iter().map(|&p| position[p]).collect();
            lp.peers.sort_unstable();
            ordered.push(lp);
        }
    }
    ordered
}

/// Number the variables of `joints` in the order they first appear in
/// `ordered`. Free and fixed variables are counted separately.
pub(crate) fn assign_indices(
    model: &mut Model,
    joints: &[JointId],
    ordered: &[Loop],
) -> Result<Indexing> {
    for &id in joints {
        model.joint_mut_raw(id)?.clear_var_indices();
    }

    let mut indexing = Indexing::default();
    for lp in ordered {
        for &id in &lp.joints {
            let joint = model.joint_mut_raw(id)?;
            for var in 0..joint.var_count() {
                if joint.var_index(var) != Some(VarIndex::Unassigned) {
                    continue;
                }
                if joint.is_fixed(var) == Some(true) {
                    joint.set_var_index(var, VarIndex::Fixed(indexing.fixed));
                    indexing.fixed += 1;
                } else {
                    joint.set_var_index(var, VarIndex::Free(indexing.free));
                    indexing.angular.push(joint.is_angular(var) == Some(true));
                    indexing.free += 1;
                }
            }
        }
    }
    Ok(indexing)
}

/// Row interval `[lwb, upb)` of each free variable: from the first to the
/// last loop of `ordered` it appears in, six rows per loop.
pub(crate) fn row_intervals(
    model: &Model,
    ordered: &[Loop],
    free: usize,
) -> Result<Vec<(usize, usize)>> {
    let mut intervals = vec![(usize::MAX, 0); free];
    for (r, lp) in ordered.iter().enumerate() {
        let row = 6 * r;
        for &id in &lp.joints {
            let joint = model.joint_ref(id)?;
            for var in 0..joint.var_count() {
                if let Some(VarIndex::Free(i)) = joint.var_index(var) {
                    if let Some(span) = intervals.get_mut(i) {
                        span.0 = span.0.min(row);
                        span.1 = row + 6;
                    }
                }
            }
        }
    }
    Ok(intervals)
}
