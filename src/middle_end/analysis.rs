//! Static analysis of lir programs.
//!
//! The framework here is instruction-granular: every instruction and every
//! terminal gets its own incoming and outgoing abstract state, and a worklist
//! re-processes instructions until no outgoing state changes (chaotic
//! iteration).  Concrete analyses plug in an abstract value and a transfer
//! function through [AbstractValue] and [Analysis].

use std::fmt;

use derive_more::Display;
use log::{debug, trace};

use super::lir::*;
use crate::config::ConfigError;

pub mod div_zero;
pub mod points_to;

#[cfg(test)]
mod tests;

/// Instruction IDs: this is just a combination of the basic block ID and the
/// index of the instruction in the block.  The index `insts.len()` names the
/// block's terminal.
pub type InstId = (BbId, usize);

/// Renders an instruction ID as `bb.n`.
pub fn inst_label((bb, n): &InstId) -> String {
    format!("{bb}.{n}")
}

/// All instruction IDs of a function, block by block.
pub fn inst_ids(f: &Function) -> Vec<InstId> {
    f.body
        .iter()
        .flat_map(|(id, bb)| (0..=bb.insts.len()).map(move |n| (id.clone(), n)))
        .collect()
}

/// The control-flow graph *for a function*.  Edges are between basic blocks;
/// [Cfg::predecessors] and [Cfg::successors] lift them to instructions.
#[derive(Clone, Debug)]
pub struct Cfg {
    pub entry: BbId,
    succ_edges: Map<BbId, Set<BbId>>,
    pred_edges: Map<BbId, Set<BbId>>,
}

impl Cfg {
    // construct a Cfg from the given function's basic blocks.
    pub fn new(function: &Function) -> Self {
        debug!("building cfg for `{}`", function.id);

        let mut succ_edges: Map<BbId, Set<BbId>> = Map::new();
        let mut pred_edges: Map<BbId, Set<BbId>> = Map::new();

        for (bbid, bb) in &function.body {
            succ_edges.entry(bbid.clone()).or_default();
            pred_edges.entry(bbid.clone()).or_default();

            for next in bb.term.targets() {
                succ_edges
                    .entry(bbid.clone())
                    .or_default()
                    .insert(next.clone());
                pred_edges
                    .entry(next.clone())
                    .or_default()
                    .insert(bbid.clone());
            }
        }

        Cfg {
            entry: bb_id("entry"),
            succ_edges,
            pred_edges,
        }
    }

    // an iterator over the successor edges of bb.
    pub fn succ(&self, bb: &BbId) -> impl Iterator<Item = &BbId> {
        self.succ_edges.get(bb).into_iter().flatten()
    }

    // an iterator over the predecessor edges of bb.
    pub fn pred(&self, bb: &BbId) -> impl Iterator<Item = &BbId> {
        self.pred_edges.get(bb).into_iter().flatten()
    }

    /// The instructions control may come from: the previous instruction in the
    /// block, or the terminal of every predecessor block if `inst` is the
    /// first one.
    pub fn predecessors(&self, f: &Function, (bb, n): &InstId) -> Vec<InstId> {
        if *n > 0 {
            return vec![(bb.clone(), n - 1)];
        }

        self.pred(bb)
            .filter_map(|pred| f.body.get(pred))
            .map(|pred| (pred.id.clone(), pred.insts.len()))
            .collect()
    }

    /// The instructions control may go to: the next instruction in the block,
    /// or the first instruction of every successor block if `inst` is the
    /// terminal.
    pub fn successors(&self, f: &Function, (bb, n): &InstId) -> Vec<InstId> {
        match f.body.get(bb) {
            Some(block) if *n < block.insts.len() => vec![(bb.clone(), n + 1)],
            Some(_) => self.succ(bb).map(|succ| (succ.clone(), 0)).collect(),
            None => vec![],
        }
    }
}

/// An abstract value from an abstract lattice.
///
/// Any abstract domain for a variable implements this.
pub trait AbstractValue: Clone + fmt::Display + Eq + PartialEq {
    /// The concrete values we're abstracting.
    type Concrete;

    /// The bottom value of the join semi-lattice.
    const BOTTOM: Self;

    /// The abstraction of a concrete value.
    fn alpha(val: Self::Concrete) -> Self;

    /// The join of two abstract values.
    fn join(&self, rhs: &Self) -> Self;
}

/// An abstract environment built as a pointwise extension of the abstract
/// domain `A`.  It is a map from variables to abstract values; a variable
/// missing from the map is bottom, for both [PointwiseEnv::join] and
/// [PointwiseEnv::equal].
#[derive(Clone, Debug)]
pub struct PointwiseEnv<A: AbstractValue> {
    pub values: Map<VarId, A>,
}

impl<A: AbstractValue> Default for PointwiseEnv<A> {
    fn default() -> Self {
        Self::new(Map::new())
    }
}

impl<A: AbstractValue> PointwiseEnv<A> {
    pub fn new(values: Map<VarId, A>) -> Self {
        Self { values }
    }

    // get the value of a variable, or bottom if it isn't present.
    pub fn get(&self, key: &VarId) -> A {
        self.values.get(key).unwrap_or(&A::BOTTOM).clone()
    }

    // whether the variable has a binding, even a bottom one.
    pub fn tracks(&self, key: &VarId) -> bool {
        self.values.contains_key(key)
    }

    // insert a value for a variable.
    pub fn insert(&mut self, key: &VarId, val: &A) {
        self.values.insert(key.clone(), val.clone());
    }

    // get a mutable reference to the value of a variable, which will be inserted
    // with value bottom if not already present.
    pub fn get_mut(&mut self, key: &VarId) -> &mut A {
        self.values.entry(key.clone()).or_insert(A::BOTTOM)
    }

    /// Pointwise join.  Keys present on one side only are carried over.
    pub fn join(&self, rhs: &Self) -> Self {
        let mut joined = self.clone();
        for (var, rhs_val) in &rhs.values {
            let val = joined.get_mut(var);
            *val = val.join(rhs_val);
        }
        joined
    }

    /// Pointwise equality, where a missing key equals a bottom binding.
    pub fn equal(&self, rhs: &Self) -> bool {
        let agree = |lhs: &Self, rhs: &Self| {
            lhs.values
                .iter()
                .all(|(var, val)| *val == rhs.get(var))
        };
        agree(self, rhs) && agree(rhs, self)
    }
}

impl<A: AbstractValue> PartialEq for PointwiseEnv<A> {
    fn eq(&self, other: &Self) -> bool {
        self.equal(other)
    }
}

impl<A: AbstractValue> Eq for PointwiseEnv<A> {}

impl<A: AbstractValue> fmt::Display for PointwiseEnv<A> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let str = self.values.iter().fold("".to_string(), |acc, (var, val)| {
            if *val == A::BOTTOM {
                acc
            } else {
                format!("{acc}{var} -> {val}\n")
            }
        });
        write!(f, "{str}")
    }
}

/// A dataflow analysis: an abstract value and a transfer function over it.
pub trait Analysis {
    type Value: AbstractValue;

    // Transfer function.  `post` starts as a copy of `pre`; the function only
    // writes the bindings the instruction changes.
    fn transfer(
        &self,
        inst: Inst<'_>,
        pre: &PointwiseEnv<Self::Value>,
        post: &mut PointwiseEnv<Self::Value>,
    );
}

// SECTION: chaotic iteration

/// A set of pending instructions that remembers insertion order.  `pop` takes
/// the most recently inserted one.
#[derive(Clone, Debug, Default)]
pub struct WorkSet {
    order: Vec<InstId>,
    members: Set<InstId>,
}

impl WorkSet {
    // returns false if `id` was already pending.
    pub fn insert(&mut self, id: InstId) -> bool {
        if self.members.insert(id.clone()) {
            self.order.push(id);
            true
        } else {
            false
        }
    }

    pub fn pop(&mut self) -> Option<InstId> {
        let id = self.order.pop()?;
        self.members.remove(&id);
        Some(id)
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }
}

impl FromIterator<InstId> for WorkSet {
    fn from_iter<I: IntoIterator<Item = InstId>>(iter: I) -> Self {
        let mut set = WorkSet::default();
        for id in iter {
            set.insert(id);
        }
        set
    }
}

/// The per-instruction states of one converged run.
#[derive(Clone, Debug)]
pub struct Solution<A: AbstractValue> {
    pub in_map: Map<InstId, PointwiseEnv<A>>,
    pub out_map: Map<InstId, PointwiseEnv<A>>,
    // how many instructions were popped off the work set.
    pub pops: usize,
}

#[derive(Clone, Debug, Display, PartialEq, Eq)]
pub enum AnalysisError {
    #[display(fmt = "no function named `{}`", _0)]
    UnknownFunction(FuncId),
    #[display(fmt = "no fixpoint for `{}` within {} iterations", _0, _1)]
    BudgetExhausted(FuncId, usize),
    #[display(fmt = "{}", _0)]
    Config(ConfigError),
}

impl std::error::Error for AnalysisError {}

impl From<ConfigError> for AnalysisError {
    fn from(err: ConfigError) -> Self {
        AnalysisError::Config(err)
    }
}

/// Analyze the given function with chaotic iteration.  Every instruction
/// starts on the work set with empty incoming and outgoing states;
/// `entry_state` flows into the first instruction of the entry block.
///
/// With `budget`, gives up after that many pops instead of looping on a
/// non-monotone transfer function.
pub fn chaotic_iteration<T: Analysis>(
    f: &Function,
    cfg: &Cfg,
    analysis: &T,
    entry_state: &PointwiseEnv<T::Value>,
    budget: Option<usize>,
) -> Result<Solution<T::Value>, AnalysisError> {
    solve(f, cfg, analysis, entry_state, inst_ids(f), budget)
}

// chaotic iteration with the work set seeded in the given order.
pub(crate) fn solve<T: Analysis>(
    f: &Function,
    cfg: &Cfg,
    analysis: &T,
    entry_state: &PointwiseEnv<T::Value>,
    seed: Vec<InstId>,
    budget: Option<usize>,
) -> Result<Solution<T::Value>, AnalysisError> {
    debug!(
        "chaotic iteration on `{}` with {} instructions",
        f.id,
        seed.len()
    );

    let mut solution = Solution {
        in_map: seed
            .iter()
            .map(|id| (id.clone(), PointwiseEnv::default()))
            .collect(),
        out_map: seed
            .iter()
            .map(|id| (id.clone(), PointwiseEnv::default()))
            .collect(),
        pops: 0,
    };
    let mut work_set: WorkSet = seed.into_iter().collect();

    while let Some(id) = work_set.pop() {
        solution.pops += 1;
        if let Some(max) = budget {
            if solution.pops > max {
                return Err(AnalysisError::BudgetExhausted(f.id.clone(), max));
            }
        }

        let Some(inst) = f.inst(&id.0, id.1) else {
            continue;
        };
        trace!("pop {}: {inst}", inst_label(&id));

        let pre = flow_in(f, cfg, &id, entry_state, &mut solution);
        let mut post = pre.clone();
        analysis.transfer(inst, &pre, &mut post);
        flow_out(f, cfg, &id, &pre, &post, &mut solution, &mut work_set);
    }

    debug!("fixpoint for `{}` after {} pops", f.id, solution.pops);
    Ok(solution)
}

// joins the outgoing states of all predecessors into the incoming state of
// `id`, and records it.
fn flow_in<A: AbstractValue>(
    f: &Function,
    cfg: &Cfg,
    id: &InstId,
    entry_state: &PointwiseEnv<A>,
    solution: &mut Solution<A>,
) -> PointwiseEnv<A> {
    let mut in_mem = if id.0 == cfg.entry && id.1 == 0 {
        entry_state.clone()
    } else {
        PointwiseEnv::default()
    };

    for pred in cfg.predecessors(f, id) {
        if let Some(pred_out) = solution.out_map.get(&pred) {
            in_mem = in_mem.join(pred_out);
        }
    }

    solution.in_map.insert(id.clone(), in_mem.clone());
    in_mem
}

// installs pre ⊔ post as the outgoing state of `id` and schedules the
// successors if that changed anything.
fn flow_out<A: AbstractValue>(
    f: &Function,
    cfg: &Cfg,
    id: &InstId,
    pre: &PointwiseEnv<A>,
    post: &PointwiseEnv<A>,
    solution: &mut Solution<A>,
    work_set: &mut WorkSet,
) {
    let joined = pre.join(post);
    let changed = solution
        .out_map
        .get(id)
        .map_or(true, |old| !old.equal(&joined));

    if changed {
        trace!("out of {} changed:\n{joined}", inst_label(id));
        solution.out_map.insert(id.clone(), joined);
        for succ in cfg.successors(f, id) {
            work_set.insert(succ);
        }
    }
}
