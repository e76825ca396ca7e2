//! Divide-by-zero detection.
//!
//! Every variable is abstracted to one of four [Domain] values.  A pointer
//! variable's binding stands for the contents of the memory it points to, so
//! stores and loads move domains between pointers and the integers written to
//! or read from them.  Memory is only modelled when an [AliasOracle] is
//! available; without one, loads produce no information and stores are
//! ignored.

use std::fmt;

use arbitrary::Arbitrary;
use derive_more::Display;
use log::{debug, trace, warn};
use serde::Serialize;

use super::points_to::{AliasOracle, PointsTo};
use super::*;
use crate::config::{Config, ConfigError};

/// The abstract value of an integer: has it been seen, and can it be zero?
#[derive(Arbitrary, Clone, Copy, Debug, Display, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Domain {
    #[display(fmt = "Uninit")]
    Uninit,
    #[display(fmt = "Zero")]
    Zero,
    #[display(fmt = "NonZero")]
    NonZero,
    #[display(fmt = "MaybeZero")]
    MaybeZero,
}

impl Domain {
    pub fn join(self, rhs: Domain) -> Domain {
        use Domain::*;

        match (self, rhs) {
            (Uninit, d) | (d, Uninit) => d,
            (lhs, rhs) if lhs == rhs => lhs,
            _ => MaybeZero,
        }
    }

    // the lattice order.
    pub fn leq(self, rhs: Domain) -> bool {
        self.join(rhs) == rhs
    }

    pub fn is_zero(self) -> bool {
        self == Domain::Zero
    }

    /// Whether a divisor with this value must be reported.  An unresolved
    /// divisor counts as possibly zero.
    pub fn may_be_zero(self) -> bool {
        self != Domain::NonZero
    }

    // the verdict on a divisor once iteration is over.
    fn settle(self) -> Domain {
        match self {
            Domain::Uninit => Domain::MaybeZero,
            d => d,
        }
    }
}

impl AbstractValue for Domain {
    type Concrete = i32;

    const BOTTOM: Self = Domain::Uninit;

    fn alpha(val: i32) -> Self {
        if val == 0 {
            Domain::Zero
        } else {
            Domain::NonZero
        }
    }

    fn join(&self, rhs: &Self) -> Self {
        Domain::join(*self, *rhs)
    }
}

/// The abstract memory: a domain for every tracked variable.
pub type Memory = PointwiseEnv<Domain>;

// SECTION: transfer functions

// strict in Uninit: nothing is known about the result until both operands have
// been seen.
pub fn arith(aop: ArithmeticOp, lhs: Domain, rhs: Domain) -> Domain {
    use ArithmeticOp::*;
    use Domain::*;

    if lhs == Uninit || rhs == Uninit {
        return Uninit;
    }

    match aop {
        Add | Subtract => match (lhs, rhs) {
            (Zero, d) | (d, Zero) => d,
            _ => MaybeZero,
        },
        // non-zero products can still wrap around to zero.
        Multiply if lhs == Zero || rhs == Zero => Zero,
        Multiply => MaybeZero,
        Divide if rhs == Zero => Uninit,
        Divide if lhs == Zero => Zero,
        Divide => MaybeZero,
    }
}

pub fn cmp(rop: ComparisonOp, lhs: Domain, rhs: Domain) -> Domain {
    use ComparisonOp::*;
    use Domain::*;

    if lhs == Uninit || rhs == Uninit {
        return Uninit;
    }

    let (same, different) = match rop {
        Eq => (NonZero, Zero),
        Neq => (Zero, NonZero),
        Less | LessEq | Greater | GreaterEq => return MaybeZero,
    };
    match (lhs, rhs) {
        (Zero, Zero) => same,
        (Zero, NonZero) | (NonZero, Zero) => different,
        _ => MaybeZero,
    }
}

fn eval(op: &Operand, mem: &Memory) -> Domain {
    match op {
        Operand::CInt(n) => Domain::alpha(*n),
        Operand::Var(x) => mem.get(x),
    }
}

// the constant every incoming value of a phi agrees on, if any.
fn constant_value(args: &[(Operand, BbId)]) -> Option<i32> {
    let mut values = args.iter().map(|(op, _)| match op {
        Operand::CInt(n) => Some(*n),
        Operand::Var(_) => None,
    });
    let first = values.next()??;
    values.all(|n| n == Some(first)).then_some(first)
}

/// The divide-by-zero analysis of one function.
pub struct DivZero<'a> {
    config: &'a Config,
    oracle: Option<&'a dyn AliasOracle>,
    // pointer-typed parameters and locals: the locations a store may reach.
    pointers: Vec<VarId>,
}

impl<'a> DivZero<'a> {
    /// Sets up the analysis of `f`.  Fails if the configuration asks for
    /// pointer analysis but there is no alias oracle to answer alias queries.
    pub fn new(
        config: &'a Config,
        f: &Function,
        oracle: Option<&'a dyn AliasOracle>,
    ) -> Result<Self, ConfigError> {
        if config.pointer_analysis && oracle.is_none() {
            return Err(ConfigError::MissingAliasOracle);
        }

        Ok(DivZero {
            config,
            oracle,
            pointers: f.variables().filter(|x| x.typ().is_ptr()).cloned().collect(),
        })
    }

    /// Parameters come from an unknown caller.
    pub fn entry_state(&self, f: &Function) -> Memory {
        let mut mem = Memory::default();
        for p in &f.params {
            mem.insert(p, &Domain::MaybeZero);
        }
        mem
    }

    pub fn run(&self, f: &Function) -> Result<Solution<Domain>, AnalysisError> {
        let cfg = Cfg::new(f);
        chaotic_iteration(
            f,
            &cfg,
            self,
            &self.entry_state(f),
            self.config.max_iterations,
        )
    }

    // the other tracked pointers that may point where `ptr` points.
    fn aliases<'b>(&'b self, oracle: &'b dyn AliasOracle, ptr: &'b VarId) -> impl Iterator<Item = &'b VarId> {
        self.pointers
            .iter()
            .filter(move |other| *other != ptr && oracle.alias(ptr, other))
    }

    // writes `value` through `dst`.  The out-state keeps every binding of the
    // pre-state, so `dst` and each of its aliases only gain `value` by join;
    // a store never replaces what a pointee held before.
    fn store(&self, dst: &VarId, value: Domain, pre: &Memory, post: &mut Memory) {
        let Some(oracle) = self.oracle else {
            return;
        };

        for target in std::iter::once(dst).chain(self.aliases(oracle, dst)) {
            post.insert(target, &pre.get(target).join(value));
        }
    }

    fn load(&self, lhs: &VarId, src: &VarId, pre: &Memory, post: &mut Memory) {
        let Some(oracle) = self.oracle else {
            post.insert(lhs, &Domain::MaybeZero);
            return;
        };

        let value = if lhs.typ().is_ptr() {
            // a loaded pointer's contents are whatever its aliases hold.
            self.aliases(oracle, lhs)
                .fold(Domain::Uninit, |acc, other| acc.join(pre.get(other)))
        } else if pre.tracks(src) {
            pre.get(src)
        } else {
            Domain::Uninit
        };
        post.insert(lhs, &value);
    }

    // a call may write anything through the pointers it is given.
    fn clobber(&self, args: &[Operand], pre: &Memory, post: &mut Memory) {
        for arg in args {
            if let Operand::Var(ptr) = arg {
                if ptr.typ().is_ptr() {
                    self.store(ptr, Domain::MaybeZero, pre, post);
                }
            }
        }
    }

    fn call(&self, callee: &FuncId, lhs: Option<&VarId>, args: &[Operand], pre: &Memory, post: &mut Memory) {
        if self.config.is_input(callee.name()) {
            trace!("`{callee}` reads input");
        } else if self.config.is_sanitizer(callee.name()) {
            trace!("`{callee}` is a sanitizer");
        }

        self.clobber(args, pre, post);
        if let Some(lhs) = lhs {
            post.insert(lhs, &Domain::MaybeZero);
        }
    }
}

impl Analysis for DivZero<'_> {
    type Value = Domain;

    fn transfer(&self, inst: Inst<'_>, pre: &Memory, post: &mut Memory) {
        use Instruction::*;

        let inst = match inst {
            Inst::Inst(inst) => inst,
            Inst::Term(Terminal::CallDirect {
                lhs, callee, args, ..
            }) => return self.call(callee, lhs.as_ref(), args, pre, post),
            Inst::Term(_) => return,
        };

        match inst {
            Arith { lhs, aop, op1, op2 } => {
                post.insert(lhs, &arith(*aop, eval(op1, pre), eval(op2, pre)))
            }
            Cmp { lhs, rop, op1, op2 } => {
                post.insert(lhs, &cmp(*rop, eval(op1, pre), eval(op2, pre)))
            }
            Copy { lhs, op } | Cast { lhs, op } => post.insert(lhs, &eval(op, pre)),
            Phi { lhs, args } => {
                let value = match constant_value(args) {
                    Some(n) => Domain::alpha(n),
                    None => args
                        .iter()
                        .fold(Domain::Uninit, |acc, (op, _)| acc.join(eval(op, pre))),
                };
                post.insert(lhs, &value);
            }
            Load { lhs, src } => self.load(lhs, src, pre, post),
            Store { dst, op } => self.store(dst, eval(op, pre), pre, post),
            CallExt {
                lhs,
                ext_callee,
                args,
            } => self.call(ext_callee, lhs.as_ref(), args, pre, post),
            Alloc { .. } => {}
            Opaque { lhs, .. } => {
                warn!("unhandled instruction: {inst}");
                if let Some(lhs) = lhs {
                    post.insert(lhs, &Domain::MaybeZero);
                }
            }
        }
    }
}

// SECTION: reporting

fn divisor(inst: Inst<'_>) -> Option<&Operand> {
    match inst {
        Inst::Inst(Instruction::Arith {
            aop: ArithmeticOp::Divide,
            op2,
            ..
        }) => Some(op2),
        _ => None,
    }
}

/// The divisions whose divisor may be zero when control reaches them.
pub fn check(f: &Function, solution: &Solution<Domain>) -> Set<InstId> {
    findings(f, solution).into_iter().map(|finding| finding.id).collect()
}

fn findings(f: &Function, solution: &Solution<Domain>) -> Vec<Finding> {
    let mut found = vec![];
    for (id, in_mem) in &solution.in_map {
        let Some(inst) = f.inst(&id.0, id.1) else {
            continue;
        };
        let Some(op) = divisor(inst) else {
            continue;
        };

        let verdict = eval(op, in_mem).settle();
        if verdict.may_be_zero() {
            debug!("{}: divisor {op} is {verdict}", inst_label(id));
            found.push(Finding {
                id: id.clone(),
                label: inst_label(id),
                inst: inst.to_string(),
                divisor: verdict,
            });
        }
    }
    found
}

/// A division that may divide by zero.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Finding {
    #[serde(skip)]
    pub id: InstId,
    pub label: String,
    pub inst: String,
    pub divisor: Domain,
}

/// The abstract state before and after one instruction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct InstState {
    pub label: String,
    pub inst: String,
    #[serde(rename = "in")]
    pub in_state: Map<String, Domain>,
    #[serde(rename = "out")]
    pub out_state: Map<String, Domain>,
}

/// Everything one run found out about a function.
#[derive(Clone, Debug, Serialize)]
pub struct Report {
    pub function: String,
    pub findings: Vec<Finding>,
    pub states: Vec<InstState>,
    pub iterations: usize,
}

fn snapshot(mem: Option<&Memory>) -> Map<String, Domain> {
    mem.into_iter()
        .flat_map(|mem| mem.values.iter())
        .filter(|(_, val)| **val != Domain::Uninit)
        .map(|(var, val)| (var.to_string(), *val))
        .collect()
}

impl Report {
    pub fn new(f: &Function, solution: &Solution<Domain>) -> Self {
        let states = inst_ids(f)
            .into_iter()
            .filter_map(|id| {
                let inst = f.inst(&id.0, id.1)?;
                Some(InstState {
                    label: inst_label(&id),
                    inst: inst.to_string(),
                    in_state: snapshot(solution.in_map.get(&id)),
                    out_state: snapshot(solution.out_map.get(&id)),
                })
            })
            .collect();

        Report {
            function: f.id.to_string(),
            findings: findings(f, solution),
            states,
            iterations: solution.pops,
        }
    }

    pub fn flagged(&self) -> Set<InstId> {
        self.findings.iter().map(|finding| finding.id.clone()).collect()
    }

    // the state after the instruction labelled `label`.
    pub fn out_state(&self, label: &str) -> Option<&Map<String, Domain>> {
        self.states
            .iter()
            .find(|state| state.label == label)
            .map(|state| &state.out_state)
    }
}

fn write_state(f: &mut fmt::Formatter<'_>, state: &Map<String, Domain>) -> fmt::Result {
    let bindings = state
        .iter()
        .map(|(var, val)| format!("{var} -> {val}"))
        .collect::<Vec<_>>();
    writeln!(f, "{{{}}}", bindings.join(", "))
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Running DivZero on {}", self.function)?;
        for state in &self.states {
            writeln!(f, "{}: {}", state.label, state.inst)?;
            write!(f, "  in:  ")?;
            write_state(f, &state.in_state)?;
            write!(f, "  out: ")?;
            write_state(f, &state.out_state)?;
        }
        writeln!(f, "Potential Instructions by DivZero:")?;
        for finding in &self.findings {
            writeln!(f, "{}: {}", finding.label, finding.inst)?;
        }
        Ok(())
    }
}

// SECTION: entry points

/// Analyzes one function of `program`.  `oracle` selects the memory-aware
/// transfer functions.
pub fn analyze(
    program: &Valid<Program>,
    func: &FuncId,
    config: &Config,
    oracle: Option<&dyn AliasOracle>,
) -> Result<Report, AnalysisError> {
    let f = program
        .inner()
        .functions
        .get(func)
        .ok_or_else(|| AnalysisError::UnknownFunction(func.clone()))?;

    let analysis = DivZero::new(config, f, oracle)?;
    let solution = analysis.run(f)?;
    Ok(Report::new(f, &solution))
}

/// Analyzes every function separately.  With `config.pointer_analysis` each
/// function gets its own [PointsTo] oracle.
pub fn analyze_program(program: &Valid<Program>, config: &Config) -> Result<Vec<Report>, AnalysisError> {
    program
        .inner()
        .functions
        .values()
        .map(|f| {
            let points_to = config.pointer_analysis.then(|| PointsTo::new(f));
            let oracle = points_to.as_ref().map(|pts| pts as &dyn AliasOracle);
            analyze(program, &f.id, config, oracle)
        })
        .collect()
}
