//! May-alias information for the pointer variables of a function.
//!
//! [PointsTo] is an intraprocedural, flow-insensitive, inclusion-based
//! (Andersen style) points-to analysis written as a Datalog program.  Abstract
//! objects are allocation sites plus one unknown object standing for memory
//! the function did not allocate itself.

use std::fmt;

use ascent::ascent_run;
use log::debug;

use crate::middle_end::lir::*;

/// Answers may-alias queries between two pointer variables.  An oracle may
/// report spurious aliases but must never miss a real one.
pub trait AliasOracle {
    fn alias(&self, a: &VarId, b: &VarId) -> bool;
}

/// An abstract memory object.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Obj {
    // the object allocated by the `$alloc` with this id.
    Site(String),
    // memory reachable from parameters and call results.
    Unknown,
}

impl fmt::Display for Obj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Obj::Site(id) => write!(f, "{id}"),
            Obj::Unknown => write!(f, "?"),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct PointsTo {
    sets: Map<VarId, Set<Obj>>,
}

// the input relations, gathered in one pass over the function.
#[derive(Default)]
struct Facts {
    alloc: Vec<(VarId, Obj)>,
    assign: Vec<(VarId, VarId)>,
    load: Vec<(VarId, VarId)>,
    store: Vec<(VarId, VarId)>,
}

impl Facts {
    fn gather(f: &Function) -> Self {
        use Instruction::*;

        let mut facts = Facts::default();
        let ptr_var = |op: &Operand| match op {
            Operand::Var(x) if x.typ().is_ptr() => Some(x.clone()),
            _ => None,
        };

        for p in f.params.iter().filter(|p| p.typ().is_ptr()) {
            facts.alloc.push((p.clone(), Obj::Unknown));
        }

        for bb in f.body.values() {
            for inst in &bb.insts {
                match inst {
                    Alloc { lhs, id, .. } => facts.alloc.push((lhs.clone(), Obj::Site(id.clone()))),
                    Copy { lhs, op } | Cast { lhs, op } if lhs.typ().is_ptr() => {
                        if let Some(q) = ptr_var(op) {
                            facts.assign.push((lhs.clone(), q));
                        }
                    }
                    Phi { lhs, args } if lhs.typ().is_ptr() => {
                        for q in args.iter().filter_map(|(op, _)| ptr_var(op)) {
                            facts.assign.push((lhs.clone(), q));
                        }
                    }
                    Load { lhs, src } if lhs.typ().is_ptr() => {
                        facts.load.push((lhs.clone(), src.clone()))
                    }
                    Store { dst, op } => {
                        if let Some(q) = ptr_var(op) {
                            facts.store.push((dst.clone(), q));
                        }
                    }
                    CallExt { lhs: Some(lhs), .. } | Opaque { lhs: Some(lhs), .. }
                        if lhs.typ().is_ptr() =>
                    {
                        facts.alloc.push((lhs.clone(), Obj::Unknown))
                    }
                    _ => {}
                }
            }

            if let Terminal::CallDirect { lhs: Some(lhs), .. } = &bb.term {
                if lhs.typ().is_ptr() {
                    facts.alloc.push((lhs.clone(), Obj::Unknown));
                }
            }
        }

        facts
    }
}

impl PointsTo {
    pub fn new(f: &Function) -> Self {
        let facts = Facts::gather(f);
        debug!(
            "points-to for `{}`: {} allocs, {} assigns, {} loads, {} stores",
            f.id,
            facts.alloc.len(),
            facts.assign.len(),
            facts.load.len(),
            facts.store.len()
        );

        let result = ascent_run! {
            relation alloc(VarId, Obj);
            relation assign(VarId, VarId);
            relation load(VarId, VarId);
            relation store(VarId, VarId);

            relation points_to(VarId, Obj);
            relation heap_points_to(Obj, Obj);

            alloc(p.clone(), o.clone()) <-- for (p, o) in facts.alloc.iter();
            assign(p.clone(), q.clone()) <-- for (p, q) in facts.assign.iter();
            load(p.clone(), q.clone()) <-- for (p, q) in facts.load.iter();
            store(p.clone(), q.clone()) <-- for (p, q) in facts.store.iter();

            heap_points_to(Obj::Unknown, Obj::Unknown);

            points_to(p.clone(), o.clone()) <-- alloc(p, o);
            points_to(p.clone(), o.clone()) <-- assign(p, q), points_to(q, o);
            heap_points_to(o1.clone(), o2.clone()) <--
                store(p, q), points_to(p, o1), points_to(q, o2);
            points_to(p.clone(), o2.clone()) <--
                load(p, q), points_to(q, o1), heap_points_to(o1, o2);
        };

        let mut sets: Map<VarId, Set<Obj>> = Map::new();
        for (var, obj) in result.points_to {
            sets.entry(var).or_default().insert(obj);
        }
        PointsTo { sets }
    }

    /// The objects `var` may point to; empty for variables that never get an
    /// address.
    pub fn points_to(&self, var: &VarId) -> Set<Obj> {
        self.sets.get(var).cloned().unwrap_or_default()
    }
}

impl AliasOracle for PointsTo {
    fn alias(&self, a: &VarId, b: &VarId) -> bool {
        if a == b {
            return true;
        }
        match (self.sets.get(a), self.sets.get(b)) {
            (Some(lhs), Some(rhs)) => !lhs.is_disjoint(rhs),
            _ => false,
        }
    }
}

impl fmt::Display for PointsTo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (var, objs) in &self.sets {
            let objs = objs.iter().map(|o| o.to_string()).collect::<Vec<_>>();
            writeln!(f, "{var} -> {{{}}}", objs.join(", "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn function(code: &str) -> Function {
        let program = code.parse::<Program>().unwrap().validate().unwrap();
        program.inner().functions.values().next().unwrap().clone()
    }

    fn ptr(name: &str) -> VarId {
        var_id(name, ptr_ty(int_ty()))
    }

    #[test]
    fn copies_share_the_allocation() {
        let f = function(
            r#"
            fn test() -> _ {
            let p:&int, q:&int, r:&int
            entry:
              p = $alloc 1 [a]
              q = $copy p
              r = $alloc 1 [b]
              $ret
            }
            "#,
        );
        let pts = PointsTo::new(&f);

        assert_eq!(pts.points_to(&ptr("q")), Set::from([Obj::Site("a".to_string())]));
        assert!(pts.alias(&ptr("p"), &ptr("q")));
        assert!(!pts.alias(&ptr("p"), &ptr("r")));
        assert!(pts.alias(&ptr("r"), &ptr("r")));
    }

    #[test]
    fn loads_follow_stored_pointers() {
        let int_ptr = ptr_ty(int_ty());
        let f = function(
            r#"
            fn test() -> _ {
            let pp:&&int, p:&int, q:&int
            entry:
              pp = $alloc 1 [cell]
              p = $alloc 1 [a]
              $store pp p
              q = $load pp
              $ret
            }
            "#,
        );
        let pts = PointsTo::new(&f);

        assert_eq!(pts.points_to(&var_id("q", int_ptr)), Set::from([Obj::Site("a".to_string())]));
        assert!(pts.alias(&ptr("p"), &ptr("q")));
    }

    #[test]
    fn parameters_may_alias_each_other() {
        let f = function(
            r#"
            fn test(x:&int, y:&int) -> _ {
            let z:&int
            entry:
              z = $alloc 1 [local]
              $ret
            }
            "#,
        );
        let pts = PointsTo::new(&f);

        assert!(pts.alias(&ptr("x"), &ptr("y")));
        assert!(!pts.alias(&ptr("x"), &ptr("z")));
    }

    #[test]
    fn phi_merges_both_sides() {
        let f = function(
            r#"
            fn test(c:int) -> _ {
            let a:&int, b:&int, m:&int
            entry:
              a = $alloc 1 [a]
              b = $alloc 1 [b]
              $branch c l r
            l:
              $jump join
            r:
              $jump join
            join:
              m = $phi [a, l] [b, r]
              $ret
            }
            "#,
        );
        let pts = PointsTo::new(&f);

        assert_eq!(pts.points_to(&ptr("m")).len(), 2);
        assert!(pts.alias(&ptr("m"), &ptr("a")));
        assert!(pts.alias(&ptr("m"), &ptr("b")));
        assert!(!pts.alias(&ptr("a"), &ptr("b")));
    }
}
