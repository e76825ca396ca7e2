// tests for the control-flow accessor, abstract memories, the work set and
// the chaotic iteration engine.

use arbitrary::Unstructured;
use collapse::*;
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use test_log::test;

use super::{program, test_fn};
use crate::config::Config;
use crate::middle_end::analysis::div_zero::{Domain, DivZero, Memory};
use crate::middle_end::analysis::*;

const DIAMOND: &str = r#"
fn test(c:int) -> _ {
let x:int
entry:
  x = $copy 1
  $branch c l r
l:
  $jump exit
r:
  x = $copy 2
  $jump exit
exit:
  $ret
}
"#;

const LOOP: &str = r#"
fn test(n:int) -> int {
let i:int, s:int, c:int, r:int
entry:
  i = $copy 0
  s = $copy 1
  $jump loop
loop:
  c = $cmp lt i n
  $branch c body exit
body:
  s = $arith mul s 2
  i = $arith add i 1
  $jump loop
exit:
  r = $arith div n s
  $ret r
}
"#;

fn id(bb: &str, n: usize) -> InstId {
    (bb_id(bb), n)
}

fn int(name: &str) -> VarId {
    var_id(name, int_ty())
}

#[test]
fn accessor_inside_a_block() {
    let program = program(DIAMOND);
    let f = test_fn(&program);
    let cfg = Cfg::new(f);

    assert_eq!(cfg.predecessors(f, &id("entry", 1)), vec![id("entry", 0)]);
    assert_eq!(cfg.successors(f, &id("entry", 0)), vec![id("entry", 1)]);
    assert_eq!(cfg.successors(f, &id("r", 0)), vec![id("r", 1)]);
}

#[test]
fn accessor_across_blocks() {
    let program = program(DIAMOND);
    let f = test_fn(&program);
    let cfg = Cfg::new(f);

    assert!(cfg.predecessors(f, &id("entry", 0)).is_empty());
    assert_eq!(
        cfg.successors(f, &id("entry", 1)),
        vec![id("l", 0), id("r", 0)]
    );
    assert_eq!(
        cfg.predecessors(f, &id("exit", 0)),
        vec![id("l", 0), id("r", 1)]
    );
    assert!(cfg.successors(f, &id("exit", 0)).is_empty());
}

#[test]
fn inst_ids_include_terminals() {
    let program = program(DIAMOND);
    let ids = inst_ids(test_fn(&program));

    assert_eq!(ids.len(), 6);
    assert!(ids.contains(&id("entry", 1)));
    assert_eq!(inst_label(&id("r", 1)), "r.1");
}

#[test]
fn memory_join_carries_one_sided_keys() {
    let mut lhs = Memory::default();
    lhs.insert(&int("a"), &Domain::Zero);
    lhs.insert(&int("b"), &Domain::Zero);
    let mut rhs = Memory::default();
    rhs.insert(&int("b"), &Domain::NonZero);
    rhs.insert(&int("c"), &Domain::NonZero);

    let joined = lhs.join(&rhs);
    assert_eq!(joined.get(&int("a")), Domain::Zero);
    assert_eq!(joined.get(&int("b")), Domain::MaybeZero);
    assert_eq!(joined.get(&int("c")), Domain::NonZero);
    assert_eq!(joined.get(&int("d")), Domain::Uninit);
}

#[test]
fn memory_equality_ignores_uninit_bindings() {
    let mut lhs = Memory::default();
    lhs.insert(&int("a"), &Domain::Zero);
    let mut rhs = lhs.clone();
    rhs.insert(&int("b"), &Domain::Uninit);

    assert!(lhs.equal(&rhs));
    assert!(rhs.equal(&lhs));

    rhs.insert(&int("b"), &Domain::NonZero);
    assert!(!lhs.equal(&rhs));
    assert!(!rhs.equal(&lhs));
}

#[test]
fn memory_display_skips_uninit() {
    let mut mem = Memory::default();
    mem.insert(&int("b"), &Domain::NonZero);
    mem.insert(&int("a"), &Domain::Uninit);
    mem.insert(&int("c"), &Domain::MaybeZero);

    collapsed_eq!(
        mem.to_string().as_str(),
        r#"
        b -> NonZero
        c -> MaybeZero
        "#
    );
}

#[test]
fn work_set_pops_the_latest_insertion_once() {
    let mut work: WorkSet = [id("a", 0), id("b", 0)].into_iter().collect();
    assert!(!work.insert(id("a", 0)));
    assert!(work.insert(id("c", 0)));
    assert_eq!(work.len(), 3);

    assert_eq!(work.pop(), Some(id("c", 0)));
    assert_eq!(work.pop(), Some(id("b", 0)));
    assert!(work.insert(id("b", 0)));
    assert_eq!(work.pop(), Some(id("b", 0)));
    assert_eq!(work.pop(), Some(id("a", 0)));
    assert_eq!(work.pop(), None);
    assert!(work.is_empty());
}

#[test]
fn domain_lattice_laws() {
    arbtest::arbtest(|u| {
        let a: Domain = u.arbitrary()?;
        let b: Domain = u.arbitrary()?;
        let c: Domain = u.arbitrary()?;

        assert_eq!(a.join(b), b.join(a));
        assert_eq!(a.join(b.join(c)), a.join(b).join(c));
        assert_eq!(a.join(a), a);
        assert_eq!(a.join(Domain::Uninit), a);
        assert_eq!(a.join(Domain::MaybeZero), Domain::MaybeZero);
        assert!(a.leq(a.join(b)) && b.leq(a.join(b)));
        Ok(())
    });
}

// a memory over a handful of variables, so that keys collide often.
fn arbitrary_memory(u: &mut Unstructured<'_>) -> arbitrary::Result<Memory> {
    let mut mem = Memory::default();
    for (n, val) in u.arbitrary::<Vec<(u8, Domain)>>()? {
        mem.insert(&int(&format!("x{}", n % 4)), &val);
    }
    Ok(mem)
}

#[test]
fn memory_join_is_an_upper_bound() {
    arbtest::arbtest(|u| {
        let m1 = arbitrary_memory(u)?;
        let m2 = arbitrary_memory(u)?;
        let joined = m1.join(&m2);

        for n in 0..4 {
            let x = int(&format!("x{n}"));
            assert!(m1.get(&x).leq(joined.get(&x)));
            assert!(m2.get(&x).leq(joined.get(&x)));
        }
        assert!(joined.equal(&m2.join(&m1)));
        Ok(())
    });
}

#[test]
fn loop_reaches_a_fixpoint() {
    let program = program(LOOP);
    let f = test_fn(&program);
    let config = Config::default();
    let solution = DivZero::new(&config, f, None).unwrap().run(f).unwrap();

    // `s` is 1 on entry and doubled in the loop, which may wrap to zero.
    let head = &solution.in_map[&id("loop", 0)];
    assert_eq!(head.get(&int("s")), Domain::MaybeZero);
    assert_eq!(head.get(&int("i")), Domain::MaybeZero);
    assert_eq!(head.get(&int("n")), Domain::MaybeZero);

    let vars = f.variables().count();
    assert!(solution.pops <= vars * 4 * inst_ids(f).len());
}

#[test]
fn fixpoint_does_not_depend_on_pop_order() {
    let program = program(LOOP);
    let f = test_fn(&program);
    let config = Config::default();
    let analysis = DivZero::new(&config, f, None).unwrap();
    let cfg = Cfg::new(f);
    let entry = analysis.entry_state(f);

    let expected = chaotic_iteration(f, &cfg, &analysis, &entry, None).unwrap();

    let mut rng = StdRng::seed_from_u64(0xd17_2e40);
    for _ in 0..20 {
        let mut seed = inst_ids(f);
        seed.shuffle(&mut rng);
        let solution = solve(f, &cfg, &analysis, &entry, seed, None).unwrap();
        assert_eq!(solution.in_map, expected.in_map);
        assert_eq!(solution.out_map, expected.out_map);
    }
}

#[test]
fn budget_stops_iteration() {
    let program = program(LOOP);
    let f = test_fn(&program);
    let config = Config {
        max_iterations: Some(3),
        ..Config::default()
    };

    let err = DivZero::new(&config, f, None).unwrap().run(f).unwrap_err();
    assert_eq!(err, AnalysisError::BudgetExhausted(func_id("test"), 3));
}
