// tests for the lir front end: parsing, printing and validation.

use super::*;

const DIAMOND: &str = r#"
extern getchar: () -> int

fn test(p:int, q:&int) -> int {
let a:int, b:int, r:int, s:&int
entry:
  a = $call_ext getchar()
  s = $alloc 1 [s.site]
  $store s a
  $branch a tt ff

tt:
  b = $copy 1
  $jump exit

ff:
  b = $cast 2
  $jump exit

exit:
  r = $phi [1, tt] [b, ff]
  r = $arith div p r
  $ret r
}
"#;

#[test]
fn parses_diamond() {
    let program = DIAMOND.parse::<Program>().unwrap();
    let f = &program.functions[&func_id("test")];

    assert_eq!(f.params.len(), 2);
    assert_eq!(f.params[1].typ(), &ptr_ty(int_ty()));
    assert_eq!(f.locals.len(), 4);
    assert_eq!(f.body.len(), 4);

    let entry = &f.body[&bb_id("entry")];
    assert_eq!(entry.insts.len(), 3);
    assert_eq!(
        entry.term,
        Terminal::Branch {
            cond: Operand::Var(var_id("a", int_ty())),
            tt: bb_id("tt"),
            ff: bb_id("ff"),
        }
    );

    let exit = &f.body[&bb_id("exit")];
    assert_eq!(
        exit.insts[0],
        Instruction::Phi {
            lhs: var_id("r", int_ty()),
            args: vec![
                (Operand::CInt(1), bb_id("tt")),
                (Operand::Var(var_id("b", int_ty())), bb_id("ff")),
            ],
        }
    );
    assert_eq!(exit.term, Terminal::Ret(Some(Operand::Var(var_id("r", int_ty())))));
}

#[test]
fn printing_is_parseable() {
    let program = DIAMOND.parse::<Program>().unwrap();
    let printed = program.to_string();
    assert_eq!(printed.parse::<Program>().unwrap(), program);
}

#[test]
fn inst_views_cover_terminals() {
    let program = DIAMOND.parse::<Program>().unwrap();
    let f = &program.functions[&func_id("test")];

    assert!(matches!(f.inst(&bb_id("tt"), 0), Some(Inst::Inst(_))));
    assert!(matches!(f.inst(&bb_id("tt"), 1), Some(Inst::Term(Terminal::Jump(_)))));
    assert_eq!(f.inst(&bb_id("tt"), 2), None);
    assert_eq!(f.inst(&bb_id("nowhere"), 0), None);
}

#[test]
fn unknown_opcodes_are_opaque() {
    let code = r#"
    fn test(x:int) -> _ {
    let y:int
    entry:
      y = $frobnicate x 3
      $fence
      $ret
    }
    "#;

    let program = code.parse::<Program>().unwrap();
    let entry = &program.functions[&func_id("test")].body[&bb_id("entry")];
    assert_eq!(
        entry.insts,
        vec![
            Instruction::Opaque {
                lhs: Some(var_id("y", int_ty())),
                opcode: "frobnicate".to_string(),
                args: vec![Operand::Var(var_id("x", int_ty())), Operand::CInt(3)],
            },
            Instruction::Opaque {
                lhs: None,
                opcode: "fence".to_string(),
                args: vec![],
            },
        ]
    );
    assert_eq!(entry.term, Terminal::Ret(None));
}

#[test]
fn ret_does_not_swallow_the_next_label() {
    let code = r#"
    fn test() -> _ {
    entry:
      $jump next
    next:
      $ret
    }
    "#;

    let program = code.parse::<Program>().unwrap();
    assert_eq!(program.functions[&func_id("test")].body.len(), 2);
}

#[test]
fn undeclared_variable_is_a_parse_error() {
    let code = r#"
    fn test() -> _ {
    entry:
      x = $copy 1
      $ret
    }
    "#;

    let err = code.parse::<Program>().unwrap_err();
    assert!(err.0.contains("undeclared variable `x`"), "{err}");
    assert!(err.0.contains("line 3"), "{err}");
}

#[test]
fn truncated_input_is_a_parse_error() {
    let code = "fn test() -> _ {\nentry:\n  $ret\n";

    let err = code.parse::<Program>().unwrap_err();
    assert!(err.0.starts_with("unexpected end of input"), "{err}");
}

#[test]
fn value_opcodes_need_a_lhs() {
    let code = r#"
    fn test() -> _ {
    entry:
      $arith add 1 2
      $ret
    }
    "#;

    let err = code.parse::<Program>().unwrap_err();
    assert!(err.0.contains("must be assigned"), "{err}");
}

#[test]
fn store_has_no_value() {
    let code = r#"
    fn test() -> _ {
    let p:&int, x:int
    entry:
      x = $store p 1
      $ret
    }
    "#;

    let err = code.parse::<Program>().unwrap_err();
    assert!(err.0.contains("does not produce a value"), "{err}");
}

#[test]
fn validation_requires_entry() {
    let code = r#"
    fn test() -> _ {
    start:
      $ret
    }
    "#;

    let err = code.parse::<Program>().unwrap().validate().unwrap_err();
    assert_eq!(err, ValidationError::MissingEntry(func_id("test")));
}

#[test]
fn validation_checks_targets() {
    let code = r#"
    fn test() -> _ {
    entry:
      $jump nowhere
    }
    "#;

    let err = code.parse::<Program>().unwrap().validate().unwrap_err();
    assert_eq!(
        err,
        ValidationError::UnknownBlock(func_id("test"), bb_id("nowhere"))
    );
}

#[test]
fn validation_checks_pointer_uses() {
    let code = r#"
    fn test() -> _ {
    let x:int, y:int
    entry:
      y = $load x
      $ret
    }
    "#;

    let err = code.parse::<Program>().unwrap().validate().unwrap_err();
    assert!(matches!(err, ValidationError::NotAPointer(_, ref x, _) if x.name() == "x"));
}

#[test]
fn validation_checks_callees() {
    let code = r#"
    fn test() -> _ {
    let x:int
    entry:
      x = $call_ext read()
      $ret
    }
    "#;

    let err = code.parse::<Program>().unwrap().validate().unwrap_err();
    assert_eq!(
        err,
        ValidationError::UnknownExtern(func_id("test"), func_id("read"))
    );
}

#[test]
fn validation_checks_pointee_types() {
    let load = r#"
    fn test() -> _ {
    let pp:&&int, b:int
    entry:
      pp = $alloc 1 [cell]
      b = $load pp
      $ret
    }
    "#;
    let err = load.parse::<Program>().unwrap().validate().unwrap_err();
    assert_eq!(
        err,
        ValidationError::PointeeMismatch(func_id("test"), "b = $load pp".to_string())
    );

    let store = r#"
    fn test() -> _ {
    let pp:&&int
    entry:
      pp = $alloc 1 [cell]
      $store pp 0
      $ret
    }
    "#;
    let err = store.parse::<Program>().unwrap().validate().unwrap_err();
    assert!(matches!(err, ValidationError::PointeeMismatch(..)), "{err}");
}
