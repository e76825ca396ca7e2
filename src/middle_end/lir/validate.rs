// structural checks on parsed programs.  The parser already resolves every
// variable name, so this only checks what needs the whole program.

use derive_more::Display;

use super::*;

#[derive(Clone, Debug, Display, Eq, PartialEq)]
pub enum ValidationError {
    #[display(fmt = "function `{}` has no `entry` block", _0)]
    MissingEntry(FuncId),
    #[display(fmt = "function `{}` refers to unknown block `{}`", _0, _1)]
    UnknownBlock(FuncId, BbId),
    #[display(fmt = "function `{}` calls undefined function `{}`", _0, _1)]
    UnknownFunction(FuncId, FuncId),
    #[display(fmt = "function `{}` calls undeclared extern `{}`", _0, _1)]
    UnknownExtern(FuncId, FuncId),
    #[display(fmt = "in function `{}`: `{}` must have pointer type in `{}`", _0, _1, _2)]
    NotAPointer(FuncId, VarId, String),
    #[display(fmt = "in function `{}`: pointee type does not match in `{}`", _0, _1)]
    PointeeMismatch(FuncId, String),
    #[display(fmt = "`{}` is both an extern and a function", _0)]
    Shadowed(FuncId),
}

impl std::error::Error for ValidationError {}

pub(super) fn validate(program: Program) -> Result<Valid<Program>, ValidationError> {
    for id in program.externs.keys() {
        if program.functions.contains_key(id) {
            return Err(ValidationError::Shadowed(id.clone()));
        }
    }

    for f in program.functions.values() {
        validate_function(&program, f)?;
    }

    Ok(Valid(program))
}

fn validate_function(program: &Program, f: &Function) -> Result<(), ValidationError> {
    use Instruction::*;

    if !f.body.contains_key(&bb_id("entry")) {
        return Err(ValidationError::MissingEntry(f.id.clone()));
    }

    let check_block = |bb: &BbId| {
        if f.body.contains_key(bb) {
            Ok(())
        } else {
            Err(ValidationError::UnknownBlock(f.id.clone(), bb.clone()))
        }
    };
    let check_ptr = |x: &VarId, inst: &dyn std::fmt::Display| {
        if x.typ().is_ptr() {
            Ok(())
        } else {
            Err(ValidationError::NotAPointer(
                f.id.clone(),
                x.clone(),
                inst.to_string(),
            ))
        }
    };
    // `ptr` must point to values of type `typ`.
    let check_pointee = |ptr: &VarId, typ: &Type, inst: &dyn std::fmt::Display| {
        if ptr.typ().get_deref_type() == Some(typ) {
            Ok(())
        } else {
            Err(ValidationError::PointeeMismatch(f.id.clone(), inst.to_string()))
        }
    };

    for bb in f.body.values() {
        for inst in &bb.insts {
            match inst {
                Alloc { lhs, .. } => check_ptr(lhs, inst)?,
                Load { lhs, src } => {
                    check_ptr(src, inst)?;
                    check_pointee(src, lhs.typ(), inst)?;
                }
                Store { dst, op } => {
                    check_ptr(dst, inst)?;
                    let stored = match op {
                        Operand::CInt(_) => int_ty(),
                        Operand::Var(x) => x.typ().clone(),
                    };
                    check_pointee(dst, &stored, inst)?;
                }
                Phi { args, .. } => {
                    for (_, pred) in args {
                        check_block(pred)?;
                    }
                }
                CallExt { ext_callee, .. } => {
                    if !program.externs.contains_key(ext_callee) {
                        return Err(ValidationError::UnknownExtern(
                            f.id.clone(),
                            ext_callee.clone(),
                        ));
                    }
                }
                Arith { .. } | Cast { .. } | Cmp { .. } | Copy { .. } | Opaque { .. } => {}
            }
        }

        if let Terminal::CallDirect { callee, .. } = &bb.term {
            if !program.functions.contains_key(callee) {
                return Err(ValidationError::UnknownFunction(
                    f.id.clone(),
                    callee.clone(),
                ));
            }
        }
        for target in bb.term.targets() {
            check_block(target)?;
        }
    }

    Ok(())
}
