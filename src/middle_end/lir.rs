//! lir: the low-level intermediate representation the analyses run on.
//!
//! A program is a set of extern declarations and functions.  A function body is
//! a map of basic blocks; every basic block is a list of instructions followed
//! by exactly one terminal.  Variables are not in SSA form, but the analyses
//! work best on programs that define each variable once.

use std::fmt;
use std::str::FromStr;

use derive_more::Display;

pub use crate::commons::{Map, Set, Valid};

mod lexer;
mod parser;
mod validate;

#[cfg(test)]
mod tests;

pub use parser::{parse, ParseError};
pub use validate::ValidationError;

// SECTION: identifiers and types

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Type {
    Int,
    Ptr(Box<Type>),
}

impl Type {
    pub fn is_int(&self) -> bool {
        matches!(self, Type::Int)
    }

    pub fn is_ptr(&self) -> bool {
        matches!(self, Type::Ptr(_))
    }

    // the pointee type, if this is a pointer.
    pub fn get_deref_type(&self) -> Option<&Type> {
        match self {
            Type::Ptr(inner) => Some(inner),
            Type::Int => None,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int => write!(f, "int"),
            Type::Ptr(inner) => write!(f, "&{inner}"),
        }
    }
}

pub fn int_ty() -> Type {
    Type::Int
}

pub fn ptr_ty(typ: Type) -> Type {
    Type::Ptr(Box::new(typ))
}

/// A variable: its name together with its declared type.  Names are unique
/// within a function.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VarId {
    name: String,
    typ: Type,
}

impl VarId {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn typ(&self) -> &Type {
        &self.typ
    }
}

impl fmt::Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

pub fn var_id(name: &str, typ: Type) -> VarId {
    VarId {
        name: name.to_string(),
        typ,
    }
}

#[derive(Clone, Debug, Display, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BbId(String);

pub fn bb_id(name: &str) -> BbId {
    BbId(name.to_string())
}

#[derive(Clone, Debug, Display, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FuncId(String);

impl FuncId {
    pub fn name(&self) -> &str {
        &self.0
    }
}

pub fn func_id(name: &str) -> FuncId {
    FuncId(name.to_string())
}

// SECTION: instructions

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operand {
    CInt(i32),
    Var(VarId),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::CInt(n) => write!(f, "{n}"),
            Operand::Var(x) => write!(f, "{x}"),
        }
    }
}

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum ArithmeticOp {
    #[display(fmt = "add")]
    Add,
    #[display(fmt = "sub")]
    Subtract,
    #[display(fmt = "mul")]
    Multiply,
    #[display(fmt = "div")]
    Divide,
}

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum ComparisonOp {
    #[display(fmt = "eq")]
    Eq,
    #[display(fmt = "neq")]
    Neq,
    #[display(fmt = "lt")]
    Less,
    #[display(fmt = "lte")]
    LessEq,
    #[display(fmt = "gt")]
    Greater,
    #[display(fmt = "gte")]
    GreaterEq,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Instruction {
    Alloc {
        lhs: VarId,
        num: Operand,
        id: String,
    },
    Arith {
        lhs: VarId,
        aop: ArithmeticOp,
        op1: Operand,
        op2: Operand,
    },
    CallExt {
        lhs: Option<VarId>,
        ext_callee: FuncId,
        args: Vec<Operand>,
    },
    Cast {
        lhs: VarId,
        op: Operand,
    },
    Cmp {
        lhs: VarId,
        rop: ComparisonOp,
        op1: Operand,
        op2: Operand,
    },
    Copy {
        lhs: VarId,
        op: Operand,
    },
    Load {
        lhs: VarId,
        src: VarId,
    },
    Phi {
        lhs: VarId,
        args: Vec<(Operand, BbId)>,
    },
    Store {
        dst: VarId,
        op: Operand,
    },
    // an opcode the front end does not know; analyses must not assume anything
    // about it.
    Opaque {
        lhs: Option<VarId>,
        opcode: String,
        args: Vec<Operand>,
    },
}

impl Instruction {
    /// The variable this instruction defines, if any.
    pub fn lhs(&self) -> Option<&VarId> {
        use Instruction::*;

        match self {
            Alloc { lhs, .. }
            | Arith { lhs, .. }
            | Cast { lhs, .. }
            | Cmp { lhs, .. }
            | Copy { lhs, .. }
            | Load { lhs, .. }
            | Phi { lhs, .. } => Some(lhs),
            CallExt { lhs, .. } | Opaque { lhs, .. } => lhs.as_ref(),
            Store { .. } => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Terminal {
    Branch {
        cond: Operand,
        tt: BbId,
        ff: BbId,
    },
    CallDirect {
        lhs: Option<VarId>,
        callee: FuncId,
        args: Vec<Operand>,
        next_bb: BbId,
    },
    Jump(BbId),
    Ret(Option<Operand>),
}

impl Terminal {
    /// The blocks control may continue in after this terminal.
    pub fn targets(&self) -> Vec<&BbId> {
        match self {
            Terminal::Branch { tt, ff, .. } => vec![tt, ff],
            Terminal::CallDirect { next_bb, .. } => vec![next_bb],
            Terminal::Jump(next) => vec![next],
            Terminal::Ret(_) => vec![],
        }
    }
}

/// A view of one position in a basic block: either an ordinary instruction or
/// the block's terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Inst<'a> {
    Inst(&'a Instruction),
    Term(&'a Terminal),
}

impl fmt::Display for Inst<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Inst::Inst(inst) => write!(f, "{inst}"),
            Inst::Term(term) => write!(f, "{term}"),
        }
    }
}

// SECTION: program structure

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BasicBlock {
    pub id: BbId,
    pub insts: Vec<Instruction>,
    pub term: Terminal,
}

impl BasicBlock {
    // the instruction at position `idx`, where `insts.len()` is the terminal.
    pub fn inst(&self, idx: usize) -> Option<Inst<'_>> {
        match idx.cmp(&self.insts.len()) {
            std::cmp::Ordering::Less => Some(Inst::Inst(&self.insts[idx])),
            std::cmp::Ordering::Equal => Some(Inst::Term(&self.term)),
            std::cmp::Ordering::Greater => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Function {
    pub id: FuncId,
    pub params: Vec<VarId>,
    pub ret_ty: Option<Type>,
    pub locals: Set<VarId>,
    pub body: Map<BbId, BasicBlock>,
}

impl Function {
    pub fn inst(&self, bb: &BbId, idx: usize) -> Option<Inst<'_>> {
        self.body.get(bb).and_then(|block| block.inst(idx))
    }

    /// Parameters and locals, in that order.
    pub fn variables(&self) -> impl Iterator<Item = &VarId> {
        self.params.iter().chain(self.locals.iter())
    }

    // the blocks in printing order: entry first, then the rest by name.
    fn blocks_in_order(&self) -> impl Iterator<Item = &BasicBlock> {
        let entry = bb_id("entry");
        self.body
            .get(&entry)
            .into_iter()
            .chain(self.body.values().filter(move |bb| bb.id != entry))
    }
}

/// The signature of an external function.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature {
    pub params: Vec<Type>,
    pub ret_ty: Option<Type>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Program {
    pub externs: Map<FuncId, Signature>,
    pub functions: Map<FuncId, Function>,
}

impl Program {
    pub fn validate(self) -> Result<Valid<Program>, ValidationError> {
        validate::validate(self)
    }
}

impl FromStr for Program {
    type Err = ParseError;

    fn from_str(code: &str) -> Result<Self, Self::Err> {
        parse(code)
    }
}

// SECTION: pretty printing in the syntax accepted by the parser

fn write_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T], sep: &str) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, "{sep}")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

fn write_ret_ty(f: &mut fmt::Formatter<'_>, ret_ty: &Option<Type>) -> fmt::Result {
    match ret_ty {
        Some(typ) => write!(f, "{typ}"),
        None => write!(f, "_"),
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Instruction::*;

        match self {
            Alloc { lhs, num, id } => write!(f, "{lhs} = $alloc {num} [{id}]"),
            Arith { lhs, aop, op1, op2 } => write!(f, "{lhs} = $arith {aop} {op1} {op2}"),
            CallExt {
                lhs,
                ext_callee,
                args,
            } => {
                if let Some(lhs) = lhs {
                    write!(f, "{lhs} = ")?;
                }
                write!(f, "$call_ext {ext_callee}(")?;
                write_list(f, args, ", ")?;
                write!(f, ")")
            }
            Cast { lhs, op } => write!(f, "{lhs} = $cast {op}"),
            Cmp { lhs, rop, op1, op2 } => write!(f, "{lhs} = $cmp {rop} {op1} {op2}"),
            Copy { lhs, op } => write!(f, "{lhs} = $copy {op}"),
            Load { lhs, src } => write!(f, "{lhs} = $load {src}"),
            Phi { lhs, args } => {
                write!(f, "{lhs} = $phi")?;
                args.iter()
                    .try_for_each(|(op, bb)| write!(f, " [{op}, {bb}]"))
            }
            Store { dst, op } => write!(f, "$store {dst} {op}"),
            Opaque { lhs, opcode, args } => {
                if let Some(lhs) = lhs {
                    write!(f, "{lhs} = ")?;
                }
                write!(f, "${opcode}")?;
                args.iter().try_for_each(|op| write!(f, " {op}"))
            }
        }
    }
}

impl fmt::Display for Terminal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Terminal::Branch { cond, tt, ff } => write!(f, "$branch {cond} {tt} {ff}"),
            Terminal::CallDirect {
                lhs,
                callee,
                args,
                next_bb,
            } => {
                if let Some(lhs) = lhs {
                    write!(f, "{lhs} = ")?;
                }
                write!(f, "$call_dir {callee}(")?;
                write_list(f, args, ", ")?;
                write!(f, ") then {next_bb}")
            }
            Terminal::Jump(next) => write!(f, "$jump {next}"),
            Terminal::Ret(None) => write!(f, "$ret"),
            Terminal::Ret(Some(op)) => write!(f, "$ret {op}"),
        }
    }
}

impl fmt::Display for BasicBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}:", self.id)?;
        for inst in &self.insts {
            writeln!(f, "  {inst}")?;
        }
        writeln!(f, "  {}", self.term)
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn {}(", self.id)?;
        let params = self
            .params
            .iter()
            .map(|p| format!("{p}:{}", p.typ()))
            .collect::<Vec<_>>();
        write_list(f, &params, ", ")?;
        write!(f, ") -> ")?;
        write_ret_ty(f, &self.ret_ty)?;
        writeln!(f, " {{")?;

        if !self.locals.is_empty() {
            let locals = self
                .locals
                .iter()
                .map(|x| format!("{x}:{}", x.typ()))
                .collect::<Vec<_>>();
            write!(f, "let ")?;
            write_list(f, &locals, ", ")?;
            writeln!(f)?;
        }

        for bb in self.blocks_in_order() {
            write!(f, "{bb}")?;
        }
        writeln!(f, "}}")
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (id, sig) in &self.externs {
            write!(f, "extern {id}: (")?;
            write_list(f, &sig.params, ", ")?;
            write!(f, ") -> ")?;
            write_ret_ty(f, &sig.ret_ty)?;
            writeln!(f)?;
        }
        if !self.externs.is_empty() {
            writeln!(f)?;
        }

        for (i, func) in self.functions.values().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{func}")?;
        }
        Ok(())
    }
}
