// ll(1) parser for lir, with two tokens of lookahead where a line may start
// with either a label or an assignment.

use derive_more::Display;

use super::lexer::{lex, Token, TokenKind};
use super::*;
use TokenKind::*;

// SECTION: interface

pub fn parse(code: &str) -> Result<Program, ParseError> {
    let mut parser = Parser::new(code)?;
    program_r(&mut parser)
}

// A parse error with explanatory message.
#[derive(Clone, Debug, Display, Eq, PartialEq)]
pub struct ParseError(pub String);
impl std::error::Error for ParseError {}

// SECTION: token stream

#[derive(Clone, Debug)]
struct Parser<'a> {
    code: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    // variables visible in the current function, by name.
    scope: Map<String, VarId>,
}

impl<'a> Parser<'a> {
    fn new(code: &'a str) -> Result<Self, ParseError> {
        let tokens = lex(code).map_err(|span| {
            ParseError(format!(
                "lex error at offset {}: unrecognized `{}`",
                span.start,
                &code[span.clone()]
            ))
        })?;
        Ok(Parser {
            code,
            tokens,
            pos: 0,
            scope: Map::new(),
        })
    }

    fn peek_nth(&self, n: usize) -> Option<TokenKind> {
        self.tokens.get(self.pos + n).map(|t| t.kind)
    }

    fn next_is(&self, kind: TokenKind) -> bool {
        self.peek_nth(0) == Some(kind)
    }

    // whether the next token starts an operand.  An identifier followed by `=`
    // or `:` starts the next line instead.
    fn next_is_operand(&self) -> bool {
        match self.peek_nth(0) {
            Some(Num) => true,
            Some(Id) => !matches!(self.peek_nth(1), Some(Gets) | Some(Colon)),
            _ => false,
        }
    }

    // consumes the next token, whatever it is.
    fn bump(&mut self) -> Option<TokenKind> {
        let kind = self.peek_nth(0)?;
        self.pos += 1;
        Some(kind)
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        let found = self.next_is(kind);
        if found {
            self.pos += 1;
        }
        found
    }

    // consumes a token of the given kind and returns its text.
    fn expect(&mut self, kind: TokenKind) -> Result<&'a str, ParseError> {
        if self.eat(kind) {
            Ok(self.slice_prev())
        } else {
            self.error_next(&format!("expected `{kind}`"))
        }
    }

    fn slice_prev(&self) -> &'a str {
        &self.code[self.tokens[self.pos - 1].span.clone()]
    }

    fn error_prev<T>(&self, msg: &str) -> Result<T, ParseError> {
        self.error_at(self.pos - 1, msg)
    }

    fn error_next<T>(&self, msg: &str) -> Result<T, ParseError> {
        self.error_at(self.pos, msg)
    }

    // an error pointing at token `pos`, or at the end of the input.
    fn error_at<T>(&self, pos: usize, msg: &str) -> Result<T, ParseError> {
        let Some(token) = self.tokens.get(pos) else {
            return Err(ParseError(format!("unexpected end of input: {msg}")));
        };

        let before = &self.code[..token.span.start];
        let line = before.matches('\n').count();
        let col = token.span.start - before.rfind('\n').map_or(0, |nl| nl + 1);
        let text = self.code.lines().nth(line).unwrap_or_default();

        Err(ParseError(format!(
            "parse error in line {line}, column {col}\n{text}\n{:>width$}\n{msg}",
            "^",
            width = col + 1
        )))
    }

    fn declare(&mut self, name: &str, typ: Type) -> Result<VarId, ParseError> {
        let var = var_id(name, typ);
        if self.scope.insert(name.to_string(), var.clone()).is_some() {
            return self.error_prev(&format!("`{name}` is declared twice"));
        }
        Ok(var)
    }

    // resolves the identifier just consumed to a declared variable.
    fn lookup_prev(&self) -> Result<VarId, ParseError> {
        let name = self.slice_prev();
        match self.scope.get(name) {
            Some(var) => Ok(var.clone()),
            None => self.error_prev(&format!("undeclared variable `{name}`")),
        }
    }
}

// SECTION: parsing functions

fn program_r(parser: &mut Parser) -> Result<Program, ParseError> {
    let mut program = Program::default();

    while let Some(kind) = parser.peek_nth(0) {
        match kind {
            Extern => {
                let (id, sig) = extern_r(parser)?;
                if program.externs.insert(id.clone(), sig).is_some() {
                    return parser.error_prev(&format!("extern `{id}` is declared twice"));
                }
            }
            Fn => {
                let func = function_r(parser)?;
                let id = func.id.clone();
                if program.functions.insert(id.clone(), func).is_some() {
                    return parser.error_prev(&format!("function `{id}` is defined twice"));
                }
            }
            _ => return parser.error_next("expected `extern` or `fn`"),
        }
    }

    Ok(program)
}

// type.
fn type_r(parser: &mut Parser) -> Result<Type, ParseError> {
    if parser.eat(Address) {
        Ok(ptr_ty(type_r(parser)?))
    } else {
        parser.expect(Int)?;
        Ok(int_ty())
    }
}

// return type: a type or `_` for none.
fn ret_type_r(parser: &mut Parser) -> Result<Option<Type>, ParseError> {
    if parser.eat(Id) {
        if parser.slice_prev() == "_" {
            Ok(None)
        } else {
            parser.error_prev("expected a type or `_`")
        }
    } else {
        type_r(parser).map(Some)
    }
}

// extern name: (types) -> ret
fn extern_r(parser: &mut Parser) -> Result<(FuncId, Signature), ParseError> {
    parser.expect(Extern)?;
    let name = parser.expect(Id)?;
    parser.expect(Colon)?;
    parser.expect(OpenParen)?;

    let mut params = vec![];
    if !parser.next_is(CloseParen) {
        params.push(type_r(parser)?);
        while parser.eat(Comma) {
            params.push(type_r(parser)?);
        }
    }
    parser.expect(CloseParen)?;
    parser.expect(Arrow)?;
    let ret_ty = ret_type_r(parser)?;

    Ok((func_id(name), Signature { params, ret_ty }))
}

// name:type
fn decl_r(parser: &mut Parser) -> Result<VarId, ParseError> {
    let name = parser.expect(Id)?;
    parser.expect(Colon)?;
    let typ = type_r(parser)?;
    parser.declare(name, typ)
}

fn function_r(parser: &mut Parser) -> Result<Function, ParseError> {
    parser.scope.clear();

    parser.expect(Fn)?;
    let id = func_id(parser.expect(Id)?);
    parser.expect(OpenParen)?;

    let mut params = vec![];
    if !parser.next_is(CloseParen) {
        params.push(decl_r(parser)?);
        while parser.eat(Comma) {
            params.push(decl_r(parser)?);
        }
    }
    parser.expect(CloseParen)?;
    parser.expect(Arrow)?;
    let ret_ty = ret_type_r(parser)?;
    parser.expect(OpenBrace)?;

    let mut locals = Set::new();
    if parser.eat(Let) {
        locals.insert(decl_r(parser)?);
        while parser.eat(Comma) {
            locals.insert(decl_r(parser)?);
        }
    }

    let mut body = Map::new();
    while !parser.eat(CloseBrace) {
        let bb = block_r(parser)?;
        if body.contains_key(&bb.id) {
            return parser.error_prev(&format!("block `{}` is defined twice", bb.id));
        }
        body.insert(bb.id.clone(), bb);
    }

    Ok(Function {
        id,
        params,
        ret_ty,
        locals,
        body,
    })
}

// label: instructions terminal
fn block_r(parser: &mut Parser) -> Result<BasicBlock, ParseError> {
    let id = bb_id(parser.expect(Id)?);
    parser.expect(Colon)?;

    let mut insts = vec![];
    loop {
        match line_r(parser)? {
            Line::Inst(inst) => insts.push(inst),
            Line::Term(term) => return Ok(BasicBlock { id, insts, term }),
        }
    }
}

enum Line {
    Inst(Instruction),
    Term(Terminal),
}

fn operand_r(parser: &mut Parser) -> Result<Operand, ParseError> {
    match parser.bump() {
        Some(Num) => match parser.slice_prev().parse::<i32>() {
            Ok(n) => Ok(Operand::CInt(n)),
            Err(_) => parser.error_prev("integer literal out of range"),
        },
        Some(Id) => Ok(Operand::Var(parser.lookup_prev()?)),
        _ => parser.error_prev("expected an operand"),
    }
}

fn var_r(parser: &mut Parser) -> Result<VarId, ParseError> {
    parser.expect(Id)?;
    parser.lookup_prev()
}

// (op, op, ...)
fn args_r(parser: &mut Parser) -> Result<Vec<Operand>, ParseError> {
    parser.expect(OpenParen)?;
    let mut args = vec![];
    if !parser.next_is(CloseParen) {
        args.push(operand_r(parser)?);
        while parser.eat(Comma) {
            args.push(operand_r(parser)?);
        }
    }
    parser.expect(CloseParen)?;
    Ok(args)
}

fn arith_op_r(parser: &mut Parser) -> Result<ArithmeticOp, ParseError> {
    match parser.expect(Id)? {
        "add" => Ok(ArithmeticOp::Add),
        "sub" => Ok(ArithmeticOp::Subtract),
        "mul" => Ok(ArithmeticOp::Multiply),
        "div" => Ok(ArithmeticOp::Divide),
        op => parser.error_prev(&format!("unknown arithmetic operator `{op}`")),
    }
}

fn cmp_op_r(parser: &mut Parser) -> Result<ComparisonOp, ParseError> {
    match parser.expect(Id)? {
        "eq" => Ok(ComparisonOp::Eq),
        "neq" => Ok(ComparisonOp::Neq),
        "lt" => Ok(ComparisonOp::Less),
        "lte" => Ok(ComparisonOp::LessEq),
        "gt" => Ok(ComparisonOp::Greater),
        "gte" => Ok(ComparisonOp::GreaterEq),
        op => parser.error_prev(&format!("unknown comparison operator `{op}`")),
    }
}

// opcodes that must define a variable.
fn needs_lhs(parser: &Parser, opcode: &str, lhs: Option<VarId>) -> Result<VarId, ParseError> {
    match lhs {
        Some(lhs) => Ok(lhs),
        None => parser.error_prev(&format!("`{opcode}` must be assigned to a variable")),
    }
}

// opcodes that must not define a variable.
fn no_lhs(parser: &Parser, opcode: &str, lhs: &Option<VarId>) -> Result<(), ParseError> {
    match lhs {
        Some(_) => parser.error_prev(&format!("`{opcode}` does not produce a value")),
        None => Ok(()),
    }
}

// one instruction or terminal: [x =] $opcode ...
fn line_r(parser: &mut Parser) -> Result<Line, ParseError> {
    let lhs = if parser.next_is(Id) {
        let lhs = var_r(parser)?;
        parser.expect(Gets)?;
        Some(lhs)
    } else {
        None
    };

    let opcode = parser.expect(Opcode)?;

    let inst = match opcode {
        "$alloc" => {
            let lhs = needs_lhs(parser, opcode, lhs)?;
            let num = operand_r(parser)?;
            parser.expect(OpenBracket)?;
            let id = parser.expect(Id)?.to_string();
            parser.expect(CloseBracket)?;
            Instruction::Alloc { lhs, num, id }
        }
        "$arith" => {
            let lhs = needs_lhs(parser, opcode, lhs)?;
            let aop = arith_op_r(parser)?;
            let op1 = operand_r(parser)?;
            let op2 = operand_r(parser)?;
            Instruction::Arith { lhs, aop, op1, op2 }
        }
        "$call_ext" => {
            let ext_callee = func_id(parser.expect(Id)?);
            let args = args_r(parser)?;
            Instruction::CallExt {
                lhs,
                ext_callee,
                args,
            }
        }
        "$cast" => {
            let lhs = needs_lhs(parser, opcode, lhs)?;
            let op = operand_r(parser)?;
            Instruction::Cast { lhs, op }
        }
        "$cmp" => {
            let lhs = needs_lhs(parser, opcode, lhs)?;
            let rop = cmp_op_r(parser)?;
            let op1 = operand_r(parser)?;
            let op2 = operand_r(parser)?;
            Instruction::Cmp { lhs, rop, op1, op2 }
        }
        "$copy" => {
            let lhs = needs_lhs(parser, opcode, lhs)?;
            let op = operand_r(parser)?;
            Instruction::Copy { lhs, op }
        }
        "$load" => {
            let lhs = needs_lhs(parser, opcode, lhs)?;
            let src = var_r(parser)?;
            Instruction::Load { lhs, src }
        }
        "$phi" => {
            let lhs = needs_lhs(parser, opcode, lhs)?;
            let mut args = vec![];
            while parser.eat(OpenBracket) {
                let op = operand_r(parser)?;
                parser.expect(Comma)?;
                let bb = bb_id(parser.expect(Id)?);
                parser.expect(CloseBracket)?;
                args.push((op, bb));
            }
            if args.is_empty() {
                return parser.error_next("`$phi` needs at least one incoming value");
            }
            Instruction::Phi { lhs, args }
        }
        "$store" => {
            no_lhs(parser, opcode, &lhs)?;
            let dst = var_r(parser)?;
            let op = operand_r(parser)?;
            Instruction::Store { dst, op }
        }

        // terminals
        "$branch" => {
            no_lhs(parser, opcode, &lhs)?;
            let cond = operand_r(parser)?;
            let tt = bb_id(parser.expect(Id)?);
            let ff = bb_id(parser.expect(Id)?);
            return Ok(Line::Term(Terminal::Branch { cond, tt, ff }));
        }
        "$call_dir" => {
            let callee = func_id(parser.expect(Id)?);
            let args = args_r(parser)?;
            parser.expect(Then)?;
            let next_bb = bb_id(parser.expect(Id)?);
            return Ok(Line::Term(Terminal::CallDirect {
                lhs,
                callee,
                args,
                next_bb,
            }));
        }
        "$jump" => {
            no_lhs(parser, opcode, &lhs)?;
            let next = bb_id(parser.expect(Id)?);
            return Ok(Line::Term(Terminal::Jump(next)));
        }
        "$ret" => {
            no_lhs(parser, opcode, &lhs)?;
            let op = if parser.next_is_operand() {
                Some(operand_r(parser)?)
            } else {
                None
            };
            return Ok(Line::Term(Terminal::Ret(op)));
        }

        _ => {
            let mut args = vec![];
            while parser.next_is_operand() {
                args.push(operand_r(parser)?);
            }
            Instruction::Opaque {
                lhs,
                opcode: opcode.trim_start_matches('$').to_string(),
                args,
            }
        }
    };

    Ok(Line::Inst(inst))
}
