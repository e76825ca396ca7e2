// tests for the dataflow framework and the divide-by-zero analysis.

mod framework;

use crate::middle_end::lir::*;

// parses and validates a program, panicking with the error message on failure.
pub(super) fn program(code: &str) -> Valid<Program> {
    let program = code.parse::<Program>().unwrap_or_else(|err| panic!("{err}"));
    program.validate().unwrap_or_else(|err| panic!("{err}"))
}

// the function named `test` in the given program.
pub(super) fn test_fn(program: &Valid<Program>) -> &Function {
    &program.inner().functions[&func_id("test")]
}
