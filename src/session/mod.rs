use tracing::debug;

use crate::compiler::{CompileError, Compiler, SymbolTable};
use crate::object::Object;
use crate::parser::{self, SyntaxError};
use crate::vm::{Vm, VmError};

#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error(transparent)]
    Syntax(#[from] SyntaxError),
    #[error("compile error: {0}")]
    Compile(#[from] CompileError),
    #[error("runtime error: {0}")]
    Runtime(#[from] VmError),
}

/// Compiler and VM state carried from one input to the next, so names bound
/// by earlier lines stay visible. Globals written before a runtime error are
/// kept.
#[derive(Default)]
pub struct Session {
    symbol_table: SymbolTable,
    constants: Vec<Object>,
    globals: Vec<Option<Object>>,
}

impl Session {
    pub fn new() -> Self {
        Session::default()
    }

    /// Compile and run one chunk of source. Returns the last popped value,
    /// `None` when the chunk popped nothing (e.g. only `let` statements).
    pub fn eval(&mut self, source: &str) -> Result<Option<Object>, EvalError> {
        let program = parser::parse_source(source)?;

        let symbol_table = std::mem::take(&mut self.symbol_table);
        let constants = std::mem::take(&mut self.constants);
        let mut compiler = Compiler::new_with_state(symbol_table, constants);
        let compiled = compiler.compile(&program);
        let bytecode = compiler.bytecode();
        (self.symbol_table, self.constants) = compiler.into_state();
        compiled?;

        let globals = std::mem::take(&mut self.globals);
        let mut vm = Vm::new_with_globals(bytecode, globals);
        let ran = vm.run();
        let result = vm.last_popped().cloned();
        self.globals = vm.into_globals();
        ran?;

        debug!(constants = self.constants.len(), "session input evaluated");
        Ok(result)
    }
}
