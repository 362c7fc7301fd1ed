pub mod symbol_table;

use std::fmt::Write as _;
use std::rc::Rc;

use tracing::debug;

use crate::ast::*;
use crate::builtins::Builtin;
use crate::code::{self, Instructions, Opcode};
use crate::object::{CompiledFunction, Object};

pub use symbol_table::{Symbol, SymbolScope, SymbolTable};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileError {
    #[error("unknown operator: {op}")]
    UnknownInfixOperator { op: String },
    #[error("unknown operator: {op}")]
    UnknownPrefixOperator { op: String },
    #[error("undefined variable {name}")]
    UndefinedVariable { name: String },
    #[error("operand {operand} does not fit in {op}")]
    OperandTooLarge { op: &'static str, operand: usize },
}

type Result<T> = std::result::Result<T, CompileError>;

/// Compiler output: the top-level instruction stream and the constant pool
/// shared by every function in it.
#[derive(Debug, Clone, PartialEq)]
pub struct Bytecode {
    pub instructions: Instructions,
    pub constants: Vec<Object>,
}

impl Bytecode {
    /// Top-level listing followed by every compiled function in the pool.
    pub fn disassemble(&self) -> String {
        let mut out = code::disassemble(&self.instructions);
        for (i, constant) in self.constants.iter().enumerate() {
            match constant {
                Object::CompiledFunction(func) => {
                    let _ = writeln!(
                        out,
                        "\nconstant {} fn (params={}, locals={})",
                        i, func.num_parameters, func.num_locals
                    );
                    for line in func.disassemble().lines() {
                        let _ = writeln!(out, "  {}", line);
                    }
                }
                other => {
                    let _ = writeln!(out, "\nconstant {} {} {}", i, other.type_name(), other);
                }
            }
        }
        out
    }
}

// ── Compilation scopes ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct EmittedInstruction {
    opcode: Opcode,
    position: usize,
}

/// Instruction buffer of the function body currently being compiled.
#[derive(Debug, Clone, Default)]
struct CompilationScope {
    instructions: Instructions,
    last_instruction: Option<EmittedInstruction>,
    previous_instruction: Option<EmittedInstruction>,
}

pub struct Compiler {
    constants: Vec<Object>,
    symbol_table: SymbolTable,
    scope: CompilationScope,
    enclosing_scopes: Vec<CompilationScope>,
}

impl Default for Compiler {
    fn default() -> Self {
        Compiler::new()
    }
}

impl Compiler {
    pub fn new() -> Self {
        Compiler::new_with_state(SymbolTable::new(), Vec::new())
    }

    /// Continue from an earlier compilation's globals and constants, as a
    /// REPL does line after line. Built-ins are (re)bound either way.
    pub fn new_with_state(mut symbol_table: SymbolTable, constants: Vec<Object>) -> Self {
        for builtin in Builtin::ALL {
            symbol_table.define_builtin(builtin.index(), builtin.name());
        }
        Compiler {
            constants,
            symbol_table,
            scope: CompilationScope::default(),
            enclosing_scopes: Vec::new(),
        }
    }

    /// Hand the symbol table and constant pool back for the next compilation.
    pub fn into_state(self) -> (SymbolTable, Vec<Object>) {
        (self.symbol_table, self.constants)
    }

    pub fn bytecode(&self) -> Bytecode {
        Bytecode {
            instructions: self.scope.instructions.clone(),
            constants: self.constants.clone(),
        }
    }

    pub fn symbol_table(&self) -> &SymbolTable {
        &self.symbol_table
    }

    /// Number of function scopes entered and not yet left.
    pub fn scope_depth(&self) -> usize {
        self.enclosing_scopes.len()
    }

    pub fn compile(&mut self, program: &Program) -> Result<()> {
        for stmt in &program.statements {
            self.compile_stmt(stmt)?;
        }
        debug!(
            bytes = self.scope.instructions.len(),
            constants = self.constants.len(),
            "compiled program"
        );
        Ok(())
    }

    fn compile_block(&mut self, block: &Block) -> Result<()> {
        for stmt in &block.statements {
            self.compile_stmt(stmt)?;
        }
        Ok(())
    }

    fn compile_stmt(&mut self, stmt: &Stmt) -> Result<()> {
        match stmt {
            Stmt::Expr(expr) => {
                self.compile_expr(expr)?;
                self.emit(Opcode::Pop, &[])?;
            }
            Stmt::Let { name, value } => {
                let symbol = self.symbol_table.define(name);
                self.compile_expr(value)?;
                let op = match symbol.scope {
                    SymbolScope::Global => Opcode::SetGlobal,
                    _ => Opcode::SetLocal,
                };
                self.emit(op, &[symbol.index])?;
            }
            Stmt::Return(value) => {
                self.compile_expr(value)?;
                self.emit(Opcode::ReturnValue, &[])?;
            }
        }
        Ok(())
    }

    fn compile_expr(&mut self, expr: &Expr) -> Result<()> {
        match expr {
            Expr::Int(value) => {
                let index = self.add_constant(Object::Integer(*value));
                self.emit(Opcode::Constant, &[index])?;
            }
            Expr::Str(value) => {
                let index = self.add_constant(Object::string(value.as_str()));
                self.emit(Opcode::Constant, &[index])?;
            }
            Expr::Bool(value) => {
                self.emit(if *value { Opcode::True } else { Opcode::False }, &[])?;
            }
            Expr::Ident(name) => {
                let symbol = self
                    .symbol_table
                    .resolve(name)
                    .ok_or_else(|| CompileError::UndefinedVariable { name: name.clone() })?;
                self.load_symbol(&symbol)?;
            }
            Expr::Prefix { op, right } => {
                self.compile_expr(right)?;
                let opcode = match op.as_str() {
                    "!" => Opcode::Bang,
                    "-" => Opcode::Minus,
                    _ => return Err(CompileError::UnknownPrefixOperator { op: op.clone() }),
                };
                self.emit(opcode, &[])?;
            }
            Expr::Infix { op, left, right } => {
                // `a < b` runs as `b > a`: the right operand is evaluated first.
                if op == "<" {
                    self.compile_expr(right)?;
                    self.compile_expr(left)?;
                    self.emit(Opcode::GreaterThan, &[])?;
                    return Ok(());
                }
                self.compile_expr(left)?;
                self.compile_expr(right)?;
                let opcode = match op.as_str() {
                    "+" => Opcode::Add,
                    "-" => Opcode::Sub,
                    "*" => Opcode::Mul,
                    "/" => Opcode::Div,
                    ">" => Opcode::GreaterThan,
                    "==" => Opcode::Equal,
                    "!=" => Opcode::NotEqual,
                    _ => return Err(CompileError::UnknownInfixOperator { op: op.clone() }),
                };
                self.emit(opcode, &[])?;
            }
            Expr::If { condition, consequence, alternative } => {
                self.compile_if(condition, consequence, alternative.as_ref())?;
            }
            Expr::Function(lit) => self.compile_function(lit)?,
            Expr::Call { function, arguments } => {
                self.compile_expr(function)?;
                for arg in arguments {
                    self.compile_expr(arg)?;
                }
                self.emit(Opcode::Call, &[arguments.len()])?;
            }
            Expr::Array(elements) => {
                for element in elements {
                    self.compile_expr(element)?;
                }
                self.emit(Opcode::Array, &[elements.len()])?;
            }
            Expr::Hash(pairs) => {
                for (key, value) in pairs {
                    self.compile_expr(key)?;
                    self.compile_expr(value)?;
                }
                self.emit(Opcode::Hash, &[pairs.len() * 2])?;
            }
            Expr::Index { left, index } => {
                self.compile_expr(left)?;
                self.compile_expr(index)?;
                self.emit(Opcode::Index, &[])?;
            }
        }
        Ok(())
    }

    fn compile_if(
        &mut self,
        condition: &Expr,
        consequence: &Block,
        alternative: Option<&Block>,
    ) -> Result<()> {
        self.compile_expr(condition)?;
        let jump_not_truthy = self.emit_jump_placeholder(Opcode::JumpNotTruthy)?;

        self.compile_block(consequence)?;
        if self.last_instruction_is(Opcode::Pop) {
            self.remove_last_pop();
        }

        let jump = self.emit_jump_placeholder(Opcode::Jump)?;
        self.patch_jump(jump_not_truthy, Opcode::JumpNotTruthy)?;

        match alternative {
            Some(block) => {
                self.compile_block(block)?;
                if self.last_instruction_is(Opcode::Pop) {
                    self.remove_last_pop();
                }
            }
            None => {
                self.emit(Opcode::Null, &[])?;
            }
        }
        self.patch_jump(jump, Opcode::Jump)
    }

    fn compile_function(&mut self, lit: &FunctionLiteral) -> Result<()> {
        self.enter_scope();
        let body = self.compile_function_body(lit);
        let (instructions, table) = self.leave_scope();
        body?;

        let free_symbols = table.free_symbols();
        for free in free_symbols {
            self.load_symbol(free)?;
        }
        let func = CompiledFunction {
            instructions,
            num_locals: table.num_definitions(),
            num_parameters: lit.parameters.len(),
        };
        let index = self.add_constant(Object::CompiledFunction(Rc::new(func)));
        self.emit(Opcode::Closure, &[index, free_symbols.len()])?;
        Ok(())
    }

    fn compile_function_body(&mut self, lit: &FunctionLiteral) -> Result<()> {
        if let Some(name) = &lit.name {
            self.symbol_table.define_function_name(name);
        }
        for param in &lit.parameters {
            self.symbol_table.define(param);
        }
        self.compile_block(&lit.body)?;

        // Implicit return of the last expression statement.
        if self.last_instruction_is(Opcode::Pop) {
            self.replace_last_pop_with_return();
        }
        if !self.last_instruction_is(Opcode::ReturnValue) {
            self.emit(Opcode::Return, &[])?;
        }
        Ok(())
    }

    fn load_symbol(&mut self, symbol: &Symbol) -> Result<usize> {
        match symbol.scope {
            SymbolScope::Global => self.emit(Opcode::GetGlobal, &[symbol.index]),
            SymbolScope::Local => self.emit(Opcode::GetLocal, &[symbol.index]),
            SymbolScope::Builtin => self.emit(Opcode::GetBuiltin, &[symbol.index]),
            SymbolScope::Free => self.emit(Opcode::GetFree, &[symbol.index]),
            SymbolScope::Function => self.emit(Opcode::CurrentClosure, &[]),
        }
    }

    // ── Emission ─────────────────────────────────────────────────────

    fn add_constant(&mut self, obj: Object) -> usize {
        self.constants.push(obj);
        self.constants.len() - 1
    }

    fn emit(&mut self, op: Opcode, operands: &[usize]) -> Result<usize> {
        check_operands(op, operands)?;
        let ins = code::make(op, operands);
        let position = self.scope.instructions.len();
        self.scope.instructions.extend_from_slice(&ins);
        self.scope.previous_instruction = self.scope.last_instruction;
        self.scope.last_instruction = Some(EmittedInstruction { opcode: op, position });
        Ok(position)
    }

    /// Jump with a placeholder target, to be fixed by [`Compiler::patch_jump`].
    fn emit_jump_placeholder(&mut self, op: Opcode) -> Result<usize> {
        self.emit(op, &[JUMP_PLACEHOLDER])
    }

    /// Point the jump at `position` to the current end of the instruction buffer.
    fn patch_jump(&mut self, position: usize, op: Opcode) -> Result<()> {
        let target = self.scope.instructions.len();
        check_operands(op, &[target])?;
        self.replace_instruction(position, &code::make(op, &[target]));
        Ok(())
    }

    fn replace_instruction(&mut self, position: usize, ins: &[u8]) {
        self.scope.instructions[position..position + ins.len()].copy_from_slice(ins);
    }

    fn last_instruction_is(&self, op: Opcode) -> bool {
        self.scope.last_instruction.is_some_and(|last| last.opcode == op)
    }

    fn remove_last_pop(&mut self) {
        if let Some(last) = self.scope.last_instruction {
            self.scope.instructions.truncate(last.position);
            self.scope.last_instruction = self.scope.previous_instruction;
        }
    }

    fn replace_last_pop_with_return(&mut self) {
        if let Some(last) = self.scope.last_instruction.as_mut() {
            let position = last.position;
            last.opcode = Opcode::ReturnValue;
            self.replace_instruction(position, &code::make(Opcode::ReturnValue, &[]));
        }
    }

    pub fn enter_scope(&mut self) {
        let outer = std::mem::take(&mut self.scope);
        self.enclosing_scopes.push(outer);
        let outer_table = std::mem::take(&mut self.symbol_table);
        self.symbol_table = SymbolTable::new_enclosed(outer_table);
        debug!(depth = self.scope_depth(), "entered scope");
    }

    /// Close the current function scope, returning its instructions and its
    /// symbol table (free symbols and local count).
    pub fn leave_scope(&mut self) -> (Instructions, SymbolTable) {
        let outer = self.enclosing_scopes.pop().unwrap_or_default();
        let scope = std::mem::replace(&mut self.scope, outer);
        let outer_table = self.symbol_table.take_outer().unwrap_or_default();
        let table = std::mem::replace(&mut self.symbol_table, outer_table);
        debug!(
            depth = self.scope_depth(),
            free = table.free_symbols().len(),
            locals = table.num_definitions(),
            "left scope"
        );
        (scope.instructions, table)
    }

    /// Instructions of the scope currently being compiled.
    pub fn current_instructions(&self) -> &[u8] {
        &self.scope.instructions
    }
}

const JUMP_PLACEHOLDER: usize = 9999;

fn check_operands(op: Opcode, operands: &[usize]) -> Result<()> {
    let def = op.definition();
    for (operand, width) in operands.iter().zip(def.operand_widths) {
        if *width < usize::BITS as usize / 8 && *operand >> (width * 8) != 0 {
            return Err(CompileError::OperandTooLarge { op: def.name, operand: *operand });
        }
    }
    Ok(())
}
