pub mod frame;

use std::collections::HashMap;
use std::rc::Rc;

use tracing::{debug, trace};

use crate::builtins::Builtin;
use crate::code::{self, Opcode};
use crate::compiler::Bytecode;
use crate::object::{Closure, CompiledFunction, HashPair, Object};

pub use frame::Frame;

pub const STACK_SIZE: usize = 2048;
pub const GLOBALS_SIZE: usize = 65536;
pub const MAX_FRAMES: usize = 1024;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VmError {
    #[error("stack overflow")]
    StackOverflow,
    #[error("stack underflow")]
    StackUnderflow,
    #[error("frame overflow: more than {MAX_FRAMES} nested calls")]
    FrameOverflow,
    #[error("unknown opcode: {op}")]
    UnknownOpcode { op: u8 },
    #[error("truncated instruction at {ip}")]
    TruncatedInstruction { ip: usize },
    #[error("constant {index} is missing or not a function")]
    InvalidConstant { index: usize },
    #[error("no free variable at index {index}")]
    InvalidFreeIndex { index: usize },
    #[error("no builtin at index {index}")]
    UnknownBuiltin { index: usize },
    #[error("global {index} read before it was set")]
    UninitializedGlobal { index: usize },
    #[error("local {index} read before it was set")]
    UninitializedLocal { index: usize },
    #[error("unsupported types for binary operation: {left} {op} {right}")]
    UnsupportedBinaryOperands { op: &'static str, left: &'static str, right: &'static str },
    #[error("unknown integer operator: {op}")]
    UnknownIntegerOperator { op: &'static str },
    #[error("unknown string operator: {op}")]
    UnknownStringOperator { op: &'static str },
    #[error("unknown operator: {left} {op} {right}")]
    UnknownOperator { op: &'static str, left: &'static str, right: &'static str },
    #[error("unsupported type for negation: {type_name}")]
    UnsupportedNegation { type_name: &'static str },
    #[error("division by zero")]
    DivisionByZero,
    #[error("calling non-function and non-built-in: {type_name}")]
    NotCallable { type_name: &'static str },
    #[error("wrong number of arguments: want={want}, got={got}")]
    WrongArity { want: usize, got: usize },
    #[error("unusable as hash key: {type_name}")]
    UnusableHashKey { type_name: &'static str },
    #[error("index operator not supported: {type_name}")]
    IndexNotSupported { type_name: &'static str },
}

type VmResult<T> = Result<T, VmError>;

// ── VM ───────────────────────────────────────────────────────────────

/// Stack machine executing one compiled program. The top-level instructions
/// run as the body of an implicit zero-argument closure.
pub struct Vm {
    constants: Vec<Object>,
    stack: Vec<Option<Object>>,
    /// Next free stack slot; the top of stack is `stack[sp - 1]`.
    sp: usize,
    globals: Vec<Option<Object>>,
    frame: Frame,
    callers: Vec<Frame>,
    last_popped: Option<Object>,
}

impl Vm {
    pub fn new(bytecode: Bytecode) -> Self {
        Vm::new_with_globals(bytecode, Vec::new())
    }

    /// Run against globals left behind by an earlier program.
    pub fn new_with_globals(bytecode: Bytecode, mut globals: Vec<Option<Object>>) -> Self {
        globals.resize(GLOBALS_SIZE, None);
        let main = CompiledFunction {
            instructions: bytecode.instructions,
            num_locals: 0,
            num_parameters: 0,
        };
        let main = Rc::new(Closure { func: Rc::new(main), free: Vec::new() });
        Vm {
            constants: bytecode.constants,
            stack: vec![None; STACK_SIZE],
            sp: 0,
            globals,
            frame: Frame::new(main, 0),
            callers: Vec::with_capacity(64),
            last_popped: None,
        }
    }

    /// Value discarded by the most recent expression statement, or returned
    /// by a top-level `return`. `None` when the program popped nothing.
    pub fn last_popped(&self) -> Option<&Object> {
        self.last_popped.as_ref()
    }

    pub fn stack_top(&self) -> Option<&Object> {
        let top = self.sp.checked_sub(1)?;
        self.stack[top].as_ref()
    }

    pub fn stack_depth(&self) -> usize {
        self.sp
    }

    pub fn globals(&self) -> &[Option<Object>] {
        &self.globals
    }

    pub fn into_globals(self) -> Vec<Option<Object>> {
        self.globals
    }

    pub fn run(&mut self) -> VmResult<()> {
        debug!(
            bytes = self.frame.instructions().len(),
            constants = self.constants.len(),
            "vm run started"
        );
        let result = self.execute();
        match &result {
            Ok(()) => debug!(sp = self.sp, "vm run finished"),
            Err(err) => debug!(error = %err, depth = self.callers.len(), "vm run failed"),
        }
        result
    }

    fn execute(&mut self) -> VmResult<()> {
        loop {
            let Some(op) = self.read_opcode()? else {
                if self.callers.is_empty() {
                    return Ok(());
                }
                // Ran off the end of a body without a return.
                self.return_from_call(Object::NULL)?;
                continue;
            };

            match op {
                Opcode::Constant => {
                    let index = self.read_u16()?;
                    let constant = self
                        .constants
                        .get(index)
                        .cloned()
                        .ok_or(VmError::InvalidConstant { index })?;
                    self.push(constant)?;
                }
                Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div => {
                    self.execute_binary_operation(op)?;
                }
                Opcode::Equal | Opcode::NotEqual | Opcode::GreaterThan => {
                    self.execute_comparison(op)?;
                }
                Opcode::Bang => {
                    let operand = self.pop()?;
                    self.push(Object::from_bool(!operand.is_truthy()))?;
                }
                Opcode::Minus => match self.pop()? {
                    Object::Integer(v) => self.push(Object::Integer(v.wrapping_neg()))?,
                    other => {
                        return Err(VmError::UnsupportedNegation { type_name: other.type_name() });
                    }
                },
                Opcode::True => self.push(Object::TRUE)?,
                Opcode::False => self.push(Object::FALSE)?,
                Opcode::Null => self.push(Object::NULL)?,
                Opcode::Pop => {
                    self.last_popped = Some(self.pop()?);
                }
                Opcode::Jump => {
                    let target = self.read_u16()?;
                    self.frame.ip = target;
                }
                Opcode::JumpNotTruthy => {
                    let target = self.read_u16()?;
                    let condition = self.pop()?;
                    if !condition.is_truthy() {
                        self.frame.ip = target;
                    }
                }
                Opcode::SetGlobal => {
                    let index = self.read_u16()?;
                    let value = self.pop()?;
                    self.globals[index] = Some(value);
                }
                Opcode::GetGlobal => {
                    let index = self.read_u16()?;
                    let value = self.globals[index]
                        .clone()
                        .ok_or(VmError::UninitializedGlobal { index })?;
                    self.push(value)?;
                }
                Opcode::SetLocal => {
                    let index = self.read_u8()?;
                    let value = self.pop()?;
                    let slot = self
                        .stack
                        .get_mut(self.frame.base_pointer + index)
                        .ok_or(VmError::StackOverflow)?;
                    *slot = Some(value);
                }
                Opcode::GetLocal => {
                    let index = self.read_u8()?;
                    let value = self
                        .stack
                        .get(self.frame.base_pointer + index)
                        .cloned()
                        .flatten()
                        .ok_or(VmError::UninitializedLocal { index })?;
                    self.push(value)?;
                }
                Opcode::GetFree => {
                    let index = self.read_u8()?;
                    let value = self
                        .frame
                        .closure
                        .free
                        .get(index)
                        .cloned()
                        .ok_or(VmError::InvalidFreeIndex { index })?;
                    self.push(value)?;
                }
                Opcode::GetBuiltin => {
                    let index = self.read_u8()?;
                    let builtin =
                        Builtin::from_index(index).ok_or(VmError::UnknownBuiltin { index })?;
                    self.push(Object::Builtin(builtin))?;
                }
                Opcode::CurrentClosure => {
                    let current = Rc::clone(&self.frame.closure);
                    self.push(Object::Closure(current))?;
                }
                Opcode::Array => {
                    let count = self.read_u16()?;
                    let elements = self.take_top(count)?;
                    self.push(Object::array(elements))?;
                }
                Opcode::Hash => {
                    let count = self.read_u16()?;
                    let items = self.take_top(count)?;
                    let hash = build_hash(items)?;
                    self.push(hash)?;
                }
                Opcode::Index => {
                    let index = self.pop()?;
                    let left = self.pop()?;
                    self.push(index_value(&left, &index)?)?;
                }
                Opcode::Call => {
                    let num_args = self.read_u8()?;
                    self.call_value(num_args)?;
                }
                Opcode::ReturnValue => {
                    let value = self.pop()?;
                    if self.callers.is_empty() {
                        self.finish_with(value);
                        return Ok(());
                    }
                    self.return_from_call(value)?;
                }
                Opcode::Return => {
                    if self.callers.is_empty() {
                        self.finish_with(Object::NULL);
                        return Ok(());
                    }
                    self.return_from_call(Object::NULL)?;
                }
                Opcode::Closure => {
                    let index = self.read_u16()?;
                    let num_free = self.read_u8()?;
                    self.push_closure(index, num_free)?;
                }
            }
        }
    }

    // ── Fetch ────────────────────────────────────────────────────────

    fn read_opcode(&mut self) -> VmResult<Option<Opcode>> {
        let Some(&byte) = self.frame.instructions().get(self.frame.ip) else {
            return Ok(None);
        };
        self.frame.ip += 1;
        Opcode::from_byte(byte).map(Some).ok_or(VmError::UnknownOpcode { op: byte })
    }

    fn read_u16(&mut self) -> VmResult<usize> {
        let ip = self.frame.ip;
        let value = self
            .frame
            .instructions()
            .get(ip..)
            .and_then(code::read_u16)
            .ok_or(VmError::TruncatedInstruction { ip })? as usize;
        self.frame.ip += 2;
        Ok(value)
    }

    fn read_u8(&mut self) -> VmResult<usize> {
        let ip = self.frame.ip;
        let value = self
            .frame
            .instructions()
            .get(ip..)
            .and_then(code::read_u8)
            .ok_or(VmError::TruncatedInstruction { ip })? as usize;
        self.frame.ip += 1;
        Ok(value)
    }

    // ── Stack ────────────────────────────────────────────────────────

    fn push(&mut self, obj: Object) -> VmResult<()> {
        if self.sp >= STACK_SIZE {
            return Err(VmError::StackOverflow);
        }
        self.stack[self.sp] = Some(obj);
        self.sp += 1;
        Ok(())
    }

    fn pop(&mut self) -> VmResult<Object> {
        let top = self.sp.checked_sub(1).ok_or(VmError::StackUnderflow)?;
        let obj = self.stack[top].take().ok_or(VmError::StackUnderflow)?;
        self.sp = top;
        Ok(obj)
    }

    /// Remove the top `count` values, bottom-most first.
    fn take_top(&mut self, count: usize) -> VmResult<Vec<Object>> {
        let start = self.sp.checked_sub(count).ok_or(VmError::StackUnderflow)?;
        let items = self.stack[start..self.sp]
            .iter_mut()
            .map(|slot| slot.take().ok_or(VmError::StackUnderflow))
            .collect::<VmResult<Vec<_>>>()?;
        self.sp = start;
        Ok(items)
    }

    /// A return from the top-level program ends the run with `value` as the
    /// last popped element.
    fn finish_with(&mut self, value: Object) {
        self.sp = 0;
        self.last_popped = Some(value);
    }

    // ── Operators ────────────────────────────────────────────────────

    fn execute_binary_operation(&mut self, op: Opcode) -> VmResult<()> {
        let right = self.pop()?;
        let left = self.pop()?;
        let result = match (&left, &right) {
            (Object::Integer(l), Object::Integer(r)) => {
                Object::Integer(integer_arithmetic(op, *l, *r)?)
            }
            (Object::Str(l), Object::Str(r)) => {
                if op != Opcode::Add {
                    return Err(VmError::UnknownStringOperator { op: operator_symbol(op) });
                }
                let mut joined = String::with_capacity(l.len() + r.len());
                joined.push_str(l);
                joined.push_str(r);
                Object::string(joined)
            }
            _ => {
                return Err(VmError::UnsupportedBinaryOperands {
                    op: operator_symbol(op),
                    left: left.type_name(),
                    right: right.type_name(),
                });
            }
        };
        self.push(result)
    }

    fn execute_comparison(&mut self, op: Opcode) -> VmResult<()> {
        let right = self.pop()?;
        let left = self.pop()?;
        let result = match (&left, &right) {
            (Object::Integer(l), Object::Integer(r)) => match op {
                Opcode::Equal => l == r,
                Opcode::NotEqual => l != r,
                Opcode::GreaterThan => l > r,
                _ => return Err(VmError::UnknownIntegerOperator { op: operator_symbol(op) }),
            },
            _ => match op {
                Opcode::Equal => left.is_identical(&right),
                Opcode::NotEqual => !left.is_identical(&right),
                _ => {
                    return Err(VmError::UnknownOperator {
                        op: operator_symbol(op),
                        left: left.type_name(),
                        right: right.type_name(),
                    });
                }
            },
        };
        self.push(Object::from_bool(result))
    }

    // ── Calls ────────────────────────────────────────────────────────

    fn call_value(&mut self, num_args: usize) -> VmResult<()> {
        let callee_slot = self
            .sp
            .checked_sub(num_args + 1)
            .ok_or(VmError::StackUnderflow)?;
        let callee = self.stack[callee_slot].clone().ok_or(VmError::StackUnderflow)?;
        match callee {
            Object::Closure(closure) => self.call_closure(closure, num_args),
            Object::Builtin(builtin) => self.call_builtin(builtin, num_args),
            other => Err(VmError::NotCallable { type_name: other.type_name() }),
        }
    }

    fn call_closure(&mut self, closure: Rc<Closure>, num_args: usize) -> VmResult<()> {
        let func = &closure.func;
        if num_args != func.num_parameters {
            return Err(VmError::WrongArity { want: func.num_parameters, got: num_args });
        }
        if self.callers.len() + 1 >= MAX_FRAMES {
            return Err(VmError::FrameOverflow);
        }
        let base_pointer = self.sp - num_args;
        let top = base_pointer + func.num_locals.max(num_args);
        if top > STACK_SIZE {
            return Err(VmError::StackOverflow);
        }
        // Locals past the arguments may hold values from an earlier call.
        for slot in &mut self.stack[base_pointer + num_args..top] {
            *slot = None;
        }

        let caller = std::mem::replace(&mut self.frame, Frame::new(closure, base_pointer));
        self.callers.push(caller);
        self.sp = top;
        trace!(depth = self.callers.len(), base_pointer, "frame pushed");
        Ok(())
    }

    fn call_builtin(&mut self, builtin: Builtin, num_args: usize) -> VmResult<()> {
        let args = self.take_top(num_args)?;
        let result = builtin.call(&args);
        // Drop the callee slot as well.
        self.sp -= 1;
        self.push(result)
    }

    fn return_from_call(&mut self, value: Object) -> VmResult<()> {
        let base_pointer = self.frame.base_pointer;
        let caller = self.callers.pop().ok_or(VmError::StackUnderflow)?;
        self.frame = caller;
        self.sp = base_pointer.checked_sub(1).ok_or(VmError::StackUnderflow)?;
        trace!(depth = self.callers.len(), "frame popped");
        self.push(value)
    }

    fn push_closure(&mut self, const_index: usize, num_free: usize) -> VmResult<()> {
        let func = match self.constants.get(const_index) {
            Some(Object::CompiledFunction(func)) => Rc::clone(func),
            _ => return Err(VmError::InvalidConstant { index: const_index }),
        };
        let free = self.take_top(num_free)?;
        self.push(Object::Closure(Rc::new(Closure { func, free })))
    }
}

fn integer_arithmetic(op: Opcode, left: i64, right: i64) -> VmResult<i64> {
    match op {
        Opcode::Add => Ok(left.wrapping_add(right)),
        Opcode::Sub => Ok(left.wrapping_sub(right)),
        Opcode::Mul => Ok(left.wrapping_mul(right)),
        Opcode::Div => {
            if right == 0 {
                return Err(VmError::DivisionByZero);
            }
            Ok(left.wrapping_div(right))
        }
        _ => Err(VmError::UnknownIntegerOperator { op: operator_symbol(op) }),
    }
}

/// Later pairs overwrite earlier ones with an equal key.
fn build_hash(items: Vec<Object>) -> VmResult<Object> {
    let mut pairs = HashMap::with_capacity(items.len() / 2);
    let mut items = items.into_iter();
    while let (Some(key), Some(value)) = (items.next(), items.next()) {
        let hash_key = key
            .hash_key()
            .ok_or(VmError::UnusableHashKey { type_name: key.type_name() })?;
        pairs.insert(hash_key, HashPair { key, value });
    }
    Ok(Object::Hash(Rc::new(pairs)))
}

fn index_value(left: &Object, index: &Object) -> VmResult<Object> {
    match (left, index) {
        (Object::Array(elements), Object::Integer(i)) => Ok(usize::try_from(*i)
            .ok()
            .and_then(|i| elements.get(i))
            .cloned()
            .unwrap_or(Object::NULL)),
        (Object::Hash(pairs), _) => {
            let key = index
                .hash_key()
                .ok_or(VmError::UnusableHashKey { type_name: index.type_name() })?;
            Ok(pairs.get(&key).map(|pair| pair.value.clone()).unwrap_or(Object::NULL))
        }
        _ => Err(VmError::IndexNotSupported { type_name: left.type_name() }),
    }
}

fn operator_symbol(op: Opcode) -> &'static str {
    match op {
        Opcode::Add => "+",
        Opcode::Sub => "-",
        Opcode::Mul => "*",
        Opcode::Div => "/",
        Opcode::Equal => "==",
        Opcode::NotEqual => "!=",
        Opcode::GreaterThan => ">",
        other => other.definition().name,
    }
}

// ── Tests ────────────────────────────────────────────────────────────
