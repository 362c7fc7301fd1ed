use std::rc::Rc;

use crate::object::Closure;

/// Activation record for one closure invocation. `ip` is the offset of the
/// next byte to fetch; `base_pointer` is the stack slot of local 0.
#[derive(Debug, Clone)]
pub struct Frame {
    pub closure: Rc<Closure>,
    pub ip: usize,
    pub base_pointer: usize,
}

impl Frame {
    pub fn new(closure: Rc<Closure>, base_pointer: usize) -> Self {
        Frame { closure, ip: 0, base_pointer }
    }

    pub fn instructions(&self) -> &[u8] {
        &self.closure.func.instructions
    }
}
