//! Compiled function prototypes and the micro instruction set
//!
//! Closures reference an immutable [`FuncProto`]. The instruction set is
//! intentionally tiny: the embedding API is the product here, and the
//! interpreter only needs enough surface to express returns, generator
//! yields, and whole-context suspension.

use std::rc::Rc;

/// One micro instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instr {
    /// Push constant pool entry
    LoadConst(u32),
    /// Return top of stack to the caller
    Return,
    /// Yield top of stack from a generator frame
    Yield,
    /// Suspend the whole execution context with top of stack as result
    Suspend,
}

/// Constant pool entry. Only primitives are embeddable in a prototype.
#[derive(Debug, Clone, PartialEq)]
pub enum Const {
    /// Null
    Null,
    /// Integer literal
    Int(i64),
    /// Float literal
    Float(f64),
    /// Boolean literal
    Bool(bool),
    /// String literal
    Str(String),
}

/// Immutable compiled function prototype shared by closures.
#[derive(Debug)]
pub struct FuncProto {
    /// Function name (`"main"` for a compiled buffer)
    pub name: Rc<str>,
    /// Source name recorded at compile time (debug info)
    pub source_name: Rc<str>,
    /// True if the body contains a `yield`; calling such a closure
    /// produces a generator instead of executing the body
    pub is_generator: bool,
    /// Constant pool
    pub consts: Vec<Const>,
    /// Instruction stream
    pub instrs: Vec<Instr>,
    /// Source line per instruction (empty when debug info is disabled)
    pub lines: Vec<u32>,
}

impl FuncProto {
    /// Source line for an instruction, if debug info was retained.
    pub fn line_of(&self, pc: usize) -> Option<u32> {
        self.lines.get(pc).copied()
    }
}
