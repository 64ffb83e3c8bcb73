//! Hazel VM — an embeddable stack-based scripting VM
//!
//! The embedding API is the product: hosts drive the VM through a
//! [`Vm`] handle using a stack protocol for calls, create and inspect
//! heap objects (tables, arrays, user data, closures, generators,
//! threads, classes, instances, weak references), and install hooks for
//! print output, errors, and debug events.
//!
//! Object lifetime is reference counted with generation-tagged handles;
//! a mark-and-sweep pass reclaims cycles on demand. Each thread object
//! carries its own execution context, sharing the heap and the built-in
//! tables with the main context.

#![warn(missing_docs)]

mod bytecode;
mod compile;
mod error;
mod exec;
mod heap;
mod machine;
mod serialize;
mod value;
mod vm;

pub use bytecode::{Const, FuncProto, Instr};
pub use error::{VmError, VmResult};
pub use exec::{GeneratorState, RunState};
pub use heap::ReleaseHook;
pub use serialize::{ReadFn, WriteFn, BYTECODE_MAGIC, BYTECODE_VERSION};
pub use value::{ObjectId, ObjectKey, ObjectKind, VmValue};
pub use vm::{
    DebugEvent, DebugHook, NativeFlow, NativeFn, OutputHook, StackInfo, Vm, BLOB_TYPE_TAG,
};
