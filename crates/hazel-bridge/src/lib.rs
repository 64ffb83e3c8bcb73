//! Bidirectional bridge between a host object model and an embedded
//! scripting machine.
//!
//! The bridge keeps exactly one host wrapper per VM object, converts
//! values in both directions, exposes host callables to scripts with
//! control-flow markers for throwing, tail-calling, and suspending, and
//! drives the machine's call, resume, and wake protocol without ever
//! leaking stack slots to the host.
//!
//! ```
//! use hazel_bridge::{HostValue, ScriptVm};
//!
//! let vm = ScriptVm::open();
//! let result = vm.import_source("return 41", "demo.hzl").unwrap();
//! assert_eq!(result, HostValue::Int(41));
//! ```

#![warn(missing_docs)]

mod call;
mod convert;
mod error;
mod native;
mod object;
mod registry;
mod script;
mod value;
mod vm;

pub use error::{BridgeError, BridgeResult};
pub use hazel_vm::{GeneratorState, RunState};
pub use object::{ObjectIter, RefKind, VmRef};
pub use script::Script;
pub use value::{HostCallable, HostValue, SpecialReturn, VmContext};
pub use vm::{
    DebugEvent, DebugEventKind, DebugHandler, OutputHandler, ScriptVm, StackFrame,
};
