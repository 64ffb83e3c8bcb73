//! Compiled script artifacts
//!
//! A [`Script`] pairs source text with its serialized bytecode so a
//! program compiled once can be loaded into any number of machines
//! without recompiling. Compilation happens on a throwaway machine; a
//! script never holds a reference into any live instance.

use crate::error::{BridgeError, BridgeResult};
use hazel_vm::{Vm, VmError};
use std::fmt;

/// A compiled script: source text plus serialized bytecode.
pub struct Script {
    source: String,
    source_name: String,
    bytecode: Vec<u8>,
}

impl fmt::Debug for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Script")
            .field("source_name", &self.source_name)
            .field("bytecode_len", &self.bytecode.len())
            .finish()
    }
}

impl Script {
    /// Compile `source`, keeping both the text and the bytecode.
    pub fn compile(source: &str, source_name: &str) -> BridgeResult<Script> {
        let vm = Vm::open(64);
        vm.set_report_errors(false);
        match vm.compile(source, source_name) {
            Ok(_) => {}
            Err(VmError::Compile {
                desc,
                source_name,
                line,
                column,
            }) => {
                return Err(BridgeError::Compile {
                    desc,
                    source_name,
                    line,
                    column,
                })
            }
            Err(other) => return Err(BridgeError::Script(other.to_string())),
        }
        let mut bytecode = Vec::new();
        let mut writer = |chunk: &[u8]| -> usize {
            bytecode.extend_from_slice(chunk);
            chunk.len()
        };
        vm.write_closure(-1, &mut writer)
            .map_err(|e| BridgeError::InvalidBytecode(e.to_string()))?;
        vm.pop(1);
        Ok(Script {
            source: source.to_string(),
            source_name: source_name.to_string(),
            bytecode,
        })
    }

    /// Rebuild a script from previously serialized bytecode. The
    /// stream is validated on load, not here.
    pub fn from_bytecode(source_name: &str, bytecode: Vec<u8>) -> Script {
        Script {
            source: String::new(),
            source_name: source_name.to_string(),
            bytecode,
        }
    }

    /// The original source text, empty for bytecode-only scripts.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The name compile errors and stack traces report.
    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    /// The serialized bytecode stream.
    pub fn bytecode(&self) -> &[u8] {
        &self.bytecode
    }

    /// True when a bytecode stream is available.
    pub fn has_bytecode(&self) -> bool {
        !self.bytecode.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiling_produces_bytecode() {
        let script = Script::compile("return 41", "answer.hzl").unwrap();
        assert!(script.has_bytecode());
        assert_eq!(script.source_name(), "answer.hzl");
    }

    #[test]
    fn compile_errors_carry_position() {
        let err = Script::compile("return @", "bad.hzl").unwrap_err();
        match err {
            BridgeError::Compile { source_name, line, .. } => {
                assert_eq!(source_name, "bad.hzl");
                assert_eq!(line, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn empty_source_still_compiles() {
        let script = Script::compile("", "empty.hzl").unwrap();
        assert!(script.has_bytecode());
    }
}
