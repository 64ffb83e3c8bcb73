//! Closure serialization
//!
//! Blob layout: 4-byte magic, format version, SHA-256 digest of the
//! payload, then the payload encoding one [`FuncProto`]. The digest is
//! verified before any payload field is decoded, so a corrupted or
//! truncated blob is rejected up front.

use crate::bytecode::{Const, FuncProto, Instr};
use crate::error::{VmError, VmResult};
use sha2::{Digest, Sha256};
use std::rc::Rc;

/// Blob magic.
pub const BYTECODE_MAGIC: &[u8; 4] = b"HZBC";
/// Current blob format version.
pub const BYTECODE_VERSION: u32 = 1;

const DIGEST_LEN: usize = 32;

/// Streaming writer callback. Returns the number of bytes accepted; a
/// short write aborts serialization.
pub type WriteFn<'a> = &'a mut dyn FnMut(&[u8]) -> usize;
/// Streaming reader callback. Fills the buffer and returns the number of
/// bytes produced; a short read aborts deserialization.
pub type ReadFn<'a> = &'a mut dyn FnMut(&mut [u8]) -> usize;

/// Serialize a prototype through `write`.
pub fn write_proto(proto: &FuncProto, write: WriteFn<'_>) -> VmResult<()> {
    let payload = encode_payload(proto);
    let digest = Sha256::digest(&payload);

    let mut out = |bytes: &[u8]| -> VmResult<()> {
        if write(bytes) == bytes.len() {
            Ok(())
        } else {
            Err(VmError::InvalidOperation(
                "bytecode writer refused data".to_string(),
            ))
        }
    };
    out(BYTECODE_MAGIC)?;
    out(&BYTECODE_VERSION.to_le_bytes())?;
    out(&digest)?;
    out(&payload)
}

/// Deserialize a prototype through `read`.
pub fn read_proto(read: ReadFn<'_>) -> VmResult<Rc<FuncProto>> {
    let mut header = [0u8; 4];
    fill(read, &mut header)?;
    if &header != BYTECODE_MAGIC {
        return Err(VmError::InvalidBytecode("bad magic".to_string()));
    }
    let mut word = [0u8; 4];
    fill(read, &mut word)?;
    let version = u32::from_le_bytes(word);
    if version != BYTECODE_VERSION {
        return Err(VmError::InvalidBytecode(format!(
            "unsupported bytecode version {version}"
        )));
    }
    let mut digest = [0u8; DIGEST_LEN];
    fill(read, &mut digest)?;

    let mut payload = Vec::new();
    let mut chunk = [0u8; 256];
    loop {
        let n = read(&mut chunk);
        if n == 0 {
            break;
        }
        payload.extend_from_slice(&chunk[..n]);
    }

    let actual = Sha256::digest(&payload);
    if actual[..] != digest[..] {
        return Err(VmError::InvalidBytecode(format!(
            "checksum mismatch: expected {}, got {}",
            hex::encode(digest),
            hex::encode(actual)
        )));
    }

    decode_payload(&payload)
}

fn fill(read: ReadFn<'_>, buf: &mut [u8]) -> VmResult<()> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = read(&mut buf[filled..]);
        if n == 0 {
            return Err(VmError::InvalidBytecode("truncated blob".to_string()));
        }
        filled += n;
    }
    Ok(())
}

// ============================================================================
// Payload encoding
// ============================================================================

const CONST_NULL: u8 = 0;
const CONST_INT: u8 = 1;
const CONST_FLOAT: u8 = 2;
const CONST_BOOL: u8 = 3;
const CONST_STR: u8 = 4;

const OP_LOAD_CONST: u8 = 0;
const OP_RETURN: u8 = 1;
const OP_YIELD: u8 = 2;
const OP_SUSPEND: u8 = 3;

fn put_str(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u32).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

fn encode_payload(proto: &FuncProto) -> Vec<u8> {
    let mut out = Vec::new();
    put_str(&mut out, &proto.name);
    put_str(&mut out, &proto.source_name);
    out.push(proto.is_generator as u8);

    out.extend_from_slice(&(proto.consts.len() as u32).to_le_bytes());
    for c in &proto.consts {
        match c {
            Const::Null => out.push(CONST_NULL),
            Const::Int(n) => {
                out.push(CONST_INT);
                out.extend_from_slice(&n.to_le_bytes());
            }
            Const::Float(f) => {
                out.push(CONST_FLOAT);
                out.extend_from_slice(&f.to_le_bytes());
            }
            Const::Bool(b) => {
                out.push(CONST_BOOL);
                out.push(*b as u8);
            }
            Const::Str(s) => {
                out.push(CONST_STR);
                put_str(&mut out, s);
            }
        }
    }

    out.extend_from_slice(&(proto.instrs.len() as u32).to_le_bytes());
    for instr in &proto.instrs {
        match instr {
            Instr::LoadConst(idx) => {
                out.push(OP_LOAD_CONST);
                out.extend_from_slice(&idx.to_le_bytes());
            }
            Instr::Return => out.push(OP_RETURN),
            Instr::Yield => out.push(OP_YIELD),
            Instr::Suspend => out.push(OP_SUSPEND),
        }
    }

    out.extend_from_slice(&(proto.lines.len() as u32).to_le_bytes());
    for line in &proto.lines {
        out.extend_from_slice(&line.to_le_bytes());
    }
    out
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> VmResult<&'a [u8]> {
        if self.pos + n > self.bytes.len() {
            return Err(VmError::InvalidBytecode("truncated payload".to_string()));
        }
        let out = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u8(&mut self) -> VmResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> VmResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn i64(&mut self) -> VmResult<i64> {
        let b = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(i64::from_le_bytes(arr))
    }

    fn f64(&mut self) -> VmResult<f64> {
        let b = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(f64::from_le_bytes(arr))
    }

    fn str(&mut self) -> VmResult<String> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| VmError::InvalidBytecode("non-utf8 string in payload".to_string()))
    }
}

fn decode_payload(bytes: &[u8]) -> VmResult<Rc<FuncProto>> {
    let mut cur = Cursor { bytes, pos: 0 };
    let name = cur.str()?;
    let source_name = cur.str()?;
    let is_generator = cur.u8()? != 0;

    let n_consts = cur.u32()? as usize;
    let mut consts = Vec::with_capacity(n_consts);
    for _ in 0..n_consts {
        let c = match cur.u8()? {
            CONST_NULL => Const::Null,
            CONST_INT => Const::Int(cur.i64()?),
            CONST_FLOAT => Const::Float(cur.f64()?),
            CONST_BOOL => Const::Bool(cur.u8()? != 0),
            CONST_STR => Const::Str(cur.str()?),
            tag => {
                return Err(VmError::InvalidBytecode(format!(
                    "unknown constant tag {tag}"
                )))
            }
        };
        consts.push(c);
    }

    let n_instrs = cur.u32()? as usize;
    let mut instrs = Vec::with_capacity(n_instrs);
    for _ in 0..n_instrs {
        let instr = match cur.u8()? {
            OP_LOAD_CONST => {
                let idx = cur.u32()?;
                if idx as usize >= consts.len() {
                    return Err(VmError::InvalidBytecode(format!(
                        "constant index {idx} out of range"
                    )));
                }
                Instr::LoadConst(idx)
            }
            OP_RETURN => Instr::Return,
            OP_YIELD => Instr::Yield,
            OP_SUSPEND => Instr::Suspend,
            tag => return Err(VmError::InvalidBytecode(format!("unknown opcode {tag}"))),
        };
        instrs.push(instr);
    }

    let n_lines = cur.u32()? as usize;
    let mut lines = Vec::with_capacity(n_lines);
    for _ in 0..n_lines {
        lines.push(cur.u32()?);
    }

    Ok(Rc::new(FuncProto {
        name: Rc::from(name.as_str()),
        source_name: Rc::from(source_name.as_str()),
        is_generator,
        consts,
        instrs,
        lines,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::compile;

    fn round_trip(source: &str) -> Rc<FuncProto> {
        let proto = compile(source, "blob-test").unwrap();
        let mut blob = Vec::new();
        write_proto(&proto, &mut |bytes| {
            blob.extend_from_slice(bytes);
            bytes.len()
        })
        .unwrap();

        let mut pos = 0;
        read_proto(&mut |buf: &mut [u8]| {
            let n = (blob.len() - pos).min(buf.len());
            buf[..n].copy_from_slice(&blob[pos..pos + n]);
            pos += n;
            n
        })
        .unwrap()
    }

    #[test]
    fn proto_survives_round_trip() {
        let proto = round_trip("yield 1\nyield 2.5\nreturn \"done\"");
        assert!(proto.is_generator);
        assert_eq!(&*proto.source_name, "blob-test");
        assert_eq!(proto.instrs.len(), 6);
        assert_eq!(proto.consts.len(), 3);
    }

    #[test]
    fn corrupted_payload_is_rejected() {
        let proto = compile("return 7", "t").unwrap();
        let mut blob = Vec::new();
        write_proto(&proto, &mut |bytes| {
            blob.extend_from_slice(bytes);
            bytes.len()
        })
        .unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0xff;

        let mut pos = 0;
        let err = read_proto(&mut |buf: &mut [u8]| {
            let n = (blob.len() - pos).min(buf.len());
            buf[..n].copy_from_slice(&blob[pos..pos + n]);
            pos += n;
            n
        })
        .unwrap_err();
        assert!(matches!(err, VmError::InvalidBytecode(msg) if msg.contains("checksum")));
    }

    #[test]
    fn bad_magic_is_rejected() {
        let blob = b"NOPE".to_vec();
        let mut pos = 0;
        let err = read_proto(&mut |buf: &mut [u8]| {
            let n = (blob.len() - pos).min(buf.len());
            buf[..n].copy_from_slice(&blob[pos..pos + n]);
            pos += n;
            n
        })
        .unwrap_err();
        assert!(matches!(err, VmError::InvalidBytecode(msg) if msg.contains("magic")));
    }
}
