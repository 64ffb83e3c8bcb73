//! Source compiler
//!
//! The script language is deliberately small: one statement per line,
//! `//` comments, and `return` / `yield` / `suspend` followed by an
//! optional literal (integer, float, string, `true`, `false`, `null`).
//! A function containing `yield` compiles as a generator. Missing
//! trailing `return` produces an implicit `return null`.

use crate::bytecode::{Const, FuncProto, Instr};
use crate::error::{VmError, VmResult};
use std::rc::Rc;

struct Emitter {
    consts: Vec<Const>,
    instrs: Vec<Instr>,
    lines: Vec<u32>,
}

impl Emitter {
    fn constant(&mut self, c: Const) -> u32 {
        if let Some(i) = self.consts.iter().position(|have| *have == c) {
            return i as u32;
        }
        self.consts.push(c);
        (self.consts.len() - 1) as u32
    }

    fn emit(&mut self, instr: Instr, line: u32) {
        self.instrs.push(instr);
        self.lines.push(line);
    }
}

/// Compile `source` into a function prototype.
///
/// # Arguments
/// * `source` - script text
/// * `source_name` - name reported in errors and stack info
pub fn compile(source: &str, source_name: &str) -> VmResult<Rc<FuncProto>> {
    let mut em = Emitter {
        consts: Vec::new(),
        instrs: Vec::new(),
        lines: Vec::new(),
    };
    let mut is_generator = false;

    for (i, raw_line) in source.lines().enumerate() {
        let line = (i + 1) as u32;
        let text = match raw_line.find("//") {
            Some(pos) => &raw_line[..pos],
            None => raw_line,
        };
        let text = text.trim();
        if text.is_empty() {
            continue;
        }

        let (keyword, rest) = match text.find(char::is_whitespace) {
            Some(pos) => (&text[..pos], text[pos..].trim()),
            None => (text, ""),
        };
        let instr = match keyword {
            "return" => Instr::Return,
            "yield" => {
                is_generator = true;
                Instr::Yield
            }
            "suspend" => Instr::Suspend,
            other => {
                return Err(compile_error(
                    format!("unknown statement '{other}'"),
                    source_name,
                    line,
                    1,
                ));
            }
        };
        let value = if rest.is_empty() {
            Const::Null
        } else {
            let column = (text.len() - rest.len() + 1) as i64;
            parse_literal(rest).map_err(|desc| compile_error(desc, source_name, line, column))?
        };
        let idx = em.constant(value);
        em.emit(Instr::LoadConst(idx), line);
        em.emit(instr, line);
    }

    // implicit trailing return
    let needs_return = !matches!(em.instrs.last(), Some(Instr::Return));
    if needs_return {
        let line = source.lines().count().max(1) as u32;
        let idx = em.constant(Const::Null);
        em.emit(Instr::LoadConst(idx), line);
        em.emit(Instr::Return, line);
    }

    Ok(Rc::new(FuncProto {
        name: Rc::from("main"),
        source_name: Rc::from(source_name),
        is_generator,
        consts: em.consts,
        instrs: em.instrs,
        lines: em.lines,
    }))
}

fn compile_error(desc: String, source_name: &str, line: u32, column: i64) -> VmError {
    VmError::Compile {
        desc,
        source_name: source_name.to_string(),
        line: line as i64,
        column,
    }
}

fn parse_literal(text: &str) -> Result<Const, String> {
    match text {
        "null" => return Ok(Const::Null),
        "true" => return Ok(Const::Bool(true)),
        "false" => return Ok(Const::Bool(false)),
        _ => {}
    }
    if let Some(body) = text.strip_prefix('"') {
        let Some(body) = body.strip_suffix('"') else {
            return Err("unterminated string literal".to_string());
        };
        return Ok(Const::Str(unescape(body)?));
    }
    if text.contains(['.', 'e', 'E']) {
        if let Ok(f) = text.parse::<f64>() {
            return Ok(Const::Float(f));
        }
    } else if let Ok(n) = text.parse::<i64>() {
        return Ok(Const::Int(n));
    }
    Err(format!("invalid literal '{text}'"))
}

fn unescape(body: &str) -> Result<String, String> {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some(other) => return Err(format!("unknown escape '\\{other}'")),
            None => return Err("dangling escape at end of string".to_string()),
        }
    }
    Ok(out)
}
