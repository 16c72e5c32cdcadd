//! Bytecode instruction set.
//!
//! The subset of a WebAssembly-style stack machine the lowering emits,
//! as a closed sum with structured control flow. The text serializer here is
//! the output sink; a binary encoder would consume the same values.
//!
//! All program values are i32 pointers into linear memory; f64 appears only
//! inside literal payloads, never on the operand stack.

use std::fmt::Write as _;

/// One stack-machine instruction.
#[derive(Clone, Debug, PartialEq)]
pub enum Instr {
    I32Const(i32),
    LocalGet(String),
    LocalSet(String),
    GlobalGet(String),
    GlobalSet(String),
    I32Load { offset: u32 },
    I32Store { offset: u32 },
    I32Load16U { offset: u32 },
    I32Store16 { offset: u32 },
    I32Add,
    I32Shl,
    I32Eq,
    I32Eqz,
    I32Or,
    Call(String),
    /// Indirect call through the function table; every entry has the
    /// one-closure-pointer evaluator signature.
    CallIndirect,
    If {
        result: bool,
        then: Vec<Instr>,
        else_: Vec<Instr>,
    },
    Block { body: Vec<Instr> },
    Loop { result: bool, body: Vec<Instr> },
    Br(u32),
    Return,
    Drop,
    Unreachable,
}

impl Instr {
    /// Append the flat text form, `indent` levels deep.
    pub fn push_wat(&self, out: &mut String, indent: usize) {
        let pad = "  ".repeat(indent);
        match self {
            Instr::I32Const(v) => { let _ = writeln!(out, "{pad}i32.const {v}"); }
            Instr::LocalGet(name) => { let _ = writeln!(out, "{pad}local.get ${name}"); }
            Instr::LocalSet(name) => { let _ = writeln!(out, "{pad}local.set ${name}"); }
            Instr::GlobalGet(name) => { let _ = writeln!(out, "{pad}global.get ${name}"); }
            Instr::GlobalSet(name) => { let _ = writeln!(out, "{pad}global.set ${name}"); }
            Instr::I32Load { offset } => { let _ = writeln!(out, "{pad}i32.load offset={offset}"); }
            Instr::I32Store { offset } => { let _ = writeln!(out, "{pad}i32.store offset={offset}"); }
            Instr::I32Load16U { offset } => {
                let _ = writeln!(out, "{pad}i32.load16_u offset={offset}");
            }
            Instr::I32Store16 { offset } => {
                let _ = writeln!(out, "{pad}i32.store16 offset={offset}");
            }
            Instr::I32Add => { let _ = writeln!(out, "{pad}i32.add"); }
            Instr::I32Shl => { let _ = writeln!(out, "{pad}i32.shl"); }
            Instr::I32Eq => { let _ = writeln!(out, "{pad}i32.eq"); }
            Instr::I32Eqz => { let _ = writeln!(out, "{pad}i32.eqz"); }
            Instr::I32Or => { let _ = writeln!(out, "{pad}i32.or"); }
            Instr::Call(name) => { let _ = writeln!(out, "{pad}call ${name}"); }
            Instr::CallIndirect => { let _ = writeln!(out, "{pad}call_indirect (type $evalfn)"); }
            Instr::If { result, then, else_ } => {
                let ty = if *result { " (result i32)" } else { "" };
                let _ = writeln!(out, "{pad}if{ty}");
                for i in then {
                    i.push_wat(out, indent + 1);
                }
                if !else_.is_empty() {
                    let _ = writeln!(out, "{pad}else");
                    for i in else_ {
                        i.push_wat(out, indent + 1);
                    }
                }
                let _ = writeln!(out, "{pad}end");
            }
            Instr::Block { body } => {
                let _ = writeln!(out, "{pad}block");
                for i in body {
                    i.push_wat(out, indent + 1);
                }
                let _ = writeln!(out, "{pad}end");
            }
            Instr::Loop { result, body } => {
                let ty = if *result { " (result i32)" } else { "" };
                let _ = writeln!(out, "{pad}loop{ty}");
                for i in body {
                    i.push_wat(out, indent + 1);
                }
                let _ = writeln!(out, "{pad}end");
            }
            Instr::Br(depth) => { let _ = writeln!(out, "{pad}br {depth}"); }
            Instr::Return => { let _ = writeln!(out, "{pad}return"); }
            Instr::Drop => { let _ = writeln!(out, "{pad}drop"); }
            Instr::Unreachable => { let _ = writeln!(out, "{pad}unreachable"); }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_flat_instructions() {
        let mut out = String::new();
        Instr::I32Const(42).push_wat(&mut out, 0);
        Instr::I32Load { offset: 8 }.push_wat(&mut out, 0);
        assert_eq!(out, "i32.const 42\ni32.load offset=8\n");
    }

    #[test]
    fn test_structured_if() {
        let instr = Instr::If {
            result: true,
            then: vec![Instr::I32Const(1)],
            else_: vec![Instr::I32Const(0)],
        };
        let mut out = String::new();
        instr.push_wat(&mut out, 0);
        assert_eq!(
            out,
            "if (result i32)\n  i32.const 1\nelse\n  i32.const 0\nend\n"
        );
    }
}
