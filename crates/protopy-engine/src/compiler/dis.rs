//! Disassembler.
//!
//! Renders a code object as one line per instruction:
//!
//! ```text
//!    0 LOAD_CONST            0 (1)
//!    2 RETURN_VALUE
//! ```
//!
//! Nested code objects follow their parent, each under its own header.

use std::fmt::Write;

use super::bytecode::{decode_at, CompareOp, Instruction, OpCode, FORMAT_CONVERSION_MASK, FORMAT_WITH_SPEC};
use super::code::CodeObject;

/// Disassembles `code` and every nested code object.
pub fn disassemble(code: &CodeObject) -> String {
    let mut out = String::new();
    write_code(&mut out, code);
    out
}

fn write_code(out: &mut String, code: &CodeObject) {
    let _ = writeln!(
        out,
        "Disassembly of <code object {} ({}), line {}> [flags: {}]:",
        code.name, code.filename, code.first_line, code.flags
    );
    let mut offset = 0;
    let mut last_line = 0;
    while offset < code.bytecode.len() {
        match decode_at(&code.bytecode, offset) {
            Ok(instr) => {
                let line = code.line_for(offset);
                let marker = if line != last_line {
                    last_line = line;
                    format!("{:>4}", line)
                } else {
                    "    ".to_string()
                };
                let _ = writeln!(out, "{} {}", marker, render(code, &instr));
                offset = instr.next_offset();
            }
            Err(err) => {
                let _ = writeln!(out, "     <{}>", err);
                break;
            }
        }
    }
    for nested in code.nested() {
        out.push('\n');
        write_code(out, nested);
    }
}

/// Renders one instruction with its operand resolved against `code`.
pub fn render(code: &CodeObject, instr: &Instruction) -> String {
    let Some(arg) = instr.arg else {
        return format!("{:>5} {}", instr.offset, instr.opcode);
    };
    let resolved = resolve(code, instr.opcode, arg);
    match resolved {
        Some(detail) => format!("{:>5} {:<24} {:>4} ({})", instr.offset, instr.opcode.name(), arg, detail),
        None => format!("{:>5} {:<24} {:>4}", instr.offset, instr.opcode.name(), arg),
    }
}

fn resolve(code: &CodeObject, op: OpCode, arg: u32) -> Option<String> {
    let index = arg as usize;
    match op {
        OpCode::LoadConst => code.constants.get(index).map(|c| c.to_string()),
        OpCode::LoadFast | OpCode::StoreFast | OpCode::DeleteFast => code.varnames.get(index).cloned(),
        op if op.uses_name() => code.names.get(index).cloned(),
        OpCode::CompareOp => CompareOp::from_arg(arg).map(|c| c.symbol().to_string()),
        op if op.is_jump() => Some(format!("to {}", arg)),
        OpCode::FormatValue => {
            let conversion = match arg & FORMAT_CONVERSION_MASK {
                1 => "str",
                2 => "repr",
                3 => "ascii",
                _ => "",
            };
            let spec = if arg & FORMAT_WITH_SPEC != 0 { "with format" } else { "" };
            let detail = [conversion, spec]
                .iter()
                .filter(|s| !s.is_empty())
                .copied()
                .collect::<Vec<_>>()
                .join(", ");
            (!detail.is_empty()).then_some(detail)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile_module_checked;
    use crate::parser::Parser;

    #[test]
    fn test_disassemble_expression() {
        let module = Parser::new("1 + 2\n").parse_module().unwrap();
        let code = compile_module_checked(&module, "<dis>").unwrap();
        let text = disassemble(&code);
        assert!(text.contains("LOAD_CONST"));
        assert!(text.contains("(1)"));
        assert!(text.contains("BINARY_ADD"));
        assert!(text.contains("RETURN_VALUE"));
    }

    #[test]
    fn test_disassemble_nested() {
        let module = Parser::new("def f(a):\n    return a < 2\n").parse_module().unwrap();
        let code = compile_module_checked(&module, "<dis>").unwrap();
        let text = disassemble(&code);
        assert!(text.contains("<code object f"));
        assert!(text.contains("LOAD_FAST"));
        assert!(text.contains("(a)"));
        assert!(text.contains("(<)"));
    }
}
