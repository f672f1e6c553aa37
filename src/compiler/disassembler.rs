use std::fmt::Write;

use super::bytecode::OperandType;
use super::CompiledTemplate;
use crate::misc::{char_slice, replace_escapes};

/// Text listings of a compiled template. Addresses are byte offsets into the
/// encoded form so listings stay stable across runs.
pub struct Disassembler<'a> {
    code: &'a CompiledTemplate,
    offsets: Vec<usize>,
}

impl<'a> Disassembler<'a> {
    pub fn new(code: &'a CompiledTemplate) -> Self {
        Self {
            offsets: code.byte_offsets(),
            code,
        }
    }

    fn operand_value(&self, kind: OperandType, raw: usize) -> usize {
        match kind {
            OperandType::Address => self.offsets.get(raw).copied().unwrap_or(raw),
            _ => raw,
        }
    }

    pub fn instructions(&self) -> String {
        let mut buf = String::new();
        for (i, instr) in self.code.code.iter().enumerate() {
            if i > 0 {
                buf.push_str(", ");
            }
            buf.push_str(instr.op.name());
            for (n, kind) in instr.op.operands().iter().enumerate() {
                let _ = write!(buf, " {}", self.operand_value(*kind, instr.operand(n)));
            }
        }
        buf
    }

    pub fn disassemble(&self) -> String {
        let mut buf = String::new();
        for i in 0..self.code.code.len() {
            self.disassemble_instruction(&mut buf, i);
            buf.push('\n');
        }
        buf
    }

    pub fn disassemble_instruction(&self, buf: &mut String, index: usize) {
        let Some(instr) = self.code.code.get(index) else {
            return;
        };
        let _ = write!(buf, "{:04}:\t{:<14}", self.offsets[index], instr.op.name());
        let kinds = instr.op.operands();
        if kinds.is_empty() {
            buf.push_str("  ");
            return;
        }
        for (n, kind) in kinds.iter().enumerate() {
            if n > 0 {
                buf.push_str(", ");
            }
            let raw = instr.operand(n);
            match kind {
                OperandType::String => buf.push_str(&self.constant_pool_operand(raw)),
                _ => {
                    let _ = write!(buf, "{}", self.operand_value(*kind, raw));
                }
            }
        }
    }

    fn constant_pool_operand(&self, index: usize) -> String {
        match self.code.string_table.get(index) {
            Some(s) => format!("#{}:\"{}\"", index, replace_escapes(s)),
            None => format!("#{}:<bad string index>", index),
        }
    }

    pub fn strings(&self) -> String {
        let mut buf = String::new();
        for (addr, s) in self.code.string_table.iter().enumerate() {
            let _ = writeln!(buf, "{:04}: \"{}\"", addr, replace_escapes(s));
        }
        buf
    }

    pub fn source_map(&self) -> String {
        let mut buf = String::new();
        for (i, interval) in self.code.source_intervals.iter().enumerate() {
            if let Some(interval) = interval {
                let chunk = char_slice(&self.code.template, interval.start, interval.end);
                let _ = writeln!(buf, "{:04}: {}\t\"{}\"", self.offsets[i], interval, replace_escapes(&chunk));
            }
        }
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::bytecode::{Instr, Opcode};
    use crate::misc::Interval;

    #[test]
    fn test_listings() {
        let mut t = CompiledTemplate::new("/t");
        t.template = "hi <name>".to_string();
        t.string_table = vec!["hi ".into(), "name".into()];
        t.code = vec![
            Instr::with1(Opcode::WriteStr, 0),
            Instr::with1(Opcode::LoadAttr, 1),
            Instr::new(Opcode::Write),
        ];
        t.source_intervals = vec![Some(Interval::new(0, 3)), Some(Interval::new(4, 8)), Some(Interval::new(4, 8))];
        let d = Disassembler::new(&t);
        assert_eq!(d.instructions(), "write_str 0, load_attr 1, write");
        assert_eq!(
            d.disassemble(),
            "0000:\twrite_str      #0:\"hi \"\n0003:\tload_attr      #1:\"name\"\n0006:\twrite           \n"
        );
        assert_eq!(d.strings(), "0000: \"hi \"\n0001: \"name\"\n");
        assert_eq!(d.source_map(), "0000: [0..3)\t\"hi \"\n0003: [4..8)\t\"name\"\n0006: [4..8)\t\"name\"\n");
    }
}
