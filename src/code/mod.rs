use std::fmt::Write as _;

// ── Instruction encoding ────────────────────────────────────────────
//
// One instruction = opcode byte + fixed-width operands, big-endian.
// The operand widths depend on the opcode alone, so an instruction can be
// rewritten in place without shifting anything after it.

pub type Instructions = Vec<u8>;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Constant,
    Add,
    Pop,
    Sub,
    Mul,
    Div,
    Equal,
    NotEqual,
    GreaterThan,
    Minus,
    Bang,
    JumpNotTruthy,
    Jump,
    Null,
    SetGlobal,
    GetGlobal,
    SetLocal,
    GetLocal,
    GetFree,
    GetBuiltin,
    Array,
    Hash,
    Index,
    Call,
    ReturnValue,
    Closure,
    CurrentClosure,
    Return,
    True,
    False,
}

const OPCODES: [Opcode; 30] = [
    Opcode::Constant,
    Opcode::Add,
    Opcode::Pop,
    Opcode::Sub,
    Opcode::Mul,
    Opcode::Div,
    Opcode::Equal,
    Opcode::NotEqual,
    Opcode::GreaterThan,
    Opcode::Minus,
    Opcode::Bang,
    Opcode::JumpNotTruthy,
    Opcode::Jump,
    Opcode::Null,
    Opcode::SetGlobal,
    Opcode::GetGlobal,
    Opcode::SetLocal,
    Opcode::GetLocal,
    Opcode::GetFree,
    Opcode::GetBuiltin,
    Opcode::Array,
    Opcode::Hash,
    Opcode::Index,
    Opcode::Call,
    Opcode::ReturnValue,
    Opcode::Closure,
    Opcode::CurrentClosure,
    Opcode::Return,
    Opcode::True,
    Opcode::False,
];

/// Name and operand layout of one opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Definition {
    pub name: &'static str,
    pub operand_widths: &'static [usize],
}

impl Definition {
    /// Total encoded length: opcode byte plus operands.
    pub fn byte_len(&self) -> usize {
        1 + self.operand_widths.iter().sum::<usize>()
    }
}

impl Opcode {
    pub fn from_byte(byte: u8) -> Option<Opcode> {
        OPCODES.get(byte as usize).copied()
    }

    pub fn definition(self) -> Definition {
        match self {
            Opcode::Constant => def("OpConstant", &[2]),
            Opcode::Add => def("OpAdd", &[]),
            Opcode::Pop => def("OpPop", &[]),
            Opcode::Sub => def("OpSub", &[]),
            Opcode::Mul => def("OpMul", &[]),
            Opcode::Div => def("OpDiv", &[]),
            Opcode::Equal => def("OpEqual", &[]),
            Opcode::NotEqual => def("OpNotEqual", &[]),
            Opcode::GreaterThan => def("OpGreaterThan", &[]),
            Opcode::Minus => def("OpMinus", &[]),
            Opcode::Bang => def("OpBang", &[]),
            Opcode::JumpNotTruthy => def("OpJumpNotTruthy", &[2]),
            Opcode::Jump => def("OpJump", &[2]),
            Opcode::Null => def("OpNull", &[]),
            Opcode::SetGlobal => def("OpSetGlobal", &[2]),
            Opcode::GetGlobal => def("OpGetGlobal", &[2]),
            Opcode::SetLocal => def("OpSetLocal", &[1]),
            Opcode::GetLocal => def("OpGetLocal", &[1]),
            Opcode::GetFree => def("OpGetFree", &[1]),
            Opcode::GetBuiltin => def("OpGetBuiltin", &[1]),
            Opcode::Array => def("OpArray", &[2]),
            Opcode::Hash => def("OpHash", &[2]),
            Opcode::Index => def("OpIndex", &[]),
            Opcode::Call => def("OpCall", &[1]),
            Opcode::ReturnValue => def("OpReturnValue", &[]),
            Opcode::Closure => def("OpClosure", &[2, 1]),
            Opcode::CurrentClosure => def("OpCurrentClosure", &[]),
            Opcode::Return => def("OpReturn", &[]),
            Opcode::True => def("OpTrue", &[]),
            Opcode::False => def("OpFalse", &[]),
        }
    }
}

const fn def(name: &'static str, operand_widths: &'static [usize]) -> Definition {
    Definition { name, operand_widths }
}

impl From<Opcode> for u8 {
    fn from(op: Opcode) -> u8 {
        op as u8
    }
}

/// Encode one instruction. Operands are truncated to their width; a missing
/// operand encodes as zero so the length always matches the definition.
pub fn make(op: Opcode, operands: &[usize]) -> Instructions {
    let def = op.definition();
    let mut instruction = Vec::with_capacity(def.byte_len());
    instruction.push(op as u8);
    for (i, width) in def.operand_widths.iter().enumerate() {
        let operand = operands.get(i).copied().unwrap_or(0);
        match width {
            2 => instruction.extend_from_slice(&(operand as u16).to_be_bytes()),
            1 => instruction.push(operand as u8),
            _ => {}
        }
    }
    instruction
}

/// Decode the operands following an opcode; returns them and the bytes read.
/// `None` when `ins` ends before the last operand.
pub fn read_operands(def: &Definition, ins: &[u8]) -> Option<(Vec<usize>, usize)> {
    let mut operands = Vec::with_capacity(def.operand_widths.len());
    let mut offset = 0;
    for width in def.operand_widths {
        let rest = ins.get(offset..)?;
        match width {
            2 => operands.push(read_u16(rest)? as usize),
            1 => operands.push(read_u8(rest)? as usize),
            _ => {}
        }
        offset += width;
    }
    Some((operands, offset))
}

pub fn read_u16(ins: &[u8]) -> Option<u16> {
    Some(u16::from_be_bytes([*ins.first()?, *ins.get(1)?]))
}

pub fn read_u8(ins: &[u8]) -> Option<u8> {
    ins.first().copied()
}

// ── Disassembly ──────────────────────────────────────────────────────

/// One line per instruction: `0000 OpConstant 1`.
pub fn disassemble(ins: &[u8]) -> String {
    let mut out = String::new();
    let mut i = 0;
    while i < ins.len() {
        let Some(op) = Opcode::from_byte(ins[i]) else {
            let _ = writeln!(out, "ERROR: no opcode for value {}", ins[i]);
            i += 1;
            continue;
        };
        let def = op.definition();
        let Some((operands, read)) = read_operands(&def, &ins[i + 1..]) else {
            let _ = writeln!(out, "{:04} ERROR: truncated {}", i, def.name);
            break;
        };
        let _ = writeln!(out, "{:04} {}", i, fmt_instruction(&def, &operands));
        i += 1 + read;
    }
    out
}

fn fmt_instruction(def: &Definition, operands: &[usize]) -> String {
    let mut text = def.name.to_string();
    for operand in operands {
        let _ = write!(text, " {}", operand);
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn make_encodes_big_endian() {
        let cases: Vec<(Opcode, Vec<usize>, Vec<u8>)> = vec![
            (Opcode::Constant, vec![65534], vec![Opcode::Constant as u8, 255, 254]),
            (Opcode::Add, vec![], vec![Opcode::Add as u8]),
            (Opcode::GetLocal, vec![255], vec![Opcode::GetLocal as u8, 255]),
            (Opcode::Closure, vec![65534, 255], vec![Opcode::Closure as u8, 255, 254, 255]),
        ];
        for (op, operands, expected) in cases {
            assert_eq!(make(op, &operands), expected, "{:?}", op);
        }
    }

    #[test]
    fn every_opcode_round_trips() {
        for op in OPCODES {
            let def = op.definition();
            let operands: Vec<usize> = def
                .operand_widths
                .iter()
                .map(|w| if *w == 2 { 513 } else { 7 })
                .collect();
            let ins = make(op, &operands);
            assert_eq!(ins.len(), def.byte_len(), "{:?}", op);
            assert_eq!(Opcode::from_byte(ins[0]), Some(op));
            let (read, n) = read_operands(&def, &ins[1..]).unwrap();
            assert_eq!(read, operands, "{:?}", op);
            assert_eq!(n, def.byte_len() - 1);
        }
    }

    #[test]
    fn short_operands_read_as_none() {
        assert_eq!(read_u16(&[1, 2, 3]), Some(258));
        assert_eq!(read_u16(&[1]), None);
        assert_eq!(read_u16(&[]), None);
        assert_eq!(read_u8(&[9]), Some(9));
        assert_eq!(read_u8(&[]), None);

        let closure = Opcode::Closure.definition();
        assert_eq!(read_operands(&closure, &[0, 1, 2]), Some((vec![1, 2], 3)));
        assert_eq!(read_operands(&closure, &[0, 1]), None);
        assert_eq!(read_operands(&closure, &[0]), None);
        assert_eq!(read_operands(&Opcode::Pop.definition(), &[]), Some((vec![], 0)));
    }

    #[test]
    fn unknown_byte_has_no_opcode() {
        assert_eq!(Opcode::from_byte(OPCODES.len() as u8), None);
        assert_eq!(Opcode::from_byte(255), None);
    }

    #[test]
    fn disassemble_formats_offsets_and_operands() {
        let ins: Instructions = [
            make(Opcode::Add, &[]),
            make(Opcode::GetLocal, &[1]),
            make(Opcode::Constant, &[2]),
            make(Opcode::Constant, &[65535]),
            make(Opcode::Closure, &[65535, 255]),
        ]
        .concat();
        let expected = "0000 OpAdd\n\
                        0001 OpGetLocal 1\n\
                        0003 OpConstant 2\n\
                        0006 OpConstant 65535\n\
                        0009 OpClosure 65535 255\n";
        assert_eq!(disassemble(&ins), expected);
    }

    #[test]
    fn disassemble_survives_garbage() {
        let text = disassemble(&[200, Opcode::Constant as u8, 0]);
        assert_eq!(text, "ERROR: no opcode for value 200\n0001 ERROR: truncated OpConstant\n");
    }
}
