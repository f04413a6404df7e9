//! Instruction set and binary codec.
//!
//! This module is the single source of truth for instruction bit layouts;
//! both the assembler and the executor go through [`encode`] and [`decode`],
//! which keeps the two ends of the toolchain byte-compatible.
//!
//! Encoded form (1, 2 or 3 header bytes plus an optional immediate tail):
//!
//! | Byte | Bits 0-3          | Bit 4 | Bit 5 | Bits 6-7 |
//! |------|-------------------|-------|-------|----------|
//! | 1    | opcode (bits 0-5)         |       | `dsz`    |
//! | 2    | `ra` (or `ims`)   | `iam` | `rmd` | `ims`    |
//! | 3    | `rb`              | `ibm` | `iea` | reserved |
//!
//! Byte 2 is present for operand counts >= 1 and byte 3 for operand count 2.
//! For single-operand immediate instructions the `ra` field carries `ims`
//! instead of a register id. The immediate tail is present whenever `rmd`
//! selects immediate mode or the effective-address flag `iea` is set; it is
//! `ims` bytes of little-endian two's-complement (or IEEE-754 bits).
//!
//! The operand count is a property of the opcode, not of the encoded bytes;
//! decoding consults the opcode arity table.

use crate::constants::*;
use byteorder::ByteOrder;
use num::traits::FromPrimitive;
use num_derive::{FromPrimitive, ToPrimitive};
use std::fmt;
use std::str::FromStr;
use util::{Endian, ParseEnumError};

/// Operand width: 1, 2, 4 or 8 bytes.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, FromPrimitive, ToPrimitive)]
pub enum Mode {
    Byte,
    Short,
    Word,
    Quad,
}

impl Mode {
    /// Width in bytes.
    #[inline]
    pub fn size(self) -> u32 {
        1 << (self as u32)
    }

    /// Mask covering the low `size()` bytes of a 64-bit value.
    #[inline]
    pub fn mask(self) -> u64 {
        match self {
            Mode::Quad => u64::MAX,
            _ => (1u64 << (self.size() * 8)) - 1,
        }
    }

    pub fn suffix(self) -> &'static str {
        match self {
            Mode::Byte => ".b",
            Mode::Short => ".s",
            Mode::Word => ".w",
            Mode::Quad => ".q",
        }
    }
}

impl FromStr for Mode {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Mode, ParseEnumError> {
        match s {
            "b" => Ok(Mode::Byte),
            "s" => Ok(Mode::Short),
            "w" => Ok(Mode::Word),
            "q" => Ok(Mode::Quad),
            _ => Err(ParseEnumError::new(s, "Mode")),
        }
    }
}

/// The register file: six general-purpose slots plus the stack pointer,
/// instruction pointer, base pointer and flags.
#[derive(Clone, Copy, PartialEq, Eq, Debug, FromPrimitive, ToPrimitive)]
pub enum Register {
    R0,
    R1,
    R2,
    R3,
    R4,
    R5,
    Sp,
    Ip,
    Bp,
    Flg,
}

impl Register {
    pub fn name(self) -> &'static str {
        REGISTER_NAMES[self as usize]
    }
}

const REGISTER_NAMES: [&str; REGISTER_COUNT] = [
    "r0", "r1", "r2", "r3", "r4", "r5", "sp", "ip", "bp", "flg",
];

impl FromStr for Register {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Register, ParseEnumError> {
        REGISTER_NAMES
            .iter()
            .position(|name| *name == s)
            .and_then(Register::from_usize)
            .ok_or_else(|| ParseEnumError::new(s, "Register"))
    }
}

#[inline]
pub fn register_index(id: Register) -> usize {
    id as usize
}

/// Addressing mode of the variable operand: a register id or an inline
/// immediate.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AddrMode {
    Reg,
    Imm,
}

macro_rules! opcodes {
    ($( $variant:ident, $mnemonic:literal, $arity:literal; )*) => {
        /// Operation codes, 6 bits each.
        #[derive(Clone, Copy, PartialEq, Eq, Debug, FromPrimitive, ToPrimitive)]
        pub enum Opcode {
            $( $variant, )*
        }

        impl Opcode {
            /// Number of operands this opcode takes (0, 1 or 2).
            pub fn arity(self) -> u8 {
                match self {
                    $( Opcode::$variant => $arity, )*
                }
            }

            pub fn mnemonic(self) -> &'static str {
                match self {
                    $( Opcode::$variant => $mnemonic, )*
                }
            }
        }

        impl FromStr for Opcode {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Opcode, ParseEnumError> {
                match s {
                    $( $mnemonic => Ok(Opcode::$variant), )*
                    _ => Err(ParseEnumError::new(s, "Opcode")),
                }
            }
        }
    };
}

opcodes! {
    Halt,   "halt",   0;
    Ret,    "ret",    1;
    Jmp,    "jmp",    1;
    Jmpz,   "jmpz",   1;
    Jmpnz,  "jmpnz",  1;
    Jmpg,   "jmpg",   1;
    Jmps,   "jmps",   1;
    Not,    "not",    1;
    BNot,   "bnot",   1;
    Inc,    "inc",    1;
    Dec,    "dec",    1;
    Push,   "push",   1;
    Pop,    "pop",    1;
    Popn,   "popn",   1;
    Puti,   "puti",   1;
    Puts,   "puts",   1;
    Putc,   "putc",   1;
    Ncall,  "ncall",  1;
    Dlloc,  "dlloc",  1;
    Call,   "call",   1;
    Alloca, "alloca", 2;
    Rmem,   "rmem",   2;
    Mov,    "mov",    2;
    Add,    "add",    2;
    Sub,    "sub",    2;
    And,    "and",    2;
    Or,     "or",     2;
    Sar,    "sar",    2;
    Sal,    "sal",    2;
    Xor,    "xor",    2;
    Bor,    "bor",    2;
    Band,   "band",   2;
    Mul,    "mul",    2;
    Div,    "div",    2;
    Mod,    "mod",    2;
    Cmp,    "cmp",    2;
    Alloc,  "alloc",  2;
}

/// A decoded instruction.
///
/// `rmd` describes operand A for unary opcodes and operand B for binary
/// opcodes; operand A of a binary opcode is always register-based. `imm` must
/// be zero when no immediate tail is present, which makes
/// `decode(encode(i)) == i` hold for every well-formed instruction.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Instruction {
    pub opc: Opcode,
    /// Destination width.
    pub dsz: Mode,
    pub ra: Register,
    /// Operand A is a memory reference.
    pub iam: bool,
    pub rmd: AddrMode,
    pub rb: Register,
    /// Operand B is a memory reference.
    pub ibm: bool,
    /// Operand B is an effective address `[rb + imm]`.
    pub iea: bool,
    /// Width of the immediate tail.
    pub ims: Mode,
    pub imm: i64,
}

impl Instruction {
    pub fn new(opc: Opcode) -> Instruction {
        Instruction {
            opc,
            dsz: Mode::Quad,
            ra: Register::R0,
            iam: false,
            rmd: AddrMode::Reg,
            rb: Register::R0,
            ibm: false,
            iea: false,
            ims: Mode::Byte,
            imm: 0,
        }
    }

    pub fn with_dsz(mut self, dsz: Mode) -> Instruction {
        self.dsz = dsz;
        self
    }

    /// Whether an immediate tail follows the header bytes.
    #[inline]
    pub fn has_imm(&self) -> bool {
        self.rmd == AddrMode::Imm || self.iea
    }

    /// Number of bytes this instruction occupies when encoded.
    pub fn encoded_len(&self) -> u32 {
        let arity = self.opc.arity() as u32;
        let header = 1 + arity.min(1) + arity / 2;
        if self.has_imm() {
            header + self.ims.size()
        } else {
            header
        }
    }
}

/// Constructs a no-operand instruction.
pub fn instr_0(opc: Opcode) -> Instruction {
    Instruction::new(opc)
}

/// Constructs a unary instruction with a register operand.
pub fn instr_reg(opc: Opcode, ra: Register) -> Instruction {
    Instruction {
        ra,
        ..Instruction::new(opc)
    }
}

/// Constructs a unary instruction with a memory-through-register operand.
pub fn instr_mem_reg(opc: Opcode, ra: Register) -> Instruction {
    Instruction {
        ra,
        iam: true,
        ..Instruction::new(opc)
    }
}

/// Constructs a unary instruction with an immediate operand.
pub fn instr_imm(opc: Opcode, ims: Mode, imm: i64) -> Instruction {
    Instruction {
        rmd: AddrMode::Imm,
        ims,
        imm,
        ..Instruction::new(opc)
    }
}

/// Constructs a unary instruction addressing memory at an immediate offset.
pub fn instr_mem_imm(opc: Opcode, ims: Mode, imm: i64) -> Instruction {
    Instruction {
        iam: true,
        rmd: AddrMode::Imm,
        ims,
        imm,
        ..Instruction::new(opc)
    }
}

/// Constructs a binary register-register instruction.
pub fn instr_reg_reg(opc: Opcode, ra: Register, rb: Register) -> Instruction {
    Instruction {
        ra,
        rb,
        ..Instruction::new(opc)
    }
}

/// Constructs a binary instruction with an immediate operand B.
pub fn instr_reg_imm(opc: Opcode, ra: Register, ims: Mode, imm: i64) -> Instruction {
    Instruction {
        ra,
        rmd: AddrMode::Imm,
        ims,
        imm,
        ..Instruction::new(opc)
    }
}

/// Constructs a binary instruction reading B through a register: `a, [rb]`.
pub fn instr_reg_mem(opc: Opcode, ra: Register, rb: Register) -> Instruction {
    Instruction {
        ra,
        rb,
        ibm: true,
        ..Instruction::new(opc)
    }
}

/// Constructs a binary instruction with an effective address: `a, [rb + off]`.
pub fn instr_reg_ea(opc: Opcode, ra: Register, rb: Register, ims: Mode, off: i64) -> Instruction {
    Instruction {
        ra,
        rb,
        ibm: true,
        iea: true,
        ims,
        imm: off,
        ..Instruction::new(opc)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DecodeError {
    /// The buffer ends inside the instruction.
    UnexpectedEnd,
    BadOpcode(u8),
    BadRegister(u8),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DecodeError::UnexpectedEnd => f.write_str("instruction is truncated"),
            DecodeError::BadOpcode(op) => write!(f, "unknown opcode {:#04x}", op),
            DecodeError::BadRegister(r) => write!(f, "unknown register id {}", r),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Appends the encoded form of `instr` to `buf`, returning the number of
/// bytes written.
pub fn encode(buf: &mut Vec<u8>, instr: &Instruction) -> u32 {
    let arity = instr.opc.arity();
    buf.push((instr.opc as u8 & OPCODE_MASK) | ((instr.dsz as u8) << DSZ_OFFSET));

    if arity >= 1 {
        // Single-operand immediates reuse the ra field for the width.
        let ra = if arity == 1 && instr.rmd == AddrMode::Imm {
            instr.ims as u8
        } else {
            instr.ra as u8
        };
        let mut b2 = ra & RA_MASK;
        if instr.iam {
            b2 |= IAM_MASK;
        }
        if instr.rmd == AddrMode::Imm {
            b2 |= RMD_MASK;
        }
        b2 |= (instr.ims as u8) << IMS_OFFSET;
        buf.push(b2);
    }

    if arity == 2 {
        let mut b3 = instr.rb as u8 & RB_MASK;
        if instr.ibm {
            b3 |= IBM_MASK;
        }
        if instr.iea {
            b3 |= IEA_MASK;
        }
        buf.push(b3);
    }

    if instr.has_imm() {
        let size = instr.ims.size() as usize;
        let start = buf.len();
        buf.resize(start + size, 0u8);
        write_int(&mut buf[start..], instr.imm, instr.ims);
    }

    instr.encoded_len()
}

fn register_from_bits(bits: u8) -> Result<Register, DecodeError> {
    Register::from_u8(bits).ok_or(DecodeError::BadRegister(bits))
}

/// Decodes the instruction starting at `offset`, returning it together with
/// the number of bytes consumed.
pub fn decode(buf: &[u8], offset: usize) -> Result<(Instruction, u32), DecodeError> {
    let b1 = *buf.get(offset).ok_or(DecodeError::UnexpectedEnd)?;

    let opc_bits = b1 & OPCODE_MASK;
    let opc = Opcode::from_u8(opc_bits).ok_or(DecodeError::BadOpcode(opc_bits))?;
    let dsz = Mode::from_u8(b1 >> DSZ_OFFSET).unwrap();

    let mut instr = Instruction::new(opc).with_dsz(dsz);
    let arity = opc.arity();
    let mut pos = offset + 1;

    if arity >= 1 {
        let b2 = *buf.get(pos).ok_or(DecodeError::UnexpectedEnd)?;
        pos += 1;

        instr.iam = b2 & IAM_MASK != 0;
        instr.rmd = if b2 & RMD_MASK != 0 {
            AddrMode::Imm
        } else {
            AddrMode::Reg
        };
        instr.ims = Mode::from_u8(b2 >> IMS_OFFSET).unwrap();

        if arity == 1 && instr.rmd == AddrMode::Imm {
            instr.ims = Mode::from_u8(b2 & RA_MASK).ok_or(DecodeError::BadRegister(b2 & RA_MASK))?;
        } else {
            instr.ra = register_from_bits(b2 & RA_MASK)?;
        }
    }

    if arity == 2 {
        let b3 = *buf.get(pos).ok_or(DecodeError::UnexpectedEnd)?;
        pos += 1;

        instr.rb = register_from_bits(b3 & RB_MASK)?;
        instr.ibm = b3 & IBM_MASK != 0;
        instr.iea = b3 & IEA_MASK != 0;
    }

    if instr.has_imm() {
        let size = instr.ims.size() as usize;
        let tail = buf
            .get(pos..pos + size)
            .ok_or(DecodeError::UnexpectedEnd)?;
        instr.imm = read_int(tail, instr.ims);
        pos += size;
    }

    Ok((instr, (pos - offset) as u32))
}

/// Writes the low `width` bytes of `value` to `dst` in little-endian order.
pub fn write_int(dst: &mut [u8], value: i64, width: Mode) {
    let size = width.size() as usize;
    Endian::write_uint(&mut dst[..size], value as u64 & width.mask(), size);
}

/// Reads a `width`-byte little-endian integer from `src`, sign-extending to
/// 64 bits.
pub fn read_int(src: &[u8], width: Mode) -> i64 {
    Endian::read_int(&src[..width.size() as usize], width.size() as usize)
}

/// Reads a `width`-byte little-endian integer from `src`, zero-extending to
/// 64 bits.
pub fn read_uint(src: &[u8], width: Mode) -> u64 {
    Endian::read_uint(&src[..width.size() as usize], width.size() as usize)
}

/// The smallest width that holds `value` treated as unsigned. Used by the
/// assembler to pick minimum-width immediates.
pub fn integer_width(value: u64) -> Mode {
    if value <= u64::from(u8::MAX) {
        Mode::Byte
    } else if value <= u64::from(u16::MAX) {
        Mode::Short
    } else if value <= u64::from(u32::MAX) {
        Mode::Word
    } else {
        Mode::Quad
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}{}", self.opc.mnemonic(), self.dsz.suffix())?;

        let arity = self.opc.arity();
        if arity == 0 {
            return Ok(());
        }

        f.write_str(" ")?;
        if arity == 1 {
            write_operand(f, self.iam, self.rmd, self.ra, false, self.imm)
        } else {
            write_operand(f, self.iam, AddrMode::Reg, self.ra, false, 0)?;
            f.write_str(" ")?;
            write_operand(f, self.ibm, self.rmd, self.rb, self.iea, self.imm)
        }
    }
}

fn write_operand(
    f: &mut fmt::Formatter,
    mem: bool,
    rmd: AddrMode,
    reg: Register,
    ea: bool,
    imm: i64,
) -> fmt::Result {
    if mem {
        f.write_str("[")?;
    }
    match rmd {
        AddrMode::Reg => {
            f.write_str(reg.name())?;
            if ea {
                if imm < 0 {
                    write!(f, ", -{}", -imm)?;
                } else {
                    write!(f, ", +{}", imm)?;
                }
            }
        }
        AddrMode::Imm => write!(f, "{}", imm)?,
    }
    if mem {
        f.write_str("]")?;
    }
    Ok(())
}

/// Walks the instruction stream of `image`, printing one instruction per
/// line. Undecodable bytes print as `not-sup` and are skipped one at a time.
pub fn disassemble<W: std::io::Write>(
    image: &cynfile::CodeImage,
    out: &mut W,
    show_addr: bool,
) -> std::io::Result<()> {
    let bytes = image.bytes();
    let mut ip = image.header().db as usize;

    while ip < bytes.len() {
        if show_addr {
            write!(out, "{:08}: ", ip)?;
        }
        match decode(bytes, ip) {
            Ok((instr, size)) => {
                writeln!(out, "{}", instr)?;
                ip += size as usize;
            }
            Err(err) => {
                writeln!(out, "not-sup ({})", err)?;
                ip += 1;
            }
        }
    }
    Ok(())
}
