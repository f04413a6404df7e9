//! Virtual machine for the cyn bytecode.
//!
//! The crate is organised around three pieces: the instruction codec in
//! [`instr`] (shared verbatim with the assembler, so both sides of the
//! toolchain agree on every byte), the heap allocator in [`heap`], and the
//! fetch-decode-execute loop in [`vm`] with its native-call bridge in
//! [`builtins`].

pub mod builtins;
pub mod constants;
pub mod heap;
pub mod instr;
pub mod memory;
pub mod value;
pub mod vm;

pub use crate::heap::Heap;
pub use crate::instr::{
    decode, disassemble, encode, instr_0, instr_imm, instr_mem_imm, instr_mem_reg, instr_reg,
    instr_reg_ea, instr_reg_imm, instr_reg_mem, instr_reg_reg, integer_width, read_int, read_uint,
    register_index, write_int, AddrMode, DecodeError, Instruction, Mode, Opcode, Register,
};
pub use crate::memory::Ram;
pub use crate::value::Value;
pub use crate::vm::{Fault, Vm};

#[cfg(test)]
mod test;
