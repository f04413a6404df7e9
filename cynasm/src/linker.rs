//! The link pass: lays out the image, rewrites patched immediates and
//! finalizes the header.
//!
//! Labels were bound to instruction indices during parsing; linking computes
//! each instruction's absolute byte offset, turns label references into
//! signed ip-relative displacements (relative to the referencing
//! instruction's own first byte) and variable references into absolute image
//! offsets. Unresolved names are diagnosed without emitting an image, but
//! the pass keeps going so every remaining error is reported at once.

use crate::assembler::Assembler;
use crate::symbols::SymbolTag;
use crate::{err_at, Error};
use cynfile::{CodeHeader, CodeImage, HEADER_SIZE};
use cynvm::instr;

pub fn link(asm: Assembler) -> Result<CodeImage, Vec<Error>> {
    let Assembler {
        symbols,
        patches,
        mut instructions,
        constants,
        ..
    } = asm;

    let db = HEADER_SIZE + constants.len() as u32;

    // Absolute byte offset of every instruction, plus the end of the stream
    // so labels binding past the last instruction resolve too.
    let mut offsets = Vec::with_capacity(instructions.len() + 1);
    let mut ip = db;
    for instr in &instructions {
        offsets.push(ip);
        ip += instr.encoded_len();
    }
    offsets.push(ip);

    let mut errors = Vec::new();
    for patch in &patches {
        match symbols.get(patch.name) {
            None => {
                errors.push(err_at(format!("undefined symbol '{}' referenced", patch.name), patch.span.clone()));
            }
            Some(sym) if sym.tag == SymbolTag::Label => {
                let target = offsets[sym.id as usize];
                let own = offsets[patch.instr_index];
                instructions[patch.instr_index].imm = i64::from(target) - i64::from(own);
            }
            Some(sym) => {
                // A var or define that was only declared further down.
                instructions[patch.instr_index].imm = sym.id as i64;
            }
        }
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    let mut bytes = vec![0u8; HEADER_SIZE as usize];
    bytes.extend_from_slice(&constants);
    for instr in &instructions {
        instr::encode(&mut bytes, instr);
    }

    let main = match symbols.get("main") {
        Some(sym) if sym.tag == SymbolTag::Label => offsets[sym.id as usize],
        _ => db,
    };

    CodeHeader {
        size: bytes.len() as u32,
        db,
        main,
    }
    .write_to(&mut bytes);

    Ok(CodeImage::from_bytes(bytes).expect("linked image is well-formed"))
}
