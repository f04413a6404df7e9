//! The parse pass: walks the parsed program line by line, building the
//! instruction list and the data block while recording symbols and forward
//! references. Errors are accumulated so one pass reports everything;
//! recovery is per line.

use crate::literals;
use crate::symbols::{Patch, Symbol, SymbolTable, SymbolTag};
use crate::{err_at, Error, Result, Rule};
use cynvm::{
    instr, integer_width, AddrMode, Instruction, Mode, Opcode, Register,
};
use matches::debug_assert_matches;
use pest::iterators::Pair;
use std::str::FromStr;

pub struct Assembler<'i> {
    pub symbols: SymbolTable<'i>,
    pub patches: Vec<Patch<'i>>,
    pub instructions: Vec<Instruction>,
    pub constants: Vec<u8>,
    pub(crate) errors: Vec<Error>,
}

impl<'i> Assembler<'i> {
    pub fn new() -> Assembler<'i> {
        let mut asm = Assembler {
            symbols: SymbolTable::default(),
            patches: Vec::new(),
            instructions: Vec::new(),
            constants: Vec::new(),
            errors: Vec::new(),
        };

        // argc/argv name the stack slots a callee finds its argument count
        // and last-pushed argument at, relative to bp.
        asm.define("argc", 16);
        asm.define("argv", 24);

        asm.define("__stdin", 0);
        asm.define("__stdout", 1);
        asm.define("__stderr", 2);
        for (id, builtin) in cynvm::builtins::all().iter().enumerate() {
            asm.define(builtin.sym, id as u64);
        }

        asm
    }

    fn define(&mut self, name: &'static str, value: u64) {
        self.symbols.insert(
            name,
            Symbol {
                tag: SymbolTag::Define,
                id: value,
                size: 0,
                span: None,
            },
        );
    }

    /// Consumes the parsed program; returns the filled assembler or every
    /// error the pass produced.
    pub fn process(mut self, program: Pair<'i, Rule>) -> std::result::Result<Assembler<'i>, Vec<Error>> {
        debug_assert_matches!(program.as_rule(), Rule::program);

        for line in program.into_inner() {
            let result = match line.as_rule() {
                Rule::var_decl => self.parse_var_decl(line),
                Rule::labeled_instruction => self.parse_labeled_instruction(line),
                Rule::EOI => Ok(()),
                _ => unreachable!(),
            };
            if let Err(error) = result {
                self.errors.push(error);
            }
        }

        if self.errors.is_empty() {
            Ok(self)
        } else {
            Err(self.errors)
        }
    }

    fn parse_labeled_instruction(&mut self, pair: Pair<'i, Rule>) -> Result<()> {
        for part in pair.into_inner() {
            match part.as_rule() {
                Rule::label => self.parse_label(part)?,
                Rule::instruction => self.parse_instruction(part)?,
                _ => unreachable!(),
            }
        }
        Ok(())
    }

    fn parse_label(&mut self, pair: Pair<'i, Rule>) -> Result<()> {
        let ident = pair.into_inner().next().unwrap();
        let name = ident.as_str();

        if self.symbols.contains(name) {
            return Err(err_at(format!(
                    "label '{}' already defined at {}",
                    name,
                    self.symbols.definition_site(name)
                ), ident.as_span()));
        }

        self.symbols.insert(
            name,
            Symbol {
                tag: SymbolTag::Label,
                id: self.instructions.len() as u64,
                size: 0,
                span: Some(ident.as_span()),
            },
        );
        Ok(())
    }

    fn parse_instruction(&mut self, pair: Pair<'i, Rule>) -> Result<()> {
        let span = pair.as_span();
        let mut pairs = pair.into_inner();

        let mnemonic = pairs.next().unwrap();
        let opc = Opcode::from_str(mnemonic.as_str()).map_err(|_| {
            err_at(format!("unsupported instruction '{}'", mnemonic.as_str()), mnemonic.as_span())
        })?;

        let mut instr = Instruction::new(opc);
        let mut next = pairs.next();

        if let Some(tail) = &next {
            if tail.as_rule() == Rule::mode_tail {
                instr.dsz = parse_mode(tail.as_str().trim_start_matches('.'), tail.as_span())?;
                next = pairs.next();
            }
        }

        let mut args: Vec<Pair<Rule>> = Vec::new();
        if let Some(arg) = next {
            args.push(arg);
        }
        args.extend(pairs);

        if args.len() != usize::from(opc.arity()) {
            return Err(err_at(format!(
                    "instruction '{}' expects {} argument(s), got {}",
                    opc.mnemonic(),
                    opc.arity(),
                    args.len()
                ), span));
        }

        let mut args = args.into_iter();
        if let Some(arg) = args.next() {
            self.parse_arg(arg, &mut instr, false)?;
        }
        if let Some(arg) = args.next() {
            self.parse_arg(arg, &mut instr, true)?;
        }

        self.instructions.push(instr);
        Ok(())
    }

    /// Parses one instruction operand. Identifiers classify in order:
    /// register name, defined symbol, then label (possibly forward).
    fn parse_arg(&mut self, pair: Pair<'i, Rule>, instr: &mut Instruction, is_b: bool) -> Result<()> {
        let body = pair.into_inner().next().unwrap();
        let is_mem = body.as_rule() == Rule::mem_arg;
        let mut inner = body.into_inner();

        let mut negative = false;
        let mut signed = false;
        let mut term = inner.next().unwrap();
        if term.as_rule() == Rule::sign {
            signed = true;
            negative = term.as_str() == "-";
            term = inner.next().unwrap();
        }
        let ea = inner.next();

        match term.as_rule() {
            Rule::ident => {
                let span = term.as_span();
                if signed {
                    return Err(err_at("+/- not allowed on variables/labels", span));
                }

                if let Ok(reg) = Register::from_str(term.as_str()) {
                    if is_b {
                        instr.rb = reg;
                        instr.ibm = is_mem;
                    } else {
                        instr.ra = reg;
                        instr.iam = is_mem;
                    }
                    if let Some(ea) = ea {
                        if !is_b {
                            return Err(err_at("an effective address is only allowed as the second operand", ea.as_span()));
                        }
                        self.parse_effective_address(ea, instr)?;
                    }
                } else {
                    self.set_immediate_operand(instr, is_b, is_mem, span.clone())?;
                    self.resolve_symbol_operand(term, instr)?;
                    if let Some(ea) = ea {
                        self.apply_symbol_offset(ea, instr)?;
                    }
                }
            }

            Rule::size_of => {
                let span = term.as_span();
                if signed {
                    return Err(err_at("+/- not allowed on '#' expressions", span));
                }
                let size = self.variable_size(term)?;
                self.set_immediate_operand(instr, is_b, is_mem, span)?;
                instr.imm = i64::from(size);
                instr.ims = integer_width(u64::from(size));
            }

            Rule::integer => {
                let span = term.as_span();
                let magnitude = literals::parse_u64(span.clone())?;
                self.set_immediate_operand(instr, is_b, is_mem, span)?;
                instr.ims = integer_width(magnitude);
                instr.imm = if negative {
                    -(magnitude as i64)
                } else {
                    magnitude as i64
                };
            }

            Rule::char_lit => {
                let span = term.as_span();
                let inner = term.into_inner().next().unwrap();
                let value = literals::parse_char(inner.as_span())?;
                self.set_immediate_operand(instr, is_b, is_mem, span)?;
                instr.ims = Mode::Word;
                instr.imm = i64::from(value);
            }

            Rule::float => {
                let span = term.as_span();
                let mut value = literals::parse_f64(span.clone())?;
                if negative {
                    value = -value;
                }
                self.set_immediate_operand(instr, is_b, is_mem, span)?;
                instr.ims = Mode::Quad;
                instr.imm = value.to_bits() as i64;
            }

            _ => unreachable!(),
        }

        Ok(())
    }

    /// Marks the operand as immediate-mode and flags memory indirection.
    /// The first operand of a two-operand instruction must be a register.
    fn set_immediate_operand(
        &mut self,
        instr: &mut Instruction,
        is_b: bool,
        is_mem: bool,
        span: pest::Span<'i>,
    ) -> Result<()> {
        if instr.opc.arity() == 2 && !is_b {
            return Err(err_at(format!(
                    "the first operand of '{}' must be a register",
                    instr.opc.mnemonic()
                ), span));
        }
        instr.rmd = AddrMode::Imm;
        if is_b {
            instr.ibm = is_mem;
        } else {
            instr.iam = is_mem;
        }
        Ok(())
    }

    /// Substitutes a defined var/define value, or records a patch for a
    /// label (possibly forward) reference. Patches reserve a quad immediate.
    fn resolve_symbol_operand(&mut self, term: Pair<'i, Rule>, instr: &mut Instruction) -> Result<()> {
        let name = term.as_str();
        match self.symbols.get(name) {
            Some(sym) if sym.tag != SymbolTag::Label => {
                instr.imm = sym.id as i64;
                instr.ims = integer_width(sym.id);
            }
            _ => {
                self.patches.push(Patch {
                    instr_index: self.instructions.len(),
                    name,
                    span: term.as_span(),
                });
                instr.imm = 0;
                instr.ims = Mode::Quad;
            }
        }
        Ok(())
    }

    /// A `[var + 8]`-style adjustment folded into the operand at parse time.
    fn apply_symbol_offset(&mut self, ea: Pair<'i, Rule>, instr: &mut Instruction) -> Result<()> {
        let span = ea.as_span();
        if self
            .patches
            .last()
            .map_or(false, |p| p.instr_index == self.instructions.len())
        {
            return Err(err_at("an offset is not allowed on forward references", span));
        }

        let mut inner = ea.into_inner();
        let mut negative = false;
        let mut core = inner.next().unwrap();
        if core.as_rule() == Rule::sign {
            negative = core.as_str() == "-";
            core = inner.next().unwrap();
        }

        if core.as_rule() != Rule::integer {
            return Err(err_at("only integer offsets may be applied to variables", span));
        }

        let magnitude = literals::parse_u64(core.as_span())?;
        let offset = if negative {
            -(magnitude as i64)
        } else {
            magnitude as i64
        };
        instr.imm = instr.imm.wrapping_add(offset);
        instr.ims = integer_width(instr.imm as u64);
        Ok(())
    }

    /// `[reg, +off]` / `[reg + off]`: the displacement is an integer, a
    /// defined symbol or a `#name` size, sign-extended to 64 bits at run
    /// time.
    fn parse_effective_address(&mut self, ea: Pair<'i, Rule>, instr: &mut Instruction) -> Result<()> {
        let mut inner = ea.into_inner();
        let mut negative = false;
        let mut core = inner.next().unwrap();
        if core.as_rule() == Rule::sign {
            negative = core.as_str() == "-";
            core = inner.next().unwrap();
        }

        match core.as_rule() {
            Rule::integer => {
                let magnitude = literals::parse_u64(core.as_span())?;
                instr.ims = integer_width(magnitude);
                instr.imm = if negative {
                    -(magnitude as i64)
                } else {
                    magnitude as i64
                };
            }
            Rule::size_of => {
                if negative {
                    return Err(err_at("'-' not allowed on '#' expressions", core.as_span()));
                }
                let size = self.variable_size(core)?;
                instr.ims = Mode::Quad;
                instr.imm = i64::from(size);
            }
            Rule::ident => {
                let span = core.as_span();
                if negative {
                    return Err(err_at("'-' not allowed on variables", span));
                }
                let name = core.as_str();
                match self.symbols.get(name) {
                    Some(sym) if sym.tag != SymbolTag::Label => {
                        instr.ims = Mode::Quad;
                        instr.imm = sym.id as i64;
                    }
                    _ => {
                        return Err(err_at(format!("referenced symbol '{}' must be defined before use", name), span));
                    }
                }
            }
            _ => unreachable!(),
        }

        instr.iea = true;
        Ok(())
    }

    /// `#name`: the byte size of variable `name`, which must already be
    /// declared; `#` never applies to registers or forward references.
    fn variable_size(&mut self, size_of: Pair<'i, Rule>) -> Result<u32> {
        let ident = size_of.into_inner().next().unwrap();
        let name = ident.as_str();
        let span = ident.as_span();

        if Register::from_str(name).is_ok() {
            return Err(err_at("'#' operator cannot be applied to register arguments", span));
        }

        match self.symbols.get(name) {
            None => Err(err_at(format!("reference to undefined variable '{}'", name), span)),
            Some(sym) if sym.tag != SymbolTag::Var => Err(err_at(format!("cannot read size of non variable symbol '{}'", name), span)),
            Some(sym) => Ok(sym.size),
        }
    }

    fn parse_var_decl(&mut self, pair: Pair<'i, Rule>) -> Result<()> {
        let mut pairs = pair.into_inner();
        let ident = pairs.next().unwrap();
        let name = ident.as_str();

        if self.symbols.contains(name) {
            return Err(err_at(format!(
                    "symbol with name '{}' already defined at {}",
                    name,
                    self.symbols.definition_site(name)
                ), ident.as_span()));
        }

        let pos = cynfile::HEADER_SIZE as u64 + self.constants.len() as u64;
        let init = pairs.next().unwrap();
        let size = match init.as_rule() {
            Rule::byte_list => self.parse_byte_list(init)?,
            Rule::string => self.parse_string_data(init)?,
            Rule::reservation => self.parse_reservation(init)?,
            Rule::scalar => self.parse_scalar_data(init)?,
            _ => unreachable!(),
        };

        self.symbols.insert(
            name,
            Symbol {
                tag: SymbolTag::Var,
                id: pos,
                size,
                span: Some(ident.as_span()),
            },
        );
        Ok(())
    }

    fn parse_byte_list(&mut self, pair: Pair<'i, Rule>) -> Result<u32> {
        let mut size = 0u32;
        for item in pair.into_inner() {
            let inner = item.into_inner().next().unwrap();
            let span = inner.as_span();
            let value = match inner.as_rule() {
                Rule::char_lit => literals::parse_char(inner.into_inner().next().unwrap().as_span())?,
                Rule::integer => literals::parse_u64(span.clone())? as u32,
                _ => unreachable!(),
            };
            if value > 0xFF {
                return Err(err_at("byte arrays support ascii characters or bytes in range 0x00 - 0xFF", span));
            }
            self.constants.push(value as u8);
            size += 1;
        }
        Ok(size)
    }

    fn parse_string_data(&mut self, pair: Pair<'i, Rule>) -> Result<u32> {
        let inner = pair.into_inner().next().unwrap();
        let bytes = literals::unescape_string(inner.as_span())?;
        self.constants.extend_from_slice(&bytes);
        Ok(bytes.len() as u32)
    }

    fn parse_reservation(&mut self, pair: Pair<'i, Rule>) -> Result<u32> {
        let mut inner = pair.into_inner();
        let count_pair = inner.next().unwrap();
        let count = literals::parse_u64(count_pair.as_span())?;

        let unit = match inner.next() {
            Some(tick) => parse_tick_mode(&tick)?.size(),
            None => 1,
        };

        let size = count
            .checked_mul(u64::from(unit))
            .filter(|total| self.constants.len() as u64 + total <= u64::from(u32::MAX))
            .ok_or_else(|| {
                err_at("reservation is too big", count_pair.as_span())
            })? as u32;

        self.constants
            .resize(self.constants.len() + size as usize, 0u8);
        Ok(size)
    }

    fn parse_scalar_data(&mut self, pair: Pair<'i, Rule>) -> Result<u32> {
        let mut inner = pair.into_inner();

        let mut negative = false;
        let mut signed = false;
        let mut value_pair = inner.next().unwrap();
        if value_pair.as_rule() == Rule::sign {
            signed = true;
            negative = value_pair.as_str() == "-";
            value_pair = inner.next().unwrap();
        }
        let tick = inner.next();

        match value_pair.as_rule() {
            Rule::integer => {
                let mode = match tick {
                    Some(tick) => parse_tick_mode(&tick)?,
                    None => Mode::Quad,
                };
                let magnitude = literals::parse_u64(value_pair.as_span())?;
                let value = if negative {
                    -(magnitude as i64)
                } else {
                    magnitude as i64
                };
                Ok(self.append_integral(value, mode))
            }

            Rule::char_lit => {
                let span = value_pair.as_span();
                if signed {
                    return Err(err_at(format!(
                            "unsupported sign '{}' before character",
                            if negative { '-' } else { '+' }
                        ), span));
                }
                if let Some(tick) = tick {
                    return Err(err_at("mode suffixes are not supported on character data", tick.as_span()));
                }
                let value = literals::parse_char(value_pair.into_inner().next().unwrap().as_span())?;
                Ok(self.append_integral(i64::from(value), Mode::Byte))
            }

            Rule::float => {
                let span = value_pair.as_span();
                let mode = match tick {
                    Some(tick) => {
                        let mode = parse_tick_mode(&tick)?;
                        if mode != Mode::Word && mode != Mode::Quad {
                            return Err(err_at("float data must use mode 'w' or 'q'", tick.as_span()));
                        }
                        mode
                    }
                    None => Mode::Quad,
                };
                let mut value = literals::parse_f64(span)?;
                if negative {
                    value = -value;
                }
                let bits = match mode {
                    Mode::Word => i64::from((value as f32).to_bits()),
                    _ => value.to_bits() as i64,
                };
                Ok(self.append_integral(bits, mode))
            }

            _ => unreachable!(),
        }
    }

    /// Appends `value` to the data block at the given width, returning the
    /// byte count.
    fn append_integral(&mut self, value: i64, mode: Mode) -> u32 {
        let size = mode.size();
        let start = self.constants.len();
        self.constants.resize(start + size as usize, 0u8);
        instr::write_int(&mut self.constants[start..], value, mode);
        size
    }
}

fn parse_mode(text: &str, span: pest::Span) -> Result<Mode> {
    Mode::from_str(text).map_err(|_| {
        err_at(format!("unsupported mode '{}', use b/s/w/q", text), span)
    })
}

fn parse_tick_mode(pair: &Pair<Rule>) -> Result<Mode> {
    parse_mode(pair.as_str().trim_start_matches('`'), pair.as_span())
}
