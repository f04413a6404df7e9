//! Symbol table and forward-reference patch list.
//!
//! Three symbol kinds share one table keyed by name: `define`s (compile-time
//! constants installed before parsing), `var`s (bound to data-block offsets
//! at their declaration) and `label`s (bound to instruction indices,
//! translated to byte offsets by the linker). Operands naming a symbol that
//! is not yet defined - only legal for labels - are recorded as patches and
//! resolved after the whole program has been seen.

use pest::Span;
use std::collections::HashMap;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SymbolTag {
    Label,
    Var,
    Define,
}

#[derive(Clone, Debug)]
pub struct Symbol<'i> {
    pub tag: SymbolTag,
    /// Label: instruction index. Var: absolute image offset. Define: value.
    pub id: u64,
    /// Byte count of a var's data.
    pub size: u32,
    /// Definition site; `None` for predefined symbols.
    pub span: Option<Span<'i>>,
}

#[derive(Default)]
pub struct SymbolTable<'i> {
    map: HashMap<&'i str, Symbol<'i>>,
}

impl<'i> SymbolTable<'i> {
    pub fn get(&self, name: &str) -> Option<&Symbol<'i>> {
        self.map.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    /// Inserts a symbol. Callers check for redefinition first.
    pub fn insert(&mut self, name: &'i str, symbol: Symbol<'i>) {
        self.map.insert(name, symbol);
    }

    /// Describes where `name` was first defined, for redefinition errors.
    pub fn definition_site(&self, name: &str) -> String {
        match self.get(name).and_then(|sym| sym.span.clone()) {
            Some(span) => {
                let (line, col) = span.start_pos().line_col();
                format!("line {}:{}", line, col)
            }
            None => "the predefined symbol set".to_owned(),
        }
    }
}

/// A recorded forward reference: instruction `instr_index` names `name` and
/// must have its immediate rewritten once the symbol is known.
#[derive(Clone, Debug)]
pub struct Patch<'i> {
    pub instr_index: usize,
    pub name: &'i str,
    pub span: Span<'i>,
}
