use pest_derive::Parser;

#[derive(Parser)]
#[grammar = "asm.pest"]
pub struct AsmParser;
