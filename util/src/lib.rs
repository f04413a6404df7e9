use std::{error::Error, fmt};

/// Byte order used everywhere in the toolchain: immediates, header fields
/// and data initializers are all little-endian.
pub type Endian = byteorder::LittleEndian;

/// Raised when a name matches no variant of the enum called `what`
/// (register names, mnemonics, mode letters).
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct ParseEnumError {
    what: &'static str,
    found: String,
}

impl ParseEnumError {
    pub fn new(found: &str, what: &'static str) -> ParseEnumError {
        ParseEnumError {
            what,
            found: found.to_owned(),
        }
    }

    pub fn found(&self) -> &str {
        &self.found
    }
}

impl fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "no {} is named \"{}\"", self.what, self.found)
    }
}

impl Error for ParseEnumError {}
