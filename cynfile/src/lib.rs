//! Container for linked cyn code images.
//!
//! An image is a flat byte buffer with a fixed 12-byte header followed by the
//! data block and the instruction stream:
//!
//! ```text
//! +---------------- CodeHeader ----------------+
//! | u32 size      total bytes in the image     |
//! | u32 db        offset where code begins     |
//! | u32 main      absolute offset of the entry |
//! +--------------------------------------------+
//! | data block                                 |  db - 12 bytes
//! +--------------------------------------------+
//! | instruction stream                         |  size - db bytes
//! +--------------------------------------------+
//! ```
//!
//! All offsets are absolute from the start of the image. There is no magic
//! number; callers identify images by file extension or context.

use byteorder::{ByteOrder, ReadBytesExt};
use std::fs::File;
use std::io::prelude::*;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::{error, fmt, io, mem};
use util::Endian;

/// Size of the serialized [`CodeHeader`] in bytes.
pub const HEADER_SIZE: u32 = (mem::size_of::<u32>() * 3) as u32;

/// Fixed header at the start of every code image.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CodeHeader {
    /// Total number of bytes in the image, header included.
    pub size: u32,
    /// Absolute offset at which the instruction stream begins.
    pub db: u32,
    /// Absolute offset of the entry instruction.
    pub main: u32,
}

impl CodeHeader {
    pub fn read_from(buf: &[u8]) -> CodeHeader {
        CodeHeader {
            size: Endian::read_u32(&buf[0..4]),
            db: Endian::read_u32(&buf[4..8]),
            main: Endian::read_u32(&buf[8..12]),
        }
    }

    pub fn write_to(&self, buf: &mut [u8]) {
        Endian::write_u32(&mut buf[0..4], self.size);
        Endian::write_u32(&mut buf[4..8], self.db);
        Endian::write_u32(&mut buf[8..12], self.main);
    }
}

#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    /// The header fields do not describe the buffer they came with.
    Malformed(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "{}", err),
            Error::Malformed(msg) => write!(f, "malformed code image: {}", msg),
        }
    }
}

impl error::Error for Error {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::Io(err)
    }
}

/// A linked, self-describing program image.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CodeImage {
    bytes: Vec<u8>,
}

impl CodeImage {
    /// Wraps a finished image buffer, validating the header against it.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<CodeImage, Error> {
        if (bytes.len() as u64) < u64::from(HEADER_SIZE) {
            return Err(Error::Malformed(format!(
                "{} bytes is too short to hold a header",
                bytes.len()
            )));
        }

        let header = CodeHeader::read_from(&bytes);
        if header.size as usize != bytes.len() {
            return Err(Error::Malformed(format!(
                "header size {} does not match buffer length {}",
                header.size,
                bytes.len()
            )));
        }
        if header.db < HEADER_SIZE || header.db > header.size {
            return Err(Error::Malformed(format!(
                "data block end {} outside of [{}, {}]",
                header.db, HEADER_SIZE, header.size
            )));
        }
        if header.main < header.db || header.main > header.size {
            return Err(Error::Malformed(format!(
                "entry offset {} outside of the instruction stream",
                header.main
            )));
        }

        Ok(CodeImage { bytes })
    }

    pub fn header(&self) -> CodeHeader {
        CodeHeader::read_from(&self.bytes)
    }

    /// The whole image, header included.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes[..]
    }

    /// The data block (between the header and the instruction stream).
    pub fn data(&self) -> &[u8] {
        let header = self.header();
        &self.bytes[HEADER_SIZE as usize..header.db as usize]
    }

    /// The instruction stream.
    pub fn instructions(&self) -> &[u8] {
        let header = self.header();
        &self.bytes[header.db as usize..]
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

pub fn read<R: Read>(reader: &mut R) -> Result<CodeImage, Error> {
    let size = reader.read_u32::<Endian>()?;
    let db = reader.read_u32::<Endian>()?;
    let main = reader.read_u32::<Endian>()?;

    let mut bytes = vec![0u8; HEADER_SIZE as usize];
    CodeHeader { size, db, main }.write_to(&mut bytes);

    if size < HEADER_SIZE {
        return Err(Error::Malformed(format!(
            "header size {} is smaller than the header itself",
            size
        )));
    }

    bytes.resize(size as usize, 0u8);
    reader.read_exact(&mut bytes[HEADER_SIZE as usize..])?;

    CodeImage::from_bytes(bytes)
}

pub fn write<W: Write>(writer: &mut W, image: &CodeImage) -> io::Result<()> {
    writer.write_all(image.bytes())
}

pub trait ReadImageExt: Read + Sized {
    fn read_image(&mut self) -> Result<CodeImage, Error> {
        read(self)
    }
}

impl<R: Read + Sized> ReadImageExt for R {}

pub trait WriteImageExt: Write + Sized {
    fn write_image(&mut self, image: &CodeImage) -> io::Result<()> {
        write(self, image)
    }
}

impl<W: Write + Sized> WriteImageExt for W {}

pub fn read_file<P: AsRef<Path>>(path: P) -> Result<CodeImage, Error> {
    BufReader::new(File::open(path)?).read_image()
}

pub fn write_file<P: AsRef<Path>>(path: P, image: &CodeImage) -> io::Result<()> {
    BufWriter::new(File::create(path)?).write_image(image)
}
