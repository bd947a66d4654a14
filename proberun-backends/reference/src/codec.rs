//! Little-endian, length-prefixed container for templates and galleries.
//!
//! Layout: a 4-byte magic, a version byte, then the payload. A vector is a
//! `u32` length followed by that many `f32` values. A gallery payload is a
//! prepared flag byte, a `u32` entry count, then `(u64 id, vector)` pairs.

use std::io::{self, Read, Write};

use proberun_core::TemplateId;

use crate::errors::CodecError;

pub(crate) const TEMPLATE_MAGIC: [u8; 4] = *b"PRBT";
pub(crate) const GALLERY_MAGIC: [u8; 4] = *b"PRBG";
const VERSION: u8 = 1;

/// Longest vector accepted when decoding.
const MAX_VECTOR_LEN: usize = 4096;

/// Decoded gallery payload.
pub(crate) struct GalleryPayload {
    pub(crate) prepared: bool,
    pub(crate) entries: Vec<(TemplateId, Vec<f32>)>,
}

fn write_header(writer: &mut dyn Write, magic: [u8; 4]) -> io::Result<()> {
    writer.write_all(&magic)?;
    writer.write_all(&[VERSION])
}

fn read_header(reader: &mut dyn Read, expected: [u8; 4]) -> Result<(), CodecError> {
    let mut found = [0; 4];
    reader.read_exact(&mut found)?;
    if found != expected {
        return Err(CodecError::BadMagic { expected, found });
    }
    let mut version = [0; 1];
    reader.read_exact(&mut version)?;
    match version[0] {
        VERSION => Ok(()),
        version => Err(CodecError::UnsupportedVersion { version }),
    }
}

fn write_len(writer: &mut dyn Write, len: usize) -> io::Result<()> {
    let len = u32::try_from(len).map_err(io::Error::other)?;
    writer.write_all(&len.to_le_bytes())
}

fn read_len(reader: &mut dyn Read) -> Result<usize, CodecError> {
    let mut bytes = [0; 4];
    reader.read_exact(&mut bytes)?;
    let len = u32::from_le_bytes(bytes) as usize;
    if len > MAX_VECTOR_LEN {
        return Err(CodecError::Oversized {
            len,
            limit: MAX_VECTOR_LEN,
        });
    }
    Ok(len)
}

fn write_vector(writer: &mut dyn Write, vector: &[f32]) -> io::Result<()> {
    write_len(writer, vector.len())?;
    for value in vector {
        writer.write_all(&value.to_le_bytes())?;
    }
    Ok(())
}

fn read_vector(reader: &mut dyn Read) -> Result<Vec<f32>, CodecError> {
    let len = read_len(reader)?;
    let mut vector = Vec::with_capacity(len);
    let mut bytes = [0; 4];
    for _ in 0..len {
        reader.read_exact(&mut bytes)?;
        vector.push(f32::from_le_bytes(bytes));
    }
    Ok(vector)
}

pub(crate) fn write_template(writer: &mut dyn Write, vector: &[f32]) -> io::Result<()> {
    write_header(writer, TEMPLATE_MAGIC)?;
    write_vector(writer, vector)
}

pub(crate) fn read_template(reader: &mut dyn Read) -> Result<Vec<f32>, CodecError> {
    read_header(reader, TEMPLATE_MAGIC)?;
    read_vector(reader)
}

pub(crate) fn write_gallery<'a>(
    writer: &mut dyn Write,
    prepared: bool,
    entries: impl ExactSizeIterator<Item = (TemplateId, &'a [f32])>,
) -> io::Result<()> {
    write_header(writer, GALLERY_MAGIC)?;
    writer.write_all(&[u8::from(prepared)])?;
    write_len(writer, entries.len())?;
    for (id, vector) in entries {
        writer.write_all(&id.to_le_bytes())?;
        write_vector(writer, vector)?;
    }
    Ok(())
}

pub(crate) fn read_gallery(reader: &mut dyn Read) -> Result<GalleryPayload, CodecError> {
    read_header(reader, GALLERY_MAGIC)?;
    let mut flag = [0; 1];
    reader.read_exact(&mut flag)?;
    let mut count = [0; 4];
    reader.read_exact(&mut count)?;
    let count = u32::from_le_bytes(count) as usize;
    let mut entries = Vec::new();
    let mut id = [0; 8];
    for _ in 0..count {
        reader.read_exact(&mut id)?;
        entries.push((u64::from_le_bytes(id), read_vector(reader)?));
    }
    Ok(GalleryPayload {
        prepared: flag[0] != 0,
        entries,
    })
}
