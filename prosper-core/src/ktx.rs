//! KTX 1.0 texture loading.
//!
//! 12-byte magic, a 52-byte little-endian field block (together the
//! fixed 64-byte header), a key-value block this loader skips over
//! entirely, then one `(u32 size, payload, padding to 4 bytes)` entry
//! per mip level. Only the little-endian endianness word and
//! `GL_RGBA16F` internal format are accepted — this loader never
//! guesses at a file it doesn't recognize, it panics.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read, Seek, SeekFrom};

const MAGIC: [u8; 12] = [
    0xAB, 0x4B, 0x54, 0x58, 0x20, 0x31, 0x31, 0xBB, 0x0D, 0x0A, 0x1A, 0x0A,
];
const LITTLE_ENDIAN_MARKER: u32 = 0x0403_0201;
const GL_RGBA16F: u32 = 0x881A;

#[derive(Debug, Clone)]
pub struct MipLevel {
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct KtxTexture {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub array_elements: u32,
    pub faces: u32,
    pub mip_levels: Vec<MipLevel>,
}

fn read_u32(cursor: &mut Cursor<&[u8]>) -> u32 {
    cursor.read_u32::<LittleEndian>().expect("KTX file is truncated")
}

/// Parses a KTX 1.0 texture. Panics on anything this loader doesn't
/// recognize: bad magic, truncated input, big-endian files, or an
/// internal format other than `GL_RGBA16F`.
pub fn parse(bytes: &[u8]) -> KtxTexture {
    assert!(bytes.len() >= 64, "KTX file is truncated");
    assert_eq!(&bytes[..12], &MAGIC[..], "not a KTX file: bad magic number");

    let mut cursor = Cursor::new(bytes);
    cursor.set_position(12);

    let endianness = read_u32(&mut cursor);
    assert_eq!(
        endianness, LITTLE_ENDIAN_MARKER,
        "unsupported KTX endianness word {endianness:#x}"
    );

    let _gl_type = read_u32(&mut cursor);
    let _gl_type_size = read_u32(&mut cursor);
    let _gl_format = read_u32(&mut cursor);
    let gl_internal_format = read_u32(&mut cursor);
    let _gl_base_internal_format = read_u32(&mut cursor);
    let width = read_u32(&mut cursor);
    let height = read_u32(&mut cursor);
    let depth = read_u32(&mut cursor);
    let array_elements = read_u32(&mut cursor);
    let faces = read_u32(&mut cursor);
    let mip_levels_count = read_u32(&mut cursor);
    let bytes_of_key_value_data = read_u32(&mut cursor);

    assert_eq!(
        gl_internal_format, GL_RGBA16F,
        "unsupported glInternalFormat {gl_internal_format:#x}, only RGBA16F is accepted"
    );

    cursor
        .seek(SeekFrom::Current(bytes_of_key_value_data as i64))
        .expect("KTX file is truncated");

    let mip_levels_count = mip_levels_count.max(1);
    let mut mip_levels = Vec::with_capacity(mip_levels_count as usize);
    for _ in 0..mip_levels_count {
        let size = read_u32(&mut cursor);
        let mut data = vec![0u8; size as usize];
        cursor.read_exact(&mut data).expect("KTX file is truncated");

        let padding = (4 - (size % 4)) % 4;
        cursor
            .seek(SeekFrom::Current(padding as i64))
            .expect("KTX file is truncated");

        mip_levels.push(MipLevel { data });
    }

    KtxTexture {
        width,
        height,
        depth: depth.max(1),
        array_elements: array_elements.max(1),
        faces: faces.max(1),
        mip_levels,
    }
}
