//! Native `.wpt` checkpoint codec
//!
//! Layout (all integers little-endian):
//! - 8 bytes: magic "WPTCKPT\0"
//! - 4 bytes: version (u32)
//! - 4 bytes: tensor count (u32)
//! - For each tensor:
//!   - 4 bytes: name length, then the UTF-8 name
//!   - 4 bytes: dtype (0=BF16, 1=F16, 2=F32)
//!   - 4 bytes: num_dims, then num_dims * 8 bytes of shape (u64 each)
//!   - 8 bytes: data length, then the data
//! - 8 bytes: FNV-1a checksum of everything before it

use std::fs::{self, File};
use std::io::{BufWriter, Cursor, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use weightport_core::{DType, Tensor};

use crate::error::{ModelError, Result};

/// Format version - increment when the layout changes
pub const NATIVE_VERSION: u32 = 1;

/// Magic bytes identifying native checkpoint files
pub const NATIVE_MAGIC: &[u8; 8] = b"WPTCKPT\x00";

const MAX_NAME_LEN: usize = 64 * 1024;
const MAX_DIMS: usize = 16;
const HEADER_LEN: usize = 8 + 4 + 4;
const TRAILER_LEN: usize = 8;

fn dtype_id(dtype: DType) -> u32 {
    match dtype {
        DType::BF16 => 0,
        DType::F16 => 1,
        DType::F32 => 2,
    }
}

fn dtype_from_id(id: u32) -> Result<DType> {
    match id {
        0 => Ok(DType::BF16),
        1 => Ok(DType::F16),
        2 => Ok(DType::F32),
        _ => Err(ModelError::InvalidFormat(format!("unknown dtype id {id}"))),
    }
}

/// Bytes one tensor entry occupies in a native file
pub fn entry_size(name: &str, tensor: &Tensor) -> u64 {
    (4 + name.len() + 4 + 4 + tensor.rank() * 8 + 8 + tensor.size_bytes()) as u64
}

/// Encode tensors into a complete native file image
pub fn encode<S: AsRef<str>>(entries: &[(S, &Tensor)]) -> Result<Vec<u8>> {
    let body: u64 = entries
        .iter()
        .map(|(name, tensor)| entry_size(name.as_ref(), tensor))
        .sum();
    let mut buf = Vec::with_capacity(HEADER_LEN + body as usize + TRAILER_LEN);

    buf.write_all(NATIVE_MAGIC)?;
    buf.write_u32::<LittleEndian>(NATIVE_VERSION)?;
    buf.write_u32::<LittleEndian>(entries.len() as u32)?;

    for (name, tensor) in entries {
        let name = name.as_ref();
        buf.write_u32::<LittleEndian>(name.len() as u32)?;
        buf.write_all(name.as_bytes())?;
        buf.write_u32::<LittleEndian>(dtype_id(tensor.dtype()))?;
        buf.write_u32::<LittleEndian>(tensor.rank() as u32)?;
        for &dim in tensor.shape() {
            buf.write_u64::<LittleEndian>(dim as u64)?;
        }
        let data = tensor.to_le_bytes();
        buf.write_u64::<LittleEndian>(data.len() as u64)?;
        buf.write_all(&data)?;
    }

    let checksum = compute_checksum(&buf);
    buf.write_u64::<LittleEndian>(checksum)?;
    Ok(buf)
}

/// Write tensors to `path`, returning the file size
pub fn write_file<S: AsRef<str>>(path: &Path, entries: &[(S, &Tensor)]) -> Result<u64> {
    let bytes = encode(entries)?;
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(bytes.len() as u64)
}

/// Decode a native file image, preserving stored tensor order
pub fn decode(bytes: &[u8]) -> Result<Vec<(String, Tensor)>> {
    if bytes.len() < HEADER_LEN + TRAILER_LEN {
        return Err(ModelError::InvalidFormat(format!(
            "native checkpoint too short ({} bytes)",
            bytes.len()
        )));
    }

    let (body, trailer) = bytes.split_at(bytes.len() - TRAILER_LEN);
    if &body[..8] != NATIVE_MAGIC {
        return Err(ModelError::InvalidFormat(
            "bad magic, not a native checkpoint".to_string(),
        ));
    }

    let stored = Cursor::new(trailer).read_u64::<LittleEndian>()?;
    let actual = compute_checksum(body);
    if stored != actual {
        return Err(ModelError::InvalidFormat(format!(
            "checksum mismatch: stored {stored:016x}, computed {actual:016x}"
        )));
    }

    let mut reader = Cursor::new(&body[8..]);
    decode_body(&mut reader).map_err(|e| match e {
        ModelError::Io(io) if io.kind() == std::io::ErrorKind::UnexpectedEof => {
            ModelError::InvalidFormat("truncated native checkpoint".to_string())
        }
        other => other,
    })
}

fn decode_body(reader: &mut Cursor<&[u8]>) -> Result<Vec<(String, Tensor)>> {
    let version = reader.read_u32::<LittleEndian>()?;
    if version != NATIVE_VERSION {
        return Err(ModelError::InvalidFormat(format!(
            "version mismatch: found {version}, expected {NATIVE_VERSION}"
        )));
    }

    let count = reader.read_u32::<LittleEndian>()? as usize;
    let mut tensors = Vec::with_capacity(count.min(4096));

    for _ in 0..count {
        let name_len = reader.read_u32::<LittleEndian>()? as usize;
        if name_len > MAX_NAME_LEN {
            return Err(ModelError::InvalidFormat(format!(
                "tensor name length {name_len} exceeds limit"
            )));
        }
        let mut name = vec![0u8; name_len];
        reader.read_exact(&mut name)?;
        let name = String::from_utf8(name)
            .map_err(|_| ModelError::InvalidFormat("tensor name is not UTF-8".to_string()))?;

        let dtype = dtype_from_id(reader.read_u32::<LittleEndian>()?)?;

        let num_dims = reader.read_u32::<LittleEndian>()? as usize;
        if num_dims > MAX_DIMS {
            return Err(ModelError::InvalidFormat(format!(
                "{name}: {num_dims} dimensions exceeds limit"
            )));
        }
        let mut shape = Vec::with_capacity(num_dims);
        for _ in 0..num_dims {
            shape.push(reader.read_u64::<LittleEndian>()? as usize);
        }

        let data_len = reader.read_u64::<LittleEndian>()? as usize;
        let remaining = reader.get_ref().len() - reader.position() as usize;
        if data_len > remaining {
            return Err(ModelError::InvalidFormat(format!(
                "{name}: data length {data_len} exceeds remaining {remaining} bytes"
            )));
        }
        let mut data = vec![0u8; data_len];
        reader.read_exact(&mut data)?;

        let tensor = Tensor::from_le_bytes(shape, dtype, &data)
            .map_err(|e| ModelError::InvalidFormat(format!("{name}: {e}")))?;
        tensors.push((name, tensor));
    }

    if (reader.position() as usize) != reader.get_ref().len() {
        return Err(ModelError::InvalidFormat(
            "trailing bytes after last tensor".to_string(),
        ));
    }
    Ok(tensors)
}

/// Read and decode a native file
pub fn read_file(path: &Path) -> Result<Vec<(String, Tensor)>> {
    let bytes = fs::read(path)?;
    decode(&bytes).map_err(|e| match e {
        ModelError::InvalidFormat(msg) => {
            ModelError::InvalidFormat(format!("{}: {msg}", path.display()))
        }
        other => other,
    })
}

/// FNV-1a 64-bit hash
pub fn compute_checksum(data: &[u8]) -> u64 {
    const FNV_OFFSET: u64 = 14695981039346656037;
    const FNV_PRIME: u64 = 1099511628211;

    let mut hash = FNV_OFFSET;
    for &byte in data {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<(String, Tensor)> {
        vec![
            (
                "encoder.dense.kernel".to_string(),
                Tensor::new(vec![2, 3], vec![0.5, -1.0, 2.25, 3.0, -0.125, 8.0]).unwrap(),
            ),
            (
                "encoder.dense.bias".to_string(),
                Tensor::new(vec![3], vec![0.1, 0.2, 0.3])
                    .unwrap()
                    .with_dtype(DType::BF16),
            ),
        ]
    }

    fn encode_sample() -> Vec<u8> {
        let entries = sample();
        let refs: Vec<(&str, &Tensor)> = entries.iter().map(|(n, t)| (n.as_str(), t)).collect();
        encode(&refs).unwrap()
    }

    #[test]
    fn test_encode_decode() {
        let decoded = decode(&encode_sample()).unwrap();
        assert_eq!(decoded, sample());
        assert_eq!(decoded[1].1.dtype(), DType::BF16);
    }

    #[test]
    fn test_entry_size_matches_encoding() {
        let entries = sample();
        let expected: u64 = entries.iter().map(|(n, t)| entry_size(n, t)).sum();
        let bytes = encode_sample();
        assert_eq!(bytes.len() as u64, expected + (HEADER_LEN + TRAILER_LEN) as u64);
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = encode_sample();
        bytes[0] = b'X';
        assert!(matches!(decode(&bytes), Err(ModelError::InvalidFormat(_))));
    }

    #[test]
    fn test_checksum_detects_corruption() {
        let mut bytes = encode_sample();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xFF;
        let err = decode(&bytes).unwrap_err();
        assert!(err.to_string().contains("checksum"), "{err}");
    }

    #[test]
    fn test_truncated() {
        let bytes = encode_sample();
        assert!(matches!(decode(&bytes[..10]), Err(ModelError::InvalidFormat(_))));

        // Consistent checksum over a truncated body still fails on the body itself
        let mut cut = bytes[..bytes.len() - TRAILER_LEN - 4].to_vec();
        let checksum = compute_checksum(&cut);
        cut.extend_from_slice(&checksum.to_le_bytes());
        assert!(matches!(decode(&cut), Err(ModelError::InvalidFormat(_))));

        // Body ending inside a header field
        let mut cut = bytes[..HEADER_LEN + 2].to_vec();
        let checksum = compute_checksum(&cut);
        cut.extend_from_slice(&checksum.to_le_bytes());
        let err = decode(&cut).unwrap_err();
        assert!(err.to_string().contains("truncated"), "{err}");
    }

    #[test]
    fn test_oversized_shape_is_invalid() {
        let mut body = Vec::new();
        body.extend_from_slice(NATIVE_MAGIC);
        body.write_u32::<LittleEndian>(NATIVE_VERSION).unwrap();
        body.write_u32::<LittleEndian>(1).unwrap();
        body.write_u32::<LittleEndian>(1).unwrap();
        body.extend_from_slice(b"w");
        body.write_u32::<LittleEndian>(dtype_id(DType::F32)).unwrap();
        body.write_u32::<LittleEndian>(2).unwrap();
        body.write_u64::<LittleEndian>(1 << 62).unwrap();
        body.write_u64::<LittleEndian>(8).unwrap();
        body.write_u64::<LittleEndian>(0).unwrap();
        let checksum = compute_checksum(&body);
        body.write_u64::<LittleEndian>(checksum).unwrap();

        let err = decode(&body).unwrap_err();
        assert!(matches!(err, ModelError::InvalidFormat(_)), "{err}");
        assert!(err.to_string().contains("too large"), "{err}");
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weights.wpt");
        let entries = sample();
        let refs: Vec<(&str, &Tensor)> = entries.iter().map(|(n, t)| (n.as_str(), t)).collect();
        let size = write_file(&path, &refs).unwrap();
        assert_eq!(size, fs::metadata(&path).unwrap().len());
        assert_eq!(read_file(&path).unwrap(), entries);
    }
}
