//! `.bmt` tensor files.
//!
//! Layout (all integers little-endian):
//!
//! ```text
//! magic    4 bytes  "BMMT"
//! version  u32      1
//! rank     u32
//! dims     rank x u64
//! padding  zeros up to the next TENSOR_FILE_ALIGNMENT boundary
//! data     numel x f32
//! ```
//!
//! Files are written with buffered I/O and read back through a memory map.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use memmap2::Mmap;

use crate::error::{Result, TensorError};
use crate::shape::Shape;
use crate::tensor::Tensor;

/// File magic, the ASCII bytes "BMMT".
pub const TENSOR_FILE_MAGIC: [u8; 4] = *b"BMMT";
/// Current format version.
pub const TENSOR_FILE_VERSION: u32 = 1;
/// Alignment of the data section.
pub const TENSOR_FILE_ALIGNMENT: usize = 32;

/// Upper bound on rank accepted when reading, to reject garbage headers early.
const MAX_RANK: u32 = 8;

/// Write `tensor` to `path`, replacing any existing file.
pub fn write_tensor(path: &Path, tensor: &Tensor) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    let dims = tensor.shape().dims();
    writer.write_all(&TENSOR_FILE_MAGIC)?;
    writer.write_all(&TENSOR_FILE_VERSION.to_le_bytes())?;
    writer.write_all(&(dims.len() as u32).to_le_bytes())?;
    for &d in dims {
        writer.write_all(&(d as u64).to_le_bytes())?;
    }

    let header_len = header_len(dims.len());
    let data_offset = align(header_len);
    writer.write_all(&vec![0u8; data_offset - header_len])?;

    for v in tensor.data() {
        writer.write_all(&v.to_le_bytes())?;
    }
    writer.flush()?;
    Ok(())
}

/// Read a tensor previously written by [`write_tensor`].
pub fn read_tensor(path: &Path) -> Result<Tensor> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(&file);

    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if magic != TENSOR_FILE_MAGIC {
        return Err(TensorError::InvalidFormat(format!(
            "bad magic {:?} in {}",
            magic,
            path.display()
        )));
    }

    let version = read_u32(&mut reader)?;
    if version != TENSOR_FILE_VERSION {
        return Err(TensorError::InvalidFormat(format!(
            "unsupported version {}",
            version
        )));
    }

    let rank = read_u32(&mut reader)?;
    if rank > MAX_RANK {
        return Err(TensorError::InvalidFormat(format!("rank {} too large", rank)));
    }
    let mut dims = Vec::with_capacity(rank as usize);
    for _ in 0..rank {
        let d = read_u64(&mut reader)?;
        let d = usize::try_from(d)
            .map_err(|_| TensorError::InvalidFormat(format!("dimension {} too large", d)))?;
        dims.push(d);
    }
    let shape = Shape::new(dims);

    let data_offset = align(header_len(rank as usize));
    let numel = shape.numel();

    // Memory-map the file and decode the data section in place.
    let mmap = unsafe { Mmap::map(&file)? };
    let data_end = numel
        .checked_mul(4)
        .and_then(|n| n.checked_add(data_offset))
        .ok_or_else(|| TensorError::InvalidFormat(format!("shape {} overflows", shape)))?;
    if mmap.len() < data_end {
        return Err(TensorError::InvalidFormat(format!(
            "{} is truncated: {} bytes, expected {}",
            path.display(),
            mmap.len(),
            data_end
        )));
    }

    let data = decode_f32(&mmap[data_offset..data_end]);
    Tensor::try_new(data, shape)
}

fn header_len(rank: usize) -> usize {
    4 + 4 + 4 + rank * 8
}

fn align(offset: usize) -> usize {
    (offset + TENSOR_FILE_ALIGNMENT - 1) & !(TENSOR_FILE_ALIGNMENT - 1)
}

fn read_u32(reader: &mut impl Read) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64(reader: &mut impl Read) -> Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

/// Reinterpret raw bytes as f32 values (little-endian).
fn decode_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Tensor {
        let data = (0..24).map(|i| i as f32 * -0.25).collect();
        Tensor::new(data, Shape::new(vec![2, 3, 4]))
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.bmt");
        let t = sample();
        write_tensor(&path, &t).unwrap();
        assert_eq!(read_tensor(&path).unwrap(), t);
    }

    #[test]
    fn test_data_section_is_aligned() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.bmt");
        write_tensor(&path, &sample()).unwrap();
        let len = std::fs::metadata(&path).unwrap().len() as usize;
        // header 12 + 3*8 = 36 bytes, aligned to 64, then 24 floats.
        assert_eq!(len, 64 + 24 * 4);
    }

    #[test]
    fn test_empty_batch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.bmt");
        let t = Tensor::zeros(Shape::new(vec![0, 5, 5]));
        write_tensor(&path, &t).unwrap();
        assert_eq!(read_tensor(&path).unwrap().shape().dims(), &[0, 5, 5]);
    }

    #[test]
    fn test_bad_magic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.bmt");
        std::fs::write(&path, b"GGUF\x01\x00\x00\x00\x00\x00\x00\x00").unwrap();
        assert!(matches!(
            read_tensor(&path),
            Err(TensorError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_truncated_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.bmt");
        write_tensor(&path, &sample()).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 4]).unwrap();
        assert!(matches!(
            read_tensor(&path),
            Err(TensorError::InvalidFormat(_))
        ));
    }
}
