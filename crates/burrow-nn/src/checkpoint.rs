// Checkpoint — save and load named tensors
//
// Binary checkpoint format (.burrow):
//
//   Header:
//     magic:   [u8; 4]  = b"BRRW"
//     version: u32 LE   = 1
//     count:   u32 LE   = number of tensors
//
//   For each tensor:
//     key_len:  u32 LE
//     key:      [u8; key_len]  (UTF-8, dotted variable name)
//     dtype:    u8
//     ndim:     u32 LE
//     dims:     [u32 LE; ndim]
//     data_len: u64 LE         (in bytes)
//     data:     [u8; data_len] (raw little-endian typed data)
//
// The var store is the intended caller (VarStore::save / load /
// load_partial), but the functions work on any (name, tensor) sequence.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use burrow_core::backend::Backend;
use burrow_core::{DType, Error, Result, Tensor};

const MAGIC: &[u8; 4] = b"BRRW";
const VERSION: u32 = 1;

// DType <-> u8 encoding

fn dtype_to_u8(dtype: DType) -> u8 {
    match dtype {
        DType::F32 => 0,
        DType::F64 => 1,
        DType::U8 => 2,
        DType::I64 => 3,
        DType::F16 => 4,
        DType::BF16 => 5,
    }
}

fn u8_to_dtype(v: u8) -> Result<DType> {
    match v {
        0 => Ok(DType::F32),
        1 => Ok(DType::F64),
        2 => Ok(DType::U8),
        3 => Ok(DType::I64),
        4 => Ok(DType::F16),
        5 => Ok(DType::BF16),
        _ => Err(Error::msg(format!("unknown dtype tag: {v}"))),
    }
}

// Raw bytes extraction (via f64 roundtrip, preserving the original dtype)

fn tensor_to_bytes<B: Backend>(tensor: &Tensor<B>) -> Result<Vec<u8>> {
    let data = tensor.to_f64_vec()?;

    Ok(match tensor.dtype() {
        DType::F16 => data
            .iter()
            .flat_map(|&v| half::f16::from_f64(v).to_le_bytes())
            .collect(),
        DType::BF16 => data
            .iter()
            .flat_map(|&v| half::bf16::from_f64(v).to_le_bytes())
            .collect(),
        DType::F32 => data
            .iter()
            .flat_map(|&v| (v as f32).to_le_bytes())
            .collect(),
        DType::F64 => data.iter().flat_map(|&v| v.to_le_bytes()).collect(),
        DType::U8 => data.iter().map(|&v| v as u8).collect(),
        DType::I64 => data
            .iter()
            .flat_map(|&v| (v as i64).to_le_bytes())
            .collect(),
    })
}

fn tensor_from_bytes<B: Backend>(
    bytes: &[u8],
    dims: Vec<usize>,
    dtype: DType,
    device: &B::Device,
) -> Result<Tensor<B>> {
    let data_f64: Vec<f64> = match dtype {
        DType::F16 => bytes
            .chunks_exact(2)
            .map(|c| half::f16::from_le_bytes([c[0], c[1]]).to_f64())
            .collect(),
        DType::BF16 => bytes
            .chunks_exact(2)
            .map(|c| half::bf16::from_le_bytes([c[0], c[1]]).to_f64())
            .collect(),
        DType::F32 => bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f64)
            .collect(),
        DType::F64 => bytes
            .chunks_exact(8)
            .map(|c| f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
            .collect(),
        DType::U8 => bytes.iter().map(|&b| b as f64).collect(),
        DType::I64 => bytes
            .chunks_exact(8)
            .map(|c| i64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]) as f64)
            .collect(),
    };

    Tensor::<B>::from_f64_slice(&data_f64, dims, dtype, device)
}

// Low-level IO helpers

fn write_u8(w: &mut impl Write, v: u8) -> std::io::Result<()> {
    w.write_all(&[v])
}

fn write_u32(w: &mut impl Write, v: u32) -> std::io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn write_u64(w: &mut impl Write, v: u64) -> std::io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn read_u8(r: &mut impl Read) -> std::io::Result<u8> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0])
}

fn read_u32(r: &mut impl Read) -> std::io::Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64(r: &mut impl Read) -> std::io::Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_bytes(r: &mut impl Read, len: usize) -> std::io::Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

fn io_err(e: std::io::Error) -> Error {
    Error::msg(format!("io error: {e}"))
}

// Streaming API

/// Write a set of named tensors to a writer in the Burrow checkpoint format.
pub fn write_checkpoint<B: Backend>(
    writer: &mut impl Write,
    tensors: &[(String, Tensor<B>)],
) -> Result<()> {
    writer.write_all(MAGIC).map_err(io_err)?;
    write_u32(writer, VERSION).map_err(io_err)?;
    write_u32(writer, tensors.len() as u32).map_err(io_err)?;

    for (key, tensor) in tensors {
        let key_bytes = key.as_bytes();
        write_u32(writer, key_bytes.len() as u32).map_err(io_err)?;
        writer.write_all(key_bytes).map_err(io_err)?;

        write_u8(writer, dtype_to_u8(tensor.dtype())).map_err(io_err)?;

        let dims = tensor.dims();
        write_u32(writer, dims.len() as u32).map_err(io_err)?;
        for &d in dims {
            write_u32(writer, d as u32).map_err(io_err)?;
        }

        let data = tensor_to_bytes(tensor)?;
        write_u64(writer, data.len() as u64).map_err(io_err)?;
        writer.write_all(&data).map_err(io_err)?;
    }

    Ok(())
}

/// Read named tensors from a reader in the Burrow checkpoint format.
/// Tensors are created on `device`.
pub fn read_checkpoint<B: Backend>(
    reader: &mut impl Read,
    device: &B::Device,
) -> Result<Vec<(String, Tensor<B>)>> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic).map_err(io_err)?;
    if &magic != MAGIC {
        return Err(Error::msg(format!(
            "invalid checkpoint: expected magic {MAGIC:?}, got {magic:?}"
        )));
    }

    let version = read_u32(reader).map_err(io_err)?;
    if version != VERSION {
        return Err(Error::msg(format!(
            "unsupported checkpoint version: {version} (expected {VERSION})"
        )));
    }

    let count = read_u32(reader).map_err(io_err)? as usize;
    let mut tensors = Vec::with_capacity(count);

    for _ in 0..count {
        let key_len = read_u32(reader).map_err(io_err)? as usize;
        let key_bytes = read_bytes(reader, key_len).map_err(io_err)?;
        let key = String::from_utf8(key_bytes)
            .map_err(|e| Error::msg(format!("invalid utf-8 key: {e}")))?;

        let dtype = u8_to_dtype(read_u8(reader).map_err(io_err)?)?;

        let ndim = read_u32(reader).map_err(io_err)? as usize;
        let mut dims = Vec::with_capacity(ndim);
        for _ in 0..ndim {
            dims.push(read_u32(reader).map_err(io_err)? as usize);
        }

        let data_len = read_u64(reader).map_err(io_err)? as usize;
        let data = read_bytes(reader, data_len).map_err(io_err)?;

        let tensor = tensor_from_bytes::<B>(&data, dims, dtype, device)?;
        tensors.push((key, tensor));
    }

    Ok(tensors)
}

// File API

/// Save a list of named tensors to a file.
pub fn save_tensors<B: Backend>(
    path: impl AsRef<Path>,
    tensors: &[(String, Tensor<B>)],
) -> Result<()> {
    let file = File::create(path.as_ref()).map_err(io_err)?;
    let mut writer = BufWriter::new(file);
    write_checkpoint(&mut writer, tensors)?;
    writer.flush().map_err(io_err)?;
    Ok(())
}

/// Load named tensors from a file, creating them on `device`.
pub fn load_tensors<B: Backend>(
    path: impl AsRef<Path>,
    device: &B::Device,
) -> Result<Vec<(String, Tensor<B>)>> {
    let file = File::open(path.as_ref()).map_err(io_err)?;
    let mut reader = BufReader::new(file);
    read_checkpoint(&mut reader, device)
}

// In-memory API (for testing and transfer)

/// Serialize named tensors to an in-memory byte vector.
pub fn to_bytes<B: Backend>(tensors: &[(String, Tensor<B>)]) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    write_checkpoint(&mut buf, tensors)?;
    Ok(buf)
}

/// Deserialize named tensors from an in-memory byte slice.
pub fn from_bytes<B: Backend>(data: &[u8], device: &B::Device) -> Result<Vec<(String, Tensor<B>)>> {
    let mut cursor = std::io::Cursor::new(data);
    read_checkpoint(&mut cursor, device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burrow_cpu::{CpuBackend, CpuDevice, CpuTensor};

    #[test]
    fn test_roundtrip_f32() {
        let dev = CpuDevice;
        let t = CpuTensor::from_f64_slice(&[1.0, 2.0, 3.0, 4.0], (2, 2), DType::F32, &dev).unwrap();

        let tensors = vec![("w".to_string(), t.clone())];
        let bytes = to_bytes(&tensors).unwrap();
        let loaded = from_bytes::<CpuBackend>(&bytes, &dev).unwrap();

        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].0, "w");
        assert_eq!(loaded[0].1.dims(), &[2, 2]);
        assert_eq!(loaded[0].1.dtype(), DType::F32);
        assert_eq!(loaded[0].1.to_f64_vec().unwrap(), t.to_f64_vec().unwrap());
    }

    #[test]
    fn test_roundtrip_f64_bit_exact() {
        let dev = CpuDevice;
        let vals = [std::f64::consts::PI, std::f64::consts::E, 0.0, -1.5];
        let t = CpuTensor::from_f64_slice(&vals, 4, DType::F64, &dev).unwrap();

        let bytes = to_bytes(&[("precision".to_string(), t.clone())]).unwrap();
        let loaded = from_bytes::<CpuBackend>(&bytes, &dev).unwrap();
        assert_eq!(loaded[0].1.to_f64_vec().unwrap(), t.to_f64_vec().unwrap());
    }

    #[test]
    fn test_roundtrip_multiple_tensors_preserves_order() {
        let dev = CpuDevice;
        let w = CpuTensor::from_f64_slice(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], (2, 3), DType::F64, &dev)
            .unwrap();
        let b = CpuTensor::from_f64_slice(&[0.1, 0.2, 0.3], (1, 3), DType::F64, &dev).unwrap();

        let tensors = vec![
            ("layer1.weight".to_string(), w),
            ("layer1.bias".to_string(), b),
        ];
        let bytes = to_bytes(&tensors).unwrap();
        let loaded = from_bytes::<CpuBackend>(&bytes, &dev).unwrap();

        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].0, "layer1.weight");
        assert_eq!(loaded[0].1.dims(), &[2, 3]);
        assert_eq!(loaded[1].0, "layer1.bias");
        assert_eq!(loaded[1].1.dims(), &[1, 3]);
    }

    #[test]
    fn test_invalid_magic() {
        let data = b"BADXsomejunk";
        let result = from_bytes::<CpuBackend>(data, &CpuDevice);
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("invalid checkpoint"));
    }

    #[test]
    fn test_truncated_input() {
        let dev = CpuDevice;
        let t = CpuTensor::ones((2, 2), DType::F32, &dev).unwrap();
        let bytes = to_bytes(&[("w".to_string(), t)]).unwrap();
        let result = from_bytes::<CpuBackend>(&bytes[..bytes.len() - 3], &dev);
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_checkpoint() {
        let tensors: Vec<(String, CpuTensor)> = vec![];
        let bytes = to_bytes(&tensors).unwrap();
        let loaded = from_bytes::<CpuBackend>(&bytes, &CpuDevice).unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn test_file_roundtrip() {
        let dev = CpuDevice;
        let t = CpuTensor::from_f64_slice(&[1.0, 2.0, 3.0], 3, DType::F32, &dev).unwrap();
        let tensors = vec![("test".to_string(), t.clone())];

        let path = std::env::temp_dir().join("burrow_test_checkpoint.burrow");
        save_tensors(&path, &tensors).unwrap();
        let loaded = load_tensors::<CpuBackend>(&path, &dev).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].0, "test");
        assert_eq!(loaded[0].1.to_f64_vec().unwrap(), t.to_f64_vec().unwrap());
    }

    #[test]
    fn test_i64_roundtrip() {
        let dev = CpuDevice;
        let t = CpuTensor::from_f64_slice(&[0.0, 1.0, -7.0], 3, DType::I64, &dev).unwrap();
        let bytes = to_bytes(&[("steps".to_string(), t.clone())]).unwrap();
        let loaded = from_bytes::<CpuBackend>(&bytes, &dev).unwrap();
        assert_eq!(loaded[0].1.dtype(), DType::I64);
        assert_eq!(loaded[0].1.to_f64_vec().unwrap(), vec![0.0, 1.0, -7.0]);
    }
}
