//! # burrow-cpu
//!
//! The CPU backend for Burrow: plain `Vec<T>` storage, one vector per dtype,
//! with `rand`/`rand_distr` supplying uniform and normal sampling.
//!
//! ```ignore
//! use burrow_core::{DType, Tensor};
//! use burrow_cpu::{CpuBackend, CpuDevice};
//!
//! let t = Tensor::<CpuBackend>::zeros((2, 3), DType::F32, &CpuDevice)?;
//! ```

use rand::Rng;
use rand_distr::{Distribution, Normal};

use burrow_core::backend::{Backend, BackendDevice, BackendStorage};
use burrow_core::{bail, DType, Error, Result, Shape, Tensor, WithDType};

/// The (single) CPU device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuDevice;

impl BackendDevice for CpuDevice {
    fn name(&self) -> String {
        "cpu".to_string()
    }
}

/// CPU storage: a contiguous vector of elements, one variant per dtype.
#[derive(Debug, Clone)]
pub enum CpuStorage {
    F16(Vec<half::f16>),
    BF16(Vec<half::bf16>),
    F32(Vec<f32>),
    F64(Vec<f64>),
    U8(Vec<u8>),
    I64(Vec<i64>),
}

impl BackendStorage for CpuStorage {
    fn dtype(&self) -> DType {
        match self {
            CpuStorage::F16(_) => DType::F16,
            CpuStorage::BF16(_) => DType::BF16,
            CpuStorage::F32(_) => DType::F32,
            CpuStorage::F64(_) => DType::F64,
            CpuStorage::U8(_) => DType::U8,
            CpuStorage::I64(_) => DType::I64,
        }
    }

    fn len(&self) -> usize {
        match self {
            CpuStorage::F16(v) => v.len(),
            CpuStorage::BF16(v) => v.len(),
            CpuStorage::F32(v) => v.len(),
            CpuStorage::F64(v) => v.len(),
            CpuStorage::U8(v) => v.len(),
            CpuStorage::I64(v) => v.len(),
        }
    }
}

/// Collect an f64-valued iterator into typed storage.
fn collect<T, I>(iter: I, wrap: fn(Vec<T>) -> CpuStorage) -> CpuStorage
where
    T: WithDType,
    I: Iterator<Item = f64>,
{
    wrap(iter.map(T::from_f64).collect())
}

/// Build storage of the requested dtype from an f64-valued iterator.
fn storage_from_f64_iter(iter: impl Iterator<Item = f64>, dtype: DType) -> CpuStorage {
    match dtype {
        DType::F16 => collect::<half::f16, _>(iter, CpuStorage::F16),
        DType::BF16 => collect::<half::bf16, _>(iter, CpuStorage::BF16),
        DType::F32 => collect::<f32, _>(iter, CpuStorage::F32),
        DType::F64 => collect::<f64, _>(iter, CpuStorage::F64),
        DType::U8 => collect::<u8, _>(iter, CpuStorage::U8),
        DType::I64 => collect::<i64, _>(iter, CpuStorage::I64),
    }
}

/// The CPU compute backend.
#[derive(Debug, Clone, Copy)]
pub struct CpuBackend;

impl Backend for CpuBackend {
    type Device = CpuDevice;
    type Storage = CpuStorage;

    fn zeros(shape: &Shape, dtype: DType, _device: &CpuDevice) -> Result<CpuStorage> {
        Self::full(shape, 0.0, dtype, _device)
    }

    fn ones(shape: &Shape, dtype: DType, _device: &CpuDevice) -> Result<CpuStorage> {
        Self::full(shape, 1.0, dtype, _device)
    }

    fn full(shape: &Shape, val: f64, dtype: DType, _device: &CpuDevice) -> Result<CpuStorage> {
        let n = shape.elem_count();
        Ok(storage_from_f64_iter(std::iter::repeat(val).take(n), dtype))
    }

    fn from_f64_slice(data: &[f64], dtype: DType, _device: &CpuDevice) -> Result<CpuStorage> {
        Ok(storage_from_f64_iter(data.iter().copied(), dtype))
    }

    fn rand_uniform(
        shape: &Shape,
        lo: f64,
        up: f64,
        dtype: DType,
        _device: &CpuDevice,
    ) -> Result<CpuStorage> {
        if !lo.is_finite() || !up.is_finite() || up < lo {
            bail!("invalid uniform bounds: [{lo}, {up})");
        }
        let n = shape.elem_count();
        let mut rng = rand::thread_rng();
        let range = up - lo;
        // lo + r * (up - lo) with r in [0, 1); degenerate bounds yield lo.
        let iter = (0..n).map(|_| lo + rng.gen::<f64>() * range);
        Ok(storage_from_f64_iter(iter, dtype))
    }

    fn rand_normal(
        shape: &Shape,
        mean: f64,
        std: f64,
        dtype: DType,
        _device: &CpuDevice,
    ) -> Result<CpuStorage> {
        let normal =
            Normal::new(mean, std).map_err(|e| Error::msg(format!("invalid normal: {e}")))?;
        let n = shape.elem_count();
        let mut rng = rand::thread_rng();
        let iter = (0..n).map(|_| normal.sample(&mut rng));
        Ok(storage_from_f64_iter(iter, dtype))
    }

    fn to_f64_vec(input: &CpuStorage) -> Result<Vec<f64>> {
        Ok(match input {
            CpuStorage::F16(v) => v.iter().map(|x| x.to_f64()).collect(),
            CpuStorage::BF16(v) => v.iter().map(|x| x.to_f64()).collect(),
            CpuStorage::F32(v) => v.iter().map(|&x| x as f64).collect(),
            CpuStorage::F64(v) => v.clone(),
            CpuStorage::U8(v) => v.iter().map(|&x| x as f64).collect(),
            CpuStorage::I64(v) => v.iter().map(|&x| x as f64).collect(),
        })
    }
}

/// Shorthand for a tensor on the CPU backend.
pub type CpuTensor = Tensor<CpuBackend>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeros_and_ones() {
        let z = CpuTensor::zeros((2, 3), DType::F32, &CpuDevice).unwrap();
        assert_eq!(z.dims(), &[2, 3]);
        assert!(z.to_f64_vec().unwrap().iter().all(|&x| x == 0.0));

        let o = CpuTensor::ones(4, DType::F64, &CpuDevice).unwrap();
        assert!(o.to_f64_vec().unwrap().iter().all(|&x| x == 1.0));
    }

    #[test]
    fn test_rand_uniform_bounds() {
        let t = CpuTensor::rand(1000, -2.0, 3.0, DType::F64, &CpuDevice).unwrap();
        for x in t.to_f64_vec().unwrap() {
            assert!((-2.0..3.0).contains(&x), "value {x} out of bounds");
        }
    }

    #[test]
    fn test_rand_normal_stats() {
        let t = CpuTensor::randn(10000, 5.0, 0.1, DType::F64, &CpuDevice).unwrap();
        let v = t.to_f64_vec().unwrap();
        let mean: f64 = v.iter().sum::<f64>() / v.len() as f64;
        assert!((mean - 5.0).abs() < 0.05, "mean {mean} too far from 5.0");
    }

    #[test]
    fn test_shallow_clone_shares_storage() {
        let a = CpuTensor::zeros(4, DType::F32, &CpuDevice).unwrap();
        let b = a.clone();
        assert!(a.shares_storage(&b));
        assert_eq!(a.id(), b.id());

        let ones = CpuTensor::ones(4, DType::F32, &CpuDevice).unwrap();
        a.copy_from(&ones).unwrap();
        assert_eq!(b.to_f64_vec().unwrap(), vec![1.0; 4]);
    }

    #[test]
    fn test_copy_from_converts_dtype() {
        let dst = CpuTensor::zeros(3, DType::F32, &CpuDevice).unwrap();
        let src =
            CpuTensor::from_f64_slice(&[1.0, 2.0, 3.0], 3, DType::F64, &CpuDevice).unwrap();
        dst.copy_from(&src).unwrap();
        assert_eq!(dst.dtype(), DType::F32);
        assert_eq!(dst.to_f64_vec().unwrap(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_copy_from_count_mismatch() {
        let dst = CpuTensor::zeros(3, DType::F32, &CpuDevice).unwrap();
        let src = CpuTensor::zeros(4, DType::F32, &CpuDevice).unwrap();
        assert!(dst.copy_from(&src).is_err());
    }

    #[test]
    fn test_requires_grad_float_only() {
        let w = CpuTensor::zeros(2, DType::F32, &CpuDevice).unwrap();
        w.set_requires_grad(true).unwrap();
        assert!(w.requires_grad());
        // The flag is shared with shallow clones.
        assert!(w.clone().requires_grad());

        let steps = CpuTensor::zeros(1, DType::I64, &CpuDevice).unwrap();
        assert!(steps.set_requires_grad(true).is_err());
        // Disabling is always allowed.
        steps.set_requires_grad(false).unwrap();
    }

    #[test]
    fn test_to_device_detaches() {
        let a = CpuTensor::ones(4, DType::F32, &CpuDevice).unwrap();
        a.set_requires_grad(true).unwrap();
        let b = a.to_device(&CpuDevice).unwrap();
        assert!(!b.shares_storage(&a));
        assert!(!b.requires_grad());
        assert_eq!(b.to_f64_vec().unwrap(), vec![1.0; 4]);
    }
}
