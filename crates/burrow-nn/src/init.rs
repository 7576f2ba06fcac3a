// Init — Parameter initialization
//
// The store is agnostic to how initial values are produced; every creation
// path takes an Init and turns it into a tensor of the requested shape on
// the store's device. Kaiming uniform follows the fan-in convention for
// ReLU networks: U(-bound, bound) with bound = sqrt(6 / fan_in).

use burrow_core::backend::Backend;
use burrow_core::{DType, Result, Shape, Tensor};

/// Recipe for the initial value of a variable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Init {
    /// All elements set to the given constant.
    Const(f64),
    /// Drawn from U(lo, up).
    Uniform { lo: f64, up: f64 },
    /// Drawn from N(mean, stdev).
    Randn { mean: f64, stdev: f64 },
    /// Kaiming (He) uniform, fan-in mode.
    KaimingUniform,
}

/// Fan-in of a shape.
///
/// - 0-D / 1-D: dims[0] (1 for a scalar)
/// - 2-D: dims[1]
/// - 3-D+: dims[1] * product(dims[2..]) — convolution-style, where dims[0]
///   is out_channels, dims[1] is in_channels, and the rest is the kernel.
fn fan_in(shape: &Shape) -> f64 {
    let dims = shape.dims();
    match dims.len() {
        0 => 1.0,
        1 => dims[0] as f64,
        2 => dims[1] as f64,
        _ => {
            let receptive_field: usize = dims[2..].iter().product();
            dims[1] as f64 * receptive_field as f64
        }
    }
}

impl Init {
    /// Build a tensor of the given shape and dtype on `device`, filled
    /// according to this recipe.
    pub fn init_tensor<B: Backend>(
        &self,
        shape: impl Into<Shape>,
        dtype: DType,
        device: &B::Device,
    ) -> Result<Tensor<B>> {
        let shape = shape.into();
        match *self {
            Init::Const(val) => Tensor::full(shape, val, dtype, device),
            Init::Uniform { lo, up } => Tensor::rand(shape, lo, up, dtype, device),
            Init::Randn { mean, stdev } => Tensor::randn(shape, mean, stdev, dtype, device),
            Init::KaimingUniform => {
                let bound = (6.0 / fan_in(&shape)).sqrt();
                Tensor::rand(shape, -bound, bound, dtype, device)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burrow_cpu::{CpuBackend, CpuDevice};

    #[test]
    fn test_fan_in() {
        assert_eq!(fan_in(&Shape::from(())), 1.0);
        assert_eq!(fan_in(&Shape::from(7)), 7.0);
        assert_eq!(fan_in(&Shape::from((50, 100))), 100.0);
        // Conv2d: [out_ch=16, in_ch=3, kh=5, kw=5]
        assert_eq!(fan_in(&Shape::from((16, 3, 5, 5))), 75.0);
    }

    #[test]
    fn test_const_init() {
        let t = Init::Const(7.0)
            .init_tensor::<CpuBackend>((3, 4), DType::F64, &CpuDevice)
            .unwrap();
        assert!(t.to_f64_vec().unwrap().iter().all(|&x| x == 7.0));
    }

    #[test]
    fn test_kaiming_uniform_bounds() {
        // fan_in = 100 for shape (50, 100) → bound = sqrt(6/100)
        let t = Init::KaimingUniform
            .init_tensor::<CpuBackend>((50, 100), DType::F64, &CpuDevice)
            .unwrap();
        let bound = (6.0f64 / 100.0).sqrt();
        for x in t.to_f64_vec().unwrap() {
            assert!(
                (-bound..bound).contains(&x),
                "value {x} out of bounds [-{bound}, {bound})"
            );
        }
    }

    #[test]
    fn test_uniform_range() {
        let t = Init::Uniform { lo: -2.0, up: 3.0 }
            .init_tensor::<CpuBackend>(1000, DType::F64, &CpuDevice)
            .unwrap();
        for x in t.to_f64_vec().unwrap() {
            assert!((-2.0..3.0).contains(&x));
        }
    }
}
