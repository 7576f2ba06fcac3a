use crate::dtype::DType;
use crate::error::Result;
use crate::shape::Shape;
use std::fmt;

// Backend — Abstraction over compute devices
//
// Each backend (CPU today, GPU backends as separate crates) implements this
// trait, providing its own device and storage types. The variable store only
// ever touches the handle contract: allocate, sample, read out. Arithmetic
// kernels live with the consumers of the store, not here.
//
// Using a trait (vs. a device enum) means new backends can be added as
// separate crates without modifying burrow-core, at the cost of making
// Tensor generic: Tensor<B: Backend>.

/// Identifies a compute device (e.g., "cpu", "cuda:0").
pub trait BackendDevice: Clone + fmt::Debug + Send + Sync + 'static {
    /// A human-readable name for this device.
    fn name(&self) -> String;

    /// Whether two device handles refer to the same physical device.
    fn same_device(&self, other: &Self) -> bool {
        self.name() == other.name()
    }
}

/// A buffer holding tensor data on a specific device.
pub trait BackendStorage: Clone + Send + Sync + 'static {
    /// The data type of the elements in this storage.
    fn dtype(&self) -> DType;

    /// Number of elements held by this storage.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The main Backend trait. Implementing this for a struct (e.g., CpuBackend)
/// provides everything the variable store needs from a device.
///
/// All creation functions allocate fresh, contiguous storage. `to_f64_vec`
/// is the single host read-out path; dtype conversion and cross-device
/// transfer both go through it.
pub trait Backend: Clone + Send + Sync + fmt::Debug + 'static {
    /// The device type for this backend.
    type Device: BackendDevice;
    /// The storage type for this backend.
    type Storage: BackendStorage;

    /// Allocate storage filled with zeros.
    fn zeros(shape: &Shape, dtype: DType, device: &Self::Device) -> Result<Self::Storage>;

    /// Allocate storage filled with ones.
    fn ones(shape: &Shape, dtype: DType, device: &Self::Device) -> Result<Self::Storage>;

    /// Allocate storage filled with a constant value.
    fn full(shape: &Shape, val: f64, dtype: DType, device: &Self::Device) -> Result<Self::Storage>;

    /// Create storage from a flat f64 slice, converting to the target dtype.
    fn from_f64_slice(data: &[f64], dtype: DType, device: &Self::Device) -> Result<Self::Storage>;

    /// Create storage with values drawn uniformly from [lo, up).
    fn rand_uniform(
        shape: &Shape,
        lo: f64,
        up: f64,
        dtype: DType,
        device: &Self::Device,
    ) -> Result<Self::Storage>;

    /// Create storage with values drawn from a normal distribution.
    fn rand_normal(
        shape: &Shape,
        mean: f64,
        std: f64,
        dtype: DType,
        device: &Self::Device,
    ) -> Result<Self::Storage>;

    /// Copy storage contents to a Vec<f64> on the host.
    fn to_f64_vec(input: &Self::Storage) -> Result<Vec<f64>>;
}
