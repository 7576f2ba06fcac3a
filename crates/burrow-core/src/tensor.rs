use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use crate::backend::Backend;
use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::shape::Shape;

// Tensor — the handle side of the tensor contract
//
// A Tensor is a cheap handle onto a block of device storage. The variable
// store hands these out freely: the store keeps one canonical handle per
// variable, and every accessor returns a shallow clone of it.
//
// MEMORY MODEL:
//
//   Tensor        = Arc<TensorInner>
//   TensorInner   = { id, Arc<RwLock<Storage>>, shape, dtype, device, grad flag }
//
//   Cloning a Tensor is O(1) — it bumps the outer Arc. Every clone sees the
//   same storage, so an in-place copy through one handle is visible through
//   all of them, and dropping a clone can never free storage another handle
//   still references.
//
//   The gradient-tracking flag is an AtomicBool inside the shared inner, so
//   freezing a store flips the flag for every handle of each variable at
//   once, without touching the data.

/// Unique identifier for a tensor, stable across shallow clones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TensorId(usize);

impl TensorId {
    fn new() -> Self {
        static COUNTER: AtomicUsize = AtomicUsize::new(1);
        TensorId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

struct TensorInner<B: Backend> {
    /// Stable identity, shared by all shallow clones.
    id: TensorId,
    /// The raw data on the backend's device, shared by all shallow clones.
    storage: Arc<RwLock<B::Storage>>,
    shape: Shape,
    dtype: DType,
    device: B::Device,
    /// Whether gradients should be tracked for this tensor.
    /// Shared by all shallow clones; float dtypes only.
    requires_grad: AtomicBool,
}

/// A handle to an n-dimensional array on a specific backend.
///
/// # Type Parameter
/// - `B: Backend` — the compute backend (e.g., `CpuBackend`)
pub struct Tensor<B: Backend> {
    inner: Arc<TensorInner<B>>,
}

// Clone is the shallow clone of the handle contract: a new handle onto the
// same storage and the same gradient flag.
impl<B: Backend> Clone for Tensor<B> {
    fn clone(&self) -> Self {
        Tensor {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: Backend> std::fmt::Debug for Tensor<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Tensor(id={:?}, shape={}, dtype={}, device={:?}, requires_grad={})",
            self.inner.id,
            self.inner.shape,
            self.inner.dtype,
            self.inner.device,
            self.requires_grad(),
        )
    }
}

impl<B: Backend> Tensor<B> {
    fn from_storage(storage: B::Storage, shape: Shape, dtype: DType, device: B::Device) -> Self {
        Tensor {
            inner: Arc::new(TensorInner {
                id: TensorId::new(),
                storage: Arc::new(RwLock::new(storage)),
                shape,
                dtype,
                device,
                requires_grad: AtomicBool::new(false),
            }),
        }
    }

    // Creation

    /// Create a tensor filled with zeros.
    pub fn zeros(shape: impl Into<Shape>, dtype: DType, device: &B::Device) -> Result<Self> {
        let shape = shape.into();
        let storage = B::zeros(&shape, dtype, device)?;
        Ok(Self::from_storage(storage, shape, dtype, device.clone()))
    }

    /// Create a tensor filled with ones.
    pub fn ones(shape: impl Into<Shape>, dtype: DType, device: &B::Device) -> Result<Self> {
        let shape = shape.into();
        let storage = B::ones(&shape, dtype, device)?;
        Ok(Self::from_storage(storage, shape, dtype, device.clone()))
    }

    /// Create a tensor filled with a constant value.
    pub fn full(
        shape: impl Into<Shape>,
        val: f64,
        dtype: DType,
        device: &B::Device,
    ) -> Result<Self> {
        let shape = shape.into();
        let storage = B::full(&shape, val, dtype, device)?;
        Ok(Self::from_storage(storage, shape, dtype, device.clone()))
    }

    /// Create a tensor from a flat f64 slice, converting to the target dtype.
    pub fn from_f64_slice(
        data: &[f64],
        shape: impl Into<Shape>,
        dtype: DType,
        device: &B::Device,
    ) -> Result<Self> {
        let shape = shape.into();
        if data.len() != shape.elem_count() {
            return Err(Error::ElementCountMismatch {
                expected: shape.elem_count(),
                got: data.len(),
                shape,
            });
        }
        let storage = B::from_f64_slice(data, dtype, device)?;
        Ok(Self::from_storage(storage, shape, dtype, device.clone()))
    }

    /// Create a tensor with values drawn uniformly from [lo, up).
    pub fn rand(
        shape: impl Into<Shape>,
        lo: f64,
        up: f64,
        dtype: DType,
        device: &B::Device,
    ) -> Result<Self> {
        let shape = shape.into();
        let storage = B::rand_uniform(&shape, lo, up, dtype, device)?;
        Ok(Self::from_storage(storage, shape, dtype, device.clone()))
    }

    /// Create a tensor with values drawn from a normal distribution.
    pub fn randn(
        shape: impl Into<Shape>,
        mean: f64,
        std: f64,
        dtype: DType,
        device: &B::Device,
    ) -> Result<Self> {
        let shape = shape.into();
        let storage = B::rand_normal(&shape, mean, std, dtype, device)?;
        Ok(Self::from_storage(storage, shape, dtype, device.clone()))
    }

    // Queries

    /// Stable identity of this tensor, shared by all shallow clones.
    pub fn id(&self) -> TensorId {
        self.inner.id
    }

    /// The shape of this tensor.
    pub fn shape(&self) -> &Shape {
        &self.inner.shape
    }

    /// The dimension sizes as a slice.
    pub fn dims(&self) -> &[usize] {
        self.inner.shape.dims()
    }

    /// Number of dimensions.
    pub fn rank(&self) -> usize {
        self.inner.shape.rank()
    }

    /// Total number of elements.
    pub fn elem_count(&self) -> usize {
        self.inner.shape.elem_count()
    }

    /// The element data type.
    pub fn dtype(&self) -> DType {
        self.inner.dtype
    }

    /// The device this tensor lives on.
    pub fn device(&self) -> &B::Device {
        &self.inner.device
    }

    /// Whether gradient tracking is enabled for this tensor.
    pub fn requires_grad(&self) -> bool {
        self.inner.requires_grad.load(Ordering::Acquire)
    }

    /// Whether `other` is a shallow clone of this tensor (same storage).
    pub fn shares_storage(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner.storage, &other.inner.storage)
    }

    // Gradient tracking

    /// Enable or disable gradient tracking.
    ///
    /// The flag is shared by all shallow clones of this tensor. Fails with
    /// [`Error::GradUnsupported`] for non-float dtypes.
    pub fn set_requires_grad(&self, enabled: bool) -> Result<()> {
        if enabled && !self.inner.dtype.is_float() {
            return Err(Error::GradUnsupported {
                dtype: self.inner.dtype,
            });
        }
        self.inner.requires_grad.store(enabled, Ordering::Release);
        Ok(())
    }

    // In-place mutation

    /// Overwrite this tensor's storage with the values of `src`, in place.
    ///
    /// The element counts must match; dtype and device may differ (values go
    /// through an f64 host round-trip and land in this tensor's dtype). The
    /// write goes into the shared storage, so every shallow clone of this
    /// tensor observes the new values. Gradient flags are left untouched and
    /// no gradient relationship to `src` is recorded.
    pub fn copy_from(&self, src: &Tensor<B>) -> Result<()> {
        if self.elem_count() != src.elem_count() {
            return Err(Error::ShapeMismatch {
                expected: self.shape().clone(),
                got: src.shape().clone(),
            });
        }
        let data = src.to_f64_vec()?;
        let new_storage = B::from_f64_slice(&data, self.dtype(), self.device())?;
        let mut guard = self.write_storage()?;
        *guard = new_storage;
        Ok(())
    }

    // Data movement

    /// Copy this tensor's values to a Vec<f64> on the host.
    pub fn to_f64_vec(&self) -> Result<Vec<f64>> {
        let guard = self.read_storage()?;
        B::to_f64_vec(&guard)
    }

    /// Materialize a detached copy of this tensor on another device.
    ///
    /// The result has fresh storage (no aliasing with `self`) and gradient
    /// tracking disabled. If `device` is the same device, the data still gets
    /// copied, which keeps the no-aliasing guarantee.
    pub fn to_device(&self, device: &B::Device) -> Result<Tensor<B>> {
        let data = self.to_f64_vec()?;
        Tensor::from_f64_slice(&data, self.shape(), self.dtype(), device)
    }

    // Lock plumbing

    fn read_storage(&self) -> Result<std::sync::RwLockReadGuard<'_, B::Storage>> {
        self.inner
            .storage
            .read()
            .map_err(|_| Error::msg("tensor storage lock poisoned"))
    }

    fn write_storage(&self) -> Result<std::sync::RwLockWriteGuard<'_, B::Storage>> {
        self.inner
            .storage
            .write()
            .map_err(|_| Error::msg("tensor storage lock poisoned"))
    }
}
