//! # burrow-core
//!
//! Tensor handles and the backend abstraction for Burrow.
//!
//! This crate provides:
//! - [`Tensor`] — a cheap, shallow-cloneable handle onto device storage
//! - [`Shape`] — n-dimensional shape
//! - [`DType`] — element data types (F16, BF16, F32, F64, U8, I64)
//! - [`Backend`] trait — abstraction over storage devices (CPU, GPU)
//! - [`Error`] / [`Result`] — the shared error type of the workspace
//!
//! Burrow is a variable store, not a math library: tensors here can be
//! created, sampled, copied in place, moved between devices, and read back
//! to the host — nothing else. Arithmetic and autograd belong to the
//! frameworks that consume the store.

pub mod backend;
pub mod dtype;
pub mod error;
pub mod shape;
pub mod tensor;

pub use backend::{Backend, BackendDevice, BackendStorage};
pub use dtype::{DType, WithDType};
pub use error::{Error, Result};
pub use shape::Shape;
pub use tensor::{Tensor, TensorId};
