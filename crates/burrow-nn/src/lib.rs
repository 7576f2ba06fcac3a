//! # burrow-nn
//!
//! A hierarchical, thread-safe store for the named tensors of a model.
//!
//! The pieces:
//!
//! 1. **[`VarStore`]** — owns the variable table and pins it to one device
//! 2. **[`Path`]** — a dotted-name scope (`"encoder.layer1"`); derive
//!    sub-paths to mirror model structure, create variables at the leaves
//! 3. **[`Entry`]** — atomic get-or-create for one fully-qualified name,
//!    so concurrent builders converge on a single variable
//! 4. **[`Init`]** — initial-value recipes (const, uniform, normal, Kaiming)
//! 5. **[`checkpoint`]** — the `.burrow` on-disk format behind
//!    [`VarStore::save`] / [`VarStore::load`]
//!
//! ```ignore
//! use burrow_cpu::{CpuBackend, CpuDevice};
//! use burrow_nn::VarStore;
//!
//! let vs = VarStore::<CpuBackend>::new(CpuDevice);
//! let layer = vs.root().sub("layer1")?;
//! let w = layer.kaiming_uniform("weight", (784, 128))?;
//! let b = layer.zeros("bias", 128)?;
//! vs.save("mlp.burrow")?;
//! ```

pub mod checkpoint;
pub mod init;
pub mod var_store;

pub use init::Init;
pub use var_store::{Entry, Path, VarStore, SEP};
