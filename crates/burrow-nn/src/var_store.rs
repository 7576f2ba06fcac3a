// VarStore — named, hierarchical storage for model parameters
//
// A VarStore owns every tensor that makes up a model's learnable state and
// pins all of them to a single device. Variables are organized by dotted
// paths ("encoder.layer1.weight") built from nested Path handles, so the
// same model code produces the same names run after run — which is what
// makes checkpoints loadable and weight transfer between stores possible.
//
// STRUCTURE:
//
//   VarStore ── Arc<Variables> ── Mutex<{ named, trainable }>
//      │
//      └─ root() ─► Path ─ sub() ─► Path ─ entry() ─► Entry
//
// Every Path and Entry holds an Arc onto the same Variables table, so
// handles can be cloned into worker threads freely. One mutex serializes
// all table access; in particular the get-or-create path checks and inserts
// inside a single critical section, so concurrent callers racing on the
// same name always end up sharing one variable.
//
// The table stores canonical tensor handles. Accessors hand out shallow
// clones: same storage, so in-place updates (load, copy) are visible
// through every clone, but dropping a caller's handle can never invalidate
// the store's entry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use burrow_core::backend::Backend;
use burrow_core::{DType, Error, Result, Shape, Tensor};

use crate::checkpoint;
use crate::init::Init;

/// Separator between path segments in fully-qualified variable names.
/// Individual segments and variable names must not contain it.
pub const SEP: char = '.';

/// Variables created through [`Path`] and [`Entry`] use this dtype.
const VAR_DTYPE: DType = DType::F32;

fn valid_segment(name: &str) -> Result<()> {
    if name.contains(SEP) {
        return Err(Error::InvalidName {
            name: name.to_string(),
            sep: SEP,
        });
    }
    Ok(())
}

// ── Variables ────────────────────────────────────────────────────────────

struct VarData<B: Backend> {
    /// Fully-qualified name → canonical handle. Keys are unique by
    /// construction (colliding inserts get a disambiguated key).
    named: HashMap<String, Tensor<B>>,
    /// Trainable handles in insertion order. Every entry also appears as a
    /// value of `named`; the converse does not hold.
    trainable: Vec<Tensor<B>>,
}

/// The shared variable table behind a [`VarStore`] and all of its [`Path`]s.
///
/// All operations lock the table for their whole duration; none of them is
/// ever partially visible to a concurrent caller.
pub(crate) struct Variables<B: Backend> {
    data: Mutex<VarData<B>>,
}

impl<B: Backend> Variables<B> {
    fn new() -> Self {
        Variables {
            data: Mutex::new(VarData {
                named: HashMap::new(),
                trainable: Vec::new(),
            }),
        }
    }

    // None of the critical sections below can panic, so the mutex cannot be
    // poisoned by this crate's own code.
    fn lock(&self) -> MutexGuard<'_, VarData<B>> {
        self.data.lock().expect("variable table mutex poisoned")
    }

    /// Unconditionally register `value` (a shallow clone of it) under `name`.
    ///
    /// An existing variable is never overwritten: on collision the new entry
    /// is stored under `"{name}__{n}"` instead, with `n` starting at the
    /// current table size and bumped until the key is free. The caller sees
    /// the returned handle, not the final key; use [`Variables::get_or_insert`]
    /// for idempotent creation under a stable name.
    fn insert(&self, name: String, value: &Tensor<B>, trainable: bool) -> Result<Tensor<B>> {
        let mut data = self.lock();

        let key = if data.named.contains_key(&name) {
            let mut n = data.named.len();
            let mut key = format!("{name}__{n}");
            while data.named.contains_key(&key) {
                n += 1;
                key = format!("{name}__{n}");
            }
            key
        } else {
            name
        };

        let tensor = value.clone();
        if trainable {
            // May fail for non-float dtypes; the table is untouched then.
            tensor.set_requires_grad(true)?;
            data.trainable.push(tensor.clone());
        }
        data.named.insert(key, tensor.clone());
        Ok(tensor)
    }

    /// Atomic get-or-create: one critical section covers the lookup and, if
    /// absent, the insert under the literal `name`. Under arbitrary
    /// concurrent callers, at most one variable is ever created per name,
    /// and every caller gets a handle onto that one variable's storage.
    ///
    /// When the name is already present, `value` is dropped unused.
    fn get_or_insert(&self, name: String, value: Tensor<B>, trainable: bool) -> Result<Tensor<B>> {
        let mut data = self.lock();

        if let Some(existing) = data.named.get(&name) {
            return Ok(existing.clone());
        }
        if trainable {
            value.set_requires_grad(true)?;
            data.trainable.push(value.clone());
        }
        data.named.insert(name, value.clone());
        Ok(value)
    }

    fn get(&self, name: &str) -> Result<Tensor<B>> {
        let data = self.lock();
        match data.named.get(name) {
            Some(t) => Ok(t.clone()),
            None => Err(Error::NotFound {
                name: name.to_string(),
            }),
        }
    }

    fn snapshot_all(&self) -> HashMap<String, Tensor<B>> {
        let data = self.lock();
        data.named
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn snapshot_trainable(&self) -> Vec<Tensor<B>> {
        let data = self.lock();
        data.trainable.to_vec()
    }

    fn set_trainable_requires_grad(&self, enabled: bool) -> Result<()> {
        let data = self.lock();
        for t in &data.trainable {
            t.set_requires_grad(enabled)?;
        }
        Ok(())
    }

    fn len(&self) -> usize {
        self.lock().named.len()
    }

    /// Copy loaded values into existing variables, all-or-nothing.
    ///
    /// Every name and element count is validated before the first write, so
    /// a mismatch anywhere leaves the store's values untouched.
    fn load_values(&self, pairs: &[(String, Tensor<B>)]) -> Result<()> {
        let data = self.lock();

        for (name, value) in pairs {
            let current = data.named.get(name).ok_or_else(|| Error::NotFound {
                name: name.clone(),
            })?;
            if current.elem_count() != value.elem_count() {
                return Err(Error::ShapeMismatch {
                    expected: current.shape().clone(),
                    got: value.shape().clone(),
                });
            }
        }
        for (name, value) in pairs {
            if let Some(current) = data.named.get(name) {
                current.copy_from(value)?;
            }
        }
        Ok(())
    }

    /// Copy loaded values into existing variables, skipping unknown names.
    /// Returns the names that had no matching variable.
    fn load_values_partial(&self, pairs: &[(String, Tensor<B>)]) -> Result<Vec<String>> {
        let data = self.lock();

        let mut missing = Vec::new();
        for (name, value) in pairs {
            match data.named.get(name) {
                Some(current) => current.copy_from(value)?,
                None => missing.push(name.clone()),
            }
        }
        Ok(missing)
    }

    /// Copy values from a source snapshot into every variable of this table,
    /// casting to `device`. Validates the full name and size sets first;
    /// nothing is written unless everything matches.
    fn copy_values_from(
        &self,
        src: &HashMap<String, Tensor<B>>,
        device: &B::Device,
    ) -> Result<()> {
        let data = self.lock();

        for (name, dst) in &data.named {
            let s = src.get(name).ok_or_else(|| Error::NotFound {
                name: name.clone(),
            })?;
            if dst.elem_count() != s.elem_count() {
                return Err(Error::ShapeMismatch {
                    expected: dst.shape().clone(),
                    got: s.shape().clone(),
                });
            }
        }
        for (name, dst) in &data.named {
            if let Some(s) = src.get(name) {
                dst.copy_from(&s.to_device(device)?)?;
            }
        }
        Ok(())
    }
}

// ── VarStore ─────────────────────────────────────────────────────────────

/// Owner of a variable table and the single device its tensors live on.
///
/// ```ignore
/// let vs = VarStore::<CpuBackend>::new(CpuDevice);
/// let root = vs.root();
/// let w = root.sub("layer1")?.kaiming_uniform("weight", (784, 128))?;
/// vs.save("model.burrow")?;
/// ```
pub struct VarStore<B: Backend> {
    device: B::Device,
    vars: Arc<Variables<B>>,
}

impl<B: Backend> VarStore<B> {
    /// Create a new, empty variable store on the given device.
    pub fn new(device: B::Device) -> Self {
        VarStore {
            device,
            vars: Arc::new(Variables::new()),
        }
    }

    /// The device all of this store's variables live on.
    pub fn device(&self) -> &B::Device {
        &self.device
    }

    /// Number of variables currently registered.
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// Whether the store holds no variables.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shallow clones of all trainable variables, in creation order.
    pub fn trainable_variables(&self) -> Vec<Tensor<B>> {
        self.vars.snapshot_trainable()
    }

    /// Shallow clones of all variables, keyed by fully-qualified name.
    pub fn variables(&self) -> HashMap<String, Tensor<B>> {
        self.vars.snapshot_all()
    }

    /// The root path of this store, from which sub-paths and variables are
    /// created.
    pub fn root(&self) -> Path<B> {
        Path {
            path: Vec::new(),
            device: self.device.clone(),
            vars: Arc::clone(&self.vars),
        }
    }

    /// Write all variable values to a checkpoint file.
    ///
    /// The table is snapshotted first and serialized outside the lock, so a
    /// slow disk does not block variable creation in other threads. Pairs
    /// are written sorted by name, making saved files deterministic.
    pub fn save(&self, path: impl AsRef<std::path::Path>) -> Result<()> {
        let mut named: Vec<(String, Tensor<B>)> = self.vars.snapshot_all().into_iter().collect();
        named.sort_by(|a, b| a.0.cmp(&b.0));
        checkpoint::save_tensors(path, &named)
    }

    /// Load variable values from a checkpoint file.
    ///
    /// The set of variables is not changed — only values are updated, in
    /// place and without gradient linkage. Every name in the file must
    /// already exist in the store with a matching element count; otherwise
    /// the load fails and no variable is modified.
    pub fn load(&self, path: impl AsRef<std::path::Path>) -> Result<()> {
        let loaded = checkpoint::load_tensors::<B>(path, &self.device)?;
        self.vars.load_values(&loaded)
    }

    /// Load variable values from a checkpoint that may cover only part of
    /// the store. Matched names are updated exactly as in [`VarStore::load`];
    /// names in the file with no variable in the store are skipped and
    /// returned. Useful when pre-trained weights exist for only part of a
    /// model.
    pub fn load_partial(&self, path: impl AsRef<std::path::Path>) -> Result<Vec<String>> {
        let loaded = checkpoint::load_tensors::<B>(path, &self.device)?;
        self.vars.load_values_partial(&loaded)
    }

    /// Disable gradient tracking on every trainable variable.
    ///
    /// Frozen variables keep their place in the trainable list, so
    /// [`VarStore::unfreeze`] restores exactly the pre-freeze state.
    pub fn freeze(&self) -> Result<()> {
        self.vars.set_trainable_requires_grad(false)
    }

    /// Re-enable gradient tracking on every trainable variable.
    pub fn unfreeze(&self) -> Result<()> {
        self.vars.set_trainable_requires_grad(true)
    }

    /// Copy variable values from `src` into this store.
    ///
    /// Every variable of this store must exist in `src` under the same name
    /// and with the same element count; otherwise an error is returned and
    /// nothing is modified. Values are cast to this store's device and
    /// copied in place, without gradient linkage.
    ///
    /// `src` is snapshotted up front, so the two stores' locks are never
    /// held at the same time.
    pub fn copy(&self, src: &VarStore<B>) -> Result<()> {
        let src_vars = src.vars.snapshot_all();
        self.vars.copy_values_from(&src_vars, &self.device)
    }
}

// ── Path ─────────────────────────────────────────────────────────────────

/// A location in a store's name hierarchy.
///
/// Paths are cheap handles: cloning one (or deriving a sub-path) never
/// copies tensor data, and clones can be moved freely across threads.
pub struct Path<B: Backend> {
    path: Vec<String>,
    device: B::Device,
    vars: Arc<Variables<B>>,
}

impl<B: Backend> Clone for Path<B> {
    fn clone(&self) -> Self {
        Path {
            path: self.path.clone(),
            device: self.device.clone(),
            vars: Arc::clone(&self.vars),
        }
    }
}

impl<B: Backend> Path<B> {
    /// Derive the sub-path `segment` below this path.
    /// Fails if `segment` contains [`SEP`].
    pub fn sub(&self, segment: impl Into<String>) -> Result<Path<B>> {
        let segment = segment.into();
        valid_segment(&segment)?;
        let mut path = self.path.clone();
        path.push(segment);
        Ok(Path {
            path,
            device: self.device.clone(),
            vars: Arc::clone(&self.vars),
        })
    }

    /// The device of the owning store.
    pub fn device(&self) -> &B::Device {
        &self.device
    }

    /// The fully-qualified name for `name` under this path: segments and
    /// name joined with [`SEP`]. At the root, `name` qualifies to itself.
    /// Fails if `name` contains [`SEP`].
    pub fn qualified_name(&self, name: &str) -> Result<String> {
        valid_segment(name)?;
        if self.path.is_empty() {
            return Ok(name.to_string());
        }
        let mut q = self.path.join(&SEP.to_string());
        q.push(SEP);
        q.push_str(name);
        Ok(q)
    }

    fn add(&self, name: &str, value: &Tensor<B>, trainable: bool) -> Result<Tensor<B>> {
        let q = self.qualified_name(name)?;
        self.vars.insert(q, value, trainable)
    }

    /// Create a non-trainable variable initialized with zeros.
    pub fn zeros_no_train(
        &self,
        name: &str,
        dims: impl Into<Shape>,
    ) -> Result<Tensor<B>> {
        let z = Tensor::zeros(dims, VAR_DTYPE, &self.device)?;
        self.add(name, &z, false)
    }

    /// Create a non-trainable variable initialized with ones.
    pub fn ones_no_train(
        &self,
        name: &str,
        dims: impl Into<Shape>,
    ) -> Result<Tensor<B>> {
        let o = Tensor::ones(dims, VAR_DTYPE, &self.device)?;
        self.add(name, &o, false)
    }

    /// Create a trainable variable initialized per `init`.
    pub fn new_var(
        &self,
        name: &str,
        dims: impl Into<Shape>,
        init: Init,
    ) -> Result<Tensor<B>> {
        let v = init.init_tensor::<B>(dims, VAR_DTYPE, &self.device)?;
        self.add(name, &v, true)
    }

    /// Create a trainable variable initialized with zeros.
    pub fn zeros(&self, name: &str, dims: impl Into<Shape>) -> Result<Tensor<B>> {
        self.new_var(name, dims, Init::Const(0.0))
    }

    /// Create a trainable variable initialized with ones.
    pub fn ones(&self, name: &str, dims: impl Into<Shape>) -> Result<Tensor<B>> {
        self.new_var(name, dims, Init::Const(1.0))
    }

    /// Create a trainable variable initialized from N(0, 1).
    pub fn randn_standard(
        &self,
        name: &str,
        dims: impl Into<Shape>,
    ) -> Result<Tensor<B>> {
        self.new_var(
            name,
            dims,
            Init::Randn {
                mean: 0.0,
                stdev: 1.0,
            },
        )
    }

    /// Create a trainable variable initialized from N(mean, stdev).
    pub fn randn(
        &self,
        name: &str,
        dims: impl Into<Shape>,
        mean: f64,
        stdev: f64,
    ) -> Result<Tensor<B>> {
        self.new_var(name, dims, Init::Randn { mean, stdev })
    }

    /// Create a trainable variable initialized from U(lo, up).
    pub fn uniform(
        &self,
        name: &str,
        dims: impl Into<Shape>,
        lo: f64,
        up: f64,
    ) -> Result<Tensor<B>> {
        self.new_var(name, dims, Init::Uniform { lo, up })
    }

    /// Create a trainable variable with Kaiming-uniform initialization.
    pub fn kaiming_uniform(
        &self,
        name: &str,
        dims: impl Into<Shape>,
    ) -> Result<Tensor<B>> {
        self.new_var(name, dims, Init::KaimingUniform)
    }

    /// Create a trainable variable holding a copy of `src`'s values.
    /// The copy carries no gradient linkage to `src`.
    pub fn var_copy(&self, name: &str, src: &Tensor<B>) -> Result<Tensor<B>> {
        let v = self.zeros(name, src.dims())?;
        v.copy_from(src)?;
        Ok(v)
    }

    /// Look up `name` directly in the store's table, without qualifying it
    /// with this path's segments. This is the escape hatch for addressing a
    /// variable by its full dotted name from anywhere in the hierarchy.
    pub fn get(&self, name: &str) -> Result<Tensor<B>> {
        self.vars.get(name)
    }

    /// Bind `name` under this path for atomic get-or-create.
    /// Fails if `name` contains [`SEP`].
    pub fn entry(&self, name: &str) -> Result<Entry<B>> {
        Ok(Entry {
            name: self.qualified_name(name)?,
            path: self.clone(),
        })
    }
}

// ── Entry ────────────────────────────────────────────────────────────────

/// A bound lookup for one fully-qualified name, used for get-or-create.
///
/// Each `or_*` method returns the existing variable if the name is taken,
/// and otherwise creates it with the method's initializer — in one atomic
/// step, so racing threads converge on a single variable.
pub struct Entry<B: Backend> {
    name: String,
    path: Path<B>,
}

impl<B: Backend> Entry<B> {
    /// Get the existing variable, or create it initialized per `init`.
    pub fn or_var(&self, dims: impl Into<Shape>, init: Init) -> Result<Tensor<B>> {
        let v = init.init_tensor::<B>(dims, VAR_DTYPE, &self.path.device)?;
        self.path.vars.get_or_insert(self.name.clone(), v, true)
    }

    /// Get the existing variable, or create it zero-initialized.
    pub fn or_zeros(&self, dims: impl Into<Shape>) -> Result<Tensor<B>> {
        self.or_var(dims, Init::Const(0.0))
    }

    /// Get the existing variable, or create it one-initialized.
    pub fn or_ones(&self, dims: impl Into<Shape>) -> Result<Tensor<B>> {
        self.or_var(dims, Init::Const(1.0))
    }

    /// Get the existing variable, or create it from N(mean, stdev).
    pub fn or_randn(
        &self,
        dims: impl Into<Shape>,
        mean: f64,
        stdev: f64,
    ) -> Result<Tensor<B>> {
        self.or_var(dims, Init::Randn { mean, stdev })
    }

    /// Get the existing variable, or create it from N(0, 1).
    pub fn or_randn_standard(&self, dims: impl Into<Shape>) -> Result<Tensor<B>> {
        self.or_var(
            dims,
            Init::Randn {
                mean: 0.0,
                stdev: 1.0,
            },
        )
    }

    /// Get the existing variable, or create it from U(lo, up).
    pub fn or_uniform(
        &self,
        dims: impl Into<Shape>,
        lo: f64,
        up: f64,
    ) -> Result<Tensor<B>> {
        self.or_var(dims, Init::Uniform { lo, up })
    }

    /// Get the existing variable, or create it Kaiming-uniform initialized.
    pub fn or_kaiming_uniform(&self, dims: impl Into<Shape>) -> Result<Tensor<B>> {
        self.or_var(dims, Init::KaimingUniform)
    }

    /// Get the existing variable, or create it zero-initialized; either way,
    /// overwrite its values with a copy of `src`'s (no gradient linkage).
    pub fn or_var_copy(&self, src: &Tensor<B>) -> Result<Tensor<B>> {
        let v = self.or_zeros(src.dims())?;
        v.copy_from(src)?;
        Ok(v)
    }

    /// Get the existing variable, or create it zero-initialized.
    ///
    /// NOTE: despite the name, the created variable is registered as
    /// trainable, with gradient tracking enabled — matching the long-standing
    /// behavior of this method. Use [`Path::zeros_no_train`] to create a
    /// variable that really is non-trainable.
    pub fn or_zeros_no_train(&self, dims: impl Into<Shape>) -> Result<Tensor<B>> {
        let z = Tensor::zeros(dims, VAR_DTYPE, &self.path.device)?;
        self.path.vars.get_or_insert(self.name.clone(), z, true)
    }

    /// Get the existing variable, or create it one-initialized.
    ///
    /// NOTE: despite the name, the created variable is registered as
    /// trainable, with gradient tracking enabled — matching the long-standing
    /// behavior of this method. Use [`Path::ones_no_train`] to create a
    /// variable that really is non-trainable.
    pub fn or_ones_no_train(&self, dims: impl Into<Shape>) -> Result<Tensor<B>> {
        let o = Tensor::ones(dims, VAR_DTYPE, &self.path.device)?;
        self.path.vars.get_or_insert(self.name.clone(), o, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burrow_cpu::{CpuBackend, CpuDevice};

    fn store() -> VarStore<CpuBackend> {
        VarStore::new(CpuDevice)
    }

    #[test]
    fn test_qualified_name() {
        let vs = store();
        let root = vs.root();
        assert_eq!(root.qualified_name("w").unwrap(), "w");
        let sub = root.sub("a").unwrap().sub("b").unwrap();
        assert_eq!(sub.qualified_name("c").unwrap(), "a.b.c");
    }

    #[test]
    fn test_separator_rejected() {
        let vs = store();
        let root = vs.root();
        assert!(root.sub("a.b").is_err());
        assert!(root.qualified_name("a.b").is_err());
        assert!(root.entry("a.b").is_err());
    }

    #[test]
    fn test_insert_disambiguates_on_collision() {
        let vs = store();
        let root = vs.root();
        root.zeros("w", 2).unwrap();
        root.ones("w", 2).unwrap();
        assert_eq!(vs.len(), 2);
        let vars = vs.variables();
        assert!(vars.contains_key("w"));
        assert!(vars.contains_key("w__1"));
        // The original entry kept its values.
        assert_eq!(vars["w"].to_f64_vec().unwrap(), vec![0.0, 0.0]);
        assert_eq!(vars["w__1"].to_f64_vec().unwrap(), vec![1.0, 1.0]);
    }

    #[test]
    fn test_get_unqualified_escape_hatch() {
        let vs = store();
        let layer = vs.root().sub("layer").unwrap();
        layer.zeros("bias", 3).unwrap();
        // get() takes the full dotted name, from any path.
        assert!(layer.get("layer.bias").is_ok());
        assert!(vs.root().get("layer.bias").is_ok());
        assert!(matches!(
            layer.get("bias"),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn test_no_train_creators() {
        let vs = store();
        let root = vs.root();
        let rm = root.zeros_no_train("running_mean", 4).unwrap();
        assert!(!rm.requires_grad());
        assert_eq!(vs.trainable_variables().len(), 0);

        let w = root.zeros("w", 4).unwrap();
        assert!(w.requires_grad());
        assert_eq!(vs.trainable_variables().len(), 1);
    }
}
