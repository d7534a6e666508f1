//! Compiled kernel cache
//!
//! Device implementations pull their kernels from a [`KernelsCache`] in
//! their `init_kernels` hook. Kernels are keyed by entry point and element
//! type, built once on first request and shared afterwards.

use crate::error::{Result, RuntimeError};
use crate::layout::DataType;
use crate::memory::MemoryPtr;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Global and local work sizes of one kernel launch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchData {
    pub gws: [usize; 3],
    pub lws: [usize; 3],
}

impl DispatchData {
    /// One-dimensional dispatch over `n` work items, rounded up to whole blocks
    pub fn linear(n: usize, block: usize) -> Self {
        let block = block.max(1);
        let groups = n.div_ceil(block);
        Self {
            gws: [groups * block, 1, 1],
            lws: [block, 1, 1],
        }
    }

    /// Total number of work items launched
    pub fn work_items(&self) -> usize {
        self.gws.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.work_items() == 0
    }
}

/// Arguments bound to one kernel launch
pub struct KernelArgs<'a> {
    pub inputs: &'a [MemoryPtr],
    pub output: &'a MemoryPtr,
    pub dispatch: DispatchData,
}

/// A compiled kernel runnable on a stream's worker
pub trait Kernel: Send + Sync + fmt::Debug {
    fn entry_point(&self) -> &str;

    /// Run one launch. Buffers are reached through [`crate::Memory::device_view`].
    fn run(&self, args: &KernelArgs<'_>) -> Result<()>;
}

pub type KernelPtr = Arc<dyn Kernel>;

/// Cache key for compiled kernels
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KernelKey {
    pub entry_point: &'static str,
    pub data_type: DataType,
}

impl KernelKey {
    pub fn new(entry_point: &'static str, data_type: DataType) -> Self {
        Self { entry_point, data_type }
    }
}

impl fmt::Display for KernelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}<{}>", self.entry_point, self.data_type)
    }
}

/// Thread-safe kernel cache, initialized on first use
pub struct KernelsCache {
    kernels: OnceLock<RwLock<HashMap<KernelKey, KernelPtr>>>,
}

impl KernelsCache {
    pub const fn new() -> Self {
        Self { kernels: OnceLock::new() }
    }

    fn map(&self) -> &RwLock<HashMap<KernelKey, KernelPtr>> {
        self.kernels.get_or_init(|| RwLock::new(HashMap::new()))
    }

    /// Get a kernel, compiling it with `build` on a miss
    ///
    /// Concurrent misses on the same key may each build; the first insert wins
    /// and every caller receives that kernel.
    pub fn get_or_create<F>(&self, key: &KernelKey, build: F) -> KernelPtr
    where
        F: FnOnce() -> KernelPtr,
    {
        if let Some(kernel) = self.map().read().get(key) {
            return Arc::clone(kernel);
        }

        let built = build();
        tracing::debug!(kernel = %key, "kernel compiled");

        let mut kernels = self.map().write();
        Arc::clone(kernels.entry(key.clone()).or_insert(built))
    }

    /// Get a previously compiled kernel
    pub fn get(&self, key: &KernelKey) -> Result<KernelPtr> {
        self.map()
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| RuntimeError::KernelNotFound(key.to_string()))
    }

    /// Insert a kernel, replacing any previous one under the same key
    pub fn insert(&self, key: KernelKey, kernel: KernelPtr) {
        self.map().write().insert(key, kernel);
    }

    pub fn len(&self) -> usize {
        self.kernels.get().map(|k| k.read().len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Some(kernels) = self.kernels.get() {
            kernels.write().clear();
        }
    }
}

impl Default for KernelsCache {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for KernelsCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelsCache").field("len", &self.len()).finish()
    }
}
