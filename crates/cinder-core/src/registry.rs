//! Capability-keyed implementation registry
//!
//! Maps `(kind, backend, shape mode, data type, format)` to a factory. The
//! table is filled by an explicit routine, [`register_implementations`],
//! and is read-only afterwards. [`global`] builds the process-wide table on
//! first access; tests construct their own with [`ImplementationMap::new`].

use crate::error::{Error, Result};
use crate::implementation::{ImplFactory, PrimitiveImpl};
use crate::instance::PrimitiveInst;
use crate::primitive::{BackendKind, PrimitiveKind, ShapeMode};
use cinder_runtime::{DataType, Format};
use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

/// Composite registry key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImplKey {
    pub kind: PrimitiveKind,
    pub backend: BackendKind,
    pub shape: ShapeMode,
    pub data_type: DataType,
    pub format: Format,
}

impl fmt::Display for ImplKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}/{}",
            self.kind, self.backend, self.shape, self.data_type, self.format
        )
    }
}

/// Key-to-factory table
#[derive(Default)]
pub struct ImplementationMap {
    entries: HashMap<ImplKey, ImplFactory>,
}

impl ImplementationMap {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Table holding every implementation shipped with this crate
    pub fn with_builtins() -> Self {
        let mut map = Self::new();
        register_implementations(&mut map);
        map
    }

    /// Register `factory` for every `types × formats` pair
    ///
    /// An identical key registered again is overridden; the last
    /// registration wins.
    pub fn register(
        &mut self,
        kind: PrimitiveKind,
        backend: BackendKind,
        shape: ShapeMode,
        factory: ImplFactory,
        types: &[DataType],
        formats: &[Format],
    ) {
        for &data_type in types {
            for &format in formats {
                let key = ImplKey {
                    kind,
                    backend,
                    shape,
                    data_type,
                    format,
                };
                if self.entries.insert(key, ImplFactory::clone(&factory)).is_some() {
                    tracing::debug!(key = %key, "implementation overridden");
                }
            }
        }
    }

    pub fn lookup(
        &self,
        kind: PrimitiveKind,
        backend: BackendKind,
        shape: ShapeMode,
        data_type: DataType,
        format: Format,
    ) -> Result<&ImplFactory> {
        let key = ImplKey {
            kind,
            backend,
            shape,
            data_type,
            format,
        };
        let found = self.entries.get(&key);
        tracing::trace!(key = %key, hit = found.is_some(), "registry lookup");
        found.ok_or(Error::ImplementationNotFound { key })
    }

    /// Look up across a backend preference list
    ///
    /// Returns the first backend with a registered factory. The miss reported
    /// when none match names the last backend tried.
    pub fn resolve(
        &self,
        kind: PrimitiveKind,
        backends: &[BackendKind],
        shape: ShapeMode,
        data_type: DataType,
        format: Format,
    ) -> Result<(BackendKind, &ImplFactory)> {
        let mut last_miss = None;
        for &backend in backends {
            match self.lookup(kind, backend, shape, data_type, format) {
                Ok(factory) => return Ok((backend, factory)),
                Err(err) => last_miss = Some(err),
            }
        }
        Err(last_miss.unwrap_or_else(|| Error::configuration(format!("no backends given to resolve {kind}"))))
    }

    /// Build an implementation for `instance` ready to execute
    ///
    /// Keyed by the instance's kind, shape mode and output layout. Kernels are
    /// fetched from the engine cache and dispatch data computed before return.
    pub fn create(&self, instance: &PrimitiveInst, backend: BackendKind) -> Result<Box<dyn PrimitiveImpl>> {
        let output = instance.impl_params().output_layout();
        let factory = self.lookup(
            instance.kind(),
            backend,
            instance.shape_mode(),
            output.data_type(),
            output.format(),
        )?;
        let mut implementation = factory(instance)?;
        implementation.init_kernels(instance.network().engine().kernels(), instance.impl_params())?;
        implementation.update_dispatch_data(instance.impl_params());

        tracing::debug!(
            instance = instance.id(),
            tag = implementation.type_tag(),
            backend = %backend,
            "implementation created"
        );
        Ok(implementation)
    }

    /// Every key registered for `kind`, sorted
    pub fn entries_for(&self, kind: PrimitiveKind) -> Vec<ImplKey> {
        let mut keys: Vec<_> = self.entries.keys().filter(|key| key.kind == kind).copied().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for ImplementationMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImplementationMap").field("entries", &self.entries.len()).finish()
    }
}

/// Register every implementation shipped with this crate
pub fn register_implementations(map: &mut ImplementationMap) {
    crate::cpu::range::attach(map);
    crate::device::range::attach(map);
    tracing::debug!(entries = map.len(), "implementations registered");
}

/// Process-wide table, built on first access
pub fn global() -> &'static ImplementationMap {
    static GLOBAL: OnceLock<ImplementationMap> = OnceLock::new();
    GLOBAL.get_or_init(ImplementationMap::with_builtins)
}
