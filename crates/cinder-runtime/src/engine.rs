//! Engine: memory allocation, stream creation and the shared kernel cache

use crate::error::{Result, RuntimeError};
use crate::kernels_cache::KernelsCache;
use crate::layout::{Element, Layout};
use crate::memory::{write_typed, AllocationType, DeviceMemory, HostMemory, MemoryPtr};
use crate::stream::Stream;
use std::env;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Allocation used by [`Engine::allocate`]
    pub default_allocation: AllocationType,
    /// Record per-execution timings
    pub enable_profiling: bool,
    /// Prefix for stream names
    pub stream_name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_allocation: AllocationType::UsmHost,
            enable_profiling: false,
            stream_name: "cinder".to_string(),
        }
    }
}

impl EngineConfig {
    /// Everything host-resident
    pub fn for_host() -> Self {
        Self::default()
    }

    /// Device-resident allocations, host access through staging
    pub fn for_device() -> Self {
        Self {
            default_allocation: AllocationType::UsmDevice,
            ..Self::default()
        }
    }

    /// Defaults overridden by `CINDER_ALLOCATION` and `CINDER_PROFILING`
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(allocation) = env::var("CINDER_ALLOCATION") {
            config.default_allocation = AllocationType::from_name(&allocation)
                .ok_or_else(|| RuntimeError::InvalidConfig(format!("unknown CINDER_ALLOCATION value {allocation:?}")))?;
        }

        if let Ok(profiling) = env::var("CINDER_PROFILING") {
            config.enable_profiling = matches!(profiling.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }

        Ok(config)
    }
}

/// Allocator and stream factory shared by every network
#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    kernels: KernelsCache,
    streams_created: AtomicU64,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        tracing::debug!(
            allocation = %config.default_allocation,
            profiling = config.enable_profiling,
            "engine created"
        );
        Self {
            config,
            kernels: KernelsCache::new(),
            streams_created: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn kernels(&self) -> &KernelsCache {
        &self.kernels
    }

    /// Allocate zeroed memory for a static layout
    pub fn allocate_memory(&self, layout: Layout, allocation: AllocationType) -> Result<MemoryPtr> {
        tracing::trace!(layout = %layout, allocation = %allocation, "allocate");
        let memory: MemoryPtr = match allocation {
            AllocationType::UsmHost => Arc::new(HostMemory::new(layout)?),
            AllocationType::UsmDevice => Arc::new(DeviceMemory::new(layout)?),
        };
        Ok(memory)
    }

    /// Allocate with the configured default allocation type
    pub fn allocate(&self, layout: Layout) -> Result<MemoryPtr> {
        self.allocate_memory(layout, self.config.default_allocation)
    }

    /// Allocate host memory initialized from `data`
    pub fn attach_host<T: Element>(&self, layout: Layout, data: &[T], stream: &Stream) -> Result<MemoryPtr> {
        if T::DATA_TYPE != layout.data_type() {
            return Err(RuntimeError::TypeMismatch {
                requested: std::any::type_name::<T>(),
                actual: layout.data_type(),
            });
        }
        let memory = self.allocate_memory(layout, AllocationType::UsmHost)?;
        write_typed(memory.as_ref(), stream, data)?;
        Ok(memory)
    }

    pub fn create_stream(&self) -> Result<Arc<Stream>> {
        let n = self.streams_created.fetch_add(1, Ordering::Relaxed);
        let stream = Stream::new(format!("{}-{n}", self.config.stream_name))?;
        Ok(Arc::new(stream))
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}
