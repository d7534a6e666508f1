//! Memory handles and scoped host access
//!
//! A memory handle owns a buffer described by an immutable [`Layout`]. Host
//! code reaches the bytes only through [`Memory::lock`], which returns a
//! [`MemLock`] guard:
//!
//! ```text
//! UsmHost   lock(Read)      -> shared mapping of the storage
//!           lock(Write/RW)  -> exclusive mapping of the storage
//! UsmDevice lock(Read)      -> staging copy, discarded on release
//!           lock(Write)     -> zeroed staging, copied to device on release
//!           lock(RW)        -> staging copy, copied to device on release
//! ```
//!
//! Releasing happens when the guard is dropped, on every exit path. Two
//! incompatible locks on the same handle are a caller error: callers order
//! their accesses with events.

use crate::error::{Result, RuntimeError};
use crate::layout::{DataType, Element, Layout};
use crate::stream::Stream;
use cinder_tracing::performance::record_lock;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::fmt;
use std::sync::Arc;

/// Shared pointer to a memory handle
pub type MemoryPtr = Arc<dyn Memory>;

// ================================================================================================
// Lock Modes And Allocation Types
// ================================================================================================

/// Access mode requested when locking memory for the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    Read,
    Write,
    ReadWrite,
}

impl LockMode {
    /// Whether the current contents must be visible through the lock
    pub const fn reads(self) -> bool {
        matches!(self, LockMode::Read | LockMode::ReadWrite)
    }

    /// Whether host writes must be committed when the lock is released
    pub const fn writes(self) -> bool {
        matches!(self, LockMode::Write | LockMode::ReadWrite)
    }

    pub const fn name(self) -> &'static str {
        match self {
            LockMode::Read => "read",
            LockMode::Write => "write",
            LockMode::ReadWrite => "read_write",
        }
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where a buffer lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AllocationType {
    /// Host memory directly addressable by the host
    UsmHost,
    /// Device-resident memory reachable from the host only through staging
    UsmDevice,
}

impl AllocationType {
    pub const fn name(self) -> &'static str {
        match self {
            AllocationType::UsmHost => "usm_host",
            AllocationType::UsmDevice => "usm_device",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "usm_host" | "host" => Some(AllocationType::UsmHost),
            "usm_device" | "device" => Some(AllocationType::UsmDevice),
            _ => None,
        }
    }
}

impl fmt::Display for AllocationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ================================================================================================
// Storage
// ================================================================================================

/// Byte storage backed by `u64` words so every element type can be viewed in place
#[derive(Clone)]
pub(crate) struct Storage {
    words: Vec<u64>,
    len: usize,
}

impl Storage {
    pub(crate) fn zeroed(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(8)],
            len,
        }
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        &bytemuck::cast_slice::<u64, u8>(&self.words)[..self.len]
    }

    pub(crate) fn bytes_mut(&mut self) -> &mut [u8] {
        &mut bytemuck::cast_slice_mut::<u64, u8>(&mut self.words)[..self.len]
    }
}

fn storage_for(layout: &Layout) -> Result<Storage> {
    if layout.is_dynamic() {
        return Err(RuntimeError::DynamicLayout(layout.to_string()));
    }
    let bytes = layout
        .bytes_count()
        .filter(|&bytes| bytes <= isize::MAX as usize)
        .ok_or_else(|| RuntimeError::InvalidConfig(format!("layout {layout} does not fit in addressable memory")))?;
    Ok(Storage::zeroed(bytes))
}

// ================================================================================================
// Memory Trait
// ================================================================================================

/// A host or device buffer with a fixed layout
pub trait Memory: Send + Sync + fmt::Debug {
    /// Layout the buffer was allocated with. Never changes.
    fn layout(&self) -> &Layout;

    fn allocation_type(&self) -> AllocationType;

    /// Size in bytes
    fn size(&self) -> usize;

    /// Acquire a host-visible view, released when the guard drops
    fn lock(&self, stream: &Stream, mode: LockMode) -> Result<MemLock<'_>>;

    /// Direct view for work already running on a stream's queue
    ///
    /// No staging takes place; the caller is the device side of the buffer.
    fn device_view(&self, mode: LockMode) -> Result<MemLock<'_>>;

    /// Overwrite the whole buffer with host bytes
    fn copy_from_host(&self, stream: &Stream, data: &[u8]) -> Result<()> {
        if data.len() != self.size() {
            return Err(RuntimeError::size_mismatch(self.size(), data.len()));
        }
        let mut lock = self.lock(stream, LockMode::Write)?;
        lock.bytes_mut()?.copy_from_slice(data);
        Ok(())
    }

    /// Read the whole buffer into host bytes
    fn copy_to_host(&self, stream: &Stream, out: &mut [u8]) -> Result<()> {
        if out.len() != self.size() {
            return Err(RuntimeError::size_mismatch(self.size(), out.len()));
        }
        let lock = self.lock(stream, LockMode::Read)?;
        out.copy_from_slice(lock.bytes());
        Ok(())
    }

    fn fill(&self, stream: &Stream, value: u8) -> Result<()> {
        let mut lock = self.lock(stream, LockMode::Write)?;
        lock.bytes_mut()?.fill(value);
        Ok(())
    }
}

/// Copy a whole buffer out as typed host values
pub fn read_typed<T: Element>(memory: &dyn Memory, stream: &Stream) -> Result<Vec<T>> {
    let lock = memory.lock(stream, LockMode::Read)?;
    Ok(lock.as_slice::<T>()?.to_vec())
}

/// Overwrite a whole buffer with typed host values
pub fn write_typed<T: Element>(memory: &dyn Memory, stream: &Stream, values: &[T]) -> Result<()> {
    memory.copy_from_host(stream, bytemuck::cast_slice(values))
}

// ================================================================================================
// Lock Guard
// ================================================================================================

enum View<'a> {
    Mapped(RwLockReadGuard<'a, Storage>),
    MappedMut(RwLockWriteGuard<'a, Storage>),
    Staged {
        staging: Storage,
        write_back: Option<&'a RwLock<Storage>>,
    },
}

/// Scoped host view of a memory handle
pub struct MemLock<'a> {
    mode: LockMode,
    data_type: DataType,
    view: View<'a>,
}

impl<'a> MemLock<'a> {
    fn new(mode: LockMode, data_type: DataType, view: View<'a>) -> Self {
        Self { mode, data_type, view }
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn bytes(&self) -> &[u8] {
        match &self.view {
            View::Mapped(guard) => guard.bytes(),
            View::MappedMut(guard) => guard.bytes(),
            View::Staged { staging, .. } => staging.bytes(),
        }
    }

    /// Mutable bytes; only locks taken with a writing mode hand them out
    pub fn bytes_mut(&mut self) -> Result<&mut [u8]> {
        if !self.mode.writes() {
            return Err(RuntimeError::ReadOnlyLock(self.mode));
        }
        match &mut self.view {
            View::Mapped(_) => Err(RuntimeError::ReadOnlyLock(self.mode)),
            View::MappedMut(guard) => Ok(guard.bytes_mut()),
            View::Staged { staging, .. } => Ok(staging.bytes_mut()),
        }
    }

    pub fn as_slice<T: Element>(&self) -> Result<&[T]> {
        self.check_element::<T>()?;
        bytemuck::try_cast_slice(self.bytes()).map_err(|err| view_cast::<T>(err))
    }

    pub fn as_mut_slice<T: Element>(&mut self) -> Result<&mut [T]> {
        self.check_element::<T>()?;
        let bytes = self.bytes_mut()?;
        bytemuck::try_cast_slice_mut(bytes).map_err(|err| view_cast::<T>(err))
    }

    /// Release the lock now instead of at scope exit
    pub fn unlock(self) {}

    fn check_element<T: Element>(&self) -> Result<()> {
        if T::DATA_TYPE != self.data_type {
            return Err(RuntimeError::TypeMismatch {
                requested: std::any::type_name::<T>(),
                actual: self.data_type,
            });
        }
        Ok(())
    }
}

fn view_cast<T>(err: bytemuck::PodCastError) -> RuntimeError {
    RuntimeError::ViewCast {
        element: std::any::type_name::<T>(),
        reason: err.to_string(),
    }
}

impl Drop for MemLock<'_> {
    fn drop(&mut self) {
        if let View::Staged {
            staging,
            write_back: Some(target),
        } = &self.view
        {
            target.write().bytes_mut().copy_from_slice(staging.bytes());
        }
    }
}

impl fmt::Debug for MemLock<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemLock")
            .field("mode", &self.mode)
            .field("data_type", &self.data_type)
            .field("len", &self.bytes().len())
            .finish()
    }
}

// ================================================================================================
// Host Memory
// ================================================================================================

/// Host-resident buffer mapped directly on lock
pub struct HostMemory {
    layout: Layout,
    size: usize,
    storage: RwLock<Storage>,
}

impl HostMemory {
    pub fn new(layout: Layout) -> Result<Self> {
        let storage = storage_for(&layout)?;
        Ok(Self {
            layout,
            size: storage.len,
            storage: RwLock::new(storage),
        })
    }

    fn map(&self, mode: LockMode) -> MemLock<'_> {
        let view = if mode.writes() {
            View::MappedMut(self.storage.write())
        } else {
            View::Mapped(self.storage.read())
        };
        MemLock::new(mode, self.layout.data_type(), view)
    }
}

impl Memory for HostMemory {
    fn layout(&self) -> &Layout {
        &self.layout
    }

    fn allocation_type(&self) -> AllocationType {
        AllocationType::UsmHost
    }

    fn size(&self) -> usize {
        self.size
    }

    fn lock(&self, stream: &Stream, mode: LockMode) -> Result<MemLock<'_>> {
        tracing::trace!(stream = stream.id(), mode = %mode, layout = %self.layout, "host lock");
        record_lock(mode.name(), AllocationType::UsmHost.name(), self.size(), false);
        Ok(self.map(mode))
    }

    fn device_view(&self, mode: LockMode) -> Result<MemLock<'_>> {
        Ok(self.map(mode))
    }
}

impl fmt::Debug for HostMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostMemory").field("layout", &self.layout).finish()
    }
}

// ================================================================================================
// Device Memory
// ================================================================================================

/// Device-resident buffer reached from the host through a staging copy
pub struct DeviceMemory {
    layout: Layout,
    size: usize,
    device: RwLock<Storage>,
}

impl DeviceMemory {
    pub fn new(layout: Layout) -> Result<Self> {
        let storage = storage_for(&layout)?;
        Ok(Self {
            layout,
            size: storage.len,
            device: RwLock::new(storage),
        })
    }
}

impl Memory for DeviceMemory {
    fn layout(&self) -> &Layout {
        &self.layout
    }

    fn allocation_type(&self) -> AllocationType {
        AllocationType::UsmDevice
    }

    fn size(&self) -> usize {
        self.size
    }

    fn lock(&self, stream: &Stream, mode: LockMode) -> Result<MemLock<'_>> {
        tracing::trace!(stream = stream.id(), mode = %mode, layout = %self.layout, "device lock");
        record_lock(mode.name(), AllocationType::UsmDevice.name(), self.size(), true);

        let staging = if mode.reads() {
            self.device.read().clone()
        } else {
            Storage::zeroed(self.size())
        };
        let write_back = mode.writes().then_some(&self.device);

        Ok(MemLock::new(
            mode,
            self.layout.data_type(),
            View::Staged { staging, write_back },
        ))
    }

    fn device_view(&self, mode: LockMode) -> Result<MemLock<'_>> {
        let view = if mode.writes() {
            View::MappedMut(self.device.write())
        } else {
            View::Mapped(self.device.read())
        };
        Ok(MemLock::new(mode, self.layout.data_type(), view))
    }
}

impl fmt::Debug for DeviceMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceMemory").field("layout", &self.layout).finish()
    }
}

// ================================================================================================
// Tests
// ================================================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{Format, Shape};

    fn stream() -> Stream {
        Stream::new("memory-tests").unwrap()
    }

    fn i32_layout(len: usize) -> Layout {
        Layout::from_dims(DataType::I32, Format::Bfyx, &[len])
    }

    #[test]
    fn lock_mode_flags() {
        assert!(LockMode::Read.reads() && !LockMode::Read.writes());
        assert!(!LockMode::Write.reads() && LockMode::Write.writes());
        assert!(LockMode::ReadWrite.reads() && LockMode::ReadWrite.writes());
        assert_eq!(LockMode::ReadWrite.to_string(), "read_write");
    }

    #[test]
    fn allocation_type_names() {
        assert_eq!(AllocationType::from_name("device"), Some(AllocationType::UsmDevice));
        assert_eq!(AllocationType::from_name("USM_HOST"), Some(AllocationType::UsmHost));
        assert_eq!(AllocationType::from_name("shared"), None);
    }

    #[test]
    fn dynamic_layout_cannot_be_allocated() {
        let layout = Layout::new(DataType::F32, Format::Bfyx, Shape::dynamic(1));
        assert!(matches!(HostMemory::new(layout), Err(RuntimeError::DynamicLayout(_))));
    }

    #[test]
    fn host_memory_write_then_read() {
        let stream = stream();
        let memory = HostMemory::new(i32_layout(4)).unwrap();
        assert_eq!(memory.size(), 16);

        {
            let mut lock = memory.lock(&stream, LockMode::Write).unwrap();
            lock.as_mut_slice::<i32>().unwrap().copy_from_slice(&[1, 2, 3, 4]);
        }

        assert_eq!(read_typed::<i32>(&memory, &stream).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn read_lock_rejects_writes() {
        let stream = stream();
        let memory = HostMemory::new(i32_layout(2)).unwrap();
        let mut lock = memory.lock(&stream, LockMode::Read).unwrap();
        assert!(matches!(lock.bytes_mut(), Err(RuntimeError::ReadOnlyLock(LockMode::Read))));
        assert!(lock.as_mut_slice::<i32>().is_err());
    }

    #[test]
    fn typed_view_checks_element_type() {
        let stream = stream();
        let memory = HostMemory::new(i32_layout(2)).unwrap();
        let lock = memory.lock(&stream, LockMode::Read).unwrap();
        assert!(matches!(lock.as_slice::<f32>(), Err(RuntimeError::TypeMismatch { .. })));
        assert_eq!(lock.as_slice::<i32>().unwrap(), &[0, 0]);
    }

    #[test]
    fn device_read_lock_does_not_commit() {
        let stream = stream();
        let memory = DeviceMemory::new(i32_layout(3)).unwrap();
        write_typed(&memory, &stream, &[7, 8, 9]).unwrap();

        let lock = memory.lock(&stream, LockMode::Read).unwrap();
        assert_eq!(lock.as_slice::<i32>().unwrap(), &[7, 8, 9]);
        drop(lock);

        assert_eq!(read_typed::<i32>(&memory, &stream).unwrap(), vec![7, 8, 9]);
    }

    #[test]
    fn device_write_lock_commits_on_release() {
        let stream = stream();
        let memory = DeviceMemory::new(i32_layout(3)).unwrap();

        let mut lock = memory.lock(&stream, LockMode::Write).unwrap();
        lock.as_mut_slice::<i32>().unwrap().copy_from_slice(&[4, 5, 6]);

        // not visible on the device until the staging copy is released
        {
            let device = memory.device_view(LockMode::Read).unwrap();
            assert_eq!(device.as_slice::<i32>().unwrap(), &[0, 0, 0]);
        }
        lock.unlock();

        assert_eq!(read_typed::<i32>(&memory, &stream).unwrap(), vec![4, 5, 6]);
    }

    #[test]
    fn device_write_lock_starts_from_zero() {
        let stream = stream();
        let memory = DeviceMemory::new(i32_layout(2)).unwrap();
        write_typed(&memory, &stream, &[11, 12]).unwrap();

        let lock = memory.lock(&stream, LockMode::Write).unwrap();
        assert_eq!(lock.as_slice::<i32>().unwrap(), &[0, 0]);
        drop(lock);
        assert_eq!(read_typed::<i32>(&memory, &stream).unwrap(), vec![0, 0]);

        let mut lock = memory.lock(&stream, LockMode::ReadWrite).unwrap();
        lock.as_mut_slice::<i32>().unwrap()[1] = 42;
        drop(lock);
        assert_eq!(read_typed::<i32>(&memory, &stream).unwrap(), vec![0, 42]);
    }

    #[test]
    fn lock_released_on_early_return() {
        fn fails_midway(memory: &HostMemory, stream: &Stream) -> Result<()> {
            let lock = memory.lock(stream, LockMode::Write)?;
            lock.as_slice::<f32>()?;
            Ok(())
        }

        let stream = stream();
        let memory = HostMemory::new(i32_layout(1)).unwrap();
        assert!(fails_midway(&memory, &stream).is_err());

        // a second exclusive lock would block forever if the first leaked
        let lock = memory.lock(&stream, LockMode::ReadWrite).unwrap();
        assert_eq!(lock.mode(), LockMode::ReadWrite);
    }

    #[test]
    fn copy_helpers_validate_size() {
        let stream = stream();
        let memory = HostMemory::new(i32_layout(2)).unwrap();
        assert!(matches!(
            memory.copy_from_host(&stream, &[0u8; 3]),
            Err(RuntimeError::BufferSizeMismatch { expected: 8, actual: 3 })
        ));

        memory.fill(&stream, 0xff).unwrap();
        let mut out = [0u8; 8];
        memory.copy_to_host(&stream, &mut out).unwrap();
        assert_eq!(out, [0xff; 8]);
    }

    #[test]
    fn half_precision_view() {
        let stream = stream();
        let memory = HostMemory::new(Layout::from_dims(DataType::F16, Format::Bfyx, &[2])).unwrap();
        write_typed(&memory, &stream, &[half::f16::from_f32(1.5), half::f16::from_f32(-2.0)]).unwrap();
        let values = read_typed::<half::f16>(&memory, &stream).unwrap();
        assert_eq!(values[0].to_f32(), 1.5);
        assert_eq!(values[1].to_f32(), -2.0);
    }
}
