//! Device memory, events and streams for cinder primitives
//!
//! This crate provides:
//! - **Layouts**: immutable type/format/shape descriptors
//! - **Memory handles**: host and device buffers with scoped [`MemLock`] access
//! - **Events and streams**: one-shot completion signals and in-order work queues
//! - **Engine**: allocation, stream creation and the shared [`KernelsCache`]
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                   Engine                      │
//! │   allocate_memory   create_stream   kernels   │
//! └──────┬─────────────────┬──────────────┬──────┘
//!        ▼                 ▼              ▼
//!   ┌─────────┐      ┌──────────┐   ┌──────────────┐
//!   │ Memory  │◄─lock─┤  Stream  │   │ KernelsCache │
//!   │ (Arc)   │      │ (worker) │   │  Kernel runs │
//!   └─────────┘      └────┬─────┘   │ on a stream  │
//!                         ▼         └──────────────┘
//!                       Event
//! ```
//!
//! # Usage
//!
//! ```rust
//! use cinder_runtime::{read_typed, write_typed, DataType, Engine, Format, Layout, LockMode};
//!
//! # fn main() -> cinder_runtime::Result<()> {
//! let engine = Engine::default();
//! let stream = engine.create_stream()?;
//!
//! let memory = engine.allocate(Layout::from_dims(DataType::F32, Format::Bfyx, &[1, 1, 1, 3]))?;
//! write_typed(memory.as_ref(), &stream, &[1.0f32, 2.0, 3.0])?;
//!
//! {
//!     let mut lock = memory.lock(&stream, LockMode::ReadWrite)?;
//!     lock.as_mut_slice::<f32>()?[0] = 10.0;
//! }
//!
//! assert_eq!(read_typed::<f32>(memory.as_ref(), &stream)?, vec![10.0, 2.0, 3.0]);
//! # Ok(())
//! # }
//! ```

pub mod engine;
pub mod error;
pub mod event;
pub mod kernels_cache;
pub mod layout;
pub mod memory;
pub mod stream;

pub use engine::{Engine, EngineConfig};
pub use error::{Result, RuntimeError};
pub use event::{Event, EventFailure, EventKind};
pub use kernels_cache::{DispatchData, Kernel, KernelArgs, KernelKey, KernelPtr, KernelsCache};
pub use layout::{DataType, Dimension, Element, Format, Layout, Shape};
pub use memory::{
    read_typed, write_typed, AllocationType, DeviceMemory, HostMemory, LockMode, MemLock, Memory, MemoryPtr,
};
pub use stream::{Stream, StreamFailure};
