//! Primitive implementation framework for cinder
//!
//! This crate provides:
//! - **Execution protocol**: [`PrimitiveImpl`], with host ([`cpu::CpuImpl`]) and
//!   device-kernel ([`device::RangeDeviceImpl`]) variants
//! - **Evaluators**: numeric backends run over locked host views
//! - **Registry**: `(kind, backend, shape mode, type, format)` → factory
//! - **Serialization**: implementations saved and restored by type tag
//! - **Execution plans**: dependency-ordered dispatch of resolved implementations
//!
//! # Architecture
//!
//! ```text
//! PrimitiveInst ──► ImplementationMap::create ──► Box<dyn PrimitiveImpl>
//!                                                        │
//!        predecessor events ──► execute(events, inst) ───┤
//!                                                        ▼
//!                                               completion Event
//! ```
//!
//! # Usage
//!
//! ```rust
//! use cinder_core::{registry, BackendKind, Network, PrimitiveInst, PrimitiveKind};
//! use cinder_runtime::{read_typed, DataType, Engine, Format, Layout};
//! use std::sync::Arc;
//!
//! # fn main() -> cinder_core::Result<()> {
//! let engine = Arc::new(Engine::default());
//! let network = Arc::new(Network::new(Arc::clone(&engine))?);
//!
//! let start = engine.attach_host(Layout::scalar(DataType::I32, Format::Bfyx), &[0i32], network.stream())?;
//! let output = engine.allocate(Layout::from_dims(DataType::I32, Format::Bfyx, &[1, 1, 1, 5]))?;
//! let inst = PrimitiveInst::new("range:0", PrimitiveKind::RANGE, Arc::clone(&network), vec![start], output);
//!
//! let mut implementation = registry::global().create(&inst, BackendKind::Cpu)?;
//! implementation.execute(&[], &inst)?.wait();
//!
//! let values = read_typed::<i32>(inst.output_memory().as_ref(), network.stream())?;
//! assert_eq!(values, vec![0, 1, 2, 3, 4]);
//! # Ok(())
//! # }
//! ```

pub mod cpu;
pub mod device;
pub mod error;
pub mod evaluator;
pub mod implementation;
pub mod instance;
pub mod network;
pub mod plan;
pub mod primitive;
pub mod registry;
pub mod serialization;

pub use error::{Error, EvalError, Result};
pub use evaluator::{Evaluator, EvaluatorFactory, HostTensor, HostTensorMut};
pub use implementation::{ImplFactory, PrimitiveImpl};
pub use instance::{ImplParams, PrimitiveInst};
pub use network::Network;
pub use plan::ExecutionPlan;
pub use primitive::{BackendKind, PrimitiveKind, ShapeMode};
pub use registry::{register_implementations, ImplKey, ImplementationMap};
pub use serialization::{ImplSerializer, SavedImpl};
