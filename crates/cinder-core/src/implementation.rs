//! The primitive implementation trait
//!
//! Every implementation follows the same execution protocol: wait for (or
//! enqueue behind) the predecessor events, produce the output, and return an
//! event that signals once the output is complete. `execute` takes
//! `&mut self`, so one implementation object never runs concurrently with
//! itself.

use crate::error::Result;
use crate::instance::{ImplParams, PrimitiveInst};
use crate::primitive::PrimitiveKind;
use cinder_runtime::{Event, KernelsCache};
use std::fmt;
use std::sync::Arc;

/// Polymorphic unit of work bound to one instance's static signature
pub trait PrimitiveImpl: Send + fmt::Debug {
    /// Stable tag the implementation is saved and restored under
    fn type_tag(&self) -> &'static str;

    fn kind(&self) -> PrimitiveKind;

    /// Whether the implementation runs on the host
    fn is_cpu(&self) -> bool;

    /// Run once for `instance` after every event in `events`
    fn execute(&mut self, events: &[Event], instance: &PrimitiveInst) -> Result<Event>;

    /// Fetch precompiled kernels. Host implementations have none.
    fn init_kernels(&mut self, _kernels: &KernelsCache, _params: &ImplParams) -> Result<()> {
        Ok(())
    }

    /// Recompute launch sizes for new params. Host implementations have none.
    fn update_dispatch_data(&mut self, _params: &ImplParams) {}

    /// Independent copy with the same configuration and no cached state
    fn clone_impl(&self) -> Box<dyn PrimitiveImpl>;

    /// Bytes persisted after the type tag
    fn save_payload(&self) -> Vec<u8> {
        Vec::new()
    }
}

impl Clone for Box<dyn PrimitiveImpl> {
    fn clone(&self) -> Self {
        self.clone_impl()
    }
}

/// Builds an implementation for an instance
pub type ImplFactory = Arc<dyn Fn(&PrimitiveInst) -> Result<Box<dyn PrimitiveImpl>> + Send + Sync>;
