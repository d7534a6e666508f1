//! Operator instances: graph nodes bound to their memory

use crate::error::{Error, Result};
use crate::network::Network;
use crate::primitive::{PrimitiveKind, ShapeMode};
use cinder_runtime::{Event, Layout, MemoryPtr};
use std::fmt;
use std::sync::Arc;

/// Layouts an implementation is built and dispatched against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImplParams {
    input_layouts: Vec<Layout>,
    output_layout: Layout,
}

impl ImplParams {
    pub fn new(input_layouts: Vec<Layout>, output_layout: Layout) -> Self {
        Self {
            input_layouts,
            output_layout,
        }
    }

    pub fn input_layouts(&self) -> &[Layout] {
        &self.input_layouts
    }

    pub fn output_layout(&self) -> &Layout {
        &self.output_layout
    }
}

/// A runtime node bound to its dependency and output memory
///
/// Instances are never mutated by execution; implementations write through
/// the output handle.
pub struct PrimitiveInst {
    id: String,
    kind: PrimitiveKind,
    shape_mode: ShapeMode,
    dependencies: Vec<MemoryPtr>,
    output: MemoryPtr,
    network: Arc<Network>,
    impl_params: ImplParams,
}

impl PrimitiveInst {
    /// Static-shape instance whose params mirror the bound memory layouts
    pub fn new(
        id: impl Into<String>,
        kind: PrimitiveKind,
        network: Arc<Network>,
        dependencies: Vec<MemoryPtr>,
        output: MemoryPtr,
    ) -> Self {
        let impl_params = ImplParams::new(
            dependencies.iter().map(|m| m.layout().clone()).collect(),
            output.layout().clone(),
        );
        Self {
            id: id.into(),
            kind,
            shape_mode: ShapeMode::Static,
            dependencies,
            output,
            network,
            impl_params,
        }
    }

    pub fn with_shape_mode(mut self, shape_mode: ShapeMode) -> Self {
        self.shape_mode = shape_mode;
        self
    }

    /// Replace the compile-time params, e.g. with a dynamic output layout
    pub fn with_impl_params(mut self, impl_params: ImplParams) -> Self {
        self.impl_params = impl_params;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> PrimitiveKind {
        self.kind
    }

    pub fn shape_mode(&self) -> ShapeMode {
        self.shape_mode
    }

    pub fn dependencies(&self) -> &[MemoryPtr] {
        &self.dependencies
    }

    pub fn dep_memory(&self, index: usize) -> Option<&MemoryPtr> {
        self.dependencies.get(index)
    }

    pub fn output_memory(&self) -> &MemoryPtr {
        &self.output
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn impl_params(&self) -> &ImplParams {
        &self.impl_params
    }

    /// Wait for this instance's completion event
    ///
    /// A failed event becomes [`Error::EvaluationFailed`] when this instance's
    /// own work failed, or [`Error::ProducerFailed`] when it was skipped behind
    /// a failed producer.
    pub fn wait_completed(&self, event: &Event) -> Result<()> {
        event.wait();
        match event.failure() {
            Some(failure) => Err(Error::from_failed_event(self.kind, &self.id, failure)),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for PrimitiveInst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrimitiveInst")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("shape_mode", &self.shape_mode)
            .field("dependencies", &self.dependencies.len())
            .field("output", self.output.layout())
            .finish()
    }
}
