//! Device range implementation
//!
//! The kernel is fetched from the engine's [`KernelsCache`] in
//! `init_kernels` and launched on the instance's stream behind the
//! predecessor events. `execute` never waits on the host.
//!
//! A kernel that fails completes the returned event as failed under the
//! instance id; [`PrimitiveInst::wait_completed`] reports it as
//! [`Error::EvaluationFailed`] and the stream skips work queued behind it.

use crate::error::{Error, Result};
use crate::evaluator::{Evaluator, HostTensor, HostTensorMut, RangeEvaluator};
use crate::implementation::{ImplFactory, PrimitiveImpl};
use crate::instance::{ImplParams, PrimitiveInst};
use crate::primitive::{BackendKind, PrimitiveKind, ShapeMode};
use crate::registry::ImplementationMap;
use cinder_runtime::{
    DataType, DispatchData, Event, Format, Kernel, KernelArgs, KernelKey, KernelPtr, KernelsCache, LockMode,
    RuntimeError,
};
use cinder_tracing::perf_span;
use std::sync::Arc;

pub const TYPE_TAG: &str = "range_device_impl";
pub const ENTRY_POINT: &str = "range";
pub const DEFAULT_BLOCK_SIZE: usize = 256;
/// Largest block size the saved record can hold
pub const MAX_BLOCK_SIZE: usize = u32::MAX as usize;

pub const TYPES: [DataType; 4] = [DataType::F32, DataType::F16, DataType::I32, DataType::I64];
pub const FORMATS: [Format; 2] = [Format::Bfyx, Format::Bfzyx];

// ================================================================================================
// Kernel
// ================================================================================================

/// Compiled range kernel for one element type
#[derive(Debug)]
pub struct RangeKernel {
    evaluator: RangeEvaluator,
}

impl RangeKernel {
    pub fn new(data_type: DataType) -> Self {
        Self {
            evaluator: RangeEvaluator::new(data_type),
        }
    }

    pub fn data_type(&self) -> DataType {
        self.evaluator.output_type()
    }
}

impl Kernel for RangeKernel {
    fn entry_point(&self) -> &str {
        ENTRY_POINT
    }

    fn run(&self, args: &KernelArgs<'_>) -> cinder_runtime::Result<()> {
        let count = args.output.layout().count().unwrap_or(0);
        if args.dispatch.work_items() < count {
            return Err(RuntimeError::kernel_launch(
                ENTRY_POINT,
                format!("dispatch covers {} of {count} elements", args.dispatch.work_items()),
            ));
        }

        let input_views = args
            .inputs
            .iter()
            .map(|memory| memory.device_view(LockMode::Read))
            .collect::<cinder_runtime::Result<Vec<_>>>()?;
        let mut output_view = args.output.device_view(LockMode::Write)?;

        let inputs: Vec<HostTensor<'_>> = args
            .inputs
            .iter()
            .zip(&input_views)
            .map(|(memory, view)| HostTensor::new(memory.layout(), view.bytes()))
            .collect();
        let mut outputs = [HostTensorMut::new(args.output.layout(), output_view.bytes_mut()?)];

        self.evaluator
            .evaluate(&mut outputs, &inputs)
            .map_err(|err| RuntimeError::kernel_launch(ENTRY_POINT, err.to_string()))
    }
}

// ================================================================================================
// Implementation
// ================================================================================================

/// Range implementation that enqueues a cached kernel
#[derive(Debug, Clone)]
pub struct RangeDeviceImpl {
    block_size: usize,
    kernel: Option<KernelPtr>,
    dispatch: DispatchData,
}

impl RangeDeviceImpl {
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size: block_size.clamp(1, MAX_BLOCK_SIZE),
            kernel: None,
            dispatch: DispatchData::default(),
        }
    }

    pub fn for_instance(instance: &PrimitiveInst) -> Result<Self> {
        if instance.kind() != PrimitiveKind::RANGE {
            return Err(Error::configuration(format!(
                "{TYPE_TAG} cannot be built for {} node {}",
                instance.kind(),
                instance.id()
            )));
        }
        Ok(Self::new(DEFAULT_BLOCK_SIZE))
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn dispatch(&self) -> DispatchData {
        self.dispatch
    }

    pub fn has_kernel(&self) -> bool {
        self.kernel.is_some()
    }
}

impl PrimitiveImpl for RangeDeviceImpl {
    fn type_tag(&self) -> &'static str {
        TYPE_TAG
    }

    fn kind(&self) -> PrimitiveKind {
        PrimitiveKind::RANGE
    }

    fn is_cpu(&self) -> bool {
        false
    }

    fn execute(&mut self, events: &[Event], instance: &PrimitiveInst) -> Result<Event> {
        let _span = perf_span!("range_device::execute", instance = instance.id());

        let kernel = self.kernel.clone().ok_or_else(|| {
            Error::configuration(format!("{TYPE_TAG} executed for {} before init_kernels", instance.id()))
        })?;

        // dynamic params are sized from the memory actually bound
        let dispatch = if instance.impl_params().output_layout().is_dynamic() {
            let count = instance.output_memory().layout().count().unwrap_or(0);
            DispatchData::linear(count, self.block_size)
        } else {
            self.dispatch
        };

        let inputs = instance.dependencies().to_vec();
        let output = Arc::clone(instance.output_memory());
        let event = instance.network().stream().enqueue_for(instance.id(), events, move || {
            kernel.run(&KernelArgs {
                inputs: &inputs,
                output: &output,
                dispatch,
            })
        })?;

        tracing::trace!(instance = instance.id(), event = event.id(), gws = dispatch.gws[0], "range kernel enqueued");
        Ok(event)
    }

    fn init_kernels(&mut self, kernels: &KernelsCache, params: &ImplParams) -> Result<()> {
        let data_type = params.output_layout().data_type();
        let key = KernelKey::new(ENTRY_POINT, data_type);
        let kernel: KernelPtr = kernels.get_or_create(&key, || Arc::new(RangeKernel::new(data_type)));
        self.kernel = Some(kernel);
        Ok(())
    }

    fn update_dispatch_data(&mut self, params: &ImplParams) {
        let count = params.output_layout().count().unwrap_or(0);
        self.dispatch = DispatchData::linear(count, self.block_size);
    }

    fn clone_impl(&self) -> Box<dyn PrimitiveImpl> {
        Box::new(self.clone())
    }

    fn save_payload(&self) -> Vec<u8> {
        u32::try_from(self.block_size).unwrap_or(u32::MAX).to_le_bytes().to_vec()
    }
}

pub fn create(instance: &PrimitiveInst) -> Result<Box<dyn PrimitiveImpl>> {
    Ok(Box::new(RangeDeviceImpl::for_instance(instance)?))
}

/// Restore from a saved record holding the block size
pub fn load(payload: &[u8]) -> Result<Box<dyn PrimitiveImpl>> {
    let bytes: [u8; 4] = payload.try_into().map_err(|_| {
        Error::serialization(format!("{TYPE_TAG} expects a 4-byte payload, got {} bytes", payload.len()))
    })?;
    let block_size = u32::from_le_bytes(bytes) as usize;
    if block_size == 0 {
        return Err(Error::serialization(format!("{TYPE_TAG} saved with zero block size")));
    }
    Ok(Box::new(RangeDeviceImpl::new(block_size)))
}

pub fn attach(map: &mut ImplementationMap) {
    let factory: ImplFactory = Arc::new(create);
    for shape in ShapeMode::BOTH {
        map.register(
            PrimitiveKind::RANGE,
            BackendKind::Device,
            shape,
            Arc::clone(&factory),
            &TYPES,
            &FORMATS,
        );
    }
}
