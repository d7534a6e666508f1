//! Host range implementation

use super::CpuImpl;
use crate::error::{EvalError, Error, Result};
use crate::evaluator::{EvaluatorFactory, RangeEvaluator};
use crate::implementation::{ImplFactory, PrimitiveImpl};
use crate::instance::PrimitiveInst;
use crate::primitive::{BackendKind, PrimitiveKind, ShapeMode};
use crate::registry::ImplementationMap;
use cinder_runtime::{DataType, Format};
use std::sync::Arc;

pub const TYPE_TAG: &str = "range_cpu_impl";

/// Output types the host range implementation is registered for
pub const TYPES: [DataType; 6] = [
    DataType::F32,
    DataType::F16,
    DataType::I32,
    DataType::I64,
    DataType::I8,
    DataType::U8,
];

pub const FORMATS: [Format; 3] = [Format::Bfyx, Format::Bfzyx, Format::Bfwzyx];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RangeFactory;

impl EvaluatorFactory for RangeFactory {
    type Evaluator = RangeEvaluator;

    const KIND: PrimitiveKind = PrimitiveKind::RANGE;
    const TYPE_TAG: &'static str = TYPE_TAG;

    fn build(&self, output_type: DataType) -> std::result::Result<RangeEvaluator, EvalError> {
        Ok(RangeEvaluator::new(output_type))
    }
}

pub type RangeImpl = CpuImpl<RangeFactory>;

pub fn create(instance: &PrimitiveInst) -> Result<Box<dyn PrimitiveImpl>> {
    Ok(Box::new(RangeImpl::for_instance(RangeFactory, instance)?))
}

/// Restore from a saved record; nothing is persisted beyond the tag
pub fn load(payload: &[u8]) -> Result<Box<dyn PrimitiveImpl>> {
    if !payload.is_empty() {
        return Err(Error::serialization(format!(
            "{TYPE_TAG} carries no payload, got {} bytes",
            payload.len()
        )));
    }
    Ok(Box::new(RangeImpl::new(RangeFactory)))
}

/// Register for both shape modes
pub fn attach(map: &mut ImplementationMap) {
    let factory: ImplFactory = Arc::new(create);
    for shape in ShapeMode::BOTH {
        map.register(
            PrimitiveKind::RANGE,
            BackendKind::Cpu,
            shape,
            Arc::clone(&factory),
            &TYPES,
            &FORMATS,
        );
    }
}
