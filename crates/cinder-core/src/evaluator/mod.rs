//! Backend evaluators
//!
//! An evaluator computes one operator over host-visible tensors. It is built
//! from static parameters (the output element type) and then reused for
//! every execution with that type.

pub mod range;

pub use range::RangeEvaluator;

use crate::error::EvalError;
use crate::primitive::PrimitiveKind;
use cinder_runtime::{DataType, Element, Layout, LockMode};
use std::fmt;

// ================================================================================================
// Host Tensors
// ================================================================================================

/// Read-only host view of a locked buffer
#[derive(Clone, Copy)]
pub struct HostTensor<'a> {
    layout: &'a Layout,
    bytes: &'a [u8],
}

impl<'a> HostTensor<'a> {
    pub fn new(layout: &'a Layout, bytes: &'a [u8]) -> Self {
        Self { layout, bytes }
    }

    pub fn layout(&self) -> &Layout {
        self.layout
    }

    pub fn data_type(&self) -> DataType {
        self.layout.data_type()
    }

    /// Number of elements in the view
    pub fn len(&self) -> usize {
        self.bytes.len() / self.data_type().size_of()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_slice<T: Element>(&self) -> Result<&'a [T], EvalError> {
        check_type::<T>(self.data_type(), self.bytes.len())?;
        bytemuck::try_cast_slice(self.bytes).map_err(|err| EvalError::Other(err.to_string()))
    }
}

/// Writable host view of a locked output buffer
pub struct HostTensorMut<'a> {
    layout: &'a Layout,
    bytes: &'a mut [u8],
}

impl<'a> HostTensorMut<'a> {
    pub fn new(layout: &'a Layout, bytes: &'a mut [u8]) -> Self {
        Self { layout, bytes }
    }

    pub fn layout(&self) -> &Layout {
        self.layout
    }

    pub fn data_type(&self) -> DataType {
        self.layout.data_type()
    }

    pub fn len(&self) -> usize {
        self.bytes.len() / self.data_type().size_of()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_mut_slice<T: Element>(&mut self) -> Result<&mut [T], EvalError> {
        check_type::<T>(self.data_type(), self.bytes.len())?;
        bytemuck::try_cast_slice_mut(self.bytes).map_err(|err| EvalError::Other(err.to_string()))
    }
}

fn check_type<T: Element>(data_type: DataType, bytes: usize) -> Result<(), EvalError> {
    if T::DATA_TYPE != data_type {
        return Err(EvalError::Other(format!(
            "tensor holds {data_type}, view requested {}",
            T::DATA_TYPE
        )));
    }
    if bytes % data_type.size_of() != 0 {
        return Err(EvalError::MalformedTensor { data_type, bytes });
    }
    Ok(())
}

// ================================================================================================
// Evaluator Traits
// ================================================================================================

/// Computes one operator in place over host views
pub trait Evaluator: Send + fmt::Debug {
    /// Element type the evaluator was configured for
    fn output_type(&self) -> DataType;

    fn evaluate(&self, outputs: &mut [HostTensorMut<'_>], inputs: &[HostTensor<'_>]) -> Result<(), EvalError>;
}

/// Static description of a CPU implementation: its kind, tag and evaluator
pub trait EvaluatorFactory: Clone + Send + Sync + fmt::Debug + 'static {
    type Evaluator: Evaluator;

    const KIND: PrimitiveKind;

    /// Stable tag the implementation is saved under
    const TYPE_TAG: &'static str;

    /// Mode the output is locked in. Must be a writing mode.
    const OUTPUT_LOCK: LockMode = LockMode::Write;

    fn build(&self, output_type: DataType) -> Result<Self::Evaluator, EvalError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinder_runtime::Format;

    #[test]
    fn typed_views_check_element_type() {
        let layout = Layout::from_dims(DataType::I32, Format::Bfyx, &[2]);
        let words = [3i32, 4];
        let tensor = HostTensor::new(&layout, bytemuck::cast_slice(&words));
        assert_eq!(tensor.len(), 2);
        assert_eq!(tensor.as_slice::<i32>().unwrap(), &[3, 4]);
        assert!(tensor.as_slice::<f32>().is_err());
    }

    #[test]
    fn ragged_bytes_are_rejected() {
        let layout = Layout::from_dims(DataType::I32, Format::Bfyx, &[1]);
        let mut bytes = [0u8; 8];
        let mut tensor = HostTensorMut::new(&layout, &mut bytes[..6]);
        assert_eq!(
            tensor.as_mut_slice::<i32>().unwrap_err(),
            EvalError::MalformedTensor {
                data_type: DataType::I32,
                bytes: 6
            }
        );
    }
}
