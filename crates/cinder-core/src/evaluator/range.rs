//! Arithmetic sequence generation
//!
//! Inputs are scalars: `start`, then optionally `stop` and `step` (default 1).
//! Output element `i` is `start + i * step`. Integer outputs are computed in
//! `i64` from inputs truncated toward zero, floating outputs in `f64`. When
//! `stop` is given the output length must match the sequence it describes.

use super::{Evaluator, HostTensor, HostTensorMut};
use crate::error::EvalError;
use cinder_runtime::{DataType, Element};
use half::f16;
use rayon::prelude::*;

/// Outputs at least this long are filled on the rayon pool
const PARALLEL_THRESHOLD: usize = 1 << 16;
const PARALLEL_CHUNK: usize = 1 << 14;

/// Range evaluator bound to one output element type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeEvaluator {
    output_type: DataType,
}

impl RangeEvaluator {
    pub fn new(output_type: DataType) -> Self {
        Self { output_type }
    }
}

impl Evaluator for RangeEvaluator {
    fn output_type(&self) -> DataType {
        self.output_type
    }

    fn evaluate(&self, outputs: &mut [HostTensorMut<'_>], inputs: &[HostTensor<'_>]) -> Result<(), EvalError> {
        let count = outputs.len();
        let [output] = outputs else {
            return Err(EvalError::OutputCount {
                expected: 1,
                actual: count,
            });
        };
        if output.data_type() != self.output_type {
            return Err(EvalError::Other(format!(
                "evaluator configured for {}, output holds {}",
                self.output_type,
                output.data_type()
            )));
        }

        let start = inputs
            .first()
            .ok_or(EvalError::MissingInput("start"))
            .and_then(|t| Scalar::read(t, "start"))?;
        let stop = inputs.get(1).map(|t| Scalar::read(t, "stop")).transpose()?;
        let step = inputs
            .get(2)
            .map(|t| Scalar::read(t, "step"))
            .transpose()?
            .unwrap_or(Scalar::Int(1));

        let args = RangeArgs { start, stop, step };
        match self.output_type {
            DataType::F16 => args.fill_float(output, f16::from_f64),
            DataType::F32 => args.fill_float(output, |v| v as f32),
            DataType::I8 => args.fill_int(output, |v| v as i8),
            DataType::I16 => args.fill_int(output, |v| v as i16),
            DataType::I32 => args.fill_int(output, |v| v as i32),
            DataType::I64 => args.fill_int(output, |v| v),
            DataType::U8 => args.fill_int(output, |v| v as u8),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Scalar {
    Int(i64),
    Float(f64),
}

impl Scalar {
    fn read(tensor: &HostTensor<'_>, name: &'static str) -> Result<Self, EvalError> {
        if tensor.len() != 1 {
            return Err(EvalError::NotScalar {
                input: name,
                count: tensor.len(),
            });
        }
        Ok(match tensor.data_type() {
            DataType::F16 => Scalar::Float(first::<f16>(tensor)?.to_f64()),
            DataType::F32 => Scalar::Float(f64::from(first::<f32>(tensor)?)),
            DataType::I8 => Scalar::Int(i64::from(first::<i8>(tensor)?)),
            DataType::I16 => Scalar::Int(i64::from(first::<i16>(tensor)?)),
            DataType::I32 => Scalar::Int(i64::from(first::<i32>(tensor)?)),
            DataType::I64 => Scalar::Int(first::<i64>(tensor)?),
            DataType::U8 => Scalar::Int(i64::from(first::<u8>(tensor)?)),
        })
    }

    fn as_i64(self) -> i64 {
        match self {
            Scalar::Int(v) => v,
            Scalar::Float(v) => v as i64,
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Scalar::Int(v) => v as f64,
            Scalar::Float(v) => v,
        }
    }
}

/// First element, read without requiring the view to be aligned for `T`
fn first<T: Element>(tensor: &HostTensor<'_>) -> Result<T, EvalError> {
    tensor
        .bytes
        .get(..std::mem::size_of::<T>())
        .map(bytemuck::pod_read_unaligned)
        .ok_or(EvalError::MalformedTensor {
            data_type: tensor.data_type(),
            bytes: tensor.bytes.len(),
        })
}

struct RangeArgs {
    start: Scalar,
    stop: Option<Scalar>,
    step: Scalar,
}

impl RangeArgs {
    fn fill_int<T: Element>(&self, output: &mut HostTensorMut<'_>, cast: fn(i64) -> T) -> Result<(), EvalError> {
        let start = self.start.as_i64();
        let step = self.step.as_i64();
        if step == 0 {
            return Err(EvalError::ZeroStep);
        }

        let values = output.as_mut_slice::<T>()?;
        if let Some(stop) = self.stop {
            check_length(int_length(start, stop.as_i64(), step), values.len())?;
        }

        fill(values, |i| cast(start.wrapping_add((i as i64).wrapping_mul(step))));
        Ok(())
    }

    fn fill_float<T: Element>(&self, output: &mut HostTensorMut<'_>, cast: fn(f64) -> T) -> Result<(), EvalError> {
        let start = self.start.as_f64();
        let step = self.step.as_f64();
        if step == 0.0 {
            return Err(EvalError::ZeroStep);
        }

        let values = output.as_mut_slice::<T>()?;
        if let Some(stop) = self.stop {
            let expected = ((stop.as_f64() - start) / step).ceil().max(0.0) as usize;
            check_length(expected, values.len())?;
        }

        fill(values, |i| cast(start + i as f64 * step));
        Ok(())
    }
}

/// Number of elements in `[start, stop)` walked by `step`
fn int_length(start: i64, stop: i64, step: i64) -> usize {
    let span = i128::from(stop) - i128::from(start);
    let step = i128::from(step);
    if span == 0 || (span > 0) != (step > 0) {
        return 0;
    }
    let (span, step) = (span.abs(), step.abs());
    ((span + step - 1) / step) as usize
}

fn check_length(expected: usize, actual: usize) -> Result<(), EvalError> {
    if expected != actual {
        return Err(EvalError::LengthMismatch { expected, actual });
    }
    Ok(())
}

fn fill<T: Element>(values: &mut [T], value_at: impl Fn(usize) -> T + Sync) {
    if values.len() < PARALLEL_THRESHOLD {
        for (i, v) in values.iter_mut().enumerate() {
            *v = value_at(i);
        }
        return;
    }

    values
        .par_chunks_mut(PARALLEL_CHUNK)
        .enumerate()
        .for_each(|(chunk_idx, chunk)| {
            let base = chunk_idx * PARALLEL_CHUNK;
            for (j, v) in chunk.iter_mut().enumerate() {
                *v = value_at(base + j);
            }
        });
}
