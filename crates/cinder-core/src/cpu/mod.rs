//! Host fallback implementations
//!
//! [`CpuImpl`] runs any [`EvaluatorFactory`] through the host execution
//! protocol:
//!
//! ```text
//! wait(predecessors) → user event → lock output (write) + inputs (read)
//!   → evaluator (built once per output type) → release locks → set event
//! ```
//!
//! A failed evaluation returns [`Error::EvaluationFailed`] and leaves the
//! event unsignaled. A predecessor event that completed as failed returns
//! [`Error::ProducerFailed`] before anything is locked or evaluated.

pub mod range;

pub use range::{RangeFactory, RangeImpl};

use crate::error::{Error, EvalError, Result};
use crate::evaluator::{Evaluator, EvaluatorFactory, HostTensor, HostTensorMut};
use crate::implementation::PrimitiveImpl;
use crate::instance::PrimitiveInst;
use crate::primitive::PrimitiveKind;
use cinder_runtime::{DataType, Event, LockMode};
use cinder_tracing::perf_span;
use cinder_tracing::performance::record_execution;
use std::fmt;
use std::time::Instant;

/// Host implementation driving one evaluator
pub struct CpuImpl<F: EvaluatorFactory> {
    factory: F,
    evaluator: Option<F::Evaluator>,
}

impl<F: EvaluatorFactory> CpuImpl<F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            evaluator: None,
        }
    }

    /// Build for `instance`, rejecting nodes of another kind
    pub fn for_instance(factory: F, instance: &PrimitiveInst) -> Result<Self> {
        if instance.kind() != F::KIND {
            return Err(Error::configuration(format!(
                "{} cannot be built for {} node {}",
                F::TYPE_TAG,
                instance.kind(),
                instance.id()
            )));
        }
        Ok(Self::new(factory))
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Whether an evaluator has been built and cached
    pub fn has_evaluator(&self) -> bool {
        self.evaluator.is_some()
    }

    /// Drop the cached evaluator; the next execution builds a new one
    pub fn reset_evaluator(&mut self) {
        self.evaluator = None;
    }

    fn evaluator_for(&mut self, output_type: DataType) -> std::result::Result<&mut F::Evaluator, EvalError> {
        match self.evaluator.take() {
            Some(evaluator) if evaluator.output_type() == output_type => Ok(self.evaluator.insert(evaluator)),
            previous => {
                if let Some(previous) = previous {
                    tracing::debug!(
                        tag = F::TYPE_TAG,
                        from = %previous.output_type(),
                        to = %output_type,
                        "output type changed, rebuilding evaluator"
                    );
                }
                let evaluator = self.factory.build(output_type)?;
                Ok(self.evaluator.insert(evaluator))
            }
        }
    }
}

fn evaluation_failed(kind: PrimitiveKind, instance: &PrimitiveInst, reason: EvalError) -> Error {
    tracing::error!(kind = %kind, instance = instance.id(), %reason, "evaluation failed");
    Error::EvaluationFailed {
        kind: kind.name(),
        instance: instance.id().to_string(),
        reason,
    }
}

impl<F: EvaluatorFactory> PrimitiveImpl for CpuImpl<F> {
    fn type_tag(&self) -> &'static str {
        F::TYPE_TAG
    }

    fn kind(&self) -> PrimitiveKind {
        F::KIND
    }

    fn is_cpu(&self) -> bool {
        true
    }

    fn execute(&mut self, events: &[Event], instance: &PrimitiveInst) -> Result<Event> {
        let _span = perf_span!("cpu_impl::execute", kind = F::KIND.name(), instance = instance.id());
        let started = Instant::now();
        let stream = instance.network().stream();

        Event::wait_all(events);
        if let Some(failure) = events.iter().find_map(Event::failure) {
            return Err(Error::from_failed_event(F::KIND, instance.id(), failure));
        }
        let event = stream.create_user_event(false);

        if !F::OUTPUT_LOCK.writes() {
            return Err(Error::configuration(format!(
                "{} declares output lock mode {}, which cannot write",
                F::TYPE_TAG,
                F::OUTPUT_LOCK
            )));
        }

        let output_memory = instance.output_memory();
        let mut output_lock = output_memory.lock(stream, F::OUTPUT_LOCK)?;
        let input_locks = instance
            .dependencies()
            .iter()
            .map(|memory| memory.lock(stream, LockMode::Read))
            .collect::<cinder_runtime::Result<Vec<_>>>()?;

        let output_type = instance.impl_params().output_layout().data_type();
        let evaluator = self
            .evaluator_for(output_type)
            .map_err(|reason| evaluation_failed(F::KIND, instance, reason))?;

        let inputs: Vec<HostTensor<'_>> = instance
            .dependencies()
            .iter()
            .zip(&input_locks)
            .map(|(memory, lock)| HostTensor::new(memory.layout(), lock.bytes()))
            .collect();
        let mut outputs = [HostTensorMut::new(output_memory.layout(), output_lock.bytes_mut()?)];

        evaluator
            .evaluate(&mut outputs, &inputs)
            .map_err(|reason| evaluation_failed(F::KIND, instance, reason))?;

        drop(inputs);
        drop(input_locks);
        drop(outputs);
        output_lock.unlock();

        event.set();

        if instance.network().is_profiling() {
            record_execution(F::KIND.name(), instance.id(), started.elapsed().as_micros() as u64);
        }
        Ok(event)
    }

    fn clone_impl(&self) -> Box<dyn PrimitiveImpl> {
        Box::new(self.clone())
    }
}

impl<F: EvaluatorFactory> Clone for CpuImpl<F> {
    fn clone(&self) -> Self {
        Self::new(self.factory.clone())
    }
}

impl<F: EvaluatorFactory> fmt::Debug for CpuImpl<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CpuImpl")
            .field("tag", &F::TYPE_TAG)
            .field("factory", &self.factory)
            .field("evaluator", &self.evaluator)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Network;
    use cinder_runtime::{read_typed, write_typed, Engine, Format, Layout};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Writes `7` everywhere and counts how often it is built
    #[derive(Debug, Clone, Default)]
    struct Sevens {
        builds: Arc<AtomicUsize>,
    }

    #[derive(Debug)]
    struct SevensEvaluator(DataType);

    impl Evaluator for SevensEvaluator {
        fn output_type(&self) -> DataType {
            self.0
        }

        fn evaluate(
            &self,
            outputs: &mut [HostTensorMut<'_>],
            _inputs: &[HostTensor<'_>],
        ) -> std::result::Result<(), EvalError> {
            outputs[0].as_mut_slice::<i32>()?.fill(7);
            Ok(())
        }
    }

    impl EvaluatorFactory for Sevens {
        type Evaluator = SevensEvaluator;
        const KIND: PrimitiveKind = PrimitiveKind::custom("sevens");
        const TYPE_TAG: &'static str = "sevens_cpu_impl";

        fn build(&self, output_type: DataType) -> std::result::Result<SevensEvaluator, EvalError> {
            self.builds.fetch_add(1, Ordering::SeqCst);
            Ok(SevensEvaluator(output_type))
        }
    }

    fn sevens_instance(engine: &Arc<Engine>) -> PrimitiveInst {
        let network = Arc::new(Network::new(Arc::clone(engine)).unwrap());
        let output = engine.allocate(Layout::from_dims(DataType::I32, Format::Bfyx, &[3])).unwrap();
        PrimitiveInst::new("sevens:0", Sevens::KIND, network, vec![], output)
    }

    #[test]
    fn evaluator_built_once_across_executions() {
        let engine = Arc::new(Engine::default());
        let inst = sevens_instance(&engine);
        let factory = Sevens::default();
        let mut imp = CpuImpl::new(factory.clone());
        assert!(!imp.has_evaluator());

        imp.execute(&[], &inst).unwrap().wait();
        imp.execute(&[], &inst).unwrap().wait();

        assert!(imp.has_evaluator());
        assert_eq!(factory.builds.load(Ordering::SeqCst), 1);
        let stream = inst.network().stream();
        assert_eq!(read_typed::<i32>(inst.output_memory().as_ref(), stream).unwrap(), vec![7, 7, 7]);
    }

    #[test]
    fn clone_starts_without_evaluator() {
        let engine = Arc::new(Engine::default());
        let inst = sevens_instance(&engine);
        let factory = Sevens::default();
        let mut original = CpuImpl::new(factory.clone());
        original.execute(&[], &inst).unwrap();

        let mut copy = original.clone();
        assert!(!copy.has_evaluator());
        copy.execute(&[], &inst).unwrap();
        assert_eq!(factory.builds.load(Ordering::SeqCst), 2);

        copy.reset_evaluator();
        assert!(!copy.has_evaluator());
        assert!(original.has_evaluator());
    }

    #[test]
    fn rejects_instance_of_another_kind() {
        let engine = Arc::new(Engine::default());
        let network = Arc::new(Network::new(Arc::clone(&engine)).unwrap());
        let output = engine.allocate(Layout::from_dims(DataType::I32, Format::Bfyx, &[1])).unwrap();
        let inst = PrimitiveInst::new("range:0", PrimitiveKind::RANGE, network, vec![], output);

        let err = CpuImpl::for_instance(Sevens::default(), &inst).unwrap_err();
        assert!(matches!(err, Error::Configuration(ref msg) if msg.contains("range:0")));
    }

    #[test]
    fn output_type_change_rebuilds() {
        let factory = Sevens::default();
        let mut imp = CpuImpl::new(factory.clone());
        imp.evaluator_for(DataType::I32).unwrap();
        imp.evaluator_for(DataType::I32).unwrap();
        imp.evaluator_for(DataType::F32).unwrap();
        assert_eq!(factory.builds.load(Ordering::SeqCst), 2);
        assert_eq!(imp.evaluator.as_ref().map(Evaluator::output_type), Some(DataType::F32));
    }

    #[test]
    fn waits_for_predecessors() {
        let engine = Arc::new(Engine::default());
        let inst = sevens_instance(&engine);
        let stream = inst.network().stream();
        write_typed(inst.output_memory().as_ref(), stream, &[0i32, 0, 0]).unwrap();

        let gate = stream.create_user_event(false);
        let setter = {
            let gate = gate.clone();
            std::thread::spawn(move || {
                std::thread::sleep(std::time::Duration::from_millis(10));
                gate.set();
            })
        };

        let mut imp = CpuImpl::new(Sevens::default());
        let done = imp.execute(std::slice::from_ref(&gate), &inst).unwrap();
        assert!(gate.is_set());
        assert!(done.is_set());
        assert!(done.signaled_at().unwrap() >= gate.signaled_at().unwrap());
        setter.join().unwrap();
    }

    #[test]
    fn failed_predecessor_skips_evaluation() {
        let engine = Arc::new(Engine::default());
        let inst = sevens_instance(&engine);
        let stream = inst.network().stream();
        write_typed(inst.output_memory().as_ref(), stream, &[0i32, 0, 0]).unwrap();

        let gate = stream.create_user_event(false);
        gate.set_failed(cinder_runtime::EventFailure::new("range:up", "kernel range failed"));

        let factory = Sevens::default();
        let err = CpuImpl::new(factory.clone()).execute(&[gate], &inst).unwrap_err();
        assert!(matches!(
            err,
            Error::ProducerFailed { ref instance, ref producer } if instance == "sevens:0" && producer == "range:up"
        ));
        assert_eq!(factory.builds.load(Ordering::SeqCst), 0);
        assert_eq!(read_typed::<i32>(inst.output_memory().as_ref(), stream).unwrap(), vec![0, 0, 0]);
    }
}
