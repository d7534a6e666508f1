//! Dispatch glue: run resolved implementations in dependency order
//!
//! Nodes are added in topological order; each names the nodes whose output
//! it consumes. Every node's `execute` receives exactly its producers'
//! completion events. Host nodes refuse a producer event that completed as
//! failed and device nodes queued behind one are skipped by their stream.
//! [`ExecutionPlan::finish`] turns the first failed completion event into an
//! error naming the node.

use crate::error::{Error, Result};
use crate::implementation::PrimitiveImpl;
use crate::instance::PrimitiveInst;
use crate::primitive::BackendKind;
use crate::registry::ImplementationMap;
use cinder_runtime::Event;
use cinder_tracing::perf_event;
use parking_lot::Mutex;
use std::thread;

struct PlanNode {
    instance: PrimitiveInst,
    implementation: Box<dyn PrimitiveImpl>,
    producers: Vec<usize>,
}

/// Instances paired with their implementations
#[derive(Default)]
pub struct ExecutionPlan {
    nodes: Vec<PlanNode>,
}

impl ExecutionPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve an implementation for `instance` over `backends` and append it
    pub fn add(
        &mut self,
        registry: &ImplementationMap,
        backends: &[BackendKind],
        instance: PrimitiveInst,
        producers: &[usize],
    ) -> Result<usize> {
        let output = instance.impl_params().output_layout();
        let (backend, _) = registry.resolve(
            instance.kind(),
            backends,
            instance.shape_mode(),
            output.data_type(),
            output.format(),
        )?;
        let implementation = registry.create(&instance, backend)?;
        self.add_with_impl(instance, implementation, producers)
    }

    /// Append a node with an implementation built elsewhere
    pub fn add_with_impl(
        &mut self,
        instance: PrimitiveInst,
        implementation: Box<dyn PrimitiveImpl>,
        producers: &[usize],
    ) -> Result<usize> {
        let index = self.nodes.len();
        if let Some(&bad) = producers.iter().find(|&&p| p >= index) {
            return Err(Error::configuration(format!(
                "node {} lists producer {bad}, which is not an earlier node",
                instance.id()
            )));
        }
        self.nodes.push(PlanNode {
            instance,
            implementation,
            producers: producers.to_vec(),
        });
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn instance(&self, index: usize) -> Option<&PrimitiveInst> {
        self.nodes.get(index).map(|node| &node.instance)
    }

    /// Execute every node on the calling thread, in insertion order
    ///
    /// Returns each node's completion event. Stops at the first failure
    /// returned by an `execute`.
    pub fn run(&mut self) -> Result<Vec<Event>> {
        let mut events: Vec<Event> = Vec::with_capacity(self.nodes.len());
        for node in &mut self.nodes {
            let deps: Vec<Event> = node.producers.iter().map(|&p| events[p].clone()).collect();
            let event = node.implementation.execute(&deps, &node.instance)?;
            perf_event!("plan_node", instance = node.instance.id(), completion = event.id());
            events.push(event);
        }
        Ok(events)
    }

    /// Execute each node on its own scoped thread
    ///
    /// A node starts once its producers have returned their events. A node
    /// whose producer failed is not executed and reports
    /// [`Error::ProducerFailed`]. The first error in node order is returned.
    pub fn run_concurrent(&mut self) -> Result<Vec<Event>> {
        if self.nodes.is_empty() {
            return Ok(Vec::new());
        }

        // signaled when a node's execute has returned, successfully or not
        let returned: Vec<Event> = self
            .nodes
            .iter()
            .map(|node| node.instance.network().stream().create_user_event(false))
            .collect();
        let results: Vec<Mutex<Option<Result<Event>>>> = self.nodes.iter().map(|_| Mutex::new(None)).collect();
        let ids: Vec<String> = self.nodes.iter().map(|node| node.instance.id().to_string()).collect();

        thread::scope(|scope| {
            for (index, node) in self.nodes.iter_mut().enumerate() {
                let (returned, results, ids) = (&returned, &results, &ids);
                scope.spawn(move || {
                    let outcome = run_node(node, returned, results, ids);
                    *results[index].lock() = Some(outcome);
                    returned[index].set();
                });
            }
        });

        results
            .into_iter()
            .zip(ids)
            .map(|(slot, id)| {
                slot.into_inner()
                    .unwrap_or_else(|| Err(Error::configuration(format!("node {id} never ran"))))
            })
            .collect()
    }

    /// Wait for the events a run returned and report the first failed node
    pub fn finish(&self, events: &[Event]) -> Result<()> {
        if events.len() != self.nodes.len() {
            return Err(Error::configuration(format!(
                "plan has {} nodes but {} completion events were given",
                self.nodes.len(),
                events.len()
            )));
        }
        Event::wait_all(events);
        self.nodes
            .iter()
            .zip(events)
            .try_for_each(|(node, event)| node.instance.wait_completed(event))
    }
}

fn run_node(
    node: &mut PlanNode,
    returned: &[Event],
    results: &[Mutex<Option<Result<Event>>>],
    ids: &[String],
) -> Result<Event> {
    let mut deps = Vec::with_capacity(node.producers.len());
    for &producer in &node.producers {
        returned[producer].wait();
        match results[producer].lock().as_ref() {
            Some(Ok(event)) => deps.push(event.clone()),
            _ => {
                return Err(Error::ProducerFailed {
                    instance: node.instance.id().to_string(),
                    producer: ids[producer].clone(),
                })
            }
        }
    }
    node.implementation.execute(&deps, &node.instance)
}
