//! Execution context shared by the instances of one graph

use crate::error::Result;
use cinder_runtime::{Engine, Stream};
use std::sync::Arc;

/// Owns the stream every instance of a graph executes on
#[derive(Debug)]
pub struct Network {
    engine: Arc<Engine>,
    stream: Arc<Stream>,
}

impl Network {
    pub fn new(engine: Arc<Engine>) -> Result<Self> {
        let stream = engine.create_stream()?;
        tracing::debug!(stream = stream.id(), "network created");
        Ok(Self { engine, stream })
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn stream(&self) -> &Stream {
        &self.stream
    }

    pub fn is_profiling(&self) -> bool {
        self.engine.config().enable_profiling
    }
}
