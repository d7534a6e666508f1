//! Operator kinds, backend kinds and shape modes

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a computation type in the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PrimitiveKind(&'static str);

impl PrimitiveKind {
    pub const RANGE: PrimitiveKind = PrimitiveKind("range");

    /// A kind not shipped with this crate
    pub const fn custom(name: &'static str) -> Self {
        Self(name)
    }

    pub const fn name(self) -> &'static str {
        self.0
    }
}

impl fmt::Display for PrimitiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Category of execution target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Host fallback operating on locked host views
    Cpu,
    /// Precompiled kernels enqueued on a stream
    Device,
}

impl BackendKind {
    pub const fn name(self) -> &'static str {
        match self {
            BackendKind::Cpu => "cpu",
            BackendKind::Device => "device",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Whether dimensions are known when the graph is compiled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShapeMode {
    #[default]
    Static,
    Dynamic,
}

impl ShapeMode {
    pub const BOTH: [ShapeMode; 2] = [ShapeMode::Static, ShapeMode::Dynamic];

    pub const fn name(self) -> &'static str {
        match self {
            ShapeMode::Static => "static",
            ShapeMode::Dynamic => "dynamic",
        }
    }
}

impl fmt::Display for ShapeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
