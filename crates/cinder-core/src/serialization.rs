//! Saving and restoring implementations by type tag
//!
//! # Binary format
//!
//! All integers little-endian:
//!
//! ```text
//! [u32 tag_len][tag bytes (UTF-8)][u32 payload_len][payload bytes]
//! ```
//!
//! The payload is whatever [`PrimitiveImpl::save_payload`] returned. The JSON
//! form carries the same two fields for tooling.

use crate::cpu;
use crate::device;
use crate::error::{Error, Result};
use crate::implementation::PrimitiveImpl;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Reconstructs an implementation from its saved payload
pub type ImplLoader = fn(&[u8]) -> Result<Box<dyn PrimitiveImpl>>;

/// Tag and payload of one saved implementation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedImpl {
    pub type_tag: String,
    pub payload: Vec<u8>,
}

impl SavedImpl {
    pub fn capture(implementation: &dyn PrimitiveImpl) -> Self {
        Self {
            type_tag: implementation.type_tag().to_string(),
            payload: implementation.save_payload(),
        }
    }

    pub fn to_binary(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(8 + self.type_tag.len() + self.payload.len());

        buffer.extend_from_slice(&(self.type_tag.len() as u32).to_le_bytes());
        buffer.extend_from_slice(self.type_tag.as_bytes());

        buffer.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        buffer.extend_from_slice(&self.payload);

        buffer
    }

    /// Parse a binary record; trailing bytes are rejected
    pub fn from_binary(buffer: &[u8]) -> Result<Self> {
        let mut offset = 0;

        let tag = read_block(buffer, &mut offset, "type tag")?;
        let type_tag = std::str::from_utf8(tag)
            .map_err(|err| Error::serialization(format!("type tag is not UTF-8: {err}")))?
            .to_string();
        let payload = read_block(buffer, &mut offset, "payload")?.to_vec();

        if offset != buffer.len() {
            return Err(Error::serialization(format!(
                "{} trailing bytes after record",
                buffer.len() - offset
            )));
        }
        Ok(Self { type_tag, payload })
    }
}

/// Read a `[u32 len][bytes]` block
fn read_block<'a>(buffer: &'a [u8], offset: &mut usize, what: &str) -> Result<&'a [u8]> {
    let len_bytes: [u8; 4] = buffer
        .get(*offset..*offset + 4)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or_else(|| Error::serialization(format!("truncated {what} length at offset {offset}")))?;
    *offset += 4;

    let len = u32::from_le_bytes(len_bytes) as usize;
    let block = buffer
        .get(*offset..*offset + len)
        .ok_or_else(|| Error::serialization(format!("{what} needs {len} bytes at offset {offset}")))?;
    *offset += len;
    Ok(block)
}

/// Tag-to-loader table for saved implementations
pub struct ImplSerializer {
    loaders: HashMap<&'static str, ImplLoader>,
}

impl ImplSerializer {
    pub fn new() -> Self {
        Self {
            loaders: HashMap::new(),
        }
    }

    /// Serializer knowing every implementation shipped with this crate
    pub fn with_builtins() -> Self {
        let mut serializer = Self::new();
        serializer.register(cpu::range::TYPE_TAG, cpu::range::load);
        serializer.register(device::range::TYPE_TAG, device::range::load);
        serializer
    }

    pub fn register(&mut self, type_tag: &'static str, loader: ImplLoader) {
        if self.loaders.insert(type_tag, loader).is_some() {
            tracing::debug!(tag = type_tag, "loader overridden");
        }
    }

    pub fn is_registered(&self, type_tag: &str) -> bool {
        self.loaders.contains_key(type_tag)
    }

    pub fn save(&self, implementation: &dyn PrimitiveImpl) -> Vec<u8> {
        SavedImpl::capture(implementation).to_binary()
    }

    pub fn load(&self, buffer: &[u8]) -> Result<Box<dyn PrimitiveImpl>> {
        self.restore(&SavedImpl::from_binary(buffer)?)
    }

    pub fn restore(&self, saved: &SavedImpl) -> Result<Box<dyn PrimitiveImpl>> {
        let loader = self
            .loaders
            .get(saved.type_tag.as_str())
            .ok_or_else(|| Error::UnknownTypeTag(saved.type_tag.clone()))?;
        let implementation = loader(&saved.payload)?;
        tracing::debug!(tag = %saved.type_tag, "implementation restored");
        Ok(implementation)
    }

    pub fn to_json(&self, implementation: &dyn PrimitiveImpl) -> Result<String> {
        serde_json::to_string_pretty(&SavedImpl::capture(implementation))
            .map_err(|err| Error::serialization(err.to_string()))
    }

    pub fn from_json(&self, json: &str) -> Result<Box<dyn PrimitiveImpl>> {
        let saved: SavedImpl = serde_json::from_str(json).map_err(|err| Error::serialization(err.to_string()))?;
        self.restore(&saved)
    }
}

impl Default for ImplSerializer {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl fmt::Debug for ImplSerializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<_> = self.loaders.keys().collect();
        tags.sort();
        f.debug_struct("ImplSerializer").field("tags", &tags).finish()
    }
}
