//! Mirroring configuration
//!
//! Loaded from YAML (every field optional) and overridden by command-line
//! flags in the binary.
//!
//! ```rust
//! use respmirror::{DispatchMode, MirrorConfig};
//!
//! let config = MirrorConfig::from_yaml_str("buffer_capacity: 4096\ndispatch_mode: decoupled\n")
//!     .unwrap();
//! assert_eq!(config.buffer_capacity, 4096);
//! assert_eq!(config.dispatch_mode, DispatchMode::Decoupled);
//! assert_eq!(config.max_nesting_depth, 128);
//! ```

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use tracing::debug;

use crate::{MirrorError, Result};

/// Per-connection stream buffer capacity in bytes.
pub const DEFAULT_BUFFER_CAPACITY: usize = 1024 * 1024;

/// Deepest accepted array nesting.
pub const DEFAULT_MAX_NESTING_DEPTH: usize = 128;

/// Longest accepted header or inline line, including CRLF.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 64 * 1024;

/// Largest accepted bulk string body (the server's own default limit).
pub const DEFAULT_MAX_BULK_LENGTH: usize = 512 * 1024 * 1024;

/// Fragments queued per connection in decoupled mode.
pub const DEFAULT_QUEUE_DEPTH: usize = 1024;

/// How the dispatcher hands payload to connection workers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// Write straight into the stream buffer.
    ///
    /// A full buffer suspends the dispatcher, which stalls ingestion for
    /// every connection until the slow one catches up.
    #[default]
    Inline,
    /// Queue fragments per connection and let a feeder task write them.
    ///
    /// A connection whose queue overflows is evicted instead of stalling
    /// ingestion.
    Decoupled,
}

/// Limits applied by the frame reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramingLimits {
    pub max_nesting_depth: usize,
    pub max_line_length: usize,
    pub max_bulk_length: usize,
}

impl Default for FramingLimits {
    fn default() -> Self {
        Self {
            max_nesting_depth: DEFAULT_MAX_NESTING_DEPTH,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            max_bulk_length: DEFAULT_MAX_BULK_LENGTH,
        }
    }
}

/// Mirroring configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MirrorConfig {
    /// Stream buffer capacity per connection
    pub buffer_capacity: usize,
    /// Deepest accepted array nesting
    pub max_nesting_depth: usize,
    /// Longest accepted header line
    pub max_line_length: usize,
    /// Largest accepted bulk string body
    pub max_bulk_length: usize,
    /// Payload hand-off strategy
    pub dispatch_mode: DispatchMode,
    /// Per-connection queue depth in decoupled mode
    pub queue_depth: usize,
    /// Only dispatch packets addressed to this server
    pub target: Option<SocketAddr>,
    /// Echo sink responses to stdout instead of discarding them
    pub echo_responses: bool,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            max_nesting_depth: DEFAULT_MAX_NESTING_DEPTH,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            max_bulk_length: DEFAULT_MAX_BULK_LENGTH,
            dispatch_mode: DispatchMode::Inline,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            target: None,
            echo_responses: false,
        }
    }
}

impl MirrorConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: MirrorConfig = serde_yaml_ng::from_str(yaml)
            .map_err(|e| MirrorError::config_error(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load, parse and validate a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            MirrorError::config_error(format!("cannot read {}: {}", path.display(), e))
        })?;
        debug!("Loaded configuration from {}", path.display());
        Self::from_yaml_str(&yaml)
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.buffer_capacity == 0 {
            return Err(MirrorError::config_error("buffer_capacity must be non-zero"));
        }
        if self.max_nesting_depth == 0 {
            return Err(MirrorError::config_error("max_nesting_depth must be non-zero"));
        }
        // A line needs at least a marker and CRLF.
        if self.max_line_length < 3 {
            return Err(MirrorError::config_error("max_line_length must be at least 3"));
        }
        if self.dispatch_mode == DispatchMode::Decoupled && self.queue_depth == 0 {
            return Err(MirrorError::config_error("queue_depth must be non-zero"));
        }
        Ok(())
    }

    /// Framing limits for connection workers.
    pub fn framing_limits(&self) -> FramingLimits {
        FramingLimits {
            max_nesting_depth: self.max_nesting_depth,
            max_line_length: self.max_line_length,
            max_bulk_length: self.max_bulk_length,
        }
    }
}
