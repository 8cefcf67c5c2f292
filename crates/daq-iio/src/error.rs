//! Error types for buffered I/O operations.
//!
//! Every failure of the buffer/block/stream contract is reported synchronously
//! through [`IioError`]. Variants carry the name of the operation that failed
//! and the device or channel involved, so a command-line front end can print a
//! useful diagnostic without further context.
//!
//! Errors fall into three groups:
//!
//! 1. **Recoverable outcomes of blocking calls** - [`IioError::Timeout`],
//!    [`IioError::Cancelled`] and [`IioError::WouldBlock`]. The caller may
//!    simply try again (see [`IioError::is_recoverable`]).
//! 2. **Configuration and resource errors** - allocation, layout, busy ring,
//!    attribute and configuration failures.
//! 3. **Programming errors** - [`IioError::InvalidState`], an illegal
//!    lifecycle transition. These indicate a bug in the caller.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for buffered I/O operations.
pub type Result<T> = std::result::Result<T, IioError>;

/// Lifecycle state of a [`Buffer`](crate::Buffer).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    /// Created, never enabled.
    Created,
    /// Hardware ring active; blocks may be created and transferred.
    Enabled,
    /// Hardware ring stopped; may be enabled again.
    Disabled,
    /// Ring released. Terminal.
    Destroyed,
}

impl fmt::Display for BufferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Enabled => write!(f, "enabled"),
            Self::Disabled => write!(f, "disabled"),
            Self::Destroyed => write!(f, "destroyed"),
        }
    }
}

/// Errors that can occur while driving buffers, blocks and streams.
#[derive(Error, Debug)]
pub enum IioError {
    /// Memory or hardware resources could not be obtained.
    #[error("{op}: allocation failed: {reason}")]
    Allocation {
        /// Operation that failed.
        op: &'static str,
        /// What could not be allocated.
        reason: String,
    },

    /// A channels mask was built for a device with a different channel count.
    #[error(
        "{op}: channels mask has {mask_size} bits but device '{device}' has {channel_count} channels"
    )]
    DeviceMismatch {
        /// Operation that failed.
        op: &'static str,
        /// Device id.
        device: String,
        /// Bits in the offending mask.
        mask_size: usize,
        /// Channels on the device.
        channel_count: usize,
    },

    /// The channel selection or a request argument forms an invalid layout.
    #[error("{op} on device '{device}': invalid configuration: {reason}")]
    InvalidConfiguration {
        /// Operation that failed.
        op: &'static str,
        /// Device id.
        device: String,
        /// Why the configuration was rejected.
        reason: String,
    },

    /// The channel cannot take part in buffered I/O.
    #[error("channel '{channel}' of device '{device}' is not a scan element")]
    NotScanElement {
        /// Device id.
        device: String,
        /// Channel id.
        channel: String,
    },

    /// The channel is not enabled in the mask of the buffer being accessed.
    #[error("{op}: channel '{channel}' is not enabled in the buffer's channels mask")]
    NotEnabled {
        /// Operation that failed.
        op: &'static str,
        /// Channel id.
        channel: String,
    },

    /// The hardware ring is already claimed, or locked in cyclic mode.
    #[error("hardware ring {hw_index} of device '{device}' is busy: {reason}")]
    HardwareBusy {
        /// Device id.
        device: String,
        /// Hardware buffer index.
        hw_index: u32,
        /// Who holds the ring.
        reason: String,
    },

    /// The block is handed to the hardware; its memory may not be touched.
    #[error("{op}: block of device '{device}' is enqueued")]
    BlockBusy {
        /// Operation that failed.
        op: &'static str,
        /// Device id.
        device: String,
    },

    /// No room left in the hardware ring.
    #[error("ring of device '{device}' is full ({depth} transfers outstanding)")]
    RingFull {
        /// Device id.
        device: String,
        /// Configured ring depth.
        depth: usize,
    },

    /// The owning buffer must be enabled for this operation.
    #[error("{op}: buffer of device '{device}' is not enabled")]
    BufferNotEnabled {
        /// Operation that failed.
        op: &'static str,
        /// Device id.
        device: String,
    },

    /// A non-blocking dequeue found the transfer still in progress.
    #[error("transfer on device '{device}' still in progress")]
    WouldBlock {
        /// Device id.
        device: String,
    },

    /// A blocking wait exceeded the context timeout.
    #[error("{op} on device '{device}' timed out after {timeout:?}")]
    Timeout {
        /// Operation that failed.
        op: &'static str,
        /// Device id.
        device: String,
        /// Timeout that expired.
        timeout: Duration,
    },

    /// The buffer was cancelled or disabled while the operation was pending.
    #[error("{op} on device '{device}' was cancelled")]
    Cancelled {
        /// Operation that failed.
        op: &'static str,
        /// Device id.
        device: String,
    },

    /// Illegal lifecycle transition. Indicates a bug in the caller.
    #[error("{op}: invalid in buffer state '{state}'")]
    InvalidState {
        /// Operation that was refused.
        op: &'static str,
        /// State the buffer was in.
        state: BufferState,
    },

    /// The transport reported a transfer failure.
    #[error("backend error on device '{device}': {message}")]
    Backend {
        /// Device id.
        device: String,
        /// Transport message.
        message: String,
    },

    /// Attribute lookup, I/O or parse failure.
    #[error("attribute '{name}': {message}")]
    Attribute {
        /// Attribute name.
        name: String,
        /// What went wrong.
        message: String,
    },

    /// Configuration could not be loaded or failed validation.
    #[error("configuration error: {0}")]
    Config(String),
}

impl IioError {
    /// Expected outcome of a blocking call; retrying is meaningful.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Cancelled { .. } | Self::WouldBlock { .. }
        )
    }

    /// Caller violated the lifecycle contract.
    pub fn is_programming_error(&self) -> bool {
        matches!(self, Self::InvalidState { .. })
    }

    /// Check if a resource is temporarily unavailable.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            Self::HardwareBusy { .. }
                | Self::BlockBusy { .. }
                | Self::RingFull { .. }
                | Self::WouldBlock { .. }
        )
    }

    /// Check if this is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Check if this is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub(crate) fn attribute(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Attribute {
            name: name.into(),
            message: message.into(),
        }
    }
}

impl From<figment::Error> for IioError {
    fn from(err: figment::Error) -> Self {
        Self::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_carries_context() {
        let err = IioError::DeviceMismatch {
            op: "create_buffer",
            device: "iio:device0".to_string(),
            mask_size: 3,
            channel_count: 4,
        };
        let msg = err.to_string();
        assert!(msg.contains("create_buffer"));
        assert!(msg.contains("iio:device0"));
        assert!(msg.contains('3'));
        assert!(msg.contains('4'));
    }

    #[test]
    fn test_classification() {
        let timeout = IioError::Timeout {
            op: "dequeue",
            device: "adc".to_string(),
            timeout: Duration::from_millis(10),
        };
        assert!(timeout.is_recoverable());
        assert!(timeout.is_timeout());
        assert!(!timeout.is_programming_error());

        let cancelled = IioError::Cancelled {
            op: "dequeue",
            device: "adc".to_string(),
        };
        assert!(cancelled.is_recoverable());
        assert!(cancelled.is_cancelled());

        let state = IioError::InvalidState {
            op: "destroy",
            state: BufferState::Enabled,
        };
        assert!(state.is_programming_error());
        assert!(!state.is_recoverable());
        assert!(state.to_string().contains("enabled"));

        let full = IioError::RingFull {
            device: "adc".to_string(),
            depth: 4,
        };
        assert!(full.is_busy());
    }

    #[test]
    fn test_buffer_state_display() {
        assert_eq!(BufferState::Created.to_string(), "created");
        assert_eq!(BufferState::Destroyed.to_string(), "destroyed");
    }
}
