//! Shared hard limits to prevent unbounded allocations or frame growth.
//!
//! This module centralizes:
//! - Sample size limits (representable data length, default frame size)
//! - Scan buffer sizes per framing discipline
//! - Timing constants used by time-tag handling

use crate::error::DaqError;

// =============================================================================
// Size Limits
// =============================================================================

/// Largest data length in bytes a sample header can describe.
pub const MAX_SAMPLE_DATA_BYTES: usize = u32::MAX as usize;

/// Default maximum size in bytes of a message assembled by a stream scanner.
///
/// Messages that would grow beyond this are force-terminated and counted as overflows.
pub const DEFAULT_MAX_SAMPLE_LENGTH: usize = 8192;

/// Default scan buffer size for driver-framed sources.
pub const DRIVER_SCAN_BUFFER_SIZE: usize = 8192;

/// Default scan buffer size for message stream sources (serial lines, files).
pub const STREAM_SCAN_BUFFER_SIZE: usize = 1024;

/// Default scan buffer size for datagram sources; one UDP payload must fit.
pub const DATAGRAM_SCAN_BUFFER_SIZE: usize = 65_536;

// =============================================================================
// Time Constants
// =============================================================================

/// Microseconds per second.
pub const USECS_PER_SEC: i64 = 1_000_000;
/// Microseconds per day.
pub const USECS_PER_DAY: i64 = 86_400 * USECS_PER_SEC;

/// Maximum data length in elements for an element of `elem_size` bytes.
pub fn max_sample_elements(elem_size: usize) -> usize {
    MAX_SAMPLE_DATA_BYTES / elem_size.max(1)
}

/// Validate that `elements` items of `elem_size` bytes fit in one sample.
pub fn validate_sample_elements(elements: usize, elem_size: usize) -> Result<usize, DaqError> {
    let max = max_sample_elements(elem_size);
    if elements > max {
        return Err(DaqError::SampleTooLarge {
            requested: elements,
            max,
        });
    }
    elements
        .checked_mul(elem_size.max(1))
        .ok_or(DaqError::SampleTooLarge {
            requested: elements,
            max,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_limit_scales_with_size() {
        assert_eq!(max_sample_elements(1), MAX_SAMPLE_DATA_BYTES);
        assert_eq!(max_sample_elements(4), MAX_SAMPLE_DATA_BYTES / 4);
    }

    #[test]
    fn rejects_requests_beyond_limit() {
        assert_eq!(validate_sample_elements(16, 8).ok(), Some(128));
        let err = validate_sample_elements(MAX_SAMPLE_DATA_BYTES / 8 + 1, 8);
        assert!(matches!(err, Err(DaqError::SampleTooLarge { .. })));
    }
}
