//! RHI-specific error types.

use thiserror::Error;

/// RHI-specific error type.
#[derive(Error, Debug)]
pub enum RhiError {
    /// Vulkan API error
    #[cfg(feature = "vulkan")]
    #[error("Vulkan error: {0}")]
    VulkanError(#[from] ash::vk::Result),

    /// Failed to load Vulkan
    #[cfg(feature = "vulkan")]
    #[error("Failed to load Vulkan: {0}")]
    LoadingError(#[from] ash::LoadingError),

    /// GPU allocator error
    #[cfg(feature = "vulkan")]
    #[error("Allocator error: {0}")]
    AllocatorError(#[from] gpu_allocator::AllocationError),

    /// No suitable GPU found
    #[error("No suitable GPU found")]
    NoSuitableGpu,

    /// The device or one of its worker threads could not be started.
    #[error("Device initialization failed: {0}")]
    Initialization(String),

    /// The device stopped responding or was removed.
    #[error("Device lost")]
    DeviceLost,

    /// The device refused a submission.
    #[error("Submission failed: {0}")]
    SubmissionFailed(String),

    /// A resource-view handle outlived its slot.
    #[error("Stale handle: slot {index} generation {generation}")]
    StaleHandle {
        /// Slot the handle pointed at.
        index: u32,
        /// Generation the handle was issued with.
        generation: u32,
    },

    /// Invalid handle error
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    /// A frame slot index outside `[0, frame_count)`.
    #[error("Frame slot {slot} out of range (frame count {frame_count})")]
    InvalidSlot {
        /// Requested slot.
        slot: usize,
        /// Number of slots.
        frame_count: usize,
    },

    /// The slot's previous submission has not completed on the GPU.
    #[error("Frame slot {slot} is still in flight (needs fence value {pending}, completed {completed})")]
    SlotInFlight {
        /// Requested slot.
        slot: usize,
        /// Fence value the slot is waiting on.
        pending: u64,
        /// Last completed fence value.
        completed: u64,
    },

    /// A slot was submitted out of frame order.
    #[error("Frame slot {got} submitted out of order, expected slot {expected}")]
    OutOfOrderSubmission {
        /// Slot that should have been submitted next.
        expected: usize,
        /// Slot that was submitted.
        got: usize,
    },

    /// An operation was called in the wrong state.
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;

impl RhiError {
    /// Whether the device can no longer be used after this error.
    pub fn is_device_fatal(&self) -> bool {
        match self {
            RhiError::DeviceLost | RhiError::SubmissionFailed(_) => true,
            #[cfg(feature = "vulkan")]
            RhiError::VulkanError(result) => matches!(
                *result,
                ash::vk::Result::ERROR_DEVICE_LOST
                    | ash::vk::Result::ERROR_OUT_OF_DEVICE_MEMORY
                    | ash::vk::Result::ERROR_OUT_OF_HOST_MEMORY
            ),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_fatal_classification() {
        assert!(RhiError::DeviceLost.is_device_fatal());
        assert!(RhiError::SubmissionFailed("queue full".into()).is_device_fatal());
        assert!(
            !RhiError::StaleHandle {
                index: 3,
                generation: 1
            }
            .is_device_fatal()
        );
        assert!(
            !RhiError::InvalidSlot {
                slot: 5,
                frame_count: 2
            }
            .is_device_fatal()
        );
    }

    #[test]
    fn test_error_messages() {
        let err = RhiError::OutOfOrderSubmission {
            expected: 1,
            got: 0,
        };
        assert_eq!(
            err.to_string(),
            "Frame slot 0 submitted out of order, expected slot 1"
        );
    }
}
