//! Frame submission and draw batching.
//!
//! This crate sits between the scene and a [`GraphicsDevice`](kiln_rhi::device::GraphicsDevice):
//! - Frame-slot submission with fence throttling ([`submission`], [`frame`])
//! - Draw collection, culling, sorting and replay ([`sorter`])
//! - Pipeline keys and the pipeline cache ([`pipeline`])
//! - The context that owns all of it ([`context`])

pub mod context;
mod error;
pub mod frame;
pub mod pipeline;
pub mod sorter;
pub mod submission;

pub use context::GraphicsContext;
pub use error::PipelineError;
pub use frame::{FrameContext, FrameOrchestrator, FrameReport};
pub use pipeline::{PipelineCache, PipelineFactory, PipelineKey};
pub use sorter::{DrawBindings, DrawRequest, RenderQueue, RenderQueueSorter, ReplayStats};
pub use submission::{SubmissionQueue, WaitOutcome};

pub use kiln_core::config::MAX_FRAMES_IN_FLIGHT;

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_rhi::headless::HeadlessDevice;

    fn assert_send<T: Send>() {}

    #[test]
    fn test_frame_state_is_send() {
        assert_send::<SubmissionQueue<HeadlessDevice>>();
        assert_send::<FrameOrchestrator<HeadlessDevice>>();
        assert_send::<GraphicsContext<HeadlessDevice>>();
        assert_send::<RenderQueueSorter>();
    }
}
