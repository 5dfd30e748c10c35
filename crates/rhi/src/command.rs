//! Command recording interfaces.
//!
//! - [`CommandRecorder`] is the lifecycle every backend's command buffer
//!   supports: reset, begin, end.
//! - [`DrawRecorder`] adds the commands the frame loop and the draw sorter
//!   emit: barriers, clears, pipeline and resource binds, indexed draws.
//! - [`RecordingCommandBuffer`] implements both by storing
//!   [`RecordedCommand`]s. The software and test devices use it, and tests
//!   inspect what was recorded.
//!
//! # Example
//!
//! ```
//! use kiln_rhi::command::{CommandRecorder, DrawIndexed, DrawRecorder, PipelineId, RecordingCommandBuffer};
//!
//! # fn main() -> Result<(), kiln_rhi::RhiError> {
//! let mut cmd = RecordingCommandBuffer::new();
//! cmd.begin()?;
//! cmd.set_pipeline(PipelineId(7));
//! cmd.draw_indexed(DrawIndexed::new(36));
//! cmd.end()?;
//!
//! assert_eq!(cmd.draw_count(), 1);
//! # Ok(())
//! # }
//! ```

use tracing::warn;

use crate::descriptor::{CpuDescriptor, GpuDescriptor};
use crate::error::{RhiError, RhiResult};

/// Identifies a compiled pipeline state object on the device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PipelineId(pub u64);

/// Identifies a GPU resource (texture or buffer) for barriers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ResourceId(pub u64);

/// Usage state of a resource, for transition barriers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceState {
    /// Ready to be presented.
    Present,
    /// Bound as a color attachment.
    RenderTarget,
    /// Bound as a depth attachment.
    DepthWrite,
    /// Read by shaders.
    ShaderResource,
    /// Destination of a copy.
    CopyDest,
}

/// Arguments of an indexed draw.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DrawIndexed {
    /// Number of indices to draw.
    pub index_count: u32,
    /// Number of instances.
    pub instance_count: u32,
    /// First index in the bound index buffer.
    pub first_index: u32,
    /// Value added to each index before fetching vertices.
    pub vertex_offset: i32,
}

impl DrawIndexed {
    /// A single-instance draw of `index_count` indices from the start.
    pub fn new(index_count: u32) -> Self {
        Self {
            index_count,
            instance_count: 1,
            first_index: 0,
            vertex_offset: 0,
        }
    }
}

/// Recording lifecycle shared by every command buffer.
///
/// ```text
/// Initial --begin--> Recording --end--> Executable --reset--> Initial
/// ```
pub trait CommandRecorder: Send {
    /// Discards recorded commands and returns to the initial state.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot reset the buffer.
    fn reset(&mut self) -> RhiResult<()>;

    /// Starts recording.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidState`] if the buffer is not in the initial
    /// state, or a backend error.
    fn begin(&mut self) -> RhiResult<()>;

    /// Finishes recording; the buffer can then be submitted.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidState`] if the buffer is not recording, or a
    /// backend error.
    fn end(&mut self) -> RhiResult<()>;

    /// Whether the buffer is between `begin` and `end`.
    fn is_recording(&self) -> bool;
}

/// Draw-level commands.
pub trait DrawRecorder: CommandRecorder {
    /// Transitions `resource` from `before` to `after`.
    fn transition(&mut self, resource: ResourceId, before: ResourceState, after: ResourceState);

    /// Clears a render-target view to `color`.
    fn clear_render_target(&mut self, view: CpuDescriptor, color: [f32; 4]);

    /// Clears a depth-stencil view to `depth`.
    fn clear_depth(&mut self, view: CpuDescriptor, depth: f32);

    /// Binds a pipeline state object.
    fn set_pipeline(&mut self, pipeline: PipelineId);

    /// Binds a constant buffer at a root parameter slot.
    fn set_constant_buffer(&mut self, root_slot: u32, address: GpuDescriptor);

    /// Binds a descriptor table at a root parameter slot.
    fn set_descriptor_table(&mut self, root_slot: u32, table: GpuDescriptor);

    /// Records an indexed draw.
    fn draw_indexed(&mut self, draw: DrawIndexed);
}

/// A command captured by [`RecordingCommandBuffer`].
#[derive(Clone, Debug, PartialEq)]
pub enum RecordedCommand {
    Transition {
        resource: ResourceId,
        before: ResourceState,
        after: ResourceState,
    },
    ClearRenderTarget {
        view: CpuDescriptor,
        color: [f32; 4],
    },
    ClearDepth {
        view: CpuDescriptor,
        depth: f32,
    },
    SetPipeline(PipelineId),
    SetConstantBuffer {
        root_slot: u32,
        address: GpuDescriptor,
    },
    SetDescriptorTable {
        root_slot: u32,
        table: GpuDescriptor,
    },
    DrawIndexed(DrawIndexed),
}

/// Lifecycle state of a [`RecordingCommandBuffer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordingState {
    Initial,
    Recording,
    Executable,
}

/// Command buffer that stores commands in memory.
#[derive(Debug)]
pub struct RecordingCommandBuffer {
    state: RecordingState,
    commands: Vec<RecordedCommand>,
}

impl RecordingCommandBuffer {
    /// Creates an empty buffer in the initial state.
    pub fn new() -> Self {
        Self {
            state: RecordingState::Initial,
            commands: Vec::new(),
        }
    }

    /// Current lifecycle state.
    #[inline]
    pub fn state(&self) -> RecordingState {
        self.state
    }

    /// Commands recorded since the last reset.
    #[inline]
    pub fn commands(&self) -> &[RecordedCommand] {
        &self.commands
    }

    /// Number of draw commands recorded.
    pub fn draw_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|cmd| matches!(cmd, RecordedCommand::DrawIndexed(_)))
            .count()
    }

    /// Pipelines bound, in recording order.
    pub fn pipeline_binds(&self) -> Vec<PipelineId> {
        self.commands
            .iter()
            .filter_map(|cmd| match cmd {
                RecordedCommand::SetPipeline(id) => Some(*id),
                _ => None,
            })
            .collect()
    }

    fn record(&mut self, command: RecordedCommand) {
        if self.state != RecordingState::Recording {
            warn!("Dropping {:?}: command buffer is not recording", command);
            return;
        }
        self.commands.push(command);
    }
}

impl Default for RecordingCommandBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRecorder for RecordingCommandBuffer {
    fn reset(&mut self) -> RhiResult<()> {
        self.commands.clear();
        self.state = RecordingState::Initial;
        Ok(())
    }

    fn begin(&mut self) -> RhiResult<()> {
        if self.state != RecordingState::Initial {
            return Err(RhiError::InvalidState(format!(
                "begin() on a command buffer in state {:?}",
                self.state
            )));
        }
        self.state = RecordingState::Recording;
        Ok(())
    }

    fn end(&mut self) -> RhiResult<()> {
        if self.state != RecordingState::Recording {
            return Err(RhiError::InvalidState(format!(
                "end() on a command buffer in state {:?}",
                self.state
            )));
        }
        self.state = RecordingState::Executable;
        Ok(())
    }

    #[inline]
    fn is_recording(&self) -> bool {
        self.state == RecordingState::Recording
    }
}

impl DrawRecorder for RecordingCommandBuffer {
    fn transition(&mut self, resource: ResourceId, before: ResourceState, after: ResourceState) {
        self.record(RecordedCommand::Transition {
            resource,
            before,
            after,
        });
    }

    fn clear_render_target(&mut self, view: CpuDescriptor, color: [f32; 4]) {
        self.record(RecordedCommand::ClearRenderTarget { view, color });
    }

    fn clear_depth(&mut self, view: CpuDescriptor, depth: f32) {
        self.record(RecordedCommand::ClearDepth { view, depth });
    }

    fn set_pipeline(&mut self, pipeline: PipelineId) {
        self.record(RecordedCommand::SetPipeline(pipeline));
    }

    fn set_constant_buffer(&mut self, root_slot: u32, address: GpuDescriptor) {
        self.record(RecordedCommand::SetConstantBuffer { root_slot, address });
    }

    fn set_descriptor_table(&mut self, root_slot: u32, table: GpuDescriptor) {
        self.record(RecordedCommand::SetDescriptorTable { root_slot, table });
    }

    fn draw_indexed(&mut self, draw: DrawIndexed) {
        self.record(RecordedCommand::DrawIndexed(draw));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle() {
        let mut cmd = RecordingCommandBuffer::new();
        assert_eq!(cmd.state(), RecordingState::Initial);

        cmd.begin().unwrap();
        assert!(cmd.is_recording());
        cmd.set_pipeline(PipelineId(1));
        cmd.draw_indexed(DrawIndexed::new(3));
        cmd.end().unwrap();
        assert_eq!(cmd.state(), RecordingState::Executable);
        assert_eq!(cmd.commands().len(), 2);

        cmd.reset().unwrap();
        assert_eq!(cmd.state(), RecordingState::Initial);
        assert!(cmd.commands().is_empty());
    }

    #[test]
    fn test_begin_twice_is_rejected() {
        let mut cmd = RecordingCommandBuffer::new();
        cmd.begin().unwrap();
        assert!(matches!(cmd.begin(), Err(RhiError::InvalidState(_))));
    }

    #[test]
    fn test_end_without_begin_is_rejected() {
        let mut cmd = RecordingCommandBuffer::new();
        assert!(matches!(cmd.end(), Err(RhiError::InvalidState(_))));
    }

    #[test]
    fn test_commands_outside_recording_are_dropped() {
        let mut cmd = RecordingCommandBuffer::new();
        cmd.draw_indexed(DrawIndexed::new(3));
        assert!(cmd.commands().is_empty());
    }

    #[test]
    fn test_pipeline_binds_in_order() {
        let mut cmd = RecordingCommandBuffer::new();
        cmd.begin().unwrap();
        cmd.set_pipeline(PipelineId(4));
        cmd.draw_indexed(DrawIndexed::new(6));
        cmd.set_pipeline(PipelineId(2));
        cmd.draw_indexed(DrawIndexed::new(6));
        assert_eq!(cmd.pipeline_binds(), vec![PipelineId(4), PipelineId(2)]);
        assert_eq!(cmd.draw_count(), 2);
    }

    #[test]
    fn test_recording_command_buffer_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<RecordingCommandBuffer>();
    }
}
