//! Recorded GPU commands
//!
//! The backend records one [`CommandStream`] per frame and hands it to
//! [`RenderDevice::submit`](crate::device::RenderDevice::submit), which
//! replays it against the native API.

use crate::buffer::BufferView;
use crate::device::{DescriptorSetId, PipelineId, PipelineLayoutId};

/// A single recorded command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RenderCommand {
    BindPipeline(PipelineId),
    /// Bind set 0 of `layout`
    BindDescriptorSet {
        layout: PipelineLayoutId,
        set: DescriptorSetId,
    },
    /// 32-bit indices
    BindIndexBuffer(BufferView),
    BindVertexBuffer(BufferView),
    SetViewport {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
    },
    SetScissor {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    },
    SetDepthBounds {
        min: f32,
        max: f32,
    },
    DrawIndexed {
        index_count: u32,
        first_index: u32,
        base_vertex: i32,
    },
}

/// Commands recorded for one frame, in submission order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandStream {
    commands: Vec<RenderCommand>,
}

impl CommandStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, command: RenderCommand) {
        self.commands.push(command);
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn clear(&mut self) {
        self.commands.clear();
    }

    pub fn iter(&self) -> std::slice::Iter<'_, RenderCommand> {
        self.commands.iter()
    }

    pub fn as_slice(&self) -> &[RenderCommand] {
        &self.commands
    }

    /// Number of `DrawIndexed` commands.
    pub fn draw_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, RenderCommand::DrawIndexed { .. }))
            .count()
    }
}

impl<'a> IntoIterator for &'a CommandStream {
    type Item = &'a RenderCommand;
    type IntoIter = std::slice::Iter<'a, RenderCommand>;

    fn into_iter(self) -> Self::IntoIter {
        self.commands.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_records_in_order() {
        let mut stream = CommandStream::new();
        assert!(stream.is_empty());
        stream.push(RenderCommand::BindPipeline(PipelineId(3)));
        stream.push(RenderCommand::DrawIndexed {
            index_count: 6,
            first_index: 0,
            base_vertex: 0,
        });
        stream.push(RenderCommand::DrawIndexed {
            index_count: 3,
            first_index: 0,
            base_vertex: 0,
        });

        assert_eq!(stream.len(), 3);
        assert_eq!(stream.draw_count(), 2);
        assert_eq!(stream.as_slice()[0], RenderCommand::BindPipeline(PipelineId(3)));

        stream.clear();
        assert!(stream.is_empty());
        assert_eq!(stream.iter().count(), 0);
    }
}
