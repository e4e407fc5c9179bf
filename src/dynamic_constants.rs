//! Constant upload plumbing: ring buffers for per-pass and per-frame
//! constants, and the tiny write-once global constants buffer.

use crate::allocator::align_up;
use crate::device::{BufferId, DeviceError, RenderDevice};
use crate::resource::{BufferDesc, BufferUsage, Format};

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};

/// Ring allocations default-align to 4 so offsets can address HLSL byte
/// address buffers directly.
pub const CONSTANTS_ALIGNMENT: u32 = 4;

const CONSTANT_BUFFER_ALIGNMENT: u64 = 256;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct FrameConstants {
    pub sun_direction: Vec4,
    pub camera_position: Vec4,
    pub view_matrix: Mat4,
    pub projection_matrix: Mat4,
    pub view_projection_matrix: Mat4,
    pub inv_view_projection_matrix: Mat4,
    pub prev_view_projection_matrix: Mat4,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct GlobalConstants {
    pub black_texture_index: u32,
    pub white_texture_index: u32,
    pub blue_noise_texture_index: u32,
    pub frame_counter: u32,
}

/// Linear ring over one upload buffer. The external frame fence guarantees
/// the GPU is done with a region before it wraps around and is rewritten.
#[derive(Default)]
pub struct RingAllocator {
    buffer: Option<BufferId>,
    capacity: u32,
    head: u32,
}

impl RingAllocator {
    pub fn create_buffer(
        &mut self,
        device: &mut dyn RenderDevice,
        capacity: u32,
    ) -> Result<(), DeviceError> {
        debug_assert!(self.buffer.is_none());

        let desc = BufferDesc {
            size: u64::from(capacity),
            stride: 0,
            format: Format::Unknown,
            usage: BufferUsage::Upload,
        };

        self.buffer = Some(device.create_buffer(&desc)?);
        self.capacity = capacity;
        self.head = 0;
        Ok(())
    }

    pub fn destroy_buffer(&mut self, device: &mut dyn RenderDevice) {
        if let Some(buffer) = self.buffer.take() {
            device.release_buffer_immediate(buffer);
        }
        self.capacity = 0;
        self.head = 0;
    }

    pub fn buffer(&self) -> Option<BufferId> {
        self.buffer
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Copies `value` into the ring and returns its byte offset from the
    /// start of the buffer.
    pub fn alloc_and_copy<T: Pod>(
        &mut self,
        device: &mut dyn RenderDevice,
        value: &T,
    ) -> Result<u32, DeviceError> {
        let buffer = self.buffer.expect("ring buffer not created");

        let size = align_up(std::mem::size_of::<T>() as u64, u64::from(CONSTANTS_ALIGNMENT)) as u32;
        assert!(size <= self.capacity);

        if self.head + size > self.capacity {
            self.head = 0;
        }

        let offset = self.head;
        device.update_buffer(buffer, u64::from(offset), bytemuck::bytes_of(value))?;
        self.head += size;

        Ok(offset)
    }

    pub fn reset(&mut self) {
        self.head = 0;
    }
}

/// One constant-buffer-aligned allocation holding the frame-invariant
/// globals, written once per graph compile.
#[derive(Default)]
pub struct GlobalConstantsBuffer {
    buffer: Option<BufferId>,
}

impl GlobalConstantsBuffer {
    pub fn create_buffer(&mut self, device: &mut dyn RenderDevice) -> Result<(), DeviceError> {
        debug_assert!(self.buffer.is_none());

        let desc = BufferDesc {
            size: align_up(
                std::mem::size_of::<GlobalConstants>() as u64,
                CONSTANT_BUFFER_ALIGNMENT,
            ),
            stride: 0,
            format: Format::Unknown,
            usage: BufferUsage::Upload,
        };

        self.buffer = Some(device.create_buffer(&desc)?);
        Ok(())
    }

    pub fn destroy_buffer(&mut self, device: &mut dyn RenderDevice) {
        if let Some(buffer) = self.buffer.take() {
            device.release_buffer_immediate(buffer);
        }
    }

    pub fn buffer(&self) -> Option<BufferId> {
        self.buffer
    }

    pub fn copy(
        &self,
        device: &mut dyn RenderDevice,
        constants: &GlobalConstants,
    ) -> Result<(), DeviceError> {
        let buffer = self.buffer.expect("global constants buffer not created");
        device.update_buffer(buffer, 0, bytemuck::bytes_of(constants))
    }
}
