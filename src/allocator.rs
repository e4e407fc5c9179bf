//! Transient resource allocator: one large backing allocation per graph,
//! with linear (bump pointer) sub-allocation. Aliased resources are created
//! on top of it at the offsets this hands out; nothing is freed
//! individually, the whole range is recycled by `clear` every compile.

use crate::device::{
    AllocationInfo, BufferId, ClearValue, DeviceError, HeapId, RenderDevice, TextureId,
};
use crate::resource::{BufferDesc, ResourceDesc, TextureDesc, TextureUsage};

pub(crate) fn align_up(value: u64, alignment: u64) -> u64 {
    if alignment == 0 {
        return value;
    }
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

#[derive(Default)]
pub struct TransientResourceAllocator {
    heap: Option<HeapId>,
    size: u64,
    cursor: u64,
}

impl TransientResourceAllocator {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Bytes sub-allocated since the last `clear`.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Acquires a backing block of at least `size` bytes, replacing any
    /// prior reservation.
    pub fn reserve(
        &mut self,
        device: &mut dyn RenderDevice,
        size: u64,
        alignment: u64,
    ) -> Result<(), DeviceError> {
        if let Some(heap) = self.heap.take() {
            device.release_heap(heap);
        }

        self.heap = Some(device.allocate_heap(size, alignment)?);
        self.size = size;
        self.cursor = 0;
        Ok(())
    }

    pub fn release(&mut self, device: &mut dyn RenderDevice) {
        if let Some(heap) = self.heap.take() {
            device.release_heap(heap);
        }
        self.size = 0;
        self.cursor = 0;
    }

    /// Resets the sub-allocation cursor without freeing the backing block.
    pub fn clear(&mut self) {
        self.cursor = 0;
    }

    fn allocate(&mut self, info: AllocationInfo) -> u64 {
        let offset = align_up(self.cursor, info.alignment);
        debug_assert!(
            offset + info.size <= self.size,
            "transient backing allocation overflow: {} + {} > {}",
            offset,
            info.size,
            self.size
        );
        self.cursor = offset + info.size;
        offset
    }

    pub fn create_buffer(
        &mut self,
        device: &mut dyn RenderDevice,
        desc: &BufferDesc,
    ) -> Result<BufferId, DeviceError> {
        let heap = self.heap.expect("no backing allocation reserved");
        let info = device.resource_allocation_info(&[ResourceDesc::Buffer(*desc)]);
        let offset = self.allocate(info);

        device.create_aliasing_buffer(heap, offset, desc, desc.usage.resource_states())
    }

    pub fn create_texture(
        &mut self,
        device: &mut dyn RenderDevice,
        desc: &TextureDesc,
    ) -> Result<TextureId, DeviceError> {
        let heap = self.heap.expect("no backing allocation reserved");
        let info = device.resource_allocation_info(&[ResourceDesc::Texture(*desc)]);
        let offset = self.allocate(info);

        let clear_value = match desc.usage {
            TextureUsage::DepthStencilTarget => Some(ClearValue::DepthStencil {
                depth: 1.0,
                stencil: 0,
            }),
            TextureUsage::RenderTarget => Some(ClearValue::Color([0.0; 4])),
            _ => None,
        };

        device.create_aliasing_texture(
            heap,
            offset,
            desc,
            desc.usage.resource_states(),
            clear_value,
        )
    }
}
