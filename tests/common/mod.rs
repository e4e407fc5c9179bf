//! Shared test fixture: a recording mock device and command list the graph
//! is driven against.

#![allow(dead_code)]

use rg::device::*;
use rg::{BufferDesc, Format, ResourceDesc, TextureDesc};

use std::collections::HashMap;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

const HEAP_ALIGNMENT: u64 = 64 * 1024;

fn align_up(value: u64, alignment: u64) -> u64 {
    (value + alignment - 1) & !(alignment - 1)
}

fn format_size(format: Format) -> u64 {
    match format {
        Format::Rgba32Float => 16,
        Format::Rgba16Float => 8,
        Format::Rgba8Unorm
        | Format::Bgra8Unorm
        | Format::Rg16Float
        | Format::R32Float
        | Format::R32Uint
        | Format::D32Float
        | Format::D24UnormS8Uint => 4,
        Format::Unknown => 4,
    }
}

fn texture_size(desc: &TextureDesc) -> u64 {
    let mut size = 0;
    for mip in 0..desc.mip_levels {
        let width = (desc.width >> mip).max(1) as u64;
        let height = (desc.height >> mip).max(1) as u64;
        size += width * height * desc.depth as u64 * format_size(desc.format);
    }
    size * desc.array_layers as u64
}

fn resource_size(desc: &ResourceDesc) -> u64 {
    let size = match desc {
        ResourceDesc::Buffer(desc) => desc.size,
        ResourceDesc::Texture(desc) => texture_size(desc),
    };
    align_up(size.max(1), HEAP_ALIGNMENT)
}

/// A CPU stand-in for the GPU device. Hands out dense ids, validates
/// aliasing offsets against the backing heap, and panics on double frees.
#[derive(Default)]
pub struct MockDevice {
    next_id: u32,

    buffers: HashMap<u32, BufferDesc>,
    textures: HashMap<u32, TextureDesc>,
    heaps: HashMap<u32, u64>,
    query_heaps: HashMap<u32, u32>,

    pub heap_allocations: Vec<(u64, u64)>,
    pub aliasing_allocations: Vec<(HeapId, u64)>,
    pub initial_states: HashMap<DeviceResource, ResourceStates>,
    pub clear_values: HashMap<TextureId, Option<ClearValue>>,
    pub buffer_writes: Vec<(BufferId, u64, usize)>,

    pub released_heaps: Vec<HeapId>,
    pub released_buffers: Vec<BufferId>,
    pub released_textures: Vec<TextureId>,
}

impl MockDevice {
    pub fn new() -> Self {
        Default::default()
    }

    fn next_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Registers a device-owned texture the graph can import (e.g. a
    /// swapchain back buffer).
    pub fn register_texture(&mut self, desc: TextureDesc) -> TextureId {
        let id = self.next_id();
        self.textures.insert(id, desc);
        TextureId(id)
    }

    pub fn register_buffer(&mut self, desc: BufferDesc) -> BufferId {
        let id = self.next_id();
        self.buffers.insert(id, desc);
        BufferId(id)
    }

    pub fn live_resource_count(&self) -> usize {
        self.buffers.len() + self.textures.len()
    }
}

impl RenderDevice for MockDevice {
    fn resource_allocation_info(&self, descs: &[ResourceDesc]) -> AllocationInfo {
        AllocationInfo {
            size: descs.iter().map(resource_size).sum(),
            alignment: HEAP_ALIGNMENT,
        }
    }

    fn allocate_heap(&mut self, size: u64, alignment: u64) -> Result<HeapId, DeviceError> {
        assert!(size > 0);
        let id = self.next_id();
        self.heaps.insert(id, size);
        self.heap_allocations.push((size, alignment));
        Ok(HeapId(id))
    }

    fn release_heap(&mut self, heap: HeapId) {
        assert!(self.heaps.remove(&heap.0).is_some(), "heap double free");
        self.released_heaps.push(heap);
    }

    fn create_aliasing_buffer(
        &mut self,
        heap: HeapId,
        offset: u64,
        desc: &BufferDesc,
        initial_state: ResourceStates,
    ) -> Result<BufferId, DeviceError> {
        let heap_size = *self.heaps.get(&heap.0).expect("unknown heap");
        assert!(offset + resource_size(&ResourceDesc::Buffer(*desc)) <= heap_size);

        let id = self.next_id();
        self.buffers.insert(id, *desc);
        self.aliasing_allocations.push((heap, offset));
        self.initial_states
            .insert(DeviceResource::Buffer(BufferId(id)), initial_state);
        Ok(BufferId(id))
    }

    fn create_aliasing_texture(
        &mut self,
        heap: HeapId,
        offset: u64,
        desc: &TextureDesc,
        initial_state: ResourceStates,
        clear_value: Option<ClearValue>,
    ) -> Result<TextureId, DeviceError> {
        let heap_size = *self.heaps.get(&heap.0).expect("unknown heap");
        assert!(offset + resource_size(&ResourceDesc::Texture(*desc)) <= heap_size);

        let id = self.next_id();
        self.textures.insert(id, *desc);
        self.aliasing_allocations.push((heap, offset));
        self.initial_states
            .insert(DeviceResource::Texture(TextureId(id)), initial_state);
        self.clear_values.insert(TextureId(id), clear_value);
        Ok(TextureId(id))
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<BufferId, DeviceError> {
        let id = self.next_id();
        self.buffers.insert(id, *desc);
        Ok(BufferId(id))
    }

    fn update_buffer(
        &mut self,
        buffer: BufferId,
        offset: u64,
        data: &[u8],
    ) -> Result<(), DeviceError> {
        let desc = self.buffers.get(&buffer.0).expect("unknown buffer");
        assert!(offset + data.len() as u64 <= desc.size);
        self.buffer_writes.push((buffer, offset, data.len()));
        Ok(())
    }

    fn create_buffer_view(
        &mut self,
        buffer: BufferId,
        desc: &BufferDesc,
    ) -> Result<BufferId, DeviceError> {
        assert!(self.buffers.contains_key(&buffer.0), "unknown buffer");
        let id = self.next_id();
        self.buffers.insert(id, *desc);
        Ok(BufferId(id))
    }

    fn create_texture_view(
        &mut self,
        texture: TextureId,
        desc: &TextureDesc,
    ) -> Result<TextureId, DeviceError> {
        assert!(self.textures.contains_key(&texture.0), "unknown texture");
        let id = self.next_id();
        self.textures.insert(id, *desc);
        Ok(TextureId(id))
    }

    fn release_buffer_immediate(&mut self, buffer: BufferId) {
        assert!(
            self.buffers.remove(&buffer.0).is_some(),
            "buffer double free: {:?}",
            buffer
        );
        self.released_buffers.push(buffer);
    }

    fn release_texture_immediate(&mut self, texture: TextureId) {
        assert!(
            self.textures.remove(&texture.0).is_some(),
            "texture double free: {:?}",
            texture
        );
        self.released_textures.push(texture);
    }

    fn buffer_desc(&self, buffer: BufferId) -> BufferDesc {
        self.buffers[&buffer.0]
    }

    fn texture_desc(&self, texture: TextureId) -> TextureDesc {
        self.textures[&texture.0]
    }

    fn create_query_heap(&mut self, query_count: u32) -> Result<QueryHeapId, DeviceError> {
        let id = self.next_id();
        self.query_heaps.insert(id, query_count);
        Ok(QueryHeapId(id))
    }

    fn release_query_heap(&mut self, heap: QueryHeapId) {
        assert!(
            self.query_heaps.remove(&heap.0).is_some(),
            "query heap double free"
        );
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    BindDefaults,
    BindToSlot {
        buffer: BufferId,
        slot: BindSlot,
        offset: u32,
    },
    SetViewportAndScissor {
        width: u32,
        height: u32,
    },
    SetRenderTargets {
        targets: Vec<TextureId>,
        depth_target: Option<TextureId>,
    },
    Barriers(Vec<Barrier>),
    Timestamp {
        heap: QueryHeapId,
        index: u32,
    },
    ExecuteIndirect {
        args: BufferId,
        args_offset: u64,
    },
}

#[derive(Default)]
pub struct RecordingCommandList {
    pub commands: Vec<Command>,
}

impl RecordingCommandList {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn barrier_batches(&self) -> Vec<&Vec<Barrier>> {
        self.commands
            .iter()
            .filter_map(|command| match command {
                Command::Barriers(barriers) => Some(barriers),
                _ => None,
            })
            .collect()
    }
}

impl CommandList for RecordingCommandList {
    fn bind_defaults(&mut self, _device: &dyn RenderDevice) {
        self.commands.push(Command::BindDefaults);
    }

    fn bind_to_slot(&mut self, buffer: BufferId, slot: BindSlot, offset: u32) {
        self.commands.push(Command::BindToSlot {
            buffer,
            slot,
            offset,
        });
    }

    fn set_viewport_and_scissor(&mut self, width: u32, height: u32) {
        self.commands
            .push(Command::SetViewportAndScissor { width, height });
    }

    fn set_render_targets(&mut self, targets: &[TextureId], depth_target: Option<TextureId>) {
        self.commands.push(Command::SetRenderTargets {
            targets: targets.to_vec(),
            depth_target,
        });
    }

    fn resource_barriers(&mut self, barriers: &[Barrier]) {
        assert!(!barriers.is_empty(), "empty barrier batch recorded");
        self.commands.push(Command::Barriers(barriers.to_vec()));
    }

    fn end_timestamp_query(&mut self, heap: QueryHeapId, index: u32) {
        self.commands.push(Command::Timestamp { heap, index });
    }

    fn execute_indirect(&mut self, args: BufferId, args_offset: u64) {
        self.commands.push(Command::ExecuteIndirect { args, args_offset });
    }
}
