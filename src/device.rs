//! Device abstraction consumed by the render graph.
//!
//! The graph never talks to a GPU API directly; it records its work through
//! the [`RenderDevice`] and [`CommandList`] traits and a handful of plain
//! data types. Backends (and the test suite's recording mock) implement
//! these.

use crate::resource::{BufferDesc, ResourceDesc, TextureDesc};

use bitflags::bitflags;
use thiserror::Error;

/// Maximum number of simultaneous color attachments a pass can bind.
pub const MAX_RENDER_TARGET_COUNT: usize = 8;

macro_rules! def_device_id {
    ($name:ident) => {
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub struct $name(pub u32);
    };
}

def_device_id! { BufferId }
def_device_id! { TextureId }
def_device_id! { HeapId }
def_device_id! { QueryHeapId }

/// A device-owned buffer or texture id, type tag included.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DeviceResource {
    Buffer(BufferId),
    Texture(TextureId),
}

bitflags! {
    /// GPU resource states, D3D12-style. States are a flag set: some named
    /// states are unions of finer-grained bits, and barrier logic tests
    /// individual bits rather than whole values.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct ResourceStates: u32 {
        const COMMON = 0;
        const VERTEX_AND_CONSTANT_BUFFER = 1 << 0;
        const INDEX_BUFFER = 1 << 1;
        const RENDER_TARGET = 1 << 2;
        const UNORDERED_ACCESS = 1 << 3;
        const DEPTH_WRITE = 1 << 4;
        const DEPTH_READ = 1 << 5;
        const NON_PIXEL_SHADER_RESOURCE = 1 << 6;
        const PIXEL_SHADER_RESOURCE = 1 << 7;
        const INDIRECT_ARGUMENT = 1 << 9;
        const COPY_DEST = 1 << 10;
        const COPY_SOURCE = 1 << 11;
        const RAYTRACING_ACCELERATION_STRUCTURE = 1 << 22;
        const ALL_SHADER_RESOURCE = Self::NON_PIXEL_SHADER_RESOURCE.bits()
            | Self::PIXEL_SHADER_RESOURCE.bits();
    }
}

/// A state-transition or write-ordering barrier, recorded per subresource.
///
/// For buffers the subresource index is always 0. UAV barriers order two
/// back-to-back unordered-access writes and carry no state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Barrier {
    Transition {
        resource: DeviceResource,
        subresource: u32,
        before: ResourceStates,
        after: ResourceStates,
    },
    Uav {
        resource: DeviceResource,
    },
}

/// Optimized clear value baked into render-target and depth-stencil
/// textures at creation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ClearValue {
    Color([f32; 4]),
    DepthStencil { depth: f32, stencil: u8 },
}

/// Size and alignment the device requires to back a set of resources.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AllocationInfo {
    pub size: u64,
    pub alignment: u64,
}

/// Root-signature slots the graph binds its constant buffers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BindSlot {
    Cbv0,
    Srv0,
    Srv1,
}

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("device out of memory allocating {size} bytes")]
    OutOfMemory { size: u64 },
    #[error("device call failed: {0}")]
    Backend(String),
}

/// The device surface the graph allocates and frees through.
pub trait RenderDevice {
    /// Combined size/alignment requirement for backing all of `descs` in
    /// one allocation.
    fn resource_allocation_info(&self, descs: &[ResourceDesc]) -> AllocationInfo;

    fn allocate_heap(&mut self, size: u64, alignment: u64) -> Result<HeapId, DeviceError>;
    fn release_heap(&mut self, heap: HeapId);

    /// Creates a buffer aliased on top of `heap` at `offset`, in
    /// `initial_state`.
    fn create_aliasing_buffer(
        &mut self,
        heap: HeapId,
        offset: u64,
        desc: &BufferDesc,
        initial_state: ResourceStates,
    ) -> Result<BufferId, DeviceError>;

    /// Creates a texture aliased on top of `heap` at `offset`, in
    /// `initial_state`, optionally with an optimized clear value.
    fn create_aliasing_texture(
        &mut self,
        heap: HeapId,
        offset: u64,
        desc: &TextureDesc,
        initial_state: ResourceStates,
        clear_value: Option<ClearValue>,
    ) -> Result<TextureId, DeviceError>;

    /// Creates a standalone (non-aliased) buffer; used for the constant
    /// ring buffers.
    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<BufferId, DeviceError>;

    /// CPU-side write into a mappable buffer.
    fn update_buffer(
        &mut self,
        buffer: BufferId,
        offset: u64,
        data: &[u8],
    ) -> Result<(), DeviceError>;

    /// Creates a derived view over `buffer` with a refined description.
    /// The returned id owns its descriptor but shares the underlying
    /// storage.
    fn create_buffer_view(
        &mut self,
        buffer: BufferId,
        desc: &BufferDesc,
    ) -> Result<BufferId, DeviceError>;

    /// Creates a derived view over `texture`, e.g. a single-mip
    /// shader-read-write view of a mip-chained texture.
    fn create_texture_view(
        &mut self,
        texture: TextureId,
        desc: &TextureDesc,
    ) -> Result<TextureId, DeviceError>;

    fn release_buffer_immediate(&mut self, buffer: BufferId);
    fn release_texture_immediate(&mut self, texture: TextureId);

    fn buffer_desc(&self, buffer: BufferId) -> BufferDesc;
    fn texture_desc(&self, texture: TextureId) -> TextureDesc;

    /// Creates a timestamp query heap with `query_count` slots.
    fn create_query_heap(&mut self, query_count: u32) -> Result<QueryHeapId, DeviceError>;
    fn release_query_heap(&mut self, heap: QueryHeapId);

    fn debug_name(&self, resource: DeviceResource) -> String {
        match resource {
            DeviceResource::Buffer(id) => format!("buffer_{}", id.0),
            DeviceResource::Texture(id) => format!("texture_{}", id.0),
        }
    }
}

/// Command recording surface the graph and pass closures drive.
pub trait CommandList {
    /// Binds the root signature, default descriptor heaps and default
    /// topology. The graph calls this once up front and again after any
    /// pass that owns untracked state.
    fn bind_defaults(&mut self, device: &dyn RenderDevice);

    /// Binds `buffer` as a root descriptor at `slot`, starting at byte
    /// `offset`.
    fn bind_to_slot(&mut self, buffer: BufferId, slot: BindSlot, offset: u32);

    fn set_viewport_and_scissor(&mut self, width: u32, height: u32);

    /// Sets color attachments and the optional depth attachment. An empty
    /// `targets` slice with no depth unbinds all attachments.
    fn set_render_targets(&mut self, targets: &[TextureId], depth_target: Option<TextureId>);

    /// Records a batch of barriers. Callers skip the call entirely for
    /// empty batches.
    fn resource_barriers(&mut self, barriers: &[Barrier]);

    fn end_timestamp_query(&mut self, heap: QueryHeapId, index: u32);

    fn execute_indirect(&mut self, args: BufferId, args_offset: u64);
}
