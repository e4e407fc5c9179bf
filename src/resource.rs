//! Abstract resource and view descriptions, and the dense ids that index
//! them inside the graph builder.

use crate::device::{DeviceResource, ResourceStates};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Format {
    Unknown,
    Rgba8Unorm,
    Bgra8Unorm,
    Rgba16Float,
    Rgba32Float,
    Rg16Float,
    R32Float,
    R32Uint,
    D32Float,
    D24UnormS8Uint,
}

impl Default for Format {
    fn default() -> Self {
        Format::Unknown
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferUsage {
    Upload,
    General,
    IndexBuffer,
    VertexBuffer,
    ShaderReadOnly,
    ShaderReadWrite,
    IndirectArgs,
    AccelerationStructure,
}

impl BufferUsage {
    pub fn resource_states(self) -> ResourceStates {
        match self {
            BufferUsage::Upload => ResourceStates::COMMON,
            BufferUsage::General => ResourceStates::COMMON,
            BufferUsage::IndexBuffer => ResourceStates::INDEX_BUFFER,
            BufferUsage::VertexBuffer => ResourceStates::VERTEX_AND_CONSTANT_BUFFER,
            BufferUsage::ShaderReadOnly => ResourceStates::ALL_SHADER_RESOURCE,
            BufferUsage::ShaderReadWrite => ResourceStates::UNORDERED_ACCESS,
            BufferUsage::IndirectArgs => ResourceStates::INDIRECT_ARGUMENT,
            BufferUsage::AccelerationStructure => {
                ResourceStates::RAYTRACING_ACCELERATION_STRUCTURE
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextureUsage {
    General,
    ShaderReadOnly,
    ShaderReadWrite,
    RenderTarget,
    DepthStencilTarget,
}

impl TextureUsage {
    pub fn resource_states(self) -> ResourceStates {
        match self {
            TextureUsage::General => ResourceStates::COMMON,
            TextureUsage::ShaderReadOnly => ResourceStates::ALL_SHADER_RESOURCE,
            TextureUsage::ShaderReadWrite => ResourceStates::UNORDERED_ACCESS,
            TextureUsage::RenderTarget => ResourceStates::RENDER_TARGET,
            TextureUsage::DepthStencilTarget => ResourceStates::DEPTH_WRITE,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BufferDesc {
    pub size: u64,
    pub stride: u32,
    pub format: Format,
    pub usage: BufferUsage,
}

impl Default for BufferDesc {
    fn default() -> Self {
        Self {
            size: 0,
            stride: 0,
            format: Format::Unknown,
            usage: BufferUsage::General,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TextureDesc {
    pub format: Format,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub base_mip: u32,
    pub usage: TextureUsage,
}

impl Default for TextureDesc {
    fn default() -> Self {
        Self {
            format: Format::Unknown,
            width: 1,
            height: 1,
            depth: 1,
            mip_levels: 1,
            array_layers: 1,
            base_mip: 0,
            usage: TextureUsage::General,
        }
    }
}

impl TextureDesc {
    pub fn subresource_count(&self) -> u32 {
        self.mip_levels * self.array_layers
    }
}

/// A buffer or texture description; the discriminant is the resource type
/// tag.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ResourceDesc {
    Buffer(BufferDesc),
    Texture(TextureDesc),
}

impl ResourceDesc {
    /// The GPU state a resource of this description starts its life in.
    pub fn resource_states(&self) -> ResourceStates {
        match self {
            ResourceDesc::Buffer(desc) => desc.usage.resource_states(),
            ResourceDesc::Texture(desc) => desc.usage.resource_states(),
        }
    }

    pub fn subresource_count(&self) -> u32 {
        match self {
            ResourceDesc::Buffer(_) => 1,
            ResourceDesc::Texture(desc) => desc.subresource_count(),
        }
    }

    pub fn format(&self) -> Format {
        match self {
            ResourceDesc::Buffer(desc) => desc.format,
            ResourceDesc::Texture(desc) => desc.format,
        }
    }

    pub fn is_buffer(&self) -> bool {
        matches!(self, ResourceDesc::Buffer(_))
    }

    pub fn is_texture(&self) -> bool {
        matches!(self, ResourceDesc::Texture(_))
    }
}

impl From<BufferDesc> for ResourceDesc {
    fn from(desc: BufferDesc) -> Self {
        ResourceDesc::Buffer(desc)
    }
}

impl From<TextureDesc> for ResourceDesc {
    fn from(desc: TextureDesc) -> Self {
        ResourceDesc::Texture(desc)
    }
}

/// Dense index into the builder's resource description table. Stable for
/// one frame graph; invalidated by `clear`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GraphResourceId(pub(crate) u32);

impl GraphResourceId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Dense index into the builder's view description table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GraphResourceViewId(pub(crate) u32);

impl GraphResourceViewId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// A row of the builder's resource table: how to allocate the resource, or
/// which pre-existing device handle to use instead.
#[derive(Clone, Copy, Debug)]
pub struct GraphResourceDesc {
    pub desc: ResourceDesc,
    /// Set for imported resources; the graph must neither allocate nor
    /// free these.
    pub imported: Option<DeviceResource>,
}

/// A row of the builder's view table: the base resource plus a refined
/// description (different usage and/or mip range).
#[derive(Clone, Copy, Debug)]
pub struct GraphResourceViewDesc {
    pub resource: GraphResourceId,
    pub desc: ResourceDesc,
}

impl GraphResourceViewDesc {
    /// Subresource range this view covers: whole buffer, or
    /// `[base_mip, base_mip + mip_levels)` for a texture.
    pub(crate) fn subresource_range(&self) -> std::ops::Range<u32> {
        match &self.desc {
            ResourceDesc::Buffer(_) => 0..1,
            ResourceDesc::Texture(desc) => desc.base_mip..desc.base_mip + desc.mip_levels,
        }
    }
}
