//! Declarative capture of the pass graph: one description table for
//! resources, one for views, filled in by pass setup closures through
//! [`PassBuilder`].

use crate::device::{Barrier, BufferId, DeviceResource, RenderDevice, TextureId};
use crate::pass::RenderPass;
use crate::resource::{
    BufferDesc, BufferUsage, Format, GraphResourceDesc, GraphResourceId, GraphResourceViewDesc,
    GraphResourceViewId, ResourceDesc, TextureDesc, TextureUsage,
};

#[derive(Default)]
pub struct GraphBuilder {
    resource_descs: Vec<GraphResourceDesc>,
    view_descs: Vec<GraphResourceViewDesc>,
}

impl GraphBuilder {
    pub fn resource_desc(&self, id: GraphResourceId) -> &GraphResourceDesc {
        &self.resource_descs[id.index()]
    }

    pub fn view_desc(&self, id: GraphResourceViewId) -> &GraphResourceViewDesc {
        &self.view_descs[id.index()]
    }

    pub fn resource_count(&self) -> usize {
        self.resource_descs.len()
    }

    pub(crate) fn resource_entries(&self) -> &[GraphResourceDesc] {
        &self.resource_descs
    }

    pub(crate) fn view_entries(&self) -> &[GraphResourceViewDesc] {
        &self.view_descs
    }

    pub(crate) fn clear(&mut self) {
        self.resource_descs.clear();
        self.view_descs.clear();
    }

    fn create(
        &mut self,
        desc: ResourceDesc,
        imported: Option<DeviceResource>,
    ) -> GraphResourceId {
        self.resource_descs.push(GraphResourceDesc { desc, imported });
        GraphResourceId((self.resource_descs.len() - 1) as u32)
    }

    /// Appends a view row seeded from the base resource's description;
    /// the caller refines usage and mip range on the returned row.
    fn emplace_view(
        &mut self,
        resource: GraphResourceId,
    ) -> (GraphResourceViewId, &mut GraphResourceViewDesc) {
        let desc = self.resource_descs[resource.index()].desc;
        self.view_descs.push(GraphResourceViewDesc { resource, desc });

        let id = GraphResourceViewId((self.view_descs.len() - 1) as u32);
        (id, self.view_descs.last_mut().unwrap())
    }
}

/// The setup-time face of the graph: borrows the builder tables and the
/// pass currently being recorded, so every declaration lands on both.
pub struct PassBuilder<'rg> {
    pub(crate) builder: &'rg mut GraphBuilder,
    pub(crate) pass: &'rg mut RenderPass,
}

impl<'rg> PassBuilder<'rg> {
    pub fn create_buffer(&mut self, desc: BufferDesc) -> GraphResourceId {
        let id = self.builder.create(ResourceDesc::Buffer(desc), None);
        self.pass.created.push(id);
        id
    }

    pub fn create_texture(&mut self, desc: TextureDesc) -> GraphResourceId {
        let id = self.builder.create(ResourceDesc::Texture(desc), None);
        self.pass.created.push(id);
        id
    }

    /// Records a pre-existing device buffer. The graph will neither
    /// allocate nor free it, but treats it as created by this pass for
    /// barrier purposes.
    pub fn import_buffer(
        &mut self,
        device: &dyn RenderDevice,
        buffer: BufferId,
    ) -> GraphResourceId {
        let desc = device.buffer_desc(buffer);
        let id = self.builder.create(
            ResourceDesc::Buffer(desc),
            Some(DeviceResource::Buffer(buffer)),
        );
        self.pass.created.push(id);
        id
    }

    pub fn import_texture(
        &mut self,
        device: &dyn RenderDevice,
        texture: TextureId,
    ) -> GraphResourceId {
        let desc = device.texture_desc(texture);
        let id = self.builder.create(
            ResourceDesc::Texture(desc),
            Some(DeviceResource::Texture(texture)),
        );
        self.pass.created.push(id);
        id
    }

    /// Shader-read-only view of the whole resource.
    pub fn read(&mut self, resource: GraphResourceId) -> GraphResourceViewId {
        let (id, view) = self.builder.emplace_view(resource);

        match &mut view.desc {
            ResourceDesc::Buffer(desc) => desc.usage = BufferUsage::ShaderReadOnly,
            ResourceDesc::Texture(desc) => desc.usage = TextureUsage::ShaderReadOnly,
        }

        self.pass.read.push(id);
        id
    }

    /// Reads a buffer as indirect dispatch/draw arguments.
    pub fn read_indirect_args(&mut self, resource: GraphResourceId) -> GraphResourceViewId {
        let (id, view) = self.builder.emplace_view(resource);

        match &mut view.desc {
            ResourceDesc::Buffer(desc) => desc.usage = BufferUsage::IndirectArgs,
            ResourceDesc::Texture(_) => panic!("indirect args view of a texture"),
        }

        self.pass.read.push(id);
        id
    }

    /// Shader-read-only view of a single mip.
    pub fn read_texture(&mut self, resource: GraphResourceId, mip: u32) -> GraphResourceViewId {
        match &self.builder.resource_desc(resource).desc {
            ResourceDesc::Texture(desc) => assert!(mip < desc.mip_levels),
            ResourceDesc::Buffer(_) => panic!("mip view of a buffer"),
        }

        let (id, view) = self.builder.emplace_view(resource);

        if let ResourceDesc::Texture(desc) = &mut view.desc {
            desc.usage = TextureUsage::ShaderReadOnly;
            desc.base_mip = mip;
            desc.mip_levels = 1;
        }

        self.pass.read.push(id);
        id
    }

    /// Shader-read-write view of the whole resource.
    pub fn write(&mut self, resource: GraphResourceId) -> GraphResourceViewId {
        let (id, view) = self.builder.emplace_view(resource);

        match &mut view.desc {
            ResourceDesc::Buffer(desc) => desc.usage = BufferUsage::ShaderReadWrite,
            ResourceDesc::Texture(desc) => desc.usage = TextureUsage::ShaderReadWrite,
        }

        self.pass.written.push(id);
        id
    }

    /// Shader-read-write view of a single mip. Only the named mip counts
    /// as written for barrier purposes.
    pub fn write_texture(&mut self, resource: GraphResourceId, mip: u32) -> GraphResourceViewId {
        match &self.builder.resource_desc(resource).desc {
            ResourceDesc::Texture(desc) => assert!(mip < desc.mip_levels),
            ResourceDesc::Buffer(_) => panic!("mip view of a buffer"),
        }

        let (id, view) = self.builder.emplace_view(resource);

        if let ResourceDesc::Texture(desc) = &mut view.desc {
            desc.usage = TextureUsage::ShaderReadWrite;
            desc.base_mip = mip;
            desc.mip_levels = 1;
        }

        self.pass.written.push(id);
        id
    }

    pub fn render_target(&mut self, resource: GraphResourceId) -> GraphResourceViewId {
        let (id, view) = self.builder.emplace_view(resource);

        let format = match &mut view.desc {
            ResourceDesc::Texture(desc) => {
                desc.usage = TextureUsage::RenderTarget;
                desc.format
            }
            ResourceDesc::Buffer(_) => panic!("render target view of a buffer"),
        };

        self.pass.written.push(id);
        self.pass.render_target_formats.push(format);
        id
    }

    pub fn depth_stencil_target(&mut self, resource: GraphResourceId) -> GraphResourceViewId {
        assert!(
            self.pass.depth_stencil_format == Format::Unknown,
            "render pass already has a depth stencil target"
        );

        let (id, view) = self.builder.emplace_view(resource);

        let format = match &mut view.desc {
            ResourceDesc::Texture(desc) => {
                desc.usage = TextureUsage::DepthStencilTarget;
                desc.format
            }
            ResourceDesc::Buffer(_) => panic!("depth stencil view of a buffer"),
        };

        self.pass.written.push(id);
        self.pass.depth_stencil_format = format;
        id
    }

    /// Reserves space in the per-pass constant ring; the graph sizes the
    /// ring from the sum of reservations at compile time.
    pub fn reserve_memory(&mut self, size: u32) {
        self.pass.constants_size += size;
    }

    /// Manual barrier flushed right before the pass body, for resources
    /// driven by external native code the graph cannot see.
    pub fn add_entry_barrier(&mut self, barrier: Barrier) {
        self.pass.entry_barriers.push(barrier);
    }

    /// Manual barrier appended to the pass's exit batch.
    pub fn add_exit_barrier(&mut self, barrier: Barrier) {
        self.pass.exit_barriers.push(barrier);
    }

    /// Marks the pass as owning command-list state the graph doesn't
    /// track; defaults are re-bound after it runs.
    pub fn set_external(&mut self, external: bool) {
        self.pass.external = external;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pass::{PassKind, RenderPass};

    fn test_pass() -> RenderPass {
        RenderPass::new(
            "test",
            PassKind::Compute,
            Box::new(|_, _, _| Ok(())),
        )
    }

    #[test]
    fn read_and_write_refine_usage() {
        let mut builder = GraphBuilder::default();
        let mut pass = test_pass();
        let mut pb = PassBuilder {
            builder: &mut builder,
            pass: &mut pass,
        };

        let tex = pb.create_texture(TextureDesc {
            format: Format::Rgba16Float,
            width: 8,
            height: 8,
            ..Default::default()
        });
        let written = pb.write(tex);
        let read = pb.read(tex);

        assert!(pass.is_created(tex));
        assert!(pass.is_written(written));
        assert!(pass.is_read(read));

        match &builder.view_desc(written).desc {
            ResourceDesc::Texture(desc) => {
                assert_eq!(desc.usage, TextureUsage::ShaderReadWrite)
            }
            _ => unreachable!(),
        }
        match &builder.view_desc(read).desc {
            ResourceDesc::Texture(desc) => assert_eq!(desc.usage, TextureUsage::ShaderReadOnly),
            _ => unreachable!(),
        }
        // the base description is untouched by views
        match &builder.resource_desc(tex).desc {
            ResourceDesc::Texture(desc) => assert_eq!(desc.usage, TextureUsage::General),
            _ => unreachable!(),
        }
    }

    #[test]
    fn mip_views_restrict_the_range() {
        let mut builder = GraphBuilder::default();
        let mut pass = test_pass();
        let mut pb = PassBuilder {
            builder: &mut builder,
            pass: &mut pass,
        };

        let tex = pb.create_texture(TextureDesc {
            width: 64,
            height: 64,
            mip_levels: 4,
            ..Default::default()
        });
        let view = pb.write_texture(tex, 2);

        match &builder.view_desc(view).desc {
            ResourceDesc::Texture(desc) => {
                assert_eq!(desc.base_mip, 2);
                assert_eq!(desc.mip_levels, 1);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    #[should_panic]
    fn out_of_range_mip_aborts() {
        let mut builder = GraphBuilder::default();
        let mut pass = test_pass();
        let mut pb = PassBuilder {
            builder: &mut builder,
            pass: &mut pass,
        };

        let tex = pb.create_texture(TextureDesc {
            mip_levels: 2,
            ..Default::default()
        });
        pb.read_texture(tex, 2);
    }

    #[test]
    #[should_panic]
    fn indirect_args_on_texture_aborts() {
        let mut builder = GraphBuilder::default();
        let mut pass = test_pass();
        let mut pb = PassBuilder {
            builder: &mut builder,
            pass: &mut pass,
        };

        let tex = pb.create_texture(TextureDesc::default());
        pb.read_indirect_args(tex);
    }

    #[test]
    #[should_panic]
    fn second_depth_target_aborts() {
        let mut builder = GraphBuilder::default();
        let mut pass = test_pass();
        let mut pb = PassBuilder {
            builder: &mut builder,
            pass: &mut pass,
        };

        let d0 = pb.create_texture(TextureDesc {
            format: Format::D32Float,
            usage: TextureUsage::DepthStencilTarget,
            ..Default::default()
        });
        let d1 = pb.create_texture(TextureDesc {
            format: Format::D32Float,
            usage: TextureUsage::DepthStencilTarget,
            ..Default::default()
        });
        pb.depth_stencil_target(d0);
        pb.depth_stencil_target(d1);
    }

    #[test]
    fn render_target_records_the_attachment_format() {
        let mut builder = GraphBuilder::default();
        let mut pass = test_pass();
        let mut pb = PassBuilder {
            builder: &mut builder,
            pass: &mut pass,
        };

        let tex = pb.create_texture(TextureDesc {
            format: Format::Rgba8Unorm,
            usage: TextureUsage::RenderTarget,
            ..Default::default()
        });
        pb.render_target(tex);

        assert_eq!(pass.render_target_formats(), &[Format::Rgba8Unorm]);
    }
}
