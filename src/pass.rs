//! Pass records: the declarative per-pass state captured at registration
//! time, plus the type-erased payload and execute closure invoked every
//! frame.

use crate::builder::GraphBuilder;
use crate::device::{Barrier, CommandList, TextureId, MAX_RENDER_TARGET_COUNT};
use crate::resource::{Format, GraphResourceId, GraphResourceViewId, ResourceDesc, TextureUsage};
use crate::resources::GraphResources;

use std::any::Any;
use std::marker::PhantomData;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PassKind {
    Graphics,
    Compute,
}

pub(crate) type DynExecFn =
    Box<dyn FnMut(&mut dyn Any, &GraphResources, &mut dyn CommandList) -> anyhow::Result<()>>;

/// Typed handle to a pass's payload, for downstream passes that need the
/// resource ids a setup closure produced.
#[derive(Debug)]
pub struct PassDataHandle<T> {
    pub(crate) pass_index: usize,
    pub(crate) marker: PhantomData<T>,
}

impl<T> Clone for PassDataHandle<T> {
    fn clone(&self) -> Self {
        Self {
            pass_index: self.pass_index,
            marker: PhantomData,
        }
    }
}

impl<T> Copy for PassDataHandle<T> {}

pub struct RenderPass {
    pub(crate) name: String,
    pub(crate) kind: PassKind,
    pub(crate) constants_size: u32,
    pub(crate) external: bool,

    pub(crate) created: Vec<GraphResourceId>,
    pub(crate) read: Vec<GraphResourceViewId>,
    pub(crate) written: Vec<GraphResourceViewId>,

    pub(crate) render_target_formats: Vec<Format>,
    pub(crate) depth_stencil_format: Format,

    pub(crate) entry_barriers: Vec<Barrier>,
    pub(crate) exit_barriers: Vec<Barrier>,

    pub(crate) data: Box<dyn Any>,
    pub(crate) execute_fn: DynExecFn,
}

impl RenderPass {
    pub(crate) fn new(name: &str, kind: PassKind, execute_fn: DynExecFn) -> Self {
        Self {
            name: name.to_owned(),
            kind,
            constants_size: 0,
            external: false,
            created: Vec::new(),
            read: Vec::new(),
            written: Vec::new(),
            render_target_formats: Vec::new(),
            depth_stencil_format: Format::Unknown,
            entry_barriers: Vec::new(),
            exit_barriers: Vec::new(),
            data: Box::new(()),
            execute_fn,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> PassKind {
        self.kind
    }

    pub fn is_graphics(&self) -> bool {
        self.kind == PassKind::Graphics
    }

    pub fn is_compute(&self) -> bool {
        self.kind == PassKind::Compute
    }

    pub fn is_external(&self) -> bool {
        self.external
    }

    pub fn is_created(&self, resource: GraphResourceId) -> bool {
        self.created.contains(&resource)
    }

    pub fn is_read(&self, view: GraphResourceViewId) -> bool {
        self.read.contains(&view)
    }

    pub fn is_written(&self, view: GraphResourceViewId) -> bool {
        self.written.contains(&view)
    }

    pub fn render_target_formats(&self) -> &[Format] {
        &self.render_target_formats
    }

    pub fn depth_stencil_format(&self) -> Format {
        self.depth_stencil_format
    }

    pub fn entry_barriers(&self) -> &[Barrier] {
        &self.entry_barriers
    }

    pub fn exit_barriers(&self) -> &[Barrier] {
        &self.exit_barriers
    }

    pub(crate) fn execute(
        &mut self,
        resources: &GraphResources,
        cmd: &mut dyn CommandList,
    ) -> anyhow::Result<()> {
        let Self {
            data, execute_fn, ..
        } = self;
        (execute_fn)(&mut **data, resources, cmd)
    }

    pub(crate) fn flush_barriers(cmd: &mut dyn CommandList, barriers: &[Barrier]) {
        if !barriers.is_empty() {
            cmd.resource_barriers(barriers);
        }
    }

    /// Gathers this pass's render-target and depth-stencil attachments
    /// from its written views and binds them, attachment count may be
    /// zero.
    pub(crate) fn set_render_targets(
        &self,
        builder: &GraphBuilder,
        resources: &GraphResources,
        cmd: &mut dyn CommandList,
    ) {
        let mut targets = [TextureId(0); MAX_RENDER_TARGET_COUNT];
        let mut target_count = 0;
        let mut depth_target: Option<TextureId> = None;

        for &view_id in &self.written {
            let view = builder.view_desc(view_id);

            let desc = match &view.desc {
                ResourceDesc::Texture(desc) => desc,
                ResourceDesc::Buffer(_) => continue,
            };

            match desc.usage {
                TextureUsage::RenderTarget => {
                    assert!(target_count < MAX_RENDER_TARGET_COUNT);
                    targets[target_count] = resources.get_texture_view(view_id);
                    target_count += 1;
                }
                TextureUsage::DepthStencilTarget => {
                    // if you define multiple depth targets for a render pass
                    // you're going to have a bad time, mmkay
                    assert!(depth_target.is_none());
                    depth_target = Some(resources.get_texture_view(view_id));
                }
                _ => {}
            }
        }

        cmd.set_render_targets(&targets[..target_count], depth_target);
    }
}
