//! The render graph itself: pass registration, compilation into an
//! executable schedule (resource allocation, view creation, barrier
//! synthesis) and per-frame execution.

use crate::allocator::TransientResourceAllocator;
use crate::builder::{GraphBuilder, PassBuilder};
use crate::device::{
    Barrier, BindSlot, CommandList, DeviceError, DeviceResource, QueryHeapId, RenderDevice,
    ResourceStates, TextureId,
};
use crate::dynamic_constants::{
    FrameConstants, GlobalConstants, GlobalConstantsBuffer, RingAllocator,
};
use crate::pass::{DynExecFn, PassDataHandle, PassKind, RenderPass};
use crate::resource::{GraphResourceId, ResourceDesc};
use crate::resources::GraphResources;

use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use std::time::Instant;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("resource {resource:?} is both read and written in render pass {pass}")]
    ReadWriteConflict {
        pass: String,
        resource: GraphResourceId,
    },
    #[error("render pass {pass} failed")]
    Pass {
        pass: String,
        #[source]
        source: anyhow::Error,
    },
    #[error(transparent)]
    Device(#[from] DeviceError),
}

pub struct RenderGraph {
    frame_count: u32,
    frames_since_compile: u64,

    per_frame_allocator_offset: u32,
    per_frame_allocator: RingAllocator,
    per_pass_allocator: RingAllocator,
    global_constants: GlobalConstantsBuffer,

    builder: GraphBuilder,
    resources: GraphResources,
    allocator: TransientResourceAllocator,

    passes: Vec<RenderPass>,
    final_barriers: Vec<Barrier>,
    timestamp_query_heap: Option<QueryHeapId>,

    resize_test: bool,
}

struct GraphEdge {
    subresource: u32,
    pass_index: usize,
    state: ResourceStates,
}

struct GraphNode {
    resource: DeviceResource,
    subresource_count: u32,
    edges: Vec<GraphEdge>,
}

impl RenderGraph {
    pub fn new(frame_count: u32) -> Self {
        Self {
            frame_count,
            frames_since_compile: 0,
            per_frame_allocator_offset: 0,
            per_frame_allocator: Default::default(),
            per_pass_allocator: Default::default(),
            global_constants: Default::default(),
            builder: Default::default(),
            resources: Default::default(),
            allocator: Default::default(),
            passes: Vec::new(),
            final_barriers: Vec::new(),
            timestamp_query_heap: None,
            resize_test: false,
        }
    }

    /// Forces the next compile to re-reserve the backing allocation even
    /// when it would fit. Debug builds only; a no-op in release.
    pub fn set_resize_test(&mut self, enabled: bool) {
        self.resize_test = enabled;
    }

    pub fn frame_count(&self) -> u32 {
        self.frame_count
    }

    pub fn resources(&self) -> &GraphResources {
        &self.resources
    }

    pub fn builder(&self) -> &GraphBuilder {
        &self.builder
    }

    pub fn passes(&self) -> &[RenderPass] {
        &self.passes
    }

    pub fn final_barriers(&self) -> &[Barrier] {
        &self.final_barriers
    }

    pub fn allocator(&self) -> &TransientResourceAllocator {
        &self.allocator
    }

    pub fn per_pass_allocator_mut(&mut self) -> &mut RingAllocator {
        &mut self.per_pass_allocator
    }

    pub fn per_frame_allocator_mut(&mut self) -> &mut RingAllocator {
        &mut self.per_frame_allocator
    }

    pub fn per_frame_allocator_offset(&self) -> u32 {
        self.per_frame_allocator_offset
    }

    pub fn set_per_frame_allocator_offset(&mut self, offset: u32) {
        self.per_frame_allocator_offset = offset;
    }

    pub fn add_graphics_pass<T, SetupFn, ExecFn>(
        &mut self,
        name: &str,
        setup: SetupFn,
        execute: ExecFn,
    ) -> PassDataHandle<T>
    where
        T: Default + 'static,
        SetupFn: FnOnce(&mut PassBuilder<'_>, &mut T),
        ExecFn: FnMut(&mut T, &GraphResources, &mut dyn CommandList) -> anyhow::Result<()>
            + 'static,
    {
        self.add_pass(name, PassKind::Graphics, setup, execute)
    }

    pub fn add_compute_pass<T, SetupFn, ExecFn>(
        &mut self,
        name: &str,
        setup: SetupFn,
        execute: ExecFn,
    ) -> PassDataHandle<T>
    where
        T: Default + 'static,
        SetupFn: FnOnce(&mut PassBuilder<'_>, &mut T),
        ExecFn: FnMut(&mut T, &GraphResources, &mut dyn CommandList) -> anyhow::Result<()>
            + 'static,
    {
        self.add_pass(name, PassKind::Compute, setup, execute)
    }

    fn add_pass<T, SetupFn, ExecFn>(
        &mut self,
        name: &str,
        kind: PassKind,
        setup: SetupFn,
        mut execute: ExecFn,
    ) -> PassDataHandle<T>
    where
        T: Default + 'static,
        SetupFn: FnOnce(&mut PassBuilder<'_>, &mut T),
        ExecFn: FnMut(&mut T, &GraphResources, &mut dyn CommandList) -> anyhow::Result<()>
            + 'static,
    {
        let pass_index = self.passes.len();

        let execute_fn: DynExecFn = Box::new(move |data, resources, cmd| {
            let data = data.downcast_mut::<T>().expect("render pass payload type");
            execute(data, resources, cmd)
        });

        let mut pass = RenderPass::new(name, kind, execute_fn);
        let mut data = T::default();

        {
            let mut pass_builder = PassBuilder {
                builder: &mut self.builder,
                pass: &mut pass,
            };
            setup(&mut pass_builder, &mut data);
        }

        pass.data = Box::new(data);
        self.passes.push(pass);

        PassDataHandle {
            pass_index,
            marker: PhantomData,
        }
    }

    /// The payload a pass's setup closure filled in, so later passes can
    /// pick up the resource ids it created.
    pub fn pass_data<T: 'static>(&self, handle: PassDataHandle<T>) -> &T {
        self.passes[handle.pass_index]
            .data
            .downcast_ref::<T>()
            .expect("render pass payload type")
    }

    /// Compiles the graph: validates pass declarations, allocates backing
    /// memory and every transient resource and view, and calculates the
    /// barriers. Runs once per recompile; the schedule is reused by
    /// `execute` until the next `clear`.
    pub fn compile(
        &mut self,
        device: &mut dyn RenderDevice,
        global_constants: &GlobalConstants,
    ) -> Result<(), GraphError> {
        let start_time = Instant::now();

        // Pass validation. Does not do much at the moment, it validates
        // that we're not reading and writing the same view in one pass.
        for pass in &self.passes {
            for &view_id in &pass.written {
                if pass.is_read(view_id) {
                    let resource = self.builder.view_desc(view_id).resource;
                    log::error!(
                        "render graph: resource {:?} is both read and written in render pass {}",
                        resource,
                        pass.name()
                    );
                    return Err(GraphError::ReadWriteConflict {
                        pass: pass.name.clone(),
                        resource,
                    });
                }
            }
        }

        // Grow the backing allocation to fit this frame's transient
        // resources, then sub-allocate them all from offset zero.
        let transient_descs: Vec<ResourceDesc> = self
            .builder
            .resource_entries()
            .iter()
            .filter(|entry| entry.imported.is_none())
            .map(|entry| entry.desc)
            .collect();

        if !transient_descs.is_empty() {
            let info = device.resource_allocation_info(&transient_descs);
            let force_resize = cfg!(debug_assertions) && self.resize_test;

            if info.size > self.allocator.size() || force_resize {
                log::info!(
                    "allocating render graph backing memory: {} MB",
                    info.size / 1024 / 1024
                );
                self.allocator.clear();
                self.allocator.release(device);
                self.allocator.reserve(device, info.size, info.alignment)?;
            }
        }

        self.allocator.clear();
        self.resources
            .compile(device, &mut self.allocator, &self.builder)?;

        // Graph construction. Resources are the vertices; edges go from a
        // resource to the passes that touch it, one edge per covered
        // subresource, carrying the state the pass needs the subresource
        // in. Since passes are walked in registration order, each node's
        // edge list follows the frame from start to finish; there is no
        // pass re-ordering.
        let mut nodes: HashMap<GraphResourceId, GraphNode> = HashMap::new();

        for (index, entry) in self.builder.resource_entries().iter().enumerate() {
            let resource_id = GraphResourceId(index as u32);
            nodes.insert(
                resource_id,
                GraphNode {
                    resource: self.resources.get_resource(resource_id),
                    subresource_count: entry.desc.subresource_count(),
                    edges: Vec::new(),
                },
            );
        }

        for (pass_index, pass) in self.passes.iter().enumerate() {
            for &view_id in pass.written.iter().chain(pass.read.iter()) {
                let view = self.builder.view_desc(view_id);
                let node = nodes.get_mut(&view.resource).unwrap();
                let state = view.desc.resource_states();

                for subresource in view.subresource_range() {
                    assert!(subresource < node.subresource_count);
                    node.edges.push(GraphEdge {
                        subresource,
                        pass_index,
                        state,
                    });
                }
            }
        }

        // Barrier generation. Walk every node's edges linearly with a
        // per-subresource tracked state, initialized to the first edge's
        // state. Two consecutive unordered-access states get a UAV barrier
        // on the earlier pass, at most one per (resource, pass). A state
        // change gets a transition barrier on the previous pass's exit
        // list. Whatever states the walk ends in, the creating pass's
        // subresources are transitioned back to their declared states via
        // the graph-wide final barriers, flushed at the end of the frame
        // and skipped on the first frame after compile (resources begin
        // life in their declared state).
        let resource_count = self.builder.resource_count();
        let passes = &mut self.passes;
        let final_barriers = &mut self.final_barriers;

        for index in 0..resource_count {
            let resource_id = GraphResourceId(index as u32);
            let node = &nodes[&resource_id];

            if node.edges.len() < 2 {
                continue;
            }

            let mut tracked_state =
                vec![node.edges[0].state; node.subresource_count as usize];
            let mut previous_pass_index = node.edges[0].pass_index;
            let mut uav_barrier_added = false;

            for edge_index in 1..node.edges.len() {
                let prev_edge = &node.edges[edge_index - 1];
                let curr_edge = &node.edges[edge_index];

                if curr_edge.pass_index != prev_edge.pass_index {
                    previous_pass_index = prev_edge.pass_index;
                    uav_barrier_added = false;
                }

                let old_state = tracked_state[curr_edge.subresource as usize];
                let new_state = curr_edge.state;

                if old_state.contains(ResourceStates::UNORDERED_ACCESS)
                    && new_state.contains(ResourceStates::UNORDERED_ACCESS)
                    && !uav_barrier_added
                {
                    passes[previous_pass_index].exit_barriers.push(Barrier::Uav {
                        resource: node.resource,
                    });
                    uav_barrier_added = true;
                }

                if old_state == new_state {
                    continue;
                }

                passes[previous_pass_index]
                    .exit_barriers
                    .push(Barrier::Transition {
                        resource: node.resource,
                        subresource: curr_edge.subresource,
                        before: old_state,
                        after: new_state,
                    });

                tracked_state[curr_edge.subresource as usize] = new_state;
            }

            for edge in &node.edges {
                if !passes[edge.pass_index].is_created(resource_id) {
                    continue;
                }

                let old_state = tracked_state[edge.subresource as usize];
                if old_state == edge.state {
                    continue;
                }

                final_barriers.push(Barrier::Transition {
                    resource: node.resource,
                    subresource: edge.subresource,
                    before: old_state,
                    after: edge.state,
                });
            }
        }

        // Constant buffers: the per-pass ring is sized from the passes'
        // reservations, the per-frame ring holds one FrameConstants per
        // in-flight frame, and the globals are written once right here.
        let total_constants_size: u32 =
            self.passes.iter().map(|pass| pass.constants_size).sum();

        if self.per_pass_allocator.buffer().is_none() {
            self.per_pass_allocator
                .create_buffer(device, (total_constants_size * self.frame_count).max(1))?;
        }

        if self.global_constants.buffer().is_none() {
            self.global_constants.create_buffer(device)?;
        }

        if self.per_frame_allocator.buffer().is_none() {
            self.per_frame_allocator.create_buffer(
                device,
                std::mem::size_of::<FrameConstants>() as u32 * self.frame_count,
            )?;
        }

        self.per_frame_allocator_offset = 0;
        self.global_constants.copy(device, global_constants)?;

        assert!(
            self.timestamp_query_heap.is_none(),
            "compile called twice without clear"
        );
        self.timestamp_query_heap =
            Some(device.create_query_heap(self.passes.len() as u32 * 2)?);

        self.frames_since_compile = 0;

        log::debug!(
            "compiled render graph: {} passes, {} resources, {} barriers in {:.2?}",
            self.passes.len(),
            resource_count,
            self.final_barriers.len()
                + self
                    .passes
                    .iter()
                    .map(|pass| pass.exit_barriers.len())
                    .sum::<usize>(),
            start_time.elapsed()
        );

        Ok(())
    }

    /// Records one frame of the compiled schedule into `cmd`, which should
    /// be open for recording.
    pub fn execute(
        &mut self,
        device: &dyn RenderDevice,
        cmd: &mut dyn CommandList,
    ) -> Result<(), GraphError> {
        let query_heap = self
            .timestamp_query_heap
            .expect("execute called before compile");

        cmd.bind_defaults(device);
        cmd.bind_to_slot(
            self.global_constants.buffer().unwrap(),
            BindSlot::Cbv0,
            0,
        );
        cmd.bind_to_slot(
            self.per_frame_allocator.buffer().unwrap(),
            BindSlot::Srv0,
            self.per_frame_allocator_offset,
        );
        cmd.bind_to_slot(self.per_pass_allocator.buffer().unwrap(), BindSlot::Srv1, 0);

        // Entry and final barriers return resources to their declared
        // states; right after compile they are already there, so the first
        // frame skips both.
        let first_frame = self.frames_since_compile == 0;

        let Self {
            passes,
            builder,
            resources,
            final_barriers,
            ..
        } = self;

        for (index, pass) in passes.iter_mut().enumerate() {
            cmd.end_timestamp_query(query_heap, (index * 2) as u32);

            if pass.is_graphics() {
                pass.set_render_targets(builder, resources, cmd);
            }

            if !first_frame {
                RenderPass::flush_barriers(cmd, &pass.entry_barriers);
            }

            pass.execute(resources, cmd).map_err(|source| GraphError::Pass {
                pass: pass.name.clone(),
                source,
            })?;

            RenderPass::flush_barriers(cmd, &pass.exit_barriers);

            if pass.external {
                cmd.bind_defaults(device);
            }

            cmd.end_timestamp_query(query_heap, (index * 2 + 1) as u32);
        }

        if !first_frame {
            RenderPass::flush_barriers(cmd, final_barriers);
        }

        self.frames_since_compile += 1;
        Ok(())
    }

    /// Destroys all the render passes and their associated transient
    /// resources. After clearing the owner re-registers passes and calls
    /// `compile` again.
    pub fn clear(&mut self, device: &mut dyn RenderDevice) {
        if let Some(heap) = self.timestamp_query_heap.take() {
            device.release_query_heap(heap);
        }

        self.passes.clear();
        self.final_barriers.clear();
        self.builder.clear();
        self.resources.clear(device);

        self.per_pass_allocator.destroy_buffer(device);
        self.global_constants.destroy_buffer(device);
    }

    /// Full teardown, including the state that survives `clear`: the
    /// per-frame ring buffer and the backing allocation.
    pub fn release(&mut self, device: &mut dyn RenderDevice) {
        self.clear(device);
        self.per_frame_allocator.destroy_buffer(device);
        self.allocator.release(device);
    }

    /// Dumps the graph to GraphViz text: passes and resources as nodes,
    /// read edges from resource to pass in green, write edges from pass to
    /// resource in red, the back buffer in its own color. Diagnostic only.
    pub fn to_graphviz(&self, device: &dyn RenderDevice, back_buffer: TextureId) -> String {
        use std::fmt::Write as _;

        let mut out = String::new();
        out.push_str(concat!(
            "digraph G {\n",
            "bgcolor=\"#181A1B\";\n",
            "rankdir=\"LR\";\n",
            "overlap = false;\n",
            "splines = curves;\n",
            "outputorder=\"edgesfirst\"\n",
            "graph [pad=\"0.5\", nodesep=\"1\", ranksep=\"1.5\"];\n",
            "node [margin=.5 fontcolor=\"#E8E6E3\" fontsize=32 width=0 shape=rectangle style=filled, fontname=\"Arial\"]\n",
        ));

        let resource_label = |view_id| device.debug_name(self.resources.get_resource_view(view_id));
        let is_back_buffer = |view_id| {
            matches!(
                self.resources.get_resource_view(view_id),
                DeviceResource::Texture(texture) if texture == back_buffer
            )
        };

        let mut seen_resources: HashSet<String> = HashSet::new();

        // declare every pass and resource
        for (index, pass) in self.passes.iter().enumerate() {
            writeln!(out, "\"{}\"[color=\"#CC8400\"]", pass.name()).unwrap();

            for &view_id in pass.written.iter().chain(pass.read.iter()) {
                let name = resource_label(view_id);
                if !seen_resources.insert(name.clone()) {
                    continue;
                }

                let color = if is_back_buffer(view_id) { "red" } else { "#1B4958" };
                writeln!(out, "\"{}\"[color=\"{}\"][group=g{}]", name, color, index).unwrap();
            }

            out.push('\n');
        }

        seen_resources.clear();

        // written resources share a rank per pass
        for pass in &self.passes {
            out.push_str("\n{\nrank = same;\n");

            for &view_id in &pass.written {
                let name = resource_label(view_id);
                if !seen_resources.insert(name.clone()) {
                    continue;
                }
                writeln!(out, "\"{}\";", name).unwrap();
            }

            out.push_str("\n}\n");
        }

        // passes that read nothing are roots
        out.push_str("\n{\nrank = min;\n");
        for pass in &self.passes {
            if pass.read.is_empty() {
                writeln!(out, "\"{}\";", pass.name()).unwrap();
            }
        }
        out.push_str("\n}\n");

        // the connections, e.g. "pass" -> "write1"
        for pass in &self.passes {
            for &view_id in &pass.read {
                writeln!(
                    out,
                    "\"{}\":e -> \"{}\":w [color=\"green\"][penwidth=3]",
                    resource_label(view_id),
                    pass.name()
                )
                .unwrap();
            }

            for &view_id in &pass.written {
                writeln!(
                    out,
                    "\"{}\":e -> \"{}\":w [color=\"red\"][penwidth=3]",
                    pass.name(),
                    resource_label(view_id)
                )
                .unwrap();
            }

            out.push('\n');
        }

        out.push('}');
        out
    }
}
