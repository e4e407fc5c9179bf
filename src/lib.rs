pub mod device;

mod allocator;
mod builder;
mod dynamic_constants;
mod graph;
mod pass;
mod resource;
mod resources;

pub use allocator::TransientResourceAllocator;
pub use builder::{GraphBuilder, PassBuilder};
pub use dynamic_constants::{
    FrameConstants, GlobalConstants, GlobalConstantsBuffer, RingAllocator, CONSTANTS_ALIGNMENT,
};
pub use graph::{GraphError, RenderGraph};
pub use pass::{PassDataHandle, PassKind, RenderPass};
pub use resource::*;
pub use resources::GraphResources;
