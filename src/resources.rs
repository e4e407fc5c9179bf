//! Post-compile resource tables: the concrete device handle behind every
//! declared resource and view, indexed by the same dense ids the builder
//! handed out.

use crate::allocator::TransientResourceAllocator;
use crate::builder::GraphBuilder;
use crate::device::{BufferId, DeviceError, DeviceResource, RenderDevice, TextureId};
use crate::resource::{GraphResourceId, GraphResourceViewId, ResourceDesc};

use std::collections::HashSet;

#[derive(Clone, Copy, Debug)]
struct ResourceRecord {
    resource: DeviceResource,
    /// Imported handles are referenced, never owned; `clear` skips them.
    imported: bool,
}

#[derive(Default)]
pub struct GraphResources {
    resources: Vec<ResourceRecord>,
    views: Vec<ResourceRecord>,
}

impl GraphResources {
    /// Creates the concrete device resources for every description in the
    /// builder, then resolves every view: identical views reuse the base
    /// handle, refined views get a derived device view.
    pub(crate) fn compile(
        &mut self,
        device: &mut dyn RenderDevice,
        allocator: &mut TransientResourceAllocator,
        builder: &GraphBuilder,
    ) -> Result<(), DeviceError> {
        debug_assert!(self.resources.is_empty() && self.views.is_empty());

        for entry in builder.resource_entries() {
            let record = if let Some(imported) = entry.imported {
                ResourceRecord {
                    resource: imported,
                    imported: true,
                }
            } else {
                let resource = match &entry.desc {
                    ResourceDesc::Buffer(desc) => {
                        DeviceResource::Buffer(allocator.create_buffer(device, desc)?)
                    }
                    ResourceDesc::Texture(desc) => {
                        DeviceResource::Texture(allocator.create_texture(device, desc)?)
                    }
                };
                ResourceRecord {
                    resource,
                    imported: false,
                }
            };

            self.resources.push(record);
        }

        for view in builder.view_entries() {
            let base = self.resources[view.resource.index()];
            let base_desc = &builder.resource_desc(view.resource).desc;

            // When the refined description matches the base there is no
            // view to create; the record then shares the base handle, and
            // `clear` deduplicates the release.
            let mut record = base;

            match (&view.desc, base.resource) {
                (ResourceDesc::Buffer(desc), DeviceResource::Buffer(buffer)) => {
                    if view.desc != *base_desc {
                        record.resource =
                            DeviceResource::Buffer(device.create_buffer_view(buffer, desc)?);
                    }
                }
                (ResourceDesc::Texture(desc), DeviceResource::Texture(texture)) => {
                    if view.desc != *base_desc {
                        record.resource =
                            DeviceResource::Texture(device.create_texture_view(texture, desc)?);
                    }
                }
                _ => unreachable!("view type tag disagrees with its base resource"),
            }

            self.views.push(record);
        }

        Ok(())
    }

    pub fn get_buffer(&self, id: GraphResourceId) -> BufferId {
        match self.resources[id.index()].resource {
            DeviceResource::Buffer(buffer) => buffer,
            DeviceResource::Texture(_) => panic!("resource {:?} is a texture, not a buffer", id),
        }
    }

    pub fn get_texture(&self, id: GraphResourceId) -> TextureId {
        match self.resources[id.index()].resource {
            DeviceResource::Texture(texture) => texture,
            DeviceResource::Buffer(_) => panic!("resource {:?} is a buffer, not a texture", id),
        }
    }

    pub fn get_resource(&self, id: GraphResourceId) -> DeviceResource {
        self.resources[id.index()].resource
    }

    pub fn get_buffer_view(&self, id: GraphResourceViewId) -> BufferId {
        match self.views[id.index()].resource {
            DeviceResource::Buffer(buffer) => buffer,
            DeviceResource::Texture(_) => panic!("view {:?} is a texture, not a buffer", id),
        }
    }

    pub fn get_texture_view(&self, id: GraphResourceViewId) -> TextureId {
        match self.views[id.index()].resource {
            DeviceResource::Texture(texture) => texture,
            DeviceResource::Buffer(_) => panic!("view {:?} is a buffer, not a texture", id),
        }
    }

    pub fn get_resource_view(&self, id: GraphResourceViewId) -> DeviceResource {
        self.views[id.index()].resource
    }

    pub fn is_buffer(&self, id: GraphResourceViewId) -> bool {
        matches!(self.views[id.index()].resource, DeviceResource::Buffer(_))
    }

    pub fn is_texture(&self, id: GraphResourceViewId) -> bool {
        matches!(self.views[id.index()].resource, DeviceResource::Texture(_))
    }

    /// Releases every graph-owned device handle exactly once. Views that
    /// share the base handle and views aliasing the same resource id are
    /// deduplicated through one seen-set; imported handles are skipped.
    pub(crate) fn clear(&mut self, device: &mut dyn RenderDevice) {
        let mut seen: HashSet<DeviceResource> = HashSet::new();

        for record in self.resources.iter().chain(self.views.iter()) {
            if record.imported {
                continue;
            }

            if !seen.insert(record.resource) {
                continue;
            }

            match record.resource {
                DeviceResource::Buffer(buffer) => device.release_buffer_immediate(buffer),
                DeviceResource::Texture(texture) => device.release_texture_immediate(texture),
            }
        }

        self.resources.clear();
        self.views.clear();
    }
}
