//! Resource index spaces, limits and usage collection.

use std::collections::HashSet;

use indexmap::{IndexMap, IndexSet};

use hxc_ir::visit::{walk_module, Role, Visitor};
use hxc_ir::{Expression, Handle, ImageClass, Module, TypeInner, Variable};

use crate::PackError;

/// Per-platform index ceilings (exclusive).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ResourceLimits {
    pub buffers: u32,
    pub textures: u32,
    pub samplers: u32,
}

impl ResourceLimits {
    pub const DESKTOP: Self = Self {
        buffers: 31,
        textures: 128,
        samplers: 16,
    };
    pub const MOBILE: Self = Self {
        buffers: 31,
        textures: 31,
        samplers: 16,
    };
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self::DESKTOP
    }
}

/// An index space shared by two resource kinds: one counts up from zero,
/// the other down from the ceiling.
#[derive(Debug)]
pub struct IndexSpace {
    name: &'static str,
    ceiling: u32,
    next_up: u32,
    next_down: u32,
}

impl IndexSpace {
    pub fn new(name: &'static str, ceiling: u32) -> Self {
        Self {
            name,
            ceiling,
            next_up: 0,
            next_down: ceiling,
        }
    }

    fn exhausted(&self) -> PackError {
        PackError::IndexSpaceExhausted {
            space: self.name,
            ceiling: self.ceiling,
        }
    }

    pub fn allocate_up(&mut self) -> Result<u32, PackError> {
        if self.next_up >= self.next_down {
            return Err(self.exhausted());
        }
        self.next_up += 1;
        Ok(self.next_up - 1)
    }

    pub fn allocate_down(&mut self) -> Result<u32, PackError> {
        if self.next_down <= self.next_up {
            return Err(self.exhausted());
        }
        self.next_down -= 1;
        Ok(self.next_down)
    }
}

/// Where a resource variable is bound on the target.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum ResourceSlot {
    Buffer(u32),
    Texture(u32),
    Sampler(u32),
}

/// How a uniform-mode variable is bound.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ResourceKind {
    /// Scalars, vectors, matrices, arrays and structs: packed.
    Value,
    /// Sampled or depth texture.
    Texture,
    /// Read/write image.
    StorageImage,
    Sampler,
    ReadBuffer,
    WriteBuffer,
}

impl ResourceKind {
    pub fn of(inner: &TypeInner) -> Self {
        match *inner {
            TypeInner::Image {
                class: ImageClass::Storage { .. },
                ..
            } => Self::StorageImage,
            TypeInner::Image { .. } => Self::Texture,
            TypeInner::Sampler { .. } => Self::Sampler,
            TypeInner::Buffer { writable: false, .. } => Self::ReadBuffer,
            TypeInner::Buffer { writable: true, .. } => Self::WriteBuffer,
            _ => Self::Value,
        }
    }
}

/// Deduplicates sampler states by name.
#[derive(Debug, Default)]
pub struct SamplerStates {
    names: IndexSet<String>,
}

impl SamplerStates {
    /// Index of `name`, registering it on first sight.
    pub fn index_of(&mut self, name: &str, limit: u32) -> Result<u32, PackError> {
        if let Some(index) = self.names.get_index_of(name) {
            return Ok(index as u32);
        }
        if self.names.len() as u32 >= limit {
            return Err(PackError::IndexSpaceExhausted {
                space: "sampler",
                ceiling: limit,
            });
        }
        self.names.insert(name.to_string());
        Ok(self.names.len() as u32 - 1)
    }

    pub fn into_names(self) -> Vec<String> {
        self.names.into_iter().collect()
    }
}

/// Variables referenced anywhere in the program, plus which sampler
/// variables each texture is sampled with.
#[derive(Debug, Default)]
pub struct Usage {
    pub referenced: HashSet<Handle<Variable>>,
    pub texture_samplers: IndexMap<Handle<Variable>, IndexSet<Handle<Variable>>>,
}

impl Usage {
    pub fn collect(module: &Module) -> Self {
        let mut usage = Self::default();
        walk_module(module, &mut usage);
        usage
    }

    pub fn is_used(&self, var: Handle<Variable>) -> bool {
        self.referenced.contains(&var)
    }
}

impl Visitor for Usage {
    fn visit_expression(&mut self, module: &Module, handle: Handle<Expression>, _role: Role) -> bool {
        if let Some(&Expression::ImageSample { image, sampler, .. }) = module.expressions.try_get(handle) {
            if let (Some(image), Some(sampler)) = (module.root_variable(image), module.root_variable(sampler)) {
                self.texture_samplers
                    .entry(image)
                    .or_default()
                    .insert(sampler);
            }
        }
        true
    }

    fn visit_variable(&mut self, _module: &Module, variable: Handle<Variable>, _role: Role) {
        self.referenced.insert(variable);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spaces_collide_in_the_middle() {
        let mut space = IndexSpace::new("buffer", 3);
        assert_eq!(space.allocate_up(), Ok(0));
        assert_eq!(space.allocate_down(), Ok(2));
        assert_eq!(space.allocate_up(), Ok(1));
        assert_eq!(
            space.allocate_down(),
            Err(PackError::IndexSpaceExhausted {
                space: "buffer",
                ceiling: 3
            })
        );
        assert!(space.allocate_up().is_err());
    }

    #[test]
    fn sampler_states_deduplicate_by_name() {
        let mut states = SamplerStates::default();
        assert_eq!(states.index_of("LinearWrap", 16), Ok(0));
        assert_eq!(states.index_of("PointClamp", 16), Ok(1));
        assert_eq!(states.index_of("LinearWrap", 16), Ok(0));
        assert!(states.index_of("Aniso", 2).is_err());
        assert_eq!(states.into_names(), ["LinearWrap", "PointClamp"]);
    }
}
