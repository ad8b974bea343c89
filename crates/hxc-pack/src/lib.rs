//! Uniform packing and resource index assignment for hxc.
//!
//! [`pack`] moves loose uniforms into precision-keyed packed arrays,
//! either dissolves `cbuffer` blocks into those arrays (with a copy plan)
//! or turns each into one aggregate buffer, prunes everything the program
//! never references, and assigns target indices to every remaining
//! resource. The result is a [`ResourceLayout`] that the backend reads when
//! it declares bindings and writes its layout header.

mod bindings;
pub mod layout;
pub mod ranges;
mod rewrite;

pub use bindings::{IndexSpace, ResourceKind, ResourceLimits, ResourceSlot, SamplerStates};
pub use layout::PackedArray;
pub use ranges::{merge_ranges, CopyRange};

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use indexmap::IndexMap;

use hxc_ir::visit::rewrite_module;
use hxc_ir::{
    Handle, IrError, Module, Scalar, Stage, StorageMode, StructMember, TypeInner, UniformBlock,
    Variable,
};

use crate::bindings::Usage;
use crate::layout::{footprint, leaves, member_offsets, ArrayAllocator, Leaf};
use crate::rewrite::{intern_parts, PackedRewriter, Placement};

/// Errors raised while packing resources.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PackError {
    /// A struct-typed uniform without structure flattening.
    #[error("uniform '{0}' has structure type; enable structure flattening to pack it")]
    StructUniform(String),

    /// A uniform whose type cannot live in a packed array.
    #[error("uniform '{name}' of type {ty} cannot be packed")]
    UnsupportedUniform { name: String, ty: String },

    /// The up and down allocators of an index space met.
    #[error("out of {space} indices (limit {ceiling})")]
    IndexSpaceExhausted { space: &'static str, ceiling: u32 },

    #[error(transparent)]
    Internal(#[from] IrError),
}

impl PackError {
    /// `true` for compiler bugs, `false` for problems in the shader.
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Internal(_))
    }
}

/// Packing configuration.
#[derive(Clone, Debug)]
pub struct PackOptions {
    pub stage: Stage,
    /// Dissolve uniform blocks into the packed arrays.
    pub flatten_buffers: bool,
    /// Split struct uniforms into one entry per leaf field.
    pub flatten_structs: bool,
    /// Allocate the buffer-size side table.
    pub bounds_checks: bool,
    pub limits: ResourceLimits,
}

impl PackOptions {
    pub fn new(stage: Stage) -> Self {
        Self {
            stage,
            flatten_buffers: false,
            flatten_structs: false,
            bounds_checks: false,
            limits: ResourceLimits::default(),
        }
    }
}

/// One loose uniform (or leaf field) inside a packed array.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackedEntry {
    pub name: String,
    pub array: PackedArray,
    pub offset: u32,
    pub size: u32,
}

impl fmt::Display for PackedEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}:{},{})", self.name, self.array, self.offset, self.size)
    }
}

/// A packed array and the global that holds it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackedArrayBinding {
    pub array: PackedArray,
    pub variable: Handle<Variable>,
    pub index: u32,
    /// Total components.
    pub size: u32,
}

/// A used member of a flattened uniform block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackedBufferMember {
    pub name: String,
    /// Component offset in the source cbuffer layout.
    pub source_offset: u32,
    pub size: u32,
}

impl fmt::Display for PackedBufferMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({},{})", self.name, self.source_offset, self.size)
    }
}

/// A uniform block dissolved into the packed arrays.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackedBuffer {
    pub name: String,
    /// Source buffer index referenced by [`CopyRange::source_buffer`].
    pub index: u32,
    pub members: Vec<PackedBufferMember>,
}

/// A uniform block kept as one aggregate buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockBinding {
    pub name: String,
    pub variable: Handle<Variable>,
    pub index: u32,
}

/// A texture, image or buffer resource.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceBinding {
    pub name: String,
    pub variable: Handle<Variable>,
    pub index: u32,
    /// Sampler-state names the resource is sampled with.
    pub sampler_states: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SamplerBinding {
    pub name: String,
    pub variable: Handle<Variable>,
    pub index: u32,
}

/// The uint array of buffer element counts used by bounds checks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SideTable {
    pub variable: Handle<Variable>,
    pub index: u32,
    /// Buffers with a slot, in slot order.
    pub buffers: Vec<Handle<Variable>>,
}

/// Everything the backend needs to know about resource placement.
#[derive(Clone, Debug)]
pub struct ResourceLayout {
    pub stage: Stage,
    pub packed_arrays: Vec<PackedArrayBinding>,
    pub packed_globals: Vec<PackedEntry>,
    pub packed_buffers: Vec<PackedBuffer>,
    /// Merged copy plan from flattened blocks into packed arrays.
    pub copies: Vec<CopyRange>,
    pub uniform_blocks: Vec<BlockBinding>,
    /// Read-only resources: textures and read-only buffers.
    pub srvs: Vec<ResourceBinding>,
    /// Writable resources: storage images and writable buffers.
    pub uavs: Vec<ResourceBinding>,
    pub samplers: Vec<SamplerBinding>,
    /// Distinct sampler-state names, by sampler index.
    pub sampler_states: Vec<String>,
    pub side_table: Option<SideTable>,
    slots: IndexMap<Handle<Variable>, ResourceSlot>,
}

impl ResourceLayout {
    fn new(stage: Stage) -> Self {
        Self {
            stage,
            packed_arrays: Vec::new(),
            packed_globals: Vec::new(),
            packed_buffers: Vec::new(),
            copies: Vec::new(),
            uniform_blocks: Vec::new(),
            srvs: Vec::new(),
            uavs: Vec::new(),
            samplers: Vec::new(),
            sampler_states: Vec::new(),
            side_table: None,
            slots: IndexMap::new(),
        }
    }

    /// The target binding of a resource variable.
    pub fn slot(&self, var: Handle<Variable>) -> Option<ResourceSlot> {
        self.slots.get(&var).copied()
    }

    /// Every bound variable with its slot, in assignment order.
    pub fn slots(&self) -> impl Iterator<Item = (Handle<Variable>, ResourceSlot)> + '_ {
        self.slots.iter().map(|(&v, &s)| (v, s))
    }

    /// Index of `var`'s element count in the side table.
    pub fn size_slot(&self, var: Handle<Variable>) -> Option<u32> {
        let table = self.side_table.as_ref()?;
        table
            .buffers
            .iter()
            .position(|&b| b == var)
            .map(|i| i as u32)
    }

    /// Total components of `array`, zero when it is not allocated.
    pub fn total_size(&self, array: PackedArray) -> u32 {
        self.packed_arrays
            .iter()
            .find(|p| p.array == array)
            .map_or(0, |p| p.size)
    }

    fn bind(&mut self, var: Handle<Variable>, slot: ResourceSlot) {
        self.slots.insert(var, slot);
    }
}

/// Packs uniforms and assigns resource indices for `module`.
///
/// On success every uniform-mode global left in `module.globals` is
/// referenced by the program and has a slot in the returned layout.
pub fn pack(module: &mut Module, options: &PackOptions) -> Result<ResourceLayout, PackError> {
    let usage = Usage::collect(module);
    let mut layout = ResourceLayout::new(options.stage);
    let mut buffers = IndexSpace::new("buffer", options.limits.buffers);
    let mut textures = IndexSpace::new("texture", options.limits.textures);
    let mut states = SamplerStates::default();

    let blocks = prune_unused(module, &usage);
    let in_block: HashSet<Handle<Variable>> = blocks
        .iter()
        .flat_map(|b| b.members.iter().copied())
        .collect();

    // Aggregate buffers come first in the buffer index space.
    let mut members = HashMap::new();
    if !options.flatten_buffers {
        for block in &blocks {
            let (variable, fields) = aggregate_block(module, block)?;
            let index = buffers.allocate_up()?;
            layout.bind(variable, ResourceSlot::Buffer(index));
            layout.uniform_blocks.push(BlockBinding {
                name: block.name.clone(),
                variable,
                index,
            });
            for (&member, field) in block.members.iter().zip(fields) {
                members.insert(member, (variable, field));
            }
        }
    }

    let mut alloc = ArrayAllocator::default();
    let mut placements = HashMap::new();
    let loose: Vec<_> = module
        .globals
        .iter()
        .copied()
        .filter(|&g| {
            let var = &module.variables[g];
            var.mode == StorageMode::Uniform
                && !in_block.contains(&g)
                && ResourceKind::of(&module.types[var.ty].inner) == ResourceKind::Value
        })
        .collect();
    for var in loose {
        let found = leaves_of(module, var, options.flatten_structs)?;
        let placement = place(&mut alloc, &found, |leaf, offset| {
            layout.packed_globals.push(PackedEntry {
                name: leaf.name.clone(),
                array: leaf.array,
                offset,
                size: leaf.size,
            });
        });
        placements.insert(var, placement);
    }

    if options.flatten_buffers {
        let mut ranges = Vec::new();
        for (source, block) in blocks.iter().enumerate() {
            let source = source as u32;
            let tys: Vec<_> = block
                .members
                .iter()
                .map(|&m| module.variables[m].ty)
                .collect();
            let offsets = member_offsets(&module.types, &tys)?;
            let mut packed = PackedBuffer {
                name: block.name.clone(),
                index: source,
                members: Vec::new(),
            };
            for (&member, base) in block.members.iter().zip(offsets) {
                if !usage.is_used(member) {
                    continue;
                }
                let found = leaves_of(module, member, options.flatten_structs)?;
                let placement = place(&mut alloc, &found, |leaf, offset| {
                    packed.members.push(PackedBufferMember {
                        name: leaf.name.clone(),
                        source_offset: base + leaf.source_offset,
                        size: leaf.size,
                    });
                    ranges.push(CopyRange {
                        source_buffer: source,
                        source_offset: base + leaf.source_offset,
                        dest_array: leaf.array,
                        dest_offset: offset,
                        size: leaf.size,
                    });
                });
                placements.insert(member, placement);
            }
            layout.packed_buffers.push(packed);
        }
        let count = ranges.len();
        layout.copies = merge_ranges(ranges);
        log::debug!(
            "merged {count} copy ranges into {}",
            layout.copies.len()
        );
    }

    let mut arrays = BTreeMap::new();
    for (array, size) in alloc.totals() {
        let element = module.add_type(TypeInner::Scalar(array.element()));
        let ty = module.add_type(TypeInner::Array {
            base: element,
            size,
        });
        let mut var = Variable::new(array.variable_name(options.stage), ty, StorageMode::Uniform);
        var.read_only = true;
        let variable = module.add_global(var);
        let index = buffers.allocate_up()?;
        layout.bind(variable, ResourceSlot::Buffer(index));
        layout.packed_arrays.push(PackedArrayBinding {
            array,
            variable,
            index,
            size,
        });
        arrays.insert(array, variable);
    }

    bind_resources(module, &usage, options, &mut layout, &mut buffers, &mut textures, &mut states)?;
    layout.sampler_states = states.into_names();

    if options.bounds_checks {
        allocate_side_table(module, &mut layout, &mut buffers)?;
    }

    // Rewrite references, then drop the variables that now live elsewhere.
    let sources: Vec<_> = placements.keys().copied().collect();
    for var in sources {
        let ty = module.variables[var].ty;
        intern_parts(module, ty);
    }
    let mut rewriter = PackedRewriter {
        placements: &placements,
        arrays: &arrays,
        members: &members,
    };
    let mut walks = 0;
    while rewrite_module(module, &mut rewriter) {
        walks += 1;
    }
    log::debug!("packed uniform references rewritten in {walks} walk(s)");

    module
        .globals
        .retain(|g| !placements.contains_key(g) && !in_block.contains(g));
    for &g in &module.globals {
        if module.variables[g].mode == StorageMode::Uniform {
            module.variables[g].used = true;
        }
    }

    log::debug!(
        "packed {} global(s) into {} array(s), {} block(s), {} srv(s), {} uav(s), {} sampler state(s)",
        layout.packed_globals.len(),
        layout.packed_arrays.len(),
        layout.uniform_blocks.len() + layout.packed_buffers.len(),
        layout.srvs.len(),
        layout.uavs.len(),
        layout.sampler_states.len()
    );
    Ok(layout)
}

/// Removes unreferenced uniforms and uniform blocks, returning the blocks
/// that survive.
fn prune_unused(module: &mut Module, usage: &Usage) -> Vec<UniformBlock> {
    let blocks = std::mem::take(&mut module.uniform_blocks);
    let (kept, dropped): (Vec<_>, Vec<_>) = blocks
        .into_iter()
        .partition(|b| b.members.iter().any(|&m| usage.is_used(m)));
    for block in &dropped {
        log::debug!("pruning unused uniform block '{}'", block.name);
    }
    let dead: HashSet<_> = dropped
        .iter()
        .flat_map(|b| b.members.iter().copied())
        .collect();

    let variables = &module.variables;
    module.globals.retain(|&g| {
        let var = &variables[g];
        let keep = var.mode != StorageMode::Uniform || (!dead.contains(&g) && usage.is_used(g));
        if !keep {
            log::trace!("pruning unused uniform '{}'", var.display_name());
        }
        keep
    });
    module.uniform_blocks = kept.clone();
    kept
}

fn leaves_of(module: &Module, var: Handle<Variable>, flatten_structs: bool) -> Result<Vec<Leaf>, PackError> {
    let variable = &module.variables[var];
    leaves(&module.types, variable.display_name(), variable.ty, flatten_structs)
}

/// Allocates every leaf and reports each one with its packed offset.
fn place(alloc: &mut ArrayAllocator, found: &[Leaf], mut record: impl FnMut(&Leaf, u32)) -> Placement {
    let mut fields = HashMap::new();
    for leaf in found {
        let offset = alloc.allocate(leaf.array, leaf.size);
        record(leaf, offset);
        fields.insert(leaf.path.clone(), (leaf.array, offset));
    }
    match found {
        [leaf] if leaf.path.is_empty() => {
            let (array, offset) = fields[&leaf.path];
            Placement::Value { array, offset }
        }
        _ => Placement::Fields(fields),
    }
}

/// Declares `CB_<name>` for a uniform block and returns the aggregate
/// variable with each member's field index. Gaps in the cbuffer layout
/// become float padding members.
fn aggregate_block(module: &mut Module, block: &UniformBlock) -> Result<(Handle<Variable>, Vec<u32>), PackError> {
    let tys: Vec<_> = block
        .members
        .iter()
        .map(|&m| module.variables[m].ty)
        .collect();
    let offsets = member_offsets(&module.types, &tys)?;
    let float = module.add_type(TypeInner::Scalar(Scalar::F32));

    let mut struct_members = Vec::new();
    let mut fields = Vec::new();
    let mut cursor = 0;
    for ((&member, &ty), offset) in block.members.iter().zip(&tys).zip(offsets) {
        if offset > cursor {
            let pad = module.add_type(TypeInner::Array {
                base: float,
                size: offset - cursor,
            });
            struct_members.push(StructMember::new(format!("_pad{cursor}"), pad));
        }
        fields.push(struct_members.len() as u32);
        struct_members.push(StructMember::new(module.variables[member].display_name(), ty));
        cursor = offset + footprint(&module.types, &module.types[ty].inner)?;
    }

    let ty = module.add_named_type(
        format!("CB_{}", block.name),
        TypeInner::Struct {
            members: struct_members,
            packed: true,
        },
    );
    let mut var = Variable::new(block.name.clone(), ty, StorageMode::Uniform);
    var.read_only = true;
    Ok((module.add_global(var), fields))
}

/// Binds textures, images, buffers and samplers in declaration order.
fn bind_resources(
    module: &Module,
    usage: &Usage,
    options: &PackOptions,
    layout: &mut ResourceLayout,
    buffers: &mut IndexSpace,
    textures: &mut IndexSpace,
    states: &mut SamplerStates,
) -> Result<(), PackError> {
    for &g in &module.globals {
        let var = &module.variables[g];
        if var.mode != StorageMode::Uniform {
            continue;
        }
        let name = var.display_name().to_string();
        let kind = ResourceKind::of(&module.types[var.ty].inner);
        let binding = |index| ResourceBinding {
            name: name.clone(),
            variable: g,
            index,
            sampler_states: Vec::new(),
        };
        match kind {
            ResourceKind::Value => {}
            ResourceKind::ReadBuffer => {
                let index = buffers.allocate_up()?;
                layout.bind(g, ResourceSlot::Buffer(index));
                layout.srvs.push(binding(index));
            }
            ResourceKind::WriteBuffer => {
                let index = buffers.allocate_down()?;
                layout.bind(g, ResourceSlot::Buffer(index));
                layout.uavs.push(binding(index));
            }
            ResourceKind::Texture => {
                let index = textures.allocate_up()?;
                layout.bind(g, ResourceSlot::Texture(index));
                let mut srv = binding(index);
                if let Some(samplers) = usage.texture_samplers.get(&g) {
                    srv.sampler_states = samplers
                        .iter()
                        .map(|&s| module.variables[s].display_name().to_string())
                        .collect();
                }
                layout.srvs.push(srv);
            }
            ResourceKind::StorageImage => {
                let index = textures.allocate_down()?;
                layout.bind(g, ResourceSlot::Texture(index));
                layout.uavs.push(binding(index));
            }
            ResourceKind::Sampler => {
                let index = states.index_of(&name, options.limits.samplers)?;
                layout.bind(g, ResourceSlot::Sampler(index));
                layout.samplers.push(SamplerBinding {
                    name,
                    variable: g,
                    index,
                });
            }
        }
    }
    Ok(())
}

fn allocate_side_table(module: &mut Module, layout: &mut ResourceLayout, buffers: &mut IndexSpace) -> Result<(), PackError> {
    let sized: Vec<_> = module
        .globals
        .iter()
        .copied()
        .filter(|&g| {
            matches!(
                module.types[module.variables[g].ty].inner,
                TypeInner::Buffer { .. }
            )
        })
        .collect();
    if sized.is_empty() {
        return Ok(());
    }
    let uint = module.add_type(TypeInner::Scalar(Scalar::U32));
    let ty = module.add_type(TypeInner::Array {
        base: uint,
        size: sized.len() as u32,
    });
    let mut var = Variable::new("BufferSizes", ty, StorageMode::Uniform);
    var.read_only = true;
    let variable = module.add_global(var);
    let index = buffers.allocate_up()?;
    layout.bind(variable, ResourceSlot::Buffer(index));
    layout.side_table = Some(SideTable {
        variable,
        index,
        buffers: sized,
    });
    Ok(())
}
