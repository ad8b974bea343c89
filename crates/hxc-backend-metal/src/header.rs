//! The `// @Key: value` comment lines at the top of every emitted shader.
//!
//! Runtimes parse these to bind resources, so the keys, their order and
//! the value formats are fixed.

use std::fmt::Write;

use hxc_backend_core::{BackendError, EmitContext};
use hxc_entry::Varying;
use hxc_ir::Module;

use crate::types::type_code;

/// Writes every header line that has content.
pub fn write_header(out: &mut String, module: &Module, ctx: &EmitContext<'_>) -> Result<(), BackendError> {
    let layout = ctx.layout;
    let interface = ctx.interface;

    line(out, "Inputs", &varyings(module, &interface.inputs)?);
    line(out, "Outputs", &varyings(module, &interface.outputs)?);
    line(
        out,
        "UniformBlocks",
        &join(layout.uniform_blocks.iter().map(|b| format!("{}({})", b.name, b.index))),
    );
    line(out, "PackedGlobals", &join(&layout.packed_globals));
    for buffer in &layout.packed_buffers {
        let members = join(&buffer.members);
        let _ = writeln!(out, "// @PackedUB: {}({}): {members}", buffer.name, buffer.index);
    }
    line(out, "PackedUBGlobalCopies", &join(&layout.copies));
    line(
        out,
        "Samplers",
        &join(layout.srvs.iter().map(|srv| {
            if srv.sampler_states.is_empty() {
                format!("{}({}:1)", srv.name, srv.index)
            } else {
                format!("{}({}:1[{}])", srv.name, srv.index, srv.sampler_states.join(","))
            }
        })),
    );
    line(
        out,
        "UAVs",
        &join(layout.uavs.iter().map(|uav| format!("{}({}:1)", uav.name, uav.index))),
    );
    line(
        out,
        "SamplerStates",
        &join(
            layout
                .sampler_states
                .iter()
                .enumerate()
                .map(|(i, name)| format!("{i}:{name}")),
        ),
    );
    if let Some([x, y, z]) = interface.num_threads {
        let _ = writeln!(out, "// @NumThreads: {x}, {y}, {z}");
    }
    if let Some(table) = &layout.side_table {
        let name = module.variables[table.variable].display_name();
        let _ = writeln!(out, "// @SideTable: {name}({})", table.index);
    }
    Ok(())
}

fn line(out: &mut String, key: &str, value: &str) {
    if !value.is_empty() {
        let _ = writeln!(out, "// @{key}: {value}");
    }
}

fn join<T: ToString>(items: impl IntoIterator<Item = T>) -> String {
    items
        .into_iter()
        .map(|item| item.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn varyings(module: &Module, varyings: &[Varying]) -> Result<String, BackendError> {
    let mut parts = Vec::with_capacity(varyings.len());
    for varying in varyings {
        parts.push(format!("{}:{}", type_code(module, varying.ty)?, varying.name));
    }
    Ok(parts.join(","))
}
