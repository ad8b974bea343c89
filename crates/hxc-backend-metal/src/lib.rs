//! Metal Shading Language backend for hxc.
//!
//! Emits one `.metal` source file from a lowered module: a comment header
//! describing the resource layout, the struct declarations, helper
//! functions and a `vertex`, `fragment` or `kernel` function named `Main`.
//!
//! Metal restricts what shaders may do beyond what HLSL allows: graphics
//! stages cannot write buffers or images, a storage image is either read or
//! written, and texel coordinates are unsigned. [`MetalBackend`] declares
//! those restrictions so the pipeline legalizes the module before emission.

use hxc_backend_core::{
    Backend, BackendError, BackendOutput, CapabilityProfile, EmitContext, TargetProfile,
};
use hxc_entry::SystemValueTable;
use hxc_ir::{Module, Stage};

mod header;
mod ops;
pub mod semantics;
mod types;
mod writer;

/// File name of the emitted source.
pub const OUTPUT_FILE: &str = "shader.metal";

/// Metal backend targeting Apple GPUs.
#[derive(Debug, Default)]
pub struct MetalBackend;

impl Backend for MetalBackend {
    fn name(&self) -> &str {
        "Metal"
    }

    fn targets(&self) -> &[&str] {
        &["metal", "msl"]
    }

    fn system_values(&self, stage: Stage, profile: TargetProfile) -> SystemValueTable {
        semantics::system_values(stage, profile)
    }

    fn capabilities(&self, _profile: TargetProfile) -> CapabilityProfile {
        CapabilityProfile {
            graphics_writes: false,
            read_write_images: false,
            unsigned_coordinates: true,
        }
    }

    fn emit(&self, module: &Module, ctx: &EmitContext<'_>) -> Result<BackendOutput, BackendError> {
        let source = writer::Writer::new(module, ctx).write()?;
        log::debug!("metal: {} bytes of {} source", source.len(), ctx.stage);
        Ok(BackendOutput::single(OUTPUT_FILE, source))
    }
}
