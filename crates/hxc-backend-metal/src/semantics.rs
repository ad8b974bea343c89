//! Metal system values: which HLSL `SV_` semantics each stage understands
//! and the attribute every binding is declared with.

use hxc_backend_core::TargetProfile;
use hxc_entry::{Direction, SystemValueTable, ValueType};
use hxc_ir::{Binding, BuiltIn, Scalar, Stage, VectorSize};

const FLOAT4: ValueType = ValueType::Vector(VectorSize::Quad, Scalar::F32);
const UINT3: ValueType = ValueType::Vector(VectorSize::Tri, Scalar::U32);
const UINT: ValueType = ValueType::Scalar(Scalar::U32);

/// Render targets a fragment function may write.
pub const MAX_COLOR_TARGETS: u32 = 8;
/// Clip distances a vertex function may write.
pub const MAX_CLIP_DISTANCES: u8 = 8;

/// System values of `stage` on `profile`.
pub fn system_values(stage: Stage, profile: TargetProfile) -> SystemValueTable {
    match stage {
        Stage::Vertex => vertex(),
        Stage::Pixel => pixel(profile),
        Stage::Compute => compute(),
        _ => SystemValueTable::new(),
    }
}

fn vertex() -> SystemValueTable {
    let mut table = SystemValueTable::new()
        .with(
            "SV_VertexID",
            Direction::Input,
            "IN_VertexID",
            Binding::BuiltIn(BuiltIn::VertexIndex),
            UINT,
        )
        .with(
            "SV_InstanceID",
            Direction::Input,
            "IN_InstanceID",
            Binding::BuiltIn(BuiltIn::InstanceIndex),
            UINT,
        )
        .with(
            "SV_Position",
            Direction::Output,
            "Position",
            Binding::BuiltIn(BuiltIn::Position),
            FLOAT4,
        )
        .with(
            "SV_RenderTargetArrayIndex",
            Direction::Output,
            "OUT_Layer",
            Binding::BuiltIn(BuiltIn::RenderTargetArrayIndex),
            UINT,
        );
    for i in 0..MAX_CLIP_DISTANCES {
        table = table.with(
            &format!("SV_ClipDistance{i}"),
            Direction::Output,
            &format!("ClipDistance{i}"),
            Binding::BuiltIn(BuiltIn::ClipDistance(i)),
            ValueType::Scalar(Scalar::F32),
        );
    }
    table
}

fn pixel(profile: TargetProfile) -> SystemValueTable {
    let mut table = SystemValueTable::new()
        .with(
            "SV_Position",
            Direction::Input,
            "IN_FragCoord",
            Binding::BuiltIn(BuiltIn::Position),
            FLOAT4,
        )
        .with(
            "SV_IsFrontFace",
            Direction::Input,
            "IN_FrontFacing",
            Binding::BuiltIn(BuiltIn::FrontFacing),
            ValueType::Scalar(Scalar::BOOL),
        )
        .with(
            "SV_RenderTargetArrayIndex",
            Direction::Input,
            "IN_Layer",
            Binding::BuiltIn(BuiltIn::RenderTargetArrayIndex),
            UINT,
        )
        .with(
            "SV_Depth",
            Direction::Output,
            "FragDepth",
            Binding::BuiltIn(BuiltIn::Depth),
            ValueType::Scalar(Scalar::F32),
        );
    for i in 0..MAX_COLOR_TARGETS {
        table = table.with(
            &format!("SV_Target{i}"),
            Direction::Output,
            &format!("FragColor{i}"),
            Binding::Color(i),
            ValueType::Declared,
        );
    }
    // Sample masks are only exposed by desktop GPUs.
    if profile.is_desktop() {
        table = table
            .with(
                "SV_Coverage",
                Direction::Input,
                "IN_Coverage",
                Binding::BuiltIn(BuiltIn::SampleMask),
                UINT,
            )
            .with(
                "SV_Coverage",
                Direction::Output,
                "OUT_Coverage",
                Binding::BuiltIn(BuiltIn::SampleMask),
                UINT,
            );
    }
    table
}

fn compute() -> SystemValueTable {
    SystemValueTable::new()
        .with(
            "SV_DispatchThreadID",
            Direction::Input,
            "GlobalInvocationID",
            Binding::BuiltIn(BuiltIn::GlobalInvocationId),
            UINT3,
        )
        .with(
            "SV_GroupID",
            Direction::Input,
            "WorkGroupID",
            Binding::BuiltIn(BuiltIn::WorkGroupId),
            UINT3,
        )
        .with(
            "SV_GroupIndex",
            Direction::Input,
            "LocalInvocationIndex",
            Binding::BuiltIn(BuiltIn::LocalInvocationIndex),
            UINT,
        )
        .with(
            "SV_GroupThreadID",
            Direction::Input,
            "LocalInvocationID",
            Binding::BuiltIn(BuiltIn::LocalInvocationId),
            UINT3,
        )
}

/// The `[[ ... ]]` attribute for `binding`.
pub fn attribute(binding: &Binding) -> String {
    let inner = match binding {
        Binding::BuiltIn(builtin) => builtin_attribute(*builtin).to_string(),
        Binding::Attribute(index) => format!("attribute({index})"),
        Binding::User(semantic) => format!("user({semantic})"),
        Binding::Color(index) => format!("color({index})"),
        Binding::StageIn => "stage_in".to_string(),
    };
    format!("[[ {inner} ]]")
}

fn builtin_attribute(builtin: BuiltIn) -> &'static str {
    match builtin {
        BuiltIn::VertexIndex => "vertex_id",
        BuiltIn::InstanceIndex => "instance_id",
        BuiltIn::Position => "position",
        BuiltIn::PointSize => "point_size",
        BuiltIn::ClipDistance(_) => "clip_distance",
        BuiltIn::RenderTargetArrayIndex => "render_target_array_index",
        BuiltIn::ViewportArrayIndex => "viewport_array_index",
        BuiltIn::FrontFacing => "front_facing",
        BuiltIn::SampleIndex => "sample_id",
        BuiltIn::SampleMask => "sample_mask",
        BuiltIn::Depth => "depth(any)",
        BuiltIn::GlobalInvocationId => "thread_position_in_grid",
        BuiltIn::WorkGroupId => "threadgroup_position_in_grid",
        BuiltIn::LocalInvocationId => "thread_position_in_threadgroup",
        BuiltIn::LocalInvocationIndex => "thread_index_in_threadgroup",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coverage_is_desktop_only() {
        let desktop = system_values(Stage::Pixel, TargetProfile::Desktop);
        let mobile = system_values(Stage::Pixel, TargetProfile::Mobile);
        assert_eq!(
            desktop.lookup("SV_Coverage", Direction::Input).map(|v| v.name.as_str()),
            Some("IN_Coverage")
        );
        assert_eq!(
            desktop.lookup("SV_Coverage", Direction::Output).map(|v| v.name.as_str()),
            Some("OUT_Coverage")
        );
        assert!(mobile.lookup("SV_Coverage", Direction::Input).is_none());
        assert_eq!(desktop.len(), mobile.len() + 2);
    }

    #[test]
    fn unindexed_semantics_find_slot_zero() {
        let pixel = system_values(Stage::Pixel, TargetProfile::Mobile);
        let target = pixel.lookup("SV_TARGET", Direction::Output).unwrap();
        assert_eq!(target.name, "FragColor0");
        assert_eq!(target.ty, ValueType::Declared);

        let vertex = system_values(Stage::Vertex, TargetProfile::Desktop);
        let clip = vertex.lookup("SV_ClipDistance", Direction::Output).unwrap();
        assert_eq!(clip.binding, Binding::BuiltIn(BuiltIn::ClipDistance(0)));
        assert!(vertex.lookup("SV_Position", Direction::Input).is_none());
    }

    #[test]
    fn layer_is_a_vertex_output_and_a_pixel_input() {
        let pixel = system_values(Stage::Pixel, TargetProfile::Mobile);
        let layer = pixel
            .lookup("SV_RenderTargetArrayIndex", Direction::Input)
            .unwrap();
        assert_eq!(layer.name, "IN_Layer");
        assert_eq!(layer.ty, UINT);
        assert_eq!(attribute(&layer.binding), "[[ render_target_array_index ]]");
        assert!(pixel
            .lookup("SV_RenderTargetArrayIndex", Direction::Output)
            .is_none());

        let vertex = system_values(Stage::Vertex, TargetProfile::Mobile);
        let layer = vertex
            .lookup("SV_RenderTargetArrayIndex", Direction::Output)
            .unwrap();
        assert_eq!(layer.name, "OUT_Layer");
    }

    #[test]
    fn compute_has_only_inputs() {
        let table = system_values(Stage::Compute, TargetProfile::Desktop);
        assert_eq!(table.len(), 4);
        assert!(table.iter().all(|v| v.direction == Direction::Input));
        assert!(system_values(Stage::Hull, TargetProfile::Desktop).is_empty());
    }

    #[test]
    fn attributes() {
        assert_eq!(attribute(&Binding::Attribute(3)), "[[ attribute(3) ]]");
        assert_eq!(attribute(&Binding::User("TEXCOORD1".into())), "[[ user(TEXCOORD1) ]]");
        assert_eq!(attribute(&Binding::Color(2)), "[[ color(2) ]]");
        assert_eq!(
            attribute(&Binding::BuiltIn(BuiltIn::Depth)),
            "[[ depth(any) ]]"
        );
        assert_eq!(
            attribute(&Binding::BuiltIn(BuiltIn::LocalInvocationIndex)),
            "[[ thread_index_in_threadgroup ]]"
        );
    }
}
