mod common;

use common::*;
use hxc_ir::*;
use hxc_opt::OptLevel;
use pretty_assertions::assert_eq;

/// A pixel shader touching a uniform block, a texture and a sampler.
fn shader() -> Module {
    let mut b = ShaderBuilder::new();
    let float2 = b.vector(VectorSize::Bi, Scalar::F32);
    let float4 = b.float4();
    let texture_ty = b.texture2d();
    let sampler_ty = b.sampler();
    let tint = b.uniform("Tint", float4);
    b.module.uniform_blocks.push(UniformBlock {
        name: "Material".into(),
        members: vec![tint],
    });
    let albedo = b.uniform("Albedo", texture_ty);
    let linear = b.uniform("LinearWrap", sampler_ty);
    let uv = b.input("uv", float2, "TEXCOORD0");

    let coordinate = b.load(uv);
    let texel = b.sample(albedo, linear, coordinate);
    let t = b.load(tint);
    let value = b.binary(BinaryOp::Multiply, texel, t);
    b.ret(value);
    b.finish("PSMain", Some((float4, Some("SV_Target0"))))
}

#[test]
fn json_round_trip_emits_identical_source() {
    let module = shader();
    let json = serde_json::to_string_pretty(&module).unwrap();
    let restored: Module = serde_json::from_str(&json).unwrap();

    for level in [OptLevel::O0, OptLevel::O2] {
        let direct = compile_metal(module.clone(), "PSMain", Stage::Pixel, &options(level));
        let loaded = compile_metal(restored.clone(), "PSMain", Stage::Pixel, &options(level));
        assert_eq!(direct, loaded);
    }
}

#[test]
fn serialized_modules_name_their_parts() {
    let json = serde_json::to_value(shader()).unwrap();
    let text = json.to_string();
    for name in ["PSMain", "Material", "Albedo", "LinearWrap", "TEXCOORD0"] {
        assert!(text.contains(name), "missing {name}");
    }
}
