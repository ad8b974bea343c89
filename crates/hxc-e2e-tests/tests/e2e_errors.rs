mod common;

use common::*;
use hxc_backend_core::CompileError;
use hxc_ir::*;
use hxc_opt::OptLevel;

fn rejection(result: Result<hxc_backend_core::BackendOutput, CompileError>) -> String {
    match result {
        Err(CompileError::Rejected { log }) => {
            assert!(log.error_count() > 0);
            log.to_string()
        }
        Err(e) => panic!("expected a rejection, got {e}"),
        Ok(_) => panic!("expected a rejection, got output"),
    }
}

/// `float4 PSMain(float4 c : COLOR0) : <semantic>` returning its input.
fn passthrough_pixel(semantic: Option<&str>) -> Module {
    let mut b = ShaderBuilder::new();
    let float4 = b.float4();
    let color = b.input("c", float4, "COLOR0");
    let value = b.load(color);
    b.ret(value);
    b.finish("PSMain", Some((float4, semantic)))
}

#[test]
fn missing_entry_point() {
    let log = rejection(try_compile_metal(
        passthrough_pixel(Some("SV_Target0")),
        "main",
        Stage::Pixel,
        &options(OptLevel::O1),
    ));
    assert!(log.contains("[Error] entry point 'main' not found"), "{log}");
}

#[test]
fn result_without_semantic() {
    let log = rejection(try_compile_metal(passthrough_pixel(None), "PSMain", Stage::Pixel, &options(OptLevel::O0)));
    assert!(log.contains("entry point 'PSMain' returns a value without a semantic"), "{log}");
}

#[test]
fn pixel_shaders_may_not_write_buffers() {
    let mut b = ShaderBuilder::new();
    let float = b.scalar(Scalar::F32);
    let float4 = b.float4();
    let buffer = b.module.add_type(TypeInner::Buffer {
        base: float,
        writable: true,
    });
    let output = b.uniform("Output", buffer);
    let color = b.input("c", float4, "COLOR0");
    let base = b.load(output);
    let slot = b.field(base, 0);
    let c = b.load(color);
    let x = b.field(c, 0);
    b.body.push(Statement::Assign { target: slot, value: x });
    b.ret(c);
    let module = b.finish("PSMain", Some((float4, Some("SV_Target0"))));

    let log = rejection(try_compile_metal(module, "PSMain", Stage::Pixel, &options(OptLevel::O0)));
    assert!(log.contains("writable resource 'Output' is not allowed in pixel shaders"), "{log}");
}

#[test]
fn malformed_ir_is_an_internal_error() {
    let mut b = ShaderBuilder::new();
    b.body.push(Statement::Break);
    let module = b.finish("CSMain", None);
    let result = try_compile_metal(module, "CSMain", Stage::Compute, &options(OptLevel::O0));
    let Err(CompileError::Internal(e)) = result else {
        panic!("expected an internal error");
    };
    assert!(e.to_string().contains("break or continue outside of a loop"));
}

#[test]
fn warnings_survive_a_successful_compile() {
    let mut b = ShaderBuilder::new();
    let uint3 = b.vector(VectorSize::Tri, Scalar::U32);
    b.input("id", uint3, "SV_DispatchThreadID");
    let module = b.finish("CSMain", None);
    let output = try_compile_metal(module, "CSMain", Stage::Compute, &options(OptLevel::O0)).unwrap();
    assert!(output
        .diagnostics
        .iter()
        .any(|d| d.level == DiagnosticLevel::Warning && d.message.contains("has no [numthreads]")));
}
