//! Compiles small modules through the whole pipeline and checks the emitted
//! Metal source.

use hxc_backend_core::{compile, BackendOptions, CompileError};
use hxc_backend_metal::MetalBackend;
use hxc_ir::*;
use hxc_opt::OptLevel;
use pretty_assertions::assert_eq;

struct Shader {
    module: Module,
    body: Vec<Statement>,
}

impl Shader {
    fn new() -> Self {
        Self {
            module: Module::default(),
            body: Vec::new(),
        }
    }

    fn ty(&mut self, inner: TypeInner) -> Handle<Type> {
        self.module.add_type(inner)
    }

    fn scalar(&mut self, scalar: Scalar) -> Handle<Type> {
        self.ty(TypeInner::Scalar(scalar))
    }

    fn vector(&mut self, size: VectorSize, scalar: Scalar) -> Handle<Type> {
        self.ty(TypeInner::Vector { size, scalar })
    }

    fn global(&mut self, name: &str, ty: Handle<Type>, mode: StorageMode) -> Handle<Variable> {
        self.module.add_global(Variable::new(name, ty, mode))
    }

    fn param(&mut self, name: &str, ty: Handle<Type>, semantic: &str) -> Handle<Variable> {
        self.module
            .add_variable(Variable::new(name, ty, StorageMode::Input).with_semantic(semantic))
    }

    fn expr(&mut self, expr: Expression) -> Handle<Expression> {
        self.module.add_expression(expr)
    }

    fn load(&mut self, var: Handle<Variable>) -> Handle<Expression> {
        self.expr(Expression::Variable(var))
    }

    fn literal(&mut self, literal: Literal) -> Handle<Expression> {
        self.expr(Expression::Literal(literal))
    }

    fn finish(
        mut self,
        name: &str,
        parameters: Vec<Handle<Variable>>,
        result: Option<(Handle<Type>, &str)>,
    ) -> Module {
        let mut function = Function::new(name);
        function.parameters = parameters;
        function.result = result.map(|(ty, semantic)| FunctionResult {
            ty,
            semantic: Some(semantic.to_string()),
        });
        function.workgroup_size = Some([64, 1, 1]);
        function.body = std::mem::take(&mut self.body);
        self.module.add_function(function);
        self.module
    }
}

fn options() -> BackendOptions {
    BackendOptions {
        opt_level: OptLevel::O0,
        ..BackendOptions::default()
    }
}

fn emit(module: Module, entry: &str, stage: Stage, options: &BackendOptions) -> String {
    let _ = env_logger::builder().is_test(true).try_init();
    match compile(&MetalBackend, module, entry, stage, options) {
        Ok(output) => output.files[0].content.clone(),
        Err(CompileError::Rejected { log }) => panic!("rejected:\n{log}"),
        Err(e) => panic!("{e}"),
    }
}

fn header(source: &str) -> Vec<&str> {
    source.lines().filter(|l| l.starts_with("// @")).collect()
}

/// `float4 VSMain(float4 pos : ATTRIBUTE0) : SV_Position { return pos * Scale; }`
fn scaled_vertex() -> Module {
    let mut s = Shader::new();
    let float = s.scalar(Scalar::F32);
    let float4 = s.vector(VectorSize::Quad, Scalar::F32);
    let scale = s.global("Scale", float, StorageMode::Uniform);
    let pos = s.param("pos", float4, "ATTRIBUTE0");
    let left = s.load(pos);
    let right = s.load(scale);
    let value = s.expr(Expression::Binary {
        op: BinaryOp::Multiply,
        left,
        right,
    });
    s.body.push(Statement::Return { value: Some(value) });
    s.finish("VSMain", vec![pos], Some((float4, "SV_Position")))
}

#[test]
fn vertex_shader_reads_packed_uniforms() {
    let source = emit(scaled_vertex(), "VSMain", Stage::Vertex, &options());
    assert_eq!(
        header(&source),
        ["// @Inputs: f4:in_ATTRIBUTE0", "// @PackedGlobals: Scale(h:0,1)"]
    );
    assert!(source.contains(
        "struct VertexAttributes {\n    float4 in_ATTRIBUTE0 [[ attribute(0) ]];\n};\n"
    ));
    assert!(source.contains("struct StageOut {\n    float4 Position [[ position ]];\n};\n"));
    assert!(source.contains(
        "float4 VSMain(float4 pos, constant float* vu_h)\n{\n    return pos * vu_h[0];\n}\n"
    ));
    assert!(source.contains(
        "vertex StageOut Main(\n    VertexAttributes stage_in [[ stage_in ]],\n    constant float* vu_h [[ buffer(0) ]])\n{\n"
    ));
    assert!(!source.contains("metal_compute"));
}

/// Two textures sampled with the same sampler.
fn textured_pixel() -> Module {
    let mut s = Shader::new();
    let float2 = s.vector(VectorSize::Bi, Scalar::F32);
    let float4 = s.vector(VectorSize::Quad, Scalar::F32);
    let tex_ty = s.ty(TypeInner::Image {
        dim: ImageDim::D2,
        arrayed: false,
        class: ImageClass::Sampled {
            multisampled: false,
        },
        scalar: Scalar::F32,
    });
    let sampler_ty = s.ty(TypeInner::Sampler { comparison: false });
    let albedo = s.global("Albedo", tex_ty, StorageMode::Uniform);
    let detail = s.global("Detail", tex_ty, StorageMode::Uniform);
    let linear = s.global("LinearWrap", sampler_ty, StorageMode::Uniform);
    let uv = s.param("uv", float2, "TEXCOORD0");

    let sample = |s: &mut Shader, texture| {
        let image = s.load(texture);
        let sampler = s.load(linear);
        let coordinate = s.load(uv);
        s.expr(Expression::ImageSample {
            image,
            sampler,
            coordinate,
            array_index: None,
            offset: None,
            level: SampleLevel::Auto,
            depth_ref: None,
            gather: None,
        })
    };
    let left = sample(&mut s, albedo);
    let right = sample(&mut s, detail);
    let value = s.expr(Expression::Binary {
        op: BinaryOp::Multiply,
        left,
        right,
    });
    s.body.push(Statement::Return { value: Some(value) });
    s.finish("PSMain", vec![uv], Some((float4, "SV_Target0")))
}

#[test]
fn pixel_shader_shares_one_sampler_state() {
    let source = emit(textured_pixel(), "PSMain", Stage::Pixel, &options());
    assert_eq!(
        header(&source),
        [
            "// @Inputs: f2:in_TEXCOORD0",
            "// @Samplers: Albedo(0:1[LinearWrap]),Detail(1:1[LinearWrap])",
            "// @SamplerStates: 0:LinearWrap",
        ]
    );
    assert!(source.contains(
        "    return Albedo.sample(LinearWrap, uv) * Detail.sample(LinearWrap, uv);\n"
    ));
    assert!(source.contains("struct StageOut {\n    float4 FragColor0 [[ color(0) ]];\n};\n"));
    assert!(source.contains(
        "fragment StageOut Main(\n    StageIn stage_in [[ stage_in ]],\n    texture2d<float> Albedo [[ texture(0) ]],\n    texture2d<float> Detail [[ texture(1) ]],\n    sampler LinearWrap [[ sampler(0) ]])\n"
    ));
    assert_eq!(source.matches("[[ sampler(").count(), 1);
}

/// `Output[id.x] = Input[id.x] * 2.0;`
fn scale_kernel() -> Module {
    let mut s = Shader::new();
    let float = s.scalar(Scalar::F32);
    let uint3 = s.vector(VectorSize::Tri, Scalar::U32);
    let read_ty = s.ty(TypeInner::Buffer {
        base: float,
        writable: false,
    });
    let write_ty = s.ty(TypeInner::Buffer {
        base: float,
        writable: true,
    });
    let input = s.global("Input", read_ty, StorageMode::Uniform);
    let output = s.global("Output", write_ty, StorageMode::Uniform);
    let id = s.param("id", uint3, "SV_DispatchThreadID");

    let id_expr = s.load(id);
    let x = s.expr(Expression::AccessIndex {
        base: id_expr,
        index: 0,
    });
    let src = s.load(input);
    let read = s.expr(Expression::Access { base: src, index: x });
    let two = s.literal(Literal::F32(2.0));
    let value = s.expr(Expression::Binary {
        op: BinaryOp::Multiply,
        left: read,
        right: two,
    });
    let dst = s.load(output);
    let target = s.expr(Expression::Access { base: dst, index: x });
    s.body.push(Statement::Assign { target, value });
    s.finish("CSMain", vec![id], None)
}

#[test]
fn kernel_without_bounds_checks() {
    let source = emit(scale_kernel(), "CSMain", Stage::Compute, &options());
    assert_eq!(
        header(&source),
        [
            "// @Samplers: Input(0:1)",
            "// @UAVs: Output(30:1)",
            "// @NumThreads: 64, 1, 1",
        ]
    );
    assert!(source.contains("    Output[id.x] = Input[id.x] * 2.0;\n"));
    assert!(source.contains("const device float* Input [[ buffer(0) ]]"));
    assert!(source.contains("device float* Output [[ buffer(30) ]]"));
    assert!(!source.contains("BufferSizes"));
}

#[test]
fn bounds_checks_guard_reads_and_writes() {
    let options = BackendOptions {
        bounds_checks: true,
        ..options()
    };
    let source = emit(scale_kernel(), "CSMain", Stage::Compute, &options);
    assert!(header(&source).contains(&"// @SideTable: BufferSizes(1)"));
    assert!(source.contains(
        "void CSMain(uint3 id, const device float* Input, device float* Output, constant uint* BufferSizes)\n"
    ));
    assert!(source.contains(concat!(
        "    if (uint(id.x) < BufferSizes[1]) {\n",
        "        Output[id.x] = (uint(id.x) < BufferSizes[0] ? Input[id.x] : float(0)) * 2.0;\n",
        "    }\n",
    )));
    assert!(source.contains("constant uint* BufferSizes [[ buffer(1) ]]"));
}

/// Group-shared scratch, a barrier, a counted loop and an uninitialized
/// local.
fn shared_kernel() -> Module {
    let mut s = Shader::new();
    let float = s.scalar(Scalar::F32);
    let int = s.scalar(Scalar::I32);
    let float4 = s.vector(VectorSize::Quad, Scalar::F32);
    let uint3 = s.vector(VectorSize::Tri, Scalar::U32);
    let floats = s.ty(TypeInner::Array {
        base: float,
        size: 64,
    });
    let cache = s.global("Cache", floats, StorageMode::Shared);
    let id = s.param("id", uint3, "SV_GroupThreadID");

    let base = s.load(cache);
    let first = s.expr(Expression::AccessIndex { base, index: 0 });
    let one = s.literal(Literal::F32(1.0));
    s.body.push(Statement::Assign {
        target: first,
        value: one,
    });
    s.body.push(Statement::Barrier(Barrier::WORK_GROUP));

    let zero = s.literal(Literal::I32(0));
    let mut counter = Variable::new("i", int, StorageMode::Temporary);
    counter.init = Some(zero);
    let counter = s.module.add_variable(counter);
    s.body.push(Statement::Declare(counter));
    let color = s.module.add_variable(Variable::new("color", float4, StorageMode::Temporary));
    s.body.push(Statement::Declare(color));

    let i = s.load(counter);
    let four = s.literal(Literal::I32(4));
    let done = s.expr(Expression::Binary {
        op: BinaryOp::GreaterEqual,
        left: i,
        right: four,
    });
    let step = s.literal(Literal::I32(1));
    let next = s.expr(Expression::Binary {
        op: BinaryOp::Add,
        left: i,
        right: step,
    });
    s.body.push(Statement::Loop {
        body: vec![Statement::If {
            condition: done,
            accept: vec![Statement::Break],
            reject: Vec::new(),
        }],
        continuing: vec![Statement::Assign {
            target: i,
            value: next,
        }],
    });
    s.finish("CSMain", vec![id], None)
}

#[test]
fn shared_memory_loops_and_zero_initialization() {
    let options = BackendOptions {
        zero_initialize: true,
        ..options()
    };
    let source = emit(shared_kernel(), "CSMain", Stage::Compute, &options);
    assert!(source.contains("void CSMain(uint3 id, threadgroup array<float, 64>& Cache)\n"));
    assert!(source.contains("    Cache[0] = 1.0;\n    threadgroup_barrier(mem_flags::mem_threadgroup);\n"));
    assert!(source.contains("    threadgroup array<float, 64> Cache;\n"));
    assert!(source.contains(", Cache);\n"));
    assert!(source.contains(" = float4(0);\n"));
    assert!(source.contains("    bool loop_init_0 = true;\n    while (true) {\n        if (!loop_init_0) {\n"));
    assert!(source.contains("        loop_init_0 = false;\n        if ("));
    assert!(source.contains(">= 4) {\n            break;\n        }\n"));
    assert!(source.contains("uint3 LocalInvocationID [[ thread_position_in_threadgroup ]]"));
}

#[test]
fn emission_is_deterministic() {
    let first = emit(textured_pixel(), "PSMain", Stage::Pixel, &options());
    let second = emit(textured_pixel(), "PSMain", Stage::Pixel, &options());
    assert_eq!(first, second);
}

#[test]
fn graphics_stages_may_not_write_buffers() {
    let result = compile(&MetalBackend, scale_kernel(), "CSMain", Stage::Pixel, &options());
    assert!(matches!(result, Err(CompileError::Rejected { .. })));
}
