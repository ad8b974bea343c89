mod common;

use common::*;
use hxc_backend_core::CompileError;
use hxc_ir::*;
use hxc_opt::OptLevel;
use pretty_assertions::assert_eq;

/// `[numthreads(1, 1, 1)] void CSMain(uint3 id : SV_DispatchThreadID)`
/// over an `RWBuffer<uint> Counters`.
fn counters_kernel(build: impl FnOnce(&mut ShaderBuilder, Handle<Variable>)) -> Module {
    let mut b = ShaderBuilder::new();
    let uint = b.scalar(Scalar::U32);
    let uint3 = b.vector(VectorSize::Tri, Scalar::U32);
    let buffer = b.module.add_type(TypeInner::Buffer {
        base: uint,
        writable: true,
    });
    let counters = b.uniform("Counters", buffer);
    b.input("id", uint3, "SV_DispatchThreadID");
    build(&mut b, counters);
    b.finish("CSMain", None)
}

#[test]
fn compare_exchange_retries_spurious_failures() {
    let module = counters_kernel(|b, counters| {
        let uint = b.scalar(Scalar::U32);
        let old = b.module.add_variable(Variable::new("old", uint, StorageMode::Auto));
        b.body.push(Statement::Declare(old));
        let base = b.load(counters);
        let slot = b.field(base, 0);
        let zero = b.expr(Expression::Literal(Literal::U32(0)));
        let one = b.expr(Expression::Literal(Literal::U32(1)));
        let result = b.load(old);
        b.body.push(Statement::Atomic {
            target: slot,
            fun: AtomicFunction::Exchange { compare: Some(zero) },
            value: one,
            result: Some(result),
        });
    });
    let source = compile_metal(module, "CSMain", Stage::Compute, &options(OptLevel::O0));
    assert_eq!(header(&source, "UAVs"), ["// @UAVs: Counters(30:1)"]);
    assert_eq!(header(&source, "NumThreads"), ["// @NumThreads: 1, 1, 1"]);
    assert!(source.contains("uint expected_0 = 0u;\n"));
    assert!(source.contains(
        "while (!atomic_compare_exchange_weak_explicit(&Counters[0], &expected_0, 1u, memory_order_relaxed, memory_order_relaxed) && expected_0 == 0u) {"
    ));
    // `old` is an auto local, so it is emitted under a synthesized name.
    assert!(source.contains(" = expected_0;\n"));
    assert!(source.contains("device atomic_uint* Counters [[ buffer(30) ]]"));
}

#[test]
fn plain_accesses_to_atomic_buffers_become_atomic() {
    let module = counters_kernel(|b, counters| {
        let base = b.load(counters);
        let first = b.field(base, 0);
        let one = b.expr(Expression::Literal(Literal::U32(1)));
        b.body.push(Statement::Atomic {
            target: first,
            fun: AtomicFunction::Add,
            value: one,
            result: None,
        });
        let base = b.load(counters);
        let second = b.field(base, 1);
        b.body.push(Statement::Assign {
            target: second,
            value: first,
        });
    });
    let source = compile_metal(module, "CSMain", Stage::Compute, &options(OptLevel::O0));
    assert!(source.contains("atomic_fetch_add_explicit(&Counters[0], 1u, memory_order_relaxed);\n"));
    assert!(source.contains(
        "atomic_store_explicit(&Counters[1], atomic_load_explicit(&Counters[0], memory_order_relaxed), memory_order_relaxed);\n"
    ));
}

fn storage_image(b: &mut ShaderBuilder, access: StorageAccess) -> Handle<Type> {
    b.module.add_type(TypeInner::Image {
        dim: ImageDim::D2,
        arrayed: false,
        class: ImageClass::Storage { access },
        scalar: Scalar::F32,
    })
}

/// `int2(id.xy)`
fn thread_coordinate(b: &mut ShaderBuilder, id: Handle<Variable>) -> Handle<Expression> {
    let id = b.load(id);
    let xy = b.expr(Expression::Swizzle {
        size: VectorSize::Bi,
        vector: id,
        pattern: [SwizzleComponent::X, SwizzleComponent::Y, SwizzleComponent::X, SwizzleComponent::X],
    });
    b.expr(Expression::As {
        expr: xy,
        kind: ScalarKind::Sint,
        width: 4,
    })
}

fn image_load(b: &mut ShaderBuilder, image: Handle<Variable>, coordinate: Handle<Expression>) -> Handle<Expression> {
    let image = b.load(image);
    b.expr(Expression::ImageLoad {
        image,
        coordinate,
        array_index: None,
        level: None,
    })
}

fn image_store(b: &mut ShaderBuilder, image: Handle<Variable>, coordinate: Handle<Expression>, value: Handle<Expression>) {
    let image = b.load(image);
    b.body.push(Statement::ImageStore {
        image,
        coordinate,
        array_index: None,
        value,
    });
}

fn with_workgroup(mut module: Module) -> Module {
    let entry = module
        .functions
        .iter()
        .find(|(_, f)| f.name == "CSMain")
        .map(|(h, _)| h)
        .unwrap();
    module.functions[entry].workgroup_size = Some([8, 8, 1]);
    module
}

/// `Output[int2(id.xy)] = value` for a write-only `RWTexture2D<float>`,
/// optionally reading the same image first.
fn image_kernel(read_back: bool) -> Module {
    let mut b = ShaderBuilder::new();
    let uint3 = b.vector(VectorSize::Tri, Scalar::U32);
    let access = if read_back {
        StorageAccess::LOAD | StorageAccess::STORE
    } else {
        StorageAccess::STORE
    };
    let image_ty = storage_image(&mut b, access);
    let output = b.uniform("Output", image_ty);
    let id = b.input("id", uint3, "SV_DispatchThreadID");

    let coordinate = thread_coordinate(&mut b, id);
    let value = if read_back {
        image_load(&mut b, output, coordinate)
    } else {
        b.expr(Expression::Literal(Literal::F32(1.0)))
    };
    image_store(&mut b, output, coordinate, value);
    with_workgroup(b.finish("CSMain", None))
}

#[test]
fn storage_image_writes_use_unsigned_coordinates() {
    let source = compile_metal(image_kernel(false), "CSMain", Stage::Compute, &options(OptLevel::O0));
    assert_eq!(header(&source, "NumThreads"), ["// @NumThreads: 8, 8, 1"]);
    assert!(source.contains("texture2d<float, access::write> Output [[ texture("));
    assert!(source.contains("    Output.write(float4(1.0), uint2(int2(id.xy)));\n"));
}

#[test]
fn reading_and_writing_one_image_is_rejected() {
    let result = try_compile_metal(image_kernel(true), "CSMain", Stage::Compute, &options(OptLevel::O0));
    let Err(CompileError::Rejected { log }) = result else {
        panic!("expected a rejection");
    };
    assert!(log
        .to_string()
        .contains("simultaneous read and write of storage image 'Output' is not supported"));
}

#[test]
fn reading_one_image_while_writing_another_compiles() {
    let mut b = ShaderBuilder::new();
    let uint3 = b.vector(VectorSize::Tri, Scalar::U32);
    let input_ty = storage_image(&mut b, StorageAccess::LOAD);
    let output_ty = storage_image(&mut b, StorageAccess::STORE);
    let input = b.uniform("Input", input_ty);
    let output = b.uniform("Output", output_ty);
    let id = b.input("id", uint3, "SV_DispatchThreadID");
    let coordinate = thread_coordinate(&mut b, id);
    let value = image_load(&mut b, input, coordinate);
    image_store(&mut b, output, coordinate, value);
    let module = with_workgroup(b.finish("CSMain", None));

    for level in [OptLevel::O0, OptLevel::O1] {
        let source = compile_metal(module.clone(), "CSMain", Stage::Compute, &options(level));
        let uavs = header(&source, "UAVs");
        assert!(uavs[0].contains("Input(") && uavs[0].contains("Output("), "{uavs:?}");
        assert!(source.contains("Input.read("), "{source}");
        assert!(source.contains("Output.write("), "{source}");
    }
}

#[test]
fn functions_the_entry_never_calls_are_not_legalized() {
    let mut b = ShaderBuilder::new();
    let uint3 = b.vector(VectorSize::Tri, Scalar::U32);
    let image_ty = storage_image(&mut b, StorageAccess::LOAD | StorageAccess::STORE);
    let output = b.uniform("Output", image_ty);
    let id = b.input("id", uint3, "SV_DispatchThreadID");

    // `void Unused() { Output[int2(0, 0)]; }`
    let int2 = b.vector(VectorSize::Bi, Scalar::I32);
    let origin = b.expr(Expression::ZeroValue(int2));
    let stray = image_load(&mut b, output, origin);
    let mut unused = Function::new("Unused");
    unused.body.push(Statement::Expression(stray));
    b.module.add_function(unused);

    let coordinate = thread_coordinate(&mut b, id);
    let value = b.expr(Expression::Literal(Literal::F32(1.0)));
    image_store(&mut b, output, coordinate, value);
    let module = with_workgroup(b.finish("CSMain", None));

    for level in [OptLevel::O0, OptLevel::O1] {
        let result = try_compile_metal(module.clone(), "CSMain", Stage::Compute, &options(level));
        assert!(result.is_ok(), "{level:?}: {:?}", result.err());
    }
}

#[test]
fn compute_varyings_must_be_system_values() {
    let mut b = ShaderBuilder::new();
    let float4 = b.float4();
    b.input("color", float4, "TEXCOORD0");
    let module = b.finish("CSMain", None);
    let result = try_compile_metal(module, "CSMain", Stage::Compute, &options(OptLevel::O0));
    let Err(CompileError::Rejected { log }) = result else {
        panic!("expected a rejection");
    };
    assert!(log.to_string().contains("TEXCOORD0"), "{log}");
}
