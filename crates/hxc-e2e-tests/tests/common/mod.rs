use hxc_backend_core::{compile, BackendOptions, BackendOutput, CompileError};
use hxc_backend_metal::MetalBackend;
#[allow(unused_imports)]
use hxc_ir::*;
use hxc_opt::OptLevel;

/// Builds one entry function and the globals it references.
pub struct ShaderBuilder {
    pub module: Module,
    pub body: Vec<Statement>,
    parameters: Vec<Handle<Variable>>,
}

#[allow(dead_code)]
impl ShaderBuilder {
    pub fn new() -> Self {
        Self {
            module: Module::default(),
            body: Vec::new(),
            parameters: Vec::new(),
        }
    }

    pub fn scalar(&mut self, scalar: Scalar) -> Handle<Type> {
        self.module.add_type(TypeInner::Scalar(scalar))
    }

    pub fn vector(&mut self, size: VectorSize, scalar: Scalar) -> Handle<Type> {
        self.module.add_type(TypeInner::Vector { size, scalar })
    }

    pub fn float4(&mut self) -> Handle<Type> {
        self.vector(VectorSize::Quad, Scalar::F32)
    }

    pub fn texture2d(&mut self) -> Handle<Type> {
        self.module.add_type(TypeInner::Image {
            dim: ImageDim::D2,
            arrayed: false,
            class: ImageClass::Sampled {
                multisampled: false,
            },
            scalar: Scalar::F32,
        })
    }

    pub fn sampler(&mut self) -> Handle<Type> {
        self.module.add_type(TypeInner::Sampler { comparison: false })
    }

    pub fn uniform(&mut self, name: &str, ty: Handle<Type>) -> Handle<Variable> {
        self.module
            .add_global(Variable::new(name, ty, StorageMode::Uniform))
    }

    /// Adds an input parameter carrying `semantic`.
    pub fn input(&mut self, name: &str, ty: Handle<Type>, semantic: &str) -> Handle<Variable> {
        let var = self
            .module
            .add_variable(Variable::new(name, ty, StorageMode::Input).with_semantic(semantic));
        self.parameters.push(var);
        var
    }

    pub fn expr(&mut self, expr: Expression) -> Handle<Expression> {
        self.module.add_expression(expr)
    }

    pub fn load(&mut self, var: Handle<Variable>) -> Handle<Expression> {
        self.expr(Expression::Variable(var))
    }

    pub fn field(&mut self, base: Handle<Expression>, index: u32) -> Handle<Expression> {
        self.expr(Expression::AccessIndex { base, index })
    }

    pub fn binary(&mut self, op: BinaryOp, left: Handle<Expression>, right: Handle<Expression>) -> Handle<Expression> {
        self.expr(Expression::Binary { op, left, right })
    }

    /// `texture.Sample(sampler, coordinate)`.
    pub fn sample(
        &mut self,
        texture: Handle<Variable>,
        sampler: Handle<Variable>,
        coordinate: Handle<Expression>,
    ) -> Handle<Expression> {
        let image = self.load(texture);
        let sampler = self.load(sampler);
        self.expr(Expression::ImageSample {
            image,
            sampler,
            coordinate,
            array_index: None,
            offset: None,
            level: SampleLevel::Auto,
            depth_ref: None,
            gather: None,
        })
    }

    pub fn ret(&mut self, value: Handle<Expression>) {
        self.body.push(Statement::Return { value: Some(value) });
    }

    /// Adds the entry function. A `semantic` of `None` leaves the result
    /// unannotated, as for struct results.
    pub fn finish(mut self, name: &str, result: Option<(Handle<Type>, Option<&str>)>) -> Module {
        let mut function = Function::new(name);
        function.parameters = std::mem::take(&mut self.parameters);
        function.result = result.map(|(ty, semantic)| FunctionResult {
            ty,
            semantic: semantic.map(str::to_string),
        });
        function.body = std::mem::take(&mut self.body);
        self.module.add_function(function);
        self.module
    }
}

/// Options at `level` with everything else defaulted.
#[allow(dead_code)]
pub fn options(level: OptLevel) -> BackendOptions {
    BackendOptions {
        opt_level: level,
        ..BackendOptions::default()
    }
}

/// Compiles with the Metal backend, returning the result.
#[allow(dead_code)]
pub fn try_compile_metal(
    module: Module,
    entry: &str,
    stage: Stage,
    options: &BackendOptions,
) -> Result<BackendOutput, CompileError> {
    let _ = env_logger::builder().is_test(true).try_init();
    compile(&MetalBackend, module, entry, stage, options)
}

/// Compiles with the Metal backend and returns the emitted source.
#[allow(dead_code)]
pub fn compile_metal(module: Module, entry: &str, stage: Stage, options: &BackendOptions) -> String {
    match try_compile_metal(module, entry, stage, options) {
        Ok(output) => first_text(&output).to_string(),
        Err(CompileError::Rejected { log }) => panic!("compilation rejected:\n{log}"),
        Err(e) => panic!("{e}"),
    }
}

/// Extract the first text output from a `BackendOutput`.
#[allow(dead_code)]
pub fn first_text(output: &BackendOutput) -> &str {
    &output.files[0].content
}

/// The `// @Key: value` header lines.
#[allow(dead_code)]
pub fn header_lines(source: &str) -> Vec<&str> {
    source.lines().filter(|l| l.starts_with("// @")).collect()
}

/// Header lines starting with `// @{key}:`.
#[allow(dead_code)]
pub fn header(source: &str, key: &str) -> Vec<String> {
    let prefix = format!("// @{key}:");
    source
        .lines()
        .filter(|l| l.starts_with(&prefix))
        .map(str::to_string)
        .collect()
}
