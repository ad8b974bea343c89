use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use miette::{Context, IntoDiagnostic};

use hxc_backend_core::{compile, BackendOptions, BackendRegistry, CompileError, IrDumpBackend, TargetProfile};
use hxc_ir::{Module, Stage};
use hxc_opt::OptLevel;

/// hxc: HLSL to Metal shader cross-compiler
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Input module (JSON-serialized IR)
    input: PathBuf,

    /// Target backend
    #[arg(short, long, default_value = "metal")]
    target: String,

    /// Entry point function name
    #[arg(short, long, default_value = "main")]
    entry: String,

    /// Shader stage: vertex, pixel or compute
    #[arg(short, long)]
    stage: Stage,

    /// Device family: desktop or mobile
    #[arg(long, default_value = "desktop")]
    profile: TargetProfile,

    /// Optimization level: 0, 1, or 2
    #[arg(long, default_value = "1")]
    opt_level: OptLevel,

    /// Run common subexpression elimination below -O2
    #[arg(long)]
    cse: bool,

    /// Zero-initialize locals
    #[arg(long)]
    zero_init: bool,

    /// Guard buffer accesses with a side table of element counts
    #[arg(long)]
    bounds_checks: bool,

    /// Dissolve uniform blocks into packed arrays
    #[arg(long)]
    flatten_buffers: bool,

    /// Split struct uniforms into their fields
    #[arg(long)]
    flatten_structs: bool,

    /// Output path (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Dump the lowered IR to stderr
    #[arg(long)]
    emit_ir: bool,

    /// Compile without writing output
    #[arg(long)]
    dry_run: bool,
}

impl Cli {
    fn options(&self) -> BackendOptions {
        BackendOptions {
            profile: self.profile,
            opt_level: self.opt_level,
            cse: self.cse,
            zero_initialize: self.zero_init,
            bounds_checks: self.bounds_checks,
            flatten_buffers: self.flatten_buffers,
            flatten_structs: self.flatten_structs,
        }
    }
}

fn main() -> ExitCode {
    env_logger::init();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();
    let options = cli.options();

    // 1. Read the module.
    let source = std::fs::read_to_string(&cli.input)
        .into_diagnostic()
        .wrap_err_with(|| format!("failed to read {}", cli.input.display()))?;
    let module: Module = serde_json::from_str(&source)
        .into_diagnostic()
        .wrap_err_with(|| format!("{} is not a valid hxc module", cli.input.display()))?;
    log::info!(
        "loaded {}: {} function(s), {} global(s)",
        cli.input.display(),
        module.functions.len(),
        module.globals.len()
    );

    // 2. Optionally dump the lowered IR to stderr.
    if cli.emit_ir {
        let dump = compile(&IrDumpBackend, module.clone(), &cli.entry, cli.stage, &options)
            .map_err(report)
            .wrap_err("lowering failed")?;
        for file in &dump.files {
            eprintln!("{}", file.content);
        }
    }

    // 3. Backend dispatch.
    let mut registry = BackendRegistry::with_builtins();
    registry.register(Box::new(hxc_backend_metal::MetalBackend));
    let backend = registry.find(&cli.target).ok_or_else(|| {
        let available = registry.list_targets().join(", ");
        miette::miette!("unknown target '{}' (available: {})", cli.target, available)
    })?;

    let output = compile(backend, module, &cli.entry, cli.stage, &options)
        .map_err(report)
        .wrap_err_with(|| format!("{} compilation of '{}' failed", backend.name(), cli.entry))?;

    // 4. Print diagnostics.
    for diag in &output.diagnostics {
        eprintln!("{diag}");
    }

    // 5. Dry-run: stop here.
    if cli.dry_run {
        return Ok(());
    }

    // 6. Write output.
    for file in &output.files {
        match &cli.output {
            Some(path) => std::fs::write(path, &file.content)
                .into_diagnostic()
                .wrap_err_with(|| format!("failed to write {}", path.display()))?,
            None => print!("{}", file.content),
        }
    }

    Ok(())
}

/// Rejections carry the whole diagnostic log.
fn report(err: CompileError) -> miette::Report {
    match err {
        CompileError::Rejected { log } => {
            miette::miette!("{} error(s)\n{}", log.error_count(), log.to_string().trim_end())
        }
        CompileError::Internal(e) => miette::miette!("internal compiler error: {e}"),
    }
}
