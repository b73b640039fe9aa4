use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use idk::bytecode::disasm;
use idk::diagnostic::{Diagnostic, ansi::AnsiRenderer, json, registry};
use idk::vm::{Globals, Vm, VmOptions};
use idk::{Module, ast, host};

#[derive(Parser)]
#[command(name = "idk", version, about = "Compile and run idk syntax trees on the bytecode VM")]
struct Cli {
    /// Print diagnostics as JSON, one object per line
    #[arg(long, global = true)]
    json: bool,

    /// Disable coloured diagnostics
    #[arg(long, global = true)]
    no_color: bool,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve and emit a syntax tree into a module file
    Compile {
        /// Syntax tree as JSON
        input: PathBuf,
        /// Output path, defaults to the input with an .idkc extension
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Run a module, or a syntax tree compiled in memory
    Run {
        /// Module file, or a .json syntax tree
        input: PathBuf,
        /// Abort after this many instructions
        #[arg(long)]
        max_steps: Option<u64>,
        /// Do not print the result value
        #[arg(short, long)]
        quiet: bool,
    },
    /// List a module's constants and instructions
    Disasm {
        /// Module file, or a .json syntax tree
        input: PathBuf,
    },
    /// Print the resolved IR of a syntax tree
    Ir {
        /// Syntax tree as JSON
        input: PathBuf,
    },
    /// Explain a diagnostic code, or list all codes
    Explain { code: Option<String> },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("idk=debug"))
    } else {
        EnvFilter::from_default_env()
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let result = match cli.command {
        Command::Compile { input, output } => compile(&input, output),
        Command::Run { input, max_steps, quiet } => run(&input, max_steps, quiet),
        Command::Disasm { input } => load(&input).map(|module| print!("{}", disasm::disassemble(&module))),
        Command::Ir { input } => read_tree(&input).and_then(|tree| {
            let root = idk::resolve(&tree).map_err(|e| Diagnostic::from(&e))?;
            println!("{root}");
            Ok(())
        }),
        Command::Explain { code } => explain(code.as_deref()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(d) => {
            if cli.json {
                eprintln!("{}", json::render(&d));
            } else {
                let use_color = !cli.no_color && std::io::stderr().is_terminal();
                eprint!("{}", AnsiRenderer { use_color }.render(&d));
            }
            ExitCode::FAILURE
        }
    }
}

fn io_error(path: &Path, e: std::io::Error) -> Diagnostic {
    Diagnostic::error(format!("{}: {e}", path.display())).with_code("IDK-I001")
}

fn is_tree(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

fn read_tree(path: &Path) -> Result<ast::Node, Diagnostic> {
    let text = std::fs::read_to_string(path).map_err(|e| io_error(path, e))?;
    idk::parse_tree(&text).map_err(|e| Diagnostic::from(&e))
}

/// Module bytes for `path`: read directly, or compiled from a syntax tree.
fn module_bytes(path: &Path) -> Result<Vec<u8>, Diagnostic> {
    if is_tree(path) {
        let tree = read_tree(path)?;
        return idk::compile(&tree).map_err(|e| Diagnostic::from(&e));
    }
    std::fs::read(path).map_err(|e| io_error(path, e))
}

fn load(path: &Path) -> Result<Arc<Module>, Diagnostic> {
    let bytes = module_bytes(path)?;
    idk::load(&bytes).map_err(|e| Diagnostic::from(&e))
}

fn compile(input: &Path, output: Option<PathBuf>) -> Result<(), Diagnostic> {
    let tree = read_tree(input)?;
    let bytes = idk::compile(&tree).map_err(|e| Diagnostic::from(&e))?;
    let output = output.unwrap_or_else(|| input.with_extension("idkc"));
    std::fs::write(&output, &bytes).map_err(|e| io_error(&output, e))?;
    debug!(path = %output.display(), bytes = bytes.len(), "module written");
    Ok(())
}

fn run(input: &Path, max_steps: Option<u64>, quiet: bool) -> Result<(), Diagnostic> {
    let module = load(input)?;
    let mut globals = Globals::new();
    host::install(&mut globals);
    let options = VmOptions { max_steps, ..VmOptions::default() };
    let mut vm = Vm::with_options(&mut globals, options);
    let result = vm.run(&module).map_err(|e| Diagnostic::from(&e))?;
    debug!(steps = vm.steps(), "run finished");
    if !quiet {
        println!("{}", result.tostring());
    }
    Ok(())
}

fn explain(code: Option<&str>) -> Result<(), Diagnostic> {
    let Some(code) = code else {
        for entry in registry::REGISTRY {
            println!("{}  {}", entry.code, entry.short);
        }
        return Ok(());
    };
    match registry::lookup(code) {
        Some(entry) => {
            print!("{}", entry.long);
            Ok(())
        }
        None => Err(Diagnostic::error(format!("unknown diagnostic code '{code}'"))
            .with_suggestion("run `idk explain` to list every code")),
    }
}
