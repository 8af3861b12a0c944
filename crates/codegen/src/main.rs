//! RazorForge code generator CLI.
//!
//! Reads a JSON-serialized front-end bundle (program AST, symbol table,
//! loaded modules) and writes a textual LLVM IR module.

use clap::{CommandFactory, Parser as ClapParser, Subcommand};
use clap_complete::{generate, Shell};
use rfgen::{
    generate_ir_for_bundle, Arch, CodegenConfig, Os, ProgramBundle, TargetPlatform,
};
use std::io;
use std::path::PathBuf;
use std::process;

#[derive(ClapParser)]
#[command(name = "rfgen")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "RazorForge code generator - lower type-checked programs to LLVM IR", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate LLVM IR from a serialized program bundle
    Build {
        /// Input bundle (JSON) produced by the front end
        input: PathBuf,

        /// Output .ll path (defaults to the input filename with .ll)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Target triple (defaults to the host)
        #[arg(long)]
        target: Option<String>,

        /// Path to a TOML config file (target, stdlib, stack_traces)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Standard library path for crash-message resolution
        #[arg(long)]
        stdlib: Option<PathBuf>,

        /// Disable stack-trace instrumentation
        #[arg(long)]
        no_stack_traces: bool,
    },

    /// List supported target platforms
    Targets,

    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Build {
            input,
            output,
            target,
            config,
            stdlib,
            no_stack_traces,
        } => {
            let output = output.unwrap_or_else(|| input.with_extension("ll"));
            run_build(&input, &output, target, config, stdlib, no_stack_traces);
        }
        Commands::Targets => run_targets(),
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            generate(shell, &mut cmd, name, &mut io::stdout());
        }
    }
}

fn run_build(
    input: &PathBuf,
    output: &PathBuf,
    target: Option<String>,
    config_path: Option<PathBuf>,
    stdlib: Option<PathBuf>,
    no_stack_traces: bool,
) {
    let mut config = CodegenConfig::new("razorforge", "standard");

    // File config first, flags override
    if let Some(path) = config_path {
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                eprintln!("Error reading config {}: {}", path.display(), e);
                process::exit(1);
            }
        };
        let file_config = match rfgen::config::FileConfig::parse(&content) {
            Ok(parsed) => parsed,
            Err(e) => {
                eprintln!("Error: {}", e);
                process::exit(1);
            }
        };
        if let Some(triple) = &file_config.target {
            config.target = Some(resolve_target(triple));
        }
        config.stdlib_path = file_config.stdlib;
        config.stack_traces = file_config.stack_traces;
    }

    if let Some(triple) = target {
        config.target = Some(resolve_target(&triple));
    }
    if let Some(path) = stdlib {
        config.stdlib_path = Some(path);
    }
    if no_stack_traces {
        config.stack_traces = false;
    }

    let content = match std::fs::read_to_string(input) {
        Ok(content) => content,
        Err(e) => {
            eprintln!("Error reading {}: {}", input.display(), e);
            process::exit(1);
        }
    };
    let bundle: ProgramBundle = match serde_json::from_str(&content) {
        Ok(bundle) => bundle,
        Err(e) => {
            eprintln!("Error parsing {}: {}", input.display(), e);
            process::exit(1);
        }
    };

    let ir = match generate_ir_for_bundle(bundle, config) {
        Ok(ir) => ir,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = std::fs::write(output, ir) {
        eprintln!("Error writing {}: {}", output.display(), e);
        process::exit(1);
    }
}

fn resolve_target(triple: &str) -> TargetPlatform {
    match TargetPlatform::from_triple(triple) {
        Ok(platform) => platform,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}

fn run_targets() {
    let arches = [
        Arch::X86_64,
        Arch::X86,
        Arch::Arm64,
        Arch::Arm,
        Arch::Riscv64,
        Arch::Riscv32,
        Arch::Wasm32,
        Arch::Wasm64,
    ];
    let oses = [Os::Linux, Os::Windows, Os::MacOs, Os::FreeBsd, Os::Wasi];
    for arch in arches {
        for os in oses {
            if let Ok(platform) = TargetPlatform::new(arch, os) {
                println!("{}", platform.triple());
            }
        }
    }
}
