use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use aphotic_shield::ShieldOptions;
use clap::{Parser, Subcommand, ValueEnum};

use remniw::test_harness::{Outcome, Simulator};
use remniw::{CompileOptions, CompiledModule, Module, SpillStrategy, Target};

const COMPILER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "remniw-llc")]
#[command(about = "RISC-V RV64IM back end for the remniw IR", version = COMPILER_VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Emit {
    /// GNU-style assembly text
    Asm,
    /// remniw object container
    Obj,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Heuristic {
    FurthestEnd,
    UseDensity,
}

impl From<Heuristic> for SpillStrategy {
    fn from(heuristic: Heuristic) -> Self {
        match heuristic {
            Heuristic::FurthestEnd => SpillStrategy::FurthestEnd,
            Heuristic::UseDensity => SpillStrategy::UseDensity,
        }
    }
}

#[derive(clap::Args)]
struct CodegenArgs {
    #[arg(long, default_value = "riscv64", help = "Target triple or architecture")]
    target: String,

    #[arg(long, help = "Instrument memory accesses with aphotic shield checks")]
    shield: bool,

    #[arg(long, value_enum, default_value_t = Heuristic::FurthestEnd)]
    spill_heuristic: Heuristic,

    #[arg(long, help = "Compile functions one at a time")]
    sequential: bool,
}

impl CodegenArgs {
    fn options(&self) -> Result<CompileOptions> {
        Ok(CompileOptions::default()
            .with_target(Target::parse(&self.target)?)
            .with_instrumentation(self.shield)
            .with_spill_heuristic(self.spill_heuristic.into())
            .with_parallel(!self.sequential))
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a JSON IR module to assembly or an object image
    Compile {
        #[arg(help = "Input IR module (JSON)")]
        input: PathBuf,

        #[arg(short, long, help = "Output file")]
        output: PathBuf,

        #[arg(long, value_enum, default_value_t = Emit::Asm)]
        emit: Emit,

        #[command(flatten)]
        codegen: CodegenArgs,
    },
    /// Compile a module and execute one function in the RV64IM simulator
    Run {
        #[arg(help = "Input IR module (JSON)")]
        input: PathBuf,

        #[arg(long, default_value = "main", help = "Function to call")]
        entry: String,

        #[arg(long, help = "Instruction budget before giving up")]
        step_limit: Option<u64>,

        #[command(flatten)]
        codegen: CodegenArgs,

        #[arg(last = true, allow_hyphen_values = true, help = "Integer arguments")]
        args: Vec<i64>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Compile {
            input,
            output,
            emit,
            codegen,
        } => {
            let compiled = compile(&input, &codegen)?;
            let bytes = match emit {
                Emit::Asm => compiled.to_assembly()?.into_bytes(),
                Emit::Obj => compiled.to_object()?.encode(),
            };
            fs::write(&output, &bytes)
                .with_context(|| format!("Failed to write output to {}", output.display()))?;
            println!(
                "Compiled {} -> {} ({} bytes)",
                input.display(),
                output.display(),
                bytes.len()
            );
        }
        Commands::Run {
            input,
            entry,
            step_limit,
            codegen,
            args,
        } => {
            let compiled = compile(&input, &codegen)?;
            let image = compiled.to_object().context("Assembly failed")?;
            let shield = ShieldOptions::from_env()
                .with_context(|| format!("Invalid {}", ShieldOptions::ENV_VAR))?;
            let mut simulator =
                Simulator::with_shield_options(&image, &shield).context("Failed to load image")?;
            if let Some(limit) = step_limit {
                simulator = simulator.with_step_limit(limit);
            }
            let run = simulator.call(&entry, &args)?;

            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&run.output)?;
            stdout.flush()?;
            drop(stdout);

            match run.outcome {
                Outcome::Returned { a0, .. } => std::process::exit(a0 as i32),
                Outcome::Exited(code) => std::process::exit(code),
                Outcome::Trapped(violation) => aphotic_shield::report::trap(&violation),
                Outcome::Aborted => std::process::abort(),
                Outcome::Faulted { pc, address } => {
                    anyhow::bail!("memory fault at pc {pc:#x} accessing {address:#x}")
                }
                Outcome::IllegalInstruction { pc, word } => {
                    anyhow::bail!("illegal instruction {word:#010x} at pc {pc:#x}")
                }
                Outcome::StepLimit => {
                    anyhow::bail!("step limit reached after {} instructions", run.steps)
                }
            }
        }
    }

    Ok(())
}

fn compile(input: &Path, codegen: &CodegenArgs) -> Result<CompiledModule> {
    let module = read_module(input)?;
    let options = codegen.options()?;
    remniw::compile_module(&module, &options)
        .with_context(|| format!("Compilation of {} failed", input.display()))
}

fn read_module(path: &Path) -> Result<Module> {
    let text =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Module::from_json(&text).with_context(|| format!("Failed to parse {}", path.display()))
}
