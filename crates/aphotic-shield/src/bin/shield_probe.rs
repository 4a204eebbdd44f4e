//! Exercise one class of memory error through the C ABI.
//!
//! Each scenario either finishes normally, exits with an intentional error
//! code, or is stopped by the shield with SIGABRT.

use aphotic_shield::ffi::{as_alloc, as_check_load, as_check_store, as_dealloc, as_init};
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Scenario {
    /// In-bounds accesses and a matching free.
    Clean,
    /// Read one byte past the end of a block.
    Overflow,
    /// Write one byte before the start of a block.
    Underflow,
    /// Read a block after freeing it.
    UseAfterFree,
    /// Free a block twice.
    DoubleFree,
    /// Free a pointer into the middle of a block.
    InvalidFree,
    /// Exit with status 3 without touching memory.
    ExitCode,
}

#[derive(Parser, Debug)]
#[command(name = "shield-probe", about = "Trigger aphotic shield violations")]
struct Args {
    #[arg(value_enum)]
    scenario: Scenario,

    /// Size of the test allocation in bytes.
    #[arg(long, default_value_t = 16)]
    size: usize,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    as_init();
    let size = args.size;
    let block = as_alloc(size);

    match args.scenario {
        Scenario::Clean => {
            as_check_store(block, size);
            as_check_load(block, 1);
            as_dealloc(block);
            println!("clean");
        }
        Scenario::Overflow => as_check_load(block.wrapping_add(size), 1),
        Scenario::Underflow => as_check_store(block.wrapping_sub(1), 1),
        Scenario::UseAfterFree => {
            as_dealloc(block);
            as_check_load(block, 1);
        }
        Scenario::DoubleFree => {
            as_dealloc(block);
            as_dealloc(block);
        }
        Scenario::InvalidFree => as_dealloc(block.wrapping_add(size / 2 + 1)),
        Scenario::ExitCode => std::process::exit(3),
    }
}
