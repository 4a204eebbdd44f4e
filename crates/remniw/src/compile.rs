// Module compilation pipeline.
//
// Each function runs selection, allocation and frame lowering independently;
// with `parallel` set the functions are spread over the rayon pool and the
// results collected back in declaration order.

use rayon::prelude::*;

use crate::emit::{self, ObjectImage};
use crate::error::{Error, Result};
use crate::frame::{self, FrameLayout};
use crate::ir::{self, Function, GlobalData, Module};
use crate::isel::{self, SelectOptions};
use crate::regalloc::{self, SpillStrategy};
use crate::riscv::MachFunction;

/// Code generation target. Only RV64IM with the LP64 ABI exists today.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Target {
    #[default]
    Riscv64,
}

impl Target {
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "riscv64" | "rv64" | "riscv64-unknown-elf" => Ok(Target::Riscv64),
            other => Err(Error::UnknownTarget(other.to_string())),
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Target::Riscv64 => "riscv64",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompileOptions {
    pub target: Target,
    /// Route allocation through the shield runtime and check every load/store.
    pub instrument: bool,
    pub spill_heuristic: SpillStrategy,
    /// Compile functions on the rayon pool.
    pub parallel: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            target: Target::Riscv64,
            instrument: false,
            spill_heuristic: SpillStrategy::FurthestEnd,
            parallel: true,
        }
    }
}

impl CompileOptions {
    #[must_use]
    pub fn with_target(mut self, target: Target) -> Self {
        self.target = target;
        self
    }

    #[must_use]
    pub fn with_instrumentation(mut self, instrument: bool) -> Self {
        self.instrument = instrument;
        self
    }

    #[must_use]
    pub fn with_spill_heuristic(mut self, strategy: SpillStrategy) -> Self {
        self.spill_heuristic = strategy;
        self
    }

    #[must_use]
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }
}

/// One function after frame lowering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledFunction {
    pub code: MachFunction,
    pub frame: FrameLayout,
    pub spilled: usize,
}

/// Lowered module, ready for either output format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledModule {
    pub name: String,
    pub target: Target,
    pub functions: Vec<CompiledFunction>,
    pub globals: Vec<GlobalData>,
}

impl CompiledModule {
    #[must_use]
    pub fn function(&self, name: &str) -> Option<&CompiledFunction> {
        self.functions.iter().find(|f| f.code.name == name)
    }

    fn machine_functions(&self) -> Vec<MachFunction> {
        self.functions.iter().map(|f| f.code.clone()).collect()
    }

    pub fn to_assembly(&self) -> Result<String> {
        emit::write_assembly(&self.name, &self.machine_functions(), &self.globals)
            .map_err(|_| Error::Internal("failed to format assembly".into()))
    }

    pub fn to_object(&self) -> Result<ObjectImage> {
        emit::assemble(&self.machine_functions(), &self.globals)
    }
}

fn compile_function(module: &Module, func: &Function, options: &CompileOptions) -> Result<CompiledFunction> {
    let select = SelectOptions {
        instrument: options.instrument,
    };
    let mut code = isel::select_function(module, func, select)?;
    let allocation = regalloc::allocate(&mut code, options.spill_heuristic.heuristic())?;
    let saved: Vec<_> = allocation.used_callee_saved.iter().copied().collect();
    let frame = frame::lower_frame(&mut code, &saved)?;
    Ok(CompiledFunction {
        code,
        frame,
        spilled: allocation.spilled.len(),
    })
}

/// Verify and lower every function of `module`.
pub fn compile_module(module: &Module, options: &CompileOptions) -> Result<CompiledModule> {
    ir::verify_module(module)?;

    let functions = if options.parallel {
        module
            .functions
            .par_iter()
            .map(|func| compile_function(module, func, options))
            .collect::<Result<Vec<_>>>()?
    } else {
        module
            .functions
            .iter()
            .map(|func| compile_function(module, func, options))
            .collect::<Result<Vec<_>>>()?
    };

    tracing::debug!(
        module = %module.name,
        functions = functions.len(),
        target = options.target.name(),
        instrument = options.instrument,
        "module compiled"
    );

    Ok(CompiledModule {
        name: module.name.clone(),
        target: options.target,
        functions,
        globals: module.globals.clone(),
    })
}
