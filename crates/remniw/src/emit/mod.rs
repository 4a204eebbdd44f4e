// Output of lowered machine code.
//
//   - `asm`: GNU assembler text
//   - `object`: relocatable binary image with its own container format

pub mod asm;
pub mod object;

pub use asm::{block_label, write_assembly};
pub use object::{ObjectImage, RelocKind, Relocation, Symbol, SymbolKind, assemble};
