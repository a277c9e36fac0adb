//! compass60 — a two-pass COMPASS cross-assembler for the CDC
//! 6000-series mainframe.
//!
//! Source is translated into a 60-bit-word binary object and a
//! paginated listing. Instructions pack as 15/30/60-bit parcels left
//! to right into words; symbols may be absolute or relative to named
//! program blocks; a deduplicated literal pool is materialized at the
//! front of the image; character data is encoded in one of four 6-bit
//! character sets.

pub use crate::charset::{CharSet, CodeMode};
pub use crate::diagnostics::{Diagnostic, DiagnosticSink, Severity};
pub use crate::driver::{Assembler, MacroDef};
pub use crate::encoder::Parcel;
pub use crate::expr::{fold_word, DisOperands, Evaluator, ExprError, Value, WORD_MASK};
pub use crate::instructions::{InstructionDef, InstructionTable, MapError, BUILTIN_MAP};
pub use crate::lexer::{parse_line, SourceLine};
pub use crate::operand::{parse_operands, OperandError, Operands};
pub use crate::output::{ListingItem, OutputGenerator};
pub use crate::state::{
    AssemblerState, BlockId, BlockTable, Capture, ListingFlags, NumberBase, Pass,
};
pub use crate::symbols::{Symbol, SymbolKind, SymbolTable};

mod charset;
mod conditional;
mod diagnostics;
mod driver;
mod encoder;
mod expr;
mod instructions;
mod lexer;
mod operand;
mod output;
mod pass1;
mod pass2;
mod pseudo;
mod state;
mod symbols;
