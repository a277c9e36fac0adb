//! Pass 1: size every line, collect symbols, lay the ground for the
//! block layout.
//!
//! The counters here are block-relative. The intricate part is the
//! deferred forced-upper rule: JP, RJ, PS and XJ complete their word
//! only when the next significant line arrives, and `EQU *` and the
//! negating `-` label interact with that pending force.

use crate::diagnostics::{DiagnosticSink, Severity};
use crate::driver::{Assembler, MacroDef};
use crate::encoder;
use crate::expr::Evaluator;
use crate::lexer::SourceLine;
use crate::pseudo;
use crate::state::{BlockId, Capture, ABSOLUTE_BLOCK};
use crate::symbols::{Symbol, SymbolKind};

/// Mnemonics that fill their word only at the next significant line.
pub const DEFERRED_FORCE_MNEMONICS: &[&str] = &["JP", "RJ", "PS", "XJ"];

/// Directives that define their own label (or consume it).
pub fn label_defined_by_pseudo(mnemonic: &str) -> bool {
    matches!(
        mnemonic,
        "EQU" | "=" | "SET" | "END" | "ENDL" | "IDENT" | "MACRO" | "OPDEF" | "MICRO" | "LOC"
            | "RMT" | "HERE"
    )
}

fn symbol_context(asm: &Assembler) -> (SymbolKind, Option<BlockId>) {
    let state = &asm.state;
    let block = if state.lc_is_absolute {
        state.pre_loc_block.unwrap_or(state.current_block)
    } else {
        state.current_block
    };
    if state.lc_is_absolute || block == ABSOLUTE_BLOCK {
        (SymbolKind::Absolute, None)
    } else {
        (SymbolKind::Relocatable, Some(block))
    }
}

fn define_label(asm: &mut Assembler, name: &str, number: usize) -> bool {
    if asm.state.pc != 0 {
        asm.sink.warning(
            number,
            Severity::Assembly,
            format!("label '{}' is not word-aligned (PC={})", name, asm.state.pc),
        );
    }
    let (kind, block) = symbol_context(asm);
    let symbol = Symbol {
        value: asm.state.lc as i64,
        kind,
        block,
        ..Symbol::absolute(0, number)
    };
    let qualifier = asm.state.qualifier.clone();
    asm.symbols
        .define(name, symbol, qualifier.as_deref(), &mut asm.sink)
}

pub fn process_line(asm: &mut Assembler, line: &mut SourceLine) -> bool {
    let number = line.number;
    let mnemonic = line.opcode_upper();
    let operand = line.operand_str().to_string();
    let label = line.label.clone();

    let lc_start = asm.state.lc;
    let pc_start = asm.state.pc;
    let deferred_pending = asm.state.deferred_force_pending;

    // Remote-block capture swallows everything until the closing RMT
    // (an END also terminates the block, and is kept in it).
    if let Some(name) = asm.state.remote_capture.clone() {
        match mnemonic.as_deref() {
            Some("RMT") if operand.trim().is_empty() => {
                asm.state.remote_capture = None;
            }
            Some("END") => {
                asm.remotes.entry(name).or_default().push(line.clone());
                asm.state.remote_capture = None;
            }
            _ => {
                asm.remotes.entry(name).or_default().push(line.clone());
            }
        }
        return true;
    }

    // Macro/OPDEF body capture.
    if let Some(kind) = asm.state.capture {
        if mnemonic.as_deref() == Some("ENDM") {
            if let Some(name) = asm.state.capture_name.take() {
                asm.macros.insert(
                    name,
                    MacroDef {
                        kind,
                        params: std::mem::take(&mut asm.state.capture_params),
                        body: std::mem::take(&mut asm.state.capture_lines),
                        line: number,
                    },
                );
            } else {
                asm.sink.error_once(
                    number,
                    Severity::Syntax,
                    "ENDM outside of a named definition",
                );
            }
            asm.state.capture = None;
        } else {
            asm.state.capture_lines.push(line.text.clone());
        }
        return true;
    }

    if asm.state.skip_count > 0 && !line.is_comment && mnemonic.as_deref() != Some("SKIP") {
        asm.state.skip_count -= 1;
        return true;
    }

    let is_equ_star = mnemonic.as_deref() == Some("EQU") && operand.trim() == "*";
    let negating = line.has_negating_label();

    // Deferred force from the previous line: a `-` label cancels it,
    // an `EQU *` defines first and forces after, anything else forces
    // before the line takes effect.
    if deferred_pending {
        if negating {
            log::trace!("L{}: deferred force cancelled by '-' label", number);
            asm.state.deferred_force_pending = false;
        } else if !is_equ_star {
            asm.state.force_upper();
            asm.state.deferred_force_pending = false;
        }
    }

    if line.is_comment {
        return true;
    }

    if is_equ_star {
        let Some(label) = label else {
            asm.sink
                .error_once(number, Severity::Syntax, "EQU * requires a label");
            return false;
        };
        // With a pending force the symbol takes the address of the
        // word containing the special instruction.
        let value = if deferred_pending && !negating {
            lc_start
        } else {
            asm.state.lc
        };
        let (kind, block) = symbol_context(asm);
        let symbol = Symbol {
            value: value as i64,
            kind,
            block,
            equ_star: true,
            ..Symbol::absolute(0, number)
        };
        let qualifier = asm.state.qualifier.clone();
        if !asm
            .symbols
            .define(&label, symbol, qualifier.as_deref(), &mut asm.sink)
        {
            return false;
        }
        if deferred_pending && !negating {
            asm.state.lc = lc_start;
            asm.state.pc = pc_start;
            asm.state.force_upper();
            asm.state.deferred_force_pending = false;
        }
        line.width_estimate = 0;
        return true;
    }

    let is_conditional = mnemonic
        .as_deref()
        .is_some_and(|m| m.starts_with("IF") || m == "ELSE" || m == "ENDIF");
    if is_conditional {
        let m = mnemonic.as_deref().unwrap_or("");
        if !pseudo::handle_conditional(asm, line, m) {
            return false;
        }
    }

    if !asm.state.conditional_active() {
        // Labels are still defined on conditionally-skipped lines.
        if let Some(name) = &label {
            let plain = name != "+" && name != "-";
            let by_pseudo = mnemonic
                .as_deref()
                .is_some_and(label_defined_by_pseudo);
            if plain && !is_conditional && !by_pseudo && !define_label(asm, name, number) {
                return false;
            }
        }
        return true;
    }

    // Block-control directives run before the label is defined so the
    // label lands in the new block.
    let mut block_pseudo = false;
    if matches!(
        mnemonic.as_deref(),
        Some("USE") | Some("ABS") | Some("REL") | Some("LOC")
    ) {
        let m = mnemonic.as_deref().unwrap_or("");
        if !pseudo::handle_pass1(asm, line, m) {
            return false;
        }
        block_pseudo = true;
    }

    // Label alignment and definition.
    if let Some(name) = &label {
        let plain = name != "+" && name != "-";
        let by_pseudo = mnemonic.as_deref().is_some_and(label_defined_by_pseudo);
        if (plain && !by_pseudo) || name == "+" {
            asm.state.force_upper();
        }
        if plain && !by_pseudo && !define_label(asm, name, number) {
            return false;
        }
    }

    if is_conditional {
        return true;
    }
    if block_pseudo {
        return true;
    }

    let Some(m) = mnemonic else {
        // Label-only or blank line; an operand without a mnemonic is
        // only legal as a comment opener.
        if label.is_none()
            && !operand.is_empty()
            && !operand.starts_with('.')
            && !operand.starts_with('*')
        {
            asm.sink
                .error_once(number, Severity::Syntax, "missing mnemonic");
            return false;
        }
        return true;
    };

    match m.as_str() {
        "RMT" => {
            let name = operand.trim().to_ascii_uppercase();
            if !name.is_empty() {
                asm.state.remote_capture = Some(name.clone());
                asm.remotes.entry(name).or_default();
            }
            return true;
        }
        "HERE" => {
            let name = operand.trim().to_ascii_uppercase();
            if name.is_empty() {
                asm.sink
                    .error_once(number, Severity::Syntax, "HERE requires a block name");
                return false;
            }
            let Some(stored) = asm.remotes.get(&name).cloned() else {
                asm.sink.error_once(
                    number,
                    Severity::Undefined,
                    format!("HERE references undefined remote block '{}'", name),
                );
                return false;
            };
            for mut remote in stored {
                asm.state.line_start_lc = asm.state.lc;
                asm.state.line_start_pc = asm.state.pc;
                if !process_line(asm, &mut remote) {
                    return false;
                }
            }
            return true;
        }
        "MACRO" | "OPDEF" => {
            let kind = if m == "MACRO" {
                Capture::Macro
            } else {
                Capture::Opdef
            };
            let (name, params) = match &label {
                Some(label) if label != "+" && label != "-" => {
                    (Some(label.to_ascii_uppercase()), operand.clone())
                }
                _ => {
                    let mut parts = operand.splitn(2, [',', ' ']);
                    let name = parts.next().map(|n| n.trim().to_ascii_uppercase());
                    (
                        name.filter(|n| !n.is_empty()),
                        parts.next().unwrap_or("").to_string(),
                    )
                }
            };
            let Some(name) = name else {
                asm.sink
                    .error_once(number, Severity::Syntax, format!("{} requires a name", m));
                return false;
            };
            asm.state.capture = Some(kind);
            asm.state.capture_name = Some(name);
            asm.state.capture_params = params
                .split(',')
                .map(|p| p.trim().to_ascii_uppercase())
                .filter(|p| !p.is_empty())
                .collect();
            asm.state.capture_lines = Vec::new();
            return true;
        }
        "MICRO" => {
            let Some(name) = &label else {
                asm.sink
                    .error_once(number, Severity::Syntax, "MICRO requires a label");
                return false;
            };
            let body = operand
                .split(['.', '*'])
                .next()
                .unwrap_or("")
                .trim()
                .to_string();
            asm.micros.insert(name.to_ascii_uppercase(), body);
            return true;
        }
        _ => {}
    }

    if asm.table.is_pseudo_op(&m) {
        return pseudo::handle_pass1(asm, line, &m);
    }

    if asm.table.is_instruction(&m) {
        let defs = asm.table.lookup(&m).map(<[_]>::to_vec).unwrap_or_default();
        let width = {
            let mut scratch = DiagnosticSink::new();
            let mut ev = Evaluator {
                symbols: &mut asm.symbols,
                state: &asm.state,
                micros: &asm.micros,
                sink: &mut scratch,
                line: number,
                suppress_undefined: true,
            };
            encoder::estimate_width(&mut ev, &defs, &operand)
        };
        log::trace!("L{}: {} estimated at {} bits", number, m, width);

        let pc = asm.state.pc;
        let force = match width {
            30 => pc != 0 && pc != 30,
            60 => pc != 0,
            _ => pc != 0 && pc + width > 60,
        };
        if force {
            asm.state.force_upper();
        }
        line.width_estimate = width;
        asm.state.advance(width);

        let base = asm.table.base_mnemonic(&m);
        if asm.state.pc != 0 && DEFERRED_FORCE_MNEMONICS.contains(&base.as_str()) {
            asm.state.deferred_force_pending = true;
        } else if asm.state.pc == 0 {
            asm.state.deferred_force_pending = false;
        }
        return true;
    }

    if asm.macros.contains_key(&m) {
        asm.sink.warning(
            number,
            Severity::Warning,
            format!("macro call '{}' sized as zero bits (expansion not supported)", m),
        );
        line.width_estimate = 0;
        return true;
    }

    asm.sink
        .error_once(number, Severity::Undefined, format!("unknown mnemonic '{}'", m));
    false
}
