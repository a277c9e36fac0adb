//! Pass 2: replay the state transitions of Pass 1 and emit parcels,
//! binary words and listing rows.
//!
//! The counters are absolute here (the pass starts past the literal
//! pool, and block switches jump to block bases). For every line the
//! state transitions resolve first; parcel emission follows strictly
//! after.

use crate::diagnostics::Severity;
use crate::driver::Assembler;
use crate::encoder;
use crate::lexer::SourceLine;
use crate::output::{ListingItem, OutputGenerator};
use crate::pass1::{label_defined_by_pseudo, DEFERRED_FORCE_MNEMONICS};
use crate::pseudo::{self, force_word};
use crate::state::Capture;

pub fn process_line(
    asm: &mut Assembler,
    out: &mut OutputGenerator<'_>,
    line: &SourceLine,
) -> bool {
    let number = line.number;
    let mnemonic = line.opcode_upper();
    let operand = line.operand_str().to_string();
    let label = line.label.clone();
    let source = line.text.as_str();

    let lc_start = asm.state.lc;
    let pc_start = asm.state.pc;
    let deferred_pending = asm.state.deferred_force_pending;

    let is_equ_star = mnemonic.as_deref() == Some("EQU") && operand.trim() == "*";
    let negating = line.has_negating_label();

    // Remote-block definitions were captured in Pass 1; here the body
    // lines only appear in the listing.
    if asm.state.remote_capture.is_some() {
        match mnemonic.as_deref() {
            Some("RMT") if operand.trim().is_empty() => asm.state.remote_capture = None,
            Some("END") => asm.state.remote_capture = None,
            _ => {
                let code = asm.sink.code_for_line(number);
                out.write_line(None, 0, None, source, code, true, &mut asm.state, None);
                return true;
            }
        }
        let code = asm.sink.code_for_line(number);
        out.write_line(
            None,
            0,
            None,
            source,
            code,
            false,
            &mut asm.state,
            mnemonic.as_deref(),
        );
        return true;
    }

    if asm.state.capture.is_some() {
        if mnemonic.as_deref() == Some("ENDM") {
            asm.state.capture = None;
            asm.state.capture_name = None;
        }
        let code = asm.sink.code_for_line(number);
        out.write_line(
            None,
            0,
            None,
            source,
            code,
            false,
            &mut asm.state,
            mnemonic.as_deref(),
        );
        return true;
    }
    if matches!(mnemonic.as_deref(), Some("MACRO") | Some("OPDEF")) {
        asm.state.capture = Some(if mnemonic.as_deref() == Some("MACRO") {
            Capture::Macro
        } else {
            Capture::Opdef
        });
        let code = asm.sink.code_for_line(number);
        out.write_line(
            None,
            0,
            None,
            source,
            code,
            false,
            &mut asm.state,
            mnemonic.as_deref(),
        );
        return true;
    }
    if mnemonic.as_deref() == Some("MICRO") {
        let code = asm.sink.code_for_line(number);
        out.write_line(None, 0, None, source, code, false, &mut asm.state, Some("MICRO"));
        return true;
    }

    if asm.state.skip_count > 0 && !line.is_comment && mnemonic.as_deref() != Some("SKIP") {
        asm.state.skip_count -= 1;
        let code = asm.sink.code_for_line(number);
        out.write_line(
            Some(lc_start),
            pc_start,
            None,
            source,
            code,
            true,
            &mut asm.state,
            mnemonic.as_deref(),
        );
        return true;
    }

    if mnemonic.as_deref() == Some("RMT") {
        let name = operand.trim().to_ascii_uppercase();
        if !name.is_empty() {
            asm.state.remote_capture = Some(name);
        }
        let code = asm.sink.code_for_line(number);
        out.write_line(None, 0, None, source, code, false, &mut asm.state, Some("RMT"));
        return true;
    }

    // Deferred force from the previous line (see Pass 1).
    if deferred_pending {
        if negating {
            asm.state.deferred_force_pending = false;
        } else if !is_equ_star {
            force_word(asm, out);
        }
    }

    if line.is_comment {
        let code = asm.sink.code_for_line(number);
        out.write_line(None, 0, None, source, code, false, &mut asm.state, None);
        return true;
    }

    if is_equ_star {
        let items = pseudo::handle_pass2(asm, out, line, "EQU");
        let code = asm.sink.code_for_line(number);
        out.write_line(
            None,
            0,
            items.as_deref(),
            source,
            code,
            false,
            &mut asm.state,
            Some("EQU"),
        );
        if deferred_pending && !negating {
            asm.state.lc = lc_start;
            asm.state.pc = pc_start;
            force_word(asm, out);
        }
        return true;
    }

    let is_conditional = mnemonic
        .as_deref()
        .is_some_and(|m| m.starts_with("IF") || m == "ELSE" || m == "ENDIF");
    if is_conditional {
        let m = mnemonic.as_deref().unwrap_or("");
        pseudo::handle_conditional(asm, line, m);
        let code = asm.sink.code_for_line(number);
        out.write_line(
            Some(asm.state.lc),
            asm.state.pc,
            None,
            source,
            code,
            false,
            &mut asm.state,
            mnemonic.as_deref(),
        );
        return true;
    }

    if !asm.state.conditional_active() {
        let code = asm.sink.code_for_line(number);
        out.write_line(
            Some(asm.state.lc),
            asm.state.pc,
            None,
            source,
            code,
            true,
            &mut asm.state,
            mnemonic.as_deref(),
        );
        return true;
    }

    if mnemonic.as_deref() == Some("HERE") {
        let name = operand.trim().to_ascii_uppercase();
        let stored = if name.is_empty() {
            None
        } else {
            asm.remotes.get(&name).cloned()
        };
        let code = asm
            .sink
            .code_for_line(number)
            .or(if stored.is_none() { Some('U') } else { None });
        out.write_line(
            Some(asm.state.lc),
            asm.state.pc,
            None,
            source,
            code,
            false,
            &mut asm.state,
            Some("HERE"),
        );
        if let Some(stored) = stored {
            for remote in &stored {
                if !process_line(asm, out, remote) {
                    return false;
                }
            }
        }
        return true;
    }

    // Label alignment: `+` and plain labels complete the current word.
    if let Some(name) = &label {
        let plain = name != "+" && name != "-";
        let by_pseudo = mnemonic.as_deref().is_some_and(label_defined_by_pseudo);
        if (plain && !by_pseudo) || name == "+" {
            force_word(asm, out);
        }
    }

    // Pre-alignment for instructions, from the Pass-1 width estimate.
    let is_instruction = mnemonic
        .as_deref()
        .is_some_and(|m| asm.table.is_instruction(m));
    if is_instruction {
        let width = line.width_estimate;
        let pc = asm.state.pc;
        let force = match width {
            30 => pc != 0 && pc != 30,
            60 => pc != 0,
            0 => false,
            _ => pc != 0 && pc + width > 60,
        };
        if force {
            force_word(asm, out);
        }
    }

    let mut lc_print = Some(asm.state.lc);
    let mut pc_print = asm.state.pc;
    let mut items: Option<Vec<ListingItem>> = None;
    let mut emit_items = false;

    match mnemonic.as_deref() {
        Some(m) if asm.table.is_pseudo_op(m) => {
            items = pseudo::handle_pass2(asm, out, line, m);
            match m {
                "LOC" => {
                    lc_print = Some(asm.state.lc);
                    pc_print = 0;
                }
                "BSS" | "BSSZ" | "END" => {
                    pc_print = 0;
                }
                "ENDL" => {
                    lc_print = Some(asm.endl_value);
                    pc_print = 0;
                }
                "BASE" | "CODE" | "EQU" | "=" | "SET" => {
                    lc_print = None;
                }
                "DATA" | "CON" | "DIS" | "VFD" => {
                    // The handler may have forced a word boundary.
                    lc_print = Some(asm.state.lc);
                    pc_print = asm.state.pc;
                    emit_items = true;
                }
                _ => {}
            }
            if items.is_none() && !asm.sink.has_error_on_line(number) {
                asm.sink.error_once(
                    number,
                    Severity::Assembly,
                    format!("{} failed in Pass 2", m),
                );
            }
        }
        Some(m) if is_instruction => {
            let parcels = {
                let mut ev = crate::expr::Evaluator {
                    symbols: &mut asm.symbols,
                    state: &asm.state,
                    micros: &asm.micros,
                    sink: &mut asm.sink,
                    line: number,
                    suppress_undefined: false,
                };
                encoder::assemble(&mut ev, &asm.table, m, &operand)
            };
            match parcels {
                Some(parcels) => {
                    items = Some(
                        parcels
                            .iter()
                            .map(|p| ListingItem::Parcel(p.value, p.width))
                            .collect(),
                    );
                    emit_items = true;
                }
                None => {
                    // Keep the counters moving so later lines agree
                    // with Pass 1.
                    let width = line.width_estimate;
                    if width > 0 {
                        if asm.state.pc != 0 && asm.state.pc + width > 60 {
                            force_word(asm, out);
                        }
                        asm.state.advance(width);
                    }
                    items = Some(Vec::new());
                }
            }
        }
        Some(m) if asm.macros.contains_key(m) => {
            items = Some(Vec::new());
        }
        Some(m) => {
            asm.sink
                .error_once(number, Severity::Undefined, format!("unknown mnemonic '{}'", m));
            let width = line.width_estimate.max(15);
            asm.state.advance(width);
            items = Some(Vec::new());
        }
        None => {
            if label.is_none()
                && !operand.is_empty()
                && !operand.starts_with('.')
                && !operand.starts_with('*')
            {
                asm.sink
                    .error_once(number, Severity::Syntax, "missing mnemonic");
            }
            items = Some(Vec::new());
        }
    }

    // Emit parcels strictly after the line's state transitions.
    if emit_items {
        if let Some(items) = &items {
            for item in items {
                let Some((value, width)) = item.parcel() else {
                    continue;
                };
                if asm.state.pc != 0 && asm.state.pc + width > 60 {
                    force_word(asm, out);
                }
                out.add_parcel(asm.state.lc, value, width);
                asm.state.advance(width);
            }
        }
    }

    let code = asm.sink.code_for_line(number);
    out.write_line(
        lc_print,
        pc_print,
        items.as_deref(),
        source,
        code,
        false,
        &mut asm.state,
        mnemonic.as_deref(),
    );

    // SPACE inserts its blank lines right after its own listing row.
    if let Some(items) = &items {
        for item in items {
            if let ListingItem::Space(count) = item {
                out.add_blank_lines(*count, &mut asm.state);
            }
        }
    }

    // Arm or clear the deferred force, exactly as Pass 1 did.
    if is_instruction {
        let base = asm
            .table
            .base_mnemonic(mnemonic.as_deref().unwrap_or(""));
        if asm.state.pc != 0 && DEFERRED_FORCE_MNEMONICS.contains(&base.as_str()) {
            asm.state.deferred_force_pending = true;
        } else if asm.state.pc == 0 {
            asm.state.deferred_force_pending = false;
        }
    }
    true
}
