//! Pseudo-operation semantics for both passes.
//!
//! Every directive is evaluated in both passes; Pass 1 sizes and
//! collects, Pass 2 additionally produces emission and listing
//! artifacts. Handlers report through the diagnostics sink and return
//! failure instead of unwinding, so the pass driver's loop always
//! continues to the next line.

use crate::charset::{CharSet, CodeMode};
use crate::diagnostics::Severity;
use crate::driver::Assembler;
use crate::expr::{fold_word, DisOperands, ExprError, Value};
use crate::lexer::SourceLine;
use crate::output::{ListingItem, OutputGenerator};
use crate::state::{NumberBase, ABSOLUTE_BLOCK};
use crate::symbols::{Symbol, SymbolKind};

fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 8
        && name.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
        && name.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Cut a to-end-of-line operand (TITLE, TTL) at the first blank
/// followed by `.` or `*`.
fn strip_eol_comment(text: &str) -> &str {
    let bytes = text.as_bytes();
    for i in 1..bytes.len() {
        if (bytes[i] == b'.' || bytes[i] == b'*') && bytes[i - 1] == b' ' {
            return text[..i - 1].trim_end();
        }
    }
    text.trim_end()
}

/// The IDENT word: the program name left-justified over ten display
/// code characters, blank filled.
pub fn program_name_word(name: &str) -> u64 {
    let blank = CharSet::Display.blank();
    let mut chars = name.chars();
    let mut word = 0u64;
    for _ in 0..10 {
        let code = chars
            .next()
            .map(|c| CharSet::Display.encode(c).unwrap_or(blank))
            .unwrap_or(blank);
        word = (word << 6) | u64::from(code);
    }
    word
}

/// Push/modify/pop the conditional stack for IF*/ELSE/ENDIF. The
/// condition itself is evaluated only while the enclosing context is
/// active.
pub fn handle_conditional(asm: &mut Assembler, line: &SourceLine, mnemonic: &str) -> bool {
    match mnemonic {
        "ELSE" => {
            if asm.state.conditionals.len() <= 1 {
                asm.sink
                    .error_once(line.number, Severity::Syntax, "ELSE without matching IF");
                return false;
            }
            let taken = asm.state.conditionals.pop().unwrap_or(false);
            let parent = asm.state.conditional_active();
            asm.state.conditionals.push(parent && !taken);
            true
        }
        "ENDIF" => {
            if asm.state.conditionals.len() <= 1 {
                asm.sink
                    .error_once(line.number, Severity::Syntax, "ENDIF without matching IF");
                return false;
            }
            asm.state.conditionals.pop();
            true
        }
        _ => {
            let active = asm.state.conditional_active();
            let condition = if active {
                let mut ev = asm.evaluator(line.number, false);
                crate::conditional::evaluate_condition(&mut ev, mnemonic, line.operand_str())
            } else {
                false
            };
            asm.state.conditionals.push(active && condition);
            true
        }
    }
}

fn define_from_expression(
    asm: &mut Assembler,
    line: &SourceLine,
    label: &str,
    value: Value,
    redefinable: bool,
) -> bool {
    let (kind, block, number) = if asm.state.lc_is_absolute {
        (SymbolKind::Absolute, None, value.number())
    } else {
        match value {
            Value::Relocatable(v, block) => (SymbolKind::Relocatable, Some(block), v),
            Value::External(v) => (SymbolKind::External, None, v),
            other => (SymbolKind::Absolute, None, other.number()),
        }
    };
    let symbol = Symbol {
        value: number,
        kind,
        block,
        redefinable,
        line: line.number,
        ..Symbol::absolute(0, line.number)
    };
    let qualifier = asm.state.qualifier.clone();
    asm.symbols
        .define(label, symbol, qualifier.as_deref(), &mut asm.sink)
}

/// Pass-1 semantics. Conditional directives are routed to
/// [`handle_conditional`] by the pass driver and never arrive here.
pub fn handle_pass1(asm: &mut Assembler, line: &SourceLine, mnemonic: &str) -> bool {
    let number = line.number;
    let operand = line.operand_str().to_string();
    let label = line.label.clone();

    match mnemonic {
        "QUAL" => {
            let name = operand.trim().to_ascii_uppercase();
            if name.is_empty() {
                asm.sink
                    .error_once(number, Severity::Syntax, "QUAL requires a name or *");
                return false;
            }
            if name == "*" {
                asm.state.qualifier = None;
            } else if valid_name(&name) {
                asm.state.qualifier = Some(name);
            } else {
                asm.sink.error_once(
                    number,
                    Severity::Syntax,
                    format!("invalid qualifier name '{}'", name),
                );
                return false;
            }
            true
        }
        "IDENT" => {
            let name = operand.trim().to_ascii_uppercase();
            if name.is_empty() {
                asm.sink
                    .error_once(number, Severity::Syntax, "IDENT requires a program name");
                return false;
            }
            if let Some(label) = &label {
                asm.sink.warning(
                    number,
                    Severity::Warning,
                    format!("label '{}' ignored on IDENT", label),
                );
            }
            let symbol = Symbol {
                program_name: true,
                ..Symbol::absolute(0, number)
            };
            if !asm.symbols.define(&name, symbol, None, &mut asm.sink) {
                return false;
            }
            if !asm.state.first_title_processed {
                asm.state.title = name;
                asm.state.first_title_processed = true;
            }
            true
        }
        "EQU" | "=" | "SET" => {
            if operand.trim() == "*" && mnemonic != "SET" {
                // EQU * is resolved by the line processor against the
                // deferred-force rules.
                return true;
            }
            let Some(label) = label else {
                asm.sink.error_once(
                    number,
                    Severity::Syntax,
                    format!("{} requires a label", mnemonic),
                );
                return false;
            };
            let value = {
                let mut ev = asm.evaluator(number, false);
                ev.evaluate(&operand)
            };
            match value {
                Ok(value) => {
                    define_from_expression(asm, line, &label, value, mnemonic == "SET")
                }
                Err(e) => {
                    asm.sink.error_once(
                        number,
                        Severity::Error,
                        format!("{} error: {}", mnemonic, e),
                    );
                    false
                }
            }
        }
        "LOC" => {
            let value = {
                let mut ev = asm.evaluator(number, false);
                ev.evaluate(&operand)
            };
            let target = match value {
                Ok(Value::Absolute(v)) if v >= 0 => v as u64,
                Ok(_) => {
                    asm.sink.error_once(
                        number,
                        Severity::Error,
                        "LOC operand must be a non-negative absolute value",
                    );
                    return false;
                }
                Err(e) => {
                    asm.sink
                        .error_once(number, Severity::Error, format!("LOC error: {}", e));
                    return false;
                }
            };
            asm.state.force_upper();
            asm.state.set_location(target, 0, true);
            if let Some(label) = &label {
                let symbol = Symbol {
                    defined_by_loc: true,
                    ..Symbol::absolute(target as i64, number)
                };
                let qualifier = asm.state.qualifier.clone();
                if !asm
                    .symbols
                    .define(label, symbol, qualifier.as_deref(), &mut asm.sink)
                {
                    return false;
                }
            }
            true
        }
        "DATA" | "CON" | "DIS" | "BSS" | "BSSZ" => {
            asm.state.force_upper();
            match estimate_size(asm, line, mnemonic) {
                Some(bits) => {
                    for _ in 0..bits / 60 {
                        asm.state.advance(60);
                    }
                    asm.state.advance((bits % 60) as u32);
                    true
                }
                None => false,
            }
        }
        "VFD" => {
            if label.as_deref() == Some("-") && asm.state.pc % 15 != 0 {
                let pad = 15 - asm.state.pc % 15;
                asm.state.advance(pad);
            }
            match estimate_size(asm, line, mnemonic) {
                Some(bits) => {
                    asm.state.advance(bits as u32);
                    true
                }
                None => false,
            }
        }
        "LIT" => {
            asm.state.force_upper();
            for item in operand.split(',') {
                let item = item.trim();
                if item.is_empty() {
                    continue;
                }
                let value = {
                    let mut ev = asm.evaluator(number, false);
                    ev.data_item(item)
                };
                match value {
                    Ok(value) if value.is_absolute() => {
                        asm.symbols.add_literal(fold_word(value.number()));
                    }
                    Ok(_) => {
                        asm.sink.error_once(
                            number,
                            Severity::Error,
                            format!("literal '{}' must be absolute", item),
                        );
                        return false;
                    }
                    Err(e) => {
                        asm.sink
                            .error_once(number, Severity::Error, format!("LIT error: {}", e));
                        return false;
                    }
                }
            }
            true
        }
        "BASE" | "CODE" => apply_base_or_code(asm, line, mnemonic).is_some(),
        "USE" => {
            let name = operand.trim().to_ascii_uppercase();
            if name.is_empty() {
                asm.sink
                    .error_once(number, Severity::Syntax, "USE requires a block name");
                return false;
            }
            asm.state.force_upper();
            let id = asm.state.blocks.intern(&name);
            asm.state.switch_block(id);
            true
        }
        "ABS" => {
            asm.state.force_upper();
            asm.state.switch_block(ABSOLUTE_BLOCK);
            true
        }
        "REL" => {
            asm.state.force_upper();
            let name = if operand.trim().is_empty() {
                "*REL*".to_string()
            } else {
                operand.trim().to_ascii_uppercase()
            };
            let id = asm.state.blocks.intern(&name);
            asm.state.switch_block(id);
            true
        }
        "LIST" | "NOLIST" => {
            asm.state
                .update_listing_flags(&operand, mnemonic == "LIST", number, &mut asm.sink);
            true
        }
        "TITLE" => {
            let text = strip_eol_comment(&operand).to_string();
            asm.state.title = text;
            asm.state.ttl_title.clear();
            asm.state.first_title_processed = true;
            true
        }
        "TTL" => {
            let text = strip_eol_comment(&operand).to_string();
            if !asm.state.first_title_processed {
                asm.state.title = text.clone();
            }
            asm.state.first_title_processed = true;
            asm.state.ttl_title = text;
            true
        }
        "END" | "ENDL" => {
            asm.state.end_seen = true;
            if let Some(label) = label {
                asm.end_label = Some(label);
            }
            let start = operand.trim().to_ascii_uppercase();
            if !start.is_empty() {
                asm.state.start_symbol = Some(start);
            }
            true
        }
        "SKIP" => {
            let value = {
                let mut ev = asm.evaluator(number, false);
                ev.evaluate(&operand)
            };
            match value {
                Ok(Value::Absolute(v)) if v >= 0 => {
                    asm.state.skip_count = v as u32;
                    true
                }
                _ => {
                    asm.sink.error_once(
                        number,
                        Severity::Error,
                        "SKIP requires a non-negative absolute count",
                    );
                    false
                }
            }
        }
        "ENTRY" | "EXT" => {
            // Recorded for the linker surface; nothing else to do.
            true
        }
        "SPACE" | "EJECT" | "COMMENT" | "FIN" | "NOREF" | "XREF" | "SEQ" | "MACHINE" | "CPU"
        | "PPU" | "CMU" | "CTEXT" | "ENDX" | "LOCAL" | "IRP" | "ENDD" | "PURGE" | "OPSYN"
        | "DECMIC" | "OCTMIC" | "ENDMIC" | "CPOP" | "CPSYN" | "ENTRYC" | "ERR" | "ERRMI"
        | "ERRNG" | "ERRNZ" | "ERRPL" | "ERRZR" | "LCC" | "NIL" | "NOLABEL" | "PURGDEF"
        | "PURGMAC" | "REP" | "REPC" | "REPI" | "R=" | "SEG" | "SEGMENT" | "SST" | "STEXT"
        | "STOPDUP" | "USELCM" | "POS" | "MAX" | "MIN" | "MICCNT" => true,
        _ => {
            asm.sink.warning(
                number,
                Severity::Warning,
                format!("pseudo-op '{}' not fully handled in Pass 1", mnemonic),
            );
            true
        }
    }
}

/// Change the base or code mode; the capture form `BASE name` first
/// defines `name` as a character-valued symbol holding the old mode.
fn apply_base_or_code(asm: &mut Assembler, line: &SourceLine, mnemonic: &str) -> Option<ListingItem> {
    let number = line.number;
    let operand = line.operand_str().trim().to_string();
    let is_base = mnemonic == "BASE";
    let old_letter = if is_base {
        asm.state.base.letter()
    } else {
        asm.state.code.letter()
    };

    let mut parts = operand.split_whitespace();
    let first = parts.next().unwrap_or("").to_ascii_uppercase();
    let second = parts.next().map(str::to_ascii_uppercase);

    let mode_letters: &[char] = if is_base {
        &['O', 'D', 'M', 'H', '*']
    } else {
        &['A', 'D', 'E', 'I', '*']
    };
    let is_mode = |s: &str| s.len() == 1 && mode_letters.contains(&s.chars().next().unwrap_or(' '));

    let (capture, mode_str) = if !first.is_empty() && valid_name(&first) && !is_mode(&first) {
        (Some(first), second)
    } else {
        (None, if first.is_empty() { None } else { Some(first) })
    };

    if let Some(name) = &capture {
        let symbol = Symbol {
            redefinable: true,
            char_value: Some(old_letter.to_string()),
            ..Symbol::absolute(0, number)
        };
        let qualifier = asm.state.qualifier.clone();
        if !asm
            .symbols
            .define(name, symbol, qualifier.as_deref(), &mut asm.sink)
        {
            return None;
        }
    }

    match &mode_str {
        Some(text) => {
            let letter = text.chars().next().unwrap_or(' ');
            if is_base {
                match letter {
                    '*' => asm.state.base = NumberBase::Decimal,
                    _ => match NumberBase::from_letter(letter) {
                        Some(base) => asm.state.base = base,
                        None => {
                            asm.sink.error_once(
                                number,
                                Severity::Value,
                                format!("invalid base '{}'", text),
                            );
                            return None;
                        }
                    },
                }
            } else if letter != '*' {
                match CodeMode::from_letter(letter) {
                    Some(code) => asm.state.code = code,
                    None => {
                        asm.sink.error_once(
                            number,
                            Severity::Value,
                            format!("invalid code '{}'", text),
                        );
                        return None;
                    }
                }
            }
        }
        None if capture.is_none() => {
            asm.sink.error_once(
                number,
                Severity::Syntax,
                format!("{} requires an operand", mnemonic),
            );
            return None;
        }
        None => {}
    }

    let new_letter = if is_base {
        asm.state.base.letter()
    } else {
        asm.state.code.letter()
    };
    Some(ListingItem::ModeChange(format!(
        "{}_{}",
        old_letter, new_letter
    )))
}

/// Pass-2 semantics. Returns the listing items for the line, or `None`
/// on failure (the line lists with an error code and no data).
pub fn handle_pass2(
    asm: &mut Assembler,
    out: &mut OutputGenerator<'_>,
    line: &SourceLine,
    mnemonic: &str,
) -> Option<Vec<ListingItem>> {
    let number = line.number;
    let operand = line.operand_str().to_string();
    let label = line.label.clone();

    match mnemonic {
        "QUAL" => {
            let name = operand.trim().to_ascii_uppercase();
            if name == "*" {
                asm.state.qualifier = None;
            } else if valid_name(&name) {
                asm.state.qualifier = Some(name);
            }
            Some(Vec::new())
        }
        "IDENT" => {
            let Some(name) = asm.symbols.program_name().map(str::to_string) else {
                asm.sink.error_once(
                    number,
                    Severity::Fatal,
                    "IDENT reached Pass 2 without a program name",
                );
                return Some(vec![ListingItem::Parcel(0, 60)]);
            };
            if !asm.state.first_title_processed {
                asm.state.title = name.clone();
                asm.state.first_title_processed = true;
            }
            Some(vec![ListingItem::Parcel(program_name_word(&name), 60)])
        }
        "EQU" | "=" => {
            if operand.trim() == "*" {
                let label = label.as_deref()?;
                let qualifier = asm.state.qualifier.clone();
                let entry = asm.symbols.lookup(label, qualifier.as_deref())?;
                let value = match (entry.kind, entry.block) {
                    (SymbolKind::Relocatable, Some(block)) if block != ABSOLUTE_BLOCK => {
                        entry.value + asm.state.blocks.base(block) as i64
                    }
                    _ => entry.value,
                };
                return Some(vec![ListingItem::EquStar(value)]);
            }
            let value = {
                let mut ev = asm.evaluator(number, false);
                ev.evaluate(&operand)
            };
            match value {
                Ok(value) => Some(vec![ListingItem::Value(value.number())]),
                Err(e) => {
                    asm.sink
                        .error_once(number, Severity::Error, format!("{} error: {}", mnemonic, e));
                    None
                }
            }
        }
        "SET" => {
            let value = {
                let mut ev = asm.evaluator(number, false);
                ev.evaluate(&operand)
            };
            match value {
                Ok(value) => Some(vec![ListingItem::Value(value.number())]),
                Err(e) => {
                    asm.sink
                        .error_once(number, Severity::Error, format!("SET error: {}", e));
                    None
                }
            }
        }
        "DATA" | "CON" => {
            force_word(asm, out);
            let mut items = Vec::new();
            for expr in operand.split(',') {
                let expr = expr.trim();
                if expr.is_empty() {
                    continue;
                }
                let value = {
                    let mut ev = asm.evaluator(number, false);
                    ev.data_item(expr)
                };
                let word = match value {
                    Ok(value) => {
                        if !value.is_absolute() && !matches!(value, Value::LiteralAddr(_)) {
                            asm.sink.warning(
                                number,
                                Severity::Relocation,
                                format!("{} value '{}' is not absolute", mnemonic, expr),
                            );
                        }
                        fold_word(value.number())
                    }
                    Err(e) => {
                        asm.sink.error_once(
                            number,
                            Severity::Error,
                            format!("{} item '{}': {}", mnemonic, expr, e),
                        );
                        0
                    }
                };
                items.push(ListingItem::Parcel(word, 60));
            }
            Some(items)
        }
        "DIS" => {
            force_word(asm, out);
            let parsed = {
                let mut ev = asm.evaluator(number, false);
                ev.parse_dis(&operand)
            };
            match parsed {
                Ok(parsed) => {
                    let words = {
                        let mut ev = asm.evaluator(number, false);
                        ev.generate_dis_words(&parsed)
                    };
                    Some(
                        words
                            .into_iter()
                            .map(|w| ListingItem::Parcel(w, 60))
                            .collect(),
                    )
                }
                Err(e) => {
                    asm.sink
                        .error_once(number, Severity::Error, format!("DIS error: {}", e));
                    Some(Vec::new())
                }
            }
        }
        "BSS" | "BSSZ" => {
            force_word(asm, out);
            let value = {
                let mut ev = asm.evaluator(number, false);
                ev.evaluate(&operand)
            };
            match value {
                Ok(Value::Absolute(n)) if n >= 0 => {
                    let n = n as u64;
                    if mnemonic == "BSSZ" {
                        for offset in 0..n {
                            out.add_word(asm.state.lc + offset, 0);
                        }
                    }
                    for _ in 0..n {
                        asm.state.advance(60);
                    }
                    Some(vec![ListingItem::Value(n as i64)])
                }
                Ok(_) => {
                    asm.sink.error_once(
                        number,
                        Severity::Error,
                        format!("{} requires a non-negative absolute count", mnemonic),
                    );
                    None
                }
                Err(e) => {
                    asm.sink
                        .error_once(number, Severity::Error, format!("{} error: {}", mnemonic, e));
                    None
                }
            }
        }
        "VFD" => {
            let mut items = Vec::new();
            if label.as_deref() == Some("-") && asm.state.pc % 15 != 0 {
                // Align to the next quarter-word; the pad bits are
                // zeros in the emitted word.
                let pad = 15 - asm.state.pc % 15;
                items.push(ListingItem::Parcel(0, pad));
            }
            let fields = generate_vfd_fields(asm, number, &operand)?;
            items.extend(fields);
            Some(items)
        }
        "LOC" => {
            let value = {
                let mut ev = asm.evaluator(number, false);
                ev.evaluate(&operand)
            };
            match value {
                Ok(Value::Absolute(v)) if v >= 0 => {
                    out.flush_word(true);
                    asm.state.set_location(v as u64, 0, true);
                    Some(Vec::new())
                }
                _ => {
                    asm.sink.error_once(
                        number,
                        Severity::Error,
                        "LOC operand must be a non-negative absolute value",
                    );
                    None
                }
            }
        }
        "BASE" | "CODE" => apply_base_or_code(asm, line, mnemonic).map(|item| vec![item]),
        "USE" => {
            let name = operand.trim().to_ascii_uppercase();
            if name.is_empty() {
                return None;
            }
            out.flush_word(true);
            let id = asm.state.blocks.intern(&name);
            asm.state.switch_block(id);
            Some(Vec::new())
        }
        "ABS" => {
            out.flush_word(true);
            asm.state.switch_block(ABSOLUTE_BLOCK);
            Some(Vec::new())
        }
        "REL" => {
            out.flush_word(true);
            let name = if operand.trim().is_empty() {
                "*REL*".to_string()
            } else {
                operand.trim().to_ascii_uppercase()
            };
            let id = asm.state.blocks.intern(&name);
            asm.state.switch_block(id);
            Some(Vec::new())
        }
        "SKIP" => {
            let value = {
                let mut ev = asm.evaluator(number, false);
                ev.evaluate(&operand)
            };
            match value {
                Ok(Value::Absolute(v)) if v >= 0 => {
                    asm.state.skip_count = v as u32;
                    Some(Vec::new())
                }
                _ => {
                    asm.sink.error_once(
                        number,
                        Severity::Error,
                        "SKIP requires a non-negative absolute count",
                    );
                    None
                }
            }
        }
        "SPACE" => {
            let mut counts = Vec::new();
            if operand.trim().is_empty() {
                counts.push(ListingItem::Space(1));
            } else {
                for part in operand.split(',') {
                    let part = part.trim();
                    if part.is_empty() {
                        counts.push(ListingItem::Space(1));
                        continue;
                    }
                    let value = {
                        let mut ev = asm.evaluator(number, false);
                        ev.evaluate(part)
                    };
                    match value {
                        Ok(Value::Absolute(v)) if v >= 0 => {
                            counts.push(ListingItem::Space(v.max(1) as u32));
                        }
                        _ => {
                            asm.sink.error_once(
                                number,
                                Severity::Error,
                                format!("SPACE count '{}' must be absolute", part),
                            );
                            return None;
                        }
                    }
                }
            }
            Some(counts)
        }
        "TITLE" => {
            let text = strip_eol_comment(&operand).to_string();
            if asm.state.first_title_processed {
                out.force_page_break();
            }
            asm.state.first_title_processed = true;
            asm.state.title = text;
            asm.state.ttl_title.clear();
            Some(Vec::new())
        }
        "TTL" => {
            let text = strip_eol_comment(&operand).to_string();
            if !asm.state.first_title_processed {
                asm.state.title = text.clone();
            }
            asm.state.first_title_processed = true;
            asm.state.ttl_title = text;
            out.force_page_break();
            Some(Vec::new())
        }
        "EJECT" => {
            out.force_page_break();
            Some(Vec::new())
        }
        "LIST" | "NOLIST" => {
            asm.state
                .update_listing_flags(&operand, mnemonic == "LIST", number, &mut asm.sink);
            Some(Vec::new())
        }
        "END" | "ENDL" => {
            asm.state.end_seen = true;
            let start = operand.trim().to_ascii_uppercase();
            if !start.is_empty() {
                let qualifier = asm.state.qualifier.clone();
                let address = asm.symbols.lookup(&start, qualifier.as_deref()).map(|s| {
                    match (s.kind, s.block) {
                        (SymbolKind::Relocatable, Some(block)) if block != ABSOLUTE_BLOCK => {
                            (s.value + asm.state.blocks.base(block) as i64) as u64
                        }
                        _ => s.value as u64,
                    }
                });
                asm.state.start_symbol = Some(start);
                asm.state.start_address = Some(address.unwrap_or(0));
            } else if let Some(name) = asm.symbols.program_name() {
                asm.state.start_symbol = Some(name.to_string());
                asm.state.start_address = Some(0);
            }
            Some(Vec::new())
        }
        "LIT" | "ENTRY" | "EXT" | "COMMENT" | "FIN" | "NOREF" | "XREF" | "SEQ" | "MACHINE"
        | "CPU" | "PPU" | "CMU" | "CTEXT" | "ENDX" | "LOCAL" | "IRP" | "ENDD" | "PURGE"
        | "OPSYN" | "DECMIC" | "OCTMIC" | "ENDMIC" | "CPOP" | "CPSYN" | "ENTRYC" | "ERR"
        | "ERRMI" | "ERRNG" | "ERRNZ" | "ERRPL" | "ERRZR" | "LCC" | "NIL" | "NOLABEL"
        | "PURGDEF" | "PURGMAC" | "REP" | "REPC" | "REPI" | "R=" | "SEG" | "SEGMENT" | "SST"
        | "STEXT" | "STOPDUP" | "USELCM" | "POS" | "MAX" | "MIN" | "MICCNT" => Some(Vec::new()),
        _ => {
            asm.sink.warning(
                number,
                Severity::Warning,
                format!("pseudo-op '{}' not fully handled in Pass 2", mnemonic),
            );
            Some(Vec::new())
        }
    }
}

/// Complete the current word in both the state and the binary buffer.
pub fn force_word(asm: &mut Assembler, out: &mut OutputGenerator<'_>) {
    if asm.state.pc != 0 {
        out.flush_word(true);
        asm.state.force_upper();
    }
    asm.state.deferred_force_pending = false;
}

fn generate_vfd_fields(
    asm: &mut Assembler,
    number: usize,
    operand: &str,
) -> Option<Vec<ListingItem>> {
    let mut items = Vec::new();
    for field in operand.split(',') {
        let field = field.trim();
        if field.is_empty() {
            continue;
        }
        let Some(slash) = field.find('/') else {
            asm.sink.error_once(
                number,
                Severity::Syntax,
                format!("invalid VFD field '{}'", field),
            );
            return None;
        };
        let (width_text, value_text) = (field[..slash].trim(), field[slash + 1..].trim());

        let width = {
            let mut ev = asm.evaluator(number, false);
            ev.evaluate(width_text)
        };
        let width = match width {
            Ok(Value::Absolute(w)) if (1..=60).contains(&w) => w as u32,
            _ => {
                asm.sink.error_once(
                    number,
                    Severity::Value,
                    format!("VFD width '{}' must be an absolute 1..60", width_text),
                );
                return None;
            }
        };

        let value = {
            let mut ev = asm.evaluator(number, false);
            ev.evaluate(value_text)
        };
        let value = match value {
            Ok(value) => value,
            Err(e) => {
                asm.sink.error_once(
                    number,
                    Severity::Error,
                    format!("VFD value '{}': {}", value_text, e),
                );
                return None;
            }
        };
        let number_value = match value {
            Value::Relocatable(v, block) => v + asm.state.blocks.base(block) as i64,
            other => other.number(),
        };

        let mask = if width >= 60 {
            (1u64 << 60) - 1
        } else {
            (1u64 << width) - 1
        };
        let field_value = if number_value < 0 {
            if number_value.unsigned_abs() > (mask >> 1) && width < 60 {
                asm.sink.warning(
                    number,
                    Severity::Value,
                    format!("negative VFD value {} may overflow width {}", number_value, width),
                );
            }
            !number_value.unsigned_abs() & mask
        } else {
            if number_value as u64 > mask {
                asm.sink.warning(
                    number,
                    Severity::Value,
                    format!("VFD value {:o} exceeds width {}, truncated", number_value, width),
                );
            }
            number_value as u64 & mask
        };
        items.push(ListingItem::Parcel(field_value, width));
    }
    Some(items)
}

/// Size estimation shared by the Pass-1 handlers; runs with
/// suppressed-undefined evaluation and returns bits, or `None` when
/// the size cannot be determined (a hard error).
pub fn estimate_size(asm: &mut Assembler, line: &SourceLine, mnemonic: &str) -> Option<u64> {
    let number = line.number;
    let operand = line.operand_str().to_string();

    match mnemonic {
        "DIS" => {
            let parsed = {
                let mut ev = asm.evaluator(number, true);
                ev.parse_dis(&operand)
            };
            let parsed = match parsed {
                Ok(parsed) => parsed,
                Err(ExprError::Undefined(name)) => {
                    asm.sink.error_once(
                        number,
                        Severity::Undefined,
                        format!("cannot size DIS: '{}' is undefined", name),
                    );
                    return None;
                }
                Err(e) => {
                    asm.sink
                        .error_once(number, Severity::Error, format!("DIS error: {}", e));
                    return None;
                }
            };
            let words = match &parsed {
                DisOperands::Words { n: 0, text } => sized_words(text),
                DisOperands::Words { n, .. } => *n,
                DisOperands::Delimited { text } => sized_words(text),
                DisOperands::MicroName { n, name } => match asm.micros.get(name) {
                    Some(text) if *n == 0 => sized_words(text),
                    Some(_) => *n,
                    None => {
                        asm.sink.warning(
                            number,
                            Severity::Warning,
                            format!("micro '%{}%' for DIS not defined yet, sizing as 0", name),
                        );
                        0
                    }
                },
            };
            Some(words * 60)
        }
        "DATA" | "CON" => {
            let count = operand.split(',').filter(|s| !s.trim().is_empty()).count();
            Some(count as u64 * 60)
        }
        "VFD" => {
            let mut bits = 0u64;
            for field in operand.split(',') {
                let field = field.trim();
                if field.is_empty() {
                    continue;
                }
                let Some(slash) = field.find('/') else {
                    asm.sink.error_once(
                        number,
                        Severity::Syntax,
                        format!("invalid VFD field '{}'", field),
                    );
                    return None;
                };
                let width = {
                    let mut ev = asm.evaluator(number, true);
                    ev.evaluate(field[..slash].trim())
                };
                match width {
                    Ok(Value::Absolute(w)) if (1..=60).contains(&w) => bits += w as u64,
                    Ok(_) => {
                        asm.sink.error_once(
                            number,
                            Severity::Value,
                            format!("VFD width '{}' must be an absolute 1..60", field),
                        );
                        return None;
                    }
                    Err(ExprError::Undefined(name)) => {
                        asm.sink.error_once(
                            number,
                            Severity::Undefined,
                            format!("cannot size VFD: width symbol '{}' is undefined", name),
                        );
                        return None;
                    }
                    Err(e) => {
                        asm.sink
                            .error_once(number, Severity::Error, format!("VFD error: {}", e));
                        return None;
                    }
                }
            }
            Some(bits)
        }
        "BSS" | "BSSZ" => {
            let value = {
                let mut ev = asm.evaluator(number, true);
                ev.evaluate(&operand)
            };
            match value {
                Ok(Value::Absolute(v)) if v >= 0 => Some(v as u64 * 60),
                Ok(_) => {
                    asm.sink.error_once(
                        number,
                        Severity::Error,
                        format!("{} requires a non-negative absolute count", mnemonic),
                    );
                    None
                }
                Err(ExprError::Undefined(name)) => {
                    asm.sink.error_once(
                        number,
                        Severity::Undefined,
                        format!("cannot size {}: '{}' is undefined", mnemonic, name),
                    );
                    None
                }
                Err(e) => {
                    asm.sink
                        .error_once(number, Severity::Error, format!("{} error: {}", mnemonic, e));
                    None
                }
            }
        }
        _ => Some(0),
    }
}

/// Words needed to hold a string plus its two 6-bit terminators.
fn sized_words(text: &str) -> u64 {
    (text.chars().count() as u64 + 2).div_ceil(10)
}
