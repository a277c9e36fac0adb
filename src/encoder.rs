//! Instruction width resolution and parcel assembly.
//!
//! A mnemonic may carry several definitions of different widths; each
//! candidate is tried shortest first, except that a 15-bit parse whose
//! operand shape is an address-like K defers to a 30-bit definition
//! when one exists. The chosen definition then drives the per-mnemonic
//! bit-field assignment.
//!
//! 15-bit parcel: `f3:3 m3:3 i:3 j:3 k:3`. 30-bit parcel:
//! `f:6 m:3 j:3 K:18`, negative K one's-complemented into the field.

use crate::diagnostics::Severity;
use crate::expr::{Evaluator, Value};
use crate::instructions::{InstructionDef, InstructionTable};
use crate::operand::{parse_operands, OperandError, Operands};
use crate::state::Pass;

/// The 15-bit no-operation parcel used for padding.
pub const NOOP_PARCEL: u64 = 0o46000;
const MASK_18: u64 = (1 << 18) - 1;

/// One encoded instruction fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Parcel {
    pub value: u64,
    pub width: u32,
}

/// Mnemonics whose map bits are a 9-bit G-H-I group split into F and M.
fn is_ghi_mnemonic(base: &str) -> bool {
    matches!(
        base,
        "RJ" | "RE" | "WE" | "XJ" | "ZR" | "NZ" | "PL" | "NG" | "IR" | "OR" | "DF" | "ID"
    )
}

/// Does a canonical parsed format describe an address-like K field?
fn implies_k_field(format: &str) -> bool {
    format == "K"
        || format.ends_with(",K")
        || format.ends_with("+K")
        || format.ends_with("-K")
        || (format.starts_with('-') && format.ends_with('J') && !format.starts_with("-X"))
}

/// The operand shapes a 15-bit definition legitimately owns even when
/// they look K-like.
fn is_register_form(format: &str) -> bool {
    let chars: Vec<char> = format.chars().collect();
    let family = |c: char| matches!(c, 'A' | 'B' | 'X');
    let operator = |c: char| matches!(c, '+' | '-' | '*' | '/');
    match chars.len() {
        2 => family(chars[0]) && (chars[1] == 'J' || chars[1].is_ascii_digit()),
        3 => format == "-XK",
        5 => {
            family(chars[0])
                && chars[1] == 'J'
                && (chars[2] == ',' || operator(chars[2]))
                && family(chars[3])
                && chars[4] == 'K'
        }
        6 => {
            chars[0] == '-'
                && family(chars[1])
                && chars[2] == 'K'
                && operator(chars[3])
                && family(chars[4])
                && chars[5] == 'J'
        }
        _ => format == "JK",
    }
}

/// Estimate the width of an instruction for Pass-1 sizing. The
/// evaluator should carry a scratch sink and `suppress_undefined`, so
/// speculation never pollutes the diagnostics.
pub fn estimate_width(ev: &mut Evaluator<'_>, defs: &[InstructionDef], operand: &str) -> u32 {
    fn try_width(
        ev: &mut Evaluator<'_>,
        defs: &[InstructionDef],
        operand: &str,
        width: u32,
    ) -> Option<Operands> {
        defs.iter()
            .filter(|d| d.width == width)
            .find_map(|d| parse_operands(ev, operand, &d.format).ok())
    }

    let fifteen = try_width(ev, defs, operand, 15);
    let has_30 = defs.iter().any(|d| d.width == 30);

    if let Some(parsed) = &fifteen {
        let address_like = implies_k_field(&parsed.format) && parsed.format != "JK";
        if address_like
            && !is_register_form(&parsed.format)
            && has_30
            && try_width(ev, defs, operand, 30).is_some()
        {
            return 30;
        }
        return 15;
    }
    if try_width(ev, defs, operand, 30).is_some() {
        return 30;
    }
    if try_width(ev, defs, operand, 60).is_some() {
        return 60;
    }
    defs.first().map(|d| d.width).unwrap_or(15)
}

/// Assemble one instruction into parcels. Failures are reported to the
/// evaluator's sink and yield `None`; the caller keeps the counters
/// moving with the Pass-1 width estimate.
pub fn assemble(
    ev: &mut Evaluator<'_>,
    table: &InstructionTable,
    mnemonic: &str,
    operand: &str,
) -> Option<Vec<Parcel>> {
    let line = ev.line;
    let defs = table.lookup(mnemonic)?;
    let mut sorted: Vec<&InstructionDef> = defs.iter().collect();
    sorted.sort_by_key(|d| d.width);

    let mut chosen: Option<(&InstructionDef, Operands)> = None;
    let mut last_error: Option<OperandError> = None;
    for def in &sorted {
        match parse_operands(ev, operand, &def.format) {
            Ok(parsed) => {
                if sorted.len() > 1 && def.width == 15 {
                    let address_like = implies_k_field(&parsed.format) && parsed.format != "JK";
                    let has_30 = sorted.iter().any(|d| d.width == 30);
                    if address_like && !is_register_form(&parsed.format) && has_30 {
                        last_error = Some(OperandError(
                            "operand implies an address field".to_string(),
                        ));
                        continue;
                    }
                }
                chosen = Some((def, parsed));
                break;
            }
            Err(e) => {
                last_error = Some(e);
            }
        }
    }

    let Some((def, ops)) = chosen else {
        let mut message = format!(
            "operands '{}' do not match any format for {}",
            operand, mnemonic
        );
        if let Some(e) = last_error {
            message = format!("{}: {}", message, e);
        }
        ev.sink.error_once(line, Severity::Operand, message);
        return None;
    };

    let base = table.base_mnemonic(mnemonic);
    let i_reg = table.pattern_index(mnemonic);
    let result = match def.width {
        15 => encode_15(ev, def, &base, i_reg, &ops),
        30 => encode_30(ev, def, &base, i_reg, operand, &ops),
        _ => {
            ev.sink.warning(
                line,
                Severity::Warning,
                format!("60-bit instruction {} generates a placeholder", mnemonic),
            );
            Ok(vec![Parcel {
                value: u64::from(def.bits),
                width: 60,
            }])
        }
    };
    match result {
        Ok(parcels) => Some(parcels),
        Err(OperandError(message)) => {
            ev.sink.error_once(
                line,
                Severity::Assembly,
                format!("assembling {} {}: {}", mnemonic, operand, message),
            );
            None
        }
    }
}

fn single_register(format: &str) -> Option<char> {
    let chars: Vec<char> = format.chars().collect();
    if chars.len() == 2 && matches!(chars[0], 'A' | 'B' | 'X') && chars[1].is_ascii_digit() {
        Some(chars[0])
    } else {
        None
    }
}

fn encode_15(
    ev: &mut Evaluator<'_>,
    def: &InstructionDef,
    base: &str,
    i_reg: u8,
    ops: &Operands,
) -> Result<Vec<Parcel>, OperandError> {
    let format = ops.format.as_str();
    let mut f3 = (def.bits >> 12) & 7;
    let mut m3 = (def.bits >> 9) & 7;
    let i = u32::from(i_reg);
    let mut j = u32::from(ops.j.unwrap_or(0));
    let mut k = u32::from(ops.k.unwrap_or(0));

    let bad = |message: String| -> Result<Vec<Parcel>, OperandError> { Err(OperandError(message)) };

    match base {
        "BX" => {
            f3 = 1;
            match format {
                "XJ*XK" => m3 = 1,
                "XJ+XK" => m3 = 2,
                "XJ-XK" => m3 = 3,
                "-XK" => {
                    m3 = 4;
                    j = k;
                }
                "-XK*XJ" => m3 = 5,
                "-XK+XJ" => m3 = 6,
                "-XK-XJ" => m3 = 7,
                // A lone Xj transmits it: Bxi Xj.
                "XJ" => {
                    m3 = 0;
                    k = j;
                }
                _ if single_register(format) == Some('X') => {
                    m3 = 0;
                    k = j;
                }
                _ => return bad(format!("unexpected form '{}' for BX", format)),
            }
        }
        "FX" | "RX" | "DX" | "IX" => {
            let op = if format == "XJ" || single_register(format) == Some('X') {
                k = j;
                // The reduced single-register form takes the operator
                // from the definition's format hint.
                def.format
                    .chars()
                    .find(|c| matches!(c, '+' | '-' | '*' | '/'))
                    .unwrap_or('*')
            } else {
                ops.op
                    .ok_or_else(|| OperandError(format!("missing operator for {}", base)))?
            };
            let pair = match (base, op) {
                ("FX", '+') => (3, 0),
                ("FX", '-') => (3, 1),
                ("FX", '*') => (4, 0),
                ("FX", '/') => (4, 4),
                ("RX", '+') => (3, 4),
                ("RX", '-') => (3, 5),
                ("RX", '*') => (4, 1),
                ("RX", '/') => (4, 5),
                ("DX", '+') => (3, 2),
                ("DX", '-') => (3, 3),
                ("DX", '*') => (4, 2),
                ("IX", '+') => (3, 6),
                ("IX", '-') => (3, 7),
                ("IX", '*') => (3, 6),
                _ => return bad(format!("invalid operator '{}' for {}", op, base)),
            };
            f3 = pair.0;
            m3 = pair.1;
        }
        "LX" | "AX" => {
            f3 = 2;
            match format {
                "BJ,XK" => m3 = if base == "LX" { 2 } else { 3 },
                "XK" => {
                    m3 = if base == "LX" { 2 } else { 3 };
                    j = 0;
                }
                "JK" => {
                    m3 = if base == "LX" { 0 } else { 1 };
                    let jk = (ops.jk.unwrap_or(0) & 0o77) as u32;
                    j = (jk >> 3) & 7;
                    k = jk & 7;
                }
                _ => return bad(format!("unexpected form '{}' for {}", format, base)),
            }
        }
        "NX" | "ZX" | "UX" | "PX" => {
            f3 = 2;
            m3 = match base {
                "NX" => 4,
                "ZX" => 5,
                "UX" => 6,
                _ => 7,
            };
            match format {
                "BJ,XK" => {}
                "XJ,BK" => std::mem::swap(&mut j, &mut k),
                "XK" => j = 0,
                _ => return bad(format!("unexpected form '{}' for {}", format, base)),
            }
        }
        "MX" => {
            f3 = 4;
            m3 = 3;
            if format != "JK" {
                return bad(format!("unexpected form '{}' for MX", format));
            }
            let jk = (ops.jk.unwrap_or(0) & 0o77) as u32;
            j = (jk >> 3) & 7;
            k = jk & 7;
        }
        "CX" => {
            f3 = 4;
            m3 = 7;
            if single_register(format) != Some('X') {
                return bad(format!("unexpected form '{}' for CX", format));
            }
            let reg = u32::from(ops.k.or(ops.j).unwrap_or(0));
            j = reg;
            k = reg;
        }
        "SA" | "SB" | "SX" => {
            f3 = match base {
                "SA" => 5,
                "SB" => 6,
                _ => 7,
            };
            if let Some(family) = single_register(format) {
                m3 = match family {
                    'A' => 4,
                    'B' => 6,
                    'X' => 3,
                    _ => return bad(format!("invalid register family for {}", base)),
                };
                k = 0;
            } else if format.len() == 5 && format.ends_with("BK") {
                let family = format.chars().next().unwrap_or(' ');
                let op = ops.op.unwrap_or(' ');
                m3 = match (family, op) {
                    ('X', '+') => 3,
                    ('A', '+') => 4,
                    ('A', '-') => 5,
                    ('B', '+') => 6,
                    ('B', '-') => 7,
                    _ => return bad(format!("invalid form {} {} for {}", family, op, base)),
                };
            } else {
                return bad(format!("unexpected form '{}' for 15-bit {}", format, base));
            }
        }
        "NO" => {
            f3 = 4;
            m3 = 6;
            j = 0;
            k = 0;
        }
        _ => return bad(format!("no 15-bit encoding logic for '{}'", base)),
    }

    if f3 > 7 || m3 > 7 || i > 7 || j > 7 || k > 7 {
        ev.sink.error_once(
            ev.line,
            Severity::Fatal,
            format!(
                "internal: bad 15-bit fields f={} m={} i={} j={} k={}",
                f3, m3, i, j, k
            ),
        );
        return Ok(vec![Parcel {
            value: NOOP_PARCEL,
            width: 15,
        }]);
    }
    let value =
        u64::from(f3) << 12 | u64::from(m3) << 9 | u64::from(i) << 6 | u64::from(j) << 3 | u64::from(k);
    Ok(vec![Parcel { value, width: 15 }])
}

fn encode_30(
    ev: &mut Evaluator<'_>,
    def: &InstructionDef,
    base: &str,
    i_reg: u8,
    operand: &str,
    ops: &Operands,
) -> Result<Vec<Parcel>, OperandError> {
    let format = ops.format.as_str();
    let line = ev.line;

    // Relocatable K fields pick up their block base in Pass 2.
    let mut k_val = match ops.address {
        Some(Value::Relocatable(v, block)) if ev.state.pass == Pass::Two => {
            v + ev.state.blocks.base(block) as i64
        }
        Some(value) => value.number(),
        None => 0,
    };

    let mut f = def.bits;
    let mut m = u32::from(i_reg);
    let mut j = u32::from(ops.j.unwrap_or(0));

    match base {
        "PS" => {
            if !operand.is_empty() && !operand.starts_with('.') && !operand.starts_with('*') {
                return Err(OperandError("PS takes no operands".to_string()));
            }
            f = 0;
            m = 0;
            j = 0;
            k_val = 0;
        }
        _ if is_ghi_mnemonic(base) => {
            f = (def.bits >> 3) & 0o77;
            m = def.bits & 7;
            j = match format {
                "XJ,K" | "BJ,K" => u32::from(ops.j.unwrap_or(0)),
                "BI,K" => u32::from(ops.i.unwrap_or(0)),
                "K" => 0,
                _ if single_register(format).is_some() => {
                    k_val = 0;
                    u32::from(ops.j.unwrap_or(0))
                }
                _ if format.len() == 4 && format.ends_with('K') => u32::from(ops.j.unwrap_or(0)),
                _ => u32::from(ops.j.or(ops.i).unwrap_or(0)),
            };
        }
        "SA" | "SB" | "SX" => {
            let family_f = |family: char| -> Result<u32, OperandError> {
                let row = match base {
                    "SA" => [0o50, 0o51, 0o52],
                    "SB" => [0o60, 0o61, 0o62],
                    _ => [0o70, 0o71, 0o72],
                };
                match family {
                    'A' => Ok(row[0]),
                    'B' => Ok(row[1]),
                    'X' => Ok(row[2]),
                    _ => Err(OperandError(format!(
                        "invalid register family '{}' for {}",
                        family, base
                    ))),
                }
            };
            if format == "K" {
                j = 0;
                f = family_f('B')?;
            } else if format.len() == 4 && format.ends_with('K') {
                // AJ+K and friends.
                f = family_f(format.chars().next().unwrap_or(' '))?;
            } else if let Some(family) = single_register(format) {
                f = family_f(family)?;
                k_val = 0;
            } else {
                return Err(OperandError(format!(
                    "unexpected form '{}' for 30-bit {}",
                    format, base
                )));
            }
        }
        "EQ" | "NE" | "GE" | "LT" => {
            if format == "BI,BJ,K" {
                m = u32::from(ops.i.unwrap_or(0));
                j = u32::from(ops.j.unwrap_or(0));
            } else if format == "BJ,BK" {
                // Two-register compact form: K = 0.
                m = u32::from(ops.j.unwrap_or(0));
                j = u32::from(ops.k.unwrap_or(0));
                k_val = 0;
            } else {
                let reg = u32::from(ops.j.or(ops.i).unwrap_or(0));
                if i_reg == 0 && (format == "BI,K" || format == "BJ,K") {
                    m = reg;
                    j = 0;
                } else {
                    j = if format == "K" { 0 } else { reg };
                }
                if single_register(format).is_some() {
                    k_val = 0;
                }
            }
        }
        "JP" => {
            j = 0;
            if format == "BI+K" || format == "BI-K" {
                let reg = u32::from(ops.i.unwrap_or(0));
                if i_reg == 0 {
                    m = reg;
                }
                j = reg;
            } else if format == "K" {
                // m already carries the mnemonic digit.
            } else if single_register(format) == Some('B') {
                let reg = u32::from(ops.j.unwrap_or(0));
                if i_reg == 0 {
                    m = reg;
                }
                j = reg;
                k_val = 0;
            } else {
                return Err(OperandError(format!(
                    "unexpected form '{}' for JP",
                    format
                )));
            }
        }
        _ => {
            return Err(OperandError(format!(
                "no 30-bit encoding logic for '{}'",
                base
            )))
        }
    }

    // Mask K to 18 bits, negative values as one's complement.
    let k_masked = if k_val < 0 {
        if k_val < -(1 << 17) {
            ev.sink.warning(
                line,
                Severity::Value,
                format!("negative address {} out of 18-bit range, truncated", k_val),
            );
        }
        !k_val.unsigned_abs() & MASK_18
    } else {
        if k_val >= (1 << 18) {
            ev.sink.warning(
                line,
                Severity::Value,
                format!("address {:o} out of 18-bit range, truncated", k_val),
            );
        }
        k_val as u64 & MASK_18
    };

    if f > 0o77 || m > 7 || j > 7 {
        ev.sink.error_once(
            line,
            Severity::Fatal,
            format!("internal: bad 30-bit fields f={:o} m={} j={}", f, m, j),
        );
        return Ok(vec![Parcel {
            value: (NOOP_PARCEL << 15) | NOOP_PARCEL,
            width: 30,
        }]);
    }
    let value = u64::from(f) << 24 | u64::from(m) << 21 | u64::from(j) << 18 | k_masked;
    Ok(vec![Parcel { value, width: 30 }])
}
