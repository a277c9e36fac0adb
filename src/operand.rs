//! Structural parsing of instruction operand fields.
//!
//! Operands are matched against a small set of shapes in a fixed
//! order, guided by the instruction's format hint. The result carries
//! the matched register indexes and any K expression (kept as a full
//! [`Value`] so Pass 2 can relocate it), plus a canonical format tag
//! such as `"XJ+XK"`, `"BJ,K"` or `"K"` that the encoder dispatches on.

use std::fmt;

use crate::expr::{Evaluator, ExprError, Value};

/// Evaluate a K expression. Speculative callers (Pass-1 width
/// estimation) tolerate not-yet-defined symbols as a zero placeholder.
fn eval_k(ev: &mut Evaluator<'_>, text: &str) -> Result<Value, OperandError> {
    match ev.evaluate(text) {
        Ok(value) => Ok(value),
        Err(ExprError::Undefined(_)) if ev.suppress_undefined => Ok(Value::Absolute(0)),
        Err(e) => Err(e.into()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperandError(pub String);

impl fmt::Display for OperandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<ExprError> for OperandError {
    fn from(e: ExprError) -> OperandError {
        OperandError(e.to_string())
    }
}

/// Matched operand fields. Registers are 0..7; `address` is the K
/// expression when one was present; `jk` is the combined 6-bit shift
/// count of the LX/AX/MX forms.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Operands {
    pub i: Option<u8>,
    pub j: Option<u8>,
    pub k: Option<u8>,
    pub jk: Option<i64>,
    pub address: Option<Value>,
    pub op: Option<char>,
    pub reg: Option<char>,
    pub format: String,
}

fn parse_register(text: &str) -> Result<(char, u8), OperandError> {
    let text = text.trim();
    let mut chars = text.chars();
    let family = chars.next().unwrap_or(' ').to_ascii_uppercase();
    let digit = chars.next().unwrap_or(' ');
    if chars.next().is_none()
        && matches!(family, 'A' | 'B' | 'X')
        && ('0'..='7').contains(&digit)
    {
        return Ok((family, digit as u8 - b'0'));
    }
    if matches!(family, 'A' | 'B' | 'X') && text.len() >= 2 && text[1..].chars().all(|c| c.is_ascii_digit()) {
        return Err(OperandError(format!(
            "invalid register number '{}' (must be 0-7)",
            text
        )));
    }
    Err(OperandError(format!("invalid register '{}'", text)))
}

/// Split `text` at the first top-level occurrence of one of `ops`,
/// skipping position 0 so a leading sign is not an operator.
fn split_at_operator(text: &str, ops: &[char]) -> Option<(String, char, String)> {
    for (index, c) in text.char_indices().skip(1) {
        if ops.contains(&c) {
            let left = text[..index].trim().to_string();
            let right = text[index + 1..].trim().to_string();
            return Some((left, c, right));
        }
    }
    None
}

fn is_simple_integer(text: &str) -> bool {
    let text = text.trim();
    if text.is_empty() {
        return false;
    }
    let (digits, suffix) = match text.char_indices().last() {
        Some((index, c)) if matches!(c.to_ascii_uppercase(), 'B' | 'D' | 'O') => {
            (&text[..index], true)
        }
        _ => (text, false),
    };
    let digits = if suffix && digits.is_empty() { text } else { digits };
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

/// Parse an operand string against an instruction's format hint.
pub fn parse_operands(
    ev: &mut Evaluator<'_>,
    operand: &str,
    format_hint: &str,
) -> Result<Operands, OperandError> {
    let operand = operand.trim();
    let hint = format_hint.trim().to_ascii_uppercase();
    let mut parsed = Operands::default();

    if hint.is_empty() {
        // No operand expected; a comment opener is tolerated.
        if !operand.is_empty() && !operand.starts_with('.') && !operand.starts_with('*') {
            return Err(OperandError(format!(
                "expected no operands, got '{}'",
                operand
            )));
        }
        return Ok(parsed);
    }

    if operand.is_empty() {
        if hint == "JK" {
            parsed.jk = Some(0);
            parsed.format = "JK".to_string();
            return Ok(parsed);
        }
        if hint.contains('K') {
            parsed.address = Some(Value::Absolute(0));
            parsed.format = "K".to_string();
            return Ok(parsed);
        }
    }

    // 1. Reg op Reg (Xj*Xk, Aj+Bk, ...).
    if let Some((left, op, right)) = split_at_operator(operand, &['+', '-', '*', '/']) {
        if let (Ok((f1, n1)), Ok((f2, n2))) = (parse_register(&left), parse_register(&right)) {
            parsed.j = Some(n1);
            parsed.k = Some(n2);
            parsed.op = Some(op);
            parsed.format = format!("{}J{}{}K", f1, op, f2);
            return Ok(parsed);
        }
    }

    // 2. -Reg op Reg (-Xk*Xj and friends).
    if let Some(negated) = operand.strip_prefix('-') {
        if let Some((left, op, right)) = split_at_operator(negated, &['+', '-', '*', '/']) {
            if let (Ok((f1, n1)), Ok((f2, n2))) = (parse_register(&left), parse_register(&right)) {
                parsed.k = Some(n1);
                parsed.j = Some(n2);
                parsed.op = Some(op);
                parsed.format = format!("-{}K{}{}J", f1, op, f2);
                return Ok(parsed);
            }
        }
    }

    // 3. Reg , (Reg | Reg,K | K).
    if let Some(comma) = operand.find(',') {
        let (left, right) = (operand[..comma].trim(), operand[comma + 1..].trim());
        if let Ok((f1, n1)) = parse_register(left) {
            if let Ok((f2, n2)) = parse_register(right) {
                parsed.j = Some(n1);
                parsed.k = Some(n2);
                parsed.format = format!("{}J,{}K", f1, f2);
                return Ok(parsed);
            }
            if let Some(comma2) = right.find(',') {
                let (middle, rest) = (right[..comma2].trim(), right[comma2 + 1..].trim());
                if let Ok((f2, n2)) = parse_register(middle) {
                    let value = eval_k(ev, rest)?;
                    parsed.i = Some(n1);
                    parsed.j = Some(n2);
                    parsed.address = Some(value);
                    parsed.format = format!("{}I,{}J,K", f1, f2);
                    return Ok(parsed);
                }
            }
            let value = eval_k(ev, right)?;
            if hint == "BI,K" {
                parsed.i = Some(n1);
            } else {
                parsed.j = Some(n1);
            }
            parsed.reg = Some(f1);
            parsed.address = Some(value);
            parsed.format = format!("{}{},K", f1, if hint == "BI,K" { 'I' } else { 'J' });
            return Ok(parsed);
        }
    }

    // 4. Reg op K (Bj+K, Aj-K). Only + and - reach memory.
    if let Some((left, op, right)) = split_at_operator(operand, &['+', '-']) {
        if let Ok((f1, n1)) = parse_register(&left) {
            let mut value = eval_k(ev, &right)?;
            let uses_i = hint == "BI+K" || hint == "BI-K";
            if uses_i {
                parsed.i = Some(n1);
            } else {
                parsed.j = Some(n1);
            }
            if op == '-' {
                if let Value::Absolute(v) = value {
                    value = Value::Absolute(-v);
                }
            }
            parsed.op = Some(op);
            parsed.reg = Some(f1);
            parsed.address = Some(value);
            parsed.format = format!("{}{}{}K", f1, if uses_i { 'I' } else { 'J' }, op);
            return Ok(parsed);
        }
    }

    // 5. -Xk.
    if let Some(negated) = operand.strip_prefix('-') {
        if let Ok((family, n)) = parse_register(negated) {
            if family == 'X' {
                parsed.k = Some(n);
                parsed.j = Some(0);
                parsed.format = "-XK".to_string();
                return Ok(parsed);
            }
            return Err(OperandError(format!(
                "-XK form expects an X register, got '{}'",
                operand
            )));
        }
    }

    // 6. Single register, honoring format reductions.
    if let Ok((family, n)) = parse_register(operand) {
        let hint_chars: Vec<char> = hint.chars().collect();
        let xj_op_xk = hint_chars.len() == 5
            && hint_chars[0] == 'X'
            && hint_chars[1] == 'J'
            && hint_chars[3] == 'X'
            && hint_chars[4] == 'K';
        if xj_op_xk {
            // Xj alone in an arithmetic form means both operands.
            parsed.j = Some(n);
            parsed.k = Some(n);
            parsed.op = Some(hint_chars[2]);
            parsed.format = "XJ".to_string();
            return Ok(parsed);
        }
        if hint == "BJ,XK" && family == 'X' {
            parsed.j = Some(0);
            parsed.k = Some(n);
            parsed.reg = Some('B');
            parsed.format = "XK".to_string();
            return Ok(parsed);
        }
        if hint == "XK" {
            parsed.k = Some(n);
        } else {
            parsed.j = Some(n);
        }
        parsed.reg = Some(family);
        parsed.format = format!("{}{}", family, n);
        return Ok(parsed);
    }

    // 7. Bare expression: jk for the shift/mask hints, else K.
    let jk_hint = matches!(hint.as_str(), "JK" | "BJ,XK" | "XK");
    if jk_hint && is_simple_integer(operand) {
        let value = eval_k(ev, operand)?;
        if !value.is_absolute() {
            return Err(OperandError(format!(
                "shift count '{}' must be absolute",
                operand
            )));
        }
        parsed.jk = Some(value.number());
        parsed.format = "JK".to_string();
        return Ok(parsed);
    }

    let value = eval_k(ev, operand)?;
    if hint == "JK" {
        if !value.is_absolute() {
            return Err(OperandError(format!(
                "shift count '{}' must be absolute",
                operand
            )));
        }
        parsed.jk = Some(value.number());
        parsed.format = "JK".to_string();
        return Ok(parsed);
    }
    parsed.address = Some(value);
    match hint.as_str() {
        "AJ+K" | "BJ+K" | "XJ+K" | "AJ-K" | "BJ-K" | "XJ-K" => {
            parsed.j = Some(0);
            parsed.op = hint.chars().nth(2);
        }
        "BI+K" | "BI-K" => {
            parsed.i = Some(0);
            parsed.op = hint.chars().nth(2);
        }
        "BI,BJ,K" => {
            parsed.i = Some(0);
            parsed.j = Some(0);
        }
        "BI,K" => {
            parsed.i = Some(0);
        }
        "XJ,K" | "BJ,K" => {
            parsed.j = Some(0);
        }
        _ => {}
    }
    parsed.format = "K".to_string();
    Ok(parsed)
}
