//! Evaluation of the IF* conditional-assembly predicates.
//!
//! The conditional stack itself lives in the assembler state; this
//! module only decides whether a condition holds. An error inside a
//! condition makes it false, after reporting.

use crate::diagnostics::Severity;
use crate::expr::{Evaluator, Value};
use crate::symbols::SymbolKind;

/// Evaluate an `IF*` condition against the current state.
pub fn evaluate_condition(ev: &mut Evaluator<'_>, mnemonic: &str, operand: &str) -> bool {
    match try_condition(ev, mnemonic, operand) {
        Ok(result) => result,
        Err(message) => {
            let line = ev.line;
            ev.sink.error_once(
                line,
                Severity::Error,
                format!("condition {} {}: {}", mnemonic, operand, message),
            );
            false
        }
    }
}

fn strip_comment(operand: &str) -> &str {
    let end = operand
        .find('.')
        .into_iter()
        .chain(operand.find('*'))
        .min()
        .unwrap_or(operand.len());
    operand[..end].trim()
}

fn try_condition(ev: &mut Evaluator<'_>, mnemonic: &str, operand: &str) -> Result<bool, String> {
    match mnemonic {
        "IF" => if_keyword(ev, strip_comment(operand)),
        "IFEQ" | "IFNE" | "IFGT" | "IFGE" | "IFLT" | "IFLE" => {
            let operand = strip_comment(operand);
            let comma = operand
                .find(',')
                .ok_or_else(|| format!("{} requires two operands", mnemonic))?;
            let a = eval_number(ev, &operand[..comma])?;
            let b = eval_number(ev, &operand[comma + 1..])?;
            Ok(match mnemonic {
                "IFEQ" => a == b,
                "IFNE" => a != b,
                "IFGT" => a > b,
                "IFGE" => a >= b,
                "IFLT" => a < b,
                _ => a <= b,
            })
        }
        "IFPL" | "IFMI" => {
            let value = eval_number(ev, strip_comment(operand))?;
            Ok(if mnemonic == "IFPL" {
                value >= 0
            } else {
                value < 0
            })
        }
        "IFC" => if_character(operand),
        "IFCP" => Ok(true),
        "IFPP" => Ok(false),
        _ => {
            // IFTPA and friends probe hardware variants this
            // assembler does not model.
            let line = ev.line;
            ev.sink.warning(
                line,
                Severity::Warning,
                format!("conditional '{}' not supported, assuming false", mnemonic),
            );
            Ok(false)
        }
    }
}

fn eval_number(ev: &mut Evaluator<'_>, text: &str) -> Result<i64, String> {
    ev.evaluate(text)
        .map(Value::number)
        .map_err(|e| e.to_string())
}

/// `IF keyword,arg` symbol predicates, or `IF expr` truth.
fn if_keyword(ev: &mut Evaluator<'_>, operand: &str) -> Result<bool, String> {
    if operand.is_empty() {
        return Err("IF requires operands".to_string());
    }
    let (keyword, argument) = match operand.find(',') {
        Some(comma) => (
            operand[..comma].trim().to_ascii_uppercase(),
            operand[comma + 1..].trim(),
        ),
        None => (operand.trim().to_ascii_uppercase(), ""),
    };

    let qualifier = ev.state.qualifier.clone();
    let lookup = |ev: &Evaluator<'_>, name: &str| {
        ev.symbols
            .lookup(name, qualifier.as_deref())
            .map(|s| s.kind)
    };

    match keyword.as_str() {
        "SET" | "DEF" | "-SET" | "-DEF" => {
            if argument.is_empty() {
                return Err(format!("IF {} requires a symbol name", keyword));
            }
            let defined = lookup(ev, argument).is_some();
            Ok(if keyword.starts_with('-') {
                !defined
            } else {
                defined
            })
        }
        "ABS" | "-ABS" | "REL" | "-REL" => {
            if argument.is_empty() {
                return Err(format!("IF {} requires a symbol name", keyword));
            }
            let kind = lookup(ev, argument);
            let result = match keyword.trim_start_matches('-') {
                "ABS" => kind == Some(SymbolKind::Absolute),
                _ => kind == Some(SymbolKind::Relocatable),
            };
            // A negated test still requires the symbol to exist.
            Ok(match kind {
                None => false,
                Some(_) if keyword.starts_with('-') => !result,
                Some(_) => result,
            })
        }
        "REG" | "-REG" => {
            if argument.is_empty() {
                return Err(format!("IF {} requires an argument", keyword));
            }
            let upper = argument.to_ascii_uppercase();
            let mut chars = upper.chars();
            let is_register = upper.len() == 2
                && matches!(chars.next(), Some('A' | 'B' | 'X'))
                && matches!(chars.next(), Some('0'..='7'));
            Ok(is_register != keyword.starts_with('-'))
        }
        "MIC" | "-MIC" => {
            if argument.is_empty() {
                return Err(format!("IF {} requires an argument", keyword));
            }
            let is_micro = ev.micros.contains_key(&argument.to_ascii_uppercase());
            Ok(is_micro != keyword.starts_with('-'))
        }
        "CP" => Ok(true),
        "PP" => Ok(false),
        _ => {
            // Not a keyword: the whole operand is an expression.
            Ok(eval_number(ev, operand)? != 0)
        }
    }
}

/// `IFC OP,<d>S1<d>S2<d>` string comparison. The shorter string is
/// padded with binary zeros before a lexicographic compare; `-`
/// operators invert.
fn if_character(operand: &str) -> Result<bool, String> {
    let operand = operand.trim();
    let comma = operand
        .find(',')
        .ok_or_else(|| "IFC expects 'OP,<d>S1<d>S2<d>'".to_string())?;
    let op = operand[..comma].trim().to_ascii_uppercase();
    let rest = operand[comma + 1..].trim();
    let mut chars = rest.chars();
    let delimiter = chars.next().ok_or_else(|| "missing strings".to_string())?;

    let remainder: String = chars.collect();
    let mut parts = remainder.split(delimiter);
    let s1 = parts.next().ok_or_else(|| "missing first string".to_string())?;
    let s2 = parts
        .next()
        .ok_or_else(|| "mismatched delimiters".to_string())?
        .trim_end();

    let width = s1.chars().count().max(s2.chars().count());
    let pad = |s: &str| -> String {
        let mut padded: String = s.to_string();
        while padded.chars().count() < width {
            padded.push('\0');
        }
        padded
    };
    let (a, b) = (pad(s1), pad(s2));

    match op.as_str() {
        "EQ" | "-NE" => Ok(a == b),
        "NE" | "-EQ" => Ok(a != b),
        "GT" | "-LE" => Ok(a > b),
        "GE" | "-LT" => Ok(a >= b),
        "LT" | "-GE" => Ok(a < b),
        "LE" | "-GT" => Ok(a <= b),
        _ => Err(format!("unknown IFC operator '{}'", op)),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use yare::parameterized;

    use super::*;
    use crate::diagnostics::DiagnosticSink;
    use crate::state::AssemblerState;
    use crate::symbols::{Symbol, SymbolTable};

    struct Fixture {
        symbols: SymbolTable,
        state: AssemblerState,
        micros: HashMap<String, String>,
        sink: DiagnosticSink,
    }

    impl Fixture {
        fn new() -> Fixture {
            let mut symbols = SymbolTable::new();
            let mut sink = DiagnosticSink::new();
            symbols.define("FIVE", Symbol::absolute(5, 1), None, &mut sink);
            Fixture {
                symbols,
                state: AssemblerState::new(),
                micros: HashMap::new(),
                sink,
            }
        }

        fn check(&mut self, mnemonic: &str, operand: &str) -> bool {
            let mut ev = Evaluator {
                symbols: &mut self.symbols,
                state: &self.state,
                micros: &self.micros,
                sink: &mut self.sink,
                line: 1,
                suppress_undefined: false,
            };
            evaluate_condition(&mut ev, mnemonic, operand)
        }
    }

    #[parameterized(
        eq_true = { "IFEQ", "5,FIVE", true },
        eq_false = { "IFEQ", "4,FIVE", false },
        ne = { "IFNE", "4,FIVE", true },
        gt = { "IFGT", "6,FIVE", true },
        ge = { "IFGE", "5,5", true },
        lt = { "IFLT", "6,FIVE", false },
        le = { "IFLE", "5,5", true },
        pl = { "IFPL", "0", true },
        mi = { "IFMI", "0-1", true },
    )]
    fn arithmetic_conditions(mnemonic: &str, operand: &str, expected: bool) {
        let mut f = Fixture::new();
        assert_eq!(f.check(mnemonic, operand), expected);
    }

    #[test]
    fn expression_truth() {
        let mut f = Fixture::new();
        assert!(f.check("IF", "FIVE-4"));
        assert!(!f.check("IF", "FIVE-5"));
    }

    #[parameterized(
        def_true = { "DEF,FIVE", true },
        def_false = { "DEF,NOPE", false },
        minus_def = { "-DEF,NOPE", true },
        set_alias = { "SET,FIVE", true },
        abs_true = { "ABS,FIVE", true },
        minus_abs_on_abs = { "-ABS,FIVE", false },
        rel_on_abs = { "REL,FIVE", false },
        reg_true = { "REG,X3", true },
        reg_false = { "REG,FIVE", false },
        minus_reg = { "-REG,FIVE", true },
        mic_false = { "MIC,NOPE", false },
        cp = { "CP", true },
        pp = { "PP", false },
    )]
    fn keyword_conditions(operand: &str, expected: bool) {
        let mut f = Fixture::new();
        assert_eq!(f.check("IF", operand), expected);
    }

    #[test]
    fn negated_type_test_requires_existence() {
        let mut f = Fixture::new();
        assert!(!f.check("IF", "-ABS,NOPE"));
    }

    #[test]
    fn mic_sees_the_micro_table() {
        let mut f = Fixture::new();
        f.micros.insert("M".into(), "1".into());
        assert!(f.check("IF", "MIC,M"));
        assert!(!f.check("IF", "-MIC,M"));
    }

    #[parameterized(
        equal = { "EQ,/AB/AB/", true },
        unequal = { "EQ,/AB/AC/", false },
        negated = { "-EQ,/AB/AC/", true },
        shorter_padded = { "LT,/A/AB/", true },
        ge = { "GE,/B/AB/", true },
    )]
    fn string_comparisons(operand: &str, expected: bool) {
        let mut f = Fixture::new();
        assert_eq!(f.check("IFC", operand), expected);
    }

    #[test]
    fn condition_errors_are_false_and_reported() {
        let mut f = Fixture::new();
        assert!(!f.check("IFEQ", "1"));
        assert!(f.sink.has_errors());
    }

    #[test]
    fn platform_probes() {
        let mut f = Fixture::new();
        assert!(f.check("IFCP", ""));
        assert!(!f.check("IFPP", ""));
    }
}
