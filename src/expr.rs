//! Expression evaluation with the relocatability-type algebra.
//!
//! An expression evaluates to a tagged [`Value`]: absolute, relocatable
//! within a block, external, or a literal-pool address. The grammar is
//! a small recursive descent:
//!
//! ```text
//! expr    = [sign] term {("+" | "-" | "^") term}
//! term    = primary {("*" | "/") primary}
//! primary = number | char-constant | symbol | "*" | "$" | "*P"
//!         | "=" data-item | "(" expr ")"
//! ```
//!
//! Symbol lookups return block-relative values in Pass 1 and absolute
//! machine addresses in Pass 2 (the block base is added here, so
//! callers never reconstruct addresses themselves).

use std::collections::HashMap;
use std::fmt;

use crate::charset::CharSet;
use crate::diagnostics::{DiagnosticSink, Severity};
use crate::state::{AssemblerState, BlockId, Pass, NumberBase, ABSOLUTE_BLOCK};
use crate::symbols::{SymbolKind, SymbolTable};

pub const WORD_MASK: u64 = (1 << 60) - 1;
const MAX_EVAL_DEPTH: u32 = 50;
const MAX_MICRO_DEPTH: u32 = 20;
const CHAR_CONSTANT_TYPES: &[char] = &['C', 'H', 'A', 'R', 'L', 'Z'];

/// Result of evaluating an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value {
    Absolute(i64),
    Relocatable(i64, BlockId),
    External(i64),
    LiteralAddr(i64),
}

impl Value {
    pub fn number(self) -> i64 {
        match self {
            Value::Absolute(v)
            | Value::Relocatable(v, _)
            | Value::External(v)
            | Value::LiteralAddr(v) => v,
        }
    }

    pub fn is_absolute(self) -> bool {
        matches!(self, Value::Absolute(_))
    }

    pub fn block(self) -> Option<BlockId> {
        match self {
            Value::Relocatable(_, block) => Some(block),
            _ => None,
        }
    }

    fn type_name(self) -> &'static str {
        match self {
            Value::Absolute(_) => "absolute",
            Value::Relocatable(..) => "relocatable",
            Value::External(_) => "external",
            Value::LiteralAddr(_) => "literal address",
        }
    }
}

/// Evaluation failure. The `Undefined` variant is the suppressible
/// signal used by speculative Pass-1 sizing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExprError {
    Undefined(String),
    Invalid(String),
}

impl fmt::Display for ExprError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExprError::Undefined(name) => write!(f, "undefined symbol '{}'", name),
            ExprError::Invalid(message) => f.write_str(message),
        }
    }
}

fn invalid(message: impl Into<String>) -> ExprError {
    ExprError::Invalid(message.into())
}

/// Fold a signed value into a 60-bit word, negative values by one's
/// complement of the magnitude.
pub fn fold_word(value: i64) -> u64 {
    if value >= 0 {
        value as u64 & WORD_MASK
    } else {
        !value.unsigned_abs() & WORD_MASK
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Add,
    Sub,
    Mul,
    Div,
    Xor,
}

fn combine(op: Op, a: Value, b: Value) -> Result<Value, ExprError> {
    use Value::*;

    let illegal = || {
        Err(invalid(format!(
            "illegal operation: {} {} {}",
            a.type_name(),
            match op {
                Op::Add => "+",
                Op::Sub => "-",
                Op::Mul => "*",
                Op::Div => "/",
                Op::Xor => "^",
            },
            b.type_name()
        )))
    };

    match op {
        Op::Add => match (a, b) {
            (Absolute(x), Absolute(y)) => Ok(Absolute(x.wrapping_add(y))),
            (Absolute(x), Relocatable(y, block)) | (Relocatable(x, block), Absolute(y)) => {
                Ok(Relocatable(x.wrapping_add(y), block))
            }
            (Absolute(x), External(y)) | (External(x), Absolute(y)) => {
                Ok(External(x.wrapping_add(y)))
            }
            (Absolute(x), LiteralAddr(y)) | (LiteralAddr(x), Absolute(y)) => {
                Ok(LiteralAddr(x.wrapping_add(y)))
            }
            _ => illegal(),
        },
        Op::Sub => match (a, b) {
            (Absolute(x), Absolute(y)) => Ok(Absolute(x.wrapping_sub(y))),
            (Relocatable(x, block), Absolute(y)) | (Absolute(x), Relocatable(y, block)) => {
                Ok(Relocatable(x.wrapping_sub(y), block))
            }
            (Relocatable(x, b1), Relocatable(y, b2)) => {
                if b1 == b2 {
                    Ok(Absolute(x.wrapping_sub(y)))
                } else {
                    Err(invalid("relocatable difference requires the same block"))
                }
            }
            (External(x), Absolute(y)) | (Absolute(x), External(y)) => {
                Ok(External(x.wrapping_sub(y)))
            }
            (LiteralAddr(x), LiteralAddr(y)) => Ok(Absolute(x.wrapping_sub(y))),
            (LiteralAddr(x), Absolute(y)) | (Absolute(x), LiteralAddr(y)) => {
                Ok(LiteralAddr(x.wrapping_sub(y)))
            }
            _ => illegal(),
        },
        Op::Mul | Op::Div | Op::Xor => {
            // Literal addresses take part in arithmetic as plain
            // absolute values.
            let x = match a {
                Absolute(x) | LiteralAddr(x) => x,
                _ => return illegal(),
            };
            let y = match b {
                Absolute(y) | LiteralAddr(y) => y,
                _ => return illegal(),
            };
            Ok(Absolute(match op {
                Op::Mul => x.wrapping_mul(y),
                Op::Div => {
                    if y == 0 {
                        0
                    } else {
                        x.wrapping_div(y)
                    }
                }
                Op::Xor => x ^ y,
                _ => unreachable!(),
            }))
        }
    }
}

fn negated(value: Value) -> Result<Value, ExprError> {
    match value {
        Value::Absolute(v) | Value::LiteralAddr(v) => Ok(Value::Absolute(-v)),
        _ => Err(invalid("unary minus requires an absolute value")),
    }
}

/// The parsed shape of a DIS operand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisOperands {
    /// `N,string` (N = 0 sizes for the string plus two terminators).
    Words { n: u64, text: String },
    /// `,<d>string<d>` — always encoded in default display code.
    Delimited { text: String },
    /// `[N,]%"name"%` — the micro's name-as-string under display code.
    MicroName { n: u64, name: String },
}

/// Expression evaluator borrowing the pieces of assembler state it
/// needs. One is constructed per evaluation site; `suppress_undefined`
/// makes undefined symbols fail silently for speculative callers.
pub struct Evaluator<'a> {
    pub symbols: &'a mut SymbolTable,
    pub state: &'a AssemblerState,
    pub micros: &'a HashMap<String, String>,
    pub sink: &'a mut DiagnosticSink,
    pub line: usize,
    pub suppress_undefined: bool,
}

impl<'a> Evaluator<'a> {
    /// Replace every `%NAME%` with the micro's value (or the character
    /// value of a symbol), recursively, bounded by a depth cap.
    pub fn substitute_micros(&mut self, text: &str) -> String {
        let mut text = text.to_string();
        let mut depth = 0;
        let mut from = 0;
        while let Some((start, end, name)) = find_micro_reference(&text, from) {
            let replacement = self
                .micros
                .get(&name)
                .cloned()
                .or_else(|| {
                    self.symbols
                        .lookup(&name, self.state.qualifier.as_deref())
                        .and_then(|s| s.char_value.clone())
                });
            match replacement {
                Some(value) => {
                    depth += 1;
                    if depth > MAX_MICRO_DEPTH {
                        self.sink.error_once(
                            self.line,
                            Severity::Error,
                            format!("micro substitution depth exceeds {}", MAX_MICRO_DEPTH),
                        );
                        break;
                    }
                    text.replace_range(start..end, &value);
                    from = 0;
                }
                None => {
                    self.sink.error_once(
                        self.line,
                        Severity::Undefined,
                        format!("undefined micro '%{}%'", name),
                    );
                    from = end;
                }
            }
        }
        text
    }

    /// Evaluate an expression string to a [`Value`]. Empty input is
    /// absolute zero.
    pub fn evaluate(&mut self, text: &str) -> Result<Value, ExprError> {
        self.evaluate_at(text, 0)
    }

    fn evaluate_at(&mut self, text: &str, depth: u32) -> Result<Value, ExprError> {
        if depth > MAX_EVAL_DEPTH {
            return Err(invalid(format!(
                "expression recursion exceeds {}",
                MAX_EVAL_DEPTH
            )));
        }
        let text = self.substitute_micros(text);
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(Value::Absolute(0));
        }
        let mut parser = Parser {
            chars: trimmed.chars().collect(),
            pos: 0,
            depth,
        };
        let value = parser.expr(self)?;
        parser.skip_blanks();
        if !parser.at_end() {
            return Err(invalid(format!("cannot parse expression '{}'", trimmed)));
        }
        Ok(value)
    }

    /// Evaluate a data item: a character constant (`nTstring` or
    /// `,Tdstringd`) or a signed expression. The sign negates the whole
    /// item, which must then be absolute.
    pub fn data_item(&mut self, text: &str) -> Result<Value, ExprError> {
        self.data_item_at(text, 0)
    }

    fn data_item_at(&mut self, text: &str, depth: u32) -> Result<Value, ExprError> {
        let text = self.substitute_micros(text.trim());
        let mut rest = text.trim();
        if rest.is_empty() {
            return Err(invalid("empty data item"));
        }

        let mut negate = false;
        if let Some(stripped) = rest.strip_prefix('+') {
            rest = stripped.trim_start();
        } else if let Some(stripped) = rest.strip_prefix('-') {
            negate = true;
            rest = stripped.trim_start();
        }
        if rest.is_empty() {
            return Err(invalid("data item contains only a sign"));
        }

        let chars: Vec<char> = rest.chars().collect();

        // Form 1: nTstring.
        let digits = chars.iter().take_while(|c| c.is_ascii_digit()).count();
        if digits > 0 && digits < chars.len() {
            let type_char = chars[digits].to_ascii_uppercase();
            if CHAR_CONSTANT_TYPES.contains(&type_char) {
                let n: i64 = rest[..digits]
                    .parse()
                    .map_err(|_| invalid(format!("invalid character count in '{}'", rest)))?;
                let string: String = chars[digits + 1..].iter().collect();
                let word = self.char_constant(n, type_char, &string);
                let word = if negate { word ^ WORD_MASK } else { word };
                return Ok(Value::Absolute(word as i64));
            }
        }

        // Form 2: Tdstringd, a delimited string.
        if chars.len() >= 2 {
            let type_char = chars[0].to_ascii_uppercase();
            if CHAR_CONSTANT_TYPES.contains(&type_char) && !chars[1].is_ascii_alphanumeric() {
                let delimiter = chars[1];
                if let Some(end) = chars[2..].iter().position(|&c| c == delimiter) {
                    let string: String = chars[2..2 + end].iter().collect();
                    let word = self.char_constant(string.chars().count() as i64, type_char, &string);
                    let word = if negate { word ^ WORD_MASK } else { word };
                    return Ok(Value::Absolute(word as i64));
                }
            }
        }

        let value = self.evaluate_at(rest, depth + 1)?;
        if negate {
            if !value.is_absolute() {
                return Err(invalid("cannot negate a non-absolute data item"));
            }
            return Ok(Value::Absolute(-value.number()));
        }
        Ok(value)
    }

    /// Encode up to ten 6-bit characters into a word. L/C/Z
    /// left-justify with the mode's zero fill; H/A/R right-justify with
    /// blank fill. Characters outside the set become the set blank.
    pub fn char_constant(&self, n: i64, type_char: char, string: &str) -> u64 {
        if n <= 0 {
            return 0;
        }
        let set = self.state.code.constant_set();
        let blank = set.blank();
        let target = n.min(10) as usize;
        let mut codes: Vec<u8> = string
            .chars()
            .take(target)
            .map(|c| set.encode(c).unwrap_or(blank))
            .collect();

        let fill = match type_char {
            'H' | 'A' | 'R' => blank,
            _ => self.state.code.zero_fill(),
        };
        let left_justified = matches!(type_char, 'L' | 'C' | 'Z');
        while codes.len() < target {
            if left_justified {
                codes.push(fill);
            } else {
                codes.insert(0, fill);
            }
        }

        let mut word = 0u64;
        for code in &codes {
            word = (word << 6) | u64::from(*code);
        }
        if left_justified {
            word <<= 60 - target * 6;
        }
        word
    }

    /// Parse a DIS operand into one of its three forms.
    pub fn parse_dis(&mut self, operand: &str) -> Result<DisOperands, ExprError> {
        let operand = operand.trim_start();
        if operand.is_empty() {
            return Err(invalid("DIS requires operands"));
        }

        // [N,]%"name"% is matched before substitution: the micro's name
        // itself is the string.
        if let Some(dis) = self.parse_dis_micro_name(operand)? {
            return Ok(dis);
        }

        let substituted = self.substitute_micros(operand);
        let chars: Vec<char> = substituted.chars().collect();

        if chars.first() == Some(&',') {
            if chars.len() < 3 {
                return Err(invalid(format!("invalid DIS operand '{}'", operand)));
            }
            let delimiter = chars[1];
            let end = chars[2..]
                .iter()
                .position(|&c| c == delimiter)
                .ok_or_else(|| invalid(format!("missing closing '{}' in DIS", delimiter)))?;
            let text: String = chars[2..2 + end].iter().collect();
            return Ok(DisOperands::Delimited { text });
        }

        let comma = substituted
            .find(',')
            .ok_or_else(|| invalid(format!("invalid DIS operand '{}'", operand)))?;
        if comma == 0 {
            return Err(invalid(format!("invalid DIS operand '{}'", operand)));
        }

        // N,<d>string<d> degrades to the delimited form.
        let after: Vec<char> = substituted[comma + 1..].chars().collect();
        if let Some(&delimiter) = after.first() {
            if !delimiter.is_ascii_alphanumeric() && delimiter != ' ' {
                if let Some(end) = after[1..].iter().position(|&c| c == delimiter) {
                    let text: String = after[1..1 + end].iter().collect();
                    return Ok(DisOperands::Delimited { text });
                }
            }
        }

        let n = self.dis_word_count(&substituted[..comma])?;
        let text = substituted[comma + 1..].to_string();
        Ok(DisOperands::Words { n, text })
    }

    fn parse_dis_micro_name(&mut self, operand: &str) -> Result<Option<DisOperands>, ExprError> {
        let (count_text, rest) = match operand.find("%\"") {
            Some(0) => (None, operand),
            Some(at) => {
                let before = operand[..at].trim_end();
                match before.strip_suffix(',') {
                    Some(count) => (Some(count.trim().to_string()), &operand[at..]),
                    None => return Ok(None),
                }
            }
            None => return Ok(None),
        };
        let rest = &rest[2..];
        let close = match rest.find("\"%") {
            Some(close) => close,
            None => return Ok(None),
        };
        let name = &rest[..close];
        let valid_name = !name.is_empty()
            && name.len() <= 8
            && name.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
            && name.chars().all(|c| c.is_ascii_alphanumeric());
        if !valid_name {
            return Ok(None);
        }
        let n = match count_text {
            Some(text) if !text.is_empty() => self.dis_word_count(&text)?,
            _ => 0,
        };
        Ok(Some(DisOperands::MicroName {
            n,
            name: name.to_ascii_uppercase(),
        }))
    }

    fn dis_word_count(&mut self, text: &str) -> Result<u64, ExprError> {
        let value = self.evaluate(text)?;
        match value {
            Value::Absolute(n) if n >= 0 => Ok(n as u64),
            _ => Err(invalid(
                "DIS word count must be a non-negative absolute value",
            )),
        }
    }

    /// Generate the 60-bit words for a parsed DIS operand.
    pub fn generate_dis_words(&mut self, operands: &DisOperands) -> Vec<u64> {
        let (set, n, text) = match operands {
            DisOperands::MicroName { n, name } => {
                let Some(value) = self.micros.get(name).cloned() else {
                    self.sink.error_once(
                        self.line,
                        Severity::Fatal,
                        format!("micro '%{}%' for DIS not found", name),
                    );
                    return Vec::new();
                };
                (CharSet::Display, *n, value)
            }
            DisOperands::Words { n, text } => (self.state.code.dis_set(), *n, text.clone()),
            DisOperands::Delimited { text } => (CharSet::Display, 0, text.clone()),
        };

        let chars: Vec<char> = text.chars().collect();
        let total_chars = if n == 0 {
            // Two 6-bit zero terminators, rounded up to whole words.
            (chars.len() + 2).div_ceil(10) * 10
        } else {
            n as usize * 10
        };

        let mut words = Vec::new();
        let mut word = 0u64;
        let mut packed = 0;
        for index in 0..total_chars {
            let code = match chars.get(index) {
                Some(&c) => {
                    let code = set.encode(c).unwrap_or_else(|| {
                        if c != ' ' && !self.sink.has_error_on_line(self.line) {
                            self.sink.warning(
                                self.line,
                                Severity::Character,
                                format!(
                                    "invalid character '{}' in DIS (CODE={}), using blank",
                                    c,
                                    self.state.code.letter()
                                ),
                            );
                        }
                        set.blank()
                    });
                    u64::from(code)
                }
                None => 0,
            };
            word = (word << 6) | code;
            packed += 1;
            if packed == 10 {
                words.push(word);
                word = 0;
                packed = 0;
            }
        }
        if packed > 0 {
            words.push(word << (6 * (10 - packed)));
        }
        words
    }
}

fn find_micro_reference(text: &str, from: usize) -> Option<(usize, usize, String)> {
    let bytes = text.as_bytes();
    let mut i = from;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let mut j = i + 1;
            if j < bytes.len() && bytes[j].is_ascii_alphabetic() {
                while j < bytes.len() && bytes[j].is_ascii_alphanumeric() {
                    j += 1;
                }
                if j < bytes.len() && bytes[j] == b'%' && j - i - 1 <= 8 {
                    let name = text[i + 1..j].to_ascii_uppercase();
                    return Some((i, j + 1, name));
                }
            }
        }
        i += 1;
    }
    None
}

/// Recursive-descent parser over one expression string.
struct Parser {
    chars: Vec<char>,
    pos: usize,
    depth: u32,
}

impl Parser {
    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn skip_blanks(&mut self) {
        while self.peek() == Some(' ') {
            self.pos += 1;
        }
    }

    fn expr(&mut self, ev: &mut Evaluator<'_>) -> Result<Value, ExprError> {
        self.skip_blanks();
        let mut negate = false;
        match self.peek() {
            Some('+') => {
                self.bump();
            }
            Some('-') => {
                negate = true;
                self.bump();
            }
            _ => {}
        }
        self.skip_blanks();
        if self.at_end() || self.peek() == Some(')') {
            if negate {
                return Err(invalid("expression is only a sign"));
            }
            return Ok(Value::Absolute(0));
        }
        let mut value = self.term(ev)?;
        if negate {
            value = negated(value)?;
        }
        loop {
            self.skip_blanks();
            let op = match self.peek() {
                Some('+') => Op::Add,
                Some('-') => Op::Sub,
                Some('^') => Op::Xor,
                _ => break,
            };
            self.bump();
            self.skip_blanks();
            // A trailing operator takes zero as its right operand.
            let rhs = if self.at_end() || self.peek() == Some(')') {
                Value::Absolute(0)
            } else {
                self.term(ev)?
            };
            value = combine(op, value, rhs)?;
        }
        Ok(value)
    }

    fn term(&mut self, ev: &mut Evaluator<'_>) -> Result<Value, ExprError> {
        let mut value = self.primary(ev)?;
        loop {
            self.skip_blanks();
            let op = match self.peek() {
                Some('*') => Op::Mul,
                Some('/') => Op::Div,
                _ => break,
            };
            self.bump();
            self.skip_blanks();
            let rhs = self.primary(ev)?;
            value = combine(op, value, rhs)?;
        }
        Ok(value)
    }

    fn primary(&mut self, ev: &mut Evaluator<'_>) -> Result<Value, ExprError> {
        self.skip_blanks();
        match self.peek() {
            None => Err(invalid("missing expression element")),
            Some('(') => {
                self.bump();
                self.depth += 1;
                if self.depth > MAX_EVAL_DEPTH {
                    return Err(invalid(format!(
                        "expression recursion exceeds {}",
                        MAX_EVAL_DEPTH
                    )));
                }
                let value = self.expr(ev)?;
                self.depth -= 1;
                self.skip_blanks();
                if self.bump() != Some(')') {
                    return Err(invalid("missing ')'"));
                }
                // A parenthesized literal address takes part in the
                // surrounding expression as a plain absolute value.
                Ok(match value {
                    Value::LiteralAddr(v) => Value::Absolute(v),
                    other => other,
                })
            }
            Some('*') => {
                // "*P" is the position counter; a lone "*" is the
                // location counter.
                if self.peek_at(1) == Some('P')
                    && !self.peek_at(2).is_some_and(|c| c.is_ascii_alphanumeric())
                {
                    self.bump();
                    self.bump();
                    return Ok(Value::Absolute(i64::from(ev.state.pc)));
                }
                self.bump();
                Ok(self.location_counter(ev))
            }
            Some('$') => {
                self.bump();
                Ok(Value::Absolute(i64::from(ev.state.pc.saturating_sub(1))))
            }
            Some('=') => {
                self.bump();
                self.literal(ev)
            }
            Some(c) if c.is_ascii_digit() => self.number_or_char_constant(ev),
            Some(c) if c.is_ascii_alphabetic() => self.symbol(ev),
            Some(c) => Err(invalid(format!("cannot parse element at '{}'", c))),
        }
    }

    fn location_counter(&self, ev: &Evaluator<'_>) -> Value {
        let state = ev.state;
        let lc = state.lc as i64;
        match state.pass {
            Pass::One => {
                if state.lc_is_absolute || state.current_block == ABSOLUTE_BLOCK {
                    Value::Absolute(lc)
                } else {
                    Value::Relocatable(lc, state.current_block)
                }
            }
            Pass::Two => Value::Absolute(lc),
        }
    }

    /// Everything up to the next top-level delimiter, the span of one
    /// expression element.
    fn take_element(&mut self) -> String {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if matches!(c, '+' | '-' | '*' | '/' | '^' | '(' | ')' | ' ') {
                break;
            }
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    fn literal(&mut self, ev: &mut Evaluator<'_>) -> Result<Value, ExprError> {
        let mut item = String::new();
        match self.peek() {
            Some(sign @ ('+' | '-')) => {
                item.push(sign);
                self.bump();
            }
            _ => {}
        }

        // A literal's content is one element; a delimited character
        // form may carry operators inside its delimiters.
        let element = match self.peek() {
            Some(t)
                if CHAR_CONSTANT_TYPES.contains(&t.to_ascii_uppercase())
                    && self
                        .peek_at(1)
                        .is_some_and(|d| !d.is_ascii_alphanumeric() && d != ' ') =>
            {
                let type_char = self.bump().unwrap_or(t);
                let delimiter = self.bump().unwrap_or(' ');
                let mut text = String::new();
                text.push(type_char);
                text.push(delimiter);
                while let Some(c) = self.bump() {
                    text.push(c);
                    if c == delimiter {
                        break;
                    }
                }
                text
            }
            _ => self.take_element(),
        };
        if element.is_empty() {
            return Err(invalid("empty literal"));
        }
        item.push_str(&element);

        let value = ev.data_item_at(&item, self.depth + 1)?;
        if !value.is_absolute() {
            return Err(invalid(format!("literal '={}' must be absolute", item)));
        }
        let word = fold_word(value.number());
        ev.symbols.add_literal(word);
        match ev.symbols.literal_address(word) {
            Some(address) => Ok(Value::LiteralAddr(address as i64)),
            // Pass 1 does not know pool addresses yet; the pool entry
            // above is what matters for sizing.
            None if ev.state.pass == Pass::One => Ok(Value::LiteralAddr(0)),
            None => Err(invalid(format!("no address for literal '={}'", item))),
        }
    }

    fn number_or_char_constant(&mut self, ev: &mut Evaluator<'_>) -> Result<Value, ExprError> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        let digits: String = self.chars[start..self.pos].iter().collect();

        if let Some(next) = self.peek() {
            let upper = next.to_ascii_uppercase();
            let suffix_ends_token = !self.peek_at(1).is_some_and(|c| c.is_ascii_alphanumeric());
            if matches!(upper, 'B' | 'O') && suffix_ends_token {
                self.bump();
                return parse_radix(&digits, 8);
            }
            if upper == 'D' && suffix_ends_token {
                self.bump();
                return parse_radix(&digits, 10);
            }
            if CHAR_CONSTANT_TYPES.contains(&upper) {
                self.bump();
                let n: i64 = digits
                    .parse()
                    .map_err(|_| invalid(format!("invalid character count '{}'", digits)))?;
                let string = self.take_element();
                return Ok(Value::Absolute(ev.char_constant(n, upper, &string) as i64));
            }
            if next.is_ascii_alphanumeric() {
                return Err(invalid(format!(
                    "cannot parse numeric constant '{}{}'",
                    digits, next
                )));
            }
        }

        let radix = match ev.state.base {
            NumberBase::Octal => 8,
            NumberBase::Mixed => {
                if digits.chars().all(|c| ('0'..='7').contains(&c)) {
                    8
                } else {
                    10
                }
            }
            NumberBase::Decimal | NumberBase::Hex => 10,
        };
        parse_radix(&digits, radix)
    }

    fn symbol(&mut self, ev: &mut Evaluator<'_>) -> Result<Value, ExprError> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_alphanumeric() || c == '$') {
            self.pos += 1;
        }
        let name: String = self.chars[start..self.pos].iter().collect();

        let mut is_register = false;
        if name.len() == 2 {
            let mut chars = name.chars();
            let family = chars.next().unwrap_or(' ').to_ascii_uppercase();
            let digit = chars.next().unwrap_or(' ');
            is_register = matches!(family, 'A' | 'B' | 'X') && ('0'..='7').contains(&digit);
        }
        if is_register {
            return Err(invalid(format!(
                "register '{}' is invalid in an expression",
                name
            )));
        }
        let bare = name.rsplit('$').next().unwrap_or(&name);
        if bare.len() > 8 {
            return Err(invalid(format!("symbol '{}' exceeds 8 characters", name)));
        }

        let qualifier = ev.state.qualifier.clone();
        match ev.symbols.lookup(&name, qualifier.as_deref()) {
            Some(symbol) => {
                if symbol.char_value.is_some() {
                    return Err(invalid(format!(
                        "character-valued symbol '{}' is invalid in an expression",
                        name
                    )));
                }
                let value = symbol.value;
                match ev.state.pass {
                    Pass::Two => match (symbol.kind, symbol.block) {
                        (SymbolKind::Relocatable, Some(block)) if block != ABSOLUTE_BLOCK => {
                            let base = ev.state.blocks.base(block) as i64;
                            Ok(Value::Absolute(value + base))
                        }
                        _ => Ok(Value::Absolute(value)),
                    },
                    Pass::One => match (symbol.kind, symbol.block) {
                        (SymbolKind::Relocatable, Some(block)) => {
                            Ok(Value::Relocatable(value, block))
                        }
                        (SymbolKind::External, _) => Ok(Value::External(value)),
                        _ => Ok(Value::Absolute(value)),
                    },
                }
            }
            None => {
                if !ev.suppress_undefined {
                    ev.sink.error_once(
                        ev.line,
                        Severity::Undefined,
                        format!("undefined symbol '{}'", name),
                    );
                }
                Err(ExprError::Undefined(name))
            }
        }
    }
}

fn parse_radix(digits: &str, radix: u32) -> Result<Value, ExprError> {
    if radix == 8 && digits.chars().any(|c| !('0'..='7').contains(&c)) {
        return Err(invalid(format!("'{}' has invalid octal digits", digits)));
    }
    i64::from_str_radix(digits, radix)
        .map(Value::Absolute)
        .map_err(|_| invalid(format!("invalid numeric constant '{}'", digits)))
}

#[cfg(test)]
mod tests {
    use yare::parameterized;

    use super::*;
    use crate::charset::CodeMode;
    use crate::state::AssemblerState;

    struct Fixture {
        symbols: SymbolTable,
        state: AssemblerState,
        micros: HashMap<String, String>,
        sink: DiagnosticSink,
    }

    impl Fixture {
        fn new() -> Fixture {
            Fixture {
                symbols: SymbolTable::new(),
                state: AssemblerState::new(),
                micros: HashMap::new(),
                sink: DiagnosticSink::new(),
            }
        }

        fn eval(&mut self, text: &str) -> Result<Value, ExprError> {
            let mut ev = Evaluator {
                symbols: &mut self.symbols,
                state: &self.state,
                micros: &self.micros,
                sink: &mut self.sink,
                line: 1,
                suppress_undefined: false,
            };
            ev.evaluate(text)
        }

        fn data(&mut self, text: &str) -> Result<Value, ExprError> {
            let mut ev = Evaluator {
                symbols: &mut self.symbols,
                state: &self.state,
                micros: &self.micros,
                sink: &mut self.sink,
                line: 1,
                suppress_undefined: false,
            };
            ev.data_item(text)
        }
    }

    use crate::symbols::Symbol;

    #[parameterized(
        decimal = { "10", 10 },
        octal_suffix = { "10B", 8 },
        octal_suffix_o = { "10O", 8 },
        decimal_suffix = { "10D", 10 },
        arithmetic = { "2+3*4", 14 },
        parens = { "(2+3)*4", 20 },
        xor = { "12^10", 6 },
        division = { "7/2", 3 },
        division_by_zero = { "7/0", 0 },
        unary_minus = { "-5+8", 3 },
        trailing_operator = { "5+", 5 },
    )]
    fn absolute_expressions(text: &str, expected: i64) {
        let mut f = Fixture::new();
        assert_eq!(f.eval(text), Ok(Value::Absolute(expected)));
    }

    #[test]
    fn octal_base_changes_unsuffixed_numbers() {
        let mut f = Fixture::new();
        f.state.base = NumberBase::Octal;
        assert_eq!(f.eval("10"), Ok(Value::Absolute(8)));
        assert!(f.eval("19").is_err());
    }

    #[test]
    fn mixed_base_is_octal_when_digits_allow() {
        let mut f = Fixture::new();
        f.state.base = NumberBase::Mixed;
        assert_eq!(f.eval("10"), Ok(Value::Absolute(8)));
        assert_eq!(f.eval("19"), Ok(Value::Absolute(19)));
    }

    #[test]
    fn relocatable_algebra() {
        let mut f = Fixture::new();
        let block = f.state.blocks.intern("CODE");
        let mut sink = DiagnosticSink::new();
        f.symbols
            .define("A", Symbol::relocatable(4, block, 1), None, &mut sink);
        f.symbols
            .define("B", Symbol::relocatable(9, block, 2), None, &mut sink);

        assert_eq!(f.eval("A+2"), Ok(Value::Relocatable(6, block)));
        assert_eq!(f.eval("B-A"), Ok(Value::Absolute(5)));
        assert!(f.eval("A+B").is_err());
        assert!(f.eval("A*2").is_err());
        assert!(f.eval("-A").is_err());
    }

    #[test]
    fn relocatable_difference_requires_same_block() {
        let mut f = Fixture::new();
        let one = f.state.blocks.intern("ONE");
        let two = f.state.blocks.intern("TWO");
        let mut sink = DiagnosticSink::new();
        f.symbols
            .define("A", Symbol::relocatable(4, one, 1), None, &mut sink);
        f.symbols
            .define("B", Symbol::relocatable(9, two, 2), None, &mut sink);
        assert!(f.eval("B-A").is_err());
    }

    #[test]
    fn pass2_symbol_lookup_adds_block_base() {
        let mut f = Fixture::new();
        let block = f.state.blocks.intern("CODE");
        let mut sink = DiagnosticSink::new();
        f.symbols
            .define("A", Symbol::relocatable(4, block, 1), None, &mut sink);
        f.state.blocks.add_words(block, 10);
        f.state.blocks.compute_bases(3, &mut sink);
        f.state.pass = Pass::Two;
        assert_eq!(f.eval("A"), Ok(Value::Absolute(7)));
    }

    #[test]
    fn location_counter_primaries() {
        let mut f = Fixture::new();
        f.state.lc = 0o100;
        f.state.pc = 30;
        assert_eq!(f.eval("*"), Ok(Value::Absolute(0o100)));
        assert_eq!(f.eval("$"), Ok(Value::Absolute(29)));
        assert_eq!(f.eval("*P"), Ok(Value::Absolute(30)));

        let block = f.state.blocks.intern("CODE");
        f.state.current_block = block;
        assert_eq!(f.eval("*"), Ok(Value::Relocatable(0o100, block)));
        assert_eq!(f.eval("*+1"), Ok(Value::Relocatable(0o101, block)));
    }

    #[test]
    fn registers_are_rejected_in_expressions() {
        let mut f = Fixture::new();
        assert!(f.eval("X3").is_err());
        assert!(f.eval("B0+1").is_err());
    }

    #[test]
    fn undefined_symbols_report_unless_suppressed() {
        let mut f = Fixture::new();
        assert_eq!(f.eval("NOPE"), Err(ExprError::Undefined("NOPE".into())));
        assert_eq!(f.sink.code_for_line(1), Some('U'));

        let mut quiet = DiagnosticSink::new();
        let mut ev = Evaluator {
            symbols: &mut f.symbols,
            state: &f.state,
            micros: &f.micros,
            sink: &mut quiet,
            line: 2,
            suppress_undefined: true,
        };
        assert!(ev.evaluate("NOPE").is_err());
        assert!(!quiet.has_errors());
    }

    #[test]
    fn char_constant_left_justified_blank_fill_unused() {
        let mut f = Fixture::new();
        // 2LAB: A=01, B=02 left justified over 2 chars.
        let v = f.eval("2LAB").unwrap().number() as u64;
        assert_eq!(v, 0o0102 << 48);
    }

    #[test]
    fn char_constant_right_justified_blank_fill() {
        let mut f = Fixture::new();
        // 3HAB right-justifies with a display blank in front.
        let v = f.eval("3HAB").unwrap().number() as u64;
        assert_eq!(v, (0o55 << 12) | (0o01 << 6) | 0o02);
    }

    #[test]
    fn char_constant_left_zero_fill() {
        let mut f = Fixture::new();
        // 3LA fills with the display-code '0' (0o33) on the right.
        let v = f.eval("3LA").unwrap().number() as u64;
        assert_eq!(v, ((0o01 << 12) | (0o33 << 6) | 0o33) << 42);
    }

    #[test]
    fn delimited_data_item() {
        let mut f = Fixture::new();
        let v = f.data("H*AB*").unwrap().number() as u64;
        assert_eq!(v, (0o01 << 6) | 0o02);
    }

    #[test]
    fn negative_data_item_complements() {
        let mut f = Fixture::new();
        assert_eq!(f.data("-5"), Ok(Value::Absolute(-5)));
        let v = f.data("-1RA").unwrap().number() as u64;
        assert_eq!(v, 0o01 ^ WORD_MASK);
    }

    #[test]
    fn literals_join_the_pool_and_dedup() {
        let mut f = Fixture::new();
        assert_eq!(f.eval("=5"), Ok(Value::LiteralAddr(0)));
        assert_eq!(f.eval("=5"), Ok(Value::LiteralAddr(0)));
        assert_eq!(f.eval("=6"), Ok(Value::LiteralAddr(0)));
        assert_eq!(f.symbols.literal_pool(), &[5, 6]);

        f.symbols.assign_literal_addresses(0);
        f.state.pass = Pass::Two;
        assert_eq!(f.eval("=6"), Ok(Value::LiteralAddr(1)));
    }

    #[test]
    fn micro_substitution_is_recursive_and_capped() {
        let mut f = Fixture::new();
        f.micros.insert("ONE".into(), "1".into());
        f.micros.insert("TWO".into(), "%ONE%+%ONE%".into());
        assert_eq!(f.eval("%TWO%"), Ok(Value::Absolute(2)));

        f.micros.insert("LOOP".into(), "%LOOP%".into());
        let _ = f.eval("%LOOP%");
        assert!(f.sink.has_errors());
    }

    #[test]
    fn micro_falls_back_to_character_valued_symbols() {
        let mut f = Fixture::new();
        let mut sink = DiagnosticSink::new();
        let symbol = Symbol {
            char_value: Some("7".to_string()),
            ..Symbol::absolute(0, 1)
        };
        f.symbols.define("OLD", symbol, None, &mut sink);
        assert_eq!(f.eval("%OLD%"), Ok(Value::Absolute(7)));
    }

    #[test]
    fn dis_form1_packs_with_terminators() {
        let mut f = Fixture::new();
        let mut ev = Evaluator {
            symbols: &mut f.symbols,
            state: &f.state,
            micros: &f.micros,
            sink: &mut f.sink,
            line: 1,
            suppress_undefined: false,
        };
        let parsed = ev.parse_dis("0,ABC").unwrap();
        assert_eq!(
            parsed,
            DisOperands::Words {
                n: 0,
                text: "ABC".into()
            }
        );
        let words = ev.generate_dis_words(&parsed);
        assert_eq!(words, vec![(0o010203u64) << 42]);
    }

    #[test]
    fn dis_form1_fixed_count() {
        let mut f = Fixture::new();
        let mut ev = Evaluator {
            symbols: &mut f.symbols,
            state: &f.state,
            micros: &f.micros,
            sink: &mut f.sink,
            line: 1,
            suppress_undefined: false,
        };
        let parsed = ev.parse_dis("2,AB").unwrap();
        let words = ev.generate_dis_words(&parsed);
        assert_eq!(words.len(), 2);
        assert_eq!(words[0], (0o0102u64) << 48);
        assert_eq!(words[1], 0);
    }

    #[test]
    fn dis_form2_uses_display_code_regardless_of_mode() {
        let mut f = Fixture::new();
        f.state.code = CodeMode::Internal;
        let mut ev = Evaluator {
            symbols: &mut f.symbols,
            state: &f.state,
            micros: &f.micros,
            sink: &mut f.sink,
            line: 1,
            suppress_undefined: false,
        };
        let parsed = ev.parse_dis(",/AB/").unwrap();
        assert_eq!(parsed, DisOperands::Delimited { text: "AB".into() });
        let words = ev.generate_dis_words(&parsed);
        // Display codes for A, B then terminators.
        assert_eq!(words, vec![(0o0102u64) << 48]);
    }

    #[test]
    fn dis_micro_name_encodes_the_name_itself() {
        let mut f = Fixture::new();
        f.micros.insert("MSG".into(), "HELLO".into());
        let mut ev = Evaluator {
            symbols: &mut f.symbols,
            state: &f.state,
            micros: &f.micros,
            sink: &mut f.sink,
            line: 1,
            suppress_undefined: false,
        };
        let parsed = ev.parse_dis("%\"MSG\"%").unwrap();
        assert_eq!(
            parsed,
            DisOperands::MicroName {
                n: 0,
                name: "MSG".into()
            }
        );
        // The *value* of the micro is what gets encoded.
        let words = ev.generate_dis_words(&parsed);
        assert_eq!(words.len(), 1);
        let h = u64::from(CharSet::Display.encode('H').unwrap());
        assert_eq!(words[0] >> 54, h);
    }
}
