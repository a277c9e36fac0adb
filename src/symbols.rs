//! Symbol table and literal pool.
//!
//! Symbols live under canonical uppercase names, at most eight
//! characters, stored as `QUAL$NAME` while a qualifier is in effect.
//! Values are block-relative in Pass 1; the expression evaluator adds
//! block bases in Pass 2 so callers always see machine addresses there.

use std::collections::HashMap;

use crate::diagnostics::{DiagnosticSink, Severity};
use crate::state::BlockId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Absolute,
    Relocatable,
    External,
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub value: i64,
    pub kind: SymbolKind,
    pub block: Option<BlockId>,
    pub redefinable: bool,
    pub program_name: bool,
    pub defined_by_loc: bool,
    pub equ_star: bool,
    /// BASE/CODE capture forms store the previous mode letter here;
    /// such symbols substitute as text in `%NAME%` references.
    pub char_value: Option<String>,
    pub line: usize,
}

impl Symbol {
    pub fn absolute(value: i64, line: usize) -> Symbol {
        Symbol {
            value,
            kind: SymbolKind::Absolute,
            block: None,
            redefinable: false,
            program_name: false,
            defined_by_loc: false,
            equ_star: false,
            char_value: None,
            line,
        }
    }

    pub fn relocatable(value: i64, block: BlockId, line: usize) -> Symbol {
        Symbol {
            kind: SymbolKind::Relocatable,
            block: Some(block),
            ..Symbol::absolute(value, line)
        }
    }
}

#[derive(Debug, Default)]
pub struct SymbolTable {
    symbols: HashMap<String, Symbol>,
    program_name: Option<String>,
    literal_pool: Vec<u64>,
    literal_addresses: HashMap<u64, u64>,
}

/// `NAME` or `QUAL$NAME` when a qualifier is active. A name that is
/// already qualified passes through unchanged.
fn qualified(name: &str, qualifier: Option<&str>) -> String {
    let name = name.to_ascii_uppercase();
    match qualifier {
        Some(q) if q != "*" && !name.contains('$') => format!("{}${}", q, name),
        _ => name,
    }
}

impl SymbolTable {
    pub fn new() -> SymbolTable {
        SymbolTable::default()
    }

    /// Define a symbol, enforcing the redefinition rules:
    /// IDENT-defined names are immutable, LOC-defined names accept only
    /// an identical LOC redefinition, SET symbols may be re-SET but not
    /// re-EQUed, and any other redefinition must be value- and
    /// attribute-identical to be accepted (as a no-op).
    pub fn define(
        &mut self,
        name: &str,
        symbol: Symbol,
        qualifier: Option<&str>,
        sink: &mut DiagnosticSink,
    ) -> bool {
        let key = qualified(name, qualifier);
        let line = symbol.line;
        log::trace!(
            "define {} = {:o} ({:?}) at L{}",
            key,
            symbol.value,
            symbol.kind,
            line
        );

        if let Some(existing) = self.symbols.get_mut(&key) {
            if existing.program_name {
                sink.error_once(
                    line,
                    Severity::Label,
                    format!("symbol '{}' defined by IDENT cannot be redefined", key),
                );
                return false;
            }
            if existing.defined_by_loc {
                if symbol.defined_by_loc && existing.value == symbol.value {
                    return true;
                }
                sink.error_once(
                    line,
                    Severity::Label,
                    format!(
                        "symbol '{}' defined by LOC on line {} cannot be redefined",
                        key, existing.line
                    ),
                );
                return false;
            }
            if !existing.redefinable {
                let identical = existing.value == symbol.value
                    && existing.kind == symbol.kind
                    && existing.block == symbol.block;
                if identical {
                    existing.equ_star |= symbol.equ_star;
                    return true;
                }
                sink.error_once(
                    line,
                    Severity::Label,
                    format!(
                        "symbol '{}' already defined on line {} and is not redefinable",
                        key, existing.line
                    ),
                );
                return false;
            }
            if !symbol.redefinable {
                sink.error_once(
                    line,
                    Severity::Label,
                    format!(
                        "symbol '{}' defined by SET on line {} cannot be redefined by non-SET",
                        key, existing.line
                    ),
                );
                return false;
            }
        }

        if symbol.program_name {
            let upper = name.to_ascii_uppercase();
            if let Some(previous) = &self.program_name {
                if *previous != upper {
                    sink.error_once(
                        line,
                        Severity::Label,
                        format!(
                            "program name '{}' conflicts with previous IDENT '{}'",
                            upper, previous
                        ),
                    );
                    return false;
                }
            }
            self.program_name = Some(upper);
        }

        self.symbols.insert(key, symbol);
        true
    }

    /// Qualified lookup with unqualified fallback; the program name
    /// resolves globally as a last resort.
    pub fn lookup(&self, name: &str, qualifier: Option<&str>) -> Option<&Symbol> {
        let upper = name.to_ascii_uppercase();
        let key = qualified(&upper, qualifier);
        if let Some(symbol) = self.symbols.get(&key) {
            return Some(symbol);
        }
        if key != upper {
            if let Some(symbol) = self.symbols.get(&upper) {
                return Some(symbol);
            }
        }
        match &self.program_name {
            Some(program) if *program == upper => self.symbols.get(program),
            _ => None,
        }
    }

    pub fn is_defined(&self, name: &str, qualifier: Option<&str>) -> bool {
        self.lookup(name, qualifier).is_some()
    }

    pub fn program_name(&self) -> Option<&str> {
        self.program_name.as_deref()
    }

    /// Add a 60-bit word to the literal pool, deduplicated by value.
    pub fn add_literal(&mut self, value: u64) {
        if !self.literal_pool.contains(&value) {
            self.literal_pool.push(value);
        }
    }

    /// Assign pool addresses in first-occurrence order, starting at
    /// `start`. Returns the next free address.
    pub fn assign_literal_addresses(&mut self, start: u64) -> u64 {
        let mut address = start;
        for &value in &self.literal_pool {
            self.literal_addresses.insert(value, address);
            address += 1;
        }
        address
    }

    pub fn literal_address(&self, value: u64) -> Option<u64> {
        self.literal_addresses.get(&value).copied()
    }

    pub fn literal_pool(&self) -> &[u64] {
        &self.literal_pool
    }

    pub fn literal_block_size(&self) -> u64 {
        self.literal_pool.len() as u64
    }

    /// All symbols in canonical-name order, for the listing trailer.
    pub fn sorted_symbols(&self) -> Vec<(&String, &Symbol)> {
        let mut entries: Vec<_> = self.symbols.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink() -> DiagnosticSink {
        DiagnosticSink::new()
    }

    #[test]
    fn identical_redefinition_is_a_no_op() {
        let mut table = SymbolTable::new();
        let mut sink = sink();
        assert!(table.define("X", Symbol::absolute(5, 1), None, &mut sink));
        assert!(table.define("X", Symbol::absolute(5, 9), None, &mut sink));
        assert!(!sink.has_errors());
        // First definition line survives.
        assert_eq!(table.lookup("X", None).unwrap().line, 1);
    }

    #[test]
    fn conflicting_redefinition_is_a_label_error() {
        let mut table = SymbolTable::new();
        let mut sink = sink();
        table.define("X", Symbol::absolute(5, 1), None, &mut sink);
        assert!(!table.define("X", Symbol::absolute(6, 2), None, &mut sink));
        assert_eq!(sink.code_for_line(2), Some('L'));
    }

    #[test]
    fn set_symbols_are_redefinable_by_set_only() {
        let mut table = SymbolTable::new();
        let mut sink = sink();
        let set = |value, line| Symbol {
            redefinable: true,
            ..Symbol::absolute(value, line)
        };
        table.define("N", set(1, 1), None, &mut sink);
        assert!(table.define("N", set(2, 2), None, &mut sink));
        assert_eq!(table.lookup("N", None).unwrap().value, 2);
        assert!(!table.define("N", Symbol::absolute(3, 3), None, &mut sink));
        assert_eq!(sink.code_for_line(3), Some('L'));
    }

    #[test]
    fn ident_symbol_is_immutable() {
        let mut table = SymbolTable::new();
        let mut sink = sink();
        let ident = Symbol {
            program_name: true,
            ..Symbol::absolute(0, 1)
        };
        table.define("PROG", ident, None, &mut sink);
        assert!(!table.define("PROG", Symbol::absolute(0, 2), None, &mut sink));
        assert_eq!(table.program_name(), Some("PROG"));
    }

    #[test]
    fn qualified_lookup_falls_back_to_unqualified() {
        let mut table = SymbolTable::new();
        let mut sink = sink();
        table.define("GLOBAL", Symbol::absolute(1, 1), None, &mut sink);
        table.define("LOCAL", Symbol::absolute(2, 2), Some("Q"), &mut sink);

        assert_eq!(table.lookup("LOCAL", Some("Q")).unwrap().value, 2);
        assert_eq!(table.lookup("GLOBAL", Some("Q")).unwrap().value, 1);
        assert!(table.lookup("LOCAL", None).is_none());
        assert!(table.lookup("LOCAL", Some("R")).is_none());
    }

    #[test]
    fn a_name_exists_once_per_qualifier() {
        let mut table = SymbolTable::new();
        let mut sink = sink();
        table.define("N", Symbol::absolute(1, 1), None, &mut sink);
        table.define("N", Symbol::absolute(2, 2), Some("A"), &mut sink);
        table.define("N", Symbol::absolute(3, 3), Some("B"), &mut sink);
        assert!(!sink.has_errors());
        assert_eq!(table.lookup("N", Some("A")).unwrap().value, 2);
        assert_eq!(table.lookup("N", Some("B")).unwrap().value, 3);
        assert_eq!(table.lookup("N", None).unwrap().value, 1);
    }

    #[test]
    fn literal_pool_dedups_and_orders() {
        let mut table = SymbolTable::new();
        table.add_literal(0o777);
        table.add_literal(0o5);
        table.add_literal(0o777);
        assert_eq!(table.literal_pool(), &[0o777, 0o5]);
        assert_eq!(table.literal_block_size(), 2);

        let next = table.assign_literal_addresses(0);
        assert_eq!(next, 2);
        assert_eq!(table.literal_address(0o777), Some(0));
        assert_eq!(table.literal_address(0o5), Some(1));
    }
}
