//! The two-pass driver.
//!
//! Pass 1 sizes every line against block-relative counters and fills
//! the symbol table; the block bases are then laid out exactly once;
//! Pass 2 replays the source with absolute counters and emits the
//! binary and the listing. A pre-pass scans LIT directives so the
//! literal pool is populated before Pass 1 begins.

use std::collections::HashMap;
use std::io::Write;

use crate::diagnostics::{DiagnosticSink, Severity};
use crate::expr::{fold_word, Evaluator};
use crate::instructions::InstructionTable;
use crate::lexer::{parse_line, SourceLine};
use crate::output::OutputGenerator;
use crate::pass1;
use crate::pass2;
use crate::state::{AssemblerState, Capture, Pass, ABSOLUTE_BLOCK};
use crate::symbols::{Symbol, SymbolKind, SymbolTable};

/// A captured MACRO/OPDEF definition. Bodies are stored but not
/// expanded; call sites size as zero bits with a warning.
#[derive(Debug, Clone)]
pub struct MacroDef {
    pub kind: Capture,
    pub params: Vec<String>,
    pub body: Vec<String>,
    pub line: usize,
}

pub struct Assembler {
    pub state: AssemblerState,
    pub symbols: SymbolTable,
    pub table: InstructionTable,
    pub sink: DiagnosticSink,
    pub micros: HashMap<String, String>,
    pub macros: HashMap<String, MacroDef>,
    pub remotes: HashMap<String, Vec<SourceLine>>,
    pub lines: Vec<SourceLine>,
    pub end_label: Option<String>,
    pub endl_value: u64,
    pub total_length: u64,
}

impl Assembler {
    pub fn new(table: InstructionTable) -> Assembler {
        Assembler {
            state: AssemblerState::new(),
            symbols: SymbolTable::new(),
            table,
            sink: DiagnosticSink::new(),
            micros: HashMap::new(),
            macros: HashMap::new(),
            remotes: HashMap::new(),
            lines: Vec::new(),
            end_label: None,
            endl_value: 0,
            total_length: 0,
        }
    }

    /// An expression evaluator over this assembler's current state.
    pub fn evaluator(&mut self, line: usize, suppress_undefined: bool) -> Evaluator<'_> {
        Evaluator {
            symbols: &mut self.symbols,
            state: &self.state,
            micros: &self.micros,
            sink: &mut self.sink,
            line,
            suppress_undefined,
        }
    }

    pub fn diagnostics(&self) -> &DiagnosticSink {
        &self.sink
    }

    /// Assemble `source`, writing the listing and the binary. Returns
    /// true when the run produced no errors (warnings allowed).
    pub fn assemble(
        &mut self,
        source: &str,
        listing: &mut dyn Write,
        binary: &mut dyn Write,
    ) -> bool {
        self.lines = source
            .lines()
            .enumerate()
            .map(|(index, text)| parse_line(text, index + 1))
            .collect();

        self.prescan_literals();
        self.run_pass1();
        self.layout();

        if self.sink.has_errors() {
            log::debug!("Pass 1 reported errors; Pass 2 skipped");
            return false;
        }

        self.run_pass2(listing, binary);
        !self.sink.has_errors()
    }

    /// Seed the literal pool from every LIT directive so the pool size
    /// is known before Pass 1 sizes anything. Evaluation here is
    /// speculative: failures are silent and retried in Pass 1 proper.
    fn prescan_literals(&mut self) {
        let items: Vec<(usize, String)> = self
            .lines
            .iter()
            .filter(|line| line.opcode_upper().as_deref() == Some("LIT"))
            .map(|line| (line.number, line.operand_str().to_string()))
            .collect();
        let mut scratch = DiagnosticSink::new();
        for (number, operand) in items {
            for item in operand.split(',') {
                let item = item.trim();
                if item.is_empty() {
                    continue;
                }
                let value = {
                    let mut ev = Evaluator {
                        symbols: &mut self.symbols,
                        state: &self.state,
                        micros: &self.micros,
                        sink: &mut scratch,
                        line: number,
                        suppress_undefined: true,
                    };
                    ev.data_item(item)
                };
                if let Ok(value) = value {
                    if value.is_absolute() {
                        self.symbols.add_literal(fold_word(value.number()));
                    }
                }
            }
        }
        log::debug!(
            "literal pre-pass found {} pool words",
            self.symbols.literal_block_size()
        );
    }

    fn run_pass1(&mut self) {
        self.state = AssemblerState::new();
        self.state.pass = Pass::One;

        for index in 0..self.lines.len() {
            self.state.line_number = self.lines[index].number;
            self.state.line_start_lc = self.state.lc;
            self.state.line_start_pc = self.state.pc;

            let mut line = self.lines[index].clone();
            pass1::process_line(self, &mut line);
            self.lines[index] = line;

            if self.state.end_seen {
                break;
            }
        }

        // A label on END is defined at the end of the final block.
        if let Some(label) = self.end_label.clone() {
            self.state.force_upper();
            let (value, kind, block) = if self.state.lc_is_absolute
                || self.state.current_block == ABSOLUTE_BLOCK
            {
                (self.state.lc, SymbolKind::Absolute, None)
            } else {
                let block = self.state.current_block;
                (
                    self.state.blocks.size(block),
                    SymbolKind::Relocatable,
                    Some(block),
                )
            };
            let symbol = Symbol {
                value: value as i64,
                kind,
                block,
                ..Symbol::absolute(0, self.state.line_number)
            };
            let qualifier = self.state.qualifier.clone();
            self.symbols
                .define(&label, symbol, qualifier.as_deref(), &mut self.sink);
        }
    }

    /// Between the passes: literal addresses, block bases, and the
    /// length ENDL reports.
    fn layout(&mut self) {
        let literal_words = self.symbols.literal_block_size();
        self.symbols.assign_literal_addresses(0);
        self.total_length = self.state.blocks.compute_bases(literal_words, &mut self.sink);
        self.endl_value = match self.state.blocks.first_use_order().first() {
            Some(&first) => literal_words + self.state.blocks.size(first),
            None => self.total_length,
        };
        log::debug!(
            "layout: literals {:o}, total {:o}, endl {:o}",
            literal_words,
            self.total_length,
            self.endl_value
        );
    }

    fn run_pass2(&mut self, listing: &mut dyn Write, binary: &mut dyn Write) {
        let literal_words = self.symbols.literal_block_size();
        self.state.reset_for_pass2(literal_words);
        let mut out = OutputGenerator::new(listing, binary);

        // The IDENT word is word 0 of the image, ahead of the pool.
        let ident_index = self
            .lines
            .iter()
            .position(|line| line.opcode_upper().as_deref() == Some("IDENT"));
        if let Some(index) = ident_index {
            let line = self.lines[index].clone();
            let items = crate::pseudo::handle_pass2(self, &mut out, &line, "IDENT");
            match items.as_deref().and_then(|items| items.first()) {
                Some(item) => {
                    if let Some((word, 60)) = item.parcel() {
                        out.add_word(0, word);
                    }
                }
                None => {
                    self.sink.error_once(
                        line.number,
                        Severity::Fatal,
                        "failed to generate the IDENT word",
                    );
                }
            }
            let code = self.sink.code_for_line(line.number);
            out.write_line(
                None,
                0,
                items.as_deref(),
                &line.text,
                code,
                false,
                &mut self.state,
                Some("IDENT"),
            );
        }

        // Literal pool words follow immediately.
        let pool: Vec<u64> = self.symbols.literal_pool().to_vec();
        for value in &pool {
            let address = self.symbols.literal_address(*value).unwrap_or(0);
            out.add_word(address, *value);
        }

        for index in 0..self.lines.len() {
            if Some(index) == ident_index {
                continue;
            }
            self.state.line_number = self.lines[index].number;
            self.state.line_start_lc = self.state.lc;
            self.state.line_start_pc = self.state.pc;

            let line = self.lines[index].clone();
            pass2::process_line(self, &mut out, &line);

            if self.state.end_seen {
                break;
            }
        }

        out.flush_word(true);

        let pairs: Vec<(u64, u64)> = pool
            .iter()
            .map(|value| (self.symbols.literal_address(*value).unwrap_or(0), *value))
            .collect();
        out.write_literals_block(&pairs);
        self.write_symbol_table(&mut out);
        out.finish();
    }

    /// The `SYMBOLIC REFERENCE TABLE` trailer: unqualified symbols
    /// first, then one group per qualifier, relocatables shown as
    /// absolute addresses.
    fn write_symbol_table(&mut self, out: &mut OutputGenerator<'_>) {
        out.write_symbol_table_header();

        let mut unqualified: Vec<(String, Symbol)> = Vec::new();
        let mut qualified: Vec<(String, String, Symbol)> = Vec::new();
        for (name, symbol) in self.symbols.sorted_symbols() {
            match name.split_once('$') {
                Some((qualifier, simple)) => {
                    qualified.push((qualifier.to_string(), simple.to_string(), symbol.clone()))
                }
                None => unqualified.push((name.clone(), symbol.clone())),
            }
        }

        let display_value = |symbol: &Symbol, state: &AssemblerState| -> i64 {
            match (symbol.kind, symbol.block) {
                (SymbolKind::Relocatable, Some(block)) if block != ABSOLUTE_BLOCK => {
                    symbol.value + state.blocks.base(block) as i64
                }
                _ => symbol.value,
            }
        };
        let tags = |symbol: &Symbol| -> String {
            let mut tags = Vec::new();
            match symbol.kind {
                SymbolKind::Relocatable => tags.push("REL"),
                SymbolKind::External => tags.push("EXT"),
                SymbolKind::Absolute => {}
            }
            if symbol.program_name {
                tags.push("IDENT");
            }
            if symbol.redefinable {
                tags.push("SET");
            }
            if symbol.defined_by_loc {
                tags.push("LOC");
            }
            tags.join(",")
        };

        for (name, symbol) in &unqualified {
            out.write_symbol_row(
                name,
                display_value(symbol, &self.state),
                symbol.line,
                &tags(symbol),
            );
        }
        let mut current: Option<&str> = None;
        for (qualifier, simple, symbol) in &qualified {
            if current != Some(qualifier.as_str()) {
                out.write_symbol_qualifier(qualifier);
                current = Some(qualifier.as_str());
            }
            out.write_symbol_row(
                simple,
                display_value(symbol, &self.state),
                symbol.line,
                &tags(symbol),
            );
        }
    }
}
