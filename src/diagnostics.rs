//! Diagnostics sink shared by both passes.
//!
//! Errors are accumulated rather than raised so a single run can list
//! every problem in the source. Each diagnostic carries a single-letter
//! severity code; the listing shows the most severe code per line.

use std::collections::HashSet;
use std::io::Write;

/// Single-letter diagnostic codes, most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    /// F — internal inconsistency, aborts the pass.
    Fatal,
    /// E — general error.
    Error,
    /// A — assembly error.
    Assembly,
    /// S — syntax error.
    Syntax,
    /// O — operand format error.
    Operand,
    /// U — undefined symbol.
    Undefined,
    /// V — value out of range.
    Value,
    /// L — label error.
    Label,
    /// C — character error.
    Character,
    /// R — relocation error.
    Relocation,
    /// I — instruction-table error.
    Instruction,
    /// W — warning, never fails the assembly.
    Warning,
}

impl Severity {
    pub fn letter(self) -> char {
        match self {
            Severity::Fatal => 'F',
            Severity::Error => 'E',
            Severity::Assembly => 'A',
            Severity::Syntax => 'S',
            Severity::Operand => 'O',
            Severity::Undefined => 'U',
            Severity::Value => 'V',
            Severity::Label => 'L',
            Severity::Character => 'C',
            Severity::Relocation => 'R',
            Severity::Instruction => 'I',
            Severity::Warning => 'W',
        }
    }
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub line: usize,
    pub severity: Severity,
    pub message: String,
    pub is_error: bool,
}

/// Collects errors and warnings keyed by source line.
#[derive(Debug, Default)]
pub struct DiagnosticSink {
    diagnostics: Vec<Diagnostic>,
    error_lines: HashSet<usize>,
}

impl DiagnosticSink {
    pub fn new() -> DiagnosticSink {
        DiagnosticSink::default()
    }

    pub fn error(&mut self, line: usize, severity: Severity, message: impl Into<String>) {
        let message = message.into();
        log::debug!("L{}: {} [{}]", line, message, severity.letter());
        self.diagnostics.push(Diagnostic {
            line,
            severity,
            message,
            is_error: true,
        });
        if line != 0 {
            self.error_lines.insert(line);
        }
    }

    /// Report an error only if the line has none yet, so a cascade of
    /// failures from one statement produces a single diagnostic.
    pub fn error_once(&mut self, line: usize, severity: Severity, message: impl Into<String>) {
        if !self.has_error_on_line(line) {
            self.error(line, severity, message);
        }
    }

    pub fn warning(&mut self, line: usize, severity: Severity, message: impl Into<String>) {
        let message = message.into();
        log::debug!("L{}: {} [{}] (warning)", line, message, severity.letter());
        self.diagnostics.push(Diagnostic {
            line,
            severity,
            message,
            is_error: false,
        });
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(|d| d.is_error)
    }

    pub fn has_warnings(&self) -> bool {
        self.diagnostics.iter().any(|d| !d.is_error)
    }

    pub fn has_error_on_line(&self, line: usize) -> bool {
        self.error_lines.contains(&line)
    }

    pub fn error_count(&self) -> usize {
        self.diagnostics.iter().filter(|d| d.is_error).count()
    }

    pub fn warning_count(&self) -> usize {
        self.diagnostics.iter().filter(|d| !d.is_error).count()
    }

    /// The most severe code recorded for a line, if any.
    pub fn code_for_line(&self, line: usize) -> Option<char> {
        self.diagnostics
            .iter()
            .filter(|d| d.line == line)
            .map(|d| d.severity)
            .min()
            .map(Severity::letter)
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Write the end-of-run summary, errors then warnings by line.
    pub fn write_summary(&self, out: &mut dyn Write) -> std::io::Result<()> {
        let mut errors: Vec<&Diagnostic> = self.diagnostics.iter().filter(|d| d.is_error).collect();
        let mut warnings: Vec<&Diagnostic> =
            self.diagnostics.iter().filter(|d| !d.is_error).collect();
        errors.sort_by_key(|d| d.line);
        warnings.sort_by_key(|d| d.line);

        if !errors.is_empty() {
            writeln!(out, "--- Errors ---")?;
            for d in &errors {
                writeln!(out, "L{}: {} [{}]", d.line, d.message, d.severity.letter())?;
            }
        }
        if !warnings.is_empty() {
            writeln!(out, "--- Warnings ---")?;
            for d in &warnings {
                writeln!(out, "L{}: {} [{}]", d.line, d.message, d.severity.letter())?;
            }
        }
        writeln!(
            out,
            "Total errors: {}, total warnings: {}",
            errors.len(),
            warnings.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn highest_severity_wins_for_a_line() {
        let mut sink = DiagnosticSink::new();
        sink.warning(4, Severity::Warning, "late");
        sink.error(4, Severity::Operand, "bad operand");
        sink.error(4, Severity::Syntax, "bad syntax");
        assert_eq!(sink.code_for_line(4), Some('S'));
        assert_eq!(sink.code_for_line(5), None);
    }

    #[test]
    fn error_once_suppresses_cascades() {
        let mut sink = DiagnosticSink::new();
        sink.error_once(7, Severity::Undefined, "undefined FOO");
        sink.error_once(7, Severity::Error, "followup");
        assert_eq!(sink.error_count(), 1);
    }

    #[test]
    fn warnings_do_not_count_as_errors() {
        let mut sink = DiagnosticSink::new();
        sink.warning(1, Severity::Value, "truncated");
        assert!(!sink.has_errors());
        assert!(sink.has_warnings());
        assert!(!sink.has_error_on_line(1));
        assert_eq!(sink.code_for_line(1), Some('V'));
    }
}
