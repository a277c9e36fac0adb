//! The instruction map: mnemonic definitions and pseudo-op names.
//!
//! Definitions come from a whitespace-separated map file, one per
//! line: `width opcode-octal mnemonic [format-hint] [comment]`. A
//! mnemonic key ending in `I` over a known prefix covers the eight
//! digit-indexed forms (`SAI` stands for `SA0..SA7`); several
//! mnemonics carry both a 15-bit and a 30-bit definition and are
//! disambiguated by the width resolver in the encoder.

use std::collections::HashMap;
use std::fmt;

/// The canonical CDC 6000 map shipped with the assembler.
pub const BUILTIN_MAP: &str = include_str!("../inst-map.txt");

/// Mnemonic families that use the trailing-digit pattern.
const PATTERN_PREFIXES: &[&str] = &[
    "SA", "SB", "SX", "LX", "AX", "FX", "RX", "DX", "IX", "NX", "ZX", "UX", "PX", "MX", "CX",
    "BX", "JP",
];

#[derive(Debug, Clone)]
pub struct InstructionDef {
    /// Parcel width in bits: 15, 30 or 60.
    pub width: u32,
    /// Opcode bits from the map, already parsed from octal.
    pub bits: u32,
    /// Operand format hint, upper case.
    pub format: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapError {
    pub line: usize,
    pub message: String,
}

impl fmt::Display for MapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "instruction map line {}: {}", self.line, self.message)
    }
}

#[derive(Debug, Default)]
pub struct InstructionTable {
    defs: HashMap<String, Vec<InstructionDef>>,
    /// Base mnemonic to map key, e.g. `SA` → `SAI`.
    pattern_keys: HashMap<String, String>,
}

impl InstructionTable {
    /// Parse a map file. An empty map is an error: nothing could be
    /// assembled with it.
    pub fn parse(source: &str) -> Result<InstructionTable, MapError> {
        let mut table = InstructionTable::default();
        for (index, raw) in source.lines().enumerate() {
            let line_number = index + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.split_whitespace();
            let (width_str, opcode_str, mnemonic) =
                match (fields.next(), fields.next(), fields.next()) {
                    (Some(w), Some(o), Some(m)) => (w, o, m),
                    _ => {
                        return Err(MapError {
                            line: line_number,
                            message: format!("malformed entry '{}'", line),
                        })
                    }
                };
            let width: u32 = width_str.parse().map_err(|_| MapError {
                line: line_number,
                message: format!("invalid width '{}'", width_str),
            })?;
            if !matches!(width, 15 | 30 | 60) {
                return Err(MapError {
                    line: line_number,
                    message: format!("unsupported width {}", width),
                });
            }
            let bits = u32::from_str_radix(opcode_str, 8).map_err(|_| MapError {
                line: line_number,
                message: format!("invalid octal opcode '{}'", opcode_str),
            })?;

            // The hint field may be followed by a comment introduced
            // by `*`, `.` or `#`.
            let format = fields
                .next()
                .filter(|hint| {
                    !hint.starts_with('*') && !hint.starts_with('.') && !hint.starts_with('#')
                })
                .map(|hint| hint.to_ascii_uppercase())
                .unwrap_or_default();

            table
                .defs
                .entry(mnemonic.to_ascii_uppercase())
                .or_default()
                .push(InstructionDef { width, bits, format });
        }
        if table.defs.is_empty() {
            return Err(MapError {
                line: 0,
                message: "no instruction definitions".to_string(),
            });
        }

        for key in table.defs.keys() {
            if let Some(base) = key.strip_suffix('I') {
                if PATTERN_PREFIXES.contains(&base) {
                    table.pattern_keys.insert(base.to_string(), key.clone());
                }
            }
        }
        Ok(table)
    }

    /// The map key a mnemonic resolves through: itself, or the pattern
    /// key when it is a digit-indexed form.
    fn resolve_key(&self, mnemonic: &str) -> Option<String> {
        let upper = mnemonic.to_ascii_uppercase();
        if self.defs.contains_key(&upper) {
            return Some(upper);
        }
        if upper.len() >= 3 {
            let (base, digit) = upper.split_at(upper.len() - 1);
            let digit_ok = digit.chars().next().is_some_and(|d| ('0'..='7').contains(&d));
            if digit_ok {
                if let Some(key) = self.pattern_keys.get(base) {
                    return Some(key.clone());
                }
            }
        }
        None
    }

    pub fn is_instruction(&self, mnemonic: &str) -> bool {
        self.resolve_key(mnemonic).is_some()
    }

    pub fn lookup(&self, mnemonic: &str) -> Option<&[InstructionDef]> {
        self.resolve_key(mnemonic)
            .and_then(|key| self.defs.get(&key))
            .map(Vec::as_slice)
    }

    /// `SA1` → `SA`; mnemonics outside the pattern families are
    /// returned unchanged.
    pub fn base_mnemonic(&self, mnemonic: &str) -> String {
        let upper = mnemonic.to_ascii_uppercase();
        if upper.len() >= 3 {
            let (base, digit) = upper.split_at(upper.len() - 1);
            if PATTERN_PREFIXES.contains(&base)
                && digit.chars().next().is_some_and(|d| ('0'..='7').contains(&d))
            {
                return base.to_string();
            }
        }
        upper
    }

    /// The i-register index carried by a digit-indexed mnemonic, 0 for
    /// the plain form.
    pub fn pattern_index(&self, mnemonic: &str) -> u8 {
        let upper = mnemonic.to_ascii_uppercase();
        if upper.len() >= 3 {
            let (base, digit) = upper.split_at(upper.len() - 1);
            if PATTERN_PREFIXES.contains(&base) {
                if let Some(d) = digit.chars().next().filter(|d| ('0'..='7').contains(d)) {
                    return d as u8 - b'0';
                }
            }
        }
        0
    }

    pub fn is_pseudo_op(&self, mnemonic: &str) -> bool {
        is_pseudo_op_name(&mnemonic.to_ascii_uppercase())
    }
}

/// The COMPASS pseudo-operation names the assembler recognizes.
/// Directives without specific semantics are accepted as no-ops.
fn is_pseudo_op_name(name: &str) -> bool {
    matches!(
        name,
        "IDENT" | "END" | "ENDL" | "ABS" | "REL" | "USE" | "LOC" | "ORG" | "ORGC" | "FIN"
            | "BASE" | "CODE" | "QUAL" | "SEQ" | "COL" | "LIST" | "NOLIST"
            | "DATA" | "CON" | "LIT" | "DIS" | "VFD" | "BSS" | "BSSZ" | "COMMON" | "ENDC"
            | "EQU" | "=" | "SET" | "MAX" | "MIN" | "MICCNT" | "SST"
            | "IF" | "IFTPA" | "IFCP" | "IFPP" | "IFPPA" | "IFPP7"
            | "IFEQ" | "IFNE" | "IFGT" | "IFGE" | "IFLT" | "IFLE" | "IFPL" | "IFMI" | "IFC"
            | "ENDIF" | "ELSE" | "SKIP"
            | "ENTRY" | "EXT"
            | "TITLE" | "TTL" | "SPACE" | "EJECT" | "NOREF" | "XREF"
            | "CTEXT" | "XTEXT" | "ENDX"
            | "MACRO" | "MACROE" | "ENDM" | "LOCAL" | "IRP" | "ENDD" | "OPDEF" | "PURGE"
            | "DUP" | "ECHO" | "RMT" | "HERE"
            | "PPU" | "PERIPH" | "PPOP" | "OPSYN"
            | "MICRO" | "DECMIC" | "OCTMIC" | "ENDMIC"
            | "MACHINE" | "COMMENT" | "CPOP" | "CPSYN" | "ENTRYC"
            | "ERR" | "ERRMI" | "ERRNG" | "ERRNZ" | "ERRPL" | "ERRZR" | "LCC"
            | "NIL" | "NOLABEL" | "PURGDEF" | "PURGMAC"
            | "REP" | "REPC" | "REPI" | "R=" | "SEG" | "SEGMENT"
            | "STEXT" | "STOPDUP" | "USELCM" | "POS"
    )
}

#[cfg(test)]
mod tests {
    use yare::parameterized;

    use super::*;

    fn table() -> InstructionTable {
        InstructionTable::parse(BUILTIN_MAP).unwrap()
    }

    #[test]
    fn builtin_map_parses() {
        let table = table();
        assert!(table.is_instruction("RJ"));
        assert!(table.is_instruction("NO"));
        assert!(!table.is_instruction("FROB"));
    }

    #[parameterized(
        sa = { "SA3", "SA", 3 },
        bx = { "BX0", "BX", 0 },
        jp = { "JP5", "JP", 5 },
        plain = { "RJ", "RJ", 0 },
    )]
    fn pattern_resolution(mnemonic: &str, base: &str, index: u8) {
        let table = table();
        assert!(table.is_instruction(mnemonic));
        assert_eq!(table.base_mnemonic(mnemonic), base);
        assert_eq!(table.pattern_index(mnemonic), index);
    }

    #[test]
    fn sa_has_both_widths() {
        let table = table();
        let defs = table.lookup("SA1").unwrap();
        let mut widths: Vec<u32> = defs.iter().map(|d| d.width).collect();
        widths.sort_unstable();
        assert_eq!(widths, vec![15, 30]);
    }

    #[test]
    fn register_digit_out_of_range_is_not_an_instruction() {
        let table = table();
        assert!(!table.is_instruction("SA8"));
        assert!(!table.is_instruction("SA9"));
    }

    #[test]
    fn comment_tails_are_stripped_from_hints() {
        let table = InstructionTable::parse("30 010 RJ K . return jump\n").unwrap();
        assert_eq!(table.lookup("RJ").unwrap()[0].format, "K");
        let table = InstructionTable::parse("30 010 RJ *comment\n").unwrap();
        assert_eq!(table.lookup("RJ").unwrap()[0].format, "");
    }

    #[test]
    fn malformed_entries_are_errors() {
        assert!(InstructionTable::parse("15 10000\n").is_err());
        assert!(InstructionTable::parse("xx 10000 BXI\n").is_err());
        assert!(InstructionTable::parse("15 9 BXI\n").is_err());
        assert!(InstructionTable::parse("# only comments\n").is_err());
    }

    #[parameterized(
        ident = { "IDENT", true },
        equ = { "EQU", true },
        rmt = { "RMT", true },
        lower = { "use", true },
        not_an_op = { "SA1", false },
    )]
    fn pseudo_op_names(name: &str, expected: bool) {
        assert_eq!(table().is_pseudo_op(name), expected);
    }
}
