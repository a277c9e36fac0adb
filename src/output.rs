//! Listing and binary output.
//!
//! The binary side buffers one 60-bit word at a time, packing parcels
//! left to right and padding partial words with 15-bit no-ops; each
//! completed word is written as twenty octal digits on its own line,
//! in ascending address order.
//!
//! The listing side paginates at 55 lines per page. Each emitting line
//! shows the LC (only when the line starts a word), the severity code,
//! the octal data indented by the starting bit position, then the
//! source text; multi-word lines wrap at word boundaries and repeat
//! the source only on the first segment.

use std::io::Write;

use crate::encoder::NOOP_PARCEL;
use crate::state::AssemblerState;

pub const LINES_PER_PAGE: u32 = 55;
const LC_WIDTH: usize = 6;
const OCTAL_FIELD_WIDTH: usize = 28;

/// One unit of data for a listing row. Only `Parcel` reaches the
/// binary; the others fill the octal/indicator column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListingItem {
    /// An emitted parcel: value and width in bits.
    Parcel(u64, u32),
    /// A defined value (EQU, SET, BSS count) shown in octal.
    Value(i64),
    /// An `EQU *` value, shown like `Value` but kept distinct.
    EquStar(i64),
    /// A BASE/CODE mode change, e.g. `D_O`.
    ModeChange(String),
    /// Blank listing lines requested by SPACE.
    Space(u32),
}

impl ListingItem {
    pub fn parcel(&self) -> Option<(u64, u32)> {
        match self {
            ListingItem::Parcel(value, width) => Some((*value, *width)),
            _ => None,
        }
    }
}

/// Pseudo-ops that list with a blank LC and octal field.
fn lists_blank(mnemonic: &str) -> bool {
    matches!(
        mnemonic,
        "TITLE" | "TTL" | "LIST" | "NOLIST" | "QUAL" | "MACHINE" | "CPU" | "PPU" | "CMU"
            | "EJECT" | "COMMENT" | "ERROR" | "FIN" | "REF" | "NOREF" | "XREF" | "SEQ" | "SKIP"
            | "UNL" | "CTEXT" | "ENDX" | "RMT" | "HERE" | "EXT" | "ENTRY" | "MACRO" | "ENDM"
            | "OPDEF" | "MICRO" | "LOCAL" | "IRP" | "ENDD" | "DUP" | "ECHO" | "PURGE" | "OPSYN"
            | "DECMIC" | "OCTMIC" | "ENDMIC" | "LCC" | "NIL" | "NOLABEL" | "PURGDEF" | "PURGMAC"
            | "REP" | "REPC" | "REPI" | "R=" | "SEG" | "SEGMENT" | "SST" | "STEXT" | "STOPDUP"
            | "USELCM" | "POS" | "MAX" | "MIN" | "MICCNT" | "IF" | "IFC" | "IFCP" | "IFPP"
            | "IFEQ" | "IFNE" | "IFGT" | "IFGE" | "IFLT" | "IFLE" | "IFPL" | "IFMI" | "ELSE"
            | "ENDIF" | "LIT" | "ABS" | "USE" | "SPACE"
    )
}

pub struct OutputGenerator<'a> {
    listing: &'a mut dyn Write,
    binary: &'a mut dyn Write,
    buffered_word: u64,
    bits_in_buffer: u32,
    buffer_address: Option<u64>,
    page_number: u32,
    lines_on_page: u32,
}

impl<'a> OutputGenerator<'a> {
    pub fn new(listing: &'a mut dyn Write, binary: &'a mut dyn Write) -> OutputGenerator<'a> {
        OutputGenerator {
            listing,
            binary,
            buffered_word: 0,
            bits_in_buffer: 0,
            buffer_address: None,
            page_number: 0,
            lines_on_page: LINES_PER_PAGE + 1,
        }
    }

    // --- binary side ---

    /// Pack a parcel into the buffered word at `address`. A change of
    /// address flushes the previous word first.
    pub fn add_parcel(&mut self, address: u64, value: u64, width: u32) {
        if self.bits_in_buffer > 0 && self.buffer_address != Some(address) {
            self.flush_word(true);
        }
        if self.bits_in_buffer == 0 {
            self.buffer_address = Some(address);
            self.buffered_word = 0;
        }
        if self.bits_in_buffer + width > 60 {
            log::warn!(
                "parcel of width {} overflows word at {:o}; flushing",
                width,
                address
            );
            self.flush_word(true);
            self.buffer_address = Some(address);
        }
        let shift = 60 - self.bits_in_buffer - width;
        let mask = if width >= 60 { u64::MAX } else { (1 << width) - 1 };
        self.buffered_word |= (value & mask) << shift;
        self.bits_in_buffer += width;
        if self.bits_in_buffer == 60 {
            self.write_buffered_word();
        }
    }

    /// Emit a complete 60-bit word at `address`.
    pub fn add_word(&mut self, address: u64, word: u64) {
        if self.bits_in_buffer > 0 {
            self.flush_word(true);
        }
        self.buffer_address = Some(address);
        self.buffered_word = word;
        self.bits_in_buffer = 60;
        self.write_buffered_word();
    }

    /// Complete a partial word, padding with no-ops (or zero bits).
    pub fn flush_word(&mut self, pad_with_noops: bool) {
        if self.bits_in_buffer == 0 {
            return;
        }
        if self.bits_in_buffer < 60 {
            if pad_with_noops {
                let mut remaining = 60 - self.bits_in_buffer;
                while remaining >= 15 {
                    self.buffered_word |= NOOP_PARCEL << (remaining - 15);
                    remaining -= 15;
                }
                self.buffered_word <<= remaining;
            } else {
                self.buffered_word <<= 60 - self.bits_in_buffer;
            }
            self.bits_in_buffer = 60;
        }
        self.write_buffered_word();
    }

    fn write_buffered_word(&mut self) {
        if self.buffer_address.is_some() && self.bits_in_buffer > 0 {
            let _ = writeln!(self.binary, "{:020o}", self.buffered_word);
        }
        self.buffered_word = 0;
        self.bits_in_buffer = 0;
        self.buffer_address = None;
    }

    // --- listing side ---

    fn write_page_header(&mut self, state: &mut AssemblerState) {
        self.page_number += 1;
        let mut title = if !state.ttl_title.is_empty() {
            state.ttl_title.clone()
        } else {
            state.title.clone()
        };
        if title.is_empty() {
            if let Some(symbol) = &state.start_symbol {
                title = symbol.clone();
            }
        }
        title.truncate(62);

        let left = format!("{:<70}{:<25}", title, "COMPASS60 ASSEMBLER");
        let _ = writeln!(self.listing, "{}PAGE {:>5}", left, self.page_number);
        let block = if state.current_block.0 != 0 {
            state.blocks.name(state.current_block).to_string()
        } else {
            String::new()
        };
        let _ = writeln!(self.listing, "{:>120}", block);
        let _ = writeln!(self.listing);
        self.lines_on_page = 3;

        // A TTL title covers one page header, then the TITLE text
        // takes over again.
        state.ttl_title.clear();
    }

    fn print_row(&mut self, lc: &str, code: char, octal: &str, source: &str, state: &mut AssemblerState) {
        if self.lines_on_page >= LINES_PER_PAGE {
            if self.page_number > 0 {
                let _ = writeln!(self.listing, "\x0c");
            }
            self.write_page_header(state);
        }
        let _ = writeln!(
            self.listing,
            "{:<lcw$} {} {:<ocw$} {}",
            lc,
            code,
            octal,
            source,
            lcw = LC_WIDTH,
            ocw = OCTAL_FIELD_WIDTH
        );
        self.lines_on_page += 1;
    }

    pub fn add_blank_lines(&mut self, count: u32, state: &mut AssemblerState) {
        for _ in 0..count {
            if self.lines_on_page >= LINES_PER_PAGE {
                if self.page_number > 0 {
                    let _ = writeln!(self.listing, "\x0c");
                }
                self.write_page_header(state);
            }
            let _ = writeln!(self.listing);
            self.lines_on_page += 1;
        }
    }

    /// Request a page break before the next body line.
    pub fn force_page_break(&mut self) {
        if self.lines_on_page > 3 {
            self.lines_on_page = LINES_PER_PAGE;
        }
    }

    fn format_parcel(value: u64, width: u32) -> String {
        let digits = match width {
            15 => 5,
            30 => 10,
            60 => 20,
            other => (other as usize).div_ceil(3),
        };
        let mask = if width >= 60 { u64::MAX } else { (1 << width) - 1 };
        format!("{:0digits$o}", value & mask, digits = digits)
    }

    fn format_value(value: i64) -> String {
        if value < 0 {
            format!("{:o}", fold_negative(value))
        } else {
            format!("{:o}", value)
        }
    }

    /// Write the listing row(s) for one source line.
    #[allow(clippy::too_many_arguments)]
    pub fn write_line(
        &mut self,
        lc: Option<u64>,
        pc: u32,
        data: Option<&[ListingItem]>,
        source: &str,
        code: Option<char>,
        skipped: bool,
        state: &mut AssemblerState,
        mnemonic: Option<&str>,
    ) {
        let code_char = code.unwrap_or(' ');
        let mnemonic = mnemonic.map(str::to_ascii_uppercase).unwrap_or_default();

        if skipped {
            self.print_row("", ' ', "", source, state);
            return;
        }
        if source.trim_start().starts_with('*') || (mnemonic.is_empty() && source.trim().is_empty())
        {
            self.print_row("", code_char, "", source, state);
            return;
        }
        if lists_blank(&mnemonic) {
            let mut octal = String::new();
            if let Some(items) = data {
                if let Some(ListingItem::ModeChange(change)) = items.first() {
                    octal = format!("{:>ocw$}", change, ocw = OCTAL_FIELD_WIDTH);
                }
            }
            self.print_row("", code_char, &octal, source, state);
            return;
        }
        if matches!(mnemonic.as_str(), "EQU" | "=" | "SET" | "BSS" | "BSSZ" | "ENDL") {
            let lc_text = match (mnemonic.as_str(), lc) {
                ("BSS" | "BSSZ" | "ENDL", Some(lc)) => format!("{:>lcw$o}", lc, lcw = LC_WIDTH),
                _ => String::new(),
            };
            let octal = match data.and_then(|items| items.first()) {
                Some(ListingItem::Value(v)) | Some(ListingItem::EquStar(v)) => {
                    format!("{:>ocw$}", Self::format_value(*v), ocw = OCTAL_FIELD_WIDTH)
                }
                _ => String::new(),
            };
            self.print_row(&lc_text, code_char, &octal, source, state);
            return;
        }

        let parcels: Vec<(u64, u32)> = data
            .iter()
            .flat_map(|items| items.iter())
            .filter_map(ListingItem::parcel)
            .collect();
        if parcels.is_empty() {
            let lc_text = match lc {
                Some(lc) if pc == 0 => format!("{:>lcw$o}", lc, lcw = LC_WIDTH),
                _ => String::new(),
            };
            self.print_row(&lc_text, code_char, "", source, state);
            return;
        }

        // Tile the parcels into 60-bit display segments; only the
        // first segment carries the source text.
        let mut segment_lc = lc;
        let mut segment_pc = pc;
        let mut segment = String::new();
        let mut bits = 0;
        let mut first = true;
        let mut code_char = code_char;
        let mut flush =
            |this: &mut Self, segment: &mut String, segment_lc: &mut Option<u64>, segment_pc: &mut u32, first: &mut bool, code_char: &mut char, state: &mut AssemblerState| {
                let lc_text = match segment_lc {
                    Some(lc) if *segment_pc == 0 => format!("{:>lcw$o}", lc, lcw = LC_WIDTH),
                    _ => String::new(),
                };
                let indent = " ".repeat(*segment_pc as usize / 3);
                let octal = format!("{}{}", indent, segment);
                let source_text = if *first { source } else { "" };
                this.print_row(&lc_text, *code_char, &octal, source_text, state);
                *first = false;
                *code_char = ' ';
                segment.clear();
                *segment_pc = 0;
                if let Some(lc) = segment_lc {
                    *lc += 1;
                }
            };

        for (value, width) in parcels {
            if segment_pc + bits + width > 60 && bits > 0 {
                flush(self, &mut segment, &mut segment_lc, &mut segment_pc, &mut first, &mut code_char, state);
                bits = 0;
            }
            segment.push_str(&Self::format_parcel(value, width));
            bits += width;
            if segment_pc + bits == 60 {
                flush(self, &mut segment, &mut segment_lc, &mut segment_pc, &mut first, &mut code_char, state);
                bits = 0;
            }
        }
        if bits > 0 {
            flush(self, &mut segment, &mut segment_lc, &mut segment_pc, &mut first, &mut code_char, state);
        }
    }

    /// The `CONTENT OF LITERALS BLOCK` trailer.
    pub fn write_literals_block(&mut self, pool: &[(u64, u64)]) {
        if pool.is_empty() {
            return;
        }
        let _ = writeln!(self.listing, "\n\n        CONTENT OF LITERALS BLOCK.\n");
        for (address, value) in pool {
            let _ = writeln!(self.listing, "{:>5o}  {:020o}", address, value);
        }
        let _ = writeln!(self.listing);
    }

    pub fn write_symbol_table_header(&mut self) {
        let _ = writeln!(self.listing, "\n\n        SYMBOLIC REFERENCE TABLE.\n");
    }

    pub fn write_symbol_qualifier(&mut self, qualifier: &str) {
        let _ = writeln!(
            self.listing,
            "\n{:>50}{}\n",
            "SYMBOL QUALIFIER =  ", qualifier
        );
    }

    pub fn write_symbol_row(&mut self, name: &str, value: i64, line: usize, tags: &str) {
        let _ = writeln!(
            self.listing,
            "  {:<12}{:>10}  {:>6}  {}",
            name,
            Self::format_value(value),
            line,
            tags
        );
    }

    pub fn finish(&mut self) {
        self.flush_word(true);
        let _ = self.listing.flush();
        let _ = self.binary.flush();
    }
}

fn fold_negative(value: i64) -> u64 {
    value as u64 & ((1 << 60) - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> AssemblerState {
        AssemblerState::new()
    }

    #[test]
    fn parcels_pack_into_words() {
        let mut listing = Vec::new();
        let mut binary = Vec::new();
        let mut out = OutputGenerator::new(&mut listing, &mut binary);
        out.add_parcel(0, 0o46000, 15);
        out.add_parcel(0, 0o46000, 15);
        out.add_parcel(0, 0o4610000123, 30);
        out.finish();
        let text = String::from_utf8(binary).unwrap();
        assert_eq!(text, "46000460004610000123\n");
    }

    #[test]
    fn partial_words_pad_with_noops() {
        let mut listing = Vec::new();
        let mut binary = Vec::new();
        let mut out = OutputGenerator::new(&mut listing, &mut binary);
        out.add_parcel(0, 0o12345, 15);
        out.flush_word(true);
        out.finish();
        let text = String::from_utf8(binary).unwrap();
        assert_eq!(text, "12345460004600046000\n");
    }

    #[test]
    fn address_change_flushes() {
        let mut listing = Vec::new();
        let mut binary = Vec::new();
        let mut out = OutputGenerator::new(&mut listing, &mut binary);
        out.add_parcel(0, 0o11111, 15);
        out.add_parcel(1, 0o22222, 15);
        out.finish();
        let text = String::from_utf8(binary).unwrap();
        let words: Vec<&str> = text.lines().collect();
        assert_eq!(words.len(), 2);
        assert!(words[0].starts_with("11111"));
        assert!(words[1].starts_with("22222"));
    }

    #[test]
    fn full_words_write_twenty_octal_digits() {
        let mut listing = Vec::new();
        let mut binary = Vec::new();
        let mut out = OutputGenerator::new(&mut listing, &mut binary);
        out.add_word(0, 0o20221707555555555555);
        out.finish();
        assert_eq!(
            String::from_utf8(binary).unwrap(),
            "20221707555555555555\n"
        );
    }

    #[test]
    fn listing_rows_carry_lc_and_source() {
        let mut listing = Vec::new();
        let mut binary = Vec::new();
        let mut state = state();
        {
            let mut out = OutputGenerator::new(&mut listing, &mut binary);
            out.write_line(
                Some(0o10),
                0,
                Some(&[ListingItem::Parcel(0o46000, 15)]),
                "      NO",
                None,
                false,
                &mut state,
                Some("NO"),
            );
            out.finish();
        }
        let text = String::from_utf8(listing).unwrap();
        let row = text.lines().last().unwrap();
        assert!(row.contains("10"), "row: {}", row);
        assert!(row.contains("46000"));
        assert!(row.contains("      NO"));
    }

    #[test]
    fn multi_word_lines_repeat_source_only_once() {
        let mut listing = Vec::new();
        let mut binary = Vec::new();
        let mut state = state();
        {
            let mut out = OutputGenerator::new(&mut listing, &mut binary);
            let items = [
                ListingItem::Parcel(1, 60),
                ListingItem::Parcel(2, 60),
            ];
            out.write_line(
                Some(0o5),
                0,
                Some(&items),
                "      DATA 1,2",
                None,
                false,
                &mut state,
                Some("DATA"),
            );
            out.finish();
        }
        let text = String::from_utf8(listing).unwrap();
        let rows: Vec<&str> = text
            .lines()
            .filter(|l| l.contains("00000000000000000001") || l.contains("00000000000000000002"))
            .collect();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].contains("DATA"));
        assert!(!rows[1].contains("DATA"));
    }

    #[test]
    fn pagination_writes_headers() {
        let mut listing = Vec::new();
        let mut binary = Vec::new();
        let mut state = state();
        state.title = "TEST TITLE".to_string();
        {
            let mut out = OutputGenerator::new(&mut listing, &mut binary);
            for _ in 0..60 {
                out.write_line(None, 0, None, "* COMMENT", None, false, &mut state, None);
            }
            out.finish();
        }
        let text = String::from_utf8(listing).unwrap();
        assert!(text.contains("PAGE     1"));
        assert!(text.contains("PAGE     2"));
        assert!(text.contains("TEST TITLE"));
    }

    #[test]
    fn equ_rows_show_the_value_column() {
        let mut listing = Vec::new();
        let mut binary = Vec::new();
        let mut state = state();
        {
            let mut out = OutputGenerator::new(&mut listing, &mut binary);
            out.write_line(
                None,
                0,
                Some(&[ListingItem::Value(0o77)]),
                "SYM   EQU  77B",
                None,
                false,
                &mut state,
                Some("EQU"),
            );
            out.finish();
        }
        let text = String::from_utf8(listing).unwrap();
        assert!(text.lines().last().unwrap().contains("77"));
    }
}
