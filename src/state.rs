//! Assembler state: location counters, program blocks, modes.
//!
//! The location counter (LC) is a 60-bit word address; the position
//! counter (PC) is the bit offset 0..59 already filled in the current
//! word, counted from the most-significant side. In Pass 1 the LC is
//! relative to the current block; in Pass 2 it is absolute.

use bitflags::bitflags;

use crate::charset::CodeMode;
use crate::diagnostics::{DiagnosticSink, Severity};

/// Interned identifier of a program block. Id 0 is `*ABS*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(pub usize);

pub const ABSOLUTE_BLOCK: BlockId = BlockId(0);
pub const ABSOLUTE_BLOCK_NAME: &str = "*ABS*";

/// Program blocks by id: names, Pass-1 sizes, first-USE order, and the
/// base addresses computed between the passes.
#[derive(Debug)]
pub struct BlockTable {
    names: Vec<String>,
    sizes: Vec<u64>,
    order: Vec<BlockId>,
    bases: Vec<u64>,
}

impl Default for BlockTable {
    fn default() -> Self {
        BlockTable {
            names: vec![ABSOLUTE_BLOCK_NAME.to_string()],
            sizes: vec![0],
            order: Vec::new(),
            bases: vec![0],
        }
    }
}

impl BlockTable {
    /// Id of the named block, creating it (and recording first-USE
    /// order) when unseen.
    pub fn intern(&mut self, name: &str) -> BlockId {
        let name = name.to_ascii_uppercase();
        if let Some(index) = self.names.iter().position(|n| *n == name) {
            return BlockId(index);
        }
        let id = BlockId(self.names.len());
        self.names.push(name);
        self.sizes.push(0);
        self.bases.push(0);
        self.order.push(id);
        id
    }

    pub fn lookup(&self, name: &str) -> Option<BlockId> {
        let name = name.to_ascii_uppercase();
        self.names.iter().position(|n| *n == name).map(BlockId)
    }

    pub fn name(&self, id: BlockId) -> &str {
        &self.names[id.0]
    }

    pub fn size(&self, id: BlockId) -> u64 {
        self.sizes[id.0]
    }

    pub fn add_words(&mut self, id: BlockId, words: u64) {
        self.sizes[id.0] += words;
    }

    pub fn base(&self, id: BlockId) -> u64 {
        self.bases[id.0]
    }

    pub fn first_use_order(&self) -> &[BlockId] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.len() <= 1
    }

    pub fn ids(&self) -> impl Iterator<Item = BlockId> {
        (0..self.names.len()).map(BlockId)
    }

    /// Lay out block bases: `*ABS*` at 0, then each named block after
    /// the literal pool in first-USE order. Blocks that were sized but
    /// never placed are appended last. Returns the total footprint
    /// (literal pool plus all named blocks).
    pub fn compute_bases(&mut self, literal_words: u64, sink: &mut DiagnosticSink) -> u64 {
        self.bases[0] = 0;
        let mut cursor = literal_words;
        let mut placed = vec![false; self.names.len()];
        placed[0] = true;
        for &id in &self.order.clone() {
            self.bases[id.0] = cursor;
            cursor += self.sizes[id.0];
            placed[id.0] = true;
            log::debug!(
                "block {} base {:o} size {:o}",
                self.names[id.0],
                self.bases[id.0],
                self.sizes[id.0]
            );
        }
        for index in 1..self.names.len() {
            if !placed[index] && self.sizes[index] > 0 {
                sink.warning(
                    0,
                    Severity::Warning,
                    format!("block '{}' never placed by USE; appending", self.names[index]),
                );
                self.bases[index] = cursor;
                cursor += self.sizes[index];
            }
        }
        cursor
    }
}

bitflags! {
    /// Listing control flags toggled by LIST/NOLIST.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ListingFlags: u16 {
        const B = 1 << 0;
        const C = 1 << 1;
        const D = 1 << 2;
        const E = 1 << 3;
        const F = 1 << 4;
        const G = 1 << 5;
        const M = 1 << 6;
        const N = 1 << 7;
        const R = 1 << 8;
        const S = 1 << 9;
        const X = 1 << 10;
    }
}

impl ListingFlags {
    fn from_letter(letter: char) -> Option<ListingFlags> {
        match letter.to_ascii_uppercase() {
            'B' => Some(ListingFlags::B),
            'C' => Some(ListingFlags::C),
            'D' => Some(ListingFlags::D),
            'E' => Some(ListingFlags::E),
            'F' => Some(ListingFlags::F),
            'G' => Some(ListingFlags::G),
            'M' => Some(ListingFlags::M),
            'N' => Some(ListingFlags::N),
            'R' => Some(ListingFlags::R),
            'S' => Some(ListingFlags::S),
            'X' => Some(ListingFlags::X),
            _ => None,
        }
    }
}

/// Numeric base selected by the BASE directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumberBase {
    /// D — decimal (the default).
    Decimal,
    /// O — octal.
    Octal,
    /// M — mixed: octal when every digit is 0..7, decimal otherwise.
    Mixed,
    /// H — treated as decimal for unsuffixed constants.
    Hex,
}

impl NumberBase {
    pub fn from_letter(c: char) -> Option<NumberBase> {
        match c.to_ascii_uppercase() {
            'D' => Some(NumberBase::Decimal),
            'O' => Some(NumberBase::Octal),
            'M' => Some(NumberBase::Mixed),
            'H' => Some(NumberBase::Hex),
            _ => None,
        }
    }

    pub fn letter(self) -> char {
        match self {
            NumberBase::Decimal => 'D',
            NumberBase::Octal => 'O',
            NumberBase::Mixed => 'M',
            NumberBase::Hex => 'H',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    One,
    Two,
}

/// What kind of definition block is being captured, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capture {
    Macro,
    Opdef,
}

#[derive(Debug)]
pub struct AssemblerState {
    pub pass: Pass,
    pub lc: u64,
    pub pc: u32,
    pub current_block: BlockId,
    pub blocks: BlockTable,
    pub base: NumberBase,
    pub code: CodeMode,
    pub qualifier: Option<String>,
    pub conditionals: Vec<bool>,
    pub listing_flags: ListingFlags,
    pub title: String,
    pub ttl_title: String,
    pub first_title_processed: bool,
    pub skip_count: u32,
    pub capture: Option<Capture>,
    pub capture_name: Option<String>,
    pub capture_params: Vec<String>,
    pub capture_lines: Vec<String>,
    pub remote_capture: Option<String>,
    pub deferred_force_pending: bool,
    pub lc_is_absolute: bool,
    pub pre_loc_block: Option<BlockId>,
    pub end_seen: bool,
    pub line_number: usize,
    pub line_start_lc: u64,
    pub line_start_pc: u32,
    pub start_symbol: Option<String>,
    pub start_address: Option<u64>,
}

impl Default for AssemblerState {
    fn default() -> Self {
        AssemblerState {
            pass: Pass::One,
            lc: 0,
            pc: 0,
            current_block: ABSOLUTE_BLOCK,
            blocks: BlockTable::default(),
            base: NumberBase::Decimal,
            code: CodeMode::Display,
            qualifier: None,
            conditionals: vec![true],
            listing_flags: ListingFlags::all(),
            title: String::new(),
            ttl_title: String::new(),
            first_title_processed: false,
            skip_count: 0,
            capture: None,
            capture_name: None,
            capture_params: Vec::new(),
            capture_lines: Vec::new(),
            remote_capture: None,
            deferred_force_pending: false,
            lc_is_absolute: false,
            pre_loc_block: None,
            end_seen: false,
            line_number: 0,
            line_start_lc: 0,
            line_start_pc: 0,
            start_symbol: None,
            start_address: None,
        }
    }
}

impl AssemblerState {
    pub fn new() -> AssemblerState {
        AssemblerState::default()
    }

    /// Reset per-pass state for Pass 2. The LC starts past the literal
    /// pool, which occupies the front of the image.
    pub fn reset_for_pass2(&mut self, literal_words: u64) {
        self.pass = Pass::Two;
        self.lc = literal_words;
        self.pc = 0;
        self.current_block = ABSOLUTE_BLOCK;
        self.base = NumberBase::Decimal;
        self.code = CodeMode::Display;
        self.qualifier = None;
        self.conditionals = vec![true];
        self.listing_flags = ListingFlags::all();
        self.title.clear();
        self.ttl_title.clear();
        self.first_title_processed = false;
        self.skip_count = 0;
        self.capture = None;
        self.capture_name = None;
        self.capture_params.clear();
        self.capture_lines.clear();
        self.remote_capture = None;
        self.deferred_force_pending = false;
        self.lc_is_absolute = false;
        self.pre_loc_block = None;
        self.end_seen = false;
        self.line_number = 0;
        log::debug!("pass 2 reset, initial LC {:o}", self.lc);
    }

    /// The block whose Pass-1 size grows as the counters advance: the
    /// pre-LOC block while a LOC override is active, else the current
    /// block.
    fn sizing_block(&self) -> BlockId {
        if self.lc_is_absolute {
            self.pre_loc_block.unwrap_or(self.current_block)
        } else {
            self.current_block
        }
    }

    /// Advance the position counter, carrying whole words into the LC.
    pub fn advance(&mut self, bits: u32) {
        if bits == 0 {
            return;
        }
        let total = self.pc + bits;
        let words = u64::from(total / 60);
        self.lc += words;
        self.pc = total % 60;
        if self.pass == Pass::One && words > 0 {
            let block = self.sizing_block();
            self.blocks.add_words(block, words);
        }
    }

    /// Complete the current word if partially filled. Returns the bit
    /// count a no-op pad for the emitted word would consume.
    pub fn force_upper(&mut self) -> u32 {
        if self.pc == 0 {
            return 0;
        }
        let pad = 60 - self.pc;
        log::trace!("force upper from PC={} at LC={:o}", self.pc, self.lc);
        self.lc += 1;
        self.pc = 0;
        if self.pass == Pass::One {
            let block = self.sizing_block();
            self.blocks.add_words(block, 1);
        }
        pad
    }

    /// Absolute counter assignment. A LOC directive additionally pins
    /// the state to absolute addressing and remembers the block whose
    /// size continues to grow.
    pub fn set_location(&mut self, lc: u64, pc: u32, from_loc: bool) {
        self.lc = lc;
        self.pc = if pc < 60 { pc } else { 0 };
        if from_loc {
            self.pre_loc_block = Some(self.current_block);
            self.lc_is_absolute = true;
            self.deferred_force_pending = false;
        }
    }

    /// Switch to a (possibly new) block. Pass 1 restarts the relative
    /// counter; Pass 2 jumps to the block's base. Either way the LOC
    /// override and any pending deferred force end here.
    pub fn switch_block(&mut self, id: BlockId) {
        if self.pass == Pass::One && id == self.current_block && !self.lc_is_absolute {
            return;
        }
        self.lc_is_absolute = false;
        self.pre_loc_block = None;
        self.deferred_force_pending = false;
        self.current_block = id;
        self.pc = 0;
        self.lc = match self.pass {
            Pass::One => 0,
            Pass::Two => self.blocks.base(id),
        };
        log::trace!(
            "switch to block {} LC={:o}",
            self.blocks.name(id),
            self.lc
        );
    }

    pub fn conditional_active(&self) -> bool {
        *self.conditionals.last().unwrap_or(&true)
    }

    pub fn update_listing_flags(
        &mut self,
        letters: &str,
        turn_on: bool,
        line: usize,
        sink: &mut DiagnosticSink,
    ) {
        let letters = letters.trim();
        if letters.eq_ignore_ascii_case("ALL") || letters.is_empty() {
            if turn_on {
                self.listing_flags = ListingFlags::all();
            } else {
                self.listing_flags = ListingFlags::empty();
            }
            return;
        }
        for part in letters.split(',') {
            let part = part.trim();
            let flag = part
                .chars()
                .next()
                .filter(|_| part.len() == 1)
                .and_then(ListingFlags::from_letter);
            match flag {
                Some(flag) => self.listing_flags.set(flag, turn_on),
                None => sink.warning(
                    line,
                    Severity::Warning,
                    format!("unknown listing flag '{}'", part),
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_carries_words() {
        let mut state = AssemblerState::new();
        state.advance(15);
        assert_eq!((state.lc, state.pc), (0, 15));
        state.advance(30);
        assert_eq!((state.lc, state.pc), (0, 45));
        state.advance(30);
        assert_eq!((state.lc, state.pc), (1, 15));
        state.advance(120);
        assert_eq!((state.lc, state.pc), (3, 15));
    }

    #[test]
    fn force_upper_pads_and_counts_a_word() {
        let mut state = AssemblerState::new();
        state.advance(15);
        let pad = state.force_upper();
        assert_eq!(pad, 45);
        assert_eq!((state.lc, state.pc), (1, 0));
        assert_eq!(state.blocks.size(ABSOLUTE_BLOCK), 1);
        assert_eq!(state.force_upper(), 0);
    }

    #[test]
    fn word_packing_invariant() {
        // Parcel widths plus force padding always equal the counter
        // movement in bits.
        let mut state = AssemblerState::new();
        let before = state.lc * 60 + u64::from(state.pc);
        let mut bits = 0u64;
        for width in [15, 30, 15, 15, 60] {
            if state.pc != 0 && state.pc + width > 60 {
                bits += u64::from(state.force_upper());
            }
            state.advance(width);
            bits += u64::from(width);
        }
        let after = state.lc * 60 + u64::from(state.pc);
        assert_eq!(after - before, bits);
    }

    #[test]
    fn pass1_sizes_follow_the_pre_loc_block() {
        let mut state = AssemblerState::new();
        let code = state.blocks.intern("CODE");
        state.switch_block(code);
        state.advance(60);
        assert_eq!(state.blocks.size(code), 1);

        state.set_location(0o1000, 0, true);
        state.advance(60);
        // The word assembled under LOC still grows the pre-LOC block.
        assert_eq!(state.blocks.size(code), 2);
        assert_eq!(state.lc, 0o1001);
    }

    #[test]
    fn switch_block_clears_loc_and_deferred_state() {
        let mut state = AssemblerState::new();
        let data = state.blocks.intern("DATA");
        state.set_location(0o2000, 0, true);
        state.deferred_force_pending = true;
        state.switch_block(data);
        assert!(!state.lc_is_absolute);
        assert!(!state.deferred_force_pending);
        assert_eq!(state.lc, 0);
    }

    #[test]
    fn block_bases_follow_first_use_order() {
        let mut state = AssemblerState::new();
        let one = state.blocks.intern("ONE");
        let two = state.blocks.intern("TWO");
        state.blocks.add_words(one, 3);
        state.blocks.add_words(two, 5);
        let mut sink = DiagnosticSink::new();
        let total = state.blocks.compute_bases(2, &mut sink);
        assert_eq!(state.blocks.base(ABSOLUTE_BLOCK), 0);
        assert_eq!(state.blocks.base(one), 2);
        assert_eq!(state.blocks.base(two), 5);
        assert_eq!(total, 10);
    }

    #[test]
    fn listing_flags_parse_lists_and_all() {
        let mut state = AssemblerState::new();
        let mut sink = DiagnosticSink::new();
        state.update_listing_flags("ALL", false, 1, &mut sink);
        assert_eq!(state.listing_flags, ListingFlags::empty());
        state.update_listing_flags("B,X", true, 1, &mut sink);
        assert_eq!(state.listing_flags, ListingFlags::B | ListingFlags::X);
        state.update_listing_flags("Q", true, 1, &mut sink);
        assert!(sink.has_warnings());
    }

    #[test]
    fn reset_for_pass2_starts_past_the_literal_pool() {
        let mut state = AssemblerState::new();
        state.advance(150);
        state.reset_for_pass2(4);
        assert_eq!(state.pass, Pass::Two);
        assert_eq!((state.lc, state.pc), (4, 0));
        assert_eq!(state.conditionals, vec![true]);
    }
}
