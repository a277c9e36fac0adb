//! The four 6-bit character sets of the CDC 6000 series.
//!
//! Character data is always packed ten 6-bit codes to a 60-bit word.
//! Which map is in effect depends on the active CODE mode, with two
//! wrinkles: mode A uses the internal-BCD map for character constants
//! but the ASCII 6-bit map for DIS content, and Form-2 DIS always uses
//! display code no matter the mode.

/// Display code, the CDC 64-character ASCII subset.
const DISPLAY: [char; 64] = [
    ':', 'A', 'B', 'C', 'D', 'E', 'F', 'G', //
    'H', 'I', 'J', 'K', 'L', 'M', 'N', 'O', //
    'P', 'Q', 'R', 'S', 'T', 'U', 'V', 'W', //
    'X', 'Y', 'Z', '0', '1', '2', '3', '4', //
    '5', '6', '7', '8', '9', '+', '-', '*', //
    '/', '(', ')', '$', '=', ' ', ',', '.', //
    '#', '[', ']', '%', '"', '_', '!', '&', //
    '\'', '?', '<', '>', '@', '\\', '^', ';',
];

// Code 0o35 is the greater-or-equal graphic in the CDC tables; it has
// no ASCII spelling, so only '>' (0o37) is reachable from source text.
const INTERNAL_BCD: [char; 64] = [
    '0', '1', '2', '3', '4', '5', '6', '7', //
    '8', '9', '^', '=', '#', ':', '"', '_', //
    '/', 'S', 'T', 'U', 'V', 'W', 'X', 'Y', //
    'Z', '?', '\\', ',', '(', '≥', '<', '>', //
    '-', 'A', 'B', 'C', 'D', 'E', 'F', 'G', //
    'H', 'I', ';', '$', '*', ' ', '!', '&', //
    '+', 'J', 'K', 'L', 'M', 'N', 'O', 'P', //
    'Q', 'R', '@', '.', ')', '[', ']', '\'',
];

const EXTERNAL_BCD: [char; 64] = [
    ':', '1', '2', '3', '4', '5', '6', '7', //
    '8', '9', '0', '=', '"', '@', '%', '[', //
    ' ', '/', 'S', 'T', 'U', 'V', 'W', 'X', //
    'Y', 'Z', ']', ',', '(', '_', '#', '&', //
    '-', 'J', 'K', 'L', 'M', 'N', 'O', 'P', //
    'Q', 'R', '!', '$', '*', '\'', '?', '>', //
    '+', 'A', 'B', 'C', 'D', 'E', 'F', 'G', //
    'H', 'I', '<', '.', ')', '\\', '^', ';',
];

/// A 6-bit character map with its designated blank and zero codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharSet {
    Display,
    InternalBcd,
    ExternalBcd,
    Ascii6,
}

impl CharSet {
    /// Code of the given character, if it exists in this set.
    /// Letters are folded to upper case first.
    pub fn encode(self, c: char) -> Option<u8> {
        let c = c.to_ascii_uppercase();
        match self {
            CharSet::Ascii6 => {
                // The ASCII 6-bit subset is the contiguous run 0x20..0x60.
                let v = c as u32;
                if (0x20..0x60).contains(&v) {
                    Some((v - 0x20) as u8)
                } else {
                    None
                }
            }
            _ => self
                .table()
                .iter()
                .position(|&t| t == c)
                .map(|code| code as u8),
        }
    }

    /// Character for the given 6-bit code.
    pub fn decode(self, code: u8) -> char {
        self.table()[(code & 0o77) as usize]
    }

    /// The code this set assigns to a blank, also used as the
    /// substitute for characters the set cannot represent.
    pub fn blank(self) -> u8 {
        match self {
            CharSet::Display => 0o55,
            CharSet::InternalBcd => 0o55,
            CharSet::ExternalBcd => 0o20,
            CharSet::Ascii6 => 0o00,
        }
    }

    /// The code of the character `0` in this set.
    pub fn zero_char(self) -> u8 {
        match self {
            CharSet::Display => 0o33,
            CharSet::InternalBcd => 0o00,
            CharSet::ExternalBcd => 0o12,
            CharSet::Ascii6 => 0o20,
        }
    }

    fn table(self) -> &'static [char; 64] {
        match self {
            CharSet::Display => &DISPLAY,
            CharSet::InternalBcd => &INTERNAL_BCD,
            CharSet::ExternalBcd => &EXTERNAL_BCD,
            CharSet::Ascii6 => {
                // Built once; the other sets have irregular layouts and
                // are spelled out, this one is a contiguous ASCII run.
                static ASCII6: [char; 64] = build_ascii6();
                &ASCII6
            }
        }
    }
}

const fn build_ascii6() -> [char; 64] {
    let mut table = [' '; 64];
    let mut code = 0;
    while code < 64 {
        table[code] = (0x20 + code as u32 as u8) as char;
        code += 1;
    }
    table
}

/// The active character-code mode, selected by the CODE directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeMode {
    /// D — display code (the default).
    Display,
    /// A — ASCII: internal BCD for character constants, the ASCII
    /// 6-bit subset for DIS content.
    Ascii,
    /// I — internal BCD.
    Internal,
    /// E — external BCD.
    External,
}

impl CodeMode {
    pub fn from_letter(c: char) -> Option<CodeMode> {
        match c.to_ascii_uppercase() {
            'D' => Some(CodeMode::Display),
            'A' => Some(CodeMode::Ascii),
            'I' => Some(CodeMode::Internal),
            'E' => Some(CodeMode::External),
            _ => None,
        }
    }

    pub fn letter(self) -> char {
        match self {
            CodeMode::Display => 'D',
            CodeMode::Ascii => 'A',
            CodeMode::Internal => 'I',
            CodeMode::External => 'E',
        }
    }

    /// The set used for character constants inside data items.
    pub fn constant_set(self) -> CharSet {
        match self {
            CodeMode::Display => CharSet::Display,
            CodeMode::Ascii | CodeMode::Internal => CharSet::InternalBcd,
            CodeMode::External => CharSet::ExternalBcd,
        }
    }

    /// The set used for DIS string content (Form 1).
    pub fn dis_set(self) -> CharSet {
        match self {
            CodeMode::Display => CharSet::Display,
            CodeMode::Ascii => CharSet::Ascii6,
            CodeMode::Internal => CharSet::InternalBcd,
            CodeMode::External => CharSet::ExternalBcd,
        }
    }

    /// Fill code for left-justified (L/C/Z) character constants: binary
    /// zero in modes A and I, the set's character `0` in D and E.
    pub fn zero_fill(self) -> u8 {
        match self {
            CodeMode::Ascii | CodeMode::Internal => 0,
            CodeMode::Display => CharSet::Display.zero_char(),
            CodeMode::External => CharSet::ExternalBcd.zero_char(),
        }
    }
}

#[cfg(test)]
mod tests {
    use yare::parameterized;

    use super::*;

    #[parameterized(
        display = { CharSet::Display },
        internal = { CharSet::InternalBcd },
        external = { CharSet::ExternalBcd },
        ascii = { CharSet::Ascii6 },
    )]
    fn every_code_round_trips(set: CharSet) {
        for code in 0..64u8 {
            let c = set.decode(code);
            assert_eq!(
                set.encode(c),
                Some(code),
                "{:?} code {:o} decoded to {:?} which did not encode back",
                set,
                code,
                c
            );
        }
    }

    #[test]
    fn display_code_spot_checks() {
        assert_eq!(CharSet::Display.encode('A'), Some(0o01));
        assert_eq!(CharSet::Display.encode('P'), Some(0o20));
        assert_eq!(CharSet::Display.encode('0'), Some(0o33));
        assert_eq!(CharSet::Display.encode(' '), Some(0o55));
        assert_eq!(CharSet::Display.encode('a'), Some(0o01));
    }

    #[test]
    fn unrepresentable_characters_are_none() {
        assert_eq!(CharSet::Display.encode('~'), None);
        assert_eq!(CharSet::ExternalBcd.encode('~'), None);
        assert_eq!(CharSet::Ascii6.encode('a'), Some(0o41));
        assert_eq!(CharSet::Ascii6.encode('~'), None);
    }

    #[test]
    fn blanks_and_zeros() {
        assert_eq!(CharSet::Display.blank(), 0o55);
        assert_eq!(CharSet::ExternalBcd.blank(), 0o20);
        assert_eq!(CharSet::InternalBcd.zero_char(), 0o00);
        assert_eq!(CharSet::Ascii6.zero_char(), 0o20);
    }

    #[parameterized(
        d = { 'D', CodeMode::Display },
        a = { 'a', CodeMode::Ascii },
        i = { 'I', CodeMode::Internal },
        e = { 'E', CodeMode::External },
    )]
    fn mode_letters(letter: char, mode: CodeMode) {
        assert_eq!(CodeMode::from_letter(letter), Some(mode));
        assert_eq!(mode.letter(), letter.to_ascii_uppercase());
    }

    #[test]
    fn mode_a_splits_constant_and_dis_sets() {
        assert_eq!(CodeMode::Ascii.constant_set(), CharSet::InternalBcd);
        assert_eq!(CodeMode::Ascii.dis_set(), CharSet::Ascii6);
    }

    #[test]
    fn zero_fill_is_binary_zero_for_a_and_i() {
        assert_eq!(CodeMode::Ascii.zero_fill(), 0);
        assert_eq!(CodeMode::Internal.zero_fill(), 0);
        assert_eq!(CodeMode::Display.zero_fill(), 0o33);
        assert_eq!(CodeMode::External.zero_fill(), 0o12);
    }
}
