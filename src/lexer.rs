//! Fixed-column partitioning of COMPASS source lines.
//!
//! COMPASS lines are positional: a `*` in column 1 makes the whole line
//! a comment; a non-blank in column 1 or 2 starts the label field; the
//! opcode and operand fields each run to the next blank. A handful of
//! pseudo-ops (DIS, TITLE, TTL, COMMENT) take their operand to end of
//! line and do their own comment splitting.

/// One parsed source line plus the Pass-1 width cache.
#[derive(Debug, Clone, Default)]
pub struct SourceLine {
    pub number: usize,
    pub text: String,
    pub label: Option<String>,
    pub opcode: Option<String>,
    pub operand: Option<String>,
    pub comment: Option<String>,
    pub is_comment: bool,
    /// Estimated instruction width in bits, written by Pass 1 so that
    /// Pass 2 can keep the counters moving when encoding fails.
    pub width_estimate: u32,
}

impl SourceLine {
    pub fn opcode_upper(&self) -> Option<String> {
        self.opcode.as_deref().map(str::to_ascii_uppercase)
    }

    pub fn operand_str(&self) -> &str {
        self.operand.as_deref().unwrap_or("")
    }

    /// True when the line's label is the negating `-` label.
    pub fn has_negating_label(&self) -> bool {
        self.label.as_deref() == Some("-")
    }
}

/// Pseudo-ops whose operand field may contain embedded blanks.
fn operand_runs_to_end_of_line(opcode: &str) -> bool {
    matches!(opcode, "DIS" | "TITLE" | "TTL" | "COMMENT")
}

// Column at which a label-less, opcode-less line is assumed to be a
// comment rather than a malformed statement.
const DEFAULT_COMMENT_COLUMN: usize = 30;

pub fn parse_line(text: &str, number: usize) -> SourceLine {
    let text = text.trim_end();
    let mut line = SourceLine {
        number,
        text: text.to_string(),
        ..SourceLine::default()
    };

    if text.is_empty() {
        return line;
    }
    if text.starts_with('*') {
        line.is_comment = true;
        line.comment = Some(text[1..].to_string());
        return line;
    }

    let chars: Vec<char> = text.chars().collect();
    let col1_blank = chars[0] == ' ';
    let col2_blank = chars.len() < 2 || chars[1] == ' ';

    let mut pos;
    if !(col1_blank && col2_blank) {
        let start = if col1_blank { 1 } else { 0 };
        let mut end = start;
        while end < chars.len() && chars[end] != ' ' {
            end += 1;
        }
        line.label = Some(chars[start..end].iter().collect());
        pos = end;
    } else {
        pos = 2;
    }

    while pos < chars.len() && chars[pos] == ' ' {
        pos += 1;
    }
    if pos >= chars.len() {
        // No opcode. A bare line whose first content is at or past the
        // comment column is treated as a comment line.
        if line.label.is_none() {
            let first = chars.iter().position(|&c| c != ' ');
            if first.map_or(true, |col| col >= DEFAULT_COMMENT_COLUMN - 1) {
                line.is_comment = true;
                line.comment = first.map(|col| chars[col..].iter().collect());
            }
        }
        return line;
    }

    let opcode_start = pos;
    while pos < chars.len() && chars[pos] != ' ' {
        pos += 1;
    }
    let opcode: String = chars[opcode_start..pos].iter().collect();

    while pos < chars.len() && chars[pos] == ' ' {
        pos += 1;
    }
    if pos < chars.len() {
        let remainder: String = chars[pos..].iter().collect();
        if operand_runs_to_end_of_line(&opcode.to_ascii_uppercase()) {
            // Comment extraction is left to the directive's own parser.
            line.operand = Some(remainder);
        } else {
            let split = remainder.find(' ').unwrap_or(remainder.len());
            line.operand = Some(remainder[..split].to_string());
            let rest = remainder[split..].trim_start();
            if !rest.is_empty() {
                line.comment = Some(rest.to_string());
            }
        }
    }
    line.opcode = Some(opcode);
    line
}

#[cfg(test)]
mod tests {
    use yare::parameterized;

    use super::*;

    #[test]
    fn star_in_column_one_is_a_comment() {
        let line = parse_line("* THIS IS A COMMENT", 1);
        assert!(line.is_comment);
        assert_eq!(line.comment.as_deref(), Some(" THIS IS A COMMENT"));
        assert!(line.opcode.is_none());
    }

    #[test]
    fn label_opcode_operand_comment() {
        let line = parse_line("START SA1  BUFF      SET A1", 1);
        assert_eq!(line.label.as_deref(), Some("START"));
        assert_eq!(line.opcode.as_deref(), Some("SA1"));
        assert_eq!(line.operand.as_deref(), Some("BUFF"));
        assert_eq!(line.comment.as_deref(), Some("SET A1"));
    }

    #[test]
    fn label_may_start_in_column_two() {
        let line = parse_line(" LOOP BSS 5", 1);
        assert_eq!(line.label.as_deref(), Some("LOOP"));
        assert_eq!(line.opcode.as_deref(), Some("BSS"));
        assert_eq!(line.operand.as_deref(), Some("5"));
    }

    #[test]
    fn blank_label_column_means_no_label() {
        let line = parse_line("      RJ   SUB", 1);
        assert!(line.label.is_none());
        assert_eq!(line.opcode.as_deref(), Some("RJ"));
        assert_eq!(line.operand.as_deref(), Some("SUB"));
    }

    #[parameterized(
        plus = { "+     VFD  6/1", "+" },
        minus = { "-     SA1  B2", "-" },
    )]
    fn alignment_labels(text: &str, label: &str) {
        let line = parse_line(text, 1);
        assert_eq!(line.label.as_deref(), Some(label));
    }

    #[test]
    fn dis_operand_runs_to_end_of_line() {
        let line = parse_line("      DIS  0,HELLO WORLD", 1);
        assert_eq!(line.operand.as_deref(), Some("0,HELLO WORLD"));
        assert!(line.comment.is_none());
    }

    #[test]
    fn title_operand_keeps_blanks() {
        let line = parse_line("      TITLE  MAIN LOOP", 1);
        assert_eq!(line.operand.as_deref(), Some("MAIN LOOP"));
    }

    #[test]
    fn blank_line_is_not_a_comment_but_has_nothing() {
        let line = parse_line("", 1);
        assert!(!line.is_comment);
        assert!(line.label.is_none());
        assert!(line.opcode.is_none());
    }

    #[test]
    fn label_only_line() {
        let line = parse_line("HERE", 3);
        assert_eq!(line.label.as_deref(), Some("HERE"));
        assert!(line.opcode.is_none());
    }
}
