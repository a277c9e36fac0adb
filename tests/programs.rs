//! End-to-end assemblies of small COMPASS programs, checked against
//! the emitted binary words and the listing.

use compass60::{Assembler, InstructionTable, BUILTIN_MAP};

struct Assembly {
    success: bool,
    words: Vec<String>,
    listing: String,
}

fn assemble(source: &str) -> Assembly {
    let table = InstructionTable::parse(BUILTIN_MAP).unwrap();
    let mut assembler = Assembler::new(table);
    let mut listing = Vec::new();
    let mut binary = Vec::new();
    let success = assembler.assemble(source, &mut listing, &mut binary);
    Assembly {
        success,
        words: String::from_utf8(binary)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect(),
        listing: String::from_utf8(listing).unwrap(),
    }
}

#[test]
fn ident_word_encodes_the_program_name() {
    let result = assemble(
        "      IDENT PROG\n\
         \u{20}     END   PROG\n",
    );
    assert!(result.success);
    assert_eq!(result.words, vec!["20221707555555555555"]);
}

#[test]
fn sx_immediate_occupies_half_a_word() {
    let result = assemble(
        "      IDENT PROG\n\
         \u{20}     SX1  1\n\
         \u{20}     END\n",
    );
    assert!(result.success);
    assert_eq!(
        result.words,
        vec!["20221707555555555555", "71100000014600046000"]
    );
}

#[test]
fn deferred_force_runs_before_an_ordinary_line() {
    let result = assemble(
        "      IDENT PROG\n\
         \u{20}     RJ   SUB\n\
         \u{20}     SX1  1\n\
         SUB   BSS  1\n\
         \u{20}     END\n",
    );
    assert!(result.success);
    // The RJ word is completed with a no-op before SX1 begins, so SUB
    // lands at word 2.
    assert_eq!(
        result.words,
        vec![
            "20221707555555555555",
            "01000000024600046000",
            "71100000014600046000",
        ]
    );
}

#[test]
fn negating_label_cancels_the_deferred_force() {
    let result = assemble(
        "      IDENT PROG\n\
         \u{20}     RJ   SUB\n\
         -     SX1  1\n\
         SUB   BSS  1\n\
         \u{20}     END\n",
    );
    assert!(result.success);
    // SX1 shares the RJ's word; SUB lands at word 1.
    assert_eq!(
        result.words,
        vec!["20221707555555555555", "01000000017110000001"]
    );
}

#[test]
fn equ_star_takes_the_address_of_the_deferred_word() {
    let result = assemble(
        "      IDENT PROG\n\
         \u{20}     RJ   SUB\n\
         AFTER EQU  *\n\
         SUB   BSS  1\n\
         \u{20}     END\n",
    );
    assert!(result.success);
    // AFTER = 0 (the RJ's word); the force then completes the word and
    // SUB = 1.
    assert_eq!(
        result.words,
        vec!["20221707555555555555", "01000000014600046000"]
    );
    assert!(result.listing.contains("AFTER"));
}

#[test]
fn bss_reserves_without_emitting() {
    let result = assemble(
        "      IDENT PROG\n\
         LOOP  BSS  5\n\
         \u{20}     SX1  LOOP\n\
         \u{20}     END\n",
    );
    assert!(result.success);
    assert_eq!(
        result.words,
        vec!["20221707555555555555", "71100000004600046000"]
    );
}

#[test]
fn bssz_zero_fills() {
    let result = assemble(
        "      IDENT PROG\n\
         \u{20}     BSSZ 2\n\
         \u{20}     SX1  1\n\
         \u{20}     END\n",
    );
    assert!(result.success);
    assert_eq!(
        result.words,
        vec![
            "20221707555555555555",
            "00000000000000000000",
            "00000000000000000000",
            "71100000014600046000",
        ]
    );
}

#[test]
fn dis_packs_with_two_terminators() {
    let result = assemble(
        "      IDENT PROG\n\
         \u{20}     DIS  0,ABC\n\
         \u{20}     END\n",
    );
    assert!(result.success);
    assert_eq!(
        result.words,
        vec!["20221707555555555555", "01020300000000000000"]
    );
}

#[test]
fn literal_pool_precedes_code_and_dedups() {
    let result = assemble(
        "      IDENT PROG\n\
         \u{20}     LIT  5,5,10B\n\
         \u{20}     SX1  =5\n\
         \u{20}     END\n",
    );
    assert!(result.success);
    assert_eq!(
        result.words,
        vec![
            "20221707555555555555",
            "00000000000000000005",
            "00000000000000000010",
            "71100000004600046000",
        ]
    );
    assert!(result.listing.contains("CONTENT OF LITERALS BLOCK"));
}

#[test]
fn blocks_lay_out_in_first_use_order() {
    let result = assemble(
        "      IDENT PROG\n\
         \u{20}     USE  AAA\n\
         LBLA  SX1  LBLB\n\
         \u{20}     USE  BBB\n\
         LBLB  SX2  LBLA\n\
         \u{20}     END\n",
    );
    assert!(result.success, "listing: {}", result.listing);
    // AAA at 0, BBB at 1 (no literals): LBLB resolves to 1, LBLA to 0.
    assert_eq!(
        result.words,
        vec![
            "20221707555555555555",
            "71100000014600046000",
            "71200000004600046000",
        ]
    );
}

#[test]
fn conditional_false_branch_is_skipped() {
    let result = assemble(
        "      IDENT PROG\n\
         \u{20}     IFEQ 1,1\n\
         \u{20}     SX1  1\n\
         \u{20}     ELSE\n\
         \u{20}     SX2  2\n\
         \u{20}     ENDIF\n\
         \u{20}     END\n",
    );
    assert!(result.success);
    assert_eq!(
        result.words,
        vec!["20221707555555555555", "71100000014600046000"]
    );
}

#[test]
fn conditional_stack_balances_at_end_of_file() {
    let table = InstructionTable::parse(BUILTIN_MAP).unwrap();
    let mut assembler = Assembler::new(table);
    let mut listing = Vec::new();
    let mut binary = Vec::new();
    let source = "      IDENT PROG\n\
                  \u{20}     IFEQ 1,2\n\
                  \u{20}     IFGT 3,1\n\
                  \u{20}     SX1  1\n\
                  \u{20}     ENDIF\n\
                  \u{20}     ENDIF\n\
                  \u{20}     END\n";
    assert!(assembler.assemble(source, &mut listing, &mut binary));
    assert_eq!(assembler.state.conditionals, vec![true]);
}

#[test]
fn vfd_masks_fields_with_ones_complement_negatives() {
    let result = assemble(
        "      IDENT PROG\n\
         \u{20}     VFD  18/5,42/-1\n\
         \u{20}     END\n",
    );
    assert!(result.success);
    assert_eq!(
        result.words,
        vec!["20221707555555555555", "00000577777777777776"]
    );
}

#[test]
fn micro_substitution_reaches_dis() {
    let result = assemble(
        "      IDENT PROG\n\
         MSG   MICRO HELLO\n\
         \u{20}     DIS  0,%MSG%\n\
         \u{20}     END\n",
    );
    assert!(result.success);
    assert_eq!(
        result.words,
        vec!["20221707555555555555", "10051414170000000000"]
    );
}

#[test]
fn skip_treats_lines_as_comments() {
    let result = assemble(
        "      IDENT PROG\n\
         \u{20}     SKIP 1\n\
         \u{20}     SX1  1\n\
         \u{20}     SX2  2\n\
         \u{20}     END\n",
    );
    assert!(result.success);
    assert_eq!(
        result.words,
        vec!["20221707555555555555", "71200000024600046000"]
    );
}

#[test]
fn remote_blocks_replay_at_here() {
    let result = assemble(
        "      IDENT PROG\n\
         \u{20}     RMT  LATER\n\
         \u{20}     SX2  2\n\
         \u{20}     RMT\n\
         \u{20}     SX1  1\n\
         \u{20}     HERE LATER\n\
         \u{20}     END\n",
    );
    assert!(result.success, "listing: {}", result.listing);
    // SX1 assembles first, then the remote SX2 splices in after it.
    assert_eq!(
        result.words,
        vec!["20221707555555555555", "71100000017120000002"]
    );
}

#[test]
fn benign_redefinition_is_accepted() {
    let result = assemble(
        "      IDENT PROG\n\
         VAL   EQU  100B\n\
         VAL   EQU  100B\n\
         N     SET  1\n\
         N     SET  2\n\
         \u{20}     SX1  VAL\n\
         \u{20}     END\n",
    );
    assert!(result.success);
    assert_eq!(
        result.words,
        vec!["20221707555555555555", "71100001004600046000"]
    );
}

#[test]
fn conflicting_redefinition_fails_the_run() {
    let result = assemble(
        "      IDENT PROG\n\
         VAL   EQU  1\n\
         VAL   EQU  2\n\
         \u{20}     END\n",
    );
    assert!(!result.success);
    // Pass 2 is skipped entirely: no binary at all.
    assert!(result.words.is_empty());
}

#[test]
fn unknown_mnemonics_fail_the_run() {
    let result = assemble(
        "      IDENT PROG\n\
         \u{20}     FROBNICATE\n\
         \u{20}     END\n",
    );
    assert!(!result.success);
    assert!(result.words.is_empty());
}

#[test]
fn character_data_justification() {
    let result = assemble(
        "      IDENT PROG\n\
         \u{20}     DATA 10HABCDEFGHIJ,1RZ\n\
         \u{20}     END\n",
    );
    assert!(result.success);
    assert_eq!(
        result.words,
        vec![
            "20221707555555555555",
            "01020304050607101112",
            "00000000000000000032",
        ]
    );
}

#[test]
fn loc_assembles_at_an_absolute_address() {
    let result = assemble(
        "      IDENT PROG\n\
         \u{20}     SX1  1\n\
         \u{20}     LOC  1000B\n\
         MARK  EQU  *\n\
         \u{20}     SX2  MARK\n\
         \u{20}     END\n",
    );
    assert!(result.success, "listing: {}", result.listing);
    // MARK is the absolute LOC address.
    assert_eq!(
        result.words,
        vec![
            "20221707555555555555",
            "71100000014600046000",
            "71200010004600046000",
        ]
    );
}

#[test]
fn listing_has_the_reference_table() {
    let result = assemble(
        "      IDENT PROG\n\
         HEREX EQU  5\n\
         \u{20}     QUAL Q\n\
         LOCAL EQU  6\n\
         \u{20}     QUAL *\n\
         \u{20}     END\n",
    );
    assert!(result.success);
    assert!(result.listing.contains("SYMBOLIC REFERENCE TABLE"));
    assert!(result.listing.contains("SYMBOL QUALIFIER"));
    assert!(result.listing.contains("HEREX"));
    assert!(result.listing.contains("LOCAL"));
}

#[test]
fn listing_paginates_with_titles() {
    let mut source = String::from("      IDENT PROG\n      TITLE MAIN PROGRAM\n");
    for _ in 0..60 {
        source.push_str("* FILLER COMMENT LINE\n");
    }
    source.push_str("      END\n");
    let result = assemble(&source);
    assert!(result.success);
    assert!(result.listing.contains("MAIN PROGRAM"));
    assert!(result.listing.contains("PAGE     2"));
}
