//! Each .abc file in tests/fixtures/ goes through the contract check,
//! the parser and the MIDI writer.

use abc::{check_contract, parse, to_midi, FeedbackLevel, MidiParams};
use std::fs;
use std::path::Path;

fn load(name: &str) -> String {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(format!("{name}.abc"));
    fs::read_to_string(&path).unwrap_or_else(|e| panic!("Failed to read fixture {name}: {e}"))
}

fn run_fixture(name: &str) -> Vec<u8> {
    let text = load(name);

    let report = check_contract(&text);
    assert!(
        report.is_satisfied(),
        "Fixture {name} broke the contract: {:?}",
        report.feedback
    );

    let result = parse(&text);
    assert!(
        !result.has_errors(),
        "Fixture {name} had parse errors: {:?}",
        result.feedback
    );

    let midi = to_midi(&result.value, &MidiParams::default()).unwrap();
    assert_eq!(&midi[0..4], b"MThd", "Fixture {name} produced invalid MIDI header");
    assert!(midi.len() > 40, "Fixture {name} produced {} bytes", midi.len());
    midi
}

#[test]
fn fixture_prompt_example() {
    run_fixture("prompt_example");

    // The example in the composer instructions packs 8 beats into 4/4 bars.
    let report = check_contract(&load("prompt_example"));
    assert!(report
        .feedback
        .iter()
        .any(|f| f.level == FeedbackLevel::Warning && f.message.contains("lasts 8 units")));
    assert_eq!(report.measures, Some(17));
}

#[test]
fn fixture_two_voices() {
    run_fixture("two_voices");
    let report = check_contract(&load("two_voices"));
    assert_eq!(report.voices, vec!["1", "2"]);
    assert_eq!(report.measures, Some(8));
    assert!(report.feedback.is_empty(), "{:?}", report.feedback);
}

#[test]
fn fixture_repeats() {
    run_fixture("repeats");
    let report = check_contract(&load("repeats"));
    assert_eq!(report.measures, Some(4));
    assert!(report.feedback.is_empty(), "{:?}", report.feedback);
}

#[test]
fn fixture_rhythm() {
    run_fixture("rhythm");
    let report = check_contract(&load("rhythm"));
    assert!(report.feedback.is_empty(), "{:?}", report.feedback);
}
