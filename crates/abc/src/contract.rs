//! Structural rules a composition must follow before it is handed on.
//!
//! The composer is instructed to emit a fixed header order, numbered
//! voices, no blank lines, complete bars and no accidentals or chords.
//! [`check_contract`] verifies those rules on the raw text. Structural
//! breaks are errors; musical deviations are warnings; an unusual bar
//! count is informational.

use serde::{Deserialize, Serialize};

use crate::ast::{Element, Tune};
use crate::feedback::{Feedback, FeedbackLevel};
use crate::parser::{self, field, voice_id};

/// Required header fields, in the order they must appear.
pub const HEADER_ORDER: [char; 7] = ['X', 'T', 'C', 'M', 'L', 'Q', 'K'];

/// Bar counts the composer is asked to produce.
pub const MEASURE_COUNTS: [usize; 4] = [4, 8, 16, 32];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractReport {
    pub feedback: Vec<Feedback>,
    pub voices: Vec<String>,
    /// Bars in the first voice, when the notation could be read.
    pub measures: Option<usize>,
}

impl ContractReport {
    /// True when no rule was broken at error level.
    pub fn is_satisfied(&self) -> bool {
        !self
            .feedback
            .iter()
            .any(|f| f.level == FeedbackLevel::Error)
    }

    pub fn violations(&self) -> impl Iterator<Item = &Feedback> {
        self.feedback
            .iter()
            .filter(|f| f.level == FeedbackLevel::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Feedback> {
        self.feedback
            .iter()
            .filter(|f| f.level == FeedbackLevel::Warning)
    }
}

/// Check composition text against the output rules.
pub fn check_contract(text: &str) -> ContractReport {
    let mut feedback = Vec::new();

    check_blank_lines(text, &mut feedback);
    let body_start = check_header(text, &mut feedback);
    let voices = check_voices(text, body_start, &mut feedback);

    let parsed = parser::parse(text);
    let measures = if parsed.has_errors() {
        feedback.push(Feedback::info(
            "Notation has syntax errors, bar and pitch checks skipped",
            0,
        ));
        None
    } else {
        Some(check_music(&parsed.value, &mut feedback))
    };

    ContractReport {
        feedback,
        voices,
        measures,
    }
}

fn check_blank_lines(text: &str, feedback: &mut Vec<Feedback>) {
    for (idx, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            feedback.push(Feedback::error("Blank line inside the composition", idx + 1));
        }
    }
}

/// Returns the index of the first line after the header.
fn check_header(text: &str, feedback: &mut Vec<Feedback>) -> usize {
    let mut seen: Vec<(char, usize)> = Vec::new();
    let mut body_start = 0;

    for (idx, line) in text.lines().enumerate() {
        let trimmed = line.trim();
        body_start = idx + 1;
        if trimmed.is_empty() || trimmed.starts_with('%') {
            continue;
        }
        let Some((name, _)) = field(trimmed) else {
            body_start = idx;
            break;
        };
        if HEADER_ORDER.contains(&name) {
            seen.push((name, idx + 1));
        }
        if name == 'K' {
            break;
        }
    }

    for required in HEADER_ORDER {
        let count = seen.iter().filter(|(name, _)| *name == required).count();
        match count {
            0 => feedback.push(Feedback::error(format!("Missing {required}: header"), 0)),
            1 => {}
            n => {
                let line = seen
                    .iter()
                    .filter(|(name, _)| *name == required)
                    .nth(1)
                    .map_or(0, |(_, line)| *line);
                feedback.push(Feedback::error(
                    format!("{required}: header appears {n} times"),
                    line,
                ));
            }
        }
    }

    let mut order = Vec::new();
    for (name, line) in &seen {
        if !order.iter().any(|(n, _)| n == name) {
            order.push((*name, *line));
        }
    }
    let expected: Vec<char> = HEADER_ORDER
        .iter()
        .copied()
        .filter(|c| order.iter().any(|(n, _)| n == c))
        .collect();
    if let Some(((name, line), _)) = order
        .iter()
        .zip(expected.iter())
        .find(|((name, _), want)| name != *want)
    {
        feedback.push(
            Feedback::error(format!("{name}: header is out of order"), *line)
                .with_suggestion("use the order X, T, C, M, L, Q, K"),
        );
    }

    body_start
}

fn check_voices(text: &str, body_start: usize, feedback: &mut Vec<Feedback>) -> Vec<String> {
    let mut voices: Vec<String> = Vec::new();
    let mut music_before_voice = None;

    for (idx, line) in text.lines().enumerate().skip(body_start) {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('%') {
            continue;
        }
        match field(trimmed) {
            Some(('V', value)) => {
                let id = voice_id(value).to_string();
                if !voices.contains(&id) {
                    let expected = (voices.len() + 1).to_string();
                    if id != expected {
                        feedback.push(
                            Feedback::error(format!("Voice {id:?} breaks the numbering"), idx + 1)
                                .with_suggestion(format!("expected V: {expected}")),
                        );
                    }
                    voices.push(id);
                }
            }
            Some(_) => {}
            None => {
                if voices.is_empty() && music_before_voice.is_none() {
                    music_before_voice = Some(idx + 1);
                }
            }
        }
    }

    if voices.is_empty() {
        feedback.push(Feedback::error("No V: voice lines in the body", 0));
    } else if let Some(line) = music_before_voice {
        feedback.push(Feedback::warning("Music appears before the first V: line", line));
    }

    voices
}

fn check_music(tune: &Tune, feedback: &mut Vec<Feedback>) -> usize {
    let bar_units = tune
        .header
        .meter
        .bar_length()
        .map(|bar| bar.div(tune.header.unit_length));

    let mut counts = Vec::with_capacity(tune.voices.len());
    for voice in &tune.voices {
        let measures = voice.measures();
        counts.push(measures.len());

        if let Some(expected) = bar_units {
            for (number, measure) in measures.iter().enumerate() {
                if measure.length != expected {
                    feedback.push(Feedback::warning(
                        format!(
                            "Voice {} bar {} lasts {} units, meter needs {}",
                            voice.id,
                            number + 1,
                            measure.length,
                            expected
                        ),
                        measure.line,
                    ));
                }
            }
        }

        let mut accidentals = 0;
        let mut chords = 0;
        for element in &voice.elements {
            match element {
                Element::Note(n) if n.accidental.is_some() => accidentals += 1,
                Element::Chord(c) => {
                    chords += 1;
                    accidentals += c.notes.iter().filter(|n| n.accidental.is_some()).count();
                }
                _ => {}
            }
        }
        if accidentals > 0 {
            feedback.push(Feedback::warning(
                format!("Voice {} uses {accidentals} explicit accidental(s)", voice.id),
                0,
            ));
        }
        if chords > 0 {
            feedback.push(Feedback::warning(
                format!("Voice {} uses {chords} chord(s)", voice.id),
                0,
            ));
        }
    }

    let first = counts.first().copied().unwrap_or(0);
    if counts.iter().any(|c| *c != first) {
        feedback.push(Feedback::warning(
            format!("Voices have different bar counts: {counts:?}"),
            0,
        ));
    }
    if !MEASURE_COUNTS.contains(&first) {
        feedback.push(Feedback::info(
            format!("{first} bars, usually 4, 8, 16 or 32"),
            0,
        ));
    }

    first
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const GOOD: &str = "X:1\nT:Sunrise\nC:Composer\nM:2/4\nL:1/8\nQ:1/4=80\nK:C\nV: 1\nCDEG|GEDC|DEGA|G4|\nV: 2\nC,2E,2|G,2E,2|D,2G,2|C,4|";

    fn messages(report: &ContractReport, level: FeedbackLevel) -> Vec<String> {
        report
            .feedback
            .iter()
            .filter(|f| f.level == level)
            .map(|f| f.message.clone())
            .collect()
    }

    #[test]
    fn clean_composition_passes() {
        let report = check_contract(GOOD);
        assert!(report.is_satisfied(), "{:?}", report.feedback);
        assert_eq!(report.voices, vec!["1".to_string(), "2".to_string()]);
        assert_eq!(report.measures, Some(4));
        assert!(report.feedback.is_empty(), "{:?}", report.feedback);
    }

    #[test]
    fn blank_line_is_violation() {
        let text = GOOD.replace("V: 2", "\nV: 2");
        let report = check_contract(&text);
        assert!(!report.is_satisfied());
        assert_eq!(report.violations().next().map(|f| f.line), Some(10));
    }

    #[test]
    fn header_order_and_duplicates() {
        let text = GOOD.replace("T:Sunrise\nC:Composer", "C:Composer\nT:Sunrise");
        let report = check_contract(&text);
        assert_eq!(
            messages(&report, FeedbackLevel::Error),
            vec!["C: header is out of order".to_string()]
        );

        let text = GOOD.replace("Q:1/4=80", "Q:1/4=80\nQ:1/4=90");
        let report = check_contract(&text);
        assert_eq!(
            messages(&report, FeedbackLevel::Error),
            vec!["Q: header appears 2 times".to_string()]
        );
    }

    #[test]
    fn missing_header_field() {
        let text = GOOD.replace("C:Composer\n", "");
        let report = check_contract(&text);
        assert_eq!(
            messages(&report, FeedbackLevel::Error),
            vec!["Missing C: header".to_string()]
        );
    }

    #[test]
    fn voices_must_count_from_one() {
        let text = GOOD.replace("V: 2", "V: 3");
        let report = check_contract(&text);
        assert!(!report.is_satisfied());
        assert!(report.violations().any(|f| f.message.contains("\"3\"")));

        let no_voices = "X:1\nT:t\nC:c\nM:2/4\nL:1/8\nQ:1/4=80\nK:C\nCDEG|";
        let report = check_contract(no_voices);
        assert!(report
            .violations()
            .any(|f| f.message.contains("No V: voice")));
    }

    #[test]
    fn incomplete_bars_and_accidentals_warn() {
        let text = GOOD.replace("CDEG|GEDC|", "CDE|^GEDC|");
        let report = check_contract(&text);
        assert!(report.is_satisfied());
        let warnings = messages(&report, FeedbackLevel::Warning);
        assert!(warnings.iter().any(|m| m.contains("bar 1 lasts 3 units")));
        assert!(warnings.iter().any(|m| m.contains("1 explicit accidental")));
    }

    #[test]
    fn unusual_bar_count_is_info() {
        let text = "X:1\nT:t\nC:c\nM:2/4\nL:1/8\nQ:1/4=80\nK:C\nV: 1\nCDEG|GEDC|G4|";
        let report = check_contract(text);
        assert!(report.is_satisfied());
        assert_eq!(report.measures, Some(3));
        assert!(report
            .feedback
            .iter()
            .any(|f| f.level == FeedbackLevel::Info && f.message.starts_with("3 bars")));
    }

    #[test]
    fn runaway_octave_marks_still_check() {
        let text = GOOD.replace("CDEG|GEDC|", &format!("C{}DEG|GEDC|", "'".repeat(200)));
        let report = check_contract(&text);
        assert!(report.is_satisfied(), "{:?}", report.feedback);
        assert_eq!(report.measures, Some(4));
    }
}
