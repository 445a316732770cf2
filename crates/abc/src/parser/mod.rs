//! ABC notation parser.
//!
//! Reads the header up to `K:`, then feeds every body line to the voice
//! that is active at that point. Problems are collected rather than
//! aborting, so a caller gets the full list at once.

mod body;
mod header;
mod note;

pub use header::{field, voice_id};

use crate::ast::{Fraction, Tune};
use crate::feedback::{FeedbackCollector, ParseResult};

/// Parse ABC notation into a [`Tune`].
pub fn parse(input: &str) -> ParseResult<Tune> {
    let mut collector = FeedbackCollector::new();
    let lines: Vec<(usize, &str)> = input.lines().enumerate().map(|(i, l)| (i + 1, l)).collect();

    let mut builder = header::HeaderBuilder::new();
    let mut body_start = lines.len();
    for (idx, (line_no, line)) in lines.iter().enumerate() {
        collector.set_line(*line_no);
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('%') {
            continue;
        }
        match header::field(trimmed) {
            Some((name, value)) => {
                if builder.apply(name, value, &mut collector) {
                    body_start = idx + 1;
                    break;
                }
            }
            None => {
                body_start = idx;
                break;
            }
        }
    }

    collector.set_line(0);
    let (header, declared) = builder.finish(&mut collector);

    let bar_units = header
        .meter
        .bar_length()
        .map(|bar| bar.div(header.unit_length))
        .unwrap_or(Fraction::ONE);
    let mut body = body::Body::new(&declared, bar_units);

    for (line_no, line) in &lines[body_start..] {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('%') {
            continue;
        }
        if let Some((name, value)) = header::field(trimmed) {
            collector.set_line(*line_no);
            match name {
                'V' => match voice_id(value) {
                    "" => collector.warning("V: without a voice id"),
                    id => body.switch_voice(id),
                },
                'K' | 'M' | 'L' | 'Q' => {
                    collector.warning(format!("{name}: change inside the tune body is ignored"))
                }
                _ => {}
            }
            continue;
        }
        body.parse_line(line, *line_no, &mut collector);
    }

    collector.set_line(0);
    let mut voices = body.voices;
    voices.retain(|voice| {
        let keep = !voice.elements.is_empty();
        if !keep {
            collector.warning(format!("Voice {} has no music", voice.id));
        }
        keep
    });

    let tune = Tune { header, voices };
    if tune.note_count() == 0 {
        collector.error("Tune body has no notes");
    }

    ParseResult::new(tune, collector.into_feedback())
}
