//! Information fields: `X:`, `T:`, `M:`, `L:`, `Q:`, `K:` and friends.

use winnow::combinator::{opt, preceded};
use winnow::prelude::*;
use winnow::token::take_while;

use crate::ast::{Accidental, Fraction, Header, Key, Meter, Mode, NoteName, Tempo};
use crate::feedback::FeedbackCollector;

use super::note::accidental;

type PResult<T> = winnow::ModalResult<T>;

/// Split `T: Title` into `('T', "Title")`. Anything else is not a field line.
pub fn field(line: &str) -> Option<(char, &str)> {
    let mut chars = line.chars();
    let name = chars.next()?;
    if !(name.is_ascii_uppercase() || name == 'w') || chars.next()? != ':' {
        return None;
    }
    Some((name, line[2..].trim()))
}

/// First whitespace-separated token of a `V:` value.
pub fn voice_id(value: &str) -> &str {
    value.split_whitespace().next().unwrap_or("")
}

#[derive(Debug, Default)]
pub struct HeaderBuilder {
    header: Header,
    seen: Vec<char>,
    voices: Vec<String>,
}

impl HeaderBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one header field. Returns true once `K:` closes the header.
    pub fn apply(&mut self, name: char, value: &str, collector: &mut FeedbackCollector) -> bool {
        self.seen.push(name);
        match name {
            'X' => match value.parse() {
                Ok(n) => self.header.reference = Some(n),
                Err(_) => collector.warning(format!("X: should be a number, got {value:?}")),
            },
            'T' => {
                if self.header.title.is_empty() {
                    self.header.title = value.to_string();
                } else {
                    self.header.other_fields.push(('T', value.to_string()));
                }
            }
            'C' => self.header.composer = Some(value.to_string()),
            'M' => self.header.meter = parse_meter(value, collector),
            'L' => self.header.unit_length = parse_unit_length(value, collector),
            'Q' => {
                if let Some(tempo) = parse_tempo(value, collector) {
                    self.header.tempo = tempo;
                }
            }
            'V' => {
                let id = voice_id(value);
                if !id.is_empty() && !self.voices.iter().any(|v| v == id) {
                    self.voices.push(id.to_string());
                }
            }
            'K' => {
                self.header.key = parse_key(value, collector);
                return true;
            }
            other => self.header.other_fields.push((other, value.to_string())),
        }
        false
    }

    pub fn finish(mut self, collector: &mut FeedbackCollector) -> (Header, Vec<String>) {
        let missing = |c: char| !self.seen.contains(&c);

        if missing('X') {
            collector.warning_with_suggestion("Missing X: field", "start the tune with X:1");
        }
        if missing('T') {
            collector.warning("Missing T: field");
        }
        if missing('M') {
            collector.warning_with_suggestion("Missing M: field, assuming 4/4", "add M:4/4");
        }
        if missing('L') {
            // Standard default: 1/16 for meters below 3/4, 1/8 otherwise.
            let short = self
                .header
                .meter
                .bar_length()
                .is_some_and(|len| len.as_f64() < 0.75);
            self.header.unit_length = Fraction::new(1, if short { 16 } else { 8 });
            collector.warning(format!(
                "Missing L: field, assuming {}",
                self.header.unit_length
            ));
        }
        if missing('Q') {
            collector.warning("Missing Q: field, assuming 1/4=120");
        }
        if missing('K') {
            collector.error("Missing K: field before the tune body");
        }

        (self.header, self.voices)
    }
}

fn number(input: &mut &str) -> PResult<u32> {
    take_while(1.., |c: char| c.is_ascii_digit())
        .try_map(str::parse::<u32>)
        .parse_next(input)
}

fn fraction(input: &mut &str) -> PResult<(u32, u32)> {
    let num = number.parse_next(input)?;
    let den = preceded('/', number).parse_next(input)?;
    Ok((num, den))
}

/// `(2+3)/8` style additive numerators are summed.
fn meter_fraction(input: &mut &str) -> PResult<(u32, u32)> {
    let _ = opt('(').parse_next(input)?;
    let mut num = number.parse_next(input)?;
    while opt('+').parse_next(input)?.is_some() {
        num = num.saturating_add(number.parse_next(input)?);
    }
    let _ = opt(')').parse_next(input)?;
    let den = preceded('/', number).parse_next(input)?;
    Ok((num, den))
}

pub fn parse_meter(value: &str, collector: &mut FeedbackCollector) -> Meter {
    match value.trim() {
        "C" => return Meter::Common,
        "C|" => return Meter::Cut,
        "none" | "" => return Meter::Free,
        _ => {}
    }
    let mut input = value.trim();
    match meter_fraction.parse_next(&mut input) {
        Ok((numerator, denominator)) if numerator > 0 && denominator > 0 => Meter::Simple {
            numerator,
            denominator,
        },
        _ => {
            collector.error(format!("Cannot read meter {value:?}"));
            Meter::default()
        }
    }
}

pub fn parse_unit_length(value: &str, collector: &mut FeedbackCollector) -> Fraction {
    let mut input = value.trim();
    match fraction.parse_next(&mut input) {
        Ok((num, den)) if num > 0 && den > 0 && input.trim().is_empty() => Fraction::new(num, den),
        _ => {
            collector.error(format!("Cannot read unit note length {value:?}"));
            Fraction::new(1, 8)
        }
    }
}

/// Accepts `1/4=100`, `100`, and either wrapped in quoted text such as
/// `"Andante" 1/4=80`.
pub fn parse_tempo(value: &str, collector: &mut FeedbackCollector) -> Option<Tempo> {
    let unquoted: String = value
        .split('"')
        .enumerate()
        .filter(|(i, _)| i % 2 == 0)
        .map(|(_, part)| part)
        .collect::<Vec<_>>()
        .join(" ");
    let text = unquoted.trim();
    if text.is_empty() {
        collector.warning(format!("Q: has no tempo in {value:?}, assuming 1/4=120"));
        return None;
    }

    let mut input = text;
    let parsed = if text.contains('=') {
        (
            fraction,
            preceded((take_while(0.., ' '), '=', take_while(0.., ' ')), number),
        )
            .map(|((num, den), bpm)| (Some(Fraction::new(num, den.max(1))), bpm))
            .parse_next(&mut input)
    } else {
        number.map(|bpm| (None, bpm)).parse_next(&mut input)
    };

    match parsed {
        Ok((beat, bpm)) if bpm > 0 => Some(Tempo {
            beat: beat.unwrap_or(Fraction::new(1, 4)),
            bpm,
        }),
        _ => {
            collector.warning(format!("Cannot read tempo {value:?}, assuming 1/4=120"));
            None
        }
    }
}

fn key_tonic(input: &mut &str) -> PResult<(NoteName, Option<Accidental>)> {
    let name = winnow::token::one_of(|c: char| matches!(c, 'A'..='G'))
        .verify_map(NoteName::from_letter)
        .parse_next(input)?;
    let acc = opt(winnow::token::one_of(['#', 'b']))
        .map(|c| match c {
            Some('#') => Some(Accidental::Sharp),
            Some(_) => Some(Accidental::Flat),
            None => None,
        })
        .parse_next(input)?;
    Ok((name, acc))
}

/// `K:` value: tonic, optional `#`/`b`, optional mode word. Clef and other
/// `name=value` modifiers are ignored, explicit accidentals (`K:D ^c`) too.
pub fn parse_key(value: &str, collector: &mut FeedbackCollector) -> Key {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("none") || trimmed.starts_with("HP") {
        return Key::default();
    }

    let mut input = trimmed;
    let Ok((tonic, accidental)) = key_tonic.parse_next(&mut input) else {
        collector.error(format!("Cannot read key {value:?}"));
        return Key::default();
    };

    let rest = input.trim_start();
    let mode_word = rest
        .split_whitespace()
        .next()
        .filter(|w| !w.contains('=') && accidental_prefix(w).is_none())
        .unwrap_or("");
    let mode = match Mode::parse(mode_word) {
        Some(mode) => mode,
        None => {
            collector.warning(format!("Unknown mode {mode_word:?}, assuming major"));
            Mode::Major
        }
    };

    Key {
        tonic: Some(tonic),
        accidental,
        mode,
    }
}

fn accidental_prefix(word: &str) -> Option<Accidental> {
    let mut input = word;
    accidental.parse_next(&mut input).ok()
}
