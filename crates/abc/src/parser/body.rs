//! Music lines: turns each body line into elements on the active voice.

use winnow::prelude::*;

use crate::ast::{Chord, Element, Fraction, Note, Rest, Voice};
use crate::feedback::FeedbackCollector;

use super::header::voice_id;
use super::note::{self, RawLength, RawNote, RawRest};

/// Mutable state carried across body lines.
pub struct Body {
    pub voices: Vec<Voice>,
    current: Option<usize>,
    /// Bar length in unit notes, used for `Z` multi-bar rests.
    bar_units: Fraction,
    /// Length factor owed to the next note by a `>` or `<`.
    broken: Option<Fraction>,
}

impl Body {
    pub fn new(declared: &[String], bar_units: Fraction) -> Self {
        Body {
            voices: declared.iter().map(Voice::new).collect(),
            current: None,
            bar_units,
            broken: None,
        }
    }

    pub fn switch_voice(&mut self, id: &str) {
        let idx = match self.voices.iter().position(|v| v.id == id) {
            Some(idx) => idx,
            None => {
                self.voices.push(Voice::new(id));
                self.voices.len() - 1
            }
        };
        self.current = Some(idx);
        self.broken = None;
    }

    fn voice(&mut self) -> &mut Voice {
        let idx = match self.current {
            Some(idx) => idx,
            None => {
                if self.voices.is_empty() {
                    self.voices.push(Voice::new("1"));
                }
                self.current = Some(0);
                0
            }
        };
        &mut self.voices[idx]
    }

    fn push(&mut self, element: Element) {
        self.voice().elements.push(element);
    }

    /// Push a timed element, settling any pending broken-rhythm factor.
    fn push_timed(&mut self, mut element: Element) {
        if let Some(factor) = self.broken.take() {
            scale_length(&mut element, factor);
        }
        self.push(element);
    }

    fn last_timed_mut(&mut self) -> Option<&mut Element> {
        self.voice()
            .elements
            .iter_mut()
            .rev()
            .take_while(|e| !matches!(e, Element::Bar { .. }))
            .find(|e| matches!(e, Element::Note(_) | Element::Rest(_) | Element::Chord(_)))
    }

    pub fn parse_line(&mut self, line: &str, line_no: usize, collector: &mut FeedbackCollector) {
        collector.set_line(line_no);
        let mut input = line;

        while !input.is_empty() {
            let Some(c) = input.chars().next() else { break };

            match c {
                ' ' | '\t' | '\\' | '`' | 'y' => {
                    input = &input[c.len_utf8()..];
                }
                '%' => break,
                '"' => match input[1..].find('"') {
                    Some(end) => input = &input[end + 2..],
                    None => {
                        collector.warning("Unclosed annotation quote");
                        break;
                    }
                },
                '!' | '+' => match input[1..].find(c) {
                    Some(end) => input = &input[end + 2..],
                    None => {
                        collector.error(format!("Unclosed decoration starting with '{c}'"));
                        break;
                    }
                },
                '{' => match input.find('}') {
                    Some(end) => input = &input[end + 1..],
                    None => {
                        collector.error("Unclosed grace note group");
                        break;
                    }
                },
                '.' | '~' | 'H' | 'L' | 'M' | 'O' | 'P' | 'S' | 'T' | 'u' | 'v' | ')' => {
                    input = &input[1..];
                }
                '[' if is_inline_field(input) => {
                    let Some(end) = input.find(']') else {
                        collector.error("Unclosed inline field");
                        break;
                    };
                    let inner = &input[1..end];
                    if let Some(value) = inner.strip_prefix("V:") {
                        self.switch_voice(voice_id(value));
                    } else {
                        collector.info(format!("Inline field [{inner}] ignored"));
                    }
                    input = &input[end + 1..];
                }
                '>' | '<' => {
                    let count = input.chars().take_while(|x| *x == c).count();
                    input = &input[count..];
                    self.broken_rhythm(c, count, collector);
                }
                '-' => {
                    input = &input[1..];
                    match self.last_timed_mut() {
                        Some(Element::Note(n)) => n.tie = true,
                        _ => collector.warning("Tie without a preceding note"),
                    }
                }
                '(' => {
                    let start = input;
                    if let Ok((p, q, r)) = note::tuplet.parse_next(&mut input) {
                        self.push(Element::Tuplet { p, q, r });
                    } else {
                        // Slur start.
                        input = &start[1..];
                    }
                }
                _ => {
                    if !self.element(&mut input, collector) {
                        collector.error(format!("Unexpected symbol '{c}'"));
                        input = &input[c.len_utf8()..];
                    }
                }
            }
        }
    }

    /// Bars, chords, notes, rests. Returns false if nothing matched.
    fn element(&mut self, input: &mut &str, collector: &mut FeedbackCollector) -> bool {
        let line = collector.line();
        let start = *input;

        if let Ok(kinds) = note::bar.parse_next(input) {
            for kind in kinds {
                self.push(Element::Bar { kind, line });
            }
            self.broken = None;
            return true;
        }
        *input = start;

        if input.starts_with('[') {
            return match note::chord.parse_next(input) {
                Ok((raw, length, tie)) => {
                    let Some(suffix) = resolve(length, collector) else {
                        return true;
                    };
                    let notes: Vec<Note> = raw
                        .into_iter()
                        .filter_map(|n| resolve_note(n, collector))
                        .map(|mut n| {
                            n.tie |= tie;
                            n
                        })
                        .collect();
                    let base = notes.first().map(|n| n.length).unwrap_or(Fraction::ONE);
                    self.push_timed(Element::Chord(Chord {
                        notes,
                        length: base.mul(suffix),
                    }));
                    true
                }
                Err(_) => {
                    collector.error("Malformed chord, expected notes between [ and ]");
                    *input = start.find(']').map_or("", |end| &start[end + 1..]);
                    true
                }
            };
        }

        if let Ok(raw) = note::note.parse_next(input) {
            if let Some(n) = resolve_note(raw, collector) {
                self.push_timed(Element::Note(n));
            }
            return true;
        }
        *input = start;

        if let Ok(rest) = note::rest.parse_next(input) {
            let length = match rest {
                RawRest::Timed(len) => resolve(len, collector),
                RawRest::Bars(count) => Some(self.bar_units.mul(Fraction::new(count.max(1), 1))),
            };
            if let Some(length) = length {
                self.push_timed(Element::Rest(Rest { length }));
            }
            return true;
        }
        *input = start;

        false
    }

    fn broken_rhythm(&mut self, c: char, count: usize, collector: &mut FeedbackCollector) {
        let shift = count.min(3) as u32;
        let small = Fraction::new(1, 1 << shift);
        let large = Fraction::new((1 << (shift + 1)) - 1, 1 << shift);
        let (before, after) = if c == '>' { (large, small) } else { (small, large) };

        match self.last_timed_mut() {
            Some(element) => {
                scale_length(element, before);
                self.broken = Some(after);
            }
            None => collector.warning(format!("Broken rhythm '{c}' without a preceding note")),
        }
    }
}

fn is_inline_field(input: &str) -> bool {
    let bytes = input.as_bytes();
    bytes.len() > 2 && bytes[1].is_ascii_alphabetic() && bytes[2] == b':'
}

fn scale_length(element: &mut Element, factor: Fraction) {
    match element {
        Element::Note(n) => n.length = n.length.mul(factor),
        Element::Rest(r) => r.length = r.length.mul(factor),
        Element::Chord(c) => c.length = c.length.mul(factor),
        Element::Tuplet { .. } | Element::Bar { .. } => {}
    }
}

fn resolve(length: RawLength, collector: &mut FeedbackCollector) -> Option<Fraction> {
    if length.den == 0 || length.num == 0 {
        collector.error(format!(
            "Invalid note length {}/{}",
            length.num, length.den
        ));
        return None;
    }
    Some(Fraction::new(length.num, length.den))
}

/// Octaves around middle C that still land on a MIDI key.
const MIDI_OCTAVES: std::ops::RangeInclusive<i8> = -5..=5;

fn resolve_note(raw: RawNote, collector: &mut FeedbackCollector) -> Option<Note> {
    let length = resolve(raw.length, collector)?;
    if !MIDI_OCTAVES.contains(&raw.octave) {
        collector.warning(format!(
            "Note is {} octaves from middle C, outside the MIDI range; it will be clamped",
            raw.octave
        ));
    }
    Some(Note {
        pitch: raw.pitch,
        octave: raw.octave,
        accidental: raw.accidental,
        length,
        tie: raw.tie,
    })
}
