//! Standard MIDI File output.
//!
//! Format 1: a conductor track carrying tempo, meter and key, then one
//! track per voice. Repeats are unfolded, key signatures and bar-scoped
//! accidentals applied, and tied notes merged into a single note.

use std::collections::HashMap;

use midly::num::{u15, u24, u28, u4, u7};
use midly::{Format, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind};

use crate::ast::{BarKind, Element, Fraction, Header, Note, NoteName, Tune, Voice};
use crate::MidiParams;

#[derive(Debug, thiserror::Error)]
pub enum MidiError {
    #[error("tune has no voices")]
    NoVoices,
    #[error("failed to encode MIDI: {0}")]
    Encode(#[from] std::io::Error),
}

/// Render a tune to SMF bytes.
pub fn generate(tune: &Tune, params: &MidiParams) -> Result<Vec<u8>, MidiError> {
    if tune.voices.is_empty() {
        return Err(MidiError::NoVoices);
    }

    let tpq = params.ticks_per_quarter.clamp(24, 0x7FFF);
    let mut smf = Smf::new(midly::Header::new(
        Format::Parallel,
        Timing::Metrical(u15::new(tpq)),
    ));

    smf.tracks.push(conductor_track(&tune.header));
    for (index, voice) in tune.voices.iter().enumerate() {
        let events = VoiceWriter::new(&tune.header, params, tpq, channel_for(index)).write(voice);
        smf.tracks.push(into_track(events, Some(voice.id.as_bytes())));
    }

    let mut bytes = Vec::new();
    smf.write_std(&mut bytes)?;
    Ok(bytes)
}

/// Voices take channels in order, stepping over the percussion channel.
fn channel_for(voice_index: usize) -> u8 {
    let slot = (voice_index % 15) as u8;
    if slot >= 9 {
        slot + 1
    } else {
        slot
    }
}

fn conductor_track(header: &Header) -> Vec<TrackEvent<'_>> {
    let mut events: Vec<Timed<'_>> = vec![Timed::meta(
        0,
        MetaMessage::Tempo(u24::new(header.tempo.micros_per_quarter())),
    )];

    if let Some((num, den)) = header.meter.signature() {
        // MIDI stores the denominator as a power of two.
        let pow = if den.is_power_of_two() {
            den.trailing_zeros() as u8
        } else {
            2
        };
        events.push(Timed::meta(
            0,
            MetaMessage::TimeSignature(num.min(255) as u8, pow, 24, 8),
        ));
    }

    let minor = header.key.mode == crate::ast::Mode::Minor;
    events.push(Timed::meta(
        0,
        MetaMessage::KeySignature(header.key.fifths(), minor),
    ));

    let name = (!header.title.is_empty()).then_some(header.title.as_bytes());
    into_track(events, name)
}

struct Timed<'a> {
    tick: u32,
    /// Note-offs sort ahead of note-ons sharing a tick.
    order: u8,
    kind: TrackEventKind<'a>,
}

impl<'a> Timed<'a> {
    fn meta(tick: u32, message: MetaMessage<'a>) -> Self {
        Timed {
            tick,
            order: 0,
            kind: TrackEventKind::Meta(message),
        }
    }
}

fn into_track<'a>(mut events: Vec<Timed<'a>>, name: Option<&'a [u8]>) -> Vec<TrackEvent<'a>> {
    events.sort_by_key(|e| (e.tick, e.order));

    let mut track = Vec::with_capacity(events.len() + 2);
    if let Some(name) = name {
        track.push(TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::TrackName(name)),
        });
    }

    let mut last = 0u32;
    for event in events {
        track.push(TrackEvent {
            delta: u28::new((event.tick - last).min(0x0FFF_FFFF)),
            kind: event.kind,
        });
        last = event.tick;
    }

    track.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    });
    track
}

struct VoiceWriter<'h> {
    header: &'h Header,
    velocity: u7,
    program: u7,
    channel: u4,
    ticks_per_whole: u64,
    events: Vec<Timed<'static>>,
    /// Current position in whole notes.
    position: Fraction,
    /// Keys sounding through a tie, with the note-on already emitted.
    held: Vec<u8>,
    bar_accidentals: HashMap<(NoteName, i8), i16>,
    tuplet: Option<(Fraction, u8)>,
}

impl<'h> VoiceWriter<'h> {
    fn new(header: &'h Header, params: &MidiParams, tpq: u16, channel: u8) -> Self {
        VoiceWriter {
            header,
            velocity: u7::new(params.velocity.clamp(1, 127)),
            program: u7::new(params.program.min(127)),
            channel: u4::new(channel & 0x0F),
            ticks_per_whole: tpq as u64 * 4,
            events: Vec::new(),
            position: Fraction::ZERO,
            held: Vec::new(),
            bar_accidentals: HashMap::new(),
            tuplet: None,
        }
    }

    fn write(mut self, voice: &Voice) -> Vec<Timed<'static>> {
        self.push(
            0,
            1,
            MidiMessage::ProgramChange {
                program: self.program,
            },
        );

        for element in unfold(&voice.elements) {
            match element {
                Element::Bar { .. } => self.bar_accidentals.clear(),
                Element::Tuplet { p, q, r } => {
                    self.tuplet = Some((Fraction::new(q as u32, p as u32), r));
                }
                Element::Note(note) => {
                    let length = self.whole_length(note.length);
                    let key = self.key_for(&note);
                    self.sound(&[(key, note.tie)], length);
                }
                Element::Chord(chord) => {
                    let length = self.whole_length(chord.length);
                    let keys: Vec<(u8, bool)> = chord
                        .notes
                        .iter()
                        .map(|n| (self.key_for(n), n.tie))
                        .collect();
                    self.sound(&keys, length);
                }
                Element::Rest(rest) => {
                    let length = self.whole_length(rest.length);
                    self.release_all();
                    self.position = self.position.add(length);
                }
            }
        }

        self.release_all();
        self.events
    }

    fn tick(&self, position: Fraction) -> u32 {
        let ticks = position.num as u64 * self.ticks_per_whole / position.den.max(1) as u64;
        ticks.min(u32::MAX as u64) as u32
    }

    fn push(&mut self, tick: u32, order: u8, message: MidiMessage) {
        self.events.push(Timed {
            tick,
            order,
            kind: TrackEventKind::Midi {
                channel: self.channel,
                message,
            },
        });
    }

    fn note_on(&mut self, tick: u32, key: u8) {
        let vel = self.velocity;
        self.push(tick, 2, MidiMessage::NoteOn { key: u7::new(key), vel });
    }

    fn note_off(&mut self, tick: u32, key: u8) {
        self.push(
            tick,
            1,
            MidiMessage::NoteOff {
                key: u7::new(key),
                vel: u7::new(0),
            },
        );
    }

    /// Element length in whole notes, after any running tuplet.
    fn whole_length(&mut self, length: Fraction) -> Fraction {
        let mut length = length.mul(self.header.unit_length);
        if let Some((scale, remaining)) = self.tuplet.as_mut() {
            length = length.mul(*scale);
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 {
                self.tuplet = None;
            }
        }
        length
    }

    fn key_for(&mut self, note: &Note) -> u8 {
        let slot = (note.pitch, note.octave);
        let offset = match note.accidental {
            Some(acc) => {
                self.bar_accidentals.insert(slot, acc.offset());
                acc.offset()
            }
            None => self
                .bar_accidentals
                .get(&slot)
                .copied()
                .unwrap_or(self.header.key.signature()[note.pitch.index()]),
        };
        let pitch = 60 + note.octave as i16 * 12 + note.pitch.semitone() + offset;
        pitch.clamp(0, 127) as u8
    }

    fn sound(&mut self, keys: &[(u8, bool)], length: Fraction) {
        let start = self.tick(self.position);
        let end_position = self.position.add(length);
        let end = self.tick(end_position);

        let stale: Vec<u8> = self
            .held
            .iter()
            .copied()
            .filter(|held| !keys.iter().any(|(k, _)| k == held))
            .collect();
        for key in stale {
            self.note_off(start, key);
            self.held.retain(|k| *k != key);
        }

        for &(key, tie) in keys {
            let sounding = self.held.contains(&key);
            if !sounding {
                self.note_on(start, key);
            }
            if tie {
                if !sounding {
                    self.held.push(key);
                }
            } else {
                self.note_off(end, key);
                self.held.retain(|k| *k != key);
            }
        }

        self.position = end_position;
    }

    fn release_all(&mut self) {
        let tick = self.tick(self.position);
        for key in std::mem::take(&mut self.held) {
            self.note_off(tick, key);
        }
    }
}

/// Play `|: ... :|` sections twice, taking the first ending on the first
/// pass and skipping it on the second.
pub fn unfold(elements: &[Element]) -> Vec<Element> {
    let mut out = Vec::with_capacity(elements.len() * 2);
    let mut section_start = 0;
    let mut first_ending: Option<usize> = None;

    for (index, element) in elements.iter().enumerate() {
        out.push(element.clone());
        let Element::Bar { kind, .. } = element else {
            continue;
        };
        match kind {
            BarKind::RepeatStart => {
                section_start = index + 1;
                first_ending = None;
            }
            BarKind::Ending(1) => first_ending = Some(index),
            BarKind::RepeatEnd | BarKind::RepeatBoth => {
                let end = first_ending.unwrap_or(index);
                out.extend_from_slice(&elements[section_start..end]);
                section_start = index + 1;
                first_ending = None;
            }
            _ => {}
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse;

    fn midi_events(bytes: &[u8]) -> Vec<Vec<(u32, TrackEventKind<'_>)>> {
        let smf = Smf::parse(bytes).unwrap();
        smf.tracks
            .into_iter()
            .map(|track| {
                let mut tick = 0u32;
                track
                    .into_iter()
                    .map(|e| {
                        tick += e.delta.as_int();
                        (tick, e.kind)
                    })
                    .collect()
            })
            .collect()
    }

    fn note_ons(track: &[(u32, TrackEventKind<'_>)]) -> Vec<(u32, u8)> {
        track
            .iter()
            .filter_map(|(tick, kind)| match kind {
                TrackEventKind::Midi {
                    message: MidiMessage::NoteOn { key, .. },
                    ..
                } => Some((*tick, key.as_int())),
                _ => None,
            })
            .collect()
    }

    fn render(abc: &str) -> Vec<u8> {
        let result = parse(abc);
        assert!(!result.has_errors(), "{:?}", result.feedback);
        generate(&result.value, &MidiParams::default()).unwrap()
    }

    #[test]
    fn one_track_per_voice_plus_conductor() {
        let bytes = render("X:1\nT:T\nM:4/4\nL:1/4\nQ:1/4=120\nK:C\nV:1\nCDEF|\nV:2\nC,D,E,F,|");
        let smf = Smf::parse(&bytes).unwrap();
        assert_eq!(smf.header.format, Format::Parallel);
        assert_eq!(smf.tracks.len(), 3);
    }

    #[test]
    fn pitches_respect_key_and_bar_accidentals() {
        // G major: F is sharp unless cancelled; the natural lasts to the bar line.
        let bytes = render("X:1\nT:T\nM:4/4\nL:1/4\nQ:1/4=120\nK:G\nF =F F c|F4|");
        let tracks = midi_events(&bytes);
        let keys: Vec<u8> = note_ons(&tracks[1]).into_iter().map(|(_, k)| k).collect();
        assert_eq!(keys, vec![66, 65, 65, 72, 66]);
    }

    #[test]
    fn ticks_follow_unit_length() {
        let bytes = render("X:1\nT:T\nM:4/4\nL:1/8\nQ:1/4=120\nK:C\nC D2 E/2 F|");
        let tracks = midi_events(&bytes);
        let ticks: Vec<u32> = note_ons(&tracks[1]).into_iter().map(|(t, _)| t).collect();
        assert_eq!(ticks, vec![0, 240, 720, 840]);
    }

    #[test]
    fn ties_merge_into_one_note() {
        let bytes = render("X:1\nT:T\nM:4/4\nL:1/4\nQ:1/4=120\nK:C\nC2-C2|");
        let tracks = midi_events(&bytes);
        assert_eq!(note_ons(&tracks[1]), vec![(0, 60)]);
        let off = tracks[1].iter().find_map(|(tick, kind)| match kind {
            TrackEventKind::Midi {
                message: MidiMessage::NoteOff { .. },
                ..
            } => Some(*tick),
            _ => None,
        });
        assert_eq!(off, Some(1920));
    }

    #[test]
    fn repeats_and_endings_unfold() {
        let bytes = render("X:1\nT:T\nM:1/4\nL:1/4\nQ:1/4=120\nK:C\n|:C|1D:|2E|]");
        let tracks = midi_events(&bytes);
        let keys: Vec<u8> = note_ons(&tracks[1]).into_iter().map(|(_, k)| k).collect();
        assert_eq!(keys, vec![60, 62, 60, 64]);
    }

    #[test]
    fn tempo_event_uses_q_field() {
        let bytes = render("X:1\nT:T\nM:4/4\nL:1/4\nQ:1/4=100\nK:C\nCDEF|");
        let tracks = midi_events(&bytes);
        let tempo = tracks[0].iter().find_map(|(_, kind)| match kind {
            TrackEventKind::Meta(MetaMessage::Tempo(t)) => Some(t.as_int()),
            _ => None,
        });
        assert_eq!(tempo, Some(600_000));
    }

    #[test]
    fn ninth_voice_skips_percussion_channel() {
        assert_eq!(channel_for(8), 8);
        assert_eq!(channel_for(9), 10);
        assert_eq!(channel_for(15), 0);
    }
}
