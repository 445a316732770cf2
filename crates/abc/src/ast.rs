//! Syntax tree for the subset of ABC notation the composer emits.
//!
//! Durations are kept as exact fractions so bar completeness can be
//! checked without rounding. Note lengths are multiples of the tune's
//! unit note length (`L:`), meters and unit lengths are fractions of a
//! whole note.

use serde::{Deserialize, Serialize};

/// A parsed tune: header plus one or more voices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tune {
    pub header: Header,
    pub voices: Vec<Voice>,
}

impl Tune {
    /// Total number of notes across all voices (chord notes counted once per chord).
    pub fn note_count(&self) -> usize {
        self.voices
            .iter()
            .flat_map(|v| v.elements.iter())
            .filter(|e| matches!(e, Element::Note(_) | Element::Chord(_)))
            .count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub reference: Option<u32>,
    pub title: String,
    pub composer: Option<String>,
    pub meter: Meter,
    pub unit_length: Fraction,
    pub tempo: Tempo,
    pub key: Key,
    /// Fields we carry but do not interpret (R:, S:, N:, ...).
    pub other_fields: Vec<(char, String)>,
}

impl Default for Header {
    fn default() -> Self {
        Header {
            reference: None,
            title: String::new(),
            composer: None,
            meter: Meter::default(),
            unit_length: Fraction::new(1, 8),
            tempo: Tempo::default(),
            key: Key::default(),
            other_fields: Vec::new(),
        }
    }
}

/// An exact positive rational, always stored reduced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fraction {
    pub num: u32,
    pub den: u32,
}

impl Fraction {
    pub const ZERO: Fraction = Fraction { num: 0, den: 1 };
    pub const ONE: Fraction = Fraction { num: 1, den: 1 };

    /// Build a reduced fraction. A zero denominator is coerced to 1;
    /// the parser reports that case before it gets here.
    pub fn new(num: u32, den: u32) -> Self {
        let den = den.max(1);
        let g = gcd(num, den).max(1);
        Fraction {
            num: num / g,
            den: den / g,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.num == 0
    }

    pub fn add(self, other: Fraction) -> Fraction {
        let num = self.num as u64 * other.den as u64 + other.num as u64 * self.den as u64;
        let den = self.den as u64 * other.den as u64;
        reduce_wide(num, den)
    }

    pub fn mul(self, other: Fraction) -> Fraction {
        reduce_wide(
            self.num as u64 * other.num as u64,
            self.den as u64 * other.den as u64,
        )
    }

    pub fn div(self, other: Fraction) -> Fraction {
        reduce_wide(
            self.num as u64 * other.den as u64,
            self.den as u64 * other.num.max(1) as u64,
        )
    }

    pub fn as_f64(&self) -> f64 {
        self.num as f64 / self.den as f64
    }
}

impl std::fmt::Display for Fraction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.den == 1 {
            write!(f, "{}", self.num)
        } else {
            write!(f, "{}/{}", self.num, self.den)
        }
    }
}

fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

fn reduce_wide(num: u64, den: u64) -> Fraction {
    let mut a = num;
    let mut b = den.max(1);
    while b != 0 {
        (a, b) = (b, a % b);
    }
    let g = a.max(1);
    let (num, den) = (num / g, den.max(1) / g);
    Fraction {
        num: num.min(u32::MAX as u64) as u32,
        den: den.min(u32::MAX as u64).max(1) as u32,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Meter {
    Simple { numerator: u32, denominator: u32 },
    /// `C`
    Common,
    /// `C|`
    Cut,
    /// `none`
    Free,
}

impl Default for Meter {
    fn default() -> Self {
        Meter::Simple {
            numerator: 4,
            denominator: 4,
        }
    }
}

impl Meter {
    /// Bar length as a fraction of a whole note, or `None` for free meter.
    pub fn bar_length(&self) -> Option<Fraction> {
        match *self {
            Meter::Simple {
                numerator,
                denominator,
            } => Some(Fraction::new(numerator, denominator)),
            Meter::Common => Some(Fraction::ONE),
            Meter::Cut => Some(Fraction::ONE),
            Meter::Free => None,
        }
    }

    /// (numerator, denominator) for the MIDI time signature event.
    pub fn signature(&self) -> Option<(u32, u32)> {
        match *self {
            Meter::Simple {
                numerator,
                denominator,
            } => Some((numerator, denominator)),
            Meter::Common => Some((4, 4)),
            Meter::Cut => Some((2, 2)),
            Meter::Free => None,
        }
    }
}

/// `Q:` tempo: `beat` notes per minute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tempo {
    pub beat: Fraction,
    pub bpm: u32,
}

impl Default for Tempo {
    fn default() -> Self {
        Tempo {
            beat: Fraction::new(1, 4),
            bpm: 120,
        }
    }
}

impl Tempo {
    /// Microseconds per quarter note, as MIDI wants it.
    pub fn micros_per_quarter(&self) -> u32 {
        let bpm = self.bpm.max(1) as f64;
        let quarters_per_beat = self.beat.as_f64() * 4.0;
        let micros = 60_000_000.0 / (bpm * quarters_per_beat);
        micros.round().clamp(1.0, 0x00FF_FFFF as f64) as u32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NoteName {
    C,
    D,
    E,
    F,
    G,
    A,
    B,
}

impl NoteName {
    pub const ALL: [NoteName; 7] = [
        NoteName::C,
        NoteName::D,
        NoteName::E,
        NoteName::F,
        NoteName::G,
        NoteName::A,
        NoteName::B,
    ];

    pub fn semitone(&self) -> i16 {
        match self {
            NoteName::C => 0,
            NoteName::D => 2,
            NoteName::E => 4,
            NoteName::F => 5,
            NoteName::G => 7,
            NoteName::A => 9,
            NoteName::B => 11,
        }
    }

    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn from_letter(c: char) -> Option<NoteName> {
        match c.to_ascii_uppercase() {
            'C' => Some(NoteName::C),
            'D' => Some(NoteName::D),
            'E' => Some(NoteName::E),
            'F' => Some(NoteName::F),
            'G' => Some(NoteName::G),
            'A' => Some(NoteName::A),
            'B' => Some(NoteName::B),
            _ => None,
        }
    }

    /// Position on the circle of fifths relative to C (F = -1, G = 1, ...).
    fn fifths(&self) -> i8 {
        match self {
            NoteName::F => -1,
            NoteName::C => 0,
            NoteName::G => 1,
            NoteName::D => 2,
            NoteName::A => 3,
            NoteName::E => 4,
            NoteName::B => 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Accidental {
    DoubleSharp,
    Sharp,
    Natural,
    Flat,
    DoubleFlat,
}

impl Accidental {
    pub fn offset(&self) -> i16 {
        match self {
            Accidental::DoubleSharp => 2,
            Accidental::Sharp => 1,
            Accidental::Natural => 0,
            Accidental::Flat => -1,
            Accidental::DoubleFlat => -2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Mode {
    #[default]
    Major,
    Minor,
    Dorian,
    Phrygian,
    Lydian,
    Mixolydian,
    Locrian,
}

impl Mode {
    pub fn parse(s: &str) -> Option<Mode> {
        let lower = s.to_ascii_lowercase();
        let word = lower.get(..3).unwrap_or(&lower);
        match word {
            "" | "maj" | "ion" => Some(Mode::Major),
            "m" | "min" | "aeo" => Some(Mode::Minor),
            "dor" => Some(Mode::Dorian),
            "phr" => Some(Mode::Phrygian),
            "lyd" => Some(Mode::Lydian),
            "mix" => Some(Mode::Mixolydian),
            "loc" => Some(Mode::Locrian),
            _ => None,
        }
    }

    /// Shift in fifths from the major key on the same tonic.
    fn fifths_shift(&self) -> i8 {
        match self {
            Mode::Lydian => 1,
            Mode::Major => 0,
            Mode::Mixolydian => -1,
            Mode::Dorian => -2,
            Mode::Minor => -3,
            Mode::Phrygian => -4,
            Mode::Locrian => -5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Key {
    pub tonic: Option<NoteName>,
    pub accidental: Option<Accidental>,
    pub mode: Mode,
}

impl Key {
    /// Number of sharps (positive) or flats (negative) in the signature.
    pub fn fifths(&self) -> i8 {
        let Some(tonic) = self.tonic else {
            return 0;
        };
        let acc = match self.accidental {
            Some(Accidental::Sharp) => 7,
            Some(Accidental::Flat) => -7,
            _ => 0,
        };
        (tonic.fifths() + acc + self.mode.fifths_shift()).clamp(-7, 7)
    }

    /// Semitone adjustment the key signature applies to each note letter.
    pub fn signature(&self) -> [i16; 7] {
        const SHARP_ORDER: [NoteName; 7] = [
            NoteName::F,
            NoteName::C,
            NoteName::G,
            NoteName::D,
            NoteName::A,
            NoteName::E,
            NoteName::B,
        ];
        let mut offsets = [0i16; 7];
        let fifths = self.fifths();
        if fifths > 0 {
            for name in SHARP_ORDER.iter().take(fifths as usize) {
                offsets[name.index()] = 1;
            }
        } else {
            for name in SHARP_ORDER.iter().rev().take((-fifths) as usize) {
                offsets[name.index()] = -1;
            }
        }
        offsets
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Voice {
    pub id: String,
    pub elements: Vec<Element>,
}

impl Voice {
    pub fn new(id: impl Into<String>) -> Self {
        Voice {
            id: id.into(),
            elements: Vec::new(),
        }
    }

    /// Sum the sounding length of each bar, in unit-note multiples.
    ///
    /// A trailing segment with no closing bar line counts as a bar when it
    /// contains anything playable.
    pub fn measures(&self) -> Vec<Measure> {
        let mut measures = Vec::new();
        let mut current = Fraction::ZERO;
        let mut playable = false;
        let mut tuplet: Option<(Fraction, u32)> = None;
        let mut last_line = 0;

        for element in &self.elements {
            let length = match element {
                Element::Note(n) => Some(n.length),
                Element::Rest(r) => Some(r.length),
                Element::Chord(c) => Some(c.length),
                Element::Tuplet { p, q, r } => {
                    tuplet = Some((Fraction::new(*q as u32, *p as u32), *r as u32));
                    None
                }
                Element::Bar { line, .. } => {
                    last_line = *line;
                    if playable {
                        measures.push(Measure {
                            length: current,
                            line: *line,
                        });
                    }
                    current = Fraction::ZERO;
                    playable = false;
                    None
                }
            };

            if let Some(length) = length {
                let length = match tuplet.as_mut() {
                    Some((scale, remaining)) if *remaining > 0 => {
                        *remaining -= 1;
                        length.mul(*scale)
                    }
                    _ => length,
                };
                if tuplet.is_some_and(|(_, remaining)| remaining == 0) {
                    tuplet = None;
                }
                current = current.add(length);
                playable = true;
            }
        }

        if playable {
            measures.push(Measure {
                length: current,
                line: last_line,
            });
        }

        measures
    }
}

/// One bar's accumulated length and the line where it closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Measure {
    pub length: Fraction,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Element {
    Note(Note),
    Rest(Rest),
    Chord(Chord),
    /// `(p:q:r` - the next `r` notes take `q/p` of their written length.
    Tuplet { p: u8, q: u8, r: u8 },
    Bar { kind: BarKind, line: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub pitch: NoteName,
    /// 0 for `C`..`B`, 1 for `c`..`b`, shifted by `'` and `,`.
    pub octave: i8,
    pub accidental: Option<Accidental>,
    /// Multiple of the unit note length.
    pub length: Fraction,
    pub tie: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rest {
    pub length: Fraction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chord {
    pub notes: Vec<Note>,
    pub length: Fraction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BarKind {
    Single,
    Double,
    /// `|]`
    Final,
    /// `[|`
    Thick,
    RepeatStart,
    RepeatEnd,
    /// `::`
    RepeatBoth,
    /// `|1`, `[1`, `:|2`, ...
    Ending(u8),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fraction_arithmetic_reduces() {
        let half = Fraction::new(2, 4);
        assert_eq!(half, Fraction::new(1, 2));
        assert_eq!(half.add(Fraction::new(1, 4)), Fraction::new(3, 4));
        assert_eq!(half.mul(Fraction::new(2, 3)), Fraction::new(1, 3));
        assert_eq!(Fraction::ONE.div(Fraction::new(1, 8)), Fraction::new(8, 1));
        assert_eq!(Fraction::new(3, 0), Fraction::new(3, 1));
    }

    #[test]
    fn key_signatures_follow_circle_of_fifths() {
        let g = Key {
            tonic: Some(NoteName::G),
            accidental: None,
            mode: Mode::Major,
        };
        assert_eq!(g.fifths(), 1);
        assert_eq!(g.signature()[NoteName::F.index()], 1);

        let d_dorian = Key {
            tonic: Some(NoteName::D),
            accidental: None,
            mode: Mode::Dorian,
        };
        assert_eq!(d_dorian.fifths(), 0);

        let b_flat = Key {
            tonic: Some(NoteName::B),
            accidental: Some(Accidental::Flat),
            mode: Mode::Major,
        };
        assert_eq!(b_flat.fifths(), -2);
        let sig = b_flat.signature();
        assert_eq!(sig[NoteName::B.index()], -1);
        assert_eq!(sig[NoteName::E.index()], -1);
        assert_eq!(sig[NoteName::A.index()], 0);
    }

    #[test]
    fn tempo_converts_beat_units() {
        let quarter = Tempo {
            beat: Fraction::new(1, 4),
            bpm: 100,
        };
        assert_eq!(quarter.micros_per_quarter(), 600_000);

        let half = Tempo {
            beat: Fraction::new(1, 2),
            bpm: 60,
        };
        assert_eq!(half.micros_per_quarter(), 500_000);
    }

    #[test]
    fn measures_apply_tuplet_scaling() {
        let note = |len: u32| {
            Element::Note(Note {
                pitch: NoteName::C,
                octave: 0,
                accidental: None,
                length: Fraction::new(len, 1),
                tie: false,
            })
        };
        let voice = Voice {
            id: "1".into(),
            elements: vec![
                Element::Tuplet { p: 3, q: 2, r: 3 },
                note(1),
                note(1),
                note(1),
                note(2),
                Element::Bar {
                    kind: BarKind::Single,
                    line: 1,
                },
            ],
        };
        let measures = voice.measures();
        assert_eq!(measures.len(), 1);
        assert_eq!(measures[0].length, Fraction::new(4, 1));
    }
}
