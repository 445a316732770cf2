//! Token-level combinators: notes, rests, chords, lengths, bar lines.

use winnow::combinator::{alt, opt, repeat};
use winnow::prelude::*;
use winnow::token::{one_of, take_while};

use crate::ast::{Accidental, BarKind, NoteName};

type PResult<T> = winnow::ModalResult<T>;

/// A note as written, before the length is resolved against the unit.
#[derive(Debug, Clone, PartialEq)]
pub struct RawNote {
    pub pitch: NoteName,
    pub octave: i8,
    pub accidental: Option<Accidental>,
    pub length: RawLength,
    pub tie: bool,
}

/// Length suffix as written; `den` may be zero and is validated by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawLength {
    pub num: u32,
    pub den: u32,
}

impl RawLength {
    pub const UNIT: RawLength = RawLength { num: 1, den: 1 };
}

fn number(input: &mut &str) -> PResult<u32> {
    take_while(1.., |c: char| c.is_ascii_digit())
        .try_map(str::parse::<u32>)
        .parse_next(input)
}

pub fn accidental(input: &mut &str) -> PResult<Accidental> {
    alt((
        "^^".value(Accidental::DoubleSharp),
        "^".value(Accidental::Sharp),
        "__".value(Accidental::DoubleFlat),
        "_".value(Accidental::Flat),
        "=".value(Accidental::Natural),
    ))
    .parse_next(input)
}

/// Upper case letters sit in the octave starting at middle C, lower case one above.
pub fn pitch(input: &mut &str) -> PResult<(NoteName, i8)> {
    one_of(|c: char| matches!(c, 'A'..='G' | 'a'..='g'))
        .verify_map(|c: char| {
            let octave = if c.is_ascii_lowercase() { 1 } else { 0 };
            NoteName::from_letter(c).map(|name| (name, octave))
        })
        .parse_next(input)
}

/// Octave shift beyond which marks stop counting.
pub const OCTAVE_LIMIT: i8 = 10;

/// Net `'` minus `,` marks, held within [`OCTAVE_LIMIT`].
pub fn octave_marks(input: &mut &str) -> PResult<i8> {
    let marks: Vec<char> = repeat(0.., one_of(['\'', ','])).parse_next(input)?;
    Ok(marks.iter().fold(0i8, |shift, c| {
        let step = if *c == '\'' { 1 } else { -1 };
        shift.saturating_add(step).clamp(-OCTAVE_LIMIT, OCTAVE_LIMIT)
    }))
}

/// `2`, `/2`, `3/2`, `/`, `//`.
pub fn length(input: &mut &str) -> PResult<RawLength> {
    let num = opt(number).parse_next(input)?.unwrap_or(1);
    let slashes: &str = take_while(0.., '/').parse_next(input)?;
    if slashes.is_empty() {
        return Ok(RawLength { num, den: 1 });
    }
    let den = match opt(number).parse_next(input)? {
        Some(den) if slashes.len() == 1 => den,
        Some(den) => den.saturating_mul(1 << (slashes.len() - 1).min(16)),
        None => 1 << slashes.len().min(16),
    };
    Ok(RawLength { num, den })
}

pub fn note(input: &mut &str) -> PResult<RawNote> {
    let accidental = opt(accidental).parse_next(input)?;
    let (pitch, base_octave) = pitch(input)?;
    let shift = octave_marks(input)?;
    let length = length(input)?;
    let tie = opt('-').parse_next(input)?.is_some();
    Ok(RawNote {
        pitch,
        octave: base_octave.saturating_add(shift),
        accidental,
        length,
        tie,
    })
}

pub enum RawRest {
    Timed(RawLength),
    /// `Z4`: whole bars of silence.
    Bars(u32),
}

pub fn rest(input: &mut &str) -> PResult<RawRest> {
    let c = one_of(['z', 'x', 'Z', 'X']).parse_next(input)?;
    if c == 'Z' || c == 'X' {
        let bars = opt(number).parse_next(input)?.unwrap_or(1);
        return Ok(RawRest::Bars(bars));
    }
    length.map(RawRest::Timed).parse_next(input)
}

/// `[CEG]2`: returns the member notes and the chord's own length suffix.
pub fn chord(input: &mut &str) -> PResult<(Vec<RawNote>, RawLength, bool)> {
    '['.parse_next(input)?;
    let notes: Vec<RawNote> = repeat(
        1..,
        winnow::combinator::delimited(take_while(0.., ' '), note, take_while(0.., ' ')),
    )
    .parse_next(input)?;
    ']'.parse_next(input)?;
    let length = length(input)?;
    let tie = opt('-').parse_next(input)?.is_some();
    Ok((notes, length, tie))
}

/// `(3`, `(3:2`, `(3:2:3`, `(3::2`.
pub fn tuplet(input: &mut &str) -> PResult<(u8, u8, u8)> {
    '('.parse_next(input)?;
    let p = number.parse_next(input)?;
    let q = opt(winnow::combinator::preceded(':', opt(number))).parse_next(input)?;
    let r = opt(winnow::combinator::preceded(':', opt(number))).parse_next(input)?;

    let p = p.clamp(2, 9) as u8;
    let default_q = match p {
        3 | 6 => 2,
        2 | 4 | 8 => 3,
        _ => 2,
    };
    let q = q.flatten().map(|q| q.clamp(1, 9) as u8).unwrap_or(default_q);
    let r = r.flatten().map(|r| r.clamp(1, 32) as u8).unwrap_or(p);
    Ok((p, q, r))
}

/// Bar lines, repeat signs and numbered endings.
///
/// A single bar token can produce two kinds, e.g. `:|2` closes a repeat and
/// opens the second ending.
pub fn bar(input: &mut &str) -> PResult<Vec<BarKind>> {
    let kinds = alt((
        alt((":||:", ":|:", "::")).value(vec![BarKind::RepeatBoth]),
        winnow::combinator::preceded(alt((":||", ":|")), opt(ending_number)).map(|n| {
            let mut kinds = vec![BarKind::RepeatEnd];
            kinds.extend(n.map(BarKind::Ending));
            kinds
        }),
        "|:".value(vec![BarKind::RepeatStart]),
        "|]".value(vec![BarKind::Final]),
        "||".value(vec![BarKind::Double]),
        "[|".value(vec![BarKind::Thick]),
        winnow::combinator::preceded('[', ending_number).map(|n| vec![BarKind::Ending(n)]),
        winnow::combinator::preceded('|', opt(ending_number)).map(|n| match n {
            Some(n) => vec![BarKind::Ending(n)],
            None => vec![BarKind::Single],
        }),
    ))
    .parse_next(input)?;
    Ok(kinds)
}

fn ending_number(input: &mut &str) -> PResult<u8> {
    one_of(|c: char| c.is_ascii_digit() && c != '0')
        .map(|c: char| c as u8 - b'0')
        .parse_next(input)
}
