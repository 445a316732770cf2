//! ABC notation parser, output-contract checker and MIDI writer.
//!
//! # Example
//!
//! ```
//! use abc::{check_contract, parse, to_midi, MidiParams};
//!
//! let text = "X:1\nT:Dawn\nC:Anon\nM:4/4\nL:1/4\nQ:1/4=100\nK:C\nV: 1\nCDEG|";
//!
//! let report = check_contract(text);
//! assert!(report.is_satisfied());
//!
//! let result = parse(text);
//! assert!(!result.has_errors());
//! let bytes = to_midi(&result.value, &MidiParams::default()).unwrap();
//! assert_eq!(&bytes[..4], b"MThd");
//! ```

pub mod ast;
pub mod contract;
pub mod feedback;
pub mod midi;
pub mod parser;

pub use ast::*;
pub use contract::{check_contract, ContractReport};
pub use feedback::{Feedback, FeedbackLevel, ParseResult};
pub use midi::MidiError;

/// Parse ABC notation into a [`Tune`], collecting every problem found.
pub fn parse(input: &str) -> ParseResult<Tune> {
    parser::parse(input)
}

#[derive(Debug, Clone)]
pub struct MidiParams {
    /// Note-on velocity (1-127).
    pub velocity: u8,
    pub ticks_per_quarter: u16,
    /// General MIDI program for every voice.
    pub program: u8,
}

impl Default for MidiParams {
    fn default() -> Self {
        MidiParams {
            velocity: 80,
            ticks_per_quarter: 480,
            program: 0,
        }
    }
}

/// Encode a parsed tune as a format 1 Standard MIDI File.
pub fn to_midi(tune: &Tune, params: &MidiParams) -> Result<Vec<u8>, MidiError> {
    midi::generate(tune, params)
}
