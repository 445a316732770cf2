//! Notation to MIDI to WAV.
//!
//! Files land in the artifact directory as `{title}_{8 hex}.mid` and
//! `{title}_{8 hex}.wav`, each with its own random suffix. Nothing is
//! cleaned up afterwards.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use abc::{Feedback, MidiParams};
use async_trait::async_trait;
use hound::{WavSpec, WavWriter};
use phlengconf::PathsConfig;
use rustysynth::{MidiFile, MidiFileSequencer, SoundFont, Synthesizer, SynthesizerSettings};
use serde::Serialize;
use thiserror::Error;

pub const SAMPLE_RATE: u32 = 44_100;

/// Seconds rendered past the last event so notes can ring out.
const DECAY_SECONDS: f64 = 3.0;

/// Longest piece that will be synthesized. Sample buffers are sized from
/// the MIDI length, so this bounds memory per render.
pub const MAX_RENDER_SECONDS: f64 = 15.0 * 60.0;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("notation does not parse: {}", summarize(.feedback))]
    NotationParse { feedback: Vec<Feedback> },

    #[error("MIDI encoding failed: {0}")]
    Midi(#[from] abc::MidiError),

    #[error("no SoundFont found at {} or in {}", .path.display(), .searched.join(", "))]
    NoSoundFont { path: PathBuf, searched: Vec<String> },

    #[error("synthesis failed: {0}")]
    Synthesis(String),

    #[error("failed to write {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl RenderError {
    /// Parse problems are the notation's fault; everything else is the
    /// audio engine's.
    pub fn is_notation_error(&self) -> bool {
        matches!(self, RenderError::NotationParse { .. } | RenderError::Midi(_))
    }
}

fn summarize(feedback: &[Feedback]) -> String {
    feedback
        .iter()
        .filter(|f| f.level == abc::FeedbackLevel::Error)
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedArtifacts {
    pub midi: PathBuf,
    pub wav: PathBuf,
}

impl RenderedArtifacts {
    pub fn midi_name(&self) -> String {
        file_name(&self.midi)
    }

    pub fn wav_name(&self) -> String {
        file_name(&self.wav)
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Turns notation into playable files.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, notation: &str, base_name: &str)
        -> Result<RenderedArtifacts, RenderError>;
}

/// Renders with rustysynth against a SoundFont on disk.
#[derive(Debug, Clone)]
pub struct AudioRenderer {
    artifact_dir: PathBuf,
    soundfont: PathBuf,
    soundfont_dirs: Vec<PathBuf>,
    sample_rate: u32,
    midi: MidiParams,
}

impl AudioRenderer {
    pub fn new(artifact_dir: impl Into<PathBuf>, soundfont: impl Into<PathBuf>) -> Self {
        Self {
            artifact_dir: artifact_dir.into(),
            soundfont: soundfont.into(),
            soundfont_dirs: Vec::new(),
            sample_rate: SAMPLE_RATE,
            midi: MidiParams::default(),
        }
    }

    pub fn from_config(paths: &PathsConfig) -> Self {
        Self {
            soundfont_dirs: paths.soundfont_dirs.clone(),
            ..Self::new(&paths.artifact_dir, &paths.soundfont)
        }
    }

    pub fn artifact_dir(&self) -> &Path {
        &self.artifact_dir
    }

    /// The configured SoundFont if it exists, else the first `.sf2` (by
    /// name) in the search directories.
    pub fn resolve_soundfont(&self) -> Result<PathBuf, RenderError> {
        if self.soundfont.is_file() {
            return Ok(self.soundfont.clone());
        }

        for dir in &self.soundfont_dirs {
            let Ok(entries) = std::fs::read_dir(dir) else {
                continue;
            };
            let mut found: Vec<PathBuf> = entries
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| {
                    p.extension()
                        .is_some_and(|ext| ext.eq_ignore_ascii_case("sf2"))
                })
                .collect();
            found.sort();
            if let Some(path) = found.into_iter().next() {
                tracing::debug!(soundfont = %path.display(), "Using SoundFont from search path");
                return Ok(path);
            }
        }

        Err(RenderError::NoSoundFont {
            path: self.soundfont.clone(),
            searched: self
                .soundfont_dirs
                .iter()
                .map(|d| d.display().to_string())
                .collect(),
        })
    }

    /// Parse and encode. Any parse error blocks rendering.
    pub fn notation_to_midi(&self, notation: &str) -> Result<Vec<u8>, RenderError> {
        notation_to_midi(notation, &self.midi)
    }
}

pub fn notation_to_midi(notation: &str, params: &MidiParams) -> Result<Vec<u8>, RenderError> {
    let parsed = abc::parse(notation);
    if parsed.has_errors() {
        return Err(RenderError::NotationParse {
            feedback: parsed.feedback,
        });
    }
    for warning in parsed.warnings() {
        tracing::debug!(%warning, "Notation warning");
    }
    Ok(abc::to_midi(&parsed.value, params)?)
}

#[async_trait]
impl Renderer for AudioRenderer {
    #[tracing::instrument(skip(self, notation), fields(artifact_dir = %self.artifact_dir.display()))]
    async fn render(
        &self,
        notation: &str,
        base_name: &str,
    ) -> Result<RenderedArtifacts, RenderError> {
        let midi_bytes = self.notation_to_midi(notation)?;
        let soundfont = self.resolve_soundfont()?;

        tokio::fs::create_dir_all(&self.artifact_dir)
            .await
            .map_err(|source| RenderError::Io {
                path: self.artifact_dir.clone(),
                source,
            })?;

        let midi = self.artifact_dir.join(artifact_name(base_name, "mid"));
        write_file(&midi, &midi_bytes).await?;
        tracing::info!(path = %midi.display(), bytes = midi_bytes.len(), "MIDI written");

        let wav = self.artifact_dir.join(artifact_name(base_name, "wav"));
        let synthesized = synthesize(midi_bytes, &soundfont, self.sample_rate).await;
        let written = match synthesized {
            Ok(wav_bytes) => write_file(&wav, &wav_bytes).await.map(|()| wav_bytes.len()),
            Err(e) => Err(e),
        };

        match written {
            Ok(bytes) => {
                tracing::info!(path = %wav.display(), bytes, "WAV written");
                Ok(RenderedArtifacts { midi, wav })
            }
            Err(e) => {
                tracing::warn!(error = %e, "Synthesis failed, removing MIDI");
                if let Err(remove) = tokio::fs::remove_file(&midi).await {
                    tracing::warn!(path = %midi.display(), error = %remove, "Failed to remove MIDI");
                }
                let _ = tokio::fs::remove_file(&wav).await;
                Err(e)
            }
        }
    }
}

async fn write_file(path: &Path, bytes: &[u8]) -> Result<(), RenderError> {
    tokio::fs::write(path, bytes)
        .await
        .map_err(|source| RenderError::Io {
            path: path.to_path_buf(),
            source,
        })
}

async fn synthesize(
    midi_bytes: Vec<u8>,
    soundfont: &Path,
    sample_rate: u32,
) -> Result<Vec<u8>, RenderError> {
    let soundfont_bytes = tokio::fs::read(soundfont)
        .await
        .map_err(|e| RenderError::Synthesis(format!("reading {}: {e}", soundfont.display())))?;

    tokio::task::spawn_blocking(move || render_midi_to_wav(&midi_bytes, &soundfont_bytes, sample_rate))
        .await
        .map_err(|e| RenderError::Synthesis(format!("synthesis task failed: {e}")))?
}

/// Render MIDI bytes to a 16-bit stereo WAV using a SoundFont.
pub fn render_midi_to_wav(
    midi_bytes: &[u8],
    soundfont_bytes: &[u8],
    sample_rate: u32,
) -> Result<Vec<u8>, RenderError> {
    let midi = Arc::new(
        MidiFile::new(&mut Cursor::new(midi_bytes))
            .map_err(|e| RenderError::Synthesis(format!("failed to read MIDI: {e:?}")))?,
    );
    let length = midi.get_length();
    if !length.is_finite() || length > MAX_RENDER_SECONDS {
        return Err(RenderError::Synthesis(format!(
            "piece lasts {length:.0}s, over the {MAX_RENDER_SECONDS:.0}s limit"
        )));
    }

    let sound_font = Arc::new(
        SoundFont::new(&mut Cursor::new(soundfont_bytes))
            .map_err(|e| RenderError::Synthesis(format!("failed to load SoundFont: {e:?}")))?,
    );

    let settings = SynthesizerSettings::new(sample_rate as i32);
    let synthesizer = Synthesizer::new(&sound_font, &settings)
        .map_err(|e| RenderError::Synthesis(format!("failed to create synthesizer: {e:?}")))?;

    let mut sequencer = MidiFileSequencer::new(synthesizer);
    sequencer.play(&midi, false);

    let total = length + DECAY_SECONDS;
    let sample_count = (sample_rate as f64 * total) as usize;
    let mut left = vec![0f32; sample_count];
    let mut right = vec![0f32; sample_count];
    sequencer.render(&mut left[..], &mut right[..]);

    samples_to_wav(&left, &right, sample_rate)
}

/// Interleave and quantize stereo samples into WAV bytes.
pub fn samples_to_wav(left: &[f32], right: &[f32], sample_rate: u32) -> Result<Vec<u8>, RenderError> {
    let spec = WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let encode = |e: hound::Error| RenderError::Synthesis(format!("WAV encoding failed: {e}"));

    let mut cursor = Cursor::new(Vec::new());
    let mut writer = WavWriter::new(&mut cursor, spec).map_err(encode)?;
    for (&l, &r) in left.iter().zip(right) {
        writer
            .write_sample((l.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
            .map_err(encode)?;
        writer
            .write_sample((r.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
            .map_err(encode)?;
    }
    writer.finalize().map_err(encode)?;

    Ok(cursor.into_inner())
}

/// `{base}_{8 hex}.{ext}` with a fresh random suffix.
pub fn artifact_name(base_name: &str, ext: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}_{}.{}", safe_base_name(base_name), &suffix[..8], ext)
}

/// Make a title usable as a file name and URL path segment. Letters and
/// digits in any script survive; everything else becomes `_`.
pub fn safe_base_name(title: &str) -> String {
    let cleaned: String = title
        .trim()
        .chars()
        .map(|c| match c {
            c if c.is_alphanumeric() => c,
            '-' | '.' => c,
            _ => '_',
        })
        .collect();
    let cleaned = cleaned.trim_matches('.').to_string();
    if cleaned.is_empty() {
        "untitled".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TUNE: &str = "X: 1\nT: Dawn\nC: Anon\nM: 2/4\nL: 1/8\nQ: 1/4=80\nK: C\nV: 1\nC2 D2| E2 G2|";

    #[test]
    fn names_carry_title_and_random_suffix() {
        let a = artifact_name("Lao Duang Duean", "mid");
        let b = artifact_name("Lao Duang Duean", "mid");
        assert_ne!(a, b);
        assert!(a.starts_with("Lao_Duang_Duean_"));
        assert!(a.ends_with(".mid"));
        assert_eq!(a.len(), "Lao_Duang_Duean_".len() + 8 + ".mid".len());
    }

    #[test]
    fn base_names_lose_path_separators() {
        assert_eq!(safe_base_name("../etc/passwd"), "_etc_passwd");
        assert_eq!(safe_base_name("Khaek: Mon"), "Khaek__Mon");
        assert_eq!(safe_base_name("  "), "untitled");
    }

    #[test]
    fn notation_becomes_midi() {
        let bytes = notation_to_midi(TUNE, &MidiParams::default()).unwrap();
        assert_eq!(&bytes[..4], b"MThd");
    }

    #[test]
    fn silent_samples_make_a_wav() {
        let wav = samples_to_wav(&[0.0; 10], &[0.0; 10], SAMPLE_RATE).unwrap();
        let reader = hound::WavReader::new(Cursor::new(wav)).unwrap();
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.len(), 20);
    }

    #[tokio::test]
    async fn parse_error_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = AudioRenderer::new(dir.path(), dir.path().join("none.sf2"));

        let err = renderer
            .render("X: 1\nT: Prose\nK: C\nthis is % not music @@@", "Prose")
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::NotationParse { .. }));
        assert!(err.is_notation_error());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn missing_soundfont_leaves_no_files() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let renderer = AudioRenderer::new(&out, dir.path().join("none.sf2"));

        let err = renderer.render(TUNE, "Dawn").await.unwrap_err();
        assert!(matches!(err, RenderError::NoSoundFont { .. }));
        assert!(!err.is_notation_error());
        assert!(!out.exists() || std::fs::read_dir(&out).unwrap().count() == 0);
    }

    #[tokio::test]
    async fn corrupt_soundfont_removes_midi() {
        let dir = tempfile::tempdir().unwrap();
        let soundfont = dir.path().join("broken.sf2");
        std::fs::write(&soundfont, b"RIFF not really").unwrap();
        let out = dir.path().join("out");
        let renderer = AudioRenderer::new(&out, &soundfont);

        let err = renderer.render(TUNE, "Dawn").await.unwrap_err();
        assert!(matches!(err, RenderError::Synthesis(_)));
        assert_eq!(std::fs::read_dir(&out).unwrap().count(), 0);
    }

    #[test]
    fn soundfont_found_in_search_dirs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.sf2"), b"").unwrap();
        std::fs::write(dir.path().join("a.SF2"), b"").unwrap();
        std::fs::write(dir.path().join("readme.txt"), b"").unwrap();

        let mut renderer = AudioRenderer::new(dir.path(), dir.path().join("missing.sf2"));
        renderer.soundfont_dirs = vec![PathBuf::from("/nonexistent"), dir.path().to_path_buf()];
        assert_eq!(renderer.resolve_soundfont().unwrap(), dir.path().join("a.SF2"));
    }

    const ENDLESS: &str =
        "X: 1\nT: Endless\nC: Anon\nM: 2/4\nL: 1/8\nQ: 1/4=80\nK: C\nV: 1\nC4294967295|";

    #[test]
    fn overlong_piece_is_refused_before_synthesis() {
        let midi = notation_to_midi(ENDLESS, &MidiParams::default()).unwrap();
        let err = render_midi_to_wav(&midi, b"not a soundfont", SAMPLE_RATE).unwrap_err();
        match err {
            RenderError::Synthesis(message) => assert!(message.contains("limit"), "{message}"),
            other => panic!("expected a synthesis error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn overlong_piece_leaves_no_files() {
        let dir = tempfile::tempdir().unwrap();
        let soundfont = dir.path().join("any.sf2");
        std::fs::write(&soundfont, b"RIFF").unwrap();
        let out = dir.path().join("out");
        let renderer = AudioRenderer::new(&out, &soundfont);

        let err = renderer.render(ENDLESS, "Endless").await.unwrap_err();
        assert!(!err.is_notation_error());
        assert_eq!(crate::turn::TurnError::from(err).kind(), "synthesis_error");
        assert_eq!(std::fs::read_dir(&out).unwrap().count(), 0);
    }

    #[tokio::test]
    #[ignore = "needs a SoundFont path in PHLENG_TEST_SOUNDFONT"]
    async fn renders_wav_with_real_soundfont() {
        let soundfont = std::env::var_os("PHLENG_TEST_SOUNDFONT")
            .expect("PHLENG_TEST_SOUNDFONT must point at a .sf2 file");
        let dir = tempfile::tempdir().unwrap();
        let renderer = AudioRenderer::new(dir.path(), soundfont);

        let first = renderer.render(TUNE, "Dawn").await.unwrap();
        let second = renderer.render(TUNE, "Dawn").await.unwrap();
        assert_ne!(first.wav, second.wav);
        assert!(std::fs::metadata(&first.midi).unwrap().len() > 0);
        assert!(std::fs::metadata(&first.wav).unwrap().len() > 44);
        assert_eq!(
            std::fs::read(&first.midi).unwrap(),
            std::fs::read(&second.midi).unwrap()
        );
    }
}
