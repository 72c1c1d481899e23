//! MIDI to PCM.
//!
//! A deliberately plain synthesizer: every note is a sine with a short
//! attack/release envelope, summed into a stereo buffer. It exists so
//! generated material is audible end to end; swapping in a sample-based
//! synth only has to keep [`MidiRenderer::render`]'s signature.

use std::collections::HashMap;
use std::f64::consts::TAU;
use std::path::Path;
use std::sync::Arc;

use midly::{MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;
const CHANNELS: u16 = 2;

const MIN_DURATION_SECS: f64 = 1.0;
const FALLBACK_DURATION_SECS: f64 = 10.0;
/// Longest clip a file may claim before it is rejected unrendered
pub const MAX_CLIP_SECONDS: f64 = 600.0;
const ATTACK_SECS: f64 = 0.01;
const RELEASE_SECS: f64 = 0.05;
const NOTE_GAIN: f64 = 0.5;
const PEAK_LIMIT: f32 = 0.8;

/// 120 BPM until the file says otherwise
const DEFAULT_TEMPO_US: f64 = 500_000.0;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("MIDI data too short ({0} bytes)")]
    TooShort(usize),

    #[error("missing MThd header")]
    BadHeader,

    #[error("failed to parse MIDI: {0}")]
    Parse(String),

    #[error("MIDI claims {0:.0}s, longer than the {MAX_CLIP_SECONDS:.0}s limit")]
    TooLong(f64),

    #[error("render worker failed: {0}")]
    Worker(String),

    #[error("wav error: {0}")]
    Wav(#[from] hound::Error),
}

/// Rendered audio, interleaved stereo f32.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmClip {
    pub name: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<f32>,
}

impl PcmClip {
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    pub fn peak(&self) -> f32 {
        self.samples.iter().fold(0.0f32, |peak, s| peak.max(s.abs()))
    }

    /// Write as 32-bit float WAV.
    pub fn write_wav(&self, path: impl AsRef<Path>) -> Result<(), RenderError> {
        let spec = hound::WavSpec {
            channels: self.channels,
            sample_rate: self.sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };

        let mut writer = hound::WavWriter::create(path, spec)?;
        for &sample in &self.samples {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
        Ok(())
    }
}

/// One sounding note, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
struct NoteSpan {
    key: u8,
    velocity: u8,
    start_secs: f64,
    end_secs: f64,
}

#[derive(Debug)]
struct ParsedSong {
    notes: Vec<NoteSpan>,
    duration_secs: f64,
}

/// Tick to wall-clock conversion for one file.
struct TempoMap {
    ticks_per_beat: f64,
    /// (tick, microseconds per beat), sorted by tick
    changes: Vec<(u64, f64)>,
    /// Fixed seconds per tick for SMPTE timing
    timecode_secs_per_tick: Option<f64>,
}

impl TempoMap {
    fn seconds_at(&self, tick: u64) -> f64 {
        if let Some(spt) = self.timecode_secs_per_tick {
            return tick as f64 * spt;
        }

        let mut secs = 0.0;
        let mut last_tick = 0u64;
        let mut us_per_beat = DEFAULT_TEMPO_US;
        for &(at, us) in &self.changes {
            if at >= tick {
                break;
            }
            secs += (at - last_tick) as f64 * us_per_beat / 1_000_000.0 / self.ticks_per_beat;
            last_tick = at;
            us_per_beat = us;
        }
        secs + (tick - last_tick) as f64 * us_per_beat / 1_000_000.0 / self.ticks_per_beat
    }
}

fn parse_song(bytes: &[u8]) -> Result<ParsedSong, RenderError> {
    let smf = Smf::parse(bytes).map_err(|e| RenderError::Parse(e.to_string()))?;

    let (ticks_per_beat, timecode_secs_per_tick) = match smf.header.timing {
        Timing::Metrical(ppq) => {
            let ppq = ppq.as_int();
            if ppq == 0 {
                return Err(RenderError::Parse("zero ticks per quarter note".to_string()));
            }
            (ppq as f64, None)
        }
        Timing::Timecode(fps, subframes) => {
            let ticks_per_sec = fps.as_f32() as f64 * subframes.max(1) as f64;
            (1.0, Some(1.0 / ticks_per_sec))
        }
    };

    // Tempo changes can live on any track; collect them before timing notes
    let mut changes = Vec::new();
    let mut end_tick = 0u64;
    for track in &smf.tracks {
        let mut tick = 0u64;
        for event in track {
            tick += event.delta.as_int() as u64;
            if let TrackEventKind::Meta(MetaMessage::Tempo(us)) = event.kind {
                changes.push((tick, us.as_int() as f64));
            }
        }
        end_tick = end_tick.max(tick);
    }
    changes.sort_by_key(|(tick, _)| *tick);

    let tempo = TempoMap {
        ticks_per_beat,
        changes,
        timecode_secs_per_tick,
    };

    let mut notes = Vec::new();
    for track in &smf.tracks {
        let mut tick = 0u64;
        let mut open: HashMap<(u8, u8), Vec<(u64, u8)>> = HashMap::new();

        for event in track {
            tick += event.delta.as_int() as u64;
            let TrackEventKind::Midi { channel, message } = event.kind else {
                continue;
            };
            let channel = channel.as_int();

            match message {
                MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                    open.entry((channel, key.as_int()))
                        .or_default()
                        .push((tick, vel.as_int()));
                }
                MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => {
                    if let Some(stack) = open.get_mut(&(channel, key.as_int())) {
                        if !stack.is_empty() {
                            let (start, velocity) = stack.remove(0);
                            notes.push(NoteSpan {
                                key: key.as_int(),
                                velocity,
                                start_secs: tempo.seconds_at(start),
                                end_secs: tempo.seconds_at(tick),
                            });
                        }
                    }
                }
                _ => {}
            }
        }

        // Held to the end of the file
        for ((_, key), stack) in open {
            for (start, velocity) in stack {
                notes.push(NoteSpan {
                    key,
                    velocity,
                    start_secs: tempo.seconds_at(start),
                    end_secs: tempo.seconds_at(end_tick),
                });
            }
        }
    }

    Ok(ParsedSong {
        notes,
        duration_secs: tempo.seconds_at(end_tick),
    })
}

/// Cheap structural check before handing bytes to the renderer.
pub fn validate_midi(bytes: &[u8]) -> bool {
    bytes.len() >= 14 && bytes.starts_with(b"MThd") && Smf::parse(bytes).is_ok()
}

#[derive(Debug, Clone, Copy)]
pub struct MidiRenderer {
    sample_rate: u32,
}

impl Default for MidiRenderer {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_RATE)
    }
}

impl MidiRenderer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn render(&self, bytes: &[u8], name: &str) -> Result<PcmClip, RenderError> {
        if bytes.len() < 14 {
            return Err(RenderError::TooShort(bytes.len()));
        }
        if !bytes.starts_with(b"MThd") {
            return Err(RenderError::BadHeader);
        }

        let song = parse_song(bytes)?;
        let duration = if song.duration_secs < MIN_DURATION_SECS {
            FALLBACK_DURATION_SECS
        } else {
            song.duration_secs
        };

        if !duration.is_finite() || duration > MAX_CLIP_SECONDS {
            return Err(RenderError::TooLong(duration));
        }

        let frames = (duration * self.sample_rate as f64).ceil() as usize;
        let len = frames
            .checked_mul(CHANNELS as usize)
            .ok_or(RenderError::TooLong(duration))?;
        let mut samples = vec![0.0f32; len];
        for note in &song.notes {
            self.synthesize(note, &mut samples, frames);
        }

        let peak = samples.iter().fold(0.0f32, |p, s| p.max(s.abs()));
        if peak > PEAK_LIMIT {
            let scale = PEAK_LIMIT / peak;
            samples.iter_mut().for_each(|s| *s *= scale);
        }

        debug!(
            clip = name,
            notes = song.notes.len(),
            secs = duration,
            peak,
            "rendered MIDI"
        );

        Ok(PcmClip {
            name: name.to_string(),
            sample_rate: self.sample_rate,
            channels: CHANNELS,
            samples,
        })
    }

    /// [`render`](Self::render) on the blocking pool.
    pub async fn render_async(&self, bytes: Vec<u8>, name: String) -> Result<Arc<PcmClip>, RenderError> {
        let renderer = *self;
        tokio::task::spawn_blocking(move || renderer.render(&bytes, &name).map(Arc::new))
            .await
            .map_err(|e| RenderError::Worker(e.to_string()))?
    }

    fn synthesize(&self, note: &NoteSpan, samples: &mut [f32], frames: usize) {
        let sr = self.sample_rate as f64;
        let start = (note.start_secs * sr).round() as usize;
        if start >= frames {
            return;
        }
        let len = (((note.end_secs - note.start_secs) * sr).round().max(0.0) as usize).min(frames - start);
        if len == 0 {
            return;
        }

        let freq = 440.0 * 2f64.powf((note.key as f64 - 69.0) / 12.0);
        let amplitude = note.velocity as f64 / 127.0 * NOTE_GAIN;
        let attack = (ATTACK_SECS * sr).max(1.0);
        let release = (RELEASE_SECS * sr).max(1.0);

        for i in 0..len {
            let t = i as f64 / sr;
            let envelope = (i as f64 / attack).min(1.0) * ((len - i) as f64 / release).min(1.0);
            let sample = (amplitude * envelope * (TAU * freq * t).sin()) as f32;
            let idx = (start + i) * CHANNELS as usize;
            samples[idx] += sample;
            samples[idx + 1] += sample;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use midly::num::{u15, u24, u28, u4, u7};
    use midly::{Format, Fps, Header, TrackEvent};

    const SR: u32 = 8_000;

    fn event(delta: u32, kind: TrackEventKind<'static>) -> TrackEvent<'static> {
        TrackEvent {
            delta: u28::new(delta),
            kind,
        }
    }

    fn on(delta: u32, key: u8, vel: u8) -> TrackEvent<'static> {
        event(
            delta,
            TrackEventKind::Midi {
                channel: u4::new(0),
                message: MidiMessage::NoteOn {
                    key: u7::new(key),
                    vel: u7::new(vel),
                },
            },
        )
    }

    fn off(delta: u32, key: u8) -> TrackEvent<'static> {
        event(
            delta,
            TrackEventKind::Midi {
                channel: u4::new(0),
                message: MidiMessage::NoteOff {
                    key: u7::new(key),
                    vel: u7::new(0),
                },
            },
        )
    }

    fn tempo(delta: u32, us_per_beat: u32) -> TrackEvent<'static> {
        event(delta, TrackEventKind::Meta(MetaMessage::Tempo(u24::new(us_per_beat))))
    }

    fn end(delta: u32) -> TrackEvent<'static> {
        event(delta, TrackEventKind::Meta(MetaMessage::EndOfTrack))
    }

    fn encode(timing: Timing, track: Vec<TrackEvent<'static>>) -> Vec<u8> {
        let mut smf = Smf::new(Header::new(Format::SingleTrack, timing));
        smf.tracks.push(track);
        let mut bytes = Vec::new();
        smf.write_std(&mut bytes).unwrap();
        bytes
    }

    fn metrical(track: Vec<TrackEvent<'static>>) -> Vec<u8> {
        encode(Timing::Metrical(u15::new(480)), track)
    }

    fn window_peak(clip: &PcmClip, from_secs: f64, to_secs: f64) -> f32 {
        let from = (from_secs * clip.sample_rate as f64) as usize * 2;
        let to = ((to_secs * clip.sample_rate as f64) as usize * 2).min(clip.samples.len());
        clip.samples[from..to].iter().fold(0.0f32, |p, s| p.max(s.abs()))
    }

    #[test]
    fn test_duration_follows_tempo_map() {
        // Two beats at 120 BPM, then two beats at 60 BPM: 1s + 2s
        let bytes = metrical(vec![
            tempo(0, 500_000),
            on(0, 60, 100),
            tempo(960, 1_000_000),
            off(960, 60),
            end(0),
        ]);
        let clip = MidiRenderer::new(SR).render(&bytes, "tempo").unwrap();
        assert_eq!(clip.frames(), 3 * SR as usize);
        assert_eq!(clip.channels, 2);
    }

    #[test]
    fn test_short_files_get_floor_duration() {
        let bytes = metrical(vec![on(0, 69, 127), off(480, 69), end(0)]);
        let clip = MidiRenderer::new(SR).render(&bytes, "short").unwrap();
        assert_eq!(clip.frames(), 10 * SR as usize);
        assert!((clip.duration_secs() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_single_note_amplitude() {
        let bytes = metrical(vec![on(0, 69, 127), off(1920, 69), end(0)]);
        let clip = MidiRenderer::new(SR).render(&bytes, "a4").unwrap();
        let peak = clip.peak();
        assert!(peak > 0.45 && peak <= 0.5 + 1e-4, "peak {}", peak);

        // Left and right are identical
        for frame in clip.samples.chunks(2).take(4000) {
            assert_eq!(frame[0], frame[1]);
        }
    }

    #[test]
    fn test_loud_chords_are_normalized() {
        let bytes = metrical(vec![
            on(0, 60, 127),
            on(0, 64, 127),
            on(0, 67, 127),
            on(0, 72, 127),
            off(1920, 60),
            off(0, 64),
            off(0, 67),
            off(0, 72),
            end(0),
        ]);
        let clip = MidiRenderer::new(SR).render(&bytes, "chord").unwrap();
        let peak = clip.peak();
        assert!(peak <= PEAK_LIMIT + 1e-4, "peak {}", peak);
        assert!(peak > PEAK_LIMIT - 1e-3, "peak {}", peak);
    }

    #[test]
    fn test_zero_velocity_note_on_ends_note() {
        // Sounds for half a second, file lasts two
        let bytes = metrical(vec![on(0, 69, 100), on(480, 69, 0), end(1440)]);
        let clip = MidiRenderer::new(SR).render(&bytes, "vel0").unwrap();
        assert_eq!(clip.frames(), 2 * SR as usize);
        assert!(window_peak(&clip, 0.1, 0.4) > 0.1);
        assert_eq!(window_peak(&clip, 0.6, 2.0), 0.0);
    }

    #[test]
    fn test_unterminated_note_runs_to_end() {
        let bytes = metrical(vec![on(0, 69, 100), end(2400)]);
        let clip = MidiRenderer::new(SR).render(&bytes, "held").unwrap();
        assert_eq!(clip.frames(), (1.25 * SR as f64) as usize);
        assert!(window_peak(&clip, 1.0, 1.15) > 0.1);
    }

    #[test]
    fn test_timecode_timing() {
        // 25 fps * 40 subframes = 1000 ticks per second
        let bytes = encode(
            Timing::Timecode(Fps::Fps25, 40),
            vec![on(0, 69, 100), off(2000, 69), end(0)],
        );
        let clip = MidiRenderer::new(SR).render(&bytes, "smpte").unwrap();
        assert_eq!(clip.frames(), 2 * SR as usize);
    }

    #[test]
    fn test_rejects_garbage() {
        let r = MidiRenderer::new(SR);
        assert!(matches!(r.render(b"MThd", "x"), Err(RenderError::TooShort(4))));
        assert!(matches!(r.render(&[0u8; 32], "x"), Err(RenderError::BadHeader)));

        let mut truncated = metrical(vec![on(0, 60, 100), off(480, 60), end(0)]);
        truncated[8] = 0xFF;
        truncated[9] = 0xFF;
        assert!(r.render(&truncated, "x").is_err());
    }

    #[test]
    fn test_rejects_huge_claimed_duration() {
        // A few dozen bytes claiming over a century of audio
        let bytes = encode(
            Timing::Metrical(u15::new(1)),
            vec![tempo(0, 0xFF_FFFF), end(0x0FFF_FFFF)],
        );
        assert!(bytes.len() < 64);

        let r = MidiRenderer::new(1);
        assert!(matches!(r.render(&bytes, "x"), Err(RenderError::TooLong(secs)) if secs > MAX_CLIP_SECONDS));
    }

    #[tokio::test]
    async fn test_render_async_reports_too_long() {
        let bytes = encode(
            Timing::Metrical(u15::new(1)),
            vec![tempo(0, 0xFF_FFFF), end(0x0FFF_FFFF)],
        );
        let result = MidiRenderer::new(SR).render_async(bytes, "x".to_string()).await;
        assert!(matches!(result, Err(RenderError::TooLong(_))));
    }

    #[test]
    fn test_validate_midi() {
        let good = metrical(vec![on(0, 60, 100), off(480, 60), end(0)]);
        assert!(validate_midi(&good));
        assert!(!validate_midi(&good[..10]));
        assert!(!validate_midi(b"RIFF\0\0\0\0WAVEfmt \0\0"));
    }

    #[test]
    fn test_write_wav() {
        let bytes = metrical(vec![on(0, 69, 100), off(1920, 69), end(0)]);
        let clip = MidiRenderer::new(SR).render(&bytes, "wav").unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.wav");
        clip.write_wav(&path).unwrap();

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.spec().sample_rate, SR);
        assert_eq!(reader.len() as usize, clip.samples.len());
    }

    #[tokio::test]
    async fn test_render_async() {
        let bytes = metrical(vec![on(0, 69, 100), off(1920, 69), end(0)]);
        let clip = MidiRenderer::new(SR).render_async(bytes, "bg".to_string()).await.unwrap();
        assert_eq!(clip.name, "bg");
        assert_eq!(clip.frames(), SR as usize);
    }
}
