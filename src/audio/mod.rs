//! 逐句语音合成，以及对口型用的音频分析。

mod mouth;

pub use mouth::{runs, MouthShape, MouthSync};

use crate::api::SpeechSynthesizer;
use crate::config::CharacterConfig;
use crate::error::{Result, VideoError};
use crate::story::Script;
use crate::workdir;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// 磁盘上一句合成好的台词
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentAudio {
    pub section: usize,
    pub line: usize,
    pub path: PathBuf,
    /// 秒
    pub duration: f64,
}

pub fn segment_audio_path(dir: &Path, section: usize, line: usize) -> PathBuf {
    dir.join(format!("section_{:02}_line_{:03}.wav", section, line))
}

/// 逐句合成语音，按段落分组。
///
/// 已有的 WAV 能完整读出来才复用，否则删掉重新合成；新文件先写到 `.part`，
/// 校验通过后再改名。
pub async fn synthesize_segments(
    script: &Script,
    characters: &[CharacterConfig],
    synth: &dyn SpeechSynthesizer,
    dir: &Path,
) -> Result<Vec<Vec<SegmentAudio>>> {
    tokio::fs::create_dir_all(dir).await?;
    let total = script.segment_count();
    let mut done = 0;
    let mut sections = Vec::with_capacity(script.sections.len());

    for section in &script.sections {
        let mut lines = Vec::with_capacity(section.segments.len());
        for (line, segment) in section.segments.iter().enumerate() {
            done += 1;
            let path = segment_audio_path(dir, section.index, line);

            let duration = match reusable_duration(&path).await? {
                Some(duration) => {
                    debug!("Reusing {}", path.display());
                    duration
                }
                None => {
                    let character = characters
                        .iter()
                        .find(|c| c.name == segment.speaker)
                        .ok_or_else(|| {
                            VideoError::Audio(format!("No voice for speaker {}", segment.speaker))
                        })?;
                    let part = workdir::part_path(&path);
                    synth
                        .synthesize(&segment.voice_text, &character.voice, &part)
                        .await?;
                    let duration = checked_duration(&part)?;
                    if duration <= 0.0 {
                        return Err(VideoError::Audio(format!(
                            "Synthesized audio {} is empty",
                            path.display()
                        )));
                    }
                    workdir::commit(&part, &path).await?;
                    info!("Synthesized line {}/{} ({})", done, total, segment.speaker);
                    duration
                }
            };

            lines.push(SegmentAudio {
                section: section.index,
                line,
                path,
                duration,
            });
        }
        sections.push(lines);
    }

    Ok(sections)
}

/// 上次留下的文件可用时返回它的时长；坏文件会被删除
async fn reusable_duration(path: &Path) -> Result<Option<f64>> {
    if !workdir::is_complete(path).await {
        return Ok(None);
    }
    match checked_duration(path) {
        Ok(duration) if duration > 0.0 => Ok(Some(duration)),
        Ok(_) => {
            warn!("Discarding empty audio {}", path.display());
            tokio::fs::remove_file(path).await?;
            Ok(None)
        }
        Err(e) => {
            warn!("Discarding unreadable audio {}: {}", path.display(), e);
            tokio::fs::remove_file(path).await?;
            Ok(None)
        }
    }
}

/// WAV 时长（秒），只读文件头
pub fn wav_duration(path: &Path) -> Result<f64> {
    let reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    if spec.sample_rate == 0 {
        return Err(VideoError::Audio(format!(
            "{} has a zero sample rate",
            path.display()
        )));
    }
    // duration() 是每个声道的采样数
    Ok(reader.duration() as f64 / spec.sample_rate as f64)
}

/// 把样本完整读一遍再算时长，被截断的文件在这里报错
fn checked_duration(path: &Path) -> Result<f64> {
    let duration = wav_duration(path)?;
    read_samples(path)?;
    Ok(duration)
}

fn read_samples(path: &Path) -> Result<(hound::WavSpec, Vec<f32>)> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<std::result::Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()?
        }
    };
    Ok((spec, samples))
}

/// 每个视频帧的 RMS 强度，按最响的一帧归一化
pub fn frame_intensities(path: &Path, fps: u32) -> Result<Vec<f32>> {
    if fps == 0 {
        return Err(VideoError::Audio("fps must be positive".to_string()));
    }
    let (spec, samples) = read_samples(path)?;

    let channels = spec.channels.max(1) as usize;
    let per_frame = ((spec.sample_rate / fps) as usize).max(1) * channels;

    let rms: Vec<f32> = samples
        .chunks(per_frame)
        .map(|window| {
            let sum: f32 = window.iter().map(|s| s * s).sum();
            (sum / window.len() as f32).sqrt()
        })
        .collect();

    let peak = rms.iter().copied().fold(0.0f32, f32::max);
    if peak <= f32::EPSILON {
        return Ok(vec![0.0; rms.len()]);
    }
    Ok(rms.into_iter().map(|v| v / peak).collect())
}


#[cfg(test)]
mod tests {
    use super::test_support::write_wav;
    use super::*;
    use crate::config::AppConfig;
    use crate::story::{Outline, Section, Segment, StoryMode};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ToneSynth {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SpeechSynthesizer for ToneSynth {
        async fn synthesize(&self, text: &str, _voice: &str, output_path: &Path) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            write_wav(output_path, 16000, text.len() as f64 * 0.05, 0.1);
            Ok(())
        }
    }

    fn script() -> Script {
        let line = |speaker: &str, text: &str| Segment {
            speaker: speaker.to_string(),
            text: text.to_string(),
            expression: "normal".to_string(),
            voice_text: text.to_string(),
        };
        Script {
            topic: "tea".to_string(),
            mode: StoryMode::Food,
            outline: Outline {
                title: "Tea".to_string(),
                setup: String::new(),
                development: String::new(),
                twist: String::new(),
                conclusion: String::new(),
            },
            sections: vec![Section {
                index: 0,
                title: "Leaves".to_string(),
                background: "a tea field".to_string(),
                segments: vec![line("maru", "Hello there"), line("pico", "Hi")],
            }],
        }
    }

    #[test]
    fn duration_from_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.wav");
        write_wav(&path, 8000, 1.0, 0.5);
        let duration = wav_duration(&path).unwrap();
        assert!((duration - 1.5).abs() < 1e-6);
    }

    #[test]
    fn intensities_track_loudness() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.wav");
        write_wav(&path, 16000, 0.5, 0.5);
        let frames = frame_intensities(&path, 10).unwrap();
        assert_eq!(frames.len(), 10);
        assert!((frames[0] - 1.0).abs() < 1e-3);
        assert_eq!(frames[9], 0.0);
    }

    #[test]
    fn silent_clip_is_all_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.wav");
        write_wav(&path, 16000, 0.0, 0.25);
        let frames = frame_intensities(&path, 30).unwrap();
        assert!(!frames.is_empty());
        assert!(frames.iter().all(|f| *f == 0.0));
    }

    #[test]
    fn partial_last_window_is_a_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.wav");
        write_wav(&path, 1000, 0.105, 0.0);
        let frames = frame_intensities(&path, 10).unwrap();
        assert_eq!(frames.len(), 2);
    }

    #[tokio::test]
    async fn synthesizes_once_and_reuses() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::default();
        let synth = ToneSynth {
            calls: AtomicUsize::new(0),
        };

        let audio = synthesize_segments(&script(), &config.characters, &synth, dir.path())
            .await
            .unwrap();
        assert_eq!(audio.len(), 1);
        assert_eq!(audio[0].len(), 2);
        assert_eq!(audio[0][1].line, 1);
        assert!((audio[0][0].duration - (11.0 * 0.05 + 0.1)).abs() < 1e-3);
        assert_eq!(synth.calls.load(Ordering::SeqCst), 2);

        synthesize_segments(&script(), &config.characters, &synth, dir.path())
            .await
            .unwrap();
        assert_eq!(synth.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn broken_leftover_is_synthesized_again() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::default();
        let synth = ToneSynth {
            calls: AtomicUsize::new(0),
        };
        let first = segment_audio_path(dir.path(), 0, 0);
        std::fs::write(&first, b"RIFF\0\0half-written").unwrap();

        let audio = synthesize_segments(&script(), &config.characters, &synth, dir.path())
            .await
            .unwrap();

        assert_eq!(synth.calls.load(Ordering::SeqCst), 2);
        assert!((audio[0][0].duration - (11.0 * 0.05 + 0.1)).abs() < 1e-3);
        assert!(wav_duration(&first).is_ok());
        assert!(!workdir::part_path(&first).exists());
    }

    #[tokio::test]
    async fn cut_off_wav_is_not_reused() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::default();
        let synth = ToneSynth {
            calls: AtomicUsize::new(0),
        };
        let first = segment_audio_path(dir.path(), 0, 0);
        write_wav(&first, 16000, 1.0, 0.0);
        // 文件头声称 1 秒，数据只剩一半
        let bytes = std::fs::read(&first).unwrap();
        std::fs::write(&first, &bytes[..bytes.len() / 2]).unwrap();

        synthesize_segments(&script(), &config.characters, &synth, dir.path())
            .await
            .unwrap();
        assert_eq!(synth.calls.load(Ordering::SeqCst), 2);
    }
}
