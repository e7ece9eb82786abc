//! 合成成片：背景图、角色立绘、字幕和语音。

mod generator;

pub use generator::FfmpegCompositor;

use crate::audio::{MouthShape, SegmentAudio};
use crate::config::CharacterConfig;
use crate::error::{Result, VideoError};
use crate::scene::Timeline;
use crate::story::Script;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// 渲染一句台词所需的全部信息
#[derive(Debug, Clone, PartialEq)]
pub struct ClipPlan {
    pub section: usize,
    pub line: usize,
    pub background: PathBuf,
    pub character: String,
    pub label: String,
    pub expression: String,
    pub subtitle: String,
    pub audio: PathBuf,
    /// 画面时长（秒），音频不足的部分补静音
    pub duration: f64,
    /// 每个输出帧一个嘴型
    pub mouth: Vec<MouthShape>,
    pub x: i32,
    pub y: i32,
}

#[async_trait]
pub trait Compositor: Send + Sync {
    /// 按顺序把 `clips` 渲染成 `output` 一个视频，临时文件放在 `work_dir`
    async fn compose(&self, clips: &[ClipPlan], work_dir: &Path, output: &Path) -> Result<()>;
}

/// [`plan_clips`] 的输入，除 `backgrounds` 外都按 `[段落][台词]` 索引
pub struct PlanInputs<'a> {
    pub script: &'a Script,
    pub audio: &'a [Vec<SegmentAudio>],
    pub mouth: &'a [Vec<Vec<MouthShape>>],
    pub backgrounds: &'a [PathBuf],
    pub timeline: &'a Timeline,
    pub characters: &'a [CharacterConfig],
    pub fps: u32,
}

/// 把每句台词和它的音频、时间、背景、嘴型轨道对应起来。
///
/// 段落尾部的留白算在该段最后一句上；嘴型轨道按片段帧数补闭嘴帧或截断，
/// 最后一帧总是闭嘴。
pub fn plan_clips(inputs: &PlanInputs<'_>) -> Result<Vec<ClipPlan>> {
    let PlanInputs {
        script,
        audio,
        mouth,
        backgrounds,
        timeline,
        characters,
        fps,
    } = inputs;

    let sections = script.sections.len();
    if audio.len() != sections
        || mouth.len() != sections
        || backgrounds.len() != sections
        || timeline.sections.len() != sections
    {
        return Err(VideoError::VideoGeneration(format!(
            "Render inputs disagree on section count ({} sections)",
            sections
        )));
    }

    let mut clips = Vec::with_capacity(script.segment_count());
    for (s, section) in script.sections.iter().enumerate() {
        let timing = &timeline.sections[s];
        let count = section.segments.len();
        if audio[s].len() != count || mouth[s].len() != count || timing.segments.len() != count {
            return Err(VideoError::VideoGeneration(format!(
                "Render inputs disagree on line count in section {}",
                s
            )));
        }

        for (l, segment) in section.segments.iter().enumerate() {
            let character = characters
                .iter()
                .find(|c| c.name == segment.speaker)
                .ok_or_else(|| {
                    VideoError::VideoGeneration(format!("Unknown speaker {}", segment.speaker))
                })?;

            let seg_timing = &timing.segments[l];
            let duration = if l + 1 == count {
                timing.end() - seg_timing.start
            } else {
                seg_timing.duration
            };

            let frame_count = (duration * *fps as f64).round().max(1.0) as usize;
            let mut track = mouth[s][l].clone();
            track.resize(frame_count, MouthShape::Closed);
            // 截断可能切掉了原来的闭嘴帧
            if let Some(last) = track.last_mut() {
                *last = MouthShape::Closed;
            }

            clips.push(ClipPlan {
                section: section.index,
                line: l,
                background: backgrounds[s].clone(),
                character: character.name.clone(),
                label: character.display_name.clone(),
                expression: segment.expression.clone(),
                subtitle: segment.text.clone(),
                audio: audio[s][l].path.clone(),
                duration,
                mouth: track,
                x: character.x,
                y: character.y,
            });
        }
    }
    Ok(clips)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::story::{Outline, Section, Segment, StoryMode};

    fn script() -> Script {
        let line = |speaker: &str| Segment {
            speaker: speaker.to_string(),
            text: format!("{} speaks", speaker),
            expression: "happy".to_string(),
            voice_text: String::new(),
        };
        Script {
            topic: "bread".to_string(),
            mode: StoryMode::Food,
            outline: Outline {
                title: "Bread".to_string(),
                setup: String::new(),
                development: String::new(),
                twist: String::new(),
                conclusion: String::new(),
            },
            sections: vec![Section {
                index: 0,
                title: "Oven".to_string(),
                background: "bakery".to_string(),
                segments: vec![line("maru"), line("pico")],
            }],
        }
    }

    fn audio() -> Vec<Vec<SegmentAudio>> {
        vec![vec![
            SegmentAudio {
                section: 0,
                line: 0,
                path: PathBuf::from("a.wav"),
                duration: 1.0,
            },
            SegmentAudio {
                section: 0,
                line: 1,
                path: PathBuf::from("b.wav"),
                duration: 0.5,
            },
        ]]
    }

    #[test]
    fn plans_clips_with_padding() {
        let config = AppConfig::default();
        let script = script();
        let audio = audio();
        let mouth = vec![vec![
            vec![MouthShape::Open; 10],
            vec![MouthShape::Half; 5],
        ]];
        let backgrounds = vec![PathBuf::from("bg.png")];
        let timeline = Timeline::build(&[vec![1.0, 0.5]], 0.5, 1.0).unwrap();

        let clips = plan_clips(&PlanInputs {
            script: &script,
            audio: &audio,
            mouth: &mouth,
            backgrounds: &backgrounds,
            timeline: &timeline,
            characters: &config.characters,
            fps: 10,
        })
        .unwrap();

        assert_eq!(clips.len(), 2);
        assert!((clips[0].duration - 1.5).abs() < 1e-9);
        assert_eq!(clips[0].mouth.len(), 15);
        assert_eq!(clips[0].mouth[14], MouthShape::Closed);
        assert_eq!(clips[0].label, "Maru");

        // 段落留白算在最后一句上
        assert!((clips[1].duration - 2.0).abs() < 1e-9);
        assert_eq!(clips[1].mouth.len(), 20);
        assert_eq!(clips[1].x, config.characters[1].x);
    }

    #[test]
    fn cut_track_still_ends_closed() {
        let config = AppConfig::default();
        let mut script = script();
        script.sections[0].segments.truncate(1);
        let audio = vec![vec![SegmentAudio {
            section: 0,
            line: 0,
            path: PathBuf::from("a.wav"),
            duration: 1.0,
        }]];
        // 16 kHz / 30 fps 按整数窗口算会多出一帧
        let mouth = vec![vec![vec![MouthShape::Open; 31]]];
        let backgrounds = vec![PathBuf::from("bg.png")];
        let timeline = Timeline::build(&[vec![1.0]], 0.0, 0.0).unwrap();

        let clips = plan_clips(&PlanInputs {
            script: &script,
            audio: &audio,
            mouth: &mouth,
            backgrounds: &backgrounds,
            timeline: &timeline,
            characters: &config.characters,
            fps: 30,
        })
        .unwrap();

        let track = &clips[0].mouth;
        assert_eq!(track.len(), 30);
        assert_eq!(track[28], MouthShape::Open);
        assert_eq!(track.last(), Some(&MouthShape::Closed));
    }

    #[test]
    fn mismatched_inputs_are_rejected() {
        let config = AppConfig::default();
        let script = script();
        let audio = audio();
        let mouth = vec![vec![vec![MouthShape::Open; 10]]];
        let backgrounds = vec![PathBuf::from("bg.png")];
        let timeline = Timeline::build(&[vec![1.0, 0.5]], 0.5, 1.0).unwrap();

        let result = plan_clips(&PlanInputs {
            script: &script,
            audio: &audio,
            mouth: &mouth,
            backgrounds: &backgrounds,
            timeline: &timeline,
            characters: &config.characters,
            fps: 10,
        });
        assert!(result.is_err());
    }
}
