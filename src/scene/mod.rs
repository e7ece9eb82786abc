use crate::error::{Result, VideoError};
use serde::{Deserialize, Serialize};

/// 一句台词在视频时间轴上的位置（秒）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentTiming {
    /// 从视频开头算起的开始时间
    pub start: f64,
    /// 在画面上占用的时长，含句后停顿
    pub duration: f64,
    pub audio_duration: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionTiming {
    pub index: usize,
    pub start: f64,
    pub duration: f64,
    pub segments: Vec<SegmentTiming>,
}

impl SectionTiming {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Timeline {
    pub sections: Vec<SectionTiming>,
}

impl Timeline {
    /// 把段落首尾相接排好。
    ///
    /// `audio_durations[s][l]` 是第 `s` 段第 `l` 句的音频长度；
    /// 每句后面停 `line_gap`，每段结尾再停 `section_padding`。
    pub fn build(audio_durations: &[Vec<f64>], line_gap: f64, section_padding: f64) -> Result<Self> {
        for (name, value) in [("line_gap", line_gap), ("section_padding", section_padding)] {
            if !value.is_finite() || value < 0.0 {
                return Err(VideoError::Scene(format!("Invalid {}: {}", name, value)));
            }
        }

        let mut sections = Vec::with_capacity(audio_durations.len());
        let mut cursor = 0.0;

        for (index, lines) in audio_durations.iter().enumerate() {
            let section_start = cursor;
            let mut segments = Vec::with_capacity(lines.len());
            for &audio_duration in lines {
                if !audio_duration.is_finite() || audio_duration < 0.0 {
                    return Err(VideoError::Scene(format!(
                        "Invalid audio duration {} in section {}",
                        audio_duration, index
                    )));
                }
                let duration = audio_duration + line_gap;
                segments.push(SegmentTiming {
                    start: cursor,
                    duration,
                    audio_duration,
                });
                cursor += duration;
            }
            cursor += section_padding;
            sections.push(SectionTiming {
                index,
                start: section_start,
                duration: cursor - section_start,
                segments,
            });
        }

        Ok(Self { sections })
    }

    pub fn total(&self) -> f64 {
        self.sections.last().map(SectionTiming::end).unwrap_or(0.0)
    }
}
