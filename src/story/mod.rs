//! 大模型生成的故事大纲和对白脚本。

mod extract;
mod prompt;
mod writer;

pub use extract::parse_reply;
pub use writer::StoryWriter;

use serde::{Deserialize, Serialize};
use std::fmt;

/// 台词可用的表情，立绘按这些名字查找
pub const EXPRESSIONS: &[&str] = &["normal", "happy", "surprised", "sad", "angry", "thinking"];

pub const DEFAULT_EXPRESSION: &str = "normal";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum StoryMode {
    /// The topic is a food item; the story covers its origin and trivia.
    #[default]
    Food,
    /// The topic is a free theme for a comedy skit.
    Comedy,
}

impl fmt::Display for StoryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoryMode::Food => write!(f, "food"),
            StoryMode::Comedy => write!(f, "comedy"),
        }
    }
}

/// 四段式故事大纲
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outline {
    pub title: String,
    pub setup: String,
    pub development: String,
    pub twist: String,
    pub conclusion: String,
}

/// 一个段落：一张背景图和上面的对白
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub index: usize,
    pub title: String,
    /// 背景图的英文提示词
    pub background: String,
    pub segments: Vec<Segment>,
}

/// 一句台词
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub speaker: String,
    /// 字幕文本
    pub text: String,
    pub expression: String,
    /// 送去语音合成的文本
    pub voice_text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Script {
    pub topic: String,
    pub mode: StoryMode,
    pub outline: Outline,
    pub sections: Vec<Section>,
}

impl Script {
    pub fn segment_count(&self) -> usize {
        self.sections.iter().map(|s| s.segments.len()).sum()
    }
}
