use super::prompt::{outline_prompt, script_prompt};
use super::{
    parse_reply, Outline, Script, Section, Segment, StoryMode, DEFAULT_EXPRESSION, EXPRESSIONS,
};
use crate::api::ChatModel;
use crate::config::CharacterConfig;
use crate::error::{Result, VideoError};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 模型原样返回的段落，还没补默认值
#[derive(Debug, Deserialize)]
struct RawSection {
    #[serde(default)]
    title: String,
    #[serde(default)]
    background: String,
    #[serde(default)]
    segments: Vec<RawSegment>,
}

#[derive(Debug, Deserialize)]
struct RawSegment {
    #[serde(default)]
    speaker: String,
    #[serde(default)]
    text: String,
    expression: Option<String>,
    voice_text: Option<String>,
}

/// 根据题目生成大纲和整理好的对白脚本
pub struct StoryWriter {
    model: Arc<dyn ChatModel>,
    characters: Vec<CharacterConfig>,
}

impl StoryWriter {
    pub fn new(model: Arc<dyn ChatModel>, characters: Vec<CharacterConfig>) -> Self {
        Self { model, characters }
    }

    pub async fn generate_outline(&self, topic: &str, mode: StoryMode) -> Result<Outline> {
        info!("Generating {} outline for \"{}\"", mode, topic);
        let reply = self.model.complete(&outline_prompt(topic, mode)).await?;
        let mut outline: Outline = parse_reply(&reply)?;

        outline.title = outline.title.trim().to_string();
        if outline.title.is_empty() {
            return Err(VideoError::Story("Outline has an empty title".to_string()));
        }

        info!("Outline title: {}", outline.title);
        Ok(outline)
    }

    pub async fn generate_script(
        &self,
        topic: &str,
        mode: StoryMode,
        outline: Outline,
    ) -> Result<Script> {
        info!("Generating script for \"{}\"", outline.title);
        let prompt = script_prompt(topic, mode, &outline, &self.characters);
        let reply = self.model.complete(&prompt).await?;
        let raw: Vec<RawSection> = parse_reply(&reply)?;

        let sections = self.normalize(raw);
        if sections.is_empty() {
            return Err(VideoError::Story(
                "Script contains no usable sections".to_string(),
            ));
        }

        let script = Script {
            topic: topic.to_string(),
            mode,
            outline,
            sections,
        };
        info!(
            "Script has {} sections and {} lines",
            script.sections.len(),
            script.segment_count()
        );
        Ok(script)
    }

    fn normalize(&self, raw: Vec<RawSection>) -> Vec<Section> {
        raw.into_iter()
            .filter_map(|section| {
                let segments: Vec<Segment> = section
                    .segments
                    .into_iter()
                    .filter_map(|seg| self.normalize_segment(seg))
                    .collect();
                if segments.is_empty() {
                    debug!("Dropping section \"{}\" with no lines", section.title);
                    return None;
                }
                Some((section.title, section.background, segments))
            })
            .enumerate()
            .map(|(index, (title, background, segments))| Section {
                index,
                title: title.trim().to_string(),
                background: background.trim().to_string(),
                segments,
            })
            .collect()
    }

    fn normalize_segment(&self, raw: RawSegment) -> Option<Segment> {
        let text = raw.text.trim().to_string();
        if text.is_empty() {
            return None;
        }

        let speaker = raw.speaker.trim().to_lowercase();
        let speaker = if self.characters.iter().any(|c| c.name == speaker) {
            speaker
        } else {
            // 配置校验保证至少有一个角色
            let fallback = self.characters[0].name.clone();
            warn!(
                "Unknown speaker \"{}\", giving the line to {}",
                raw.speaker, fallback
            );
            fallback
        };

        let expression = raw
            .expression
            .map(|e| e.trim().to_lowercase())
            .filter(|e| EXPRESSIONS.contains(&e.as_str()))
            .unwrap_or_else(|| DEFAULT_EXPRESSION.to_string());

        let voice_text = raw
            .voice_text
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| text.clone());

        Some(Segment {
            speaker,
            text,
            expression,
            voice_text,
        })
    }
}
