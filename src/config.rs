use crate::audio::MouthSync;
use crate::error::{Result, VideoError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const API_KEY_ENV: &str = "DASHSCOPE_API_KEY";

/// 顶层配置，来自可选的 TOML 文件。
///
/// 每一节都有默认值，空文件（或不给文件）也是合法配置；
/// API key 一般从环境变量读取。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub video: VideoConfig,
    pub mouth: MouthSync,
    pub characters: Vec<CharacterConfig>,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub base_url: String,
    pub text_model: String,
    pub image_model: String,
    pub image_style: String,
    pub image_size: String,
    pub tts_model: String,
    pub timeout_secs: u64,
    pub poll_interval_secs: u64,
    pub max_polls: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// 每句台词后的停顿（秒）
    pub line_gap: f64,
    /// 每个段落结尾额外停留的时间（秒）
    pub section_padding: f64,
    pub font_file: Option<PathBuf>,
    pub font_size: u32,
    pub sprite_dir: PathBuf,
    pub sprite_height: u32,
    pub default_background: Option<PathBuf>,
    pub keep_intermediate: bool,
    pub ffmpeg_bin: String,
}

/// 出场角色：模型可以安排谁说话，以及怎么画
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharacterConfig {
    /// 脚本里的角色名，同时是立绘子目录名
    pub name: String,
    pub display_name: String,
    pub voice: String,
    #[serde(default)]
    pub persona: String,
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub workers: usize,
    pub queue_capacity: usize,
    pub work_root: PathBuf,
    pub output_root: PathBuf,
    /// 内存里最多保留的已结束任务数
    pub retain_finished: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            video: VideoConfig::default(),
            mouth: MouthSync::default(),
            characters: default_characters(),
            server: ServerConfig::default(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://dashscope.aliyuncs.com/api/v1".to_string(),
            text_model: "qwen-plus".to_string(),
            image_model: "wanx-v1".to_string(),
            image_style: "<anime>".to_string(),
            image_size: "1280*720".to_string(),
            tts_model: "cosyvoice-v1".to_string(),
            timeout_secs: 300,
            poll_interval_secs: 5,
            max_polls: 60,
        }
    }
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 30,
            line_gap: 0.3,
            section_padding: 0.5,
            font_file: None,
            font_size: 40,
            sprite_dir: PathBuf::from("assets/characters"),
            sprite_height: 480,
            default_background: None,
            keep_intermediate: false,
            ffmpeg_bin: "ffmpeg".to_string(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            workers: 1,
            queue_capacity: 16,
            work_root: PathBuf::from("./jobs"),
            output_root: PathBuf::from("./videos"),
            retain_finished: 200,
        }
    }
}

fn default_characters() -> Vec<CharacterConfig> {
    vec![
        CharacterConfig {
            name: "maru".to_string(),
            display_name: "Maru".to_string(),
            voice: "longxiaochun".to_string(),
            persona: "A curious host who loves food and asks lots of questions.".to_string(),
            x: 40,
            y: 240,
        },
        CharacterConfig {
            name: "pico".to_string(),
            display_name: "Pico".to_string(),
            voice: "longwan".to_string(),
            persona: "A calm expert who explains history and trivia with a dry sense of humour."
                .to_string(),
            x: 880,
            y: 240,
        },
    ]
}

impl AppConfig {
    /// 读取 TOML 配置（`path` 为 `None` 时用默认值），再套用环境变量并校验
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                info!("Loading config from {}", path.display());
                let content = std::fs::read_to_string(path).map_err(|e| {
                    VideoError::Config(format!("Failed to read {}: {}", path.display(), e))
                })?;
                Self::from_toml(&content)?
            }
            None => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    fn apply_env(&mut self) {
        if self.api.api_key.is_none() {
            if let Ok(key) = std::env::var(API_KEY_ENV) {
                debug!("Using API key from {}", API_KEY_ENV);
                self.api.api_key = Some(key);
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.characters.is_empty() {
            return Err(VideoError::Config(
                "At least one character must be configured".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for character in &self.characters {
            if character.name.trim().is_empty() {
                return Err(VideoError::Config("Character name cannot be empty".to_string()));
            }
            if !seen.insert(character.name.as_str()) {
                return Err(VideoError::Config(format!(
                    "Duplicate character name: {}",
                    character.name
                )));
            }
        }
        if self.video.fps == 0 || self.video.width == 0 || self.video.height == 0 {
            return Err(VideoError::Config(
                "Video width, height and fps must be positive".to_string(),
            ));
        }
        if self.video.line_gap < 0.0 || self.video.section_padding < 0.0 {
            return Err(VideoError::Config(
                "line_gap and section_padding cannot be negative".to_string(),
            ));
        }
        if !(self.mouth.closed_below <= self.mouth.open_above) {
            return Err(VideoError::Config(format!(
                "mouth.closed_below ({}) must not exceed mouth.open_above ({})",
                self.mouth.closed_below, self.mouth.open_above
            )));
        }
        if self.server.workers == 0
            || self.server.queue_capacity == 0
            || self.server.retain_finished == 0
        {
            return Err(VideoError::Config(
                "server.workers, server.queue_capacity and server.retain_finished must be positive"
                    .to_string(),
            ));
        }
        Ok(())
    }

    pub fn api_key(&self) -> Result<&str> {
        self.api.api_key.as_deref().ok_or_else(|| {
            VideoError::Config(format!(
                "{} not found. Please set it via --api-key or the {} environment variable",
                API_KEY_ENV, API_KEY_ENV
            ))
        })
    }
}
