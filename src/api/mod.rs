//! 云端模型客户端。
//!
//! 流水线只依赖下面三个 trait，测试里换成本地假实现；
//! [`QwenClient`] 用 DashScope 同时实现了这三个。

mod qwen;

pub use qwen::QwenClient;

use crate::error::Result;
use async_trait::async_trait;
use std::path::Path;

/// 文本生成，用于大纲和脚本
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// 文生图，用于段落背景
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate_image(&self, prompt: &str, output_path: &Path) -> Result<()>;
}

/// 语音合成，实现必须把 WAV 写到 `output_path`
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, voice: &str, output_path: &Path) -> Result<()>;
}
