//! 从题目到成片的流水线。
//!
//! 每一步的产物都写在请求的工作目录里，再次运行时直接复用（断点续传）。
//! 工作目录换了题目时，旧题目的产物会先被清掉。

use crate::api::{ChatModel, ImageGenerator, QwenClient, SpeechSynthesizer};
use crate::audio::{self, MouthShape, SegmentAudio};
use crate::config::AppConfig;
use crate::error::{Result, VideoError};
use crate::scene::Timeline;
use crate::story::{Outline, Script, StoryMode, StoryWriter};
use crate::video::{plan_clips, Compositor, FfmpegCompositor, PlanInputs};
use crate::workdir::{self, WorkStamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Outline,
    Script,
    Images,
    Speech,
    MouthSync,
    Render,
    Done,
}

impl Stage {
    fn step(&self) -> usize {
        match self {
            Stage::Outline => 1,
            Stage::Script => 2,
            Stage::Images => 3,
            Stage::Speech => 4,
            Stage::MouthSync => 5,
            Stage::Render => 6,
            Stage::Done => 6,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Outline => "outline",
            Stage::Script => "script",
            Stage::Images => "images",
            Stage::Speech => "speech",
            Stage::MouthSync => "mouth sync",
            Stage::Render => "render",
            Stage::Done => "done",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub topic: String,
    pub mode: StoryMode,
    pub work_dir: PathBuf,
    pub output: PathBuf,
    /// 不调用图片模型，使用已有背景图或配置的默认背景
    pub skip_images: bool,
}

pub struct Pipeline {
    config: AppConfig,
    writer: StoryWriter,
    images: Arc<dyn ImageGenerator>,
    speech: Arc<dyn SpeechSynthesizer>,
    compositor: Arc<dyn Compositor>,
}

impl Pipeline {
    pub fn new(
        config: AppConfig,
        chat: Arc<dyn ChatModel>,
        images: Arc<dyn ImageGenerator>,
        speech: Arc<dyn SpeechSynthesizer>,
        compositor: Arc<dyn Compositor>,
    ) -> Self {
        let writer = StoryWriter::new(chat, config.characters.clone());
        Self {
            config,
            writer,
            images,
            speech,
            compositor,
        }
    }

    /// 千问模型 + ffmpeg 渲染
    pub fn from_config(config: AppConfig) -> Result<Self> {
        let client = Arc::new(QwenClient::new(config.api_key()?, config.api.clone())?);
        let compositor = Arc::new(FfmpegCompositor::new(config.video.clone()));
        Ok(Self::new(
            config,
            client.clone(),
            client.clone(),
            client,
            compositor,
        ))
    }

    pub async fn run(
        &self,
        request: &RenderRequest,
        progress: &(dyn Fn(Stage) + Send + Sync),
    ) -> Result<PathBuf> {
        let topic = request.topic.trim();
        if topic.is_empty() {
            return Err(VideoError::InvalidInput("Topic cannot be empty".to_string()));
        }
        let work_dir = request.work_dir.as_path();
        workdir::claim(
            work_dir,
            &WorkStamp {
                topic: topic.to_string(),
                mode: request.mode,
            },
        )
        .await?;

        let report = |stage: Stage| {
            info!("Step {}/6: {}", stage.step(), stage);
            progress(stage);
        };

        report(Stage::Outline);
        let outline = self.outline(topic, request.mode, work_dir).await?;

        report(Stage::Script);
        let script = self.script(topic, request.mode, outline, work_dir).await?;

        report(Stage::Images);
        let backgrounds = self.backgrounds(&script, work_dir, request.skip_images).await?;

        report(Stage::Speech);
        let audio_dir = work_dir.join("audio");
        let audio = audio::synthesize_segments(
            &script,
            &self.config.characters,
            self.speech.as_ref(),
            &audio_dir,
        )
        .await?;

        report(Stage::MouthSync);
        let mouth = self.mouth_tracks(&audio).await?;
        let durations: Vec<Vec<f64>> = audio
            .iter()
            .map(|section| section.iter().map(|a| a.duration).collect())
            .collect();
        let timeline = Timeline::build(
            &durations,
            self.config.video.line_gap,
            self.config.video.section_padding,
        )?;
        workdir::save_json(&work_dir.join("timeline.json"), &timeline).await?;
        info!("Video length: {:.1}s", timeline.total());

        report(Stage::Render);
        let clips = plan_clips(&PlanInputs {
            script: &script,
            audio: &audio,
            mouth: &mouth,
            backgrounds: &backgrounds,
            timeline: &timeline,
            characters: &self.config.characters,
            fps: self.config.video.fps,
        })?;
        self.compositor
            .compose(&clips, &work_dir.join("clips"), &request.output)
            .await?;

        report(Stage::Done);
        Ok(request.output.clone())
    }

    async fn outline(&self, topic: &str, mode: StoryMode, work_dir: &Path) -> Result<Outline> {
        let path = work_dir.join("outline.json");
        if let Some(outline) = workdir::load_json::<Outline>(&path).await {
            info!("Outline already exists, skipping generation...");
            return Ok(outline);
        }
        let outline = self.writer.generate_outline(topic, mode).await?;
        workdir::save_json(&path, &outline).await?;
        Ok(outline)
    }

    async fn script(
        &self,
        topic: &str,
        mode: StoryMode,
        outline: Outline,
        work_dir: &Path,
    ) -> Result<Script> {
        let path = work_dir.join("script.json");
        if let Some(script) = workdir::load_json::<Script>(&path).await {
            if script.topic == topic && script.mode == mode && !script.sections.is_empty() {
                info!("Script already exists, skipping generation...");
                return Ok(script);
            }
            warn!("Ignoring cached script for a different topic");
        }
        let script = self.writer.generate_script(topic, mode, outline).await?;
        workdir::save_json(&path, &script).await?;
        Ok(script)
    }

    async fn backgrounds(
        &self,
        script: &Script,
        work_dir: &Path,
        skip_images: bool,
    ) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::with_capacity(script.sections.len());
        for section in &script.sections {
            let path = work_dir.join(format!("background_{:02}.png", section.index));
            if workdir::is_complete(&path).await {
                info!("Section {} background already exists, skipping...", section.index);
                paths.push(path);
                continue;
            }

            if skip_images {
                let fallback = self
                    .config
                    .video
                    .default_background
                    .clone()
                    .filter(|p| p.is_file())
                    .ok_or_else(|| {
                        VideoError::Config(format!(
                            "No background for section {} and no default_background configured",
                            section.index
                        ))
                    })?;
                paths.push(fallback);
                continue;
            }

            let prompt = if section.background.is_empty() {
                format!("{}, illustration, no people, no text", script.topic)
            } else {
                section.background.clone()
            };
            // 先写临时文件，下载完整后再改名
            let part = workdir::part_path(&path);
            self.images.generate_image(&prompt, &part).await?;
            workdir::commit(&part, &path).await?;
            info!(
                "Generated background for section {} ({}/{})",
                section.index,
                section.index + 1,
                script.sections.len()
            );
            paths.push(path);
        }
        Ok(paths)
    }

    async fn mouth_tracks(&self, audio: &[Vec<SegmentAudio>]) -> Result<Vec<Vec<Vec<MouthShape>>>> {
        let paths: Vec<Vec<PathBuf>> = audio
            .iter()
            .map(|section| section.iter().map(|a| a.path.clone()).collect())
            .collect();
        let sync = self.config.mouth.clone();
        let fps = self.config.video.fps;

        // 读 WAV 和算 RMS 都是同步计算
        tokio::task::spawn_blocking(move || {
            paths
                .iter()
                .map(|section| {
                    section
                        .iter()
                        .map(|path| -> Result<Vec<MouthShape>> {
                            let intensities = audio::frame_intensities(path, fps)?;
                            Ok(sync.frames(&intensities))
                        })
                        .collect::<Result<Vec<_>>>()
                })
                .collect::<Result<Vec<_>>>()
        })
        .await
        .map_err(|e| VideoError::Audio(format!("Mouth-sync task failed: {}", e)))?
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    use super::*;
    use crate::audio::test_support::write_wav;
    use crate::video::ClipPlan;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub const OUTLINE: &str = r#"{"title": "Noodle Night", "setup": "s", "development": "d", "twist": "t", "conclusion": "c"}"#;
    pub const SCRIPT: &str = r#"```json
[
  {"title": "Origins", "background": "a noodle stall", "segments": [
    {"speaker": "maru", "text": "Where do noodles come from?", "expression": "thinking"},
    {"speaker": "pico", "text": "Four thousand years ago.", "expression": "happy"}
  ]},
  {"title": "Today", "background": "a modern kitchen", "segments": [
    {"speaker": "maru", "text": "Wow!", "expression": "surprised"}
  ]}
]
```"#;

    pub const SUSHI_OUTLINE: &str = r#"{"title": "Sushi Story", "setup": "s", "development": "d", "twist": "t", "conclusion": "c"}"#;
    pub const SUSHI_SCRIPT: &str = r#"[
  {"title": "Edo", "background": "an Edo street stall", "segments": [
    {"speaker": "pico", "text": "Sushi started as fast food in old Edo, believe it or not."}
  ]},
  {"title": "Now", "background": "a sushi counter", "segments": [
    {"speaker": "maru", "text": "I love sushi very much indeed"}
  ]}
]"#;

    /// 按提示词里的题目回复：提到 sushi 时给寿司故事，否则给面条故事
    #[derive(Default)]
    pub struct FakeChat {
        pub calls: AtomicUsize,
    }

    #[async_trait]
    impl ChatModel for FakeChat {
        async fn complete(&self, prompt: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let sushi = prompt.contains("sushi");
            let reply = match (prompt.contains("four-part story outline"), sushi) {
                (true, false) => OUTLINE,
                (true, true) => SUSHI_OUTLINE,
                (false, false) => SCRIPT,
                (false, true) => SUSHI_SCRIPT,
            };
            Ok(reply.to_string())
        }
    }

    /// 永远不返回，让任务一直停在 Running
    pub struct StuckChat;

    #[async_trait]
    impl ChatModel for StuckChat {
        async fn complete(&self, _prompt: &str) -> Result<String> {
            std::future::pending::<Result<String>>().await
        }
    }

    #[derive(Default)]
    pub struct FakeImages {
        pub calls: AtomicUsize,
    }

    #[async_trait]
    impl ImageGenerator for FakeImages {
        async fn generate_image(&self, _prompt: &str, output_path: &Path) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::fs::write(output_path, b"png").await?;
            Ok(())
        }
    }

    /// 时长跟台词长度成正比：每个字节 0.02 秒有声，再加 0.1 秒静音
    #[derive(Default)]
    pub struct FakeSpeech {
        pub calls: AtomicUsize,
    }

    #[async_trait]
    impl SpeechSynthesizer for FakeSpeech {
        async fn synthesize(&self, text: &str, _voice: &str, output_path: &Path) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            write_wav(output_path, 8000, text.len() as f64 * 0.02, 0.1);
            Ok(())
        }
    }

    /// 记录片段计划，输出一个占位文件
    #[derive(Default)]
    pub struct FakeCompositor {
        pub clips: Mutex<Vec<ClipPlan>>,
    }

    #[async_trait]
    impl Compositor for FakeCompositor {
        async fn compose(&self, clips: &[ClipPlan], _work_dir: &Path, output: &Path) -> Result<()> {
            self.clips.lock().extend_from_slice(clips);
            if let Some(parent) = output.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(output, b"mp4").await?;
            Ok(())
        }
    }

    pub struct Fakes {
        pub chat: Arc<FakeChat>,
        pub images: Arc<FakeImages>,
        pub speech: Arc<FakeSpeech>,
        pub compositor: Arc<FakeCompositor>,
    }

    pub fn pipeline(config: AppConfig) -> (Pipeline, Fakes) {
        let fakes = Fakes {
            chat: Arc::new(FakeChat::default()),
            images: Arc::new(FakeImages::default()),
            speech: Arc::new(FakeSpeech::default()),
            compositor: Arc::new(FakeCompositor::default()),
        };
        let pipeline = Pipeline::new(
            config,
            fakes.chat.clone(),
            fakes.images.clone(),
            fakes.speech.clone(),
            fakes.compositor.clone(),
        );
        (pipeline, fakes)
    }

    /// 第一步就卡住的流水线，用来把队列塞满
    pub fn stuck_pipeline() -> Pipeline {
        Pipeline::new(
            AppConfig::default(),
            Arc::new(StuckChat),
            Arc::new(FakeImages::default()),
            Arc::new(FakeSpeech::default()),
            Arc::new(FakeCompositor::default()),
        )
    }
}
