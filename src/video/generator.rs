use super::{ClipPlan, Compositor};
use crate::audio::{runs, MouthShape};
use crate::config::VideoConfig;
use crate::error::{Result, VideoError};
use crate::story::DEFAULT_EXPRESSION;
use async_trait::async_trait;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info};

/// 调用 ffmpeg 渲染片段
pub struct FfmpegCompositor {
    config: VideoConfig,
}

impl FfmpegCompositor {
    pub fn new(config: VideoConfig) -> Self {
        Self { config }
    }

    /// 角色在某个表情和嘴型下的立绘。
    ///
    /// 找不到时先退回普通表情，再退回普通表情的闭嘴图。
    pub fn sprite_path(&self, character: &str, expression: &str, mouth: MouthShape) -> Result<PathBuf> {
        let dir = self.config.sprite_dir.join(character);
        let candidates = [
            dir.join(format!("{}_{}.png", expression, mouth)),
            dir.join(format!("{}_{}.png", DEFAULT_EXPRESSION, mouth)),
            dir.join(format!("{}_{}.png", DEFAULT_EXPRESSION, MouthShape::Closed)),
        ];
        candidates
            .iter()
            .find(|p| p.is_file())
            .cloned()
            .ok_or_else(|| {
                VideoError::VideoGeneration(format!(
                    "No sprite for {} ({}, {}) under {}",
                    character,
                    expression,
                    mouth,
                    dir.display()
                ))
            })
    }

    /// concat 分离器脚本：每段连续相同的嘴型对应一张立绘
    fn sprite_track(&self, clip: &ClipPlan) -> Result<String> {
        let fps = self.config.fps as f64;
        let mut track = String::from("ffconcat version 1.0\n");
        let mut last = None;

        for (shape, frames) in runs(&clip.mouth) {
            let sprite = absolute(&self.sprite_path(&clip.character, &clip.expression, shape)?)?;
            let _ = writeln!(track, "file '{}'", escape_concat_path(&sprite));
            let _ = writeln!(track, "duration {:.4}", frames as f64 / fps);
            last = Some(sprite);
        }

        // 最后一项要重复一次，否则它的 duration 会被忽略
        let last = last.ok_or_else(|| {
            VideoError::VideoGeneration(format!(
                "Clip {}/{} has no frames",
                clip.section, clip.line
            ))
        })?;
        let _ = writeln!(track, "file '{}'", escape_concat_path(&last));
        Ok(track)
    }

    fn filter_graph(&self, clip: &ClipPlan, subtitle_file: &Path) -> String {
        let VideoConfig {
            width,
            height,
            sprite_height,
            font_size,
            ..
        } = self.config;

        let mut drawtext = format!(
            "drawtext=textfile={}:expansion=none:fontsize={}:fontcolor=white:\
             x=(w-text_w)/2:y=h-text_h-60:box=1:boxcolor=black@0.6:boxborderw=16",
            escape_filter_value(&subtitle_file.to_string_lossy()),
            font_size
        );
        if let Some(font) = &self.config.font_file {
            let _ = write!(
                drawtext,
                ":fontfile={}",
                escape_filter_value(&font.to_string_lossy())
            );
        }

        format!(
            "[0:v]scale={w}:{h}:force_original_aspect_ratio=increase,crop={w}:{h},setsar=1[bg];\
             [1:v]scale=-1:{sh}[ch];\
             [bg][ch]overlay=x={x}:y={y}:eof_action=repeat,{drawtext}[v];\
             [2:a]apad[a]",
            w = width,
            h = height,
            sh = sprite_height,
            x = clip.x,
            y = clip.y,
            drawtext = drawtext,
        )
    }

    async fn create_clip(&self, clip: &ClipPlan, work_dir: &Path) -> Result<PathBuf> {
        let stem = format!("clip_{:02}_{:03}", clip.section, clip.line);
        let track_path = work_dir.join(format!("{}_sprites.txt", stem));
        let subtitle_path = work_dir.join(format!("{}_subtitle.txt", stem));
        let clip_path = work_dir.join(format!("{}.mp4", stem));

        debug!("Creating clip {} for: {}", stem, clip.subtitle);
        tokio::fs::write(&track_path, self.sprite_track(clip)?).await?;
        tokio::fs::write(&subtitle_path, format!("{}: {}", clip.label, clip.subtitle)).await?;

        let fps = self.config.fps.to_string();
        let args: Vec<String> = vec![
            "-y".into(),
            "-loop".into(),
            "1".into(),
            "-framerate".into(),
            fps.clone(),
            "-i".into(),
            clip.background.to_string_lossy().into_owned(),
            "-f".into(),
            "concat".into(),
            "-safe".into(),
            "0".into(),
            "-i".into(),
            track_path.to_string_lossy().into_owned(),
            "-i".into(),
            clip.audio.to_string_lossy().into_owned(),
            "-filter_complex".into(),
            self.filter_graph(clip, &subtitle_path),
            "-map".into(),
            "[v]".into(),
            "-map".into(),
            "[a]".into(),
            "-t".into(),
            format!("{:.3}", clip.duration),
            "-r".into(),
            fps,
            "-c:v".into(),
            "libx264".into(),
            "-pix_fmt".into(),
            "yuv420p".into(),
            "-c:a".into(),
            "aac".into(),
            "-ar".into(),
            "44100".into(),
            "-ac".into(),
            "2".into(),
            clip_path.to_string_lossy().into_owned(),
        ];
        self.run_ffmpeg(&args).await?;

        if !self.config.keep_intermediate {
            tokio::fs::remove_file(&track_path).await.ok();
            tokio::fs::remove_file(&subtitle_path).await.ok();
        }
        Ok(clip_path)
    }

    async fn concat_clips(&self, clips: &[PathBuf], work_dir: &Path, output: &Path) -> Result<()> {
        info!("Concatenating {} clips...", clips.len());
        let list_path = work_dir.join("concat.txt");
        let mut list = String::new();
        for clip in clips {
            let _ = writeln!(list, "file '{}'", escape_concat_path(&absolute(clip)?));
        }
        tokio::fs::write(&list_path, list).await?;

        let args: Vec<String> = vec![
            "-y".into(),
            "-f".into(),
            "concat".into(),
            "-safe".into(),
            "0".into(),
            "-i".into(),
            list_path.to_string_lossy().into_owned(),
            "-c".into(),
            "copy".into(),
            "-movflags".into(),
            "+faststart".into(),
            output.to_string_lossy().into_owned(),
        ];
        self.run_ffmpeg(&args).await?;

        if !self.config.keep_intermediate {
            tokio::fs::remove_file(&list_path).await.ok();
        }
        Ok(())
    }

    async fn run_ffmpeg(&self, args: &[String]) -> Result<()> {
        debug!("{} {}", self.config.ffmpeg_bin, args.join(" "));
        let output = Command::new(&self.config.ffmpeg_bin)
            .args(args)
            .output()
            .await
            .map_err(|e| VideoError::Ffmpeg(format!("Failed to run {}: {}", self.config.ffmpeg_bin, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: Vec<&str> = stderr.lines().rev().take(15).collect();
            let tail: Vec<&str> = tail.into_iter().rev().collect();
            return Err(VideoError::Ffmpeg(format!(
                "ffmpeg exited with {}: {}",
                output.status,
                tail.join("\n")
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Compositor for FfmpegCompositor {
    async fn compose(&self, clips: &[ClipPlan], work_dir: &Path, output: &Path) -> Result<()> {
        if clips.is_empty() {
            return Err(VideoError::VideoGeneration("Nothing to render".to_string()));
        }
        info!("Rendering {} clips...", clips.len());
        tokio::fs::create_dir_all(work_dir).await?;
        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut rendered = Vec::with_capacity(clips.len());
        for (i, clip) in clips.iter().enumerate() {
            rendered.push(self.create_clip(clip, work_dir).await?);
            info!("Rendered clip {}/{}", i + 1, clips.len());
        }

        self.concat_clips(&rendered, work_dir, output).await?;

        if !self.config.keep_intermediate {
            for clip in &rendered {
                tokio::fs::remove_file(clip).await.ok();
            }
        }
        info!("Video generation completed: {}", output.display());
        Ok(())
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    path.canonicalize().map_err(|e| {
        VideoError::VideoGeneration(format!(
            "Failed to get absolute path of {}: {}",
            path.display(),
            e
        ))
    })
}

/// 写进 `file '...'` 的路径，单引号要转义
fn escape_concat_path(path: &Path) -> String {
    path.to_string_lossy().replace('\'', "'\\''")
}

/// 滤镜参数值的转义。
///
/// ffmpeg 会反转义两次：先是滤镜图解析器（`\ ' [ ] , ;`），再是选项解析器（`\ ' :`），
/// 所以这里按相反的顺序各转义一遍。
fn escape_filter_value(value: &str) -> String {
    let option = backslash_escape(value, &['\\', '\'', ':']);
    backslash_escape(&option, &['\\', '\'', '[', ']', ',', ';'])
}

fn backslash_escape(value: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(value.len() + 4);
    for ch in value.chars() {
        if special.contains(&ch) {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}
