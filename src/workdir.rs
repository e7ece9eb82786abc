//! 工作目录里的中间文件：请求指纹、JSON 缓存、原子写入。

use crate::error::Result;
use crate::story::StoryMode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const STAMP_FILE: &str = "request.json";
const GENERATED_FILES: &[&str] = &["outline.json", "script.json", "timeline.json"];
const GENERATED_DIRS: &[&str] = &["audio", "clips"];

/// 工作目录所属的题目和模式
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkStamp {
    pub topic: String,
    pub mode: StoryMode,
}

/// 确认工作目录属于本次请求。
///
/// 指纹不一致时删除上一个题目生成的大纲、脚本、背景图和语音，
/// 没有指纹的目录（新目录或手工放了背景图的目录）保持原样。
pub async fn claim(work_dir: &Path, stamp: &WorkStamp) -> Result<()> {
    tokio::fs::create_dir_all(work_dir).await?;
    let stamp_path = work_dir.join(STAMP_FILE);

    match load_json::<WorkStamp>(&stamp_path).await {
        Some(existing) if existing == *stamp => {
            info!("Resuming work directory {}", work_dir.display());
            return Ok(());
        }
        Some(existing) => {
            warn!(
                "Work directory {} belongs to \"{}\" ({}), clearing it for \"{}\" ({})",
                work_dir.display(),
                existing.topic,
                existing.mode,
                stamp.topic,
                stamp.mode
            );
            clear_generated(work_dir).await?;
        }
        None => {}
    }

    save_json(&stamp_path, stamp).await
}

async fn clear_generated(work_dir: &Path) -> Result<()> {
    for name in GENERATED_FILES {
        remove_file_if_exists(&work_dir.join(name)).await?;
    }
    for name in GENERATED_DIRS {
        match tokio::fs::remove_dir_all(work_dir.join(name)).await {
            Err(e) if e.kind() != ErrorKind::NotFound => return Err(e.into()),
            _ => {}
        }
    }

    let mut entries = tokio::fs::read_dir(work_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with("background_") && name.ends_with(".png") {
            remove_file_if_exists(&entry.path()).await?;
        }
    }
    Ok(())
}

async fn remove_file_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}

/// `path` 旁边的临时文件，写完后再 [`commit`] 到正式位置
pub fn part_path(path: &Path) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

pub async fn commit(part: &Path, path: &Path) -> Result<()> {
    tokio::fs::rename(part, path).await?;
    Ok(())
}

/// 非空文件才算已生成
pub async fn is_complete(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}

pub async fn load_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let content = tokio::fs::read_to_string(path).await.ok()?;
    match serde_json::from_str(&content) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Ignoring unreadable {}: {}", path.display(), e);
            None
        }
    }
}

pub async fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_string_pretty(value)?;
    let part = part_path(path);
    tokio::fs::write(&part, content).await?;
    commit(&part, path).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stamp(topic: &str) -> WorkStamp {
        WorkStamp {
            topic: topic.to_string(),
            mode: StoryMode::Food,
        }
    }

    fn seed(dir: &Path) {
        std::fs::write(dir.join("outline.json"), b"{}").unwrap();
        std::fs::write(dir.join("background_00.png"), b"png").unwrap();
        std::fs::create_dir_all(dir.join("audio")).unwrap();
        std::fs::write(dir.join("audio/section_00_line_000.wav"), b"wav").unwrap();
        std::fs::write(dir.join("notes.txt"), b"keep").unwrap();
    }

    #[tokio::test]
    async fn same_request_keeps_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        claim(dir.path(), &stamp("udon")).await.unwrap();
        seed(dir.path());
        claim(dir.path(), &stamp("udon")).await.unwrap();

        assert!(dir.path().join("outline.json").is_file());
        assert!(dir.path().join("background_00.png").is_file());
        assert!(dir.path().join("audio").is_dir());
    }

    #[tokio::test]
    async fn other_topic_clears_generated_files_only() {
        let dir = tempfile::tempdir().unwrap();
        claim(dir.path(), &stamp("udon")).await.unwrap();
        seed(dir.path());
        claim(dir.path(), &stamp("soba")).await.unwrap();

        assert!(!dir.path().join("outline.json").exists());
        assert!(!dir.path().join("background_00.png").exists());
        assert!(!dir.path().join("audio").exists());
        assert!(dir.path().join("notes.txt").is_file());

        let saved: WorkStamp = load_json(&dir.path().join("request.json")).await.unwrap();
        assert_eq!(saved, stamp("soba"));
    }

    #[tokio::test]
    async fn unstamped_directory_is_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path());
        claim(dir.path(), &stamp("udon")).await.unwrap();
        assert!(dir.path().join("background_00.png").is_file());
    }

    #[tokio::test]
    async fn empty_file_is_not_complete() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.png");
        assert!(!is_complete(&path).await);
        std::fs::write(&path, b"").unwrap();
        assert!(!is_complete(&path).await);
        std::fs::write(&path, b"x").unwrap();
        assert!(is_complete(&path).await);
        assert_eq!(part_path(&path), dir.path().join("a.png.part"));
    }
}
