//! 进程内的视频生成任务队列。
//!
//! 任务只保存在内存里，重启后就没了；工作目录还在磁盘上，可以用 `generate`
//! 命令接着跑。已结束的任务只保留最近的若干个。

use crate::error::{Result, VideoError};
use crate::pipeline::{Pipeline, RenderRequest, Stage};
use crate::story::StoryMode;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

pub type JobId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub topic: String,
    pub mode: StoryMode,
    pub status: JobStatus,
    pub stage: Option<Stage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub output: Option<PathBuf>,
    pub error: Option<String>,
}

/// 队列句柄，clone 开销很小
#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    jobs: Mutex<HashMap<JobId, Job>>,
    tx: mpsc::Sender<JobId>,
    retain_finished: usize,
}

#[derive(Debug, Clone)]
pub struct QueueOptions {
    /// 每个任务的工作目录是 `work_root/{id}`
    pub work_root: PathBuf,
    /// 成片输出为 `output_root/{id}.mp4`
    pub output_root: PathBuf,
    /// 最多保留多少个已结束的任务，超出时先删最早结束的
    pub retain_finished: usize,
}

impl JobQueue {
    /// 在当前 tokio 运行时上启动 `workers` 个工作任务
    pub fn start(
        pipeline: Arc<Pipeline>,
        workers: usize,
        capacity: usize,
        options: QueueOptions,
    ) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let queue = Self {
            inner: Arc::new(QueueInner {
                jobs: Mutex::new(HashMap::new()),
                tx,
                retain_finished: options.retain_finished.max(1),
            }),
        };

        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        for worker in 0..workers.max(1) {
            let worker_queue = queue.clone();
            let pipeline = Arc::clone(&pipeline);
            let rx = Arc::clone(&rx);
            let options = options.clone();
            tokio::spawn(async move {
                info!(worker, "Job worker started");
                loop {
                    // 只在等下一个任务时持有接收端的锁
                    let next = rx.lock().await.recv().await;
                    let Some(id) = next else {
                        break;
                    };
                    worker_queue.process(id, &pipeline, &options).await;
                }
                info!(worker, "Job worker stopped");
            });
        }

        queue
    }

    pub fn submit(&self, topic: &str, mode: StoryMode) -> Result<JobId> {
        let topic = topic.trim();
        if topic.is_empty() {
            return Err(VideoError::InvalidInput("Topic cannot be empty".to_string()));
        }

        let now = Utc::now();
        let job = Job {
            id: Uuid::new_v4(),
            topic: topic.to_string(),
            mode,
            status: JobStatus::Queued,
            stage: None,
            created_at: now,
            updated_at: now,
            output: None,
            error: None,
        };
        let id = job.id;
        self.inner.jobs.lock().insert(id, job);

        if let Err(e) = self.inner.tx.try_send(id) {
            self.inner.jobs.lock().remove(&id);
            return Err(VideoError::Queue(format!("Cannot accept job: {}", e)));
        }

        info!(job_id = %id, topic, %mode, "Job queued");
        Ok(id)
    }

    pub fn get(&self, id: JobId) -> Option<Job> {
        self.inner.jobs.lock().get(&id).cloned()
    }

    /// 全部任务，最新的在前
    pub fn list(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.inner.jobs.lock().values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }

    fn update(&self, id: JobId, apply: impl FnOnce(&mut Job)) {
        if let Some(job) = self.inner.jobs.lock().get_mut(&id) {
            apply(job);
            job.updated_at = Utc::now();
        }
    }

    /// 记录任务结束，并在同一把锁里清掉超出保留数的旧任务
    fn finish(&self, id: JobId, apply: impl FnOnce(&mut Job)) {
        let mut jobs = self.inner.jobs.lock();
        if let Some(job) = jobs.get_mut(&id) {
            apply(job);
            job.updated_at = Utc::now();
        }

        let mut finished: Vec<(DateTime<Utc>, JobId)> = jobs
            .values()
            .filter(|job| job.status.is_finished())
            .map(|job| (job.updated_at, job.id))
            .collect();
        let excess = finished.len().saturating_sub(self.inner.retain_finished);
        if excess == 0 {
            return;
        }
        finished.sort();
        for (_, old) in finished.into_iter().take(excess) {
            jobs.remove(&old);
            debug!(job_id = %old, "Dropped finished job from the table");
        }
    }

    #[instrument(skip(self, pipeline, options))]
    async fn process(&self, id: JobId, pipeline: &Pipeline, options: &QueueOptions) {
        let Some(job) = self.get(id) else {
            return;
        };
        self.update(id, |job| job.status = JobStatus::Running);
        info!(topic = %job.topic, "Job started");

        let request = RenderRequest {
            topic: job.topic.clone(),
            mode: job.mode,
            work_dir: options.work_root.join(id.to_string()),
            output: options.output_root.join(format!("{}.mp4", id)),
            skip_images: false,
        };
        let progress = |stage: Stage| self.update(id, |job| job.stage = Some(stage));

        match pipeline.run(&request, &progress).await {
            Ok(output) => {
                info!(output = %output.display(), "Job completed");
                self.finish(id, |job| {
                    job.status = JobStatus::Completed;
                    job.output = Some(output);
                });
            }
            Err(e) => {
                error!(error = %e, "Job failed");
                self.finish(id, |job| {
                    job.status = JobStatus::Failed;
                    job.error = Some(e.to_string());
                });
            }
        }
    }
}
