mod api;
mod audio;
mod config;
mod error;
mod pipeline;
mod queue;
mod scene;
mod server;
mod story;
mod video;
mod workdir;

use anyhow::Context;
use clap::{Parser, Subcommand};
use config::AppConfig;
use pipeline::{Pipeline, RenderRequest, Stage};
use queue::{JobQueue, QueueOptions};
use std::path::PathBuf;
use std::sync::Arc;
use story::StoryMode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "food-story-video")]
#[command(about = "Turn a topic into a narrated character dialogue video using AI", long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// DashScope API key
    #[arg(long, global = true)]
    api_key: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate one video in the foreground
    Generate {
        /// Topic of the video: a food item, or a theme in comedy mode
        #[arg(short, long)]
        topic: String,

        #[arg(short, long, value_enum, default_value_t = StoryMode::Food)]
        mode: StoryMode,

        /// Output video file path
        #[arg(short, long, default_value = "output.mp4")]
        output: PathBuf,

        /// Working directory for intermediate files; rerunning with the same directory resumes
        #[arg(short = 'w', long, default_value = "./output")]
        work_dir: PathBuf,

        /// Skip image generation (use existing or default backgrounds)
        #[arg(long)]
        skip_images: bool,
    },
    /// Run the job queue and web front-end
    Serve {
        /// Address to listen on, overriding the config file
        #[arg(short, long)]
        bind: Option<String>,

        /// Number of concurrent render workers, overriding the config file
        #[arg(long)]
        workers: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true)
        .init();

    // 加载环境变量
    dotenvy::dotenv().ok();

    // 解析命令行参数
    let args = Args::parse();

    // 配置文件 < 环境变量 < 命令行
    let mut config = AppConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(key) = args.api_key {
        config.api.api_key = Some(key);
    }

    match args.command {
        Command::Generate {
            topic,
            mode,
            output,
            work_dir,
            skip_images,
        } => {
            let request = RenderRequest {
                topic,
                mode,
                work_dir,
                output,
                skip_images,
            };
            if let Err(e) = run_generation(config, request).await {
                error!("Video generation failed: {}", e);
                std::process::exit(1);
            }
        }
        Command::Serve { bind, workers } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            if let Some(workers) = workers {
                config.server.workers = workers;
            }
            run_server(config).await?;
        }
    }

    Ok(())
}

async fn run_generation(config: AppConfig, request: RenderRequest) -> anyhow::Result<()> {
    info!("Starting video generation for \"{}\" ({})", request.topic, request.mode);
    let pipeline = Pipeline::from_config(config)?;
    let output = pipeline
        .run(&request, &|stage: Stage| {
            if stage == Stage::Done {
                info!("All steps finished");
            }
        })
        .await?;
    info!("Video generation completed successfully: {}", output.display());
    Ok(())
}

async fn run_server(config: AppConfig) -> anyhow::Result<()> {
    let bind = config.server.bind.clone();
    let workers = config.server.workers;
    let capacity = config.server.queue_capacity;
    let dirs = QueueOptions {
        work_root: config.server.work_root.clone(),
        output_root: config.server.output_root.clone(),
        retain_finished: config.server.retain_finished,
    };
    tokio::fs::create_dir_all(&dirs.work_root)
        .await
        .context("Failed to create work root")?;
    tokio::fs::create_dir_all(&dirs.output_root)
        .await
        .context("Failed to create output root")?;

    let pipeline = Arc::new(Pipeline::from_config(config)?);
    let queue = JobQueue::start(pipeline, workers, capacity, dirs);
    info!("Started {} render worker(s)", workers);

    server::serve(server::ApiState::new(queue), &bind).await?;
    Ok(())
}
