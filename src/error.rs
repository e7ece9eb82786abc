use thiserror::Error;

#[derive(Error, Debug)]
pub enum VideoError {
    #[error("API error: {0}")]
    Api(String),

    #[error("Story generation error: {0}")]
    Story(String),

    #[error("Scene timing error: {0}")]
    Scene(String),

    #[error("Audio error: {0}")]
    Audio(String),

    #[error("Video generation error: {0}")]
    VideoGeneration(String),

    #[error("FFmpeg error: {0}")]
    Ffmpeg(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Job queue error: {0}")]
    Queue(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, VideoError>;
