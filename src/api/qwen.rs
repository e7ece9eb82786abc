use super::{ChatModel, ImageGenerator, SpeechSynthesizer};
use crate::config::ApiConfig;
use crate::error::{Result, VideoError};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

const TEXT_PATH: &str = "services/aigc/text-generation/generation";
const IMAGE_PATH: &str = "services/aigc/text2image/image-synthesis";
const TTS_PATH: &str = "services/aigc/text2speech/speech-synthesis";
const TASKS_PATH: &str = "tasks";

#[derive(Debug, Clone)]
pub struct QwenClient {
    api_key: String,
    config: ApiConfig,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct ImageGenerationResponse {
    output: ImageOutput,
}

#[derive(Debug, Deserialize)]
struct ImageOutput {
    task_id: String,
}

#[derive(Debug, Deserialize)]
struct ImageTaskResponse {
    output: ImageTaskOutput,
}

#[derive(Debug, Deserialize)]
struct ImageTaskOutput {
    task_status: String,
    results: Option<Vec<ImageResult>>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ImageResult {
    url: String,
}

#[derive(Debug, Deserialize)]
struct TtsResponse {
    output: TtsOutput,
}

#[derive(Debug, Deserialize)]
struct TtsOutput {
    audio_url: Option<String>,
}

/// 查询一次异步图片任务的结果
#[derive(Debug, PartialEq)]
enum TaskPoll {
    Done(String),
    Pending(String),
}

impl QwenClient {
    pub fn new(api_key: impl Into<String>, config: ApiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            api_key: api_key.into(),
            config,
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn post_json(
        &self,
        path: &str,
        body: &serde_json::Value,
        async_task: bool,
    ) -> Result<reqwest::Response> {
        let mut request = self
            .client
            .post(self.url(path))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body);
        if async_task {
            request = request.header("X-DashScope-Async", "enable");
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await?;
            return Err(VideoError::Api(format!(
                "{} returned HTTP {}: {}",
                path, status, error_text
            )));
        }
        Ok(response)
    }

    async fn wait_for_image_task(&self, task_id: &str) -> Result<String> {
        let get_url = self.url(&format!("{}/{}", TASKS_PATH, task_id));
        let retry_interval = Duration::from_secs(self.config.poll_interval_secs);
        let max_polls = self.config.max_polls;

        for i in 0..max_polls {
            tokio::time::sleep(retry_interval).await;
            debug!("Querying task status: {}", get_url);

            let response = self
                .client
                .get(&get_url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                let error_text = response.text().await?;
                warn!("Failed to get task status (HTTP {}): {}", status, error_text);
                continue;
            }

            let response_text = response.text().await?;
            match parse_task_poll(&response_text)? {
                TaskPoll::Done(url) => return Ok(url),
                TaskPoll::Pending(status) => {
                    info!("Task status: {} (poll {}/{})", status, i + 1, max_polls);
                }
            }
        }

        Err(VideoError::Api(format!(
            "Image task {} did not finish after {} polls",
            task_id, max_polls
        )))
    }

    async fn download(&self, url: &str, output_path: &Path) -> Result<()> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(VideoError::Api(format!(
                "Download of {} failed with HTTP {}",
                url,
                response.status()
            )));
        }
        let data = response.bytes().await?;
        tokio::fs::write(output_path, data).await?;
        Ok(())
    }
}

#[async_trait]
impl ChatModel for QwenClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let request_body = json!({
            "model": self.config.text_model,
            "input": {
                "messages": [
                    {
                        "role": "user",
                        "content": prompt
                    }
                ]
            },
            "parameters": {
                "result_format": "message"
            }
        });

        let response = self.post_json(TEXT_PATH, &request_body, false).await?;
        let response_json: serde_json::Value = response.json().await?;
        let text = message_content(&response_json)?;
        debug!("Model reply: {}", text);
        Ok(text)
    }
}

#[async_trait]
impl ImageGenerator for QwenClient {
    async fn generate_image(&self, prompt: &str, output_path: &Path) -> Result<()> {
        info!("Generating image for prompt: {}", prompt);

        let request_body = json!({
            "model": self.config.image_model,
            "input": {
                "prompt": prompt
            },
            "parameters": {
                "style": self.config.image_style,
                "size": self.config.image_size,
                "n": 1
            }
        });

        let response = self.post_json(IMAGE_PATH, &request_body, true).await?;
        let task_response: ImageGenerationResponse = response.json().await?;
        let task_id = task_response.output.task_id;
        info!("Image generation task submitted: {}", task_id);

        let image_url = self.wait_for_image_task(&task_id).await?;
        debug!("Downloading image from: {}", image_url);
        self.download(&image_url, output_path).await?;

        info!("Image saved to: {}", output_path.display());
        Ok(())
    }
}

#[async_trait]
impl SpeechSynthesizer for QwenClient {
    async fn synthesize(&self, text: &str, voice: &str, output_path: &Path) -> Result<()> {
        debug!("Synthesizing speech ({}): {}", voice, text);

        let request_body = json!({
            "model": self.config.tts_model,
            "input": {
                "text": text
            },
            "parameters": {
                "voice": voice,
                "format": "wav"
            }
        });

        let response = self.post_json(TTS_PATH, &request_body, false).await?;
        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("json"));

        if is_json {
            let body: TtsResponse = response.json().await?;
            let url = body
                .output
                .audio_url
                .ok_or_else(|| VideoError::Api("TTS response has no audio_url".to_string()))?;
            self.download(&url, output_path).await?;
        } else {
            let audio_data = response.bytes().await?;
            tokio::fs::write(output_path, audio_data).await?;
        }

        debug!("Speech saved to: {}", output_path.display());
        Ok(())
    }
}

fn message_content(response: &serde_json::Value) -> Result<String> {
    response["output"]["choices"][0]["message"]["content"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| VideoError::Api("Failed to extract generated text".to_string()))
}

fn parse_task_poll(body: &str) -> Result<TaskPoll> {
    let task: ImageTaskResponse = serde_json::from_str(body)
        .map_err(|e| VideoError::Api(format!("Failed to parse task response: {}", e)))?;

    match task.output.task_status.as_str() {
        "SUCCEEDED" => task
            .output
            .results
            .and_then(|results| results.into_iter().next())
            .map(|r| TaskPoll::Done(r.url))
            .ok_or_else(|| VideoError::Api("No image URL in response".to_string())),
        "FAILED" | "CANCELED" | "UNKNOWN" => Err(VideoError::Api(format!(
            "Image generation failed: {}",
            task.output.message.unwrap_or(task.output.task_status)
        ))),
        other => Ok(TaskPoll::Pending(other.to_string())),
    }
}
