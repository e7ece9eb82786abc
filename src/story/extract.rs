//! 从模型回复里取出 JSON。
//!
//! 即使提示词要求只输出 JSON，模型也常常加上 markdown 代码块或说明文字。

use crate::error::{Result, VideoError};
use serde::de::DeserializeOwned;
use tracing::error;

/// 找出模型回复中的 JSON 内容。
///
/// 依次尝试：```` ```json ```` 代码块、其他代码块、第一个括号配平的对象或数组
/// （哪个先出现用哪个）。
pub fn extract_json(reply: &str) -> Result<String> {
    if let Some(fenced) = fenced_block(reply) {
        if fenced.starts_with('{') || fenced.starts_with('[') {
            return Ok(fenced);
        }
    }

    let candidates = match (reply.find('['), reply.find('{')) {
        (Some(bracket), Some(brace)) if bracket < brace => [('[', ']'), ('{', '}')],
        _ => [('{', '}'), ('[', ']')],
    };
    for (open, close) in candidates {
        if let Some(json) = balanced(reply, open, close) {
            return Ok(json);
        }
    }

    error!(reply_length = reply.len(), "No JSON found in model reply");
    Err(VideoError::Story(format!(
        "No JSON found in model reply (length: {})",
        reply.len()
    )))
}

/// 提取并反序列化，失败时错误信息里带一段内容预览
pub fn parse_reply<T: DeserializeOwned>(reply: &str) -> Result<T> {
    let json = extract_json(reply)?;
    serde_json::from_str(&json).map_err(|e| {
        let preview: String = json.chars().take(120).collect();
        VideoError::Story(format!("Failed to parse model JSON: {} ({}...)", e, preview))
    })
}

fn fenced_block(reply: &str) -> Option<String> {
    let (start, tagged) = match reply.find("```json") {
        Some(pos) => (pos + "```json".len(), true),
        None => (reply.find("```")? + 3, false),
    };

    // 没标 json 的代码块第一行可能还是语言名
    let body_start = if tagged {
        start
    } else {
        reply[start..]
            .find('\n')
            .map(|n| start + n + 1)
            .unwrap_or(start)
    };

    // 没有结束标记说明回复被截断了，有多少取多少
    let body = match reply[body_start..].find("```") {
        Some(end) => &reply[body_start..body_start + end],
        None => &reply[body_start..],
    };
    Some(body.trim().to_string())
}

fn balanced(text: &str, open: char, close: char) -> Option<String> {
    let start = text.find(open)?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            c if c == open && !in_string => depth += 1,
            c if c == close && !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..start + i + ch.len_utf8()].to_string());
                }
            }
            _ => {}
        }
    }
    None
}
