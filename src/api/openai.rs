use crate::config::OpenAiConfig;
use crate::error::{PlannerError, PlannerResult};
use crate::normalizer::{PlanGenerator, PlanRequest, extract_json};
use crate::{logi, logw};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;

const MAX_NARRATION_CHARS: usize = 120_000;
const RAW_SNIPPET_CHARS: usize = 800;

fn sanitize_utf8_lossy(input: &str) -> String {
    String::from_utf8_lossy(input.as_bytes()).into_owned()
}

fn trim_copy_utf8_safe(input: &str, max_bytes: usize) -> String {
    if input.len() <= max_bytes {
        return input.to_string();
    }

    let mut cut = max_bytes.min(input.len());
    while cut > 0 && !input.is_char_boundary(cut) {
        cut -= 1;
    }
    input[..cut].to_string()
}

fn openai_extract_output_text(resp_json: &str) -> Option<String> {
    let root: serde_json::Value = serde_json::from_str(resp_json).ok()?;

    if let Some(err) = root.get("error") {
        if let Some(msg) = err.get("message").and_then(|v| v.as_str()) {
            logw(format!("OpenAI error message: {}", msg));
        }
        if let Some(typ) = err.get("type").and_then(|v| v.as_str()) {
            logw(format!("OpenAI error type: {}", typ));
        }
        if let Some(code) = err.get("code").and_then(|v| v.as_str()) {
            logw(format!("OpenAI error code: {}", code));
        }
        return None;
    }

    root.get("output")?
        .as_array()?
        .iter()
        .filter_map(|item| item.get("content").and_then(|v| v.as_array()))
        .flatten()
        .find(|entry| entry.get("type").and_then(|v| v.as_str()) == Some("output_text"))
        .and_then(|entry| entry.get("text").and_then(|v| v.as_str()))
        .map(str::to_string)
}

fn system_prompt() -> &'static str {
    "You are a visual planner for a documentary-style video.\n\
     Return ONLY a single JSON object with keys: schema_version, global_style \
     {topic, style_template_key, aspect_ratio, color_profile, tone}, entities \
     [{id, kind, descriptor}], beats [{id, title, summary, estimated_duration_s, \
     shot_type, narration_span {start_token, end_token}, prompts [{type, prompt}]}].\n\
     Token indices count whitespace-separated words of the narration. Output JSON only."
}

fn user_prompt(request: &PlanRequest) -> String {
    let narration = trim_copy_utf8_safe(&sanitize_utf8_lossy(&request.narration), MAX_NARRATION_CHARS);
    let shots: Vec<&str> = request.shot_types.iter().map(|s| s.as_str()).collect();
    let payload = json!({
        "topic": request.topic,
        "style_template": request.style,
        "beat_target_seconds": request.beat_target_seconds,
        "allowed_shot_types": shots,
        "avoid": request.adapter_negatives,
        "narration_token_count": request.narration.split_whitespace().count(),
        "narration": narration,
    });
    payload.to_string()
}

fn raw_snippet(raw: &str) -> String {
    raw.chars().take(RAW_SNIPPET_CHARS).collect()
}

/// Drafts plans through the OpenAI Responses API in JSON mode.
pub struct OpenAiPlanGenerator {
    client: Client,
    cfg: OpenAiConfig,
    timeout: Duration,
}

impl OpenAiPlanGenerator {
    pub fn new(client: Client, cfg: OpenAiConfig, timeout_secs: u64) -> Self {
        Self {
            client,
            cfg,
            timeout: Duration::from_secs(timeout_secs),
        }
    }
}

#[async_trait]
impl PlanGenerator for OpenAiPlanGenerator {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn generate(&self, request: &PlanRequest) -> PlannerResult<serde_json::Value> {
        if self.cfg.api_key.is_empty() {
            return Err(PlannerError::GeneratorUnavailable("OpenAI API key missing".to_string()));
        }

        let body = json!({
            "model": self.cfg.model,
            "input": [
                {"role": "system", "content": system_prompt()},
                {"role": "user", "content": user_prompt(request)},
            ],
            "text": {"format": {"type": "json_object"}},
        });

        let url = format!("{}/responses", self.cfg.base_url.trim_end_matches('/'));
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.cfg.api_key)
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await?;

        let status = resp.status();
        let raw = resp.text().await.unwrap_or_default();

        if !status.is_success() {
            logw(format!("OpenAI HTTP {}", status.as_u16()));
            if !raw.is_empty() {
                logw(format!("OpenAI raw body: {}", raw_snippet(&raw)));
            }
            return Err(PlannerError::GeneratorUnavailable(format!("HTTP {}", status.as_u16())));
        }

        let Some(out_text) = openai_extract_output_text(&raw) else {
            logw("OpenAI response parse failed.");
            if !raw.is_empty() {
                logw(format!("OpenAI raw body: {}", raw_snippet(&raw)));
            }
            return Err(PlannerError::MalformedPlan("no output_text in response".to_string()));
        };

        let candidate = extract_json(&out_text)?;
        logi(format!("OpenAI plan draft received ({} chars)", out_text.len()));
        Ok(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StyleTemplate;
    use crate::plan::ShotType;

    #[test]
    fn trims_on_char_boundary() {
        assert_eq!(trim_copy_utf8_safe("héllo", 2), "h");
        assert_eq!(trim_copy_utf8_safe("abc", 10), "abc");
    }

    #[test]
    fn extracts_first_output_text() {
        let raw = r#"{"output":[{"type":"reasoning"},{"content":[{"type":"output_text","text":"{\"beats\":[]}"}]}]}"#;
        assert_eq!(openai_extract_output_text(raw).as_deref(), Some("{\"beats\":[]}"));
    }

    #[test]
    fn error_body_yields_none() {
        let raw = r#"{"error":{"message":"bad key","type":"invalid_request_error","code":"invalid_api_key"}}"#;
        assert!(openai_extract_output_text(raw).is_none());
    }

    #[test]
    fn user_prompt_carries_vocabulary() {
        let request = PlanRequest {
            narration: "the fleet sails at dawn".to_string(),
            topic: "history".to_string(),
            style: StyleTemplate::default(),
            beat_target_seconds: [8.0, 12.0],
            shot_types: vec![ShotType::Map, ShotType::Insert],
            adapter_negatives: vec!["crowds".to_string()],
        };
        let payload: serde_json::Value = serde_json::from_str(&user_prompt(&request)).unwrap();
        assert_eq!(payload["allowed_shot_types"], json!(["map", "insert"]));
        assert_eq!(payload["narration_token_count"], json!(5));
    }

    #[tokio::test]
    async fn missing_key_is_unavailable() {
        let cfg = OpenAiConfig {
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            base_url: "http://127.0.0.1:9".to_string(),
        };
        let generator = OpenAiPlanGenerator::new(Client::new(), cfg, 1);
        let request = PlanRequest {
            narration: "x".to_string(),
            topic: "space".to_string(),
            style: StyleTemplate::default(),
            beat_target_seconds: [8.0, 12.0],
            shot_types: Vec::new(),
            adapter_negatives: Vec::new(),
        };
        let err = generator.generate(&request).await.unwrap_err();
        assert!(matches!(err, PlannerError::GeneratorUnavailable(_)));
    }
}
