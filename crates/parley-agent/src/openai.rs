use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::provider::{Completion, CompletionRequest, ModelClient, ModelError, PromptRole};

/// Default model collaborator: any OpenAI-compatible chat completions
/// endpoint, non-streaming.
pub struct OpenAiCompatClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiCompatClient {
    pub fn new(api_key: String, base_url: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url,
            model,
        }
    }
}

#[async_trait]
impl ModelClient for OpenAiCompatClient {
    fn name(&self) -> &str {
        "openai-compat"
    }

    async fn complete(&self, req: &CompletionRequest) -> Result<Completion, ModelError> {
        let body = build_request_body(req, &self.model);
        let url = format!("{}/v1/chat/completions", self.base_url);

        debug!(model = %self.model, "sending completion request");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status == 503 || status == 529 {
            return Err(ModelError::Unavailable(format!("upstream returned {status}")));
        }
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "model API error");
            return Err(ModelError::Api {
                status,
                message: text,
            });
        }

        let api_resp: ApiResponse = resp
            .json()
            .await
            .map_err(|e| ModelError::Parse(e.to_string()))?;

        Ok(parse_response(api_resp))
    }
}

fn build_request_body(req: &CompletionRequest, model: &str) -> serde_json::Value {
    // OpenAI uses a flat messages array; system is prepended as a system message.
    let mut messages = vec![serde_json::json!({
        "role": "system",
        "content": req.system,
    })];

    for m in &req.messages {
        let role = match m.role {
            PromptRole::System => "system",
            PromptRole::User => "user",
            PromptRole::Assistant => "assistant",
        };
        messages.push(serde_json::json!({
            "role": role,
            "content": m.content,
        }));
    }

    serde_json::json!({
        "model": model,
        "messages": messages,
        "max_tokens": req.max_tokens,
    })
}

fn parse_response(resp: ApiResponse) -> Completion {
    let text = resp
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .unwrap_or_default();

    Completion {
        text,
        tokens: resp.usage.map(|u| u.total_tokens).unwrap_or(0),
    }
}

#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Deserialize)]
struct ApiMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiUsage {
    total_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::PromptMessage;

    #[test]
    fn request_body_prepends_system_message() {
        let req = CompletionRequest {
            system: "You are helpful.".to_string(),
            messages: vec![PromptMessage::user("hi")],
            max_tokens: 256,
        };
        let body = build_request_body(&req, "gpt-4o-mini");
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["role"], "user");
        assert_eq!(body["max_tokens"], 256);
    }
}
