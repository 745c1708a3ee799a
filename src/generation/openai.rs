use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use super::prompt::{build_prompt, parse_script, SYSTEM_PROMPT};
use super::{ContentGenerator, GenerationError, LearnerState, Script};
use crate::config::GenerationConfig;
use crate::graph::Entity;

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Script generator backed by an OpenAI-compatible chat completions endpoint.
///
/// One call is one attempt; wrap it in a `RetryingGenerator` for retries.
pub struct ChatScriptGenerator {
    client: Client,
    api_key: String,
    endpoint: String,
    model: String,
    temperature: f32,
}

fn request_error(e: reqwest::Error) -> GenerationError {
    if e.is_timeout() {
        GenerationError::Timeout
    } else {
        GenerationError::Request(e.to_string())
    }
}

impl ChatScriptGenerator {
    pub fn new(config: &GenerationConfig, api_key: String) -> Result<Self, GenerationError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| GenerationError::Request(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }

    async fn complete(&self, prompt: &str) -> Result<String, GenerationError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage { role: "system", content: SYSTEM_PROMPT },
                ChatMessage { role: "user", content: prompt },
            ],
            temperature: self.temperature,
            response_format: ResponseFormat { kind: "json_object" },
        };

        let start = std::time::Instant::now();
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(GenerationError::RateLimited);
        }
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(GenerationError::Server {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::Malformed(format!("Failed to parse response: {}", e)))?;
        log::debug!("Chat completion took {:?}", start.elapsed());

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| GenerationError::Malformed("response has no message content".to_string()))
    }
}

#[async_trait]
impl ContentGenerator for ChatScriptGenerator {
    async fn generate_script(
        &self,
        node: &Entity,
        objective: &str,
        learner_state: &LearnerState,
    ) -> Result<Script, GenerationError> {
        let prompt = build_prompt(node, objective, learner_state);
        let content = self.complete(&prompt).await?;
        parse_script(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::EntityType;
    use crate::store::testing::entity;

    fn config_for(server: &mockito::Server) -> GenerationConfig {
        GenerationConfig {
            base_url: format!("{}/v1/", server.url()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_generates_script_from_completion() {
        let mut server = mockito::Server::new_async().await;
        let body = serde_json::json!({
            "choices": [{
                "message": {
                    "content": "{\"guidance\": \"Recall easy runs\", \"presentation\": \"Zones split effort\", \"feedback\": \"Which zone is easy?\"}"
                }
            }]
        });
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_header("authorization", "Bearer test-key")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
            .create_async()
            .await;

        let generator = ChatScriptGenerator::new(&config_for(&server), "test-key".to_string()).unwrap();
        let node = entity("Heart Rate Zones", EntityType::KnowledgePoint);
        let script = generator
            .generate_script(&node, "Train by heart rate", &LearnerState::new())
            .await
            .unwrap();

        assert_eq!(script.guidance, "Recall easy runs");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_status_codes_map_to_errors() {
        let mut server = mockito::Server::new_async().await;
        let _limited = server
            .mock("POST", "/v1/chat/completions")
            .with_status(429)
            .create_async()
            .await;

        let generator = ChatScriptGenerator::new(&config_for(&server), "k".to_string()).unwrap();
        let node = entity("Heart Rate Zones", EntityType::KnowledgePoint);
        let err = generator
            .generate_script(&node, "objective", &LearnerState::new())
            .await
            .unwrap_err();
        assert_eq!(err, GenerationError::RateLimited);

        let mut down_server = mockito::Server::new_async().await;
        let _down = down_server
            .mock("POST", "/v1/chat/completions")
            .with_status(503)
            .with_body("overloaded")
            .create_async()
            .await;
        let generator = ChatScriptGenerator::new(&config_for(&down_server), "k".to_string()).unwrap();
        let err = generator
            .generate_script(&node, "objective", &LearnerState::new())
            .await
            .unwrap_err();
        assert_eq!(err, GenerationError::Server { status: 503, body: "overloaded".to_string() });
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_prose_completion_is_malformed() {
        let mut server = mockito::Server::new_async().await;
        let body = serde_json::json!({"choices": [{"message": {"content": "Sure! Here is a script."}}]});
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_body(body.to_string())
            .create_async()
            .await;

        let generator = ChatScriptGenerator::new(&config_for(&server), "k".to_string()).unwrap();
        let node = entity("Heart Rate Zones", EntityType::KnowledgePoint);
        let err = generator
            .generate_script(&node, "objective", &LearnerState::new())
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::Malformed(_)));
    }
}
