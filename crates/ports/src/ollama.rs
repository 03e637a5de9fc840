//! Ollama-backed language and vision adapters.

use std::path::Path;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use magpie_core::config::OllamaConfig;

use crate::error::PortError;
use crate::traits::{Categorization, LanguageModel, SynthesisSource, VisionModel};

pub struct OllamaClient {
    client: reqwest::Client,
    url: String,
    model: String,
    vision_model: String,
    embedding_model: String,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    images: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl OllamaClient {
    pub fn new(config: &OllamaConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: config.url.clone(),
            model: config.model.clone(),
            vision_model: config.vision_model.clone(),
            embedding_model: config.embedding_model.clone(),
            temperature: config.temperature,
        }
    }

    async fn chat(&self, model: &str, messages: Vec<ChatMessage>) -> Result<String, PortError> {
        let url = format!("{}/api/chat", self.url);
        let body = json!({
            "model": model,
            "messages": messages,
            "stream": false,
            "options": { "temperature": self.temperature },
        });

        debug!(%url, model, "ollama chat request");
        let response = self.client.post(&url).json(&body).send().await?;

        let status = response.status().as_u16();
        if status == 429 {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            return Err(PortError::RateLimited { retry_after_secs });
        }
        if status != 200 {
            let body = response.text().await.unwrap_or_default();
            return Err(PortError::Api { status, body });
        }

        let resp: serde_json::Value = response.json().await?;
        resp["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| PortError::Parse("missing message.content".to_string()))
    }
}

/// Pull the first JSON object out of a model response that may be wrapped in
/// prose or a code fence.
fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in raw[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&raw[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

fn categorization_prompt(full_text: &str, image_descriptions: &[String]) -> String {
    let mut prompt = String::from(
        "Categorize this bookmarked content for a technical knowledge base.\n\
         Respond with a single JSON object with keys: main_category, \
         sub_category, item_name, description. Categories should be short \
         technical domain names; item_name a short filesystem-friendly slug; \
         description one or two sentences.\n\nContent:\n",
    );
    prompt.push_str(full_text);
    if !image_descriptions.is_empty() {
        prompt.push_str("\n\nAttached images:\n");
        for (i, desc) in image_descriptions.iter().enumerate() {
            prompt.push_str(&format!("{}. {}\n", i + 1, desc));
        }
    }
    prompt
}

#[async_trait]
impl LanguageModel for OllamaClient {
    async fn categorize(
        &self,
        full_text: &str,
        image_descriptions: &[String],
    ) -> Result<(Categorization, serde_json::Value), PortError> {
        let prompt = categorization_prompt(full_text, image_descriptions);
        let content = self
            .chat(
                &self.model,
                vec![ChatMessage {
                    role: "user",
                    content: prompt,
                    images: None,
                }],
            )
            .await?;

        let raw_json = extract_json_object(&content)
            .ok_or_else(|| PortError::Parse(format!("no JSON object in response: {content}")))?;
        let raw: serde_json::Value = serde_json::from_str(raw_json)
            .map_err(|e| PortError::Parse(format!("bad categorization JSON: {e}")))?;

        let field = |name: &str| -> Result<String, PortError> {
            raw.get(name)
                .and_then(serde_json::Value::as_str)
                .map(str::to_string)
                .filter(|s| !s.trim().is_empty())
                .ok_or_else(|| PortError::Parse(format!("categorization missing '{name}'")))
        };

        let categorization = Categorization {
            main_category: field("main_category")?,
            sub_category: field("sub_category")?,
            item_name: field("item_name")?,
            description: raw
                .get("description")
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default()
                .to_string(),
        };
        Ok((categorization, raw))
    }

    async fn synthesize(
        &self,
        main_category: &str,
        sub_category: &str,
        items: &[SynthesisSource],
    ) -> Result<String, PortError> {
        let mut prompt = format!(
            "Write a synthesis document in markdown for the knowledge-base \
             category '{main_category}/{sub_category}'. Identify common themes, \
             contrast approaches, and call out the most useful entries. \
             Source items:\n\n"
        );
        for item in items {
            prompt.push_str(&format!(
                "## {}\n{}\n{}\n\n",
                item.title, item.description, item.content
            ));
        }
        self.chat(
            &self.model,
            vec![ChatMessage {
                role: "user",
                content: prompt,
                images: None,
            }],
        )
        .await
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, PortError> {
        let url = format!("{}/api/embed", self.url);
        let response = self
            .client
            .post(&url)
            .json(&json!({ "model": self.embedding_model, "input": [text] }))
            .send()
            .await?;

        let status = response.status().as_u16();
        if status != 200 {
            let body = response.text().await.unwrap_or_default();
            return Err(PortError::Api { status, body });
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| PortError::Parse(format!("bad embed response: {e}")))?;
        parsed
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| PortError::Parse("empty embeddings array".to_string()))
    }
}

#[async_trait]
impl VisionModel for OllamaClient {
    async fn describe_image(&self, path: &Path) -> Result<String, PortError> {
        let bytes = tokio::fs::read(path).await?;
        let encoded = STANDARD.encode(&bytes);
        self.chat(
            &self.vision_model,
            vec![ChatMessage {
                role: "user",
                content: "Describe this image concisely for a knowledge-base entry. \
                          Focus on any text, diagrams or code visible."
                    .to_string(),
                images: Some(vec![encoded]),
            }],
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_fenced_json() {
        let raw = "Sure! Here you go:\n```json\n{\"main_category\": \"software\"}\n```";
        assert_eq!(
            extract_json_object(raw),
            Some("{\"main_category\": \"software\"}")
        );
    }

    #[test]
    fn extracts_nested_objects() {
        let raw = r#"prefix {"a": {"b": 1}, "c": "}"} suffix"#;
        let json = extract_json_object(raw).unwrap();
        let value: serde_json::Value = serde_json::from_str(json).unwrap();
        assert_eq!(value["a"]["b"], 1);
        assert_eq!(value["c"], "}");
    }

    #[test]
    fn no_object_returns_none() {
        assert_eq!(extract_json_object("I refuse to answer."), None);
    }

    #[test]
    fn prompt_includes_image_descriptions() {
        let prompt = categorization_prompt("some text", &["a diagram".to_string()]);
        assert!(prompt.contains("some text"));
        assert!(prompt.contains("1. a diagram"));

        let bare = categorization_prompt("text only", &[]);
        assert!(!bare.contains("Attached images"));
    }
}
