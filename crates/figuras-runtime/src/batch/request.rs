//! Batch request lines for the `/v1/responses` endpoint.

use figuras_core::chunk::Chunk;
use figuras_core::span::char_slice;
use figuras_core::Label;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use super::{BatchError, CustomId};

/// Instruction sent as the developer message of every request.
pub const DEVELOPER_PROMPT: &str =
    "Você é um linguista que analisa figuras de linguagem em discursos no Senado.";

/// Text placed before the speech in the user message.
pub const USER_PREFIX: &str = "Analise a seguinte fala:\n\n";

/// Name of the structured-output format.
pub const SCHEMA_NAME: &str = "FigurasLinguagem";

const REASONING_EFFORTS: &[&str] = &["minimal", "low", "medium", "high"];
const VERBOSITIES: &[&str] = &["low", "medium", "high"];

/// Parameters of the batch requests.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BatchConfig {
    /// Model name
    pub model: String,

    /// Reasoning effort (`minimal`, `low`, `medium`, `high`)
    pub reasoning_effort: String,

    /// Output verbosity (`low`, `medium`, `high`)
    pub verbosity: String,

    /// Truncate each chunk's text to this many characters
    pub max_chars: Option<usize>,

    /// Completion window requested when the batch is created
    pub completion_window: String,

    /// Endpoint every line targets
    pub endpoint: String,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            model: "gpt-5".to_string(),
            reasoning_effort: "medium".to_string(),
            verbosity: "medium".to_string(),
            max_chars: None,
            completion_window: "24h".to_string(),
            endpoint: "/v1/responses".to_string(),
        }
    }
}

impl BatchConfig {
    pub fn validate(&self) -> Result<(), BatchError> {
        if self.model.trim().is_empty() {
            return Err(BatchError::ValidationError("model must not be empty".to_string()));
        }
        if !REASONING_EFFORTS.contains(&self.reasoning_effort.as_str()) {
            return Err(BatchError::ValidationError(format!(
                "unknown reasoning effort '{}'",
                self.reasoning_effort
            )));
        }
        if !VERBOSITIES.contains(&self.verbosity.as_str()) {
            return Err(BatchError::ValidationError(format!(
                "unknown verbosity '{}'",
                self.verbosity
            )));
        }
        if self.max_chars == Some(0) {
            return Err(BatchError::ValidationError(
                "max_chars must be greater than zero".to_string(),
            ));
        }
        if !self.endpoint.starts_with('/') {
            return Err(BatchError::ValidationError(format!(
                "endpoint '{}' must be a path",
                self.endpoint
            )));
        }
        Ok(())
    }
}

/// One line of the batch input file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestLine {
    pub custom_id: String,
    pub method: String,
    pub url: String,
    pub body: Value,
}

/// Structured-output format the annotator must follow.
///
/// The label enum is generated from [`Label::annotatable`], so the schema
/// and the parser can never disagree on the label set.
pub fn response_schema() -> Value {
    let labels: Vec<&str> = Label::annotatable().map(|l| l.as_str()).collect();

    json!({
        "type": "json_schema",
        "name": SCHEMA_NAME,
        "strict": true,
        "schema": {
            "type": "object",
            "properties": {
                "spans": {
                    "type": "array",
                    "title": "Spans",
                    "items": { "$ref": "#/$defs/Span" }
                }
            },
            "required": ["spans"],
            "additionalProperties": false,
            "$defs": {
                "Span": {
                    "type": "object",
                    "title": "Span",
                    "properties": {
                        "label": { "type": "string", "title": "Label", "enum": labels },
                        "start_char": { "type": "integer", "title": "Start Char", "minimum": 0 },
                        "end_char": { "type": "integer", "title": "End Char", "minimum": 0 },
                        "text": { "type": "string", "title": "Text" },
                        "rationale": {
                            "anyOf": [{ "type": "string" }, { "type": "null" }],
                            "default": null,
                            "title": "Rationale"
                        },
                        "cues": {
                            "type": "array",
                            "title": "Cues",
                            "items": { "type": "string" },
                            "default": []
                        },
                        "confidence": {
                            "type": "number",
                            "title": "Confidence",
                            "minimum": 0,
                            "maximum": 1
                        }
                    },
                    "required": ["label", "start_char", "end_char", "text", "rationale", "cues", "confidence"],
                    "additionalProperties": false
                }
            }
        }
    })
}

/// Builds request lines from chunks.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    config: BatchConfig,
    schema: Value,
}

impl RequestBuilder {
    pub fn new(config: BatchConfig) -> Self {
        Self {
            config,
            schema: response_schema(),
        }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Text actually sent for `text`, after optional truncation.
    pub fn request_text<'a>(&self, text: &'a str) -> &'a str {
        match self.config.max_chars {
            Some(max) => char_slice(text, 0, max).unwrap_or(text),
            None => text,
        }
    }

    /// Request line for one piece of text.
    pub fn request(&self, custom_id: &CustomId, text: &str) -> RequestLine {
        let body = json!({
            "model": self.config.model,
            "input": [
                {
                    "role": "developer",
                    "content": [{ "type": "input_text", "text": DEVELOPER_PROMPT }]
                },
                {
                    "role": "user",
                    "content": [{
                        "type": "input_text",
                        "text": format!("{}{}", USER_PREFIX, self.request_text(text))
                    }]
                }
            ],
            "text": {
                "format": self.schema,
                "verbosity": self.config.verbosity
            },
            "reasoning": { "effort": self.config.reasoning_effort },
            "tools": [],
            "store": true
        });

        RequestLine {
            custom_id: custom_id.to_string(),
            method: "POST".to_string(),
            url: self.config.endpoint.clone(),
            body,
        }
    }

    /// Request lines for every chunk of one document.
    ///
    /// A document with a single chunk is addressed by its id alone.
    pub fn document_requests(&self, chunks: &[Chunk]) -> Vec<RequestLine> {
        let whole = chunks.len() == 1;
        let lines: Vec<RequestLine> = chunks
            .iter()
            .map(|chunk| {
                let id = if whole {
                    CustomId::whole(&chunk.document_id)
                } else {
                    CustomId::chunk(&chunk.document_id, chunk.index)
                };
                self.request(&id, &chunk.text)
            })
            .collect();

        if let Some(first) = chunks.first() {
            debug!(document_id = %first.document_id, requests = lines.len(), "Built batch requests");
        }
        lines
    }
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self::new(BatchConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figuras_core::Chunker;

    #[test]
    fn test_default_config_valid() {
        let config = BatchConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.model, "gpt-5");
        assert_eq!(config.completion_window, "24h");
    }

    #[test]
    fn test_config_validation() {
        let config = BatchConfig {
            reasoning_effort: "extreme".to_string(),
            ..BatchConfig::default()
        };
        assert!(matches!(config.validate(), Err(BatchError::ValidationError(_))));

        let config = BatchConfig {
            max_chars: Some(0),
            ..BatchConfig::default()
        };
        assert!(config.validate().is_err());

        let config = BatchConfig {
            model: " ".to_string(),
            ..BatchConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_schema_labels() {
        let schema = response_schema();
        let labels = schema["schema"]["$defs"]["Span"]["properties"]["label"]["enum"]
            .as_array()
            .unwrap();
        assert_eq!(labels.len(), 16);
        assert!(labels.iter().any(|l| l == "pergunta_retórica"));
        assert!(!labels.iter().any(|l| l == "sarcasmo"));
        assert_eq!(schema["name"], SCHEMA_NAME);
        assert_eq!(schema["strict"], true);
    }

    #[test]
    fn test_request_line_shape() {
        let builder = RequestBuilder::default();
        let line = builder.request(&CustomId::whole("42"), "Senhor Presidente.");

        assert_eq!(line.custom_id, "disc-42");
        assert_eq!(line.method, "POST");
        assert_eq!(line.url, "/v1/responses");
        assert_eq!(line.body["model"], "gpt-5");
        assert_eq!(line.body["input"][0]["role"], "developer");
        assert_eq!(
            line.body["input"][1]["content"][0]["text"],
            "Analise a seguinte fala:\n\nSenhor Presidente."
        );
        assert_eq!(line.body["text"]["verbosity"], "medium");
        assert_eq!(line.body["reasoning"]["effort"], "medium");
        assert_eq!(line.body["store"], true);
        assert!(line.body["tools"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_truncation_counts_characters() {
        let builder = RequestBuilder::new(BatchConfig {
            max_chars: Some(3),
            ..BatchConfig::default()
        });
        assert_eq!(builder.request_text("ação política"), "açã");
        assert_eq!(builder.request_text("pá"), "pá");
    }

    #[test]
    fn test_document_requests_ids() {
        let builder = RequestBuilder::default();

        let single = Chunker::new(100, 10).split("7", "Discurso curto.");
        let lines = builder.document_requests(&single);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].custom_id, "disc-7");

        let text = "palavra ".repeat(30);
        let many = Chunker::new(50, 10).split("7", &text);
        let lines = builder.document_requests(&many);
        assert!(lines.len() > 1);
        assert_eq!(lines[0].custom_id, "disc-7-c0");
        assert_eq!(lines[1].custom_id, "disc-7-c1");
    }
}
