//! Batch output parsing.
//!
//! Every output line carries a `custom_id` and a `response` whose
//! structured payload is `{"spans": [...]}` in chunk-local coordinates.
//! A line that cannot be understood becomes a [`FailedLine`]; one bad line
//! never aborts the rest of the file. Spans are decoded one by one, so a
//! malformed span is kept as an error at its position and its siblings
//! still go through.

use figuras_core::{LocalSpan, SpanError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::BufRead;
use tracing::{debug, warn};

use super::{BatchError, CustomId};

/// Spans returned for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub custom_id: CustomId,

    /// Spans in the annotator's order; `Err` for spans that did not decode
    pub spans: Vec<Result<LocalSpan, SpanError>>,
}

impl Annotation {
    /// An annotation whose spans all decoded.
    pub fn new(custom_id: CustomId, spans: Vec<LocalSpan>) -> Self {
        Self {
            custom_id,
            spans: spans.into_iter().map(Ok).collect(),
        }
    }

    /// Spans that decoded.
    pub fn decoded(&self) -> impl Iterator<Item = &LocalSpan> {
        self.spans.iter().filter_map(|s| s.as_ref().ok())
    }
}

/// An output line that produced no spans.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedLine {
    /// 1-based line number in the output file
    pub line: usize,

    /// Raw `custom_id`, when the line had one
    pub custom_id: Option<String>,

    pub reason: String,
}

/// Result of parsing one output line.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedLine {
    Annotated(Annotation),
    Failed(FailedLine),
}

impl ParsedLine {
    pub fn is_annotated(&self) -> bool {
        matches!(self, ParsedLine::Annotated(_))
    }
}

#[derive(Deserialize)]
struct Payload {
    spans: Vec<Value>,
}

fn decode_span(value: Value) -> Result<LocalSpan, SpanError> {
    serde_json::from_value(value).map_err(|e| SpanError::Undecodable(e.to_string()))
}

/// Parse one output line. `line` is its 1-based position, used in reports.
pub fn parse_line(line: usize, raw: &str) -> ParsedLine {
    let fail = |custom_id: Option<String>, reason: String| {
        ParsedLine::Failed(FailedLine {
            line,
            custom_id,
            reason,
        })
    };

    let value: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => return fail(None, format!("not JSON: {}", e)),
    };

    let raw_id = match value.get("custom_id").and_then(Value::as_str) {
        Some(id) => id.to_string(),
        None => return fail(None, "missing custom_id".to_string()),
    };

    let custom_id: CustomId = match raw_id.parse() {
        Ok(id) => id,
        Err(e) => return fail(Some(raw_id), e.to_string()),
    };

    if let Some(error) = value.get("error").filter(|e| !e.is_null()) {
        return fail(Some(raw_id), format!("request failed: {}", error));
    }

    let response = match value.get("response").filter(|r| !r.is_null()) {
        Some(r) => r,
        None => return fail(Some(raw_id), "missing response".to_string()),
    };

    if let Some(status) = response.get("status_code").and_then(Value::as_u64) {
        if status != 200 {
            return fail(Some(raw_id), format!("HTTP status {}", status));
        }
    }

    let body = response.get("body").unwrap_or(response);
    match extract_payload(body) {
        Ok(payload) => match serde_json::from_value::<Payload>(payload) {
            Ok(payload) => ParsedLine::Annotated(Annotation {
                custom_id,
                spans: payload.spans.into_iter().map(decode_span).collect(),
            }),
            Err(e) => fail(Some(raw_id), format!("invalid spans payload: {}", e)),
        },
        Err(reason) => fail(Some(raw_id), reason),
    }
}

/// Find the structured payload among the response's output items.
///
/// Items without content (reasoning summaries) are skipped; the first
/// `output_json` or `output_text` content block wins.
fn extract_payload(body: &Value) -> Result<Value, String> {
    let output = body
        .get("output")
        .and_then(Value::as_array)
        .ok_or_else(|| "response has no output".to_string())?;

    for item in output {
        let Some(content) = item.get("content").and_then(Value::as_array) else {
            continue;
        };

        for block in content {
            match block.get("type").and_then(Value::as_str) {
                Some("output_json") => {
                    return block
                        .get("json")
                        .cloned()
                        .ok_or_else(|| "output_json block without json".to_string());
                }
                Some("output_text") => {
                    let text = block
                        .get("text")
                        .and_then(Value::as_str)
                        .ok_or_else(|| "output_text block without text".to_string())?;
                    return serde_json::from_str(text)
                        .map_err(|e| format!("output_text is not JSON: {}", e));
                }
                _ => {}
            }
        }
    }

    Err("no output_json or output_text content".to_string())
}

/// Parse a whole output file. Blank lines are skipped.
///
/// Only I/O failures are errors; malformed lines are returned as
/// [`ParsedLine::Failed`].
pub fn parse_output<R: BufRead>(reader: R) -> Result<Vec<ParsedLine>, BatchError> {
    let mut parsed = Vec::new();

    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let entry = parse_line(i + 1, &line);
        if let ParsedLine::Failed(failed) = &entry {
            warn!(
                line = failed.line,
                custom_id = failed.custom_id.as_deref().unwrap_or("-"),
                reason = %failed.reason,
                "Unusable batch output line"
            );
        }
        parsed.push(entry);
    }

    debug!(
        lines = parsed.len(),
        annotated = parsed.iter().filter(|p| p.is_annotated()).count(),
        "Parsed batch output"
    );

    Ok(parsed)
}

/// Split parsed lines into annotations and failures.
pub fn partition(lines: Vec<ParsedLine>) -> (Vec<Annotation>, Vec<FailedLine>) {
    let mut annotations = Vec::new();
    let mut failures = Vec::new();
    for line in lines {
        match line {
            ParsedLine::Annotated(a) => annotations.push(a),
            ParsedLine::Failed(f) => failures.push(f),
        }
    }
    (annotations, failures)
}

#[cfg(test)]
mod tests {
    use super::*;
    use figuras_core::Label;
    use serde_json::json;

    fn span_json() -> Value {
        json!({
            "label": "metafora",
            "start_char": 4,
            "end_char": 12,
            "text": "mar de lama",
            "rationale": null,
            "cues": ["imagem"],
            "confidence": 0.8
        })
    }

    #[test]
    fn test_output_json_shape() {
        let line = json!({
            "custom_id": "disc-10-c1",
            "response": {
                "output": [
                    { "type": "message", "content": [
                        { "type": "output_json", "json": { "spans": [span_json()] } }
                    ]}
                ]
            }
        });

        match parse_line(1, &line.to_string()) {
            ParsedLine::Annotated(a) => {
                assert_eq!(a.custom_id, CustomId::chunk("10", 1));
                let spans: Vec<&LocalSpan> = a.decoded().collect();
                assert_eq!(spans.len(), 1);
                assert_eq!(spans[0].label, Label::Metafora);
                assert!(spans[0].cues.contains("imagem"));
            }
            other => panic!("expected annotation, got {:?}", other),
        }
    }

    #[test]
    fn test_output_text_under_body_after_reasoning() {
        let payload = json!({ "spans": [span_json()] }).to_string();
        let line = json!({
            "custom_id": "disc-10",
            "response": {
                "status_code": 200,
                "body": {
                    "output": [
                        { "type": "reasoning", "summary": [] },
                        { "type": "message", "content": [
                            { "type": "output_text", "text": payload }
                        ]}
                    ]
                }
            },
            "error": null
        });

        match parse_line(1, &line.to_string()) {
            ParsedLine::Annotated(a) => {
                assert_eq!(a.custom_id, CustomId::whole("10"));
                assert_eq!(a.decoded().next().map(|s| s.start_char), Some(4));
            }
            other => panic!("expected annotation, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_spans_is_annotated() {
        let line = json!({
            "custom_id": "disc-3",
            "response": { "output": [{ "content": [
                { "type": "output_json", "json": { "spans": [] } }
            ]}]}
        });
        assert!(parse_line(1, &line.to_string()).is_annotated());
    }

    #[test]
    fn test_failures_keep_context() {
        let cases = [
            ("{not json", None),
            (r#"{"response": {}}"#, None),
            (r#"{"custom_id": "x-1", "response": {}}"#, Some("x-1")),
            (
                r#"{"custom_id": "disc-1", "response": null, "error": {"code": "rate_limit"}}"#,
                Some("disc-1"),
            ),
            (
                r#"{"custom_id": "disc-1", "response": {"status_code": 500, "body": {}}}"#,
                Some("disc-1"),
            ),
            (
                r#"{"custom_id": "disc-1", "response": {"output": [{"content": [{"type": "refusal"}]}]}}"#,
                Some("disc-1"),
            ),
            (
                r#"{"custom_id": "disc-1", "response": {"output": [{"content": [{"type": "output_text", "text": "não sei"}]}]}}"#,
                Some("disc-1"),
            ),
        ];

        for (raw, expected_id) in cases {
            match parse_line(7, raw) {
                ParsedLine::Failed(f) => {
                    assert_eq!(f.line, 7);
                    assert_eq!(f.custom_id.as_deref(), expected_id, "line: {}", raw);
                }
                other => panic!("expected failure for {}, got {:?}", raw, other),
            }
        }
    }

    #[test]
    fn test_bad_span_keeps_siblings() {
        let mut unaccented = span_json();
        unaccented["label"] = json!("pergunta_retorica");
        let mut unknown = span_json();
        unknown["label"] = json!("zeugma");
        let line = json!({
            "custom_id": "disc-5",
            "response": { "output": [{ "content": [
                { "type": "output_json", "json": { "spans": [span_json(), unknown, unaccented] } }
            ]}]}
        });

        match parse_line(1, &line.to_string()) {
            ParsedLine::Annotated(a) => {
                assert_eq!(a.spans.len(), 3);
                assert_eq!(a.spans[0].as_ref().map(|s| s.label), Ok(Label::Metafora));
                assert!(matches!(a.spans[1], Err(SpanError::Undecodable(_))));
                assert_eq!(
                    a.spans[2].as_ref().map(|s| s.label),
                    Ok(Label::PerguntaRetorica)
                );
            }
            other => panic!("expected annotation, got {:?}", other),
        }
    }

    #[test]
    fn test_spans_not_a_list_fails_line() {
        let line = json!({
            "custom_id": "disc-5",
            "response": { "output": [{ "content": [
                { "type": "output_json", "json": { "spans": "nenhuma" } }
            ]}]}
        });
        assert!(!parse_line(1, &line.to_string()).is_annotated());
    }

    #[test]
    fn test_parse_output_skips_blank_and_keeps_going() {
        let good = json!({
            "custom_id": "disc-1",
            "response": { "output": [{ "content": [
                { "type": "output_json", "json": { "spans": [span_json()] } }
            ]}]}
        });
        let input = format!("{}\n\ngarbage\n{}\n", good, good);

        let parsed = parse_output(input.as_bytes()).unwrap();
        assert_eq!(parsed.len(), 3);

        let (annotations, failures) = partition(parsed);
        assert_eq!(annotations.len(), 2);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].line, 3);
    }
}
