//! Result types produced by the analysis pipeline.
//!
//! [`PageResult`] is the per-page union that flows into aggregation. Its
//! serialisation is hand-written so the aggregation input is exactly what the
//! page stage produced: parsed JSON stays JSON, raw text stays a string, and
//! a failed parse is wrapped so the aggregating model can tell it apart.

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use serde_json::{json, Map, Value};

/// What page inference produced for one page.
#[derive(Debug, Clone, PartialEq)]
pub enum PageResult {
    /// A page schema was given and the answer parsed as JSON.
    Json(Value),
    /// No page schema; the model's text verbatim.
    Text(String),
    /// A page schema was given but the answer did not parse.
    Unparsed { raw: String },
}

impl PageResult {
    pub fn is_unparsed(&self) -> bool {
        matches!(self, Self::Unparsed { .. })
    }

    /// Short label for logs and progress output.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Json(_) => "json",
            Self::Text(_) => "text",
            Self::Unparsed { .. } => "unparsed",
        }
    }
}

impl Serialize for PageResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Json(value) => value.serialize(serializer),
            Self::Text(text) => serializer.serialize_str(text),
            Self::Unparsed { raw } => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("unparsed", &true)?;
                map.serialize_entry("raw", raw)?;
                map.end()
            }
        }
    }
}

/// One page's result together with its page number.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageExtraction {
    pub page_num: usize,
    pub result: PageResult,
}

/// The aggregation call's answer.
#[derive(Debug, Clone, PartialEq)]
pub enum FinalResult {
    /// A final schema was given and the answer parsed.
    Json(Value),
    /// No final schema; the model's text verbatim.
    Text(String),
}

/// Outcome of a successful analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisOutput {
    pub model: String,
    pub pages_processed: usize,
    pub result: FinalResult,
    pub elapsed_ms: u64,
    /// Per-page results in page order.
    pub pages: Vec<PageExtraction>,
    pub note: Option<String>,
}

impl AnalysisOutput {
    /// Response body: `{model, pagesProcessed, result|content, ms, note?, pages?}`.
    pub fn to_response(&self, include_pages: bool) -> Value {
        let mut body = Map::new();
        body.insert("model".into(), json!(self.model));
        body.insert("pagesProcessed".into(), json!(self.pages_processed));
        match &self.result {
            FinalResult::Json(value) => body.insert("result".into(), value.clone()),
            FinalResult::Text(text) => body.insert("content".into(), json!(text)),
        };
        body.insert("ms".into(), json!(self.elapsed_ms));
        if let Some(ref note) = self.note {
            body.insert("note".into(), json!(note));
        }
        if include_pages {
            body.insert("pages".into(), json!(self.pages));
        }
        Value::Object(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_results_serialise_verbatim() {
        let results = vec![
            PageResult::Json(json!({"total": 3})),
            PageResult::Text("Invoice #7".into()),
            PageResult::Unparsed {
                raw: "I could not find it".into(),
            },
        ];
        assert_eq!(
            serde_json::to_value(&results).unwrap(),
            json!([
                {"total": 3},
                "Invoice #7",
                {"unparsed": true, "raw": "I could not find it"}
            ])
        );
    }

    #[test]
    fn json_string_value_is_not_confused_with_text() {
        // Both serialise to a JSON string; the variant still records the origin.
        let parsed = PageResult::Json(json!("hello"));
        let text = PageResult::Text("hello".into());
        assert_eq!(
            serde_json::to_value(&parsed).unwrap(),
            serde_json::to_value(&text).unwrap()
        );
        assert_ne!(parsed.kind(), text.kind());
    }

    fn output(result: FinalResult) -> AnalysisOutput {
        AnalysisOutput {
            model: "gpt-4o-mini".into(),
            pages_processed: 2,
            result,
            elapsed_ms: 1234,
            pages: vec![PageExtraction {
                page_num: 1,
                result: PageResult::Text("a".into()),
            }],
            note: None,
        }
    }

    #[test]
    fn json_result_uses_result_key() {
        let body = output(FinalResult::Json(json!({"sum": 5}))).to_response(false);
        assert_eq!(
            body,
            json!({"model": "gpt-4o-mini", "pagesProcessed": 2, "result": {"sum": 5}, "ms": 1234})
        );
    }

    #[test]
    fn text_result_uses_content_key() {
        let body = output(FinalResult::Text("summary".into())).to_response(false);
        assert_eq!(body["content"], "summary");
        assert!(body.get("result").is_none());
        assert!(body.get("note").is_none());
    }

    #[test]
    fn debug_response_includes_pages_and_note() {
        let mut out = output(FinalResult::Text("x".into()));
        out.note = Some("1 page(s) returned non-JSON output".into());
        let body = out.to_response(true);
        assert_eq!(body["note"], "1 page(s) returned non-JSON output");
        assert_eq!(body["pages"], json!([{"pageNum": 1, "result": "a"}]));
    }
}
