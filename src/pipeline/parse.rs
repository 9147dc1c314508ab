//! Lenient JSON recovery from model output.
//!
//! Models asked for "JSON only" still wrap answers in prose or markdown
//! fences now and then. [`parse_model_json`] tries a strict decode first and
//! then the span between the first `{` and the last `}`. It never fails
//! loudly: callers get [`ParseOutcome::Failed`] and decide what that means.

use serde_json::Value;

/// Result of [`parse_model_json`].
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    /// The text (or a `{…}` span of it) decoded as JSON.
    Parsed {
        value: Value,
        /// `true` when only the `{…}` span decoded.
        from_snippet: bool,
    },
    /// Neither the full text nor the span is JSON.
    Failed,
}

impl ParseOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Parsed { .. })
    }

    /// The decoded value, discarding how it was recovered.
    pub fn into_value(self) -> Option<Value> {
        match self {
            Self::Parsed { value, .. } => Some(value),
            Self::Failed => None,
        }
    }
}

/// Decode `raw` as JSON, falling back to its outermost `{…}` span.
pub fn parse_model_json(raw: &str) -> ParseOutcome {
    if let Ok(value) = serde_json::from_str::<Value>(raw) {
        return ParseOutcome::Parsed {
            value,
            from_snippet: false,
        };
    }

    let (Some(start), Some(end)) = (raw.find('{'), raw.rfind('}')) else {
        return ParseOutcome::Failed;
    };
    if end < start {
        return ParseOutcome::Failed;
    }

    match serde_json::from_str::<Value>(&raw[start..=end]) {
        Ok(value) => ParseOutcome::Parsed {
            value,
            from_snippet: true,
        },
        Err(_) => ParseOutcome::Failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strict_json_is_not_a_snippet() {
        let value = json!({"total": 12.5, "items": ["a", "b"]});
        let raw = serde_json::to_string(&value).unwrap();
        assert_eq!(
            parse_model_json(&raw),
            ParseOutcome::Parsed {
                value,
                from_snippet: false
            }
        );
    }

    #[test]
    fn recovers_object_from_surrounding_noise() {
        assert_eq!(
            parse_model_json("noise{\"a\":1}trailing"),
            ParseOutcome::Parsed {
                value: json!({"a": 1}),
                from_snippet: true
            }
        );
    }

    #[test]
    fn recovers_from_markdown_fence() {
        let raw = "```json\n{\"invoice\": \"INV-7\"}\n```";
        let outcome = parse_model_json(raw);
        assert_eq!(outcome.into_value(), Some(json!({"invoice": "INV-7"})));
    }

    #[test]
    fn plain_prose_fails() {
        assert_eq!(parse_model_json("not json at all"), ParseOutcome::Failed);
    }

    #[test]
    fn reversed_braces_fail() {
        assert_eq!(parse_model_json("} oops {"), ParseOutcome::Failed);
    }

    #[test]
    fn unbalanced_span_fails() {
        assert!(!parse_model_json("here: {\"a\": {\"b\": 1} and more").is_ok());
    }

    #[test]
    fn empty_input_fails() {
        assert_eq!(parse_model_json(""), ParseOutcome::Failed);
    }

    #[test]
    fn top_level_array_parses_directly() {
        assert_eq!(
            parse_model_json("[1, 2]").into_value(),
            Some(json!([1, 2]))
        );
    }
}
