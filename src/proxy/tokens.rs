//! Token usage extraction from upstream response bodies
//!
//! Both OpenAI-style (`prompt_tokens` / `completion_tokens`) and
//! Anthropic-style (`input_tokens` / `output_tokens`) counters are read from
//! the top-level `usage` object and summed, so either schema works.

use serde_json::Value;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    pub fn is_zero(&self) -> bool {
        self.input_tokens == 0 && self.output_tokens == 0
    }
}

fn counter(usage: &Value, field: &str) -> u64 {
    usage.get(field).and_then(Value::as_u64).unwrap_or(0)
}

/// Usage from a JSON body. Anything unparseable counts as zero.
pub fn extract_usage(body: &[u8]) -> TokenUsage {
    let Ok(json) = serde_json::from_slice::<Value>(body) else {
        return TokenUsage::default();
    };
    let Some(usage) = json.get("usage").filter(|u| u.is_object()) else {
        return TokenUsage::default();
    };

    TokenUsage {
        input_tokens: counter(usage, "prompt_tokens") + counter(usage, "input_tokens"),
        output_tokens: counter(usage, "completion_tokens") + counter(usage, "output_tokens"),
    }
}

/// Best-effort `model` field of a request body; empty when absent
pub fn request_model(body: &[u8]) -> String {
    serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|json| json.get("model")?.as_str().map(String::from))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openai_style_usage() {
        let body = br#"{"id":"x","usage":{"prompt_tokens":12,"completion_tokens":34,"total_tokens":46}}"#;
        assert_eq!(
            extract_usage(body),
            TokenUsage {
                input_tokens: 12,
                output_tokens: 34
            }
        );
    }

    #[test]
    fn test_anthropic_style_usage() {
        let body = br#"{"type":"message","usage":{"input_tokens":100,"output_tokens":7}}"#;
        let usage = extract_usage(body);
        assert_eq!(usage.input_tokens, 100);
        assert_eq!(usage.output_tokens, 7);
        assert_eq!(usage.total(), 107);
    }

    #[test]
    fn test_malformed_body_is_zero() {
        assert!(extract_usage(b"not json").is_zero());
        assert!(extract_usage(br#"{"usage":null}"#).is_zero());
        assert!(extract_usage(br#"{"choices":[]}"#).is_zero());
    }

    #[test]
    fn test_request_model() {
        assert_eq!(request_model(br#"{"model":"gpt-4o","messages":[]}"#), "gpt-4o");
        assert_eq!(request_model(br#"{"messages":[]}"#), "");
        assert_eq!(request_model(b""), "");
    }
}
