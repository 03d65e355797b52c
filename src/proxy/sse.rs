// SSE (Server-Sent Events) handling
//
// Streams are relayed to the client untouched. Usage is read afterwards from
// the accumulated bytes: every `data:` line is parsed on its own and the last
// payload that reports non-zero usage wins. OpenAI streams put usage in the
// final chunk; Anthropic streams put it in `message_delta`.

use super::tokens::{extract_usage, TokenUsage};

/// Check if a response is SSE based on content-type header
pub fn is_sse_response(headers: &reqwest::header::HeaderMap) -> bool {
    headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.contains("text/event-stream"))
        .unwrap_or(false)
}

/// Payload of a `data:` line, or None for anything else
///
/// `[DONE]` and empty payloads are skipped.
pub fn parse_sse_data_line(line: &str) -> Option<&str> {
    let data = line.trim().strip_prefix("data:")?.trim();
    if data.is_empty() || data == "[DONE]" {
        return None;
    }
    Some(data)
}

/// Usage reported by a complete (or partial) SSE stream
pub fn extract_stream_usage(stream: &[u8]) -> TokenUsage {
    let text = String::from_utf8_lossy(stream);
    text.split('\n')
        .filter_map(parse_sse_data_line)
        .map(|data| extract_usage(data.as_bytes()))
        .filter(|usage| !usage.is_zero())
        .last()
        .unwrap_or_default()
}
