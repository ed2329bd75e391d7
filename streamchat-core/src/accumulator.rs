//! Incremental reconstruction of the structured reply.
//!
//! Every delta is appended to a text buffer and the whole buffer is parsed
//! again. Partial JSON is simply "not yet": the caller keeps showing raw text
//! until the first parse that yields an object with a non-empty `analysis`
//! and a `sections` array.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::model::StructuredPayload;

static OPENING_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^```[A-Za-z0-9_+-]*[ \t]*\r?\n?").expect("static regex"));
static CLOSING_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\r?\n?[ \t]*```$").expect("static regex"));

/// What the accumulator concluded after the latest delta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    /// Not parseable yet; display the raw buffer.
    Incomplete(String),
    /// First qualifying parse of this stream.
    Complete(StructuredPayload),
    /// A result was already captured; the delta changes nothing visible.
    Settled,
}

#[derive(Debug, Default)]
pub struct JsonAccumulator {
    buffer: String,
    deltas: usize,
    captured: Option<StructuredPayload>,
}

impl JsonAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, delta: &str) -> Progress {
        self.buffer.push_str(delta);
        self.deltas += 1;
        if self.captured.is_some() {
            return Progress::Settled;
        }
        match parse_structured(&self.buffer) {
            Some(payload) => {
                self.captured = Some(payload.clone());
                Progress::Complete(payload)
            }
            None => Progress::Incomplete(self.buffer.clone()),
        }
    }

    pub fn raw(&self) -> &str {
        &self.buffer
    }

    pub fn deltas(&self) -> usize {
        self.deltas
    }

    pub fn captured(&self) -> Option<&StructuredPayload> {
        self.captured.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Final state of the stream: the captured payload if any, else raw text.
    pub fn into_result(self) -> Result<StructuredPayload, String> {
        self.captured.ok_or(self.buffer)
    }
}

/// Remove a surrounding code fence (with or without a language tag).
/// An unterminated opening fence is removed on its own.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") {
        return trimmed;
    }
    let body = match OPENING_FENCE.find(trimmed) {
        Some(m) => &trimmed[m.end()..],
        None => trimmed,
    };
    let body = match CLOSING_FENCE.find(body) {
        Some(m) => &body[..m.start()],
        None => body,
    };
    body.trim()
}

/// One full parse attempt over the accumulated text.
pub fn parse_structured(text: &str) -> Option<StructuredPayload> {
    let body = strip_code_fence(text);
    if body.is_empty() {
        return None;
    }
    let value = serde_json::from_str::<Value>(body).ok()?;
    if !has_required_fields(&value) {
        return None;
    }
    match StructuredPayload::deserialize(&value) {
        Ok(payload) => Some(payload),
        Err(e) => {
            tracing::trace!(error = %e, "reply object does not fit the structured shape");
            None
        }
    }
}

fn has_required_fields(value: &Value) -> bool {
    value
        .get("analysis")
        .and_then(Value::as_str)
        .is_some_and(|a| !a.is_empty())
        && value.get("sections").is_some_and(Value::is_array)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ImportanceLevel;

    const DOC: &str = r#"{"analysis":"√muh + adbhuta","sections":[{"title":"Visual Metaphor","icon":"image","content":"mist over a river"},{"title":"Hidden Threads","icon":"thread","items":["one","two"]}],"closing":"feet on earth","authentic_response":"Stay with it.","resonance_score":81}"#;

    #[test]
    fn two_chunk_scenario_reports_incomplete_then_complete() {
        let mut acc = JsonAccumulator::new();
        assert_eq!(
            acc.push("{\"analysis\":\"a\","),
            Progress::Incomplete("{\"analysis\":\"a\",".into())
        );
        match acc.push("\"sections\":[]}") {
            Progress::Complete(p) => {
                assert_eq!(p.analysis, "a");
                assert_eq!(p.sections, Some(vec![]));
            }
            other => panic!("expected Complete, got {other:?}"),
        }
    }

    #[test]
    fn complete_exactly_once_for_every_chunking() {
        let expected = parse_structured(DOC).unwrap();
        for size in 1..=DOC.len() {
            let mut acc = JsonAccumulator::new();
            let mut completes = 0;
            let mut buf = String::new();
            let mut chunk = String::new();
            for ch in DOC.chars() {
                chunk.push(ch);
                if chunk.len() >= size {
                    buf.push_str(&chunk);
                    match acc.push(&chunk) {
                        Progress::Complete(p) => {
                            completes += 1;
                            assert_eq!(buf, DOC, "complete before full text at size {size}");
                            assert_eq!(p, expected);
                        }
                        Progress::Incomplete(raw) => assert_eq!(raw, buf),
                        Progress::Settled => panic!("settled before completion"),
                    }
                    chunk.clear();
                }
            }
            if !chunk.is_empty() && matches!(acc.push(&chunk), Progress::Complete(_)) {
                completes += 1;
            }
            assert_eq!(completes, 1, "chunk size {size}");
            assert_eq!(acc.captured(), Some(&expected));
        }
    }

    #[test]
    fn trailing_text_after_completion_is_settled() {
        let mut acc = JsonAccumulator::new();
        assert!(matches!(acc.push(DOC), Progress::Complete(_)));
        assert_eq!(acc.push("\n"), Progress::Settled);
        assert_eq!(acc.push(" trailing words"), Progress::Settled);
        assert_eq!(acc.deltas(), 3);
        assert!(acc.into_result().is_ok());
    }

    #[test]
    fn plain_text_never_completes_and_falls_back_to_concatenation() {
        let mut acc = JsonAccumulator::new();
        assert_eq!(acc.push("hello "), Progress::Incomplete("hello ".into()));
        assert_eq!(acc.push("world"), Progress::Incomplete("hello world".into()));
        assert_eq!(acc.into_result(), Err("hello world".to_string()));
    }

    #[test]
    fn valid_json_without_required_fields_stays_incomplete() {
        let mut acc = JsonAccumulator::new();
        assert!(matches!(acc.push("\"a bare string\""), Progress::Incomplete(_)));
        let mut acc = JsonAccumulator::new();
        assert!(matches!(acc.push(r#"{"analysis":"only"}"#), Progress::Incomplete(_)));
    }

    #[test]
    fn empty_analysis_never_completes() {
        let mut acc = JsonAccumulator::new();
        let doc = r#"{"analysis":"","sections":[]}"#;
        assert_eq!(acc.push(doc), Progress::Incomplete(doc.into()));
        assert_eq!(acc.into_result(), Err(doc.to_string()));
    }

    #[test]
    fn required_fields_must_have_the_right_types() {
        assert!(parse_structured(r#"{"analysis":"a","sections":[]}"#).is_some());
        assert!(parse_structured(r#"{"sections":[]}"#).is_none());
        assert!(parse_structured(r#"{"analysis":3,"sections":[]}"#).is_none());
        assert!(parse_structured(r#"{"analysis":"a","sections":null}"#).is_none());
        assert!(parse_structured(r#"{"analysis":"a","sections":{}}"#).is_none());
        assert!(parse_structured(r#"["analysis","sections"]"#).is_none());
    }

    #[test]
    fn fields_are_copied_without_rewriting() {
        let p = parse_structured(
            r#"{"analysis":"  √vid + śānta  ","sections":[{"title":" Hidden Threads ","icon":"thread","items":[" one ","two"]},{"title":"Vedic View","content":"frame "}],"closing":" breathe","meta_awareness":"","resonance_score":1,"importance_level":"Long"}"#,
        )
        .unwrap();
        assert_eq!(p.analysis, "  √vid + śānta  ");
        let sections = p.sections.unwrap();
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].title, " Hidden Threads ");
        assert_eq!(
            sections[0].items.as_deref(),
            Some(&[" one ".to_string(), "two".to_string()][..])
        );
        assert_eq!(sections[1].icon, "");
        assert_eq!(sections[1].content.as_deref(), Some("frame "));
        assert_eq!(p.closing.as_deref(), Some(" breathe"));
        assert_eq!(p.meta_awareness.as_deref(), Some(""));
        assert_eq!(p.resonance_score, Some(1));
        assert_eq!(p.importance_level, Some(ImportanceLevel::Long));
    }

    #[test]
    fn out_of_range_score_and_unknown_importance_read_as_absent() {
        for score in ["0", "101", "250", "72.5", "-3", "\"high\""] {
            let doc = format!(r#"{{"analysis":"a","sections":[],"resonance_score":{score}}}"#);
            let p = parse_structured(&doc).unwrap();
            assert_eq!(p.resonance_score, None, "score {score}");
        }
        let p = parse_structured(r#"{"analysis":"a","sections":[],"importance_level":"epic"}"#)
            .unwrap();
        assert_eq!(p.importance_level, None);
    }

    #[test]
    fn sections_that_are_not_sections_keep_the_reply_raw() {
        let mut acc = JsonAccumulator::new();
        let doc = r#"{"analysis":"a","sections":["plain string section"]}"#;
        assert!(matches!(acc.push(doc), Progress::Incomplete(_)));
        assert!(
            parse_structured(r#"{"analysis":"a","sections":[{"title":"t","items":[1,"b"]}]}"#)
                .is_none()
        );
    }

    #[test]
    fn fenced_payload_parses_with_and_without_language_tag() {
        let tagged = format!("```json\n{DOC}\n```");
        assert!(parse_structured(&tagged).is_some());
        let bare = format!("  ```\n{DOC}\n```\n");
        assert!(parse_structured(&bare).is_some());
        let unterminated = format!("```json\n{DOC}");
        assert!(parse_structured(&unterminated).is_some());
        let inline = format!("```{DOC}```");
        assert!(parse_structured(&inline).is_some());
    }

    #[test]
    fn strip_code_fence_leaves_unfenced_text_alone() {
        assert_eq!(strip_code_fence("  {\"a\":1} \n"), "{\"a\":1}");
        assert_eq!(strip_code_fence("```json\n{}\n```"), "{}");
        assert_eq!(strip_code_fence("```"), "");
    }

    #[test]
    fn fenced_stream_completes_once_when_closing_fence_arrives_later() {
        let mut acc = JsonAccumulator::new();
        assert!(matches!(acc.push("```json\n"), Progress::Incomplete(_)));
        assert!(matches!(acc.push(DOC), Progress::Complete(_)));
        assert_eq!(acc.push("\n```"), Progress::Settled);
    }
}
