use serde_json::Value;

/// One decoded `data:` payload of a streamed reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaFrame {
    /// `{"response": "..."}`
    DirectText(String),
    /// `{"choices": [{"delta": {"content": "..."}}]}`
    ChatDelta(String),
    Unrecognized,
}

impl DeltaFrame {
    pub fn parse(payload: &str) -> Result<Self, serde_json::Error> {
        let value = serde_json::from_str::<Value>(payload)?;
        Ok(Self::from_value(&value))
    }

    pub fn from_value(value: &Value) -> Self {
        if let Some(text) = value
            .get("response")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
        {
            return DeltaFrame::DirectText(text.to_string());
        }
        if let Some(text) = value
            .get("choices")
            .and_then(|choices| choices.get(0))
            .and_then(|choice| choice.get("delta"))
            .and_then(|delta| delta.get("content"))
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
        {
            return DeltaFrame::ChatDelta(text.to_string());
        }
        DeltaFrame::Unrecognized
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            DeltaFrame::DirectText(text) | DeltaFrame::ChatDelta(text) => Some(text),
            DeltaFrame::Unrecognized => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_delta_shapes_yield_text() {
        let direct = DeltaFrame::parse(r#"{"response":"hi"}"#).expect("json");
        let chat = DeltaFrame::parse(r#"{"choices":[{"delta":{"content":"hi"}}]}"#).expect("json");
        assert_eq!(direct, DeltaFrame::DirectText("hi".to_string()));
        assert_eq!(chat, DeltaFrame::ChatDelta("hi".to_string()));
        assert_eq!(direct.text(), chat.text());
    }

    #[test]
    fn other_shapes_are_unrecognized() {
        for payload in [
            r#"{"foo":"bar"}"#,
            r#"{"response":""}"#,
            r#"{"response":42}"#,
            r#"{"choices":[]}"#,
            r#"{"choices":[{"delta":{}}]}"#,
            r#"{"choices":[{"delta":{"role":"assistant"}}],"usage":null}"#,
            "null",
            "[1,2]",
        ] {
            let frame = DeltaFrame::parse(payload).expect("json");
            assert_eq!(frame, DeltaFrame::Unrecognized, "{payload}");
            assert!(frame.text().is_none());
        }
    }

    #[test]
    fn empty_response_falls_through_to_chat_delta() {
        let frame =
            DeltaFrame::parse(r#"{"response":"","choices":[{"delta":{"content":"x"}}]}"#)
                .expect("json");
        assert_eq!(frame, DeltaFrame::ChatDelta("x".to_string()));
    }

    #[test]
    fn invalid_json_is_an_error() {
        assert!(DeltaFrame::parse("{\"response\":").is_err());
        assert!(DeltaFrame::parse("[DONE]").is_err());
    }
}
