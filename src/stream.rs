//! Framing for the chat response body.
//!
//! Each part is one line of the form `<code>:<json>\n`, the "data stream"
//! format understood by common token-streaming chat clients. The same module
//! decodes it incrementally on the client side.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const STREAM_HEADER: (&str, &str) = ("x-vercel-ai-data-stream", "v1");

// Shown to the caller instead of internal failure detail
pub const GENERIC_ERROR: &str = "An error occurred.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageStart {
    pub message_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepFinish {
    pub finish_reason: FinishReason,
    #[serde(default)]
    pub is_continued: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageFinish {
    pub finish_reason: FinishReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FinishReason {
    Stop,
    Length,
    Error,
    Other,
    Unknown,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamPart {
    Start(MessageStart),
    Text(String),
    Error(String),
    FinishStep(StepFinish),
    FinishMessage(MessageFinish),
    /// A part with a code this implementation does not interpret.
    Other(char, Value),
}

impl StreamPart {
    pub fn start(message_id: impl Into<String>) -> Self {
        StreamPart::Start(MessageStart {
            message_id: message_id.into(),
        })
    }

    pub fn finish_step(finish_reason: FinishReason) -> Self {
        StreamPart::FinishStep(StepFinish {
            finish_reason,
            is_continued: false,
        })
    }

    pub fn finish_message(finish_reason: FinishReason) -> Self {
        StreamPart::FinishMessage(MessageFinish { finish_reason })
    }

    fn code(&self) -> char {
        match self {
            StreamPart::Start(_) => 'f',
            StreamPart::Text(_) => '0',
            StreamPart::Error(_) => '3',
            StreamPart::FinishStep(_) => 'e',
            StreamPart::FinishMessage(_) => 'd',
            StreamPart::Other(code, _) => *code,
        }
    }

    /// Encodes the part as one newline-terminated line.
    pub fn encode(&self) -> String {
        let value = match self {
            StreamPart::Start(start) => serde_json::to_string(start),
            StreamPart::Text(text) | StreamPart::Error(text) => serde_json::to_string(text),
            StreamPart::FinishStep(finish) => serde_json::to_string(finish),
            StreamPart::FinishMessage(finish) => serde_json::to_string(finish),
            StreamPart::Other(_, value) => serde_json::to_string(value),
        }
        // Serializing these plain structs and strings cannot fail
        .unwrap_or_else(|_| "null".to_string());
        format!("{}:{}\n", self.code(), value)
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed stream line: {0:?}")]
    Malformed(String),
    #[error("invalid payload for part {code}: {source}")]
    Payload {
        code: char,
        #[source]
        source: serde_json::Error,
    },
}

/// Parses one line (without its newline).
pub fn decode_line(line: &str) -> Result<StreamPart, DecodeError> {
    let (code, payload) = line
        .split_once(':')
        .filter(|(code, _)| code.chars().count() == 1)
        .ok_or_else(|| DecodeError::Malformed(line.to_string()))?;
    let code = code.chars().next().unwrap_or_default();
    let payload_err = |source| DecodeError::Payload { code, source };

    let part = match code {
        'f' => StreamPart::Start(serde_json::from_str(payload).map_err(payload_err)?),
        '0' => StreamPart::Text(serde_json::from_str(payload).map_err(payload_err)?),
        '3' => StreamPart::Error(serde_json::from_str(payload).map_err(payload_err)?),
        'e' => StreamPart::FinishStep(serde_json::from_str(payload).map_err(payload_err)?),
        'd' => StreamPart::FinishMessage(serde_json::from_str(payload).map_err(payload_err)?),
        other => StreamPart::Other(other, serde_json::from_str(payload).map_err(payload_err)?),
    };
    Ok(part)
}

/// Incremental decoder over arbitrarily split body chunks.
#[derive(Default)]
pub struct DataStreamDecoder {
    buffer: Vec<u8>,
}

impl DataStreamDecoder {
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<StreamPart>, DecodeError> {
        self.buffer.extend_from_slice(bytes);
        let mut parts = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]);
            if line.trim().is_empty() {
                continue;
            }
            parts.push(decode_line(&line)?);
        }
        Ok(parts)
    }

    /// Decodes a trailing line that was not newline-terminated.
    pub fn finish(&mut self) -> Result<Option<StreamPart>, DecodeError> {
        let rest = std::mem::take(&mut self.buffer);
        let line = String::from_utf8_lossy(&rest);
        if line.trim().is_empty() {
            return Ok(None);
        }
        decode_line(line.trim_end()).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_parts_are_json_strings() {
        assert_eq!(StreamPart::Text("He said \"no\"\n".into()).encode(), "0:\"He said \\\"no\\\"\\n\"\n");
        assert_eq!(StreamPart::Error(GENERIC_ERROR.into()).encode(), "3:\"An error occurred.\"\n");
    }

    #[test]
    fn control_parts_use_camel_case() {
        assert_eq!(StreamPart::start("msg-1").encode(), "f:{\"messageId\":\"msg-1\"}\n");
        assert_eq!(
            StreamPart::finish_step(FinishReason::Stop).encode(),
            "e:{\"finishReason\":\"stop\",\"isContinued\":false}\n"
        );
        assert_eq!(
            StreamPart::finish_message(FinishReason::Error).encode(),
            "d:{\"finishReason\":\"error\"}\n"
        );
    }

    #[test]
    fn decoder_handles_split_multibyte_text() {
        let body = [
            StreamPart::start("m"),
            StreamPart::Text("Clause §12 ".into()),
            StreamPart::Text("applies.".into()),
            StreamPart::finish_message(FinishReason::Stop),
        ]
        .iter()
        .map(StreamPart::encode)
        .collect::<String>();

        let mut decoder = DataStreamDecoder::default();
        let mut parts = Vec::new();
        for byte in body.as_bytes() {
            parts.extend(decoder.push(std::slice::from_ref(byte)).unwrap());
        }
        assert!(decoder.finish().unwrap().is_none());

        let text: String = parts
            .iter()
            .filter_map(|p| match p {
                StreamPart::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(text, "Clause §12 applies.");
        assert_eq!(parts.len(), 4);
    }

    #[test]
    fn unknown_codes_pass_through() {
        let part = decode_line("2:[{\"k\":1}]").unwrap();
        assert!(matches!(part, StreamPart::Other('2', _)));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(decode_line("hello").is_err());
        assert!(decode_line("0:not json").is_err());
        assert!(decode_line("10:\"x\"").is_err());
    }

    #[test]
    fn unterminated_tail_is_decoded_on_finish() {
        let mut decoder = DataStreamDecoder::default();
        assert!(decoder.push(b"0:\"tail\"").unwrap().is_empty());
        assert_eq!(decoder.finish().unwrap(), Some(StreamPart::Text("tail".into())));
    }
}
