use serde::Deserialize;

#[derive(Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Default, Deserialize)]
struct Delta {
    content: Option<String>,
}

/// Incremental decoder for a streamed chat completion (`data: {...}` lines,
/// terminated by `data: [DONE]`). Bytes may be split anywhere.
#[derive(Default)]
pub struct CompletionChunkDecoder {
    buffer: Vec<u8>,
    done: bool,
}

impl CompletionChunkDecoder {
    /// Feeds raw bytes and returns the text deltas completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut deltas = Vec::new();
        if self.done {
            return deltas;
        }
        self.buffer.extend_from_slice(bytes);

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let Some(data) = line.trim().strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();
            if data == "[DONE]" {
                self.done = true;
                self.buffer.clear();
                break;
            }
            // Keep-alives and unknown payloads are skipped
            if let Ok(chunk) = serde_json::from_str::<CompletionChunk>(data) {
                deltas.extend(
                    chunk
                        .choices
                        .into_iter()
                        .filter_map(|choice| choice.delta.content)
                        .filter(|content| !content.is_empty()),
                );
            }
        }
        deltas
    }

    pub fn is_done(&self) -> bool {
        self.done
    }
}
