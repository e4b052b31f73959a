//! Reassembly of byte chunks into lines.

/// Accumulates partial chunks until a `\n` completes a line.
///
/// Holds exactly the bytes received since the last line boundary. Splitting
/// happens on bytes, so a multi-byte UTF-8 character cut by a chunk boundary
/// is decoded only once both halves have arrived.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed, in order.
    ///
    /// Returned lines exclude the `\n` and any trailing `\r`.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let Some(last_newline) = chunk.iter().rposition(|&b| b == b'\n') else {
            self.pending.extend_from_slice(chunk);
            return Vec::new();
        };

        self.pending.extend_from_slice(&chunk[..=last_newline]);
        let complete = std::mem::take(&mut self.pending);
        self.pending.extend_from_slice(&chunk[last_newline + 1..]);

        complete
            .split(|&b| b == b'\n')
            // The slice ends with '\n', so the final split segment is always empty.
            .take(complete.iter().filter(|&&b| b == b'\n').count())
            .map(decode_line)
            .collect()
    }

    /// Take the unterminated remainder, if any.
    pub fn take_remainder(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(decode_line(&rest))
    }

    /// Bytes received since the last line boundary.
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}
