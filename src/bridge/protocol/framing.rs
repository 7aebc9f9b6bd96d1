//! Reassembly of newline-terminated lines from arbitrary byte chunks.
//!
//! Pipe reads return whatever the kernel has buffered, so a JSON line can be
//! split across reads or several lines can arrive in one read. `LineBuffer`
//! keeps the incomplete tail between reads.

/// Accumulates raw bytes and yields complete lines (without the terminator).
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    buf: Vec<u8>,
    /// Bytes before this offset are known to contain no newline
    scanned: usize,
}

impl LineBuffer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed, in order.
    ///
    /// A trailing `\r` is stripped so CRLF-terminated producers work too.
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buf.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        let mut cursor = self.scanned;

        while let Some(offset) = self.buf[cursor..].iter().position(|b| *b == b'\n') {
            let end = cursor + offset;
            let mut line = &self.buf[start..end];
            if let Some(stripped) = line.strip_suffix(b"\r") {
                line = stripped;
            }
            lines.push(line.to_vec());
            start = end + 1;
            cursor = start;
        }

        self.buf.drain(..start);
        self.scanned = self.buf.len();
        lines
    }

    /// Bytes received after the last newline.
    pub(crate) fn remainder(&self) -> &[u8] {
        &self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_chunk_with_multiple_lines() {
        let mut buffer = LineBuffer::new();
        let lines = buffer.push(b"{\"a\":1}\n{\"b\":2}\n");
        assert_eq!(lines, vec![b"{\"a\":1}".to_vec(), b"{\"b\":2}".to_vec()]);
        assert!(buffer.remainder().is_empty());
    }

    #[test]
    fn line_split_across_chunks_is_reassembled() {
        let mut buffer = LineBuffer::new();
        assert!(buffer.push(b"{\"type\":\"te").is_empty());
        assert!(buffer.push(b"xt_delta\",").is_empty());
        let lines = buffer.push(b"\"text\":\"hi\"}\n{\"ty");
        assert_eq!(lines, vec![b"{\"type\":\"text_delta\",\"text\":\"hi\"}".to_vec()]);
        assert_eq!(buffer.remainder(), b"{\"ty");
    }

    #[test]
    fn crlf_terminator_is_stripped() {
        let mut buffer = LineBuffer::new();
        let lines = buffer.push(b"one\r\ntwo\n");
        assert_eq!(lines, vec![b"one".to_vec(), b"two".to_vec()]);
    }

    #[test]
    fn empty_lines_are_yielded_as_empty() {
        let mut buffer = LineBuffer::new();
        let lines = buffer.push(b"\n\nx\n");
        assert_eq!(lines, vec![Vec::new(), Vec::new(), b"x".to_vec()]);
    }

    #[test]
    fn multibyte_utf8_split_across_chunks_survives() {
        let text = "{\"text\":\"こんにちは\"}\n".as_bytes();
        let (head, tail) = text.split_at(13);
        let mut buffer = LineBuffer::new();
        assert!(buffer.push(head).is_empty());
        let lines = buffer.push(tail);
        assert_eq!(
            String::from_utf8(lines[0].clone()).unwrap(),
            "{\"text\":\"こんにちは\"}"
        );
    }
}
