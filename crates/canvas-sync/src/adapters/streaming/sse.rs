//! Incremental parser for `text/event-stream` bodies

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Event name, `message` when the server sent none.
    pub event: String,
    /// All `data:` lines of the event joined with `\n`.
    pub data: String,
}

/// Accumulates raw body chunks and yields complete events.
///
/// Chunks may split anywhere, including inside a line or a multi-byte
/// character, so bytes are buffered until a full line is available.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk and returns every event completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=newline).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line).into_owned();
            if let Some(event) = self.process_line(&line) {
                events.push(event);
            }
        }
        events
    }

    /// Flushes an event left open by a body that ended without a blank line.
    pub fn finish(mut self) -> Option<SseEvent> {
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&rest);
            let line = line.trim_end_matches('\r').to_string();
            if let Some(event) = self.process_line(&line) {
                return Some(event);
            }
        }
        self.dispatch()
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            // id and retry carry nothing the adapter uses
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        if self.event.is_none() && self.data.is_empty() {
            return None;
        }
        let event = self.event.take().unwrap_or_else(|| "message".to_string());
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent { event, data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse_all(chunks: &[&[u8]]) -> Vec<SseEvent> {
        let mut parser = SseParser::new();
        let mut events: Vec<SseEvent> = chunks.iter().flat_map(|c| parser.feed(c)).collect();
        events.extend(parser.finish());
        events
    }

    #[test]
    fn test_multi_line_data_is_joined() {
        let events = parse_all(&[b"event: result\ndata: {\"data\":\ndata: []}\n\n"]);
        assert_eq!(
            events,
            vec![SseEvent {
                event: "result".into(),
                data: "{\"data\":\n[]}".into()
            }]
        );
    }

    #[test]
    fn test_crlf_and_comments() {
        let events = parse_all(&[b": keep-alive\r\nevent: err\r\ndata: boom\r\n\r\n"]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "err");
        assert_eq!(events[0].data, "boom");
    }

    #[test]
    fn test_events_split_across_chunks() {
        let events = parse_all(&[b"eve", b"nt: result\nda", b"ta: 1\n", b"\nevent: result\ndata: 2\n\n"]);
        let data: Vec<&str> = events.iter().map(|e| e.data.as_str()).collect();
        assert_eq!(data, vec!["1", "2"]);
    }

    #[test]
    fn test_multibyte_character_split_across_chunks() {
        let body = "data: café\n\n".as_bytes();
        let split = body.iter().position(|b| *b == 0xC3).map(|i| i + 1).unwrap();
        let events = parse_all(&[&body[..split], &body[split..]]);
        assert_eq!(events[0].data, "café");
        assert_eq!(events[0].event, "message");
    }

    #[test]
    fn test_unterminated_final_event_is_flushed() {
        let events = parse_all(&[b"event: result\ndata: {\"data\":[]}"]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "{\"data\":[]}");
    }
}
