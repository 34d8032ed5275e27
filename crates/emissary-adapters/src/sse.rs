//! Minimal SSE line parsing for provider event streams.
//! SSE format: `event: <type>\ndata: <json>\n\n`.

#[derive(Debug, PartialEq)]
pub enum SseParsed {
    Event(String),
    Data(String),
}

pub fn parse_sse_line(line: &str) -> Option<SseParsed> {
    if let Some(event_type) = line.strip_prefix("event: ") {
        Some(SseParsed::Event(event_type.to_string()))
    } else {
        line.strip_prefix("data: ")
            .map(|data| SseParsed::Data(data.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_event_and_data_lines() {
        assert_eq!(
            parse_sse_line("event: response.created"),
            Some(SseParsed::Event("response.created".into()))
        );
        assert_eq!(
            parse_sse_line(r#"data: {"type":"x"}"#),
            Some(SseParsed::Data(r#"{"type":"x"}"#.into()))
        );
        assert_eq!(parse_sse_line("retry: 300"), None);
        assert_eq!(parse_sse_line(""), None);
    }
}
