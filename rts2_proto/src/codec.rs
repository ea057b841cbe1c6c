//! Line framing and token splitting for the RTS2 text protocol.
//!
//! Generalized from the teacher's `parsear_comando` quoted-token splitter:
//! RTS2 only ever double-quotes fields (no `'`-nesting, no backslash
//! escapes), so those branches are dropped.

/// Accumulates bytes from the socket and yields complete `\n`-terminated
/// lines, keeping any partial trailing line buffered for the next call.
#[derive(Debug, Default)]
pub struct LineSplitter {
    buf: Vec<u8>,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Feeds newly received bytes and returns every complete line found so
    /// far, decoded as UTF-8 with invalid bytes replaced. Non-printable
    /// bytes that are otherwise valid UTF-8 pass through untouched.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);

        let mut lines = Vec::new();
        loop {
            let Some(pos) = self.buf.iter().position(|&b| b == b'\n') else {
                break;
            };
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = &line[..line.len() - 1];
            let line = strip_trailing_cr(line);
            lines.push(String::from_utf8_lossy(line).into_owned());
        }
        lines
    }

    /// True if there is a partial line still buffered.
    pub fn has_pending(&self) -> bool {
        !self.buf.is_empty()
    }
}

fn strip_trailing_cr(line: &[u8]) -> &[u8] {
    if line.last() == Some(&b'\r') {
        &line[..line.len() - 1]
    } else {
        line
    }
}

/// Splits a line into whitespace-separated tokens, treating `"..."` spans
/// as a single token with the surrounding quotes stripped and internal
/// whitespace preserved.
pub fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut has_token = false;

    for ch in line.chars() {
        if in_quotes {
            if ch == '"' {
                in_quotes = false;
            } else {
                current.push(ch);
            }
        } else if ch == '"' {
            in_quotes = true;
            has_token = true;
        } else if ch.is_whitespace() {
            if has_token {
                tokens.push(std::mem::take(&mut current));
                has_token = false;
            }
        } else {
            current.push(ch);
            has_token = true;
        }
    }

    if has_token {
        tokens.push(current);
    }

    tokens
}

/// Result of classifying a decoded line as a response or a command/notification.
#[derive(Debug, Clone, PartialEq)]
pub enum LineKind {
    /// `+<code> [text]` — success response to the in-flight command.
    Success { code: i32, text: String },
    /// `-<code> [text]` — failure response to the in-flight command.
    Failure { code: i32, text: String },
    /// Anything else: a command or notification, already tokenized.
    Command(Vec<String>),
}

/// Classifies a line per §4.1/§4.2: lines starting with `+`/`-` are
/// responses to the connection's in-flight command, everything else is a
/// command or notification to dispatch.
pub fn classify_line(line: &str) -> LineKind {
    if let Some(rest) = line.strip_prefix('+') {
        let (code, text) = split_code_and_text(rest);
        return LineKind::Success { code, text };
    }
    if let Some(rest) = line.strip_prefix('-') {
        let (code, text) = split_code_and_text(rest);
        return LineKind::Failure { code, text };
    }
    LineKind::Command(tokenize(line))
}

fn split_code_and_text(rest: &str) -> (i32, String) {
    let rest = rest.trim_start();
    match rest.split_once(char::is_whitespace) {
        Some((code, text)) => (
            code.parse().unwrap_or(0),
            text.trim_start().to_string(),
        ),
        None => (rest.parse().unwrap_or(0), String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_complete_lines_and_keeps_partial() {
        let mut splitter = LineSplitter::new();
        let lines = splitter.feed(b"S 0\nB 1 2\nV fo");
        assert_eq!(lines, vec!["S 0".to_string(), "B 1 2".to_string()]);
        assert!(splitter.has_pending());

        let lines = splitter.feed(b"o bar\n");
        assert_eq!(lines, vec!["V foo bar".to_string()]);
        assert!(!splitter.has_pending());
    }

    #[test]
    fn strips_trailing_cr() {
        let mut splitter = LineSplitter::new();
        let lines = splitter.feed(b"T ready\r\n");
        assert_eq!(lines, vec!["T ready".to_string()]);
    }

    #[test]
    fn tokenize_preserves_spaces_in_quotes() {
        let tokens = tokenize(r#"M 6 "filter_sleep" "seconds between moves""#);
        assert_eq!(
            tokens,
            vec!["M", "6", "filter_sleep", "seconds between moves"]
        );
    }

    #[test]
    fn classify_success_and_failure() {
        assert_eq!(
            classify_line("+0 OK authorized"),
            LineKind::Success {
                code: 0,
                text: "OK authorized".to_string()
            }
        );
        assert_eq!(
            classify_line("-1 Unknown command: FOO"),
            LineKind::Failure {
                code: -1,
                text: "Unknown command: FOO".to_string()
            }
        );
    }

    #[test]
    fn classify_command_tokenizes() {
        assert_eq!(
            classify_line("X filter_sleep = 2.5"),
            LineKind::Command(vec![
                "X".to_string(),
                "filter_sleep".to_string(),
                "=".to_string(),
                "2.5".to_string()
            ])
        );
    }
}
