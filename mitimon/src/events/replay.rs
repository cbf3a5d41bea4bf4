//! Replay of recorded event streams
//!
//! One JSON object per line, tagged by `"kind"`. Blank lines and lines
//! starting with `#` are skipped. A line that does not parse (including one
//! that is not UTF-8) is reported and skipped; only a failing reader ends the
//! stream:
//!
//! ```text
//! # boot
//! {"kind":"process_start","pid":100,"image_name":"a.exe"}
//! {"kind":"image_load","pid":100,"image_base":"0x1000","image_size":8192,"image_name":"a.exe"}
//! {"kind":"mitigation","task_name":"ProhibitDynamicCode","event_id":10,"pid":100,"tid":4,"stack":["0x1500"]}
//! ```

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use super::EventSource;
use crate::domain::EventError;
use mitimon_common::MonitorEvent;

/// Reads events line by line from any buffered reader
pub struct ReplaySource<R> {
    reader: R,
    line_no: usize,
    buf: Vec<u8>,
    finished: bool,
}

impl<R: BufRead> ReplaySource<R> {
    pub fn new(reader: R) -> Self {
        Self { reader, line_no: 0, buf: Vec::new(), finished: false }
    }

    /// Lines consumed so far
    #[must_use]
    pub fn line_no(&self) -> usize {
        self.line_no
    }
}

impl ReplaySource<Box<dyn BufRead + Send>> {
    /// Open a recorded stream; `-` reads standard input
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened
    pub fn open(path: &Path) -> Result<Self> {
        let reader: Box<dyn BufRead + Send> = if path == Path::new("-") {
            Box::new(BufReader::new(io::stdin()))
        } else {
            let file = File::open(path)
                .with_context(|| format!("Failed to open event stream {}", path.display()))?;
            Box::new(BufReader::new(file))
        };
        Ok(Self::new(reader))
    }
}

impl<R: BufRead> EventSource for ReplaySource<R> {
    fn next_event(&mut self) -> Option<Result<MonitorEvent, EventError>> {
        while !self.finished {
            self.buf.clear();
            match self.reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => self.finished = true,
                Ok(_) => {
                    self.line_no += 1;
                    let line = self.buf.trim_ascii();
                    if line.is_empty() || line.starts_with(b"#") {
                        continue;
                    }
                    return Some(
                        serde_json::from_slice(line)
                            .map_err(|source| EventError::Malformed { line: self.line_no, source }),
                    );
                }
                Err(e) => {
                    // A broken reader will not recover; end the stream after reporting
                    self.finished = true;
                    return Some(Err(EventError::Io(e)));
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mitimon_common::Address;

    fn source(text: &str) -> ReplaySource<&[u8]> {
        ReplaySource::new(text.as_bytes())
    }

    #[test]
    fn test_skips_comments_and_blank_lines() {
        let mut events = source(
            "# header\n\n{\"kind\":\"process_start\",\"pid\":1,\"image_name\":\"a.exe\"}\n   \n{\"kind\":\"process_stop\",\"pid\":1}\n",
        );

        assert_eq!(
            events.next_event().unwrap().unwrap(),
            MonitorEvent::ProcessStart { pid: 1, image_name: "a.exe".to_string() }
        );
        assert_eq!(events.next_event().unwrap().unwrap(), MonitorEvent::ProcessStop { pid: 1 });
        assert!(events.next_event().is_none());
        assert!(events.next_event().is_none());
        assert_eq!(events.line_no(), 5);
    }

    #[test]
    fn test_malformed_line_reports_and_continues() {
        let mut events = source(
            "{\"kind\":\"nope\"}\n{\"kind\":\"image_unload\",\"pid\":3,\"image_base\":\"0x2000\"}\n",
        );

        match events.next_event() {
            Some(Err(EventError::Malformed { line, .. })) => assert_eq!(line, 1),
            other => panic!("expected malformed event, got {other:?}"),
        }
        assert_eq!(
            events.next_event().unwrap().unwrap(),
            MonitorEvent::ImageUnload { pid: 3, image_base: Address(0x2000) }
        );
    }

    #[test]
    fn test_invalid_utf8_line_is_skipped() {
        let mut input = b"{\"kind\":\"process_stop\",\"pid\":1}\n".to_vec();
        input.extend_from_slice(b"\xff\xfe garbage\n");
        input.extend_from_slice(b"{\"kind\":\"process_stop\",\"pid\":2}\n");
        let mut events = ReplaySource::new(input.as_slice());

        assert_eq!(events.next_event().unwrap().unwrap(), MonitorEvent::ProcessStop { pid: 1 });
        match events.next_event() {
            Some(Err(EventError::Malformed { line, .. })) => assert_eq!(line, 2),
            other => panic!("expected malformed event, got {other:?}"),
        }
        assert_eq!(events.next_event().unwrap().unwrap(), MonitorEvent::ProcessStop { pid: 2 });
        assert!(events.next_event().is_none());
    }

    #[test]
    fn test_open_missing_file() {
        let err = ReplaySource::open(Path::new("/nonexistent/events.jsonl")).err().unwrap();
        assert!(err.to_string().contains("Failed to open event stream"));
    }
}
