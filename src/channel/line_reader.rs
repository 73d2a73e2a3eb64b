//! Line framing for the AT byte stream
//!
//! Splits on CR and LF; empty lines vanish. The SMS data prompt `"> "`
//! carries no terminator, so it counts as a line only when it is all that
//! is left unconsumed in the buffer.
//!
//! The buffer has a fixed capacity. A line that does not fit is discarded
//! (logged and counted) and framing resumes with the next bytes.

use crate::constants::{MAX_AT_RESPONSE, SMS_PROMPT};
use std::io::{self, Read};
use tracing::{debug, error};

pub struct LineReader<R> {
    inner: R,
    buf: Box<[u8]>,
    /// Start of the unconsumed region
    start: usize,
    /// End of valid data
    end: usize,
    bytes_read: u64,
    overflows: u64,
}

impl<R: Read> LineReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_capacity(inner, MAX_AT_RESPONSE)
    }

    pub fn with_capacity(inner: R, capacity: usize) -> Self {
        let capacity = capacity.max(SMS_PROMPT.len() + 1);
        Self {
            inner,
            buf: vec![0u8; capacity].into_boxed_slice(),
            start: 0,
            end: 0,
            bytes_read: 0,
            overflows: 0,
        }
    }

    /// Total bytes pulled from the stream
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Lines discarded because they did not fit in the buffer
    pub fn overflows(&self) -> u64 {
        self.overflows
    }

    /// Next complete line, or `None` once the stream has ended
    pub fn next_line(&mut self) -> Option<String> {
        loop {
            if let Some(line) = self.take_line() {
                return Some(line);
            }

            if self.start > 0 {
                self.buf.copy_within(self.start..self.end, 0);
                self.end -= self.start;
                self.start = 0;
            }

            if self.end == self.buf.len() {
                error!(
                    "Input line exceeded buffer ({} bytes), discarding",
                    self.buf.len()
                );
                self.overflows += 1;
                self.end = 0;
            }

            match self.fill() {
                Ok(0) => {
                    debug!("AT stream ended");
                    return None;
                }
                Ok(_) => {}
                Err(e) => {
                    error!("AT stream read error: {}", e);
                    return None;
                }
            }
        }
    }

    /// Pop a complete line from the buffer without touching the stream
    fn take_line(&mut self) -> Option<String> {
        while self.start < self.end && is_eol(self.buf[self.start]) {
            self.start += 1;
        }
        if self.start == self.end {
            self.start = 0;
            self.end = 0;
            return None;
        }

        let rest = &self.buf[self.start..self.end];
        if rest == SMS_PROMPT.as_bytes() {
            self.start = 0;
            self.end = 0;
            return Some(SMS_PROMPT.to_string());
        }

        let len = rest.iter().position(|&b| is_eol(b))?;
        let line = String::from_utf8_lossy(&rest[..len]).into_owned();
        self.start += len + 1;
        Some(line)
    }

    /// One successful read into the free tail of the buffer
    fn fill(&mut self) -> io::Result<usize> {
        loop {
            match self.inner.read(&mut self.buf[self.end..]) {
                Ok(n) => {
                    self.end += n;
                    self.bytes_read += n as u64;
                    return Ok(n);
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::Interrupted
                            | io::ErrorKind::WouldBlock
                            | io::ErrorKind::TimedOut
                    ) =>
                {
                    continue
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[inline]
fn is_eol(b: u8) -> bool {
    b == b'\r' || b == b'\n'
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::VecDeque;

    /// Replays scripted reads, one chunk (or error) per call
    struct Script(VecDeque<io::Result<Vec<u8>>>);

    impl Script {
        fn text(chunks: &[&str]) -> Self {
            Self(chunks.iter().map(|c| Ok(c.as_bytes().to_vec())).collect())
        }

        fn bytes(chunks: Vec<Vec<u8>>) -> Self {
            Self(chunks.into_iter().map(Ok).collect())
        }
    }

    impl Read for Script {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.0.pop_front() {
                None => Ok(0),
                Some(Err(e)) => Err(e),
                Some(Ok(chunk)) => {
                    let n = chunk.len().min(buf.len());
                    buf[..n].copy_from_slice(&chunk[..n]);
                    if n < chunk.len() {
                        self.0.push_front(Ok(chunk[n..].to_vec()));
                    }
                    Ok(n)
                }
            }
        }
    }

    fn collect<R: Read>(reader: &mut LineReader<R>) -> Vec<String> {
        std::iter::from_fn(|| reader.next_line()).collect()
    }

    #[test]
    fn test_several_lines_in_one_read() {
        let mut reader = LineReader::new(Script::text(&["\r\n+CSQ: 15,99\r\n\r\nOK\r\n"]));
        assert_eq!(collect(&mut reader), vec!["+CSQ: 15,99", "OK"]);
    }

    #[test]
    fn test_line_split_across_reads() {
        let mut reader = LineReader::new(Script::text(&["+CRE", "G: 1,", "\"00C3\"\r", "\nOK\n"]));
        assert_eq!(collect(&mut reader), vec!["+CREG: 1,\"00C3\"", "OK"]);
    }

    #[test]
    fn test_lone_prompt_is_a_line() {
        let mut reader = LineReader::new(Script::text(&["\r\n> "]));
        assert_eq!(reader.next_line().as_deref(), Some("> "));
        assert_eq!(reader.next_line(), None);
    }

    #[test]
    fn test_prompt_then_later_text() {
        let mut reader = LineReader::new(Script::text(&["> ", "+CMGS: 4\r\nOK\r\n"]));
        assert_eq!(collect(&mut reader), vec!["> ", "+CMGS: 4", "OK"]);
    }

    #[test]
    fn test_prompt_with_trailing_bytes_is_ordinary_text() {
        let mut reader = LineReader::new(Script::text(&["> abc\r\n"]));
        assert_eq!(collect(&mut reader), vec!["> abc"]);
    }

    #[test]
    fn test_overflow_discards_and_resumes() {
        let mut reader =
            LineReader::with_capacity(Script::text(&["AAAAAAAAAAAAAAAA", "\r\nOK\r\n"]), 16);
        assert_eq!(collect(&mut reader), vec!["OK"]);
        assert_eq!(reader.overflows(), 1);
    }

    #[test]
    fn test_transient_errors_are_retried() {
        let script = Script(VecDeque::from(vec![
            Err(io::Error::from(io::ErrorKind::Interrupted)),
            Ok(b"OK".to_vec()),
            Err(io::Error::from(io::ErrorKind::WouldBlock)),
            Err(io::Error::from(io::ErrorKind::TimedOut)),
            Ok(b"\r\n".to_vec()),
        ]));
        let mut reader = LineReader::new(script);
        assert_eq!(collect(&mut reader), vec!["OK"]);
    }

    #[test]
    fn test_hard_error_ends_stream() {
        let script = Script(VecDeque::from(vec![
            Ok(b"RING\r\n".to_vec()),
            Err(io::Error::from(io::ErrorKind::BrokenPipe)),
            Ok(b"OK\r\n".to_vec()),
        ]));
        let mut reader = LineReader::new(script);
        assert_eq!(reader.next_line().as_deref(), Some("RING"));
        assert_eq!(reader.next_line(), None);
    }

    #[test]
    fn test_partial_line_at_eof_is_dropped() {
        let mut reader = LineReader::new(Script::text(&["OK\r\nNO CARR"]));
        assert_eq!(collect(&mut reader), vec!["OK"]);
        assert_eq!(reader.bytes_read(), 11);
    }

    proptest! {
        /// Lines never depend on how the stream was chopped into reads.
        /// Content excludes '>' so the prompt rule cannot fire.
        #[test]
        fn prop_split_reads_yield_same_lines(
            lines in prop::collection::vec("[A-Z0-9+:, \"]{0,40}", 0..20),
            seps in prop::collection::vec(prop::sample::select(vec!["\r", "\n", "\r\n", "\r\r\n"]), 20),
            cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..10),
        ) {
            let mut input = Vec::new();
            for (line, sep) in lines.iter().zip(seps.iter()) {
                input.extend_from_slice(line.as_bytes());
                input.extend_from_slice(sep.as_bytes());
            }

            let mut points: Vec<usize> = cuts.iter().map(|i| i.index(input.len() + 1)).collect();
            points.push(0);
            points.push(input.len());
            points.sort_unstable();
            points.dedup();
            let chunks: Vec<Vec<u8>> = points
                .windows(2)
                .map(|w| input[w[0]..w[1]].to_vec())
                .collect();

            let whole = collect(&mut LineReader::new(Script::bytes(vec![input.clone()])));
            let split = collect(&mut LineReader::new(Script::bytes(chunks)));
            let expected: Vec<String> = lines.iter().filter(|l| !l.is_empty()).cloned().collect();

            prop_assert_eq!(&whole, &expected);
            prop_assert_eq!(&split, &expected);
        }
    }
}
