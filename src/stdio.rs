//! Standard output and error.
//!
//! Descriptors 1 and 2 never touch the tree. Bytes written to them collect in
//! a per-stream buffer; every complete line goes to the [`LogSink`] and the
//! trailing partial line waits for the next write.

use alloc::{string::String, vec::Vec};

use log::{error, info};
use spin::Mutex;

pub const STDOUT_FD: i32 = 1;
pub const STDERR_FD: i32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdStream {
    Stdout,
    Stderr,
}

impl StdStream {
    pub fn from_fd(fd: i32) -> Option<Self> {
        match fd {
            STDOUT_FD => Some(StdStream::Stdout),
            STDERR_FD => Some(StdStream::Stderr),
            _ => None,
        }
    }
}

pub trait LogSink: Send + Sync {
    fn emit_line(&self, stream: StdStream, line: &str);
}

/// Forwards lines to the `log` facade: stdout at info level under target
/// `stdout`, stderr at error level under target `stderr`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogCrateSink;

impl LogSink for LogCrateSink {
    fn emit_line(&self, stream: StdStream, line: &str) {
        match stream {
            StdStream::Stdout => info!(target: "stdout", "{}", line),
            StdStream::Stderr => error!(target: "stderr", "{}", line),
        }
    }
}

#[derive(Default)]
pub struct LineBuffer {
    pending: Mutex<Vec<u8>>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `bytes`, emitting every completed line.
    pub fn push(&self, bytes: &[u8], stream: StdStream, sink: &dyn LogSink) {
        let mut pending = self.pending.lock();
        pending.extend_from_slice(bytes);
        let mut start = 0;
        while let Some(nl) = pending[start..].iter().position(|&b| b == b'\n') {
            sink.emit_line(stream, &String::from_utf8_lossy(&pending[start..start + nl]));
            start += nl + 1;
        }
        pending.drain(..start);
    }

    /// Emit the partial line, if any.
    pub fn flush(&self, stream: StdStream, sink: &dyn LogSink) {
        let mut pending = self.pending.lock();
        if !pending.is_empty() {
            sink.emit_line(stream, &String::from_utf8_lossy(&pending));
            pending.clear();
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use alloc::string::ToString;

    /// Sink that records what it was given.
    #[derive(Default)]
    pub struct RecordingSink {
        pub lines: Mutex<Vec<(StdStream, String)>>,
    }

    impl LogSink for RecordingSink {
        fn emit_line(&self, stream: StdStream, line: &str) {
            self.lines.lock().push((stream, line.to_string()));
        }
    }

    #[test]
    fn keeps_partial_line_between_writes() {
        let sink = RecordingSink::default();
        let buf = LineBuffer::new();
        buf.push(b"hel", StdStream::Stdout, &sink);
        assert!(sink.lines.lock().is_empty());
        buf.push(b"lo\nwor", StdStream::Stdout, &sink);
        buf.push(b"ld\n\nx", StdStream::Stdout, &sink);
        let lines: Vec<_> = sink.lines.lock().iter().map(|(_, l)| l.clone()).collect();
        assert_eq!(lines, ["hello", "world", ""]);

        buf.flush(StdStream::Stdout, &sink);
        assert_eq!(sink.lines.lock().last().unwrap().1, "x");
    }
}
