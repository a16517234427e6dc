//! `log` backend writing to the kernel log.
//!
//! Lines are formatted as `IGFX: <target> @ <message>` into a fixed buffer
//! and handed to the host's [`LogSink`]. Messages longer than the buffer are
//! truncated rather than allocated for, since the logger can run from
//! contexts where allocation is not allowed.

use core::fmt::Write;

use log::{LevelFilter, Log, Metadata, Record};

/// Longest line forwarded to the sink.
pub const LINE_CAPACITY: usize = 256;

/// Kernel console (`IOLog`).
pub trait LogSink: Sync {
    fn write_line(&self, line: &str);
}

pub struct KernelLogger {
    sink: &'static dyn LogSink,
    level: LevelFilter,
}

static LOGGER: spin::Once<KernelLogger> = spin::Once::new();

impl KernelLogger {
    pub const fn new(sink: &'static dyn LogSink, level: LevelFilter) -> Self {
        Self { sink, level }
    }
}

/// Install the logger. Later calls keep the first sink.
pub fn init(sink: &'static dyn LogSink, debug: bool) {
    let level = if debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let logger = LOGGER.call_once(|| KernelLogger::new(sink, level));
    // Fails only if another logger was installed first; keep that one.
    if log::set_logger(logger).is_ok() {
        log::set_max_level(logger.level);
    }
}

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let mut line = LineBuffer::new();
        // Truncation is reported as an error and deliberately ignored.
        let _ = write!(line, "IGFX: {} @ {}", record.target(), record.args());
        self.sink.write_line(line.as_str());
    }

    fn flush(&self) {}
}

/// Fixed-capacity UTF-8 line.
struct LineBuffer {
    bytes: [u8; LINE_CAPACITY],
    len: usize,
}

impl LineBuffer {
    const fn new() -> Self {
        Self {
            bytes: [0; LINE_CAPACITY],
            len: 0,
        }
    }

    fn as_str(&self) -> &str {
        // Only whole characters are ever appended.
        core::str::from_utf8(&self.bytes[..self.len]).unwrap_or("")
    }
}

impl Write for LineBuffer {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let room = LINE_CAPACITY - self.len;
        let mut take = s.len().min(room);
        while !s.is_char_boundary(take) {
            take -= 1;
        }
        self.bytes[self.len..self.len + take].copy_from_slice(&s.as_bytes()[..take]);
        self.len += take;
        if take < s.len() {
            Err(core::fmt::Error)
        } else {
            Ok(())
        }
    }
}
