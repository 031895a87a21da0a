use std::sync::atomic::{AtomicU8, Ordering};

use crate::types::TerminationSignal;

pub const TRUNCATION_MARKER: &str = "\n...[output truncated]";

/// Byte buffer that stops growing at `limit` and remembers that it overflowed.
#[derive(Debug)]
pub struct CappedBuffer {
    data: Vec<u8>,
    limit: usize,
    overflowed: bool,
}

impl CappedBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            data: Vec::with_capacity(limit.min(64 * 1024)),
            limit,
            overflowed: false,
        }
    }

    /// Appends a chunk; returns `true` once the limit has been crossed.
    pub fn push(&mut self, chunk: &[u8]) -> bool {
        let room = self.limit.saturating_sub(self.data.len());
        if chunk.len() > room {
            self.data.extend_from_slice(&chunk[..room]);
            self.overflowed = true;
        } else {
            self.data.extend_from_slice(chunk);
        }
        self.overflowed
    }

    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    pub fn into_string(self) -> String {
        let mut text = String::from_utf8_lossy(&self.data).into_owned();
        if self.overflowed {
            text.push_str(TRUNCATION_MARKER);
        }
        text
    }
}

/// Why the judge killed a process. Set once, before the kill is issued, so the
/// exit status is never used to guess the cause.
#[derive(Debug, Default)]
pub struct TerminationCause(AtomicU8);

const CAUSE_NONE: u8 = 0;
const CAUSE_TIMEOUT: u8 = 1;
const CAUSE_OUTPUT: u8 = 2;

impl TerminationCause {
    /// First caller wins. Returns `true` if this call recorded the cause.
    pub fn set(&self, signal: TerminationSignal) -> bool {
        let value = match signal {
            TerminationSignal::Timeout => CAUSE_TIMEOUT,
            TerminationSignal::OutputLimit => CAUSE_OUTPUT,
            TerminationSignal::None | TerminationSignal::Memory => return false,
        };
        self.0
            .compare_exchange(CAUSE_NONE, value, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn get(&self) -> TerminationSignal {
        match self.0.load(Ordering::SeqCst) {
            CAUSE_TIMEOUT => TerminationSignal::Timeout,
            CAUSE_OUTPUT => TerminationSignal::OutputLimit,
            _ => TerminationSignal::None,
        }
    }
}

const OUT_OF_MEMORY_PATTERNS: &[&str] = &[
    "MemoryError",
    "std::bad_alloc",
    "java.lang.OutOfMemoryError",
    "JavaScript heap out of memory",
    "Cannot allocate memory",
    "out of memory",
];

/// Recognises the usual "ran out of memory" diagnostics of the supported runtimes.
pub fn looks_out_of_memory(stderr: &str) -> bool {
    OUT_OF_MEMORY_PATTERNS.iter().any(|p| stderr.contains(p))
}
