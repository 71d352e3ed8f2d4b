//! Output sinks for command execution.
//!
//! Commands stream the merged stdout/stderr of their children into a sink.
//! The standard sink is [`OutputBuffer`]: readers drain it (a read returns
//! only bytes appended since the previous read), and it keeps at most the
//! last [`OUTPUT_SIZE_LIMIT`] bytes.

use std::sync::Mutex;

/// Maximum number of output bytes retained per command or server.
pub const OUTPUT_SIZE_LIMIT: usize = 30_000;

/// Sink for streamed process output. Writers may share a sink across tasks.
pub trait OutputSink: Send + Sync {
    fn write(&self, data: &[u8]);
}

#[derive(Debug, Default)]
struct BufferState {
    data: Vec<u8>,
    read_pos: usize,
}

/// Thread-safe output buffer with drain-on-read semantics and a bounded
/// tail.
#[derive(Debug)]
pub struct OutputBuffer {
    state: Mutex<BufferState>,
    capacity: usize,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self::with_capacity(OUTPUT_SIZE_LIMIT)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Mutex::new(BufferState::default()),
            capacity,
        }
    }

    /// Read bytes appended since the previous read.
    pub fn read(&self) -> Vec<u8> {
        let mut state = self.state.lock().unwrap();
        let out = state.data[state.read_pos..].to_vec();
        state.read_pos = state.data.len();
        out
    }

    /// The retained tail, independent of the read cursor.
    pub fn tail(&self) -> Vec<u8> {
        self.state.lock().unwrap().data.clone()
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputSink for OutputBuffer {
    fn write(&self, data: &[u8]) {
        if data.is_empty() {
            return;
        }

        let mut state = self.state.lock().unwrap();
        state.data.extend_from_slice(data);

        let len = state.data.len();
        if len > self.capacity {
            let excess = len - self.capacity;
            state.data.drain(..excess);
            state.read_pos = state.read_pos.saturating_sub(excess);
        }
    }
}

/// Sink that discards everything.
pub struct NullSink;

impl OutputSink for NullSink {
    fn write(&self, _data: &[u8]) {}
}
