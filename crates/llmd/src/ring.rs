// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::VecDeque;
use std::sync::Mutex;

/// Fixed-capacity circular store of a child's recent stderr lines.
///
/// Unlike a byte-oriented ring, this one discards whole lines once full —
/// there is no replay-from-offset here, only a chronological snapshot for
/// diagnostics on failed startup.
#[derive(Debug)]
pub struct RingBuffer {
    inner: Mutex<VecDeque<String>>,
    capacity: usize,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
        }
    }

    /// Append a line, evicting the oldest if at capacity.
    pub fn write(&self, line: impl Into<String>) {
        let mut buf = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if buf.len() >= self.capacity {
            buf.pop_front();
        }
        buf.push_back(line.into());
    }

    /// Lines in chronological order.
    pub fn snapshot(&self) -> Vec<String> {
        let buf = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        buf.iter().cloned().collect()
    }

    /// Snapshot joined into a single newline-delimited string.
    pub fn join(&self) -> String {
        self.snapshot().join("\n")
    }
}

impl Default for RingBuffer {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_is_chronological() {
        let ring = RingBuffer::new(3);
        ring.write("a");
        ring.write("b");
        ring.write("c");
        assert_eq!(ring.snapshot(), vec!["a", "b", "c"]);
    }

    #[test]
    fn overflow_evicts_oldest() {
        let ring = RingBuffer::new(2);
        ring.write("a");
        ring.write("b");
        ring.write("c");
        assert_eq!(ring.snapshot(), vec!["b", "c"]);
    }

    #[test]
    fn join_newline_delimited() {
        let ring = RingBuffer::new(10);
        ring.write("one");
        ring.write("two");
        assert_eq!(ring.join(), "one\ntwo");
    }

    #[test]
    fn empty_snapshot() {
        let ring = RingBuffer::new(10);
        assert!(ring.snapshot().is_empty());
        assert_eq!(ring.join(), "");
    }
}
