//! Ring buffer for process output tails
//!
//! A failing program can write megabytes to stderr; only the last few
//! kilobytes belong in an error message.

pub struct RingBuffer {
    data: Vec<u8>,
    capacity: usize,
    /// Next slot to overwrite once `data` is full
    write_pos: usize,
    total_written: usize,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            capacity,
            write_pos: 0,
            total_written: 0,
        }
    }

    /// Append bytes, overwriting the oldest when full.
    pub fn write(&mut self, data: &[u8]) {
        self.total_written += data.len();
        if self.capacity == 0 || data.is_empty() {
            return;
        }

        let data = &data[data.len().saturating_sub(self.capacity)..];
        let mut rest = data;
        if self.data.len() < self.capacity {
            let fill = (self.capacity - self.data.len()).min(rest.len());
            self.data.extend_from_slice(&rest[..fill]);
            rest = &rest[fill..];
            self.write_pos = self.data.len() % self.capacity;
        }

        while !rest.is_empty() {
            let n = (self.capacity - self.write_pos).min(rest.len());
            self.data[self.write_pos..self.write_pos + n].copy_from_slice(&rest[..n]);
            self.write_pos = (self.write_pos + n) % self.capacity;
            rest = &rest[n..];
        }
    }

    /// Buffered bytes, oldest first
    pub fn read_all(&self) -> Vec<u8> {
        if self.data.len() < self.capacity {
            return self.data.clone();
        }
        let mut out = Vec::with_capacity(self.capacity);
        out.extend_from_slice(&self.data[self.write_pos..]);
        out.extend_from_slice(&self.data[..self.write_pos]);
        out
    }

    /// The tail as plain text. Dropped output is marked with a leading `...`.
    pub fn read_text(&self) -> String {
        let plain = strip_ansi_escapes::strip(self.read_all());
        let text = String::from_utf8_lossy(&plain);
        if self.has_wrapped() {
            format!("...{}", text)
        } else {
            text.into_owned()
        }
    }

    pub fn has_wrapped(&self) -> bool {
        self.total_written > self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_output_is_kept_whole() {
        let mut buf = RingBuffer::new(100);
        buf.write(b"hello ");
        buf.write(b"world");
        assert_eq!(buf.read_all(), b"hello world");
        assert!(!buf.has_wrapped());
    }

    #[test]
    fn wraparound_keeps_newest() {
        let mut buf = RingBuffer::new(10);
        buf.write(b"12345678");
        buf.write(b"abcd");
        assert_eq!(buf.read_all(), b"345678abcd");
        assert!(buf.has_wrapped());

        buf.write(b"XYZ");
        assert_eq!(buf.read_all(), b"678abcdXYZ");
    }

    #[test]
    fn exact_fill_then_write() {
        let mut buf = RingBuffer::new(4);
        buf.write(b"abcd");
        assert_eq!(buf.read_all(), b"abcd");
        assert!(!buf.has_wrapped());
        buf.write(b"e");
        assert_eq!(buf.read_all(), b"bcde");
    }

    #[test]
    fn oversized_write_keeps_its_end() {
        let mut buf = RingBuffer::new(5);
        buf.write(b"Traceback ... KeyError");
        assert_eq!(buf.read_all(), b"Error");
        assert_eq!(buf.read_text(), "...Error");
    }

    #[test]
    fn text_has_escapes_stripped() {
        let mut buf = RingBuffer::new(64);
        buf.write(b"\x1b[31merror\x1b[0m: boom");
        assert_eq!(buf.read_text(), "error: boom");
    }

    #[test]
    fn zero_capacity_keeps_nothing() {
        let mut buf = RingBuffer::new(0);
        buf.write(b"lost");
        assert!(buf.read_all().is_empty());
    }
}
