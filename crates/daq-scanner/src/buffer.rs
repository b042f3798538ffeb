//! Flat scan buffer with head and tail offsets.
//!
//! Reads append at `head`; scanners consume from `tail`. Unread bytes are shifted to
//! the front only when the next read needs the room.

/// Byte buffer between a sensor read and the framing state machine.
#[derive(Debug)]
pub struct ScanBuffer {
    data: Box<[u8]>,
    head: usize,
    tail: usize,
}

impl ScanBuffer {
    /// Buffer holding up to `size` unread bytes.
    pub fn new(size: usize) -> Self {
        Self {
            data: vec![0u8; size.max(1)].into_boxed_slice(),
            head: 0,
            tail: 0,
        }
    }

    /// Capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Number of unread bytes.
    pub fn available(&self) -> usize {
        self.head - self.tail
    }

    /// Offset of the next unread byte.
    pub fn tail(&self) -> usize {
        self.tail
    }

    /// Offset one past the last byte read.
    pub fn head(&self) -> usize {
        self.head
    }

    /// Unread bytes.
    pub fn unread(&self) -> &[u8] {
        &self.data[self.tail..self.head]
    }

    /// Next unread byte without consuming it.
    pub fn peek(&self) -> Option<u8> {
        (self.tail < self.head).then(|| self.data[self.tail])
    }

    /// Mark `n` unread bytes as consumed.
    pub fn consume(&mut self, n: usize) {
        debug_assert!(n <= self.available());
        self.tail += n.min(self.available());
    }

    /// Make room for the next read: reset when empty, otherwise move unread bytes to
    /// the front if anything has been consumed.
    pub fn compact(&mut self) {
        if self.tail == self.head {
            self.tail = 0;
            self.head = 0;
        } else if self.tail > 0 {
            self.data.copy_within(self.tail..self.head, 0);
            self.head -= self.tail;
            self.tail = 0;
        }
    }

    /// Free space after `head`.
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.head..]
    }

    /// Record `n` bytes written into [`ScanBuffer::spare_mut`].
    pub fn advance_head(&mut self, n: usize) {
        debug_assert!(self.head + n <= self.data.len());
        self.head = (self.head + n).min(self.data.len());
    }

    /// Bytes in `start..start + len`, read or not.
    pub fn slice(&self, start: usize, len: usize) -> &[u8] {
        &self.data[start..start + len]
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.head = 0;
        self.tail = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(buf: &mut ScanBuffer, bytes: &[u8]) {
        buf.spare_mut()[..bytes.len()].copy_from_slice(bytes);
        buf.advance_head(bytes.len());
    }

    #[test]
    fn compaction_moves_unread_bytes_to_front() {
        let mut buf = ScanBuffer::new(8);
        fill(&mut buf, b"abcdef");
        buf.consume(4);
        assert_eq!(buf.spare_mut().len(), 2);
        buf.compact();
        assert_eq!(buf.tail(), 0);
        assert_eq!(buf.unread(), b"ef");
        assert_eq!(buf.spare_mut().len(), 6);
    }

    #[test]
    fn empty_buffer_resets_on_compact() {
        let mut buf = ScanBuffer::new(4);
        fill(&mut buf, b"xyz");
        buf.consume(3);
        buf.compact();
        assert_eq!(buf.head(), 0);
        assert_eq!(buf.available(), 0);
        assert_eq!(buf.peek(), None);
    }

    #[test]
    fn untouched_buffer_is_not_moved() {
        let mut buf = ScanBuffer::new(4);
        fill(&mut buf, b"ab");
        buf.compact();
        assert_eq!(buf.head(), 2);
        assert_eq!(buf.peek(), Some(b'a'));
    }
}
