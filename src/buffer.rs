//! Fixed-capacity circular byte store backing each connection's input and
//! output side.
//!
//! Every transfer either happens in one contiguous span or is split into
//! exactly two spans at the physical wrap point. The socket-facing variants
//! ([`RingBuffer::fill_from`], [`RingBuffer::drain_to`]) are non-blocking
//! aware: zero-progress, end-of-stream and connection-reset are distinct
//! [`Transfer`] outcomes rather than errors, and partial transfers advance
//! the cursor by exactly the amount moved.
//!
//! The backing store allocates one byte more than the advertised capacity so
//! the full and empty states stay distinguishable without an extra flag.

use std::io::{self, Read, Write};

use crate::error::{Error, Result};

/// Outcome of a transfer between the ring and a socket-like endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    /// Bytes moved; may be fewer than requested.
    Bytes(usize),
    /// The non-blocking endpoint made no progress; retry on the next
    /// readiness notification.
    WouldBlock,
    /// The peer closed its write side (end-of-stream).
    Closed,
    /// The connection was reset by the peer.
    Reset,
}

pub struct RingBuffer {
    buf: Box<[u8]>,
    start: usize,
    end: usize,
}

impl RingBuffer {
    /// Creates a ring able to hold `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        RingBuffer {
            buf: vec![0u8; capacity + 1].into_boxed_slice(),
            start: 0,
            end: 0,
        }
    }

    #[inline]
    fn size(&self) -> usize {
        self.buf.len()
    }

    pub fn capacity(&self) -> usize {
        self.size() - 1
    }

    /// Number of bytes currently stored.
    pub fn len(&self) -> usize {
        (self.end + self.size() - self.start) % self.size()
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Space remaining for writes.
    pub fn remaining(&self) -> usize {
        self.capacity() - self.len()
    }

    pub fn clear(&mut self) {
        self.start = 0;
        self.end = 0;
    }

    /// Byte at relative index `idx`, `0 <= idx < len`.
    pub fn byte_at(&self, idx: usize) -> Option<u8> {
        if idx < self.len() {
            Some(self.buf[(self.start + idx) % self.size()])
        } else {
            None
        }
    }

    /// Iterates the stored bytes without consuming them.
    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        (0..self.len()).map(move |i| self.buf[(self.start + i) % self.size()])
    }

    /// Advances the read cursor by `n` bytes, clamped to the stored length.
    pub fn consume(&mut self, n: usize) {
        let n = n.min(self.len());
        self.start = (self.start + n) % self.size();
    }

    /// Writes all of `src`, or nothing.
    pub fn write(&mut self, src: &[u8]) -> Result<()> {
        if src.len() > self.remaining() {
            return Err(Error::BufferFull {
                requested: src.len(),
                remaining: self.remaining(),
            });
        }

        let n = src.len();
        let first = n.min(self.size() - self.end);
        self.buf[self.end..self.end + first].copy_from_slice(&src[..first]);
        self.buf[..n - first].copy_from_slice(&src[first..]);
        self.end = (self.end + n) % self.size();
        Ok(())
    }

    /// Reads up to `limit` bytes from `src` into the ring.
    ///
    /// `limit` must not exceed [`remaining`](Self::remaining); the wrap point
    /// splits the operation into at most two reads against `src`.
    pub fn fill_from<R: Read>(&mut self, src: &mut R, limit: usize) -> Result<Transfer> {
        if limit > self.remaining() {
            return Err(Error::BufferFull {
                requested: limit,
                remaining: self.remaining(),
            });
        }

        let mut total = 0;
        let mut want = limit;
        while want > 0 {
            let span = want.min(self.size() - self.end);
            match src.read(&mut self.buf[self.end..self.end + span]) {
                Ok(0) => {
                    return if total == 0 {
                        Ok(Transfer::Closed)
                    } else {
                        Ok(Transfer::Bytes(total))
                    };
                }
                Ok(n) => {
                    self.end = (self.end + n) % self.size();
                    total += n;
                    want -= n;
                    if n < span {
                        // Less than requested: the endpoint has no more data.
                        break;
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return if total == 0 {
                        Ok(Transfer::WouldBlock)
                    } else {
                        Ok(Transfer::Bytes(total))
                    };
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(ref e) if e.kind() == io::ErrorKind::ConnectionReset => {
                    return Ok(Transfer::Reset);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(Transfer::Bytes(total))
    }

    /// Copies up to `dst.len()` bytes out of the ring, clamped to the stored
    /// length. Returns the number of bytes copied.
    pub fn read_to(&mut self, dst: &mut [u8]) -> usize {
        let n = dst.len().min(self.len());
        let first = n.min(self.size() - self.start);
        dst[..first].copy_from_slice(&self.buf[self.start..self.start + first]);
        dst[first..n].copy_from_slice(&self.buf[..n - first]);
        self.start = (self.start + n) % self.size();
        n
    }

    /// Appends up to `limit` stored bytes to `dst`, clamped to the stored
    /// length. Returns the number of bytes appended.
    pub fn read_into_vec(&mut self, dst: &mut Vec<u8>, limit: usize) -> usize {
        let n = limit.min(self.len());
        let first = n.min(self.size() - self.start);
        dst.extend_from_slice(&self.buf[self.start..self.start + first]);
        dst.extend_from_slice(&self.buf[..n - first]);
        self.start = (self.start + n) % self.size();
        n
    }

    /// Writes up to `limit` stored bytes to `dst`, clamped to the stored
    /// length. A short write means the endpoint's buffer is full.
    pub fn drain_to<W: Write>(&mut self, dst: &mut W, limit: usize) -> Result<Transfer> {
        let mut total = 0;
        let mut want = limit.min(self.len());
        while want > 0 {
            let span = want.min(self.size() - self.start);
            match dst.write(&self.buf[self.start..self.start + span]) {
                Ok(0) => return Ok(Transfer::Bytes(total)),
                Ok(n) => {
                    self.start = (self.start + n) % self.size();
                    total += n;
                    want -= n;
                    if n < span {
                        break;
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return if total == 0 {
                        Ok(Transfer::WouldBlock)
                    } else {
                        Ok(Transfer::Bytes(total))
                    };
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(ref e) if e.kind() == io::ErrorKind::ConnectionReset => {
                    return Ok(Transfer::Reset);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(Transfer::Bytes(total))
    }

    /// First relative index at which `needle` occurs, scanning the stored
    /// bytes in order.
    pub fn find(&self, needle: &[u8]) -> Option<usize> {
        if needle.is_empty() || needle.len() > self.len() {
            return None;
        }
        (0..=self.len() - needle.len()).find(|&i| {
            needle
                .iter()
                .enumerate()
                .all(|(j, &b)| self.buf[(self.start + i + j) % self.size()] == b)
        })
    }

    /// First relative index of `byte` among the stored bytes.
    pub fn find_byte(&self, byte: u8) -> Option<usize> {
        (0..self.len()).find(|&i| self.buf[(self.start + i) % self.size()] == byte)
    }
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .field("start", &self.start)
            .field("end", &self.end)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Reader that yields its chunks one per call, then WouldBlock.
    struct ChunkedReader {
        chunks: Vec<Vec<u8>>,
    }

    impl Read for ChunkedReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.chunks.is_empty() {
                return Err(io::Error::new(io::ErrorKind::WouldBlock, "no data"));
            }
            let chunk = self.chunks.remove(0);
            let n = chunk.len().min(buf.len());
            buf[..n].copy_from_slice(&chunk[..n]);
            if n < chunk.len() {
                self.chunks.insert(0, chunk[n..].to_vec());
            }
            Ok(n)
        }
    }

    /// Writer that accepts at most `limit` bytes per call, then WouldBlock.
    struct ThrottledWriter {
        accepted: Vec<u8>,
        limit: usize,
        budget: usize,
    }

    impl Write for ThrottledWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.budget == 0 {
                return Err(io::Error::new(io::ErrorKind::WouldBlock, "full"));
            }
            let n = buf.len().min(self.limit).min(self.budget);
            self.accepted.extend_from_slice(&buf[..n]);
            self.budget -= n;
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn round_trip_across_wrap() {
        let mut ring = RingBuffer::new(8);
        let mut out = [0u8; 8];

        // Push the cursors near the physical end, then force a wrapped write.
        ring.write(b"abcde").unwrap();
        assert_eq!(ring.read_to(&mut out[..5]), 5);
        assert_eq!(&out[..5], b"abcde");

        ring.write(b"vwxyz").unwrap();
        assert_eq!(ring.len(), 5);
        let n = ring.read_to(&mut out);
        assert_eq!(n, 5);
        assert_eq!(&out[..5], b"vwxyz");
        assert!(ring.is_empty());
    }

    #[test]
    fn interleaved_writes_preserve_order() {
        let mut ring = RingBuffer::new(16);
        let mut collected = Vec::new();
        let mut tmp = [0u8; 4];

        for round in 0..10u8 {
            ring.write(&[round, round + 100]).unwrap();
            if round % 2 == 1 {
                let n = ring.read_to(&mut tmp);
                collected.extend_from_slice(&tmp[..n]);
            }
        }
        let n = ring.read_to(&mut tmp);
        collected.extend_from_slice(&tmp[..n]);

        let expected: Vec<u8> = (0..10u8).flat_map(|r| [r, r + 100]).collect();
        assert_eq!(collected, expected);
    }

    #[test]
    fn oversized_write_rejected_and_buffer_untouched() {
        let mut ring = RingBuffer::new(4);
        ring.write(b"ab").unwrap();

        let err = ring.write(b"cde").unwrap_err();
        assert!(matches!(
            err,
            Error::BufferFull {
                requested: 3,
                remaining: 2
            }
        ));

        assert_eq!(ring.len(), 2);
        let mut out = [0u8; 4];
        assert_eq!(ring.read_to(&mut out), 2);
        assert_eq!(&out[..2], b"ab");
    }

    #[test]
    fn full_capacity_usable() {
        let mut ring = RingBuffer::new(4);
        ring.write(b"wxyz").unwrap();
        assert_eq!(ring.len(), 4);
        assert_eq!(ring.remaining(), 0);
        assert!(!ring.is_empty());
    }

    #[test]
    fn fill_from_reports_would_block_and_partials() {
        let mut ring = RingBuffer::new(16);
        let mut src = ChunkedReader {
            chunks: vec![b"hello".to_vec()],
        };

        assert_eq!(ring.fill_from(&mut src, 10).unwrap(), Transfer::Bytes(5));
        assert_eq!(ring.fill_from(&mut src, 10).unwrap(), Transfer::WouldBlock);
        assert_eq!(ring.len(), 5);
    }

    #[test]
    fn fill_from_reports_eof() {
        let mut ring = RingBuffer::new(16);
        let mut src = Cursor::new(b"".to_vec());
        assert_eq!(ring.fill_from(&mut src, 8).unwrap(), Transfer::Closed);
    }

    #[test]
    fn fill_from_wraps_in_two_spans() {
        let mut ring = RingBuffer::new(8);
        let mut out = [0u8; 8];

        ring.write(b"abcdef").unwrap();
        ring.read_to(&mut out[..6]);

        // Cursor sits at physical index 6 of a 9-byte store; an 8-byte fill
        // must split at the wrap.
        let mut src = Cursor::new(b"01234567".to_vec());
        assert_eq!(ring.fill_from(&mut src, 8).unwrap(), Transfer::Bytes(8));
        assert_eq!(ring.read_to(&mut out), 8);
        assert_eq!(&out, b"01234567");
    }

    #[test]
    fn fill_from_rejects_over_capacity_request() {
        let mut ring = RingBuffer::new(4);
        let mut src = Cursor::new(b"abcdef".to_vec());
        assert!(ring.fill_from(&mut src, 6).is_err());
    }

    #[test]
    fn drain_to_short_write_advances_exactly() {
        let mut ring = RingBuffer::new(16);
        ring.write(b"0123456789").unwrap();

        let mut dst = ThrottledWriter {
            accepted: Vec::new(),
            limit: 3,
            budget: 100,
        };
        // A short write ends the drain; the cursor advances by exactly the
        // amount accepted.
        assert_eq!(ring.drain_to(&mut dst, 10).unwrap(), Transfer::Bytes(3));
        assert_eq!(dst.accepted, b"012");
        assert_eq!(ring.len(), 7);

        dst.limit = 100;
        assert_eq!(ring.drain_to(&mut dst, 10).unwrap(), Transfer::Bytes(7));
        assert_eq!(dst.accepted, b"0123456789");
        assert!(ring.is_empty());
    }

    #[test]
    fn drain_to_zero_progress_is_would_block() {
        let mut ring = RingBuffer::new(8);
        ring.write(b"abc").unwrap();
        let mut dst = ThrottledWriter {
            accepted: Vec::new(),
            limit: 8,
            budget: 0,
        };
        assert_eq!(ring.drain_to(&mut dst, 3).unwrap(), Transfer::WouldBlock);
        assert_eq!(ring.len(), 3);
    }

    #[test]
    fn read_into_vec_clamps() {
        let mut ring = RingBuffer::new(8);
        ring.write(b"abc").unwrap();
        let mut v = Vec::new();
        assert_eq!(ring.read_into_vec(&mut v, 100), 3);
        assert_eq!(v, b"abc");
        assert!(ring.is_empty());
    }

    #[test]
    fn find_across_wrap() {
        let mut ring = RingBuffer::new(8);
        let mut out = [0u8; 8];
        ring.write(b"xxxxxx").unwrap();
        ring.read_to(&mut out[..6]);

        ring.write(b"ab\r\ncd").unwrap();
        assert_eq!(ring.find(b"\r\n"), Some(2));
        assert_eq!(ring.find_byte(b'd'), Some(5));
        assert_eq!(ring.find(b"zz"), None);
        assert_eq!(ring.find_byte(b'z'), None);
    }

    #[test]
    fn iter_and_consume() {
        let mut ring = RingBuffer::new(8);
        ring.write(b"abcd").unwrap();
        let seen: Vec<u8> = ring.iter().collect();
        assert_eq!(seen, b"abcd");
        assert_eq!(ring.len(), 4);

        ring.consume(2);
        assert_eq!(ring.byte_at(0), Some(b'c'));
        assert_eq!(ring.byte_at(2), None);
    }
}
