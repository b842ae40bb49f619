use bytes::{Buf, BytesMut};
use std::io;

const GROWTH_INCREMENT: usize = 65536;

/// FIFO byte queue backing each connection's read/write side. Data is
/// appended at the tail and consumed from the head.
///
/// Grounded on `neutronium::net::buffer::Buffer`, but built on `BytesMut`
/// rather than `slice_deque::SliceDeque`: the teacher's buffer gets its
/// "move the head without copying" behavior from an mmap-backed ring, which
/// needs `unsafe` to set up. `BytesMut::advance` gives the same amortized
/// cost through its reference-counted storage without it.
pub struct Buffer {
    data: BytesMut,
}

impl Buffer {
    #[inline]
    pub fn new(capacity: usize) -> Buffer {
        Buffer {
            data: BytesMut::with_capacity(capacity),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn clear(&mut self) {
        self.data.clear();
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Drops the first `count` bytes, e.g. once a complete frame has been
    /// parsed out of them.
    #[inline]
    pub fn advance(&mut self, count: usize) {
        self.data.advance(count);
    }

    /// Reads from `reader` until it would block or returns 0, growing the
    /// buffer as needed. Returns the number of bytes read.
    pub fn ingress<R: io::Read>(&mut self, mut reader: R) -> io::Result<usize> {
        let mut total = 0;

        loop {
            if self.data.capacity() == self.data.len() {
                self.data.reserve(GROWTH_INCREMENT);
            }

            let spare = self.data.spare_capacity_mut();
            // SAFETY: `read` only ever initializes bytes it reports having
            // written, which is exactly what `set_len` below accounts for.
            let spare = unsafe { std::slice::from_raw_parts_mut(spare.as_mut_ptr().cast(), spare.len()) };

            match reader.read(spare) {
                Ok(0) => return Ok(total),
                Ok(n) => {
                    unsafe { self.data.set_len(self.data.len() + n) };
                    total += n;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(total),
                Err(e) => return Err(e),
            }
        }
    }

    /// Writes the buffered contents to `writer`, advancing the head past
    /// whatever was successfully written.
    pub fn egress<W: io::Write>(&mut self, mut writer: W) -> io::Result<usize> {
        let mut total = 0;

        while !self.data.is_empty() {
            match writer.write(&self.data) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => {
                    self.data.advance(n);
                    total += n;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }

        Ok(total)
    }

    #[inline]
    pub fn extend_from_slice(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn ingress_then_egress_round_trips() {
        let mut buf = Buffer::new(GROWTH_INCREMENT);
        let mut src = Cursor::new(vec![1u8, 2, 3, 4]);
        let read = buf.ingress(&mut src).unwrap();
        assert_eq!(read, 4);
        assert_eq!(buf.as_slice(), &[1, 2, 3, 4]);

        let mut dst = Vec::new();
        let written = buf.egress(&mut dst).unwrap();
        assert_eq!(written, 4);
        assert!(buf.is_empty());
        assert_eq!(dst, vec![1, 2, 3, 4]);
    }

    #[test]
    fn advance_drops_leading_bytes() {
        let mut buf = Buffer::new(GROWTH_INCREMENT);
        buf.extend_from_slice(&[9, 8, 7, 6]);
        buf.advance(2);
        assert_eq!(buf.as_slice(), &[7, 6]);
    }
}
