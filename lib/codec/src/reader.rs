use crate::error::{CodecError, CodecResult};
use crate::varint;
use byteorder::{BigEndian, ByteOrder};
use glam::{Vec2, Vec3, Vec4};
use uuid::Uuid;

/// Reads values out of a borrowed byte slice using the same cursor-style
/// approach as `flux::shared`'s `SizedRead`, but returning `CodecError`
/// instead of a network-specific error type.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    #[inline]
    pub fn new(buf: &'a [u8]) -> Reader<'a> {
        Reader { buf, pos: 0 }
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    #[inline]
    fn take(&mut self, n: usize) -> CodecResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(CodecError::Underflow);
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    #[inline]
    pub fn u8(&mut self) -> CodecResult<u8> {
        Ok(self.take(1)?[0])
    }

    #[inline]
    pub fn bool(&mut self) -> CodecResult<bool> {
        Ok(self.u8()? != 0)
    }

    #[inline]
    pub fn i8(&mut self) -> CodecResult<i8> {
        Ok(self.take(1)?[0] as i8)
    }

    #[inline]
    pub fn u16(&mut self) -> CodecResult<u16> {
        Ok(BigEndian::read_u16(self.take(2)?))
    }

    #[inline]
    pub fn i16(&mut self) -> CodecResult<i16> {
        Ok(BigEndian::read_i16(self.take(2)?))
    }

    #[inline]
    pub fn u32(&mut self) -> CodecResult<u32> {
        Ok(BigEndian::read_u32(self.take(4)?))
    }

    #[inline]
    pub fn i32(&mut self) -> CodecResult<i32> {
        Ok(BigEndian::read_i32(self.take(4)?))
    }

    #[inline]
    pub fn u64(&mut self) -> CodecResult<u64> {
        Ok(BigEndian::read_u64(self.take(8)?))
    }

    #[inline]
    pub fn i64(&mut self) -> CodecResult<i64> {
        Ok(BigEndian::read_i64(self.take(8)?))
    }

    #[inline]
    pub fn u128(&mut self) -> CodecResult<u128> {
        Ok(BigEndian::read_u128(self.take(16)?))
    }

    #[inline]
    pub fn f32(&mut self) -> CodecResult<f32> {
        Ok(BigEndian::read_f32(self.take(4)?))
    }

    #[inline]
    pub fn f64(&mut self) -> CodecResult<f64> {
        Ok(BigEndian::read_f64(self.take(8)?))
    }

    #[inline]
    pub fn varint(&mut self) -> CodecResult<u64> {
        varint::read_varint(self.buf, &mut self.pos)
    }

    #[inline]
    pub fn vec2(&mut self) -> CodecResult<Vec2> {
        Ok(Vec2::new(self.f32()?, self.f32()?))
    }

    #[inline]
    pub fn vec3(&mut self) -> CodecResult<Vec3> {
        Ok(Vec3::new(self.f32()?, self.f32()?, self.f32()?))
    }

    #[inline]
    pub fn vec4(&mut self) -> CodecResult<Vec4> {
        Ok(Vec4::new(self.f32()?, self.f32()?, self.f32()?, self.f32()?))
    }

    #[inline]
    pub fn uuid(&mut self) -> CodecResult<Uuid> {
        let bytes = self.take(16)?;
        let mut arr = [0u8; 16];
        arr.copy_from_slice(bytes);
        Ok(Uuid::from_bytes(arr))
    }

    #[inline]
    pub fn blob(&mut self) -> CodecResult<Vec<u8>> {
        let len = self.varint()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    #[inline]
    pub fn string(&mut self) -> CodecResult<String> {
        let bytes = self.blob()?;
        String::from_utf8(bytes).map_err(|_| CodecError::BadTag)
    }

    /// Reads a tagged-union discriminant byte, rejecting values `>= variant_count`.
    #[inline]
    pub fn tag(&mut self, variant_count: u8) -> CodecResult<u8> {
        let discriminant = self.u8()?;
        if discriminant >= variant_count {
            return Err(CodecError::BadTag);
        }
        Ok(discriminant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn underflow_on_empty_buffer() {
        let mut r = Reader::new(&[]);
        assert_eq!(r.u64(), Err(CodecError::Underflow));
    }

    #[test]
    fn bad_tag_beyond_variant_count() {
        let bytes = [3u8];
        let mut r = Reader::new(&bytes);
        assert_eq!(r.tag(3), Err(CodecError::BadTag));
    }

    #[test]
    fn tag_within_range_accepted() {
        let bytes = [2u8];
        let mut r = Reader::new(&bytes);
        assert_eq!(r.tag(3).unwrap(), 2);
    }
}
