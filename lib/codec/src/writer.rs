use crate::varint;
use byteorder::{BigEndian, WriteBytesExt};
use glam::{Vec2, Vec3, Vec4};
use uuid::Uuid;

/// Appends values to a growable buffer using the wire format from spec §4.2:
/// fixed-width primitives are big-endian, strings and blobs are
/// varint-length-prefixed, tagged unions are a discriminant byte followed by
/// the variant payload.
#[derive(Debug, Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    #[inline]
    pub fn new() -> Writer {
        Writer { buf: Vec::new() }
    }

    #[inline]
    pub fn with_capacity(cap: usize) -> Writer {
        Writer {
            buf: Vec::with_capacity(cap),
        }
    }

    #[inline]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    #[inline]
    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    #[inline]
    pub fn bool(&mut self, v: bool) -> &mut Self {
        self.u8(v as u8)
    }

    #[inline]
    pub fn i8(&mut self, v: i8) -> &mut Self {
        self.buf.push(v as u8);
        self
    }

    #[inline]
    pub fn u16(&mut self, v: u16) -> &mut Self {
        self.buf.write_u16::<BigEndian>(v).expect("Vec<u8> write is infallible");
        self
    }

    #[inline]
    pub fn i16(&mut self, v: i16) -> &mut Self {
        self.buf.write_i16::<BigEndian>(v).expect("Vec<u8> write is infallible");
        self
    }

    #[inline]
    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.buf.write_u32::<BigEndian>(v).expect("Vec<u8> write is infallible");
        self
    }

    #[inline]
    pub fn i32(&mut self, v: i32) -> &mut Self {
        self.buf.write_i32::<BigEndian>(v).expect("Vec<u8> write is infallible");
        self
    }

    #[inline]
    pub fn u64(&mut self, v: u64) -> &mut Self {
        self.buf.write_u64::<BigEndian>(v).expect("Vec<u8> write is infallible");
        self
    }

    #[inline]
    pub fn i64(&mut self, v: i64) -> &mut Self {
        self.buf.write_i64::<BigEndian>(v).expect("Vec<u8> write is infallible");
        self
    }

    #[inline]
    pub fn u128(&mut self, v: u128) -> &mut Self {
        self.buf.write_u128::<BigEndian>(v).expect("Vec<u8> write is infallible");
        self
    }

    #[inline]
    pub fn f32(&mut self, v: f32) -> &mut Self {
        self.buf.write_f32::<BigEndian>(v).expect("Vec<u8> write is infallible");
        self
    }

    #[inline]
    pub fn f64(&mut self, v: f64) -> &mut Self {
        self.buf.write_f64::<BigEndian>(v).expect("Vec<u8> write is infallible");
        self
    }

    #[inline]
    pub fn varint(&mut self, v: u64) -> &mut Self {
        varint::write_varint(&mut self.buf, v);
        self
    }

    #[inline]
    pub fn vec2(&mut self, v: Vec2) -> &mut Self {
        self.f32(v.x).f32(v.y)
    }

    #[inline]
    pub fn vec3(&mut self, v: Vec3) -> &mut Self {
        self.f32(v.x).f32(v.y).f32(v.z)
    }

    #[inline]
    pub fn vec4(&mut self, v: Vec4) -> &mut Self {
        self.f32(v.x).f32(v.y).f32(v.z).f32(v.w)
    }

    #[inline]
    pub fn uuid(&mut self, v: &Uuid) -> &mut Self {
        self.buf.extend_from_slice(v.as_bytes());
        self
    }

    #[inline]
    pub fn blob(&mut self, v: &[u8]) -> &mut Self {
        self.varint(v.len() as u64);
        self.buf.extend_from_slice(v);
        self
    }

    #[inline]
    pub fn string(&mut self, v: &str) -> &mut Self {
        self.blob(v.as_bytes())
    }

    /// Reserves a discriminant byte for a tagged union ahead of the variant payload.
    #[inline]
    pub fn tag(&mut self, discriminant: u8) -> &mut Self {
        self.u8(discriminant)
    }
}
