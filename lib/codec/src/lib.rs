//! Length-prefixed, big-endian binary codec shared by every AtlasNet wire
//! type (spec §4.2): primitives, vectors, UUIDs, blobs and tagged unions.
//!
//! Grounded on `flux::shared`'s `Serialize`/`Deserialize`/`SizedWrite`/
//! `SizedRead` traits from the teacher repo, generalized to a growable
//! `Writer`/borrowing `Reader` pair instead of a fixed-capacity cursor, since
//! AtlasNet packets are not pre-sized the way the teacher's UDP frames are.

mod error;
mod hashid;
mod reader;
mod varint;
mod writer;

pub use error::{CodecError, CodecResult};
pub use hashid::{fnv1a_32, fnv1a_64};
pub use reader::Reader;
pub use writer::Writer;

/// Implemented by every wire type that can serialize itself into a `Writer`.
pub trait Encode {
    fn encode(&self, w: &mut Writer);

    /// Convenience: encode into a fresh buffer.
    fn encode_to_vec(&self) -> Vec<u8> {
        let mut w = Writer::new();
        self.encode(&mut w);
        w.into_bytes()
    }
}

/// Implemented by every wire type that can reconstruct itself from a `Reader`.
pub trait Decode: Sized {
    fn decode(r: &mut Reader) -> CodecResult<Self>;
}
