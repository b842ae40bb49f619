use crate::buffer::Buffer;
use atlasnet_codec::{Reader, Writer};

/// `[type_id: u32][length: u32][payload]` — the one frame shape every
/// connection speaks (spec §4.2, §4.4). Simpler than the teacher's
/// category/sequence/MAC header in `neutronium::net::frame`: AtlasNet
/// carries no per-message crypto (see DESIGN.md), and packet ordering is
/// the registry's `type_id` plus whatever sequence field a given packet
/// type itself carries, not a transport-level counter.
pub const HEADER_SIZE: usize = 8;

/// Serializes a frame directly onto an outgoing buffer.
pub fn write_frame(buf: &mut Buffer, type_id: u32, payload: &[u8]) {
    let mut w = Writer::with_capacity(HEADER_SIZE);
    w.u32(type_id);
    w.u32(payload.len() as u32);
    buf.extend_from_slice(&w.into_bytes());
    buf.extend_from_slice(payload);
}

/// Attempts to take one complete frame off the front of `buf`. Returns
/// `None` if fewer bytes than a full frame are buffered yet; the caller
/// should retry once more data arrives.
pub fn try_take_frame(buf: &mut Buffer) -> Option<(u32, Vec<u8>)> {
    let data = buf.as_slice();
    if data.len() < HEADER_SIZE {
        return None;
    }

    let mut r = Reader::new(&data[..HEADER_SIZE]);
    let type_id = r.u32().expect("HEADER_SIZE bytes were checked above");
    let len = r.u32().expect("HEADER_SIZE bytes were checked above") as usize;

    if data.len() < HEADER_SIZE + len {
        return None;
    }

    let payload = data[HEADER_SIZE..HEADER_SIZE + len].to_vec();
    buf.advance(HEADER_SIZE + len);
    Some((type_id, payload))
}
