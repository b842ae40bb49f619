use atlasnet_codec::{fnv1a_32, Decode, Encode};

/// Anything that can travel across the fabric as a frame (spec §4.4).
/// `type_id` is the frame-header discriminant the registry and
/// subscription bus key off of; it is derived from `type_name` rather than
/// assigned by hand so adding a packet type never risks colliding with an
/// existing numeric id by accident (a collision between two *different*
/// names remains possible in principle — the birthday bound on 32 bits — and
/// is accepted the same way the teacher's `PacketType` enum accepts exhausting
/// its discriminant space).
pub trait Packet: Encode + Decode + Send + Sync + 'static {
    fn type_name() -> &'static str;

    fn type_id() -> u32 {
        fnv1a_32(Self::type_name())
    }
}
