use atlasnet_codec::{CodecResult, Decode, Encode, Reader, Writer};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};

/// Network endpoint for a node. IPv4-only for now (spec §3); carries an
/// opaque wire form so the transport layer does not need to know the
/// address shape.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct Address {
    pub octets: [u8; 4],
    pub port: u16,
}

impl Address {
    #[inline]
    pub fn new(octets: [u8; 4], port: u16) -> Address {
        Address { octets, port }
    }

    #[inline]
    pub fn from_socket_addr(addr: SocketAddrV4) -> Address {
        Address {
            octets: addr.ip().octets(),
            port: addr.port(),
        }
    }

    #[inline]
    pub fn to_socket_addr(self) -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::from(self.octets), self.port)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_socket_addr())
    }
}

impl Encode for Address {
    fn encode(&self, w: &mut Writer) {
        w.u8(self.octets[0]);
        w.u8(self.octets[1]);
        w.u8(self.octets[2]);
        w.u8(self.octets[3]);
        w.u16(self.port);
    }
}

impl Decode for Address {
    fn decode(r: &mut Reader) -> CodecResult<Self> {
        let octets = [r.u8()?, r.u8()?, r.u8()?, r.u8()?];
        let port = r.u16()?;
        Ok(Address { octets, port })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_wire_form() {
        let addr = Address::new([127, 0, 0, 1], 28008);
        let bytes = addr.encode_to_vec();
        let mut r = Reader::new(&bytes);
        assert_eq!(Address::decode(&mut r).unwrap(), addr);
    }

    #[test]
    fn display_matches_socket_addr_form() {
        let addr = Address::new([10, 0, 0, 5], 9001);
        assert_eq!(addr.to_string(), "10.0.0.5:9001");
    }
}
