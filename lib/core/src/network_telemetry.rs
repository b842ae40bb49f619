use atlasnet_codec::{CodecResult, Decode, Encode, Reader, Writer};
use atlasnet_ident::NodeIdentity;

/// One row of `network_telemetry` (spec §4.13, §6): the liveness/addressing
/// snapshot every internal node republishes alongside its health ping, for
/// the Cartograph cluster view. Distinct from `health_pings`, which only
/// tracks expiry — this is what a dashboard actually renders per node.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkTelemetryRow {
    pub identity: NodeIdentity,
    pub listen_addr: String,
    pub last_seen_ms: u64,
}

impl Encode for NetworkTelemetryRow {
    fn encode(&self, w: &mut Writer) {
        self.identity.encode(w);
        w.string(&self.listen_addr);
        w.u64(self.last_seen_ms);
    }
}

impl Decode for NetworkTelemetryRow {
    fn decode(r: &mut Reader) -> CodecResult<Self> {
        Ok(NetworkTelemetryRow {
            identity: NodeIdentity::decode(r)?,
            listen_addr: r.string()?,
            last_seen_ms: r.u64()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atlasnet_ident::Role;
    use uuid::Uuid;

    #[test]
    fn round_trips() {
        let row = NetworkTelemetryRow {
            identity: NodeIdentity::new(Role::Shard, Uuid::new_v4()),
            listen_addr: "10.0.0.5:29100".to_string(),
            last_seen_ms: 123_456,
        };
        let bytes = row.encode_to_vec();
        let mut r = Reader::new(&bytes);
        assert_eq!(NetworkTelemetryRow::decode(&mut r).unwrap(), row);
    }
}
