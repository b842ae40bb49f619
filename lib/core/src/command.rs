use atlasnet_codec::{fnv1a_64, CodecResult, Decode, Encode, Reader, Writer};
use uuid::Uuid;

/// A typed, per-game command payload (spec §4.12). AtlasNet only needs to
/// move these; the game-specific fields inside a concrete implementer are a
/// collaborator concern entirely outside this crate.
///
/// `command_id` is derived from `command_name` via FNV-1a rather than stored
/// per-instance: it identifies the *type*, not the value, so it is computed
/// once (the registry that maps ids back to decoders keys off it too).
pub trait Command: Sized {
    fn command_name() -> &'static str;

    fn command_id() -> u64 {
        fnv1a_64(Self::command_name())
    }

    fn encode_body(&self, w: &mut Writer);
    fn decode_body(r: &mut Reader) -> CodecResult<Self>;
}

/// Encodes a typed command into an (id, body) pair ready to embed in either
/// envelope below.
pub fn encode_command<C: Command>(cmd: &C) -> (u64, Vec<u8>) {
    let mut w = Writer::new();
    cmd.encode_body(&mut w);
    (C::command_id(), w.into_bytes())
}

/// Decodes a command body, given the caller already resolved `command_id` to
/// `C` via a registry.
pub fn decode_command<C: Command>(body: &[u8]) -> CodecResult<C> {
    let mut r = Reader::new(body);
    C::decode_body(&mut r)
}

/// Client-Intent Bus wire envelope (spec §4.12): a client-originated command
/// with no explicit target, since there is only one proxy it could possibly
/// be addressed to — the sender's managing proxy. Carries `client_id` so the
/// shard that ultimately consumes it (after a proxy forwards it on) can tell
/// which entity it applies to without trusting the immediate Interlink
/// sender, which is the forwarding proxy, not the originating client.
/// `packet_seq` is the client's own monotonic counter for this stream; a
/// shard draining a client hand-off stamps `ShardDrained` with the highest
/// `packet_seq` it has applied so the new owner can ignore any buffered
/// intent replayed at or below that point (spec §4.11 stage 6).
#[derive(Debug, Clone, PartialEq)]
pub struct ClientIntentCommandPacket {
    pub client_id: Uuid,
    pub command_id: u64,
    pub packet_seq: u64,
    pub body: Vec<u8>,
}

impl ClientIntentCommandPacket {
    pub fn for_command<C: Command>(client_id: Uuid, cmd: &C, packet_seq: u64) -> ClientIntentCommandPacket {
        let (command_id, body) = encode_command(cmd);
        ClientIntentCommandPacket { client_id, command_id, packet_seq, body }
    }
}

impl Encode for ClientIntentCommandPacket {
    fn encode(&self, w: &mut Writer) {
        w.uuid(&self.client_id);
        w.u64(self.command_id);
        w.u64(self.packet_seq);
        w.blob(&self.body);
    }
}

impl Decode for ClientIntentCommandPacket {
    fn decode(r: &mut Reader) -> CodecResult<Self> {
        let client_id = r.uuid()?;
        let command_id = r.u64()?;
        let packet_seq = r.u64()?;
        let body = r.blob()?;
        Ok(ClientIntentCommandPacket { client_id, command_id, packet_seq, body })
    }
}

/// Server-State Bus wire envelope (spec §4.12): addressed by `client_id`
/// since a shard may be driving state for many clients, each possibly
/// fronted by a different proxy.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerStateCommandPacket {
    pub client_id: Uuid,
    pub command_id: u64,
    pub body: Vec<u8>,
}

impl ServerStateCommandPacket {
    pub fn for_command<C: Command>(client_id: Uuid, cmd: &C) -> ServerStateCommandPacket {
        let (command_id, body) = encode_command(cmd);
        ServerStateCommandPacket {
            client_id,
            command_id,
            body,
        }
    }
}

impl Encode for ServerStateCommandPacket {
    fn encode(&self, w: &mut Writer) {
        w.uuid(&self.client_id);
        w.u64(self.command_id);
        w.blob(&self.body);
    }
}

impl Decode for ServerStateCommandPacket {
    fn decode(r: &mut Reader) -> CodecResult<Self> {
        let client_id = r.uuid()?;
        let command_id = r.u64()?;
        let body = r.blob()?;
        Ok(ServerStateCommandPacket {
            client_id,
            command_id,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MoveCommand {
        dx: f32,
        dz: f32,
    }

    impl Command for MoveCommand {
        fn command_name() -> &'static str {
            "MoveCommand"
        }

        fn encode_body(&self, w: &mut Writer) {
            w.f32(self.dx);
            w.f32(self.dz);
        }

        fn decode_body(r: &mut Reader) -> CodecResult<Self> {
            Ok(MoveCommand {
                dx: r.f32()?,
                dz: r.f32()?,
            })
        }
    }

    #[test]
    fn command_id_is_stable_across_calls() {
        assert_eq!(MoveCommand::command_id(), MoveCommand::command_id());
    }

    #[test]
    fn client_intent_envelope_round_trips_typed_body() {
        let cmd = MoveCommand { dx: 1.0, dz: -2.0 };
        let client_id = Uuid::new_v4();
        let packet = ClientIntentCommandPacket::for_command(client_id, &cmd, 17);

        let bytes = packet.encode_to_vec();
        let mut r = Reader::new(&bytes);
        let decoded_packet = ClientIntentCommandPacket::decode(&mut r).unwrap();
        assert_eq!(decoded_packet.client_id, client_id);
        assert_eq!(decoded_packet.command_id, MoveCommand::command_id());
        assert_eq!(decoded_packet.packet_seq, 17);

        let decoded_cmd: MoveCommand = decode_command(&decoded_packet.body).unwrap();
        assert_eq!(decoded_cmd.dx, 1.0);
        assert_eq!(decoded_cmd.dz, -2.0);
    }

    #[test]
    fn server_state_envelope_carries_client_id() {
        let cmd = MoveCommand { dx: 0.0, dz: 0.0 };
        let client_id = Uuid::new_v4();
        let packet = ServerStateCommandPacket::for_command(client_id, &cmd);

        let bytes = packet.encode_to_vec();
        let mut r = Reader::new(&bytes);
        let decoded = ServerStateCommandPacket::decode(&mut r).unwrap();
        assert_eq!(decoded.client_id, client_id);
        assert_eq!(decoded.command_id, MoveCommand::command_id());
    }
}
