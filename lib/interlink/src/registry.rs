use crate::bus::PacketBus;
use crate::error::PacketError;
use crate::packet::Packet;
use atlasnet_codec::Reader;
use atlasnet_ident::NodeIdentity;
use std::collections::HashMap;
use std::sync::Arc;

type Decoder = Box<dyn Fn(&[u8], NodeIdentity, &PacketBus) -> Result<(), PacketError> + Send + Sync>;

/// Maps a frame's wire `type_id` back to "decode it as `T` and hand it to
/// the bus". One registry per process; every packet type the process ever
/// receives must be registered once at startup, mirroring the teacher's
/// `PacketManager::RegisterType<T>()` call sites.
#[derive(Default)]
pub struct PacketRegistry {
    decoders: HashMap<u32, Decoder>,
}

impl PacketRegistry {
    pub fn new() -> PacketRegistry {
        PacketRegistry::default()
    }

    pub fn register<T: Packet>(&mut self) {
        let type_id = T::type_id();
        self.decoders.insert(
            type_id,
            Box::new(move |bytes, sender, bus| {
                let mut reader = Reader::new(bytes);
                let packet = T::decode(&mut reader).map_err(|_| PacketError { type_id })?;
                bus.dispatch(&packet, sender);
                Ok(())
            }),
        );
    }

    /// Decodes `bytes` according to `type_id` and dispatches the result on
    /// `bus`, tagged with the identity of the peer that sent it. Returns
    /// `Err` if no type was registered for `type_id`, or if the registered
    /// decoder could not parse `bytes`.
    pub fn decode_and_dispatch(
        &self,
        type_id: u32,
        bytes: &[u8],
        sender: NodeIdentity,
        bus: &PacketBus,
    ) -> Result<(), PacketError> {
        match self.decoders.get(&type_id) {
            Some(decoder) => decoder(bytes, sender, bus),
            None => Err(PacketError { type_id }),
        }
    }

    pub fn is_registered(&self, type_id: u32) -> bool {
        self.decoders.contains_key(&type_id)
    }
}

/// Convenience bundle so connection plumbing only has to carry one value.
pub struct Fabric {
    pub bus: Arc<PacketBus>,
    pub registry: PacketRegistry,
}

impl Fabric {
    pub fn new() -> Fabric {
        Fabric {
            bus: Arc::new(PacketBus::new()),
            registry: PacketRegistry::new(),
        }
    }
}

impl Default for Fabric {
    fn default() -> Self {
        Fabric::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atlasnet_codec::{CodecResult, Encode, Writer};
    use atlasnet_ident::Role;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct Mark(u32);

    impl Encode for Mark {
        fn encode(&self, w: &mut Writer) {
            w.u32(self.0);
        }
    }

    impl atlasnet_codec::Decode for Mark {
        fn decode(r: &mut Reader) -> CodecResult<Self> {
            Ok(Mark(r.u32()?))
        }
    }

    impl Packet for Mark {
        fn type_name() -> &'static str {
            "Mark"
        }
    }

    #[test]
    fn registered_type_decodes_and_dispatches() {
        let fabric = Fabric::new();
        let mut registry = fabric.registry;
        registry.register::<Mark>();

        let seen = Arc::new(AtomicU32::new(0));
        let seen2 = Arc::clone(&seen);
        let _sub = fabric.bus.subscribe::<Mark, _>(move |m, _sender| {
            seen2.store(m.0, Ordering::SeqCst);
        });

        let mut w = Writer::with_capacity(4);
        w.u32(42);
        registry
            .decode_and_dispatch(
                Mark::type_id(),
                &w.into_bytes(),
                NodeIdentity::singleton(Role::Watchdog),
                &fabric.bus,
            )
            .unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 42);
    }

    #[test]
    fn unknown_type_id_errors() {
        let registry = PacketRegistry::new();
        let bus = PacketBus::new();
        let err = registry
            .decode_and_dispatch(999, &[], NodeIdentity::singleton(Role::Watchdog), &bus)
            .unwrap_err();
        assert_eq!(err.type_id, 999);
    }
}
