use crate::packet::Packet;
use atlasnet_ident::NodeIdentity;
use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

type ErasedCallback = Box<dyn Fn(&dyn Any, NodeIdentity) + Send + Sync>;

struct CallbackEntry {
    alive: AtomicBool,
    id: u64,
    cb: ErasedCallback,
}

/// Fan-out point for decoded packets (spec §4.4). A direct port of
/// `PacketManager` from the original Interlink: callbacks are snapshotted
/// under the lock and invoked without it held, so a slow or reentrant
/// handler never blocks registration or dispatch of other types; removal is
/// a lazy `alive` flag flipped by `Subscription::drop`, swept out later by
/// `cleanup`.
pub struct PacketBus {
    callbacks: Mutex<HashMap<u32, Vec<Arc<CallbackEntry>>>>,
    next_id: AtomicU64,
}

impl Default for PacketBus {
    fn default() -> Self {
        PacketBus {
            callbacks: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl PacketBus {
    pub fn new() -> PacketBus {
        PacketBus::default()
    }

    /// Registers a handler for `T`. Handlers receive the decoded packet plus
    /// the sender's identity (spec §4.4). The returned `Subscription` must
    /// be kept alive for as long as the handler should keep firing; dropping
    /// it deactivates the handler (it does not immediately remove the entry
    /// — see `cleanup`).
    pub fn subscribe<T, F>(self: &Arc<Self>, cb: F) -> Subscription
    where
        T: Packet,
        F: Fn(&T, NodeIdentity) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let entry = Arc::new(CallbackEntry {
            alive: AtomicBool::new(true),
            id,
            cb: Box::new(move |any: &dyn Any, sender: NodeIdentity| {
                if let Some(packet) = any.downcast_ref::<T>() {
                    cb(packet, sender);
                }
            }),
        });

        self.callbacks
            .lock()
            .expect("packet bus mutex poisoned")
            .entry(T::type_id())
            .or_default()
            .push(entry);

        Subscription {
            owner: Arc::downgrade(self),
            type_id: T::type_id(),
            id,
        }
    }

    /// Invokes every live handler registered for `T`'s type id with `packet`
    /// and `sender`.
    pub fn dispatch<T: Packet>(&self, packet: &T, sender: NodeIdentity) {
        let snapshot: Vec<Arc<CallbackEntry>> = {
            let guard = self.callbacks.lock().expect("packet bus mutex poisoned");
            match guard.get(&T::type_id()) {
                Some(entries) => entries.clone(),
                None => return,
            }
        };

        for entry in snapshot {
            if entry.alive.load(Ordering::Acquire) {
                (entry.cb)(packet as &dyn Any, sender);
            }
        }
    }

    /// Sweeps out entries whose subscription has been dropped. Dispatch
    /// already skips them; this just reclaims the `Vec` slots.
    pub fn cleanup(&self) {
        let mut guard = self.callbacks.lock().expect("packet bus mutex poisoned");
        for entries in guard.values_mut() {
            entries.retain(|e| e.alive.load(Ordering::Acquire));
        }
    }

    fn deactivate(&self, type_id: u32, id: u64) {
        let guard = self.callbacks.lock().expect("packet bus mutex poisoned");
        if let Some(entries) = guard.get(&type_id) {
            for entry in entries {
                if entry.id == id {
                    entry.alive.store(false, Ordering::Release);
                    break;
                }
            }
        }
    }
}

/// Move-only handle for one `PacketBus::subscribe` registration. Dropping it
/// deactivates the handler.
pub struct Subscription {
    owner: std::sync::Weak<PacketBus>,
    type_id: u32,
    id: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(owner) = self.owner.upgrade() {
            owner.deactivate(self.type_id, self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atlasnet_codec::{CodecResult, Reader, Writer};
    use atlasnet_ident::Role;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug)]
    struct Ping(u32);

    impl atlasnet_codec::Encode for Ping {
        fn encode(&self, w: &mut Writer) {
            w.u32(self.0);
        }
    }

    impl atlasnet_codec::Decode for Ping {
        fn decode(r: &mut Reader) -> CodecResult<Self> {
            Ok(Ping(r.u32()?))
        }
    }

    impl Packet for Ping {
        fn type_name() -> &'static str {
            "Ping"
        }
    }

    fn sender() -> NodeIdentity {
        NodeIdentity::singleton(Role::Watchdog)
    }

    #[test]
    fn dispatch_reaches_every_live_subscriber() {
        let bus = Arc::new(PacketBus::new());
        let count = Arc::new(AtomicUsize::new(0));

        let c1 = Arc::clone(&count);
        let sub1 = bus.subscribe::<Ping, _>(move |p, _sender| {
            c1.fetch_add(p.0 as usize, Ordering::SeqCst);
        });
        let c2 = Arc::clone(&count);
        let _sub2 = bus.subscribe::<Ping, _>(move |p, _sender| {
            c2.fetch_add(p.0 as usize, Ordering::SeqCst);
        });

        bus.dispatch(&Ping(5), sender());
        assert_eq!(count.load(Ordering::SeqCst), 10);

        drop(sub1);
        bus.dispatch(&Ping(1), sender());
        assert_eq!(count.load(Ordering::SeqCst), 11, "dropped subscription must stop firing");
    }

    #[test]
    fn dispatch_passes_sender_identity_through() {
        let bus = Arc::new(PacketBus::new());
        let seen = Arc::new(Mutex::new(None));
        let seen2 = Arc::clone(&seen);
        let _sub = bus.subscribe::<Ping, _>(move |_p, from| {
            *seen2.lock().unwrap() = Some(from);
        });

        bus.dispatch(&Ping(1), sender());
        assert_eq!(*seen.lock().unwrap(), Some(sender()));
    }

    #[test]
    fn cleanup_reclaims_dropped_entries() {
        let bus = Arc::new(PacketBus::new());
        let sub = bus.subscribe::<Ping, _>(|_, _| {});
        drop(sub);
        bus.cleanup();
        bus.dispatch(&Ping(1), sender());
    }
}
