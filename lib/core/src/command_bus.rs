//! The two Command Buses (spec §4.12 / C12): a buffer-then-flush mechanism
//! shared by the client-intent direction (client → server) and the
//! server-state direction (server → client), plus a receive-side
//! `CommandRegistry` that decodes an inbound envelope's `command_id` back
//! into a typed callback.
//!
//! Grounded on the teacher's `CommandBus`/`ClientCommandBus`/
//! `ServerCommandBus` split: one generic buffer-under-mutex/flush-outside-it
//! mechanism, two thin callers that differ only in what they key sends by.

use crate::command::{
    decode_command, encode_command, ClientIntentCommandPacket, Command, ServerStateCommandPacket,
};
use atlasnet_ident::NodeIdentity;
use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Client-Intent Bus (spec §4.12): buffers outbound `(command)` pairs with
/// no destination field — there is only one proxy a client's intents could
/// possibly be addressed to. `dispatch` appends under the lock; `flush`
/// drains under the same lock and hands the drained packets to the caller,
/// who performs the actual send outside it.
#[derive(Default)]
pub struct ClientIntentBus {
    buffer: Mutex<Vec<ClientIntentCommandPacket>>,
}

impl ClientIntentBus {
    pub fn new() -> ClientIntentBus {
        ClientIntentBus::default()
    }

    pub fn dispatch<C: Command>(&self, client_id: Uuid, cmd: &C, packet_seq: u64) {
        let packet = ClientIntentCommandPacket::for_command(client_id, cmd, packet_seq);
        self.buffer.lock().expect("client-intent bus mutex poisoned").push(packet);
    }

    /// Drains everything buffered since the last flush, invoking `send` once
    /// per packet outside the lock. A flush with nothing buffered invokes
    /// `send` zero times (spec §8 idempotence).
    pub fn flush<F: FnMut(ClientIntentCommandPacket)>(&self, mut send: F) {
        let drained = std::mem::take(&mut *self.buffer.lock().expect("client-intent bus mutex poisoned"));
        for packet in drained {
            send(packet);
        }
    }

    pub fn pending_len(&self) -> usize {
        self.buffer.lock().expect("client-intent bus mutex poisoned").len()
    }
}

/// Server-State Bus (spec §4.12): buffers outbound `(client_id, command)`
/// pairs; `flush` resolves each client's managing proxy (the caller's job,
/// since only it holds a discovery bulletin handle) and ships one
/// `ServerStateCommandPacket` per pair.
#[derive(Default)]
pub struct ServerStateBus {
    buffer: Mutex<Vec<ServerStateCommandPacket>>,
}

impl ServerStateBus {
    pub fn new() -> ServerStateBus {
        ServerStateBus::default()
    }

    pub fn dispatch<C: Command>(&self, client_id: Uuid, cmd: &C) {
        let packet = ServerStateCommandPacket::for_command(client_id, cmd);
        self.buffer.lock().expect("server-state bus mutex poisoned").push(packet);
    }

    pub fn flush<F: FnMut(ServerStateCommandPacket)>(&self, mut send: F) {
        let drained = std::mem::take(&mut *self.buffer.lock().expect("server-state bus mutex poisoned"));
        for packet in drained {
            send(packet);
        }
    }

    pub fn pending_len(&self) -> usize {
        self.buffer.lock().expect("server-state bus mutex poisoned").len()
    }
}

/// Context handed to a registered command handler alongside the decoded
/// command: who sent the envelope, and (for the client-intent direction)
/// which client it was issued on behalf of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandHeader {
    pub sender: NodeIdentity,
    pub client_id: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandRegistryError {
    pub command_id: u64,
}

type ErasedHandler = Box<dyn Fn(&dyn Any, CommandHeader) + Send + Sync>;

struct HandlerEntry {
    alive: AtomicBool,
    id: u64,
    cb: ErasedHandler,
}

type CommandDecoder = Box<dyn Fn(&[u8], CommandHeader, &HashMap<u64, Vec<Arc<HandlerEntry>>>) -> Result<(), CommandRegistryError> + Send + Sync>;

/// Process-wide map from `command_id` to "decode it as `C` and hand it to
/// every subscriber" (spec §4.12's supplementary `CommandRegistry`,
/// analogous to the Interlink packet registry in shape). An unrecognized
/// `command_id` is reported, not panicked on — the caller logs and drops it.
pub struct CommandRegistry {
    decoders: HashMap<u64, CommandDecoder>,
    handlers: Mutex<HashMap<u64, Vec<Arc<HandlerEntry>>>>,
    next_id: AtomicU64,
}

impl Default for CommandRegistry {
    fn default() -> Self {
        CommandRegistry {
            decoders: HashMap::new(),
            handlers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl CommandRegistry {
    pub fn new() -> CommandRegistry {
        CommandRegistry::default()
    }

    /// Registers `C`'s decoder once at startup. Safe to call without ever
    /// calling `subscribe::<C>` (e.g. a node that only forwards envelopes
    /// opaquely still wants `decode_and_dispatch` to recognize the id).
    pub fn register<C: Command>(&mut self) {
        let command_id = C::command_id();
        self.decoders.entry(command_id).or_insert_with(|| {
            Box::new(move |body, header, handlers| {
                let cmd: C = decode_command(body).map_err(|_| CommandRegistryError { command_id })?;
                if let Some(entries) = handlers.get(&command_id) {
                    for entry in entries {
                        if entry.alive.load(Ordering::Acquire) {
                            (entry.cb)(&cmd as &dyn Any, header);
                        }
                    }
                }
                Ok(())
            })
        });
    }

    /// Registers a typed handler for `C`. The returned `CommandSubscription`
    /// must be kept alive for as long as the handler should keep firing.
    pub fn subscribe<C, F>(&mut self, handler: F) -> CommandSubscription
    where
        C: Command,
        F: Fn(&C, CommandHeader) + Send + Sync + 'static,
    {
        self.register::<C>();
        let command_id = C::command_id();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let entry = Arc::new(HandlerEntry {
            alive: AtomicBool::new(true),
            id,
            cb: Box::new(move |any: &dyn Any, header: CommandHeader| {
                if let Some(cmd) = any.downcast_ref::<C>() {
                    handler(cmd, header);
                }
            }),
        });

        self.handlers
            .lock()
            .expect("command registry mutex poisoned")
            .entry(command_id)
            .or_default()
            .push(entry);

        CommandSubscription { command_id, id, registry: self }
    }

    /// Decodes `body` per its registered `command_id` and dispatches it to
    /// every live subscriber. Returns `Err` for an unregistered id — the
    /// caller logs and drops rather than treating it as fatal (spec §7).
    pub fn decode_and_dispatch(&self, command_id: u64, body: &[u8], header: CommandHeader) -> Result<(), CommandRegistryError> {
        let decoder = self.decoders.get(&command_id).ok_or(CommandRegistryError { command_id })?;
        let handlers = self.handlers.lock().expect("command registry mutex poisoned");
        decoder(body, header, &handlers)
    }

    fn deactivate(&self, command_id: u64, id: u64) {
        let handlers = self.handlers.lock().expect("command registry mutex poisoned");
        if let Some(entries) = handlers.get(&command_id) {
            for entry in entries {
                if entry.id == id {
                    entry.alive.store(false, Ordering::Release);
                    break;
                }
            }
        }
    }
}

/// Move-only handle for one `CommandRegistry::subscribe` registration.
/// Dropping it deactivates the handler, mirroring Interlink's `Subscription`
/// (spec §9's subscription RAII design note).
pub struct CommandSubscription<'a> {
    registry: &'a CommandRegistry,
    command_id: u64,
    id: u64,
}

impl<'a> Drop for CommandSubscription<'a> {
    fn drop(&mut self) {
        self.registry.deactivate(self.command_id, self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atlasnet_codec::{CodecResult, Reader, Writer};
    use atlasnet_ident::Role;
    use std::sync::atomic::AtomicI32;

    struct Ping(i32);

    impl Command for Ping {
        fn command_name() -> &'static str {
            "command-bus-test-ping"
        }
        fn encode_body(&self, w: &mut Writer) {
            w.i32(self.0);
        }
        fn decode_body(r: &mut Reader) -> CodecResult<Self> {
            Ok(Ping(r.i32()?))
        }
    }

    fn header() -> CommandHeader {
        CommandHeader {
            sender: NodeIdentity::singleton(Role::Watchdog),
            client_id: None,
        }
    }

    #[test]
    fn client_intent_bus_second_flush_with_no_dispatch_sends_nothing() {
        let bus = ClientIntentBus::new();
        bus.dispatch(Uuid::new_v4(), &Ping(1), 1);

        let mut sent = 0;
        bus.flush(|_| sent += 1);
        assert_eq!(sent, 1);

        bus.flush(|_| sent += 1);
        assert_eq!(sent, 1, "a flush with nothing newly dispatched must send zero packets");
    }

    #[test]
    fn server_state_bus_buffers_per_client() {
        let bus = ServerStateBus::new();
        let client = Uuid::new_v4();
        bus.dispatch(client, &Ping(9));
        assert_eq!(bus.pending_len(), 1);

        let mut seen = Vec::new();
        bus.flush(|packet| seen.push(packet));
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].client_id, client);
    }

    #[test]
    fn registry_dispatches_to_subscriber() {
        let mut registry = CommandRegistry::new();
        let seen = Arc::new(AtomicI32::new(0));
        let seen2 = Arc::clone(&seen);
        let _sub = registry.subscribe::<Ping, _>(move |p, _header| {
            seen2.store(p.0, Ordering::SeqCst);
        });

        let (command_id, body) = encode_command(&Ping(42));
        registry.decode_and_dispatch(command_id, &body, header()).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 42);
    }

    #[test]
    fn registry_reports_unknown_command_id_without_panicking() {
        let registry = CommandRegistry::new();
        let err = registry.decode_and_dispatch(999, &[], header()).unwrap_err();
        assert_eq!(err.command_id, 999);
    }

    #[test]
    fn dropped_subscription_stops_firing() {
        let mut registry = CommandRegistry::new();
        let seen = Arc::new(AtomicI32::new(0));
        let seen2 = Arc::clone(&seen);
        let sub = registry.subscribe::<Ping, _>(move |p, _header| {
            seen2.store(p.0, Ordering::SeqCst);
        });
        drop(sub);

        let (command_id, body) = encode_command(&Ping(7));
        registry.decode_and_dispatch(command_id, &body, header()).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }
}
