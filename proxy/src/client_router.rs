//! Client Router (spec §4.11 / C11): the proxy's half of the six-phase
//! client hand-off. Binds each client to its current owning shard, freezes
//! and buffers intents while a hand-off is in flight, and flushes them to
//! the new owner on activation — the proxy is the only participant that
//! touches every leg of the hand-off (the shard-side halves live in
//! `shard::client_transfer::ClientTransferCoordinator`).

use atlasnet_core::ClientIntentCommandPacket;
use atlasnet_ident::NodeIdentity;
use atlasnet_interlink::ClientTransferPacket;
use slog::{o, warn, Logger};
use std::collections::HashMap;
use uuid::Uuid;

struct ClientBinding {
    owning_shard: NodeIdentity,
    frozen: bool,
    buffered: Vec<ClientIntentCommandPacket>,
}

struct PendingTransfer {
    client_id: Uuid,
    current: NodeIdentity,
    target: NodeIdentity,
}

/// Where `route_intent` says an intent should go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
    Forward(NodeIdentity),
    Buffered,
    Unbound,
}

/// Everything the caller needs to finish a `ShardDrained`-triggered
/// activation: who to flush `flushed_intents` to, and the
/// `ProxyTransferActivate` reply to send.
pub struct Activation {
    pub client_id: Uuid,
    pub target: NodeIdentity,
    pub flushed_intents: Vec<ClientIntentCommandPacket>,
    pub activate_packet: ClientTransferPacket,
}

/// What handling one inbound `ClientTransferPacket` produced.
pub enum RouterOutcome {
    /// A `ProxyFreeze` reply addressed back to the sender (shard A).
    Reply(NodeIdentity, ClientTransferPacket),
    /// A completed hand-off: flush `flushed_intents` to `target`, then send
    /// `activate_packet` to `target` as well.
    Activation(Activation),
}

pub struct ClientRouter {
    bindings: HashMap<Uuid, ClientBinding>,
    pending: HashMap<Uuid, PendingTransfer>,
    log: Logger,
}

impl ClientRouter {
    pub fn new(log: &Logger) -> ClientRouter {
        ClientRouter {
            bindings: HashMap::new(),
            pending: HashMap::new(),
            log: log.new(o!("component" => "client-router")),
        }
    }

    pub fn bind_client(&mut self, client_id: Uuid, shard: NodeIdentity) {
        self.bindings.insert(
            client_id,
            ClientBinding { owning_shard: shard, frozen: false, buffered: Vec::new() },
        );
    }

    pub fn owning_shard(&self, client_id: Uuid) -> Option<NodeIdentity> {
        self.bindings.get(&client_id).map(|b| b.owning_shard)
    }

    pub fn is_frozen(&self, client_id: Uuid) -> bool {
        self.bindings.get(&client_id).map(|b| b.frozen).unwrap_or(false)
    }

    pub fn bound_client_count(&self) -> usize {
        self.bindings.len()
    }

    /// Every client currently bound, for periodically republishing
    /// `CLIENT_PROXY_ASSIGNMENT` rows (spec §4.12).
    pub fn bound_client_ids(&self) -> Vec<Uuid> {
        self.bindings.keys().copied().collect()
    }

    /// Routes one client intent: forwarded immediately to the owning shard,
    /// or buffered if a hand-off currently has this client frozen (spec
    /// §4.11 stage 4's "intents queued at the proxy").
    pub fn route_intent(&mut self, client_id: Uuid, packet: ClientIntentCommandPacket) -> RouteDecision {
        match self.bindings.get_mut(&client_id) {
            Some(binding) if binding.frozen => {
                binding.buffered.push(packet);
                RouteDecision::Buffered
            }
            Some(binding) => RouteDecision::Forward(binding.owning_shard),
            None => RouteDecision::Unbound,
        }
    }

    /// Handles an inbound `ClientTransferPacket` (only `ProxyRequestSwitch`
    /// and `ShardDrained` are ever addressed to a proxy; the other three
    /// variants pass only between shards). Packets referencing an unknown or
    /// mismatched client/transfer are dropped and logged, same
    /// out-of-order-stage policy as the shard-side coordinator.
    pub fn handle_packet(&mut self, sender: NodeIdentity, packet: ClientTransferPacket) -> Option<RouterOutcome> {
        match packet {
            ClientTransferPacket::ProxyRequestSwitch { transfer_id, client_id, target, .. } => {
                let binding = match self.bindings.get_mut(&client_id) {
                    Some(b) if b.owning_shard == sender => b,
                    _ => {
                        warn!(self.log, "ProxyRequestSwitch for an unbound or mismatched client"; "client_id" => %client_id);
                        return None;
                    }
                };
                binding.frozen = true;

                self.pending.insert(transfer_id, PendingTransfer { client_id, current: sender, target });
                Some(RouterOutcome::Reply(sender, ClientTransferPacket::ProxyFreeze { transfer_id }))
            }

            ClientTransferPacket::ShardDrained { transfer_id, generation, .. } => {
                let pending = match self.pending.remove(&transfer_id) {
                    Some(p) if p.current == sender => p,
                    Some(p) => {
                        warn!(self.log, "ShardDrained from an unexpected sender"; "transfer_id" => %transfer_id);
                        self.pending.insert(transfer_id, p);
                        return None;
                    }
                    None => {
                        warn!(self.log, "ShardDrained for an unknown client transfer"; "transfer_id" => %transfer_id);
                        return None;
                    }
                };

                let binding = match self.bindings.get_mut(&pending.client_id) {
                    Some(b) => b,
                    None => {
                        warn!(self.log, "ShardDrained for a client with no binding"; "client_id" => %pending.client_id);
                        return None;
                    }
                };

                binding.owning_shard = pending.target;
                binding.frozen = false;
                let flushed_intents = std::mem::take(&mut binding.buffered);

                Some(RouterOutcome::Activation(Activation {
                    client_id: pending.client_id,
                    target: pending.target,
                    flushed_intents,
                    activate_packet: ClientTransferPacket::ProxyTransferActivate { transfer_id, generation },
                }))
            }

            other => {
                warn!(self.log, "client router received a shard-to-shard-only packet"; "variant" => ?std::mem::discriminant(&other));
                None
            }
        }
    }

    /// Drops in-flight transfers and unfreezes affected clients on peer
    /// failure (spec §4.11's failure semantics): if A died between stages 3
    /// and 5, the client stays bound to (now-dead) A until a fresh transfer
    /// completes against whichever shard next claims the bound; if B died
    /// after stage 4 but before 6, unfreezing here lets normal forwarding
    /// resume to A so the next sweep can open a transfer against a new
    /// target.
    pub fn cancel_transfers_with(&mut self, peer: NodeIdentity) {
        let stale: Vec<Uuid> = self
            .pending
            .iter()
            .filter(|(_, p)| p.current == peer || p.target == peer)
            .map(|(id, _)| *id)
            .collect();

        for transfer_id in stale {
            if let Some(pending) = self.pending.remove(&transfer_id) {
                if let Some(binding) = self.bindings.get_mut(&pending.client_id) {
                    binding.frozen = false;
                }
            }
        }
    }
}
