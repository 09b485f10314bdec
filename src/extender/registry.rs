//! Registration and panic-isolated callback dispatch for extenders.
//!
//! Grounded on `Core/Extender/Extender.cpp` and `ExtenderManager.cpp`: an
//! extender is `(uuid, display_name, callbacks)`; registering one beyond
//! [`crate::core::constants::relay::MAX_EXTENDERS`] is rejected; an
//! unhandled panic out of any callback shuts that extender down (its
//! `on_shutdown` callback, if any, still runs) without affecting others.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::core::constants::relay::MAX_EXTENDERS;
use crate::core::error::{QuantumGateError, ResourceError, Result};
use crate::core::id::{ExtenderUUID, PeerLUID};

/// A peer-lifecycle event surfaced to registered extenders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerEvent {
    /// The peer session reached `Ready`.
    Connected,
    /// The peer session reached `Disconnected`.
    Disconnected,
    /// The peer's traffic is temporarily suspended (e.g. a relay hop in
    /// `Suspended`).
    Suspended,
    /// A previously suspended peer resumed.
    Resumed,
}

/// Callback surface an extender registers. Each is optional; an extender
/// that only cares about messages need not supply the others.
#[derive(Default)]
pub struct ExtenderCallbacks {
    /// Invoked once, synchronously, when the extender is added.
    pub on_startup: Option<Box<dyn Fn() + Send + Sync>>,
    /// Invoked once, synchronously, when the extender is removed or shut
    /// down after a panic.
    pub on_shutdown: Option<Box<dyn Fn() + Send + Sync>>,
    /// Invoked on a peer lifecycle transition, for peers that also
    /// support this extender.
    pub on_peer_event: Option<Box<dyn Fn(PeerLUID, PeerEvent) + Send + Sync>>,
    /// Invoked for each inbound `ExtenderCommunication` payload addressed
    /// to this extender.
    pub on_message: Option<Box<dyn Fn(PeerLUID, &[u8]) + Send + Sync>>,
}

impl std::fmt::Debug for ExtenderCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtenderCallbacks")
            .field("on_startup", &self.on_startup.is_some())
            .field("on_shutdown", &self.on_shutdown.is_some())
            .field("on_peer_event", &self.on_peer_event.is_some())
            .field("on_message", &self.on_message.is_some())
            .finish()
    }
}

/// A registered extender: its identity and callback surface.
#[derive(Debug)]
pub struct ExtenderHandle {
    uuid: ExtenderUUID,
    display_name: String,
    callbacks: ExtenderCallbacks,
}

impl ExtenderHandle {
    /// Build a handle for a not-yet-registered extender.
    pub fn new(uuid: ExtenderUUID, display_name: impl Into<String>, callbacks: ExtenderCallbacks) -> Self {
        Self { uuid, display_name, callbacks }
    }

    /// This extender's identifier.
    pub fn uuid(&self) -> ExtenderUUID {
        self.uuid
    }

    /// The human-readable name it registered under.
    pub fn display_name(&self) -> &str {
        &self.display_name
    }
}

/// Call `f` catching any panic, returning whether it ran to completion.
fn isolate<F: FnOnce()>(f: F) -> bool {
    catch_unwind(AssertUnwindSafe(f)).is_ok()
}

/// Owns every extender registered in this process.
#[derive(Default)]
pub struct ExtenderRegistry {
    extenders: HashMap<ExtenderUUID, ExtenderHandle>,
}

impl ExtenderRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handle`, running its `on_startup` callback. Rejected if
    /// the process-wide cap is already reached or the UUID is already
    /// registered.
    pub fn add(&mut self, handle: ExtenderHandle) -> Result<()> {
        if self.extenders.len() >= MAX_EXTENDERS {
            return Err(ResourceError::TooManyExtenders.into());
        }
        if self.extenders.contains_key(&handle.uuid) {
            return Err(QuantumGateError::Config(format!("extender {} already registered", handle.uuid)));
        }
        if let Some(on_startup) = &handle.callbacks.on_startup {
            if !isolate(|| on_startup()) {
                return Err(QuantumGateError::Config(format!("extender {} panicked during startup", handle.uuid)));
            }
        }
        self.extenders.insert(handle.uuid, handle);
        Ok(())
    }

    /// Unregister `uuid`, running its `on_shutdown` callback if present.
    /// A no-op if `uuid` was never registered.
    pub fn remove(&mut self, uuid: ExtenderUUID) {
        if let Some(handle) = self.extenders.remove(&uuid) {
            if let Some(on_shutdown) = &handle.callbacks.on_shutdown {
                isolate(|| on_shutdown());
            }
        }
    }

    /// Whether `uuid` is currently registered.
    pub fn is_registered(&self, uuid: ExtenderUUID) -> bool {
        self.extenders.contains_key(&uuid)
    }

    /// Every currently registered extender's UUID.
    pub fn registered_uuids(&self) -> impl Iterator<Item = ExtenderUUID> + '_ {
        self.extenders.keys().copied()
    }

    /// How many extenders are registered.
    pub fn len(&self) -> usize {
        self.extenders.len()
    }

    /// Whether no extenders are registered.
    pub fn is_empty(&self) -> bool {
        self.extenders.is_empty()
    }

    /// Deliver a peer event to `uuid`'s `on_peer_event` callback. A panic
    /// shuts the extender down (running its `on_shutdown`) and removes it.
    pub fn dispatch_peer_event(&mut self, uuid: ExtenderUUID, peer: PeerLUID, event: PeerEvent) {
        let survived = match self.extenders.get(&uuid).and_then(|h| h.callbacks.on_peer_event.as_ref()) {
            Some(callback) => isolate(|| callback(peer, event)),
            None => return,
        };
        if !survived {
            self.remove(uuid);
        }
    }

    /// Deliver a message payload to `uuid`'s `on_message` callback. A
    /// panic shuts the extender down (running its `on_shutdown`) and
    /// removes it.
    pub fn dispatch_message(&mut self, uuid: ExtenderUUID, peer: PeerLUID, payload: &[u8]) {
        let survived = match self.extenders.get(&uuid).and_then(|h| h.callbacks.on_message.as_ref()) {
            Some(callback) => isolate(|| callback(peer, payload)),
            None => return,
        };
        if !survived {
            self.remove(uuid);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::id::{PeerLuidAllocator, SigningAlgorithmFamily};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn uuid(tag: u8) -> ExtenderUUID {
        ExtenderUUID::from_public_key(SigningAlgorithmFamily::Ed25519, &[tag; 32])
    }

    #[test]
    fn registering_beyond_the_cap_is_rejected() {
        let mut registry = ExtenderRegistry::new();
        for i in 0..MAX_EXTENDERS {
            let id = ExtenderUUID::from_public_key(SigningAlgorithmFamily::Ed25519, &(i as u64).to_le_bytes());
            registry.add(ExtenderHandle::new(id, "x", ExtenderCallbacks::default())).unwrap();
        }
        let overflow = ExtenderHandle::new(uuid(255), "overflow", ExtenderCallbacks::default());
        assert!(registry.add(overflow).is_err());
    }

    #[test]
    fn startup_and_shutdown_callbacks_run() {
        let started = Arc::new(AtomicUsize::new(0));
        let stopped = Arc::new(AtomicUsize::new(0));
        let (s, t) = (started.clone(), stopped.clone());
        let callbacks = ExtenderCallbacks {
            on_startup: Some(Box::new(move || {
                s.fetch_add(1, Ordering::SeqCst);
            })),
            on_shutdown: Some(Box::new(move || {
                t.fetch_add(1, Ordering::SeqCst);
            })),
            ..Default::default()
        };
        let id = uuid(1);
        let mut registry = ExtenderRegistry::new();
        registry.add(ExtenderHandle::new(id, "demo", callbacks)).unwrap();
        assert_eq!(started.load(Ordering::SeqCst), 1);
        registry.remove(id);
        assert_eq!(stopped.load(Ordering::SeqCst), 1);
        assert!(!registry.is_registered(id));
    }

    #[test]
    fn a_panicking_message_callback_shuts_its_extender_down_only() {
        let shutdowns = Arc::new(AtomicUsize::new(0));
        let s = shutdowns.clone();
        let panicking = ExtenderCallbacks {
            on_message: Some(Box::new(|_peer, _payload| panic!("boom"))),
            on_shutdown: Some(Box::new(move || {
                s.fetch_add(1, Ordering::SeqCst);
            })),
            ..Default::default()
        };
        let healthy = ExtenderCallbacks::default();

        let panicking_id = uuid(1);
        let healthy_id = uuid(2);
        let mut registry = ExtenderRegistry::new();
        registry.add(ExtenderHandle::new(panicking_id, "panicker", panicking)).unwrap();
        registry.add(ExtenderHandle::new(healthy_id, "healthy", healthy)).unwrap();

        let allocator = PeerLuidAllocator::new();
        let peer = allocator.allocate();

        let previous_hook = std::panic::take_hook();
        std::panic::set_hook(Box::new(|_| {}));
        registry.dispatch_message(panicking_id, peer, b"hello");
        std::panic::set_hook(previous_hook);

        assert!(!registry.is_registered(panicking_id));
        assert!(registry.is_registered(healthy_id));
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
    }
}
