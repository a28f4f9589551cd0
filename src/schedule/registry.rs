use crate::context::capability::CapabilityTable;
use crate::foundation::error::GlmuxResult;
use crate::foundation::ids::ClientId;
use crate::proxy::client_proxy::{ClientEndpoint, ClientProxy};
use crate::proxy::message::ProxyMessage;
use crate::proxy::policy::CommandPolicy;
use std::collections::HashMap;
use std::rc::Rc;

/// The active proxy set, plus the mapping from external client keys to issued identifiers.
///
/// Proxies are kept in registration order. Identifiers come from a counter starting at 1 and
/// are never reused.
#[derive(Default)]
pub struct Registry {
    next_id: u32,
    ids_by_key: HashMap<String, ClientId>,
    proxies: Vec<ClientProxy>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a proxy for `key`, announce its identifier and send the capability table.
    ///
    /// Registering a key that is already present replaces the old proxy.
    pub fn register(
        &mut self,
        key: impl Into<String>,
        endpoint: ClientEndpoint,
        policy: Rc<CommandPolicy>,
        caps: &CapabilityTable,
    ) -> GlmuxResult<ClientId> {
        let key = key.into();
        if self.ids_by_key.contains_key(&key) {
            tracing::info!(key = %key, "client re-registered, replacing proxy");
            self.unregister(&key);
        }

        self.next_id += 1;
        let id = ClientId(self.next_id);
        let proxy = ClientProxy::new(id, endpoint, policy);
        proxy.send(ProxyMessage::Assigned { client_id: id })?;
        proxy.send(ProxyMessage::bootstrap(caps))?;

        self.ids_by_key.insert(key, id);
        self.proxies.push(proxy);
        Ok(id)
    }

    /// Remove the proxy for `key`. Its handle table and endpoint go with it.
    pub fn unregister(&mut self, key: &str) -> Option<ClientProxy> {
        let id = self.ids_by_key.remove(key)?;
        let pos = self.position(id)?;
        Some(self.proxies.remove(pos))
    }

    /// Identifier issued to `key`, if registered.
    pub fn id_for(&self, key: &str) -> Option<ClientId> {
        self.ids_by_key.get(key).copied()
    }

    /// Borrow a proxy by identifier.
    pub fn get(&self, id: ClientId) -> Option<&ClientProxy> {
        self.proxies.iter().find(|p| p.client_id() == id)
    }

    /// Mutably borrow a proxy by identifier.
    pub fn get_mut(&mut self, id: ClientId) -> Option<&mut ClientProxy> {
        self.proxies.iter_mut().find(|p| p.client_id() == id)
    }

    /// Active proxies in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &ClientProxy> {
        self.proxies.iter()
    }

    /// Active proxies as a slice.
    pub fn proxies(&self) -> &[ClientProxy] {
        &self.proxies
    }

    /// Number of active proxies.
    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    /// `true` when no proxy is registered.
    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    fn position(&self, id: ClientId) -> Option<usize> {
        self.proxies.iter().position(|p| p.client_id() == id)
    }
}
