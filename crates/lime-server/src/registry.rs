//! Connected node registry
//!
//! Maintains the set of nodes with an established session, assigning each
//! one a unique instance so two connections for the same identity can
//! coexist.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use lime_common::channel::Channel;
use lime_common::types::{Identity, Node};

/// Registry of all connected nodes
#[derive(Default)]
pub struct NodeRegistry {
    nodes: DashMap<Node, Arc<Channel>>,
}

impl NodeRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Assign a node address for an authenticated identity and record its
    /// channel
    ///
    /// The client's proposed instance is honored when free; a taken
    /// instance gets a numeric suffix, and a missing one becomes
    /// `default`.
    pub fn register(
        &self,
        identity: &Identity,
        instance: Option<&str>,
        channel: Arc<Channel>,
    ) -> Node {
        let base = match instance {
            Some(instance) if !instance.is_empty() => instance.to_string(),
            _ => "default".to_string(),
        };

        let mut candidate = identity.clone().into_node(base.clone());
        let mut attempt = 1u32;
        while self.nodes.contains_key(&candidate) {
            candidate = identity.clone().into_node(format!("{base}-{attempt}"));
            attempt += 1;
        }

        self.nodes.insert(candidate.clone(), channel);
        info!(node = %candidate, "node registered");
        candidate
    }

    /// Remove a node when its session ends
    pub fn unregister(&self, node: &Node) {
        if self.nodes.remove(node).is_some() {
            info!(%node, "node unregistered");
        }
    }

    /// Channel of a connected node, if any
    pub fn get(&self, node: &Node) -> Option<Arc<Channel>> {
        self.nodes.get(node).map(|entry| entry.value().clone())
    }

    /// Number of connected nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lime_common::channel::ChannelConfig;
    use lime_common::transport::InProcessTransport;

    fn channel() -> Arc<Channel> {
        let (transport, _peer) = InProcessTransport::pair();
        Channel::new(Arc::new(transport), ChannelConfig::default())
    }

    #[test]
    fn test_register_assigns_default_instance() {
        let registry = NodeRegistry::new();
        let identity = Identity::new("andreb", "msging.net");

        let node = registry.register(&identity, None, channel());
        assert_eq!(node.to_string(), "andreb@msging.net/default");
        assert_eq!(registry.len(), 1);
        assert!(registry.get(&node).is_some());
    }

    #[test]
    fn test_register_uniquifies_taken_instance() {
        let registry = NodeRegistry::new();
        let identity = Identity::new("andreb", "msging.net");

        let first = registry.register(&identity, Some("mobile"), channel());
        let second = registry.register(&identity, Some("mobile"), channel());
        assert_eq!(first.to_string(), "andreb@msging.net/mobile");
        assert_eq!(second.to_string(), "andreb@msging.net/mobile-1");
    }

    #[test]
    fn test_unregister() {
        let registry = NodeRegistry::new();
        let identity = Identity::new("andreb", "msging.net");

        let node = registry.register(&identity, None, channel());
        registry.unregister(&node);
        assert!(registry.is_empty());
        assert!(registry.get(&node).is_none());
    }
}
