//! # Resolver Manager
//!
//! Owns everything transmitters share: configuration, the DNS resolver, the
//! wire transport, the connection table and the default application hooks.
//! A transmitter holds an `Arc` to this context instead of reaching for
//! process-wide state.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rvoip_transmitter_core::manager::ResolverManager;
//! use rvoip_transmitter_core::config::TransmitterConfig;
//! use rvoip_transmitter_core::dns::HickoryDnsResolver;
//! use rvoip_transmitter_core::transport::UdpTransport;
//!
//! # async fn example() -> rvoip_transmitter_core::Result<()> {
//! let udp = UdpTransport::bind("0.0.0.0:5060".parse().unwrap()).await?;
//! let manager = ResolverManager::builder()
//!     .with_config(TransmitterConfig::default())
//!     .with_resolver(Arc::new(HickoryDnsResolver::from_system_conf()?))
//!     .with_transport(Arc::new(udp))
//!     .build()?;
//! let (events_tx, _events_rx) = rvoip_transmitter_core::transmitter::event_channel();
//! let transmitter = manager.create_transmitter(Some(events_tx));
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::config::TransmitterConfig;
use crate::dns::DnsResolver;
use crate::error::{Error, Result};
use crate::transmitter::{DefaultHooks, EventSender, ResolutionHooks, Transmitter};
use crate::transport::{ConnectionTable, MessageTransport};

/// Shared collaborators handed to every transmitter.
pub(crate) struct ManagerContext {
    pub(crate) config: TransmitterConfig,
    pub(crate) resolver: Arc<dyn DnsResolver>,
    pub(crate) transport: Arc<dyn MessageTransport>,
    pub(crate) connections: Arc<ConnectionTable>,
    pub(crate) hooks: Arc<dyn ResolutionHooks>,
}

/// Creates transmitters bound to one configuration and set of collaborators.
#[derive(Clone)]
pub struct ResolverManager {
    ctx: Arc<ManagerContext>,
}

impl ResolverManager {
    pub fn builder() -> ResolverManagerBuilder {
        ResolverManagerBuilder::default()
    }

    /// Creates a transmitter using the manager hooks.
    pub fn create_transmitter(&self, events: Option<EventSender>) -> Transmitter {
        let transmitter = Transmitter::new(self.ctx.clone(), self.ctx.hooks.clone(), events);
        debug!(id = %transmitter.id(), "transmitter created");
        transmitter
    }

    /// Creates a transmitter with its own hooks.
    pub fn create_transmitter_with_hooks(
        &self,
        hooks: Arc<dyn ResolutionHooks>,
        events: Option<EventSender>,
    ) -> Transmitter {
        let transmitter = Transmitter::new(self.ctx.clone(), hooks, events);
        debug!(id = %transmitter.id(), "transmitter created with custom hooks");
        transmitter
    }

    pub fn config(&self) -> &TransmitterConfig {
        &self.ctx.config
    }

    /// Manager-wide connection table.
    pub fn connections(&self) -> Arc<ConnectionTable> {
        self.ctx.connections.clone()
    }
}

impl fmt::Debug for ResolverManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolverManager")
            .field("config", &self.ctx.config)
            .field("connections", &self.ctx.connections.len())
            .finish()
    }
}

/// Builder for [`ResolverManager`].
#[derive(Default)]
pub struct ResolverManagerBuilder {
    config: Option<TransmitterConfig>,
    resolver: Option<Arc<dyn DnsResolver>>,
    transport: Option<Arc<dyn MessageTransport>>,
    connections: Option<Arc<ConnectionTable>>,
    hooks: Option<Arc<dyn ResolutionHooks>>,
}

impl ResolverManagerBuilder {
    pub fn with_config(mut self, config: TransmitterConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn DnsResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn MessageTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Shares an existing connection table, e.g. with a listener that
    /// registers inbound connections and their aliases.
    pub fn with_connections(mut self, connections: Arc<ConnectionTable>) -> Self {
        self.connections = Some(connections);
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn ResolutionHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn build(self) -> Result<ResolverManager> {
        let config = self.config.unwrap_or_default();
        config.validate()?;
        let resolver = self
            .resolver
            .ok_or_else(|| Error::Configuration("a DNS resolver is required".to_string()))?;
        let transport = self
            .transport
            .ok_or_else(|| Error::Configuration("a message transport is required".to_string()))?;
        let ctx = ManagerContext {
            config,
            resolver,
            transport,
            connections: self.connections.unwrap_or_else(|| Arc::new(ConnectionTable::new())),
            hooks: self.hooks.unwrap_or_else(|| Arc::new(DefaultHooks)),
        };
        Ok(ResolverManager { ctx: Arc::new(ctx) })
    }
}
