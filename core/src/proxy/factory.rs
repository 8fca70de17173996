// ProxyFactory — creates fresh proxies and restores persisted ones

use super::{CoherenceSpecification, ExternalizedProxy, Proxy, ProxyError};
use crate::identifier::NetMeshBaseIdentifier;
use crate::now_millis;
use crate::policy::{PeerRole, ProxyPolicy};
use crate::transport::EndpointFactory;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProxyParameters {
    /// Overrides the factory's default coherence.
    pub coherence: Option<CoherenceSpecification>,
    /// Create a non-communicating placeholder.
    pub placeholder: bool,
}

impl ProxyParameters {
    pub fn placeholder() -> Self {
        Self {
            coherence: None,
            placeholder: true,
        }
    }

    pub fn with_coherence(coherence: CoherenceSpecification) -> Self {
        Self {
            coherence: Some(coherence),
            placeholder: false,
        }
    }
}

pub trait ProxyFactory: Send + Sync {
    fn obtain_for(&self, partner: &NetMeshBaseIdentifier, parameters: &ProxyParameters) -> Result<Proxy, ProxyError>;

    fn restore_proxy(&self, externalized: ExternalizedProxy) -> Result<Proxy, ProxyError>;
}

pub struct DefaultProxyFactory {
    local: NetMeshBaseIdentifier,
    endpoint_factory: Option<Arc<dyn EndpointFactory>>,
    role: PeerRole,
    default_coherence: CoherenceSpecification,
}

impl DefaultProxyFactory {
    /// Without an endpoint factory every proxy is a placeholder.
    pub fn new(
        local: NetMeshBaseIdentifier,
        endpoint_factory: Option<Arc<dyn EndpointFactory>>,
        role: PeerRole,
        default_coherence: CoherenceSpecification,
    ) -> Self {
        Self {
            local,
            endpoint_factory,
            role,
            default_coherence,
        }
    }

    pub fn local_identifier(&self) -> &NetMeshBaseIdentifier {
        &self.local
    }
}

impl ProxyFactory for DefaultProxyFactory {
    fn obtain_for(&self, partner: &NetMeshBaseIdentifier, parameters: &ProxyParameters) -> Result<Proxy, ProxyError> {
        if partner == &self.local {
            return Err(ProxyError::TowardsSelf(partner.clone()));
        }
        let coherence = parameters.coherence.unwrap_or(self.default_coherence);
        let (endpoint, role) = match (&self.endpoint_factory, parameters.placeholder) {
            (Some(factory), false) => (Some(factory.obtain_for(partner, &self.local)?), self.role),
            _ => (None, PeerRole::Placeholder),
        };
        debug!("New {:?} proxy {} -> {}", role, self.local, partner);
        Ok(Proxy::new(
            self.local.clone(),
            partner.clone(),
            endpoint,
            ProxyPolicy::new(role),
            coherence,
            now_millis(),
        ))
    }

    fn restore_proxy(&self, externalized: ExternalizedProxy) -> Result<Proxy, ProxyError> {
        if externalized.partner == self.local {
            return Err(ProxyError::TowardsSelf(externalized.partner));
        }
        let (endpoint, role) = match (&self.endpoint_factory, externalized.is_placeholder) {
            (Some(factory), false) => (
                Some(factory.restore(&externalized.partner, &self.local, externalized.endpoint.clone())?),
                self.role,
            ),
            _ => (None, PeerRole::Placeholder),
        };
        Ok(Proxy::restore(externalized, endpoint, ProxyPolicy::new(role)))
    }
}
