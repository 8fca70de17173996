// ProxyEntryMapper — stores proxies keyed by partner identifier

use super::{ExternalizedProxy, Proxy, ProxyFactory};
use crate::codec::Encoding;
use crate::identifier::NetMeshBaseIdentifier;
use crate::store::{MapperError, StoreEntryMapper, StoreValue};
use std::sync::Arc;

pub struct ProxyEntryMapper {
    factory: Arc<dyn ProxyFactory>,
    encoding: Encoding,
}

impl ProxyEntryMapper {
    pub fn new(factory: Arc<dyn ProxyFactory>) -> Self {
        Self::with_encoding(factory, Encoding::default())
    }

    pub fn with_encoding(factory: Arc<dyn ProxyFactory>, encoding: Encoding) -> Self {
        Self { factory, encoding }
    }
}

impl StoreEntryMapper for ProxyEntryMapper {
    type Key = NetMeshBaseIdentifier;
    type Value = Proxy;

    fn key_to_string(&self, key: &Self::Key) -> String {
        key.to_external_form()
    }

    fn string_to_key(&self, raw: &str) -> Result<Self::Key, MapperError> {
        NetMeshBaseIdentifier::from_external_form(raw).map_err(|e| MapperError::parse(raw, e))
    }

    fn decode_value(&self, key: &Self::Key, value: &StoreValue) -> Result<Self::Value, MapperError> {
        let encoding =
            Encoding::from_id(&value.encoding_id).map_err(|e| MapperError::from_codec(&value.key, &value.encoding_id, e))?;
        let externalized: ExternalizedProxy = encoding
            .decode(&value.data)
            .map_err(|e| MapperError::from_codec(&value.key, &value.encoding_id, e))?;
        if &externalized.partner != key {
            return Err(MapperError::decoding(
                &value.key,
                format!("record describes partner {}", externalized.partner),
            ));
        }
        self.factory
            .restore_proxy(externalized)
            .map_err(|e| MapperError::decoding(&value.key, e))
    }

    fn as_bytes(&self, value: &Self::Value) -> Result<Vec<u8>, MapperError> {
        self.encoding
            .encode(&value.as_externalized())
            .map_err(|e| MapperError::Encoding(e.to_string()))
    }

    fn preferred_encoding_id(&self) -> &str {
        self.encoding.id()
    }

    fn time_created(&self, value: &Self::Value) -> i64 {
        value.time_created()
    }

    fn time_updated(&self, value: &Self::Value) -> i64 {
        value.time_updated()
    }

    fn time_read(&self, value: &Self::Value) -> i64 {
        value.time_read()
    }

    fn time_expires(&self, value: &Self::Value) -> i64 {
        value.time_expires()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::PeerRole;
    use crate::proxy::{CoherenceSpecification, DefaultProxyFactory, ProxyParameters};
    use crate::transport::LoopbackNetwork;

    fn ids() -> (NetMeshBaseIdentifier, NetMeshBaseIdentifier) {
        (
            NetMeshBaseIdentifier::from_external_form("test://local").unwrap(),
            NetMeshBaseIdentifier::from_external_form("test://partner").unwrap(),
        )
    }

    fn factory() -> Arc<dyn ProxyFactory> {
        let (local, _) = ids();
        Arc::new(DefaultProxyFactory::new(
            local,
            Some(Arc::new(LoopbackNetwork::new())),
            PeerRole::FullDuplex,
            CoherenceSpecification::Periodic { period: 10 },
        ))
    }

    #[test]
    fn test_json_records_still_decode() {
        let (_, partner) = ids();
        let factory = factory();
        let proxy = factory.obtain_for(&partner, &ProxyParameters::default()).unwrap();

        let json = ProxyEntryMapper::with_encoding(factory.clone(), Encoding::Json);
        let bytes = json.as_bytes(&proxy).unwrap();
        let stored = StoreValue::new(json.key_to_string(&partner), "json-v1", 1, bytes);

        let bincode = ProxyEntryMapper::new(factory);
        assert_eq!(bincode.preferred_encoding_id(), "bincode-v1");
        let restored = bincode.decode_value(&partner, &stored).unwrap();
        assert_eq!(restored.partner(), &partner);
        assert_eq!(restored.coherence(), CoherenceSpecification::Periodic { period: 10 });
        assert!(!restored.is_placeholder());
    }

    #[test]
    fn test_unknown_encoding_is_reported() {
        let (_, partner) = ids();
        let mapper = ProxyEntryMapper::new(factory());
        let stored = StoreValue::new("test://partner", "xml-v1", 1, b"<proxy/>".to_vec());
        assert!(matches!(
            mapper.decode_value(&partner, &stored),
            Err(MapperError::UnknownEncoding { .. })
        ));
    }

    #[test]
    fn test_mismatched_partner_rejected() {
        let (local, partner) = ids();
        let factory = factory();
        let mapper = ProxyEntryMapper::new(factory.clone());
        let proxy = factory.obtain_for(&partner, &ProxyParameters::default()).unwrap();
        let stored = StoreValue::new("test://local", "bincode-v1", 1, mapper.as_bytes(&proxy).unwrap());
        assert!(matches!(
            mapper.decode_value(&local, &stored),
            Err(MapperError::Decoding { .. })
        ));
    }
}
