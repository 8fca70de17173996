// NetMeshObjectMapper — stores replicas keyed by object identifier

use crate::codec::Encoding;
use crate::identifier::NetMeshObjectIdentifier;
use crate::mesh::{ExternalizedNetMeshObject, NetMeshObject};
use crate::model::ModelBase;
use crate::proxy::ProxyManager;
use crate::store::{MapperError, StoreEntryMapper, StoreValue};
use std::sync::Arc;

pub struct NetMeshObjectMapper {
    model: Arc<dyn ModelBase>,
    proxies: Arc<ProxyManager>,
    encoding: Encoding,
}

impl NetMeshObjectMapper {
    pub fn new(model: Arc<dyn ModelBase>, proxies: Arc<ProxyManager>) -> Self {
        Self {
            model,
            proxies,
            encoding: Encoding::default(),
        }
    }

    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }
}

impl StoreEntryMapper for NetMeshObjectMapper {
    type Key = NetMeshObjectIdentifier;
    type Value = NetMeshObject;

    fn key_to_string(&self, key: &Self::Key) -> String {
        key.to_external_form()
    }

    fn string_to_key(&self, raw: &str) -> Result<Self::Key, MapperError> {
        NetMeshObjectIdentifier::from_external_form(None, raw).map_err(|e| MapperError::parse(raw, e))
    }

    /// Proxies referenced by the record are resolved through the proxy manager,
    /// which loads them from their own store if needed.
    fn decode_value(&self, key: &Self::Key, value: &StoreValue) -> Result<Self::Value, MapperError> {
        let encoding =
            Encoding::from_id(&value.encoding_id).map_err(|e| MapperError::from_codec(&value.key, &value.encoding_id, e))?;
        let externalized: ExternalizedNetMeshObject = encoding
            .decode(&value.data)
            .map_err(|e| MapperError::from_codec(&value.key, &value.encoding_id, e))?;
        if &externalized.identifier != key {
            return Err(MapperError::decoding(
                &value.key,
                format!("record describes {}", externalized.identifier),
            ));
        }
        Ok(NetMeshObject::restore(&externalized, self.model.as_ref(), |partner| {
            self.proxies.get(partner)
        }))
    }

    fn as_bytes(&self, value: &Self::Value) -> Result<Vec<u8>, MapperError> {
        self.encoding
            .encode(&value.as_externalized(true))
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
