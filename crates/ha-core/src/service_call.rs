//! Service calls sent to the hub

use crate::{Context, DynValue, EntityId};
use serde::{Deserialize, Serialize};

/// Key under which target entities travel in service data
pub const ATTR_ENTITY_ID: &str = "entity_id";

/// An RPC-style command naming a domain, a service and a payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceCall {
    /// Service namespace (`light`, `script`, `homeassistant`, ...)
    pub domain: String,

    /// Service name (`turn_on`, `media_pause`, a script name, ...)
    pub service: String,

    /// Payload, normally a mapping
    pub data: DynValue,

    pub context: Context,
}

impl ServiceCall {
    pub fn new(
        domain: impl Into<String>,
        service: impl Into<String>,
        data: impl Into<DynValue>,
        context: Context,
    ) -> Self {
        Self {
            domain: domain.into(),
            service: service.into(),
            data: data.into(),
            context,
        }
    }

    /// A call whose payload targets one entity plus extra attributes
    pub fn for_entity<I, K>(
        domain: impl Into<String>,
        service: impl Into<String>,
        entity_id: &EntityId,
        extra: I,
        context: Context,
    ) -> Self
    where
        I: IntoIterator<Item = (K, DynValue)>,
        K: Into<String>,
    {
        let mut data: std::collections::BTreeMap<String, DynValue> =
            extra.into_iter().map(|(k, v)| (k.into(), v)).collect();
        data.insert(ATTR_ENTITY_ID.to_string(), entity_id.as_str().into());
        Self::new(domain, service, DynValue::Map(data), context)
    }

    /// Full service identifier (`domain.service`)
    pub fn service_id(&self) -> String {
        format!("{}.{}", self.domain, self.service)
    }

    /// Target entity ids, accepting a single string or a list
    pub fn entity_ids(&self) -> Vec<String> {
        let target = self.data.get(ATTR_ENTITY_ID);
        match target {
            DynValue::String(s) => vec![s.clone()],
            DynValue::List(items) => items
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect(),
            _ => vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_for_entity_merges_target_into_payload() {
        let id: EntityId = "light.kitchen".parse().unwrap();
        let call = ServiceCall::for_entity(
            "light",
            "turn_on",
            &id,
            [("brightness", DynValue::from(200))],
            Context::new(),
        );

        assert_eq!(call.service_id(), "light.turn_on");
        assert_eq!(call.data["entity_id"], "light.kitchen");
        assert_eq!(call.data["brightness"].as_i64(), Some(200));
        assert_eq!(call.entity_ids(), vec!["light.kitchen"]);
    }

    #[test]
    fn test_entity_ids_list_and_missing() {
        let call = ServiceCall::new(
            "light",
            "turn_off",
            json!({"entity_id": ["light.a", "light.b"]}),
            Context::new(),
        );
        assert_eq!(call.entity_ids(), vec!["light.a", "light.b"]);

        let call = ServiceCall::new("script", "goodnight", json!({}), Context::new());
        assert!(call.entity_ids().is_empty());
    }
}
