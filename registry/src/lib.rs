//! Provider Registry: a static, read-only-after-init table of provider
//! descriptors plus the fallback ordering the Degradation Planner consults.

use std::collections::HashMap;

use corelib::{DataType, IngestError, ProviderDescriptor, ProviderId};

/// Read-only table of provider descriptors and per-data-type fallback
/// orderings. Built once at startup; every lookup afterwards is pure.
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    descriptors: HashMap<ProviderId, ProviderDescriptor>,
    fallback_chains: HashMap<&'static str, Vec<ProviderId>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates and adds a provider descriptor. Fails closed on any
    /// invariant violation rather than silently accepting a bad config.
    pub fn register(&mut self, descriptor: ProviderDescriptor) -> Result<(), IngestError> {
        descriptor.validate()?;
        self.descriptors.insert(descriptor.id.clone(), descriptor);
        Ok(())
    }

    /// Registers the alternative-provider ordering consulted by the
    /// Degradation Planner's step 3 for a given data type.
    pub fn set_fallback_chain(&mut self, data_type: DataType, providers: Vec<ProviderId>) {
        self.fallback_chains.insert(data_type.as_str(), providers);
    }

    pub fn get(&self, provider: &ProviderId) -> Option<&ProviderDescriptor> {
        self.descriptors.get(provider)
    }

    pub fn supported(&self, provider: &ProviderId, data_type: DataType) -> bool {
        self.descriptors
            .get(provider)
            .is_some_and(|d| d.supported_data_types.iter().any(|t| t == data_type.as_str()))
    }

    pub fn fallback_chain(&self, data_type: DataType) -> &[ProviderId] {
        self.fallback_chains
            .get(data_type.as_str())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn all(&self) -> impl Iterator<Item = &ProviderDescriptor> {
        self.descriptors.values()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn descriptor(id: &str, daily: u32, monthly: u32) -> ProviderDescriptor {
        ProviderDescriptor {
            id: ProviderId::new(id),
            base_url: format!("https://{id}.example.com"),
            daily_cap: daily,
            monthly_cap: monthly,
            max_requests_per_second: 1,
            min_interval: Duration::from_millis(500),
            auth_required: true,
            supported_data_types: vec!["price".to_string(), "historical".to_string()],
        }
    }

    #[test]
    fn register_and_get_round_trip() {
        let mut reg = ProviderRegistry::new();
        reg.register(descriptor("cc", 100, 3000)).unwrap();
        let d = reg.get(&ProviderId::new("cc")).unwrap();
        assert_eq!(d.daily_cap, 100);
    }

    #[test]
    fn rejects_zero_daily_cap() {
        let mut reg = ProviderRegistry::new();
        let err = reg.register(descriptor("cc", 0, 3000)).unwrap_err();
        assert_eq!(err.kind(), "INVALID_CONFIG");
    }

    #[test]
    fn rejects_monthly_below_daily() {
        let mut reg = ProviderRegistry::new();
        let err = reg.register(descriptor("cc", 500, 100)).unwrap_err();
        assert_eq!(err.kind(), "INVALID_CONFIG");
    }

    #[test]
    fn supported_checks_data_type_membership() {
        let mut reg = ProviderRegistry::new();
        reg.register(descriptor("cc", 100, 3000)).unwrap();
        assert!(reg.supported(&ProviderId::new("cc"), DataType::Price));
        assert!(!reg.supported(&ProviderId::new("cc"), DataType::News));
    }

    #[test]
    fn fallback_chain_defaults_empty() {
        let reg = ProviderRegistry::new();
        assert!(reg.fallback_chain(DataType::Price).is_empty());
    }

    #[test]
    fn fallback_chain_returns_registered_order() {
        let mut reg = ProviderRegistry::new();
        reg.set_fallback_chain(
            DataType::Price,
            vec![ProviderId::new("cc"), ProviderId::new("av")],
        );
        let chain = reg.fallback_chain(DataType::Price);
        assert_eq!(chain, &[ProviderId::new("cc"), ProviderId::new("av")]);
    }
}
