use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentProvider;
use crate::payments::providers::{MtnProvider, OrangeProvider, PawapayProvider};
use crate::payments::types::ProviderName;
use std::str::FromStr;
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct PaymentFactoryConfig {
    pub default_provider: ProviderName,
    pub enabled_providers: Vec<ProviderName>,
    /// When set, reconciliation sweeps skip records from every other
    /// provider entirely.
    pub exclusive_provider: Option<ProviderName>,
}

impl PaymentFactoryConfig {
    pub fn from_env() -> PaymentResult<Self> {
        let default_provider =
            std::env::var("DEFAULT_PAYMENT_PROVIDER").unwrap_or_else(|_| "mtn".to_string());
        let default_provider = ProviderName::from_str(&default_provider)?;

        let enabled_raw = std::env::var("ENABLED_PAYMENT_PROVIDERS")
            .unwrap_or_else(|_| "mtn,orange,pawapay".to_string());
        let mut enabled_providers = Vec::new();
        for part in enabled_raw.split(',') {
            let value = part.trim();
            if value.is_empty() {
                continue;
            }
            enabled_providers.push(ProviderName::from_str(value)?);
        }

        if !enabled_providers.contains(&default_provider) {
            return Err(PaymentError::ValidationError {
                message: "default provider must be enabled".to_string(),
                field: Some("DEFAULT_PAYMENT_PROVIDER".to_string()),
            });
        }

        let exclusive_provider = match std::env::var("EXCLUSIVE_PAYMENT_PROVIDER") {
            Ok(value) if !value.trim().is_empty() => Some(ProviderName::from_str(&value)?),
            _ => None,
        };
        if let Some(exclusive) = exclusive_provider.as_ref() {
            if !enabled_providers.contains(exclusive) {
                return Err(PaymentError::ValidationError {
                    message: "exclusive provider must be enabled".to_string(),
                    field: Some("EXCLUSIVE_PAYMENT_PROVIDER".to_string()),
                });
            }
        }

        Ok(Self {
            default_provider,
            enabled_providers,
            exclusive_provider,
        })
    }
}

pub struct PaymentProviderFactory {
    config: PaymentFactoryConfig,
}

impl PaymentProviderFactory {
    pub fn from_env() -> PaymentResult<Self> {
        let config = PaymentFactoryConfig::from_env()?;
        Ok(Self { config })
    }

    pub fn with_config(config: PaymentFactoryConfig) -> Self {
        Self { config }
    }

    pub fn get_provider(&self, provider: ProviderName) -> PaymentResult<Box<dyn PaymentProvider>> {
        if !self.config.enabled_providers.contains(&provider) {
            return Err(PaymentError::ValidationError {
                message: format!("provider {} is disabled", provider),
                field: Some("provider".to_string()),
            });
        }

        match provider {
            ProviderName::Mtn => Ok(Box::new(MtnProvider::from_env()?)),
            ProviderName::Orange => Ok(Box::new(OrangeProvider::from_env()?)),
            ProviderName::Pawapay => Ok(Box::new(PawapayProvider::from_env()?)),
        }
    }

    pub fn get_default_provider(&self) -> PaymentResult<Box<dyn PaymentProvider>> {
        self.get_provider(self.config.default_provider.clone())
    }

    pub fn list_available_providers(&self) -> Vec<ProviderName> {
        self.config.enabled_providers.clone()
    }

    pub fn exclusive_provider(&self) -> Option<ProviderName> {
        self.config.exclusive_provider.clone()
    }

    /// True when the reconciliation sweep should leave this provider's
    /// records untouched.
    pub fn is_excluded_from_sweep(&self, provider: &ProviderName) -> bool {
        match self.config.exclusive_provider.as_ref() {
            Some(exclusive) => exclusive != provider,
            None => false,
        }
    }
}

/// Long-lived set of instantiated providers, built once at startup.
/// Services and workers resolve adapters here instead of re-reading the
/// environment per call.
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn PaymentProvider>>,
    exclusive: Option<ProviderName>,
}

impl ProviderRegistry {
    pub fn new(providers: Vec<Arc<dyn PaymentProvider>>, exclusive: Option<ProviderName>) -> Self {
        Self {
            providers,
            exclusive,
        }
    }

    /// Instantiate every enabled provider; ones whose credentials are
    /// missing are skipped with a warning rather than failing startup.
    pub fn from_factory(factory: &PaymentProviderFactory) -> Self {
        let mut providers: Vec<Arc<dyn PaymentProvider>> = Vec::new();
        for name in factory.list_available_providers() {
            match factory.get_provider(name.clone()) {
                Ok(provider) => providers.push(Arc::from(provider)),
                Err(e) => {
                    warn!(provider = %name, error = %e, "provider unavailable, skipping");
                }
            }
        }
        Self {
            providers,
            exclusive: factory.exclusive_provider(),
        }
    }

    pub fn get(&self, name: &ProviderName) -> Option<Arc<dyn PaymentProvider>> {
        self.providers.iter().find(|p| &p.name() == name).cloned()
    }

    pub fn require(&self, name: &ProviderName) -> PaymentResult<Arc<dyn PaymentProvider>> {
        self.get(name).ok_or_else(|| PaymentError::ValidationError {
            message: format!("provider {} is not configured", name),
            field: Some("provider".to_string()),
        })
    }

    /// Mirrors the factory's exclusive-provider flag for sweep filtering.
    pub fn is_excluded_from_sweep(&self, provider: &ProviderName) -> bool {
        match self.exclusive.as_ref() {
            Some(exclusive) => exclusive != provider,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn factory_with(exclusive: Option<ProviderName>) -> PaymentProviderFactory {
        PaymentProviderFactory::with_config(PaymentFactoryConfig {
            default_provider: ProviderName::Mtn,
            enabled_providers: vec![ProviderName::Mtn, ProviderName::Orange],
            exclusive_provider: exclusive,
        })
    }

    #[test]
    fn provider_name_parsing_works() {
        assert!(matches!(
            ProviderName::from_str("mtn"),
            Ok(ProviderName::Mtn)
        ));
        assert!(ProviderName::from_str("unknown").is_err());
    }

    #[test]
    fn list_available_providers_returns_enabled() {
        let factory = factory_with(None);
        assert_eq!(factory.list_available_providers().len(), 2);
    }

    #[test]
    fn disabled_provider_is_rejected() {
        let factory = factory_with(None);
        assert!(factory.get_provider(ProviderName::Pawapay).is_err());
    }

    #[test]
    fn exclusive_flag_excludes_other_providers_from_sweep() {
        let factory = factory_with(Some(ProviderName::Mtn));
        assert!(!factory.is_excluded_from_sweep(&ProviderName::Mtn));
        assert!(factory.is_excluded_from_sweep(&ProviderName::Orange));

        let open = factory_with(None);
        assert!(!open.is_excluded_from_sweep(&ProviderName::Orange));
    }
}
