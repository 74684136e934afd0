use std::sync::Arc;

use dog_core::{Dependency, Deps, Provider, Token};
use dog_queue::QueueOptions;

use crate::error::{QueueModuleError, QueueModuleResult};
use crate::tokens::{conditional_dependency_token, shared_config_token, DEFAULT_CONFIG_KEY};

/// Holds the shared configuration registered under one config key, or
/// records that there is none.
///
/// Built once per key while the module graph is instantiated, so a missing
/// key fails bootstrap instead of the first job.
#[derive(Debug, Clone)]
pub struct ConditionalDependency {
    config_key: String,
    token: Token,
    config: Option<Arc<QueueOptions>>,
}

impl ConditionalDependency {
    pub fn new(config_key: Option<&str>, config: Option<Arc<QueueOptions>>) -> Self {
        Self {
            config_key: config_key.unwrap_or(DEFAULT_CONFIG_KEY).to_string(),
            token: shared_config_token(config_key),
            config,
        }
    }

    /// Shared configuration token this holder resolved.
    pub fn token(&self) -> &Token {
        &self.token
    }

    pub fn config_key(&self) -> &str {
        &self.config_key
    }

    pub fn is_default(&self) -> bool {
        self.token == shared_config_token(None)
    }

    /// Shared options for the queue `caller`.
    ///
    /// An absent non-default key is an error naming the key and `caller`;
    /// an absent default key is `None`.
    pub fn get_dependency_ref(&self, caller: &str) -> QueueModuleResult<Option<Arc<QueueOptions>>> {
        match &self.config {
            Some(config) => Ok(Some(config.clone())),
            None if self.is_default() => Ok(None),
            None => Err(QueueModuleError::MissingSharedConfiguration {
                config_key: self.config_key.clone(),
                queue: caller.to_string(),
            }),
        }
    }

    /// Provider at `ConditionalDependency({key})` optionally injecting the
    /// shared configuration.
    pub fn provider(config_key: Option<&str>) -> Provider {
        let key = config_key.map(str::to_string);
        Provider::factory(
            conditional_dependency_token(config_key),
            vec![Dependency::optional(shared_config_token(config_key))],
            move |deps: Deps| {
                let key = key.clone();
                async move {
                    let config = deps.optional::<QueueOptions>(0)?;
                    Ok(ConditionalDependency::new(key.as_deref(), config))
                }
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn present_configuration_is_returned() {
        let shared = Arc::new(QueueOptions::new().with("prefix", "shared"));
        let dep = ConditionalDependency::new(Some("primary"), Some(shared.clone()));
        let resolved = dep.get_dependency_ref("mail").unwrap().unwrap();
        assert!(Arc::ptr_eq(&resolved, &shared));
    }

    #[test]
    fn missing_named_key_fails_with_key_and_caller() {
        let dep = ConditionalDependency::new(Some("x"), None);
        assert!(!dep.is_default());
        match dep.get_dependency_ref("mail") {
            Err(QueueModuleError::MissingSharedConfiguration { config_key, queue }) => {
                assert_eq!(config_key, "x");
                assert_eq!(queue, "mail");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn missing_default_key_is_tolerated() {
        for key in [None, Some(DEFAULT_CONFIG_KEY)] {
            let dep = ConditionalDependency::new(key, None);
            assert!(dep.is_default());
            assert!(dep.get_dependency_ref("mail").unwrap().is_none());
        }
    }

    #[test]
    fn provider_is_keyed_by_config_key() {
        let provider = ConditionalDependency::provider(Some("x"));
        assert_eq!(provider.token().as_str(), "ConditionalDependency(x)");
    }
}
