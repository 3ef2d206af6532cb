// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::sync::Arc;

use crate::hooks::{OnStateChange, StateChangeArgs};
use crate::{ConfigError, Dependency, DependencyConfig};

/// The set of dependencies known to the process.
///
/// A registry is built once at startup by the composition root and shared with the
/// [`CallExecutor`][crate::CallExecutor]. It replaces global per-service breaker singletons:
/// there is exactly one [`Dependency`] (with one breaker and one bulkhead) per name, and
/// independent dependencies never share a lock.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use airbag::{CircuitState, DependencyConfig, Registry};
///
/// let registry = Registry::builder()
///     .dependency("auth-service", DependencyConfig::default().failure_threshold(3))
///     .dependency("inventory", DependencyConfig::default().max_concurrent(8))
///     .on_state_change(|args| println!("{} {} -> {}", args.dependency(), args.from(), args.to()))
///     .build()?;
///
/// let auth = registry.get("auth-service").expect("registered above");
/// assert_eq!(auth.circuit_state(), CircuitState::Closed);
/// assert_eq!(registry.len(), 2);
/// # Ok::<(), airbag::ConfigError>(())
/// ```
#[derive(Debug)]
pub struct Registry {
    dependencies: BTreeMap<Arc<str>, Dependency>,
    logs_enabled: bool,
}

impl Registry {
    /// Starts building a registry.
    #[must_use]
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Looks up a dependency by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Dependency> {
        self.dependencies.get(name)
    }

    /// Iterates over all dependencies in name order.
    pub fn iter(&self) -> impl Iterator<Item = &Dependency> {
        self.dependencies.values()
    }

    /// Number of registered dependencies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.dependencies.len()
    }

    /// Returns `true` if no dependency is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }

    pub(crate) fn logs_enabled(&self) -> bool {
        self.logs_enabled
    }
}

/// Builder of a [`Registry`].
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    entries: Vec<(Arc<str>, DependencyConfig)>,
    on_state_change: Option<OnStateChange>,
    logs_enabled: bool,
}

impl RegistryBuilder {
    /// Registers a dependency.
    #[must_use]
    pub fn dependency(mut self, name: impl Into<Arc<str>>, config: DependencyConfig) -> Self {
        self.entries.push((name.into(), config));
        self
    }

    /// Registers several dependencies, e.g. straight from a deserialized configuration map.
    #[must_use]
    pub fn dependencies<I, N>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = (N, DependencyConfig)>,
        N: Into<Arc<str>>,
    {
        self.entries
            .extend(dependencies.into_iter().map(|(name, config)| (name.into(), config)));
        self
    }

    /// Subscribes to circuit state changes of every dependency in the registry.
    #[must_use]
    pub fn on_state_change<F>(mut self, hook: F) -> Self
    where
        F: Fn(StateChangeArgs) + Send + Sync + 'static,
    {
        self.on_state_change = Some(OnStateChange::new(hook));
        self
    }

    /// Enables structured logging of resilience events.
    #[must_use]
    #[cfg(any(feature = "logs", test))]
    pub fn enable_logs(mut self) -> Self {
        self.logs_enabled = true;
        self
    }

    /// Validates the configuration and creates the registry.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for empty or duplicate names and for invalid settings.
    pub fn build(self) -> Result<Registry, ConfigError> {
        let mut dependencies = BTreeMap::new();

        for (name, config) in self.entries {
            if name.is_empty() {
                return Err(ConfigError::EmptyName);
            }

            config.validate(&name)?;

            match dependencies.entry(Arc::clone(&name)) {
                Entry::Occupied(_) => return Err(ConfigError::Duplicate { dependency: name }),
                Entry::Vacant(entry) => {
                    entry.insert(Dependency::new(name, config, self.on_state_change.clone(), self.logs_enabled));
                }
            }
        }

        Ok(Registry {
            dependencies,
            logs_enabled: self.logs_enabled,
        })
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_assertions() {
        static_assertions::assert_impl_all!(Registry: Send, Sync, std::fmt::Debug);
        static_assertions::assert_impl_all!(RegistryBuilder: Send, Sync);
    }

    #[test]
    fn build_from_pairs() {
        let registry = Registry::builder()
            .dependencies([
                ("billing", DependencyConfig::default()),
                ("auth", DependencyConfig::default().max_concurrent(4)),
            ])
            .enable_logs()
            .build()
            .unwrap();

        let names: Vec<_> = registry.iter().map(Dependency::name).collect();
        assert_eq!(names, vec!["auth", "billing"]);
        assert_eq!(registry.get("auth").unwrap().bulkhead().max_concurrent(), 4);
        assert!(registry.get("search").is_none());
        assert!(registry.logs_enabled());
        assert!(!registry.is_empty());
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let result = Registry::builder()
            .dependency("auth", DependencyConfig::default())
            .dependency("auth", DependencyConfig::default())
            .build();

        assert_eq!(
            result.unwrap_err(),
            ConfigError::Duplicate {
                dependency: Arc::from("auth")
            }
        );
    }

    #[test]
    fn empty_name_is_rejected() {
        let result = Registry::builder().dependency("", DependencyConfig::default()).build();
        assert_eq!(result.unwrap_err(), ConfigError::EmptyName);
    }

    #[test]
    fn invalid_config_names_the_dependency() {
        let result = Registry::builder()
            .dependency("search", DependencyConfig::default().max_concurrent(0))
            .build();

        assert!(matches!(
            result.unwrap_err(),
            ConfigError::Invalid { dependency, .. } if &*dependency == "search"
        ));
    }

    #[test]
    fn empty_registry_is_valid() {
        let registry = Registry::builder().build().unwrap();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
    }
}
