//! Provider catalog
//!
//! Providers are stored in registration order. Each provider sits behind
//! its own lock so performance updates for one provider never wait on
//! another. Callers only ever receive copies.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::types::{
    MetricsSample, ModelPerformance, Provider, ProviderPerformance, ProviderSnapshot,
    ProviderStatus,
};
use crate::error::{Error, Result};

type Entry = Arc<RwLock<Provider>>;

#[derive(Debug, Default)]
struct CatalogInner {
    entries: Vec<Entry>,
    index: HashMap<String, usize>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// On-disk catalog format: a list of `[[providers]]` tables
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogFile {
    #[serde(default)]
    pub providers: Vec<Provider>,
}

/// Catalog of known providers, their models, and live metrics
#[derive(Debug, Default)]
pub struct ProviderCatalog {
    inner: RwLock<CatalogInner>,
}

impl ProviderCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a catalog from a list of providers
    pub fn from_providers(providers: impl IntoIterator<Item = Provider>) -> Result<Self> {
        let catalog = Self::new();
        for provider in providers {
            catalog.register(provider)?;
        }
        Ok(catalog)
    }

    /// Parse a catalog from TOML
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let file: CatalogFile =
            toml::from_str(contents).map_err(|e| Error::CatalogParse(e.to_string()))?;
        Self::from_providers(file.providers)
    }

    /// Load a catalog from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let catalog = Self::from_toml_str(&contents)?;
        info!(
            path = %path.as_ref().display(),
            providers = catalog.len(),
            "Loaded provider catalog"
        );
        Ok(catalog)
    }

    /// Serialize the current catalog (including live metrics) to TOML
    pub fn to_toml_string(&self) -> Result<String> {
        let file = CatalogFile {
            providers: self.snapshot().into_iter().map(|s| s.provider).collect(),
        };
        toml::to_string_pretty(&file).map_err(|e| Error::CatalogParse(e.to_string()))
    }

    /// Register a provider.
    ///
    /// Returns `true` for a new provider and `false` when an existing
    /// provider with the same model ids had its static data replaced. Live
    /// performance of a replaced provider is kept.
    pub fn register(&self, provider: Provider) -> Result<bool> {
        provider.validate().map_err(Error::InvalidProvider)?;

        let mut inner = write(&self.inner);
        if let Some(&idx) = inner.index.get(&provider.id) {
            let entry = Arc::clone(&inner.entries[idx]);
            drop(inner);

            let mut existing = write(&entry);
            if existing.model_ids() != provider.model_ids() {
                return Err(Error::ProviderConflict(provider.id));
            }
            let performance = existing.performance.clone();
            *existing = Provider {
                performance,
                ..provider
            };
            debug!(provider = %existing.id, "Replaced provider definition");
            return Ok(false);
        }

        let id = provider.id.clone();
        let idx = inner.entries.len();
        inner.entries.push(Arc::new(RwLock::new(provider)));
        inner.index.insert(id.clone(), idx);
        info!(provider = %id, order = idx, "Registered provider");
        Ok(true)
    }

    fn entry(&self, provider_id: &str) -> Option<(usize, Entry)> {
        let inner = read(&self.inner);
        inner
            .index
            .get(provider_id)
            .map(|&idx| (idx, Arc::clone(&inner.entries[idx])))
    }

    fn entries(&self) -> Vec<Entry> {
        read(&self.inner).entries.clone()
    }

    /// Get a copy of a provider by id
    pub fn get(&self, provider_id: &str) -> Option<Provider> {
        self.entry(provider_id).map(|(_, e)| read(&e).clone())
    }

    /// Whether a provider is registered
    pub fn contains(&self, provider_id: &str) -> bool {
        read(&self.inner).index.contains_key(provider_id)
    }

    /// Number of registered providers
    pub fn len(&self) -> usize {
        read(&self.inner).entries.len()
    }

    /// Whether the catalog is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Provider ids in registration order
    pub fn provider_ids(&self) -> Vec<String> {
        self.entries().iter().map(|e| read(e).id.clone()).collect()
    }

    /// Copies of all providers whose status is `available`
    pub fn list_available(&self) -> Vec<Provider> {
        self.entries()
            .iter()
            .filter_map(|e| {
                let provider = read(e);
                (provider.performance.status == ProviderStatus::Available)
                    .then(|| provider.clone())
            })
            .collect()
    }

    /// Copies of every provider, in registration order.
    ///
    /// Each provider is copied under its own read lock; the result may mix
    /// metrics from slightly different instants.
    pub fn snapshot(&self) -> Vec<ProviderSnapshot> {
        let taken_at = Utc::now();
        self.entries()
            .iter()
            .enumerate()
            .map(|(order, e)| {
                let provider = read(e).clone();
                ProviderSnapshot {
                    order,
                    health: provider.performance.health(),
                    provider,
                    taken_at,
                }
            })
            .collect()
    }

    /// Set a provider's status, returning the previous one
    pub fn update_status(&self, provider_id: &str, status: ProviderStatus) -> Result<ProviderStatus> {
        self.with_performance_mut(provider_id, |perf| {
            let previous = perf.status;
            perf.status = status;
            previous
        })
    }

    /// Apply a metrics sample to a provider's live fields.
    ///
    /// Samples with non-finite or out-of-range values are rejected whole.
    /// Returns the status the provider had before the sample was applied,
    /// read under the same lock as the write.
    pub fn update_performance(
        &self,
        provider_id: &str,
        sample: &MetricsSample,
    ) -> Result<ProviderStatus> {
        sample.validate().map_err(|e| {
            Error::InvalidProvider(format!("metrics sample for '{}': {}", provider_id, e))
        })?;
        self.with_performance_mut(provider_id, |perf| {
            let previous = perf.status;
            sample.apply_to(perf);
            previous
        })
    }

    /// Replace a model's performance profile
    pub fn update_model_performance(
        &self,
        provider_id: &str,
        model_id: &str,
        performance: ModelPerformance,
    ) -> Result<()> {
        let (_, entry) = self
            .entry(provider_id)
            .ok_or_else(|| Error::ProviderNotFound(provider_id.to_string()))?;
        let mut provider = write(&entry);
        let model = provider
            .models
            .iter_mut()
            .find(|m| m.id == model_id)
            .ok_or_else(|| {
                Error::InvalidProvider(format!("model '{}/{}' not found", provider_id, model_id))
            })?;
        model.performance = performance;
        Ok(())
    }

    /// Mutate a single provider's performance block under its own lock
    pub(crate) fn with_performance_mut<R>(
        &self,
        provider_id: &str,
        f: impl FnOnce(&mut ProviderPerformance) -> R,
    ) -> Result<R> {
        let (_, entry) = self
            .entry(provider_id)
            .ok_or_else(|| Error::ProviderNotFound(provider_id.to_string()))?;
        let mut provider = write(&entry);
        let result = f(&mut provider.performance);
        provider.performance.updated_at = Some(Utc::now());
        Ok(result)
    }

    /// Count a request as in flight
    pub(crate) fn begin_request(&self, provider_id: &str) -> Result<()> {
        self.with_performance_mut(provider_id, |perf| {
            perf.current_load = perf.current_load.saturating_add(1);
        })
    }

    /// Count an in-flight request as finished
    pub(crate) fn end_request(&self, provider_id: &str) -> Result<()> {
        self.with_performance_mut(provider_id, |perf| {
            perf.current_load = perf.current_load.saturating_sub(1);
        })
    }
}
