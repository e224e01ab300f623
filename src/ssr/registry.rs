use dashmap::DashMap;
use std::sync::Arc;

/// Component name to bundle file name, shared between the hydration
/// builder and the render path. One registry lives per application.
#[derive(Debug, Clone, Default)]
pub struct ViewBundleRegistry {
    bundles: Arc<DashMap<String, String>>,
}

impl ViewBundleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register under both the exact and the lowercase component name.
    pub fn register(&self, component: &str, bundle: &str) {
        self.bundles.insert(component.to_string(), bundle.to_string());
        self.bundles
            .insert(component.to_lowercase(), bundle.to_string());
    }

    /// Exact name first, then the lowercase form.
    pub fn lookup(&self, component: &str) -> Option<String> {
        self.bundles
            .get(component)
            .or_else(|| self.bundles.get(&component.to_lowercase()))
            .map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }
}
