//! Model identifier → backend selection.

use std::sync::Arc;

use crate::backend::MediaBackend;
use crate::error::{ProviderError, Result};

/// Bare model families served by the primary backend.
pub const DEFAULT_PRIMARY_PREFIXES: &[&str] = &["veo-"];

/// Which backend family an identifier belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Polling backend, bare model names (`veo-3.1`).
    Primary,
    /// Namespaced hosted models (`vendor/model`).
    Secondary,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Secondary => write!(f, "secondary"),
        }
    }
}

/// Classify a model identifier. Pure function of its shape.
pub fn classify_model(model: &str, primary_prefixes: &[String]) -> Result<BackendKind> {
    if model.is_empty() {
        return Err(ProviderError::Routing("model identifier is empty".to_string()));
    }

    if model.contains('/') {
        return match model.split_once('/') {
            Some((vendor, name))
                if !vendor.is_empty() && !name.is_empty() && !name.contains('/') =>
            {
                Ok(BackendKind::Secondary)
            }
            _ => Err(ProviderError::Routing(format!(
                "'{}' is not a vendor/model identifier",
                model
            ))),
        };
    }

    if primary_prefixes.iter().any(|p| model.starts_with(p.as_str())) {
        return Ok(BackendKind::Primary);
    }

    Err(ProviderError::Routing(format!(
        "no backend serves model '{}'",
        model
    )))
}

/// A routing decision.
#[derive(Clone)]
pub struct Route {
    pub backend: Arc<dyn MediaBackend>,
    pub kind: BackendKind,
    pub model: String,
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("backend", &self.backend.name())
            .field("kind", &self.kind)
            .field("model", &self.model)
            .finish()
    }
}

/// Maps model identifiers to configured backends.
#[derive(Clone)]
pub struct ProviderRouter {
    primary: Option<Arc<dyn MediaBackend>>,
    secondary: Option<Arc<dyn MediaBackend>>,
    primary_prefixes: Vec<String>,
    default_model: String,
}

impl ProviderRouter {
    pub fn new(default_model: impl Into<String>) -> Self {
        Self {
            primary: None,
            secondary: None,
            primary_prefixes: DEFAULT_PRIMARY_PREFIXES
                .iter()
                .map(|p| p.to_string())
                .collect(),
            default_model: default_model.into(),
        }
    }

    pub fn with_primary(mut self, backend: Arc<dyn MediaBackend>) -> Self {
        self.primary = Some(backend);
        self
    }

    pub fn with_secondary(mut self, backend: Arc<dyn MediaBackend>) -> Self {
        self.secondary = Some(backend);
        self
    }

    /// Replace the bare-name prefixes that select the primary backend.
    pub fn with_primary_prefixes(mut self, prefixes: Vec<String>) -> Self {
        self.primary_prefixes = prefixes;
        self
    }

    /// Select the backend for `model`.
    pub fn route(&self, model: &str) -> Result<Route> {
        let kind = classify_model(model, &self.primary_prefixes)?;
        let backend = match kind {
            BackendKind::Primary => self.primary.as_ref(),
            BackendKind::Secondary => self.secondary.as_ref(),
        }
        .ok_or_else(|| {
            ProviderError::Routing(format!(
                "model '{}' needs the {} backend, which is not configured",
                model, kind
            ))
        })?;

        log::debug!("Routed {} to {}", model, backend.name());
        Ok(Route {
            backend: Arc::clone(backend),
            kind,
            model: model.to_string(),
        })
    }

    /// Like [`route`](Self::route), falling back to the default model.
    pub fn route_or_default(&self, model: Option<&str>) -> Result<Route> {
        match model {
            Some(model) => self.route(model),
            None => {
                log::warn!("No model specified, assuming {}", self.default_model);
                self.route(&self.default_model)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prefixes() -> Vec<String> {
        vec!["veo-".to_string()]
    }

    #[test]
    fn test_classify_vendor_model_is_secondary() {
        assert_eq!(
            classify_model("acme/fast-model", &prefixes()).unwrap(),
            BackendKind::Secondary
        );
    }

    #[test]
    fn test_classify_bare_family_is_primary() {
        assert_eq!(
            classify_model("veo-3.1", &prefixes()).unwrap(),
            BackendKind::Primary
        );
    }

    #[test]
    fn test_classify_rejects_malformed() {
        for model in ["", "/model", "vendor/", "a/b/c", "gpt-4", "veo"] {
            assert!(
                matches!(classify_model(model, &prefixes()), Err(ProviderError::Routing(_))),
                "{:?} should not route",
                model
            );
        }
    }

    #[test]
    fn test_custom_prefixes() {
        let prefixes = vec!["veo-".to_string(), "lumiere-".to_string()];
        assert_eq!(
            classify_model("lumiere-2", &prefixes).unwrap(),
            BackendKind::Primary
        );
    }

    #[test]
    fn test_route_without_backend_is_routing_error() {
        let router = ProviderRouter::new("veo-3.1");
        assert!(matches!(
            router.route("veo-3.1"),
            Err(ProviderError::Routing(msg)) if msg.contains("not configured")
        ));
    }
}
