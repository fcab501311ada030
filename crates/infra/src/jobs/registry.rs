//! Handler registry: maps a decoded invocation to the function that runs it.

use std::collections::HashMap;
use std::sync::Arc;

use super::types::JobOutput;

/// The external collaborator that performs the actual work for a job.
///
/// Handlers receive the single decoded argument and either return an output
/// to record or an error; any error marks the job failed.
pub trait JobHandler: Send + Sync {
    fn handle(&self, argument: &str) -> Result<JobOutput, HandlerError>;
}

impl<F> JobHandler for F
where
    F: Fn(&str) -> Result<JobOutput, HandlerError> + Send + Sync,
{
    fn handle(&self, argument: &str) -> Result<JobOutput, HandlerError> {
        self(argument)
    }
}

/// A handler reported failure (or panicked).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandlerError {
    #[error("handler failed: {0}")]
    Failed(String),
    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl HandlerError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

/// No registered handler matches an invocation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown handler: {name}")]
pub struct UnknownHandler {
    pub name: String,
}

/// Name-indexed handler registry.
///
/// Resolution for a named invocation, first hit wins:
/// 1. exact name (`app.orchestrator.process_submission`)
/// 2. final dotted segment (`process_submission`)
/// 3. category patterns (`app.*` matches `app.orchestrator.process_submission`)
/// 4. wildcard `*`
///
/// Invocations whose encoding names no handler go to the default handler.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
    default: Option<Arc<dyn JobHandler>>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.names())
            .field("has_default", &self.default.is_some())
            .finish()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under a name or pattern (`name`, `prefix.*`, `*`).
    pub fn register<H>(&mut self, name: impl Into<String>, handler: H) -> &mut Self
    where
        H: JobHandler + 'static,
    {
        self.handlers.insert(name.into(), Arc::new(handler));
        self
    }

    /// Register a closure as a handler.
    pub fn register_fn<F>(&mut self, name: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(&str) -> Result<JobOutput, HandlerError> + Send + Sync + 'static,
    {
        self.register(name, handler)
    }

    /// Register a shared handler under an additional name.
    pub fn register_shared(&mut self, name: impl Into<String>, handler: Arc<dyn JobHandler>) -> &mut Self {
        self.handlers.insert(name.into(), handler);
        self
    }

    /// Handler used for invocations that do not name one.
    pub fn set_default(&mut self, handler: Arc<dyn JobHandler>) -> &mut Self {
        self.default = Some(handler);
        self
    }

    pub fn resolve(&self, name: Option<&str>) -> Result<Arc<dyn JobHandler>, UnknownHandler> {
        let Some(name) = name else {
            return self.default.clone().ok_or_else(|| UnknownHandler {
                name: "<unnamed>".to_string(),
            });
        };

        if let Some(h) = self.handlers.get(name) {
            return Ok(h.clone());
        }

        if let Some((_, last)) = name.rsplit_once('.') {
            if let Some(h) = self.handlers.get(last) {
                return Ok(h.clone());
            }
        }

        // Longest matching prefix wins so `app.orchestrator.*` beats `app.*`.
        let category = self
            .handlers
            .iter()
            .filter_map(|(pattern, h)| {
                let prefix = pattern.strip_suffix(".*")?;
                let rest = name.strip_prefix(prefix)?;
                rest.starts_with('.').then_some((prefix.len(), h))
            })
            .max_by_key(|(len, _)| *len);
        if let Some((_, h)) = category {
            return Ok(h.clone());
        }

        self.handlers.get("*").cloned().ok_or_else(|| UnknownHandler {
            name: name.to_string(),
        })
    }

    /// Registered names and patterns, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn tagged(tag: &'static str) -> impl JobHandler + 'static {
        move |arg: &str| -> Result<JobOutput, HandlerError> { Ok(json!({ "tag": tag, "arg": arg })) }
    }

    fn tag_of(registry: &HandlerRegistry, name: Option<&str>) -> String {
        let out = registry.resolve(name).unwrap().handle("x").unwrap();
        out["tag"].as_str().unwrap().to_string()
    }

    #[test]
    fn exact_name_resolves() {
        let mut registry = HandlerRegistry::new();
        registry.register("handle", tagged("exact"));
        assert_eq!(tag_of(&registry, Some("handle")), "exact");
    }

    #[test]
    fn dotted_path_falls_back_to_last_segment() {
        let mut registry = HandlerRegistry::new();
        registry.register("process_submission", tagged("short"));
        assert_eq!(
            tag_of(&registry, Some("app.orchestrator.process_submission")),
            "short"
        );
    }

    #[test]
    fn category_pattern_prefers_longest_prefix() {
        let mut registry = HandlerRegistry::new();
        registry
            .register("app.*", tagged("app"))
            .register("app.agents.*", tagged("agents"));
        assert_eq!(tag_of(&registry, Some("app.agents.classify")), "agents");
        assert_eq!(tag_of(&registry, Some("app.orchestrator.run")), "app");
        assert!(registry.resolve(Some("application.run")).is_err());
    }

    #[test]
    fn wildcard_catches_everything_named() {
        let mut registry = HandlerRegistry::new();
        registry.register("*", tagged("any"));
        assert_eq!(tag_of(&registry, Some("whatever")), "any");
    }

    #[test]
    fn unnamed_invocations_use_default() {
        let mut registry = HandlerRegistry::new();
        assert!(registry.resolve(None).is_err());
        registry.set_default(Arc::new(tagged("default")));
        assert_eq!(tag_of(&registry, None), "default");
    }

    #[test]
    fn unknown_handler_reports_name() {
        let registry = HandlerRegistry::new();
        let err = registry.resolve(Some("missing")).err().unwrap();
        assert_eq!(err.to_string(), "unknown handler: missing");
    }

    #[test]
    fn handler_errors_pass_through() {
        let mut registry = HandlerRegistry::new();
        registry.register_fn("boom", |_| Err(HandlerError::failed("nope")));
        let err = registry.resolve(Some("boom")).unwrap().handle("x").unwrap_err();
        assert_eq!(err, HandlerError::Failed("nope".to_string()));
        assert_eq!(registry.names(), vec!["boom"]);
    }
}
