use std::{
    error::Error as _,
    sync::{Arc, Mutex, PoisonError},
};

use dashmap::DashMap;
use minijinja::{Environment, UndefinedBehavior};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::TemplateError;

/// Parses template bodies into reusable handles and renders them.
pub trait TemplateEngine: Send + Sync {
    type Template: Send + Sync;

    fn parse(&self, body: &str) -> Result<Self::Template, TemplateError>;

    fn render(
        &self,
        template: &Self::Template,
        model: &serde_json::Value,
    ) -> Result<String, TemplateError>;
}

/// `minijinja` with HTML auto-escaping and strict undefined handling: a
/// binding missing from the model fails the render instead of producing an
/// empty string.
#[derive(Debug, Default, Clone, Copy)]
pub struct MiniJinjaEngine;

impl MiniJinjaEngine {
    const TEMPLATE_NAME: &'static str = "body.html";
}

impl TemplateEngine for MiniJinjaEngine {
    type Template = Environment<'static>;

    fn parse(&self, body: &str) -> Result<Self::Template, TemplateError> {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.add_template_owned(Self::TEMPLATE_NAME, body.to_owned())
            .map_err(|e| TemplateError::Parse(diagnostics(&e)))?;
        Ok(env)
    }

    fn render(
        &self,
        template: &Self::Template,
        model: &serde_json::Value,
    ) -> Result<String, TemplateError> {
        template
            .get_template(Self::TEMPLATE_NAME)
            .and_then(|t| t.render(model))
            .map_err(|e| TemplateError::Render(diagnostics(&e)))
    }
}

/// Joins an error and its sources into one message.
fn diagnostics(error: &minijinja::Error) -> String {
    let mut messages = vec![error.to_string()];
    let mut source = error.source();
    while let Some(cause) = source {
        messages.push(cause.to_string());
        source = cause.source();
    }
    messages.join("; ")
}

/// Renders template bodies, parsing each distinct body once.
///
/// Parsed templates are keyed by the SHA-256 of the body text, so two
/// notification types sharing a body share a parsed template, and an edited
/// body gets a fresh entry. The cache is never evicted.
///
/// Each key owns a slot with its own lock, so a parse only holds up renders
/// of the same body. The map's shard locks are never held while parsing.
pub struct TemplateRenderer<E: TemplateEngine = MiniJinjaEngine> {
    engine: E,
    cache: DashMap<String, Slot<E::Template>>,
}

type Slot<T> = Arc<Mutex<Option<Arc<T>>>>;

impl TemplateRenderer<MiniJinjaEngine> {
    pub fn new() -> Self {
        Self::with_engine(MiniJinjaEngine)
    }
}

impl Default for TemplateRenderer<MiniJinjaEngine> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: TemplateEngine> TemplateRenderer<E> {
    pub fn with_engine(engine: E) -> Self {
        info!("Template renderer initialized");

        Self {
            engine,
            cache: DashMap::new(),
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn template_key(body: &str) -> String {
        hex::encode(Sha256::digest(body.as_bytes()))
    }

    pub fn cached_templates(&self) -> usize {
        self.cache.len()
    }

    pub fn render<T>(&self, body: &str, model: &T) -> Result<String, TemplateError>
    where
        T: Serialize + ?Sized,
    {
        self.render_with_key(&Self::template_key(body), body, model)
    }

    /// Renders `body`, using `template_key` as its cache key. Callers that
    /// already hold the body hash can skip hashing it again.
    pub fn render_with_key<T>(
        &self,
        template_key: &str,
        body: &str,
        model: &T,
    ) -> Result<String, TemplateError>
    where
        T: Serialize + ?Sized,
    {
        let template = self.parsed(template_key, body)?;

        let model = serde_json::to_value(model)
            .map_err(|e| TemplateError::Render(format!("model is not serializable: {}", e)))?;

        debug!(template_key, "Rendering template");

        self.engine.render(&template, &model)
    }

    fn parsed(&self, template_key: &str, body: &str) -> Result<Arc<E::Template>, TemplateError> {
        let slot = self.slot(template_key);
        let mut parsed = slot.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(template) = parsed.as_ref() {
            return Ok(Arc::clone(template));
        }

        debug!(template_key, "Parsing template");
        match self.engine.parse(body) {
            Ok(template) => {
                let template = Arc::new(template);
                *parsed = Some(Arc::clone(&template));
                Ok(template)
            }
            Err(e) => {
                self.cache
                    .remove_if(template_key, |_, cached| Arc::ptr_eq(cached, &slot));
                Err(e)
            }
        }
    }

    /// Clones the slot out so no shard lock outlives this call.
    fn slot(&self, template_key: &str) -> Slot<E::Template> {
        if let Some(slot) = self.cache.get(template_key) {
            return Arc::clone(slot.value());
        }
        Arc::clone(self.cache.entry(template_key.to_owned()).or_default().value())
    }
}
