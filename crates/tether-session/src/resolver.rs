//! Expression resolver cache
//!
//! Memoizes resolved identifiers per (expression, location) pair and
//! maps source file extensions to expression evaluators. Resolver
//! failures are logged and never propagate; the original expression is
//! returned instead.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use tether_common::{Result, StackFrame};

/// Resolver hook: `Ok(None)` means the resolver declined
pub type ResolverHook = Arc<dyn Fn(&str, &str) -> Result<Option<String>> + Send + Sync>;

/// Factory producing an evaluator for a file extension; `None` means
/// no special evaluator for that extension
pub type EvaluatorFactory =
    Arc<dyn Fn(&str) -> Option<Arc<dyn ExpressionEvaluator>> + Send + Sync>;

/// Evaluates expressions in the context of a stack frame
///
/// Evaluation internals live outside this crate; the session only
/// selects which evaluator applies to a frame.
pub trait ExpressionEvaluator: Send + Sync {
    fn evaluate(&self, frame: &StackFrame, expression: &str) -> Result<String>;
}

/// Fallback evaluator returning expressions unevaluated
pub struct LiteralEvaluator;

impl ExpressionEvaluator for LiteralEvaluator {
    fn evaluate(&self, _frame: &StackFrame, expression: &str) -> Result<String> {
        Ok(expression.to_string())
    }
}

/// Memoizing front end over the resolver hook and evaluator factory
pub struct ExpressionResolverCache {
    resolved: Mutex<HashMap<(String, String), Option<String>>>,
    evaluators: Mutex<HashMap<String, Option<Arc<dyn ExpressionEvaluator>>>>,
    default_evaluator: Arc<dyn ExpressionEvaluator>,
}

impl ExpressionResolverCache {
    pub fn new() -> Self {
        Self {
            resolved: Mutex::new(HashMap::new()),
            evaluators: Mutex::new(HashMap::new()),
            default_evaluator: Arc::new(LiteralEvaluator),
        }
    }

    /// Resolves `expression` at `location` through `hook`, memoizing
    /// the outcome
    ///
    /// A declined resolution (hook returns `Ok(None)`) is cached and
    /// yields the original expression. A failing hook is reported
    /// through `log` and nothing is cached, so a later call retries.
    pub fn resolve(
        &self,
        expression: &str,
        location: &str,
        hook: &ResolverHook,
        log: impl Fn(&str),
    ) -> String {
        let key = (expression.to_string(), location.to_string());
        if let Some(cached) = self.resolved.lock().get(&key) {
            return cached.clone().unwrap_or_else(|| expression.to_string());
        }

        match hook(expression, location) {
            Ok(resolved) => {
                let value = resolved
                    .clone()
                    .unwrap_or_else(|| expression.to_string());
                self.resolved.lock().insert(key, resolved);
                value
            }
            Err(err) => {
                log(&format!(
                    "Error resolving expression '{}': {}",
                    expression, err
                ));
                expression.to_string()
            }
        }
    }

    /// Evaluator for a stack frame, selected by source file extension
    ///
    /// An empty or absent extension yields the default evaluator.
    pub fn evaluator_for_frame(
        &self,
        frame: &StackFrame,
        factory: Option<&EvaluatorFactory>,
    ) -> Arc<dyn ExpressionEvaluator> {
        let extension = frame
            .source_file
            .as_deref()
            .and_then(|file| std::path::Path::new(file).extension())
            .and_then(|ext| ext.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();

        if extension.is_empty() {
            return self.default_evaluator.clone();
        }

        let Some(factory) = factory else {
            return self.default_evaluator.clone();
        };

        let mut evaluators = self.evaluators.lock();
        let entry = evaluators
            .entry(extension.clone())
            .or_insert_with(|| factory(&extension));
        entry.clone().unwrap_or_else(|| self.default_evaluator.clone())
    }

    /// Drops all memoized resolutions and evaluators
    pub fn clear(&self) {
        self.resolved.lock().clear();
        self.evaluators.lock().clear();
    }
}

impl Default for ExpressionResolverCache {
    fn default() -> Self {
        Self::new()
    }
}
