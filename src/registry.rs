//! Function Registry
//!
//! Maps function keys (strings) to typed dispatchers. The pool refuses
//! submissions whose key is not registered, so untrusted submissions can
//! never invoke arbitrary logic.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use crate::task::TaskFailure;

/// A callable the pool can dispatch to. Implementations classify their own
/// failures as retryable or fatal via [`TaskFailure`].
#[async_trait]
pub trait TaskFunction: Send + Sync {
    async fn call(&self, args: Value) -> Result<Value, TaskFailure>;
}

/// Adapter so plain async closures can be registered without a named type.
struct FnFunction<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> TaskFunction for FnFunction<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, TaskFailure>> + Send,
{
    async fn call(&self, args: Value) -> Result<Value, TaskFailure> {
        (self.f)(args).await
    }
}

/// String-keyed registry of task functions.
#[derive(Default)]
pub struct FunctionRegistry {
    functions: RwLock<HashMap<String, Arc<dyn TaskFunction>>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a dispatcher under `key`, replacing any previous entry.
    pub fn register(&self, key: &str, function: Arc<dyn TaskFunction>) {
        self.functions.write().insert(key.to_string(), function);
    }

    /// Register an async closure under `key`.
    pub fn register_fn<F, Fut>(&self, key: &str, f: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, TaskFailure>> + Send + 'static,
    {
        self.register(key, Arc::new(FnFunction { f }));
    }

    pub fn contains(&self, key: &str) -> bool {
        self.functions.read().contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<Arc<dyn TaskFunction>> {
        self.functions.read().get(key).cloned()
    }

    /// Registered keys, sorted for stable output.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.functions.read().keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_register_and_call() {
        let registry = FunctionRegistry::new();
        registry.register_fn("double", |args| async move {
            let n = args["n"].as_i64().unwrap_or(0);
            Ok(json!({ "result": n * 2 }))
        });

        assert!(registry.contains("double"));
        assert!(!registry.contains("triple"));

        let f = registry.get("double").unwrap();
        let out = f.call(json!({ "n": 21 })).await.unwrap();
        assert_eq!(out["result"], 42);
    }

    #[tokio::test]
    async fn test_failure_passthrough() {
        let registry = FunctionRegistry::new();
        registry.register_fn("always_fails", |_| async move {
            Err(TaskFailure::fatal("bad input"))
        });

        let f = registry.get("always_fails").unwrap();
        let err = f.call(Value::Null).await.unwrap_err();
        assert!(!err.is_retryable());
        assert_eq!(err.message, "bad input");
    }

    #[test]
    fn test_keys_sorted() {
        let registry = FunctionRegistry::new();
        registry.register_fn("zeta", |_| async move { Ok(Value::Null) });
        registry.register_fn("alpha", |_| async move { Ok(Value::Null) });

        assert_eq!(registry.keys(), vec!["alpha".to_string(), "zeta".to_string()]);
    }
}
