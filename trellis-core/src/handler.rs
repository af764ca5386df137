// Route handlers and named handler types

use crate::error::{Result, RouteError};
use crate::request::{Reply, Request};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

type HandlerFn = dyn Fn(Request) -> BoxFuture<'static, Result<Reply>> + Send + Sync;

/// An async route handler.
#[derive(Clone)]
pub struct Handler(Arc<HandlerFn>);

impl Handler {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reply>> + Send + 'static,
    {
        Handler(Arc::new(move |request: Request| f(request).boxed()))
    }

    pub async fn call(&self, request: Request) -> Result<Reply> {
        (self.0)(request).await
    }
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Handler")
    }
}

/// How a route names its handler.
#[derive(Debug, Clone)]
pub enum HandlerSpec {
    Direct(Handler),
    /// A handler type registered on the server, built from `options`.
    Descriptor { kind: String, options: Value },
}

impl HandlerSpec {
    pub fn descriptor(kind: impl Into<String>, options: Value) -> Self {
        HandlerSpec::Descriptor {
            kind: kind.into(),
            options,
        }
    }
}

impl From<Handler> for HandlerSpec {
    fn from(handler: Handler) -> Self {
        HandlerSpec::Direct(handler)
    }
}

/// Builds a handler from descriptor options; `Err` carries the reason.
pub type HandlerFactory =
    Arc<dyn Fn(&Value) -> std::result::Result<Handler, String> + Send + Sync>;

/// Handler types known to a server.
#[derive(Clone, Default)]
pub struct HandlerTypes {
    factories: HashMap<String, HandlerFactory>,
}

impl HandlerTypes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, kind: &str, factory: F) -> std::result::Result<(), RouteError>
    where
        F: Fn(&Value) -> std::result::Result<Handler, String> + Send + Sync + 'static,
    {
        if self.factories.contains_key(kind) {
            return Err(RouteError::DuplicateHandlerType(kind.to_string()));
        }
        self.factories.insert(kind.to_string(), Arc::new(factory));
        Ok(())
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// Turn a spec into a callable handler.
    pub fn resolve(&self, spec: HandlerSpec) -> std::result::Result<Handler, RouteError> {
        match spec {
            HandlerSpec::Direct(handler) => Ok(handler),
            HandlerSpec::Descriptor { kind, options } => {
                let factory = self
                    .factories
                    .get(&kind)
                    .ok_or_else(|| RouteError::UnknownHandler(kind.clone()))?;
                factory(&options).map_err(|reason| RouteError::HandlerOptions {
                    handler: kind,
                    reason,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo_type() -> HandlerTypes {
        let mut types = HandlerTypes::new();
        types
            .register("echo", |options| {
                let text = options
                    .get("text")
                    .and_then(Value::as_str)
                    .ok_or("missing text")?
                    .to_string();
                Ok(Handler::new(move |_| {
                    let text = text.clone();
                    async move { Ok(Reply::ok(text)) }
                }))
            })
            .unwrap();
        types
    }

    #[tokio::test]
    async fn test_descriptor_resolves() {
        let types = echo_type();
        let handler = types
            .resolve(HandlerSpec::descriptor("echo", json!({ "text": "hi" })))
            .unwrap();
        let reply = handler.call(Request::get("/")).await.unwrap();
        assert_eq!(reply.body, json!("hi"));
    }

    #[test]
    fn test_unknown_and_invalid() {
        let types = echo_type();
        let err = types
            .resolve(HandlerSpec::descriptor("proxy", json!({})))
            .unwrap_err();
        assert_eq!(err, RouteError::UnknownHandler("proxy".into()));

        let err = types
            .resolve(HandlerSpec::descriptor("echo", json!({})))
            .unwrap_err();
        assert!(matches!(err, RouteError::HandlerOptions { ref reason, .. } if reason == "missing text"));
    }

    #[test]
    fn test_duplicate_type() {
        let mut types = echo_type();
        let err = types
            .register("echo", |_| Err("unused".to_string()))
            .unwrap_err();
        assert_eq!(err, RouteError::DuplicateHandlerType("echo".into()));
    }
}
