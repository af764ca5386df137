//! Server method calling conventions and their normalization.
//!
//! A registered function delivers its result in one of three ways:
//!
//! - **Callback**: it receives a [`Next`] continuation and calls it once,
//!   now or later (possibly from another task), optionally with a ttl override.
//! - **Future**: it returns a future resolving to the result.
//! - **Direct**: it returns the result synchronously; returning `Err` or
//!   panicking are both reported as failures.
//!
//! The convention is fixed when the [`Method`] is built. [`Normalized`] turns
//! any of them into one asynchronous contract that yields exactly one
//! [`Generated`] outcome per call and never panics.

use crate::error::{MethodError, MethodResult};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// Shared object a method runs against.
pub type Bind = Arc<dyn Any + Send + Sync>;

type CallbackFn = dyn Fn(&MethodContext, Vec<Value>, Next) + Send + Sync;
type FutureFn = dyn Fn(&MethodContext, Vec<Value>) -> BoxFuture<'static, MethodResult> + Send + Sync;
type DirectFn = dyn Fn(&MethodContext, Vec<Value>) -> MethodResult + Send + Sync;

/// A server method function, tagged with its calling convention.
#[derive(Clone)]
pub enum Method {
    Callback(Arc<CallbackFn>),
    Future(Arc<FutureFn>),
    Direct(Arc<DirectFn>),
}

impl Method {
    /// A method that reports through a [`Next`] continuation.
    pub fn callback<F>(f: F) -> Self
    where
        F: Fn(&MethodContext, Vec<Value>, Next) + Send + Sync + 'static,
    {
        Method::Callback(Arc::new(f))
    }

    /// A method returning a future.
    pub fn future<F, Fut>(f: F) -> Self
    where
        F: Fn(&MethodContext, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = MethodResult> + Send + 'static,
    {
        Method::Future(Arc::new(move |ctx: &MethodContext, args: Vec<Value>| {
            f(ctx, args).boxed()
        }))
    }

    /// A method returning its result synchronously.
    pub fn direct<F>(f: F) -> Self
    where
        F: Fn(&MethodContext, Vec<Value>) -> MethodResult + Send + Sync + 'static,
    {
        Method::Direct(Arc::new(f))
    }

    /// Name of the calling convention, for logs.
    pub fn convention(&self) -> &'static str {
        match self {
            Method::Callback(_) => "callback",
            Method::Future(_) => "future",
            Method::Direct(_) => "direct",
        }
    }
}

impl std::fmt::Debug for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Method").field(&self.convention()).finish()
    }
}

/// Context handed to a method on every call.
#[derive(Clone)]
pub struct MethodContext {
    name: Arc<str>,
    bind: Option<Bind>,
}

impl MethodContext {
    pub(crate) fn new(name: &str, bind: Option<Bind>) -> Self {
        Self {
            name: Arc::from(name),
            bind,
        }
    }

    /// Qualified name the method was registered under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The bound context, if it is a `T`.
    pub fn bind<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.bind.as_ref().and_then(|b| b.downcast_ref::<T>())
    }
}

/// Outcome of one successful generation.
#[derive(Debug, Clone, PartialEq)]
pub struct Generated {
    pub value: Value,
    /// Overrides the cache policy's `expires_in`; zero means "do not store".
    pub ttl: Option<Duration>,
}

impl Generated {
    fn new(value: Value) -> Self {
        Self { value, ttl: None }
    }
}

/// Continuation handed to callback-style methods.
///
/// Every method consumes `self`, so a result is delivered at most once.
/// Dropping it without calling anything reports [`MethodError::NoResult`].
pub struct Next {
    tx: oneshot::Sender<MethodResult<Generated>>,
}

impl Next {
    /// Deliver a value.
    pub fn ok(self, value: Value) {
        self.send(Ok(Generated::new(value)));
    }

    /// Deliver a value with a ttl override.
    pub fn ok_with_ttl(self, value: Value, ttl: Duration) {
        self.send(Ok(Generated {
            value,
            ttl: Some(ttl),
        }));
    }

    /// Deliver a failure.
    pub fn err(self, error: MethodError) {
        self.send(Err(error));
    }

    /// Deliver a result, node style.
    pub fn done(self, result: MethodResult, ttl: Option<Duration>) {
        self.send(result.map(|value| Generated { value, ttl }));
    }

    fn send(self, outcome: MethodResult<Generated>) {
        // the receiver is gone only if the caller stopped waiting
        let _ = self.tx.send(outcome);
    }
}

/// A method adapted to the uniform asynchronous contract.
#[derive(Clone)]
pub struct Normalized {
    method: Method,
    context: MethodContext,
}

impl Normalized {
    pub(crate) fn new(method: Method, context: MethodContext) -> Self {
        Self { method, context }
    }

    pub fn name(&self) -> &str {
        self.context.name()
    }

    /// Run the method once.
    pub async fn run(&self, args: Vec<Value>) -> MethodResult<Generated> {
        match &self.method {
            Method::Callback(f) => {
                let (tx, rx) = oneshot::channel();
                let next = Next { tx };
                let ctx = &self.context;
                if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(|| f(ctx, args, next))) {
                    return Err(panicked(panic));
                }
                rx.await
                    .unwrap_or_else(|_| Err(MethodError::NoResult(self.name().to_string())))
            }
            Method::Future(f) => {
                let ctx = &self.context;
                let fut = match std::panic::catch_unwind(AssertUnwindSafe(|| f(ctx, args))) {
                    Ok(fut) => fut,
                    Err(panic) => return Err(panicked(panic)),
                };
                match AssertUnwindSafe(fut).catch_unwind().await {
                    Ok(result) => result.map(Generated::new),
                    Err(panic) => Err(panicked(panic)),
                }
            }
            Method::Direct(f) => {
                let ctx = &self.context;
                let result = std::panic::catch_unwind(AssertUnwindSafe(|| f(ctx, args)))
                    .unwrap_or_else(|panic| Err(panicked(panic)));
                // keep delivery asynchronous for every convention
                tokio::task::yield_now().await;
                result.map(Generated::new)
            }
        }
    }
}

fn panicked(panic: Box<dyn Any + Send>) -> MethodError {
    let message = if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "method panicked".to_string()
    };
    MethodError::Panicked(message)
}
