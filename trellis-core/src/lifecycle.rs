//! Request lifecycle extension points.
//!
//! A request passes through these phases, in order:
//!
//! 1. `onRequest` - before routing; may rewrite the request path
//! 2. `onPreAuth`
//! 3. `onPostAuth`
//! 4. `onPreHandler`
//! 5. route prerequisites, then the handler
//! 6. `onPostHandler` - `request.response` holds the handler's reply
//! 7. `onPreResponse` - always runs, even after a short-circuit or an error
//!
//! An extension either lets the request continue or replies on its behalf.
//! A reply or an error skips every remaining phase up to `onPreResponse`.
//!
//! ```
//! use trellis_core::lifecycle::{Action, ExtPoint, Extensions};
//! use trellis_core::{Reply, Request};
//!
//! let mut extensions = Extensions::new();
//! extensions.add_fn(ExtPoint::OnPreAuth, |request: &mut Request| {
//!     Box::pin(async move {
//!         if request.header("authorization").is_none() {
//!             return Ok::<_, trellis_core::Error>(Action::Reply(Reply::ok("denied")));
//!         }
//!         Ok(Action::Continue)
//!     })
//! });
//! ```

use crate::error::Result;
use crate::request::{Reply, Request};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

/// Named lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtPoint {
    OnRequest,
    OnPreAuth,
    OnPostAuth,
    OnPreHandler,
    OnPostHandler,
    OnPreResponse,
}

impl ExtPoint {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtPoint::OnRequest => "onRequest",
            ExtPoint::OnPreAuth => "onPreAuth",
            ExtPoint::OnPostAuth => "onPostAuth",
            ExtPoint::OnPreHandler => "onPreHandler",
            ExtPoint::OnPostHandler => "onPostHandler",
            ExtPoint::OnPreResponse => "onPreResponse",
        }
    }

    /// Look up a phase by its lifecycle name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "onRequest" => Some(ExtPoint::OnRequest),
            "onPreAuth" => Some(ExtPoint::OnPreAuth),
            "onPostAuth" => Some(ExtPoint::OnPostAuth),
            "onPreHandler" => Some(ExtPoint::OnPreHandler),
            "onPostHandler" => Some(ExtPoint::OnPostHandler),
            "onPreResponse" => Some(ExtPoint::OnPreResponse),
            _ => None,
        }
    }
}

impl std::fmt::Display for ExtPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an extension decided.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Continue,
    /// Stop here and respond with this reply.
    Reply(Reply),
}

/// Code run at an extension point.
#[async_trait]
pub trait Extension: Send + Sync {
    async fn run(&self, request: &mut Request) -> Result<Action>;
}

type ExtFn = dyn for<'a> Fn(&'a mut Request) -> BoxFuture<'a, Result<Action>> + Send + Sync;

/// Adapts a closure returning a boxed future.
pub struct FnExtension(Box<ExtFn>);

#[async_trait]
impl Extension for FnExtension {
    async fn run(&self, request: &mut Request) -> Result<Action> {
        (self.0)(request).await
    }
}

/// Extensions registered per phase, run in registration order.
#[derive(Default, Clone)]
pub struct Extensions {
    points: HashMap<ExtPoint, Vec<Arc<dyn Extension>>>,
}

impl Extensions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, point: ExtPoint, extension: impl Extension + 'static) {
        self.points.entry(point).or_default().push(Arc::new(extension));
    }

    pub fn add_fn<F>(&mut self, point: ExtPoint, f: F)
    where
        F: for<'a> Fn(&'a mut Request) -> BoxFuture<'a, Result<Action>> + Send + Sync + 'static,
    {
        self.add(point, FnExtension(Box::new(f)));
    }

    pub fn len(&self, point: ExtPoint) -> usize {
        self.points.get(&point).map_or(0, Vec::len)
    }

    /// Run a phase. Returns the first short-circuit reply, if any.
    pub async fn run(&self, point: ExtPoint, request: &mut Request) -> Result<Option<Reply>> {
        let Some(extensions) = self.points.get(&point) else {
            return Ok(None);
        };

        trace!(point = %point, count = extensions.len(), path = %request.path, "Running extensions");
        for extension in extensions {
            if let Action::Reply(reply) = extension.run(request).await? {
                trace!(point = %point, status = %reply.status, "Extension replied");
                return Ok(Some(reply));
            }
        }
        Ok(None)
    }
}
