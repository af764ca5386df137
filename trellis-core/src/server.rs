//! The server facade.
//!
//! A [`Server`] owns the route table, the server methods, the lifecycle
//! extensions and the handler types. Setup takes `&mut self`; once built, a
//! server is shared read-only (for instance behind an `Arc`) and every
//! request is dispatched through `&self`.

use crate::config::ServerConfig;
use crate::error::{Error, Result, RouteError};
use crate::handler::{Handler, HandlerTypes};
use crate::lifecycle::{Action, ExtPoint, Extension, Extensions};
use crate::request::{Reply, Request};
use crate::route::{Route, RouteDescriptor};
use crate::router::Router;
use futures::future::BoxFuture;
use http::Method as HttpMethod;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};
use trellis_methods::{
    Method, MethodDescriptor, MethodOptions, MethodRegistry, RegistrationError, ServerMethod,
};

pub struct Server {
    config: ServerConfig,
    router: Router,
    methods: MethodRegistry,
    extensions: Extensions,
    handlers: HandlerTypes,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            router: Router::new(config.router),
            config,
            methods: MethodRegistry::new(),
            extensions: Extensions::new(),
            handlers: HandlerTypes::new(),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Server methods, for prerequisites and handlers that call them.
    pub fn methods(&self) -> &MethodRegistry {
        &self.methods
    }

    /// Add a route.
    pub fn route(&mut self, descriptor: RouteDescriptor) -> std::result::Result<Arc<Route>, RouteError> {
        let route = Route::new(descriptor, &self.config.router, &self.handlers)?;
        self.router.add(route)
    }

    /// Add routes in order, stopping at the first failure.
    pub fn routes<I>(&mut self, descriptors: I) -> std::result::Result<(), RouteError>
    where
        I: IntoIterator<Item = RouteDescriptor>,
    {
        for descriptor in descriptors {
            self.route(descriptor)?;
        }
        Ok(())
    }

    /// Register a server method.
    pub fn method(
        &mut self,
        name: &str,
        method: Method,
        options: MethodOptions,
    ) -> std::result::Result<ServerMethod, RegistrationError> {
        self.methods.register(name, method, options)
    }

    /// Register several server methods, stopping at the first failure.
    pub fn register_methods<I>(&mut self, descriptors: I) -> std::result::Result<(), RegistrationError>
    where
        I: IntoIterator<Item = MethodDescriptor>,
    {
        self.methods.register_all(descriptors)
    }

    /// Define a handler type usable from route descriptors.
    pub fn handler<F>(&mut self, kind: &str, factory: F) -> std::result::Result<(), RouteError>
    where
        F: Fn(&Value) -> std::result::Result<Handler, String> + Send + Sync + 'static,
    {
        self.handlers.register(kind, factory)
    }

    pub fn ext(&mut self, point: ExtPoint, extension: impl Extension + 'static) {
        self.extensions.add(point, extension);
    }

    pub fn ext_fn<F>(&mut self, point: ExtPoint, f: F)
    where
        F: for<'a> Fn(&'a mut Request) -> BoxFuture<'a, Result<Action>> + Send + Sync + 'static,
    {
        self.extensions.add_fn(point, f);
    }

    /// `(method, path)` of every route, in selection order.
    pub fn table(&self) -> Vec<(String, String)> {
        self.router.table()
    }

    /// Log the route table.
    pub fn log_routes(&self) {
        for (method, path) in self.table() {
            info!(method = %method, path = %path, "Route");
        }
    }

    /// Run a request through the full lifecycle.
    ///
    /// Never fails: errors become replies carrying their status code.
    pub async fn dispatch(&self, mut request: Request) -> Reply {
        let reply = match self.lifecycle(&mut request).await {
            Ok(reply) => reply,
            Err(error) => {
                debug!(method = %request.method, path = %request.path, error = %error, "Request failed");
                Reply::from_error(&error)
            }
        };

        request.response = Some(reply.clone());
        let reply = match self
            .extensions
            .run(ExtPoint::OnPreResponse, &mut request)
            .await
        {
            Ok(Some(replacement)) => replacement,
            Ok(None) => request.response.take().unwrap_or(reply),
            Err(error) => Reply::from_error(&error),
        };

        debug!(
            method = %request.method,
            path = %request.path,
            route = request.route().unwrap_or("-"),
            status = reply.status.as_u16(),
            "Request completed"
        );
        reply
    }

    /// Dispatch a request built from a verb and a url.
    pub async fn inject(&self, method: HttpMethod, url: &str) -> Reply {
        self.dispatch(Request::new(method, url)).await
    }

    async fn lifecycle(&self, request: &mut Request) -> Result<Reply> {
        if let Some(reply) = self.extensions.run(ExtPoint::OnRequest, request).await? {
            return Ok(reply);
        }

        let route = self.router.route(request).ok_or_else(|| {
            Error::RouteNotFound(format!("{} {}", request.method, request.path))
        })?;

        for point in [ExtPoint::OnPreAuth, ExtPoint::OnPostAuth, ExtPoint::OnPreHandler] {
            if let Some(reply) = self.extensions.run(point, request).await? {
                return Ok(reply);
            }
        }

        for pre in route.prerequisites() {
            let value = pre.run(request, &self.methods).await?;
            if let Some(key) = pre.assigned_to() {
                request.pre.insert(key.to_string(), value);
            }
        }

        let reply = route.handler().call(request.clone()).await?;
        request.response = Some(reply.clone());

        if let Some(reply) = self.extensions.run(ExtPoint::OnPostHandler, request).await? {
            return Ok(reply);
        }
        Ok(request.response.take().unwrap_or(reply))
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new(ServerConfig::default())
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .field("routes", &self.router.len())
            .field("methods", &self.methods.len())
            .finish()
    }
}
