// Trellis - a configuration-driven server core for Rust
//
// Path templates and a specificity-ordered route table, a request lifecycle
// with named extension points, and server methods with single-flight caching.

// Re-export core functionality
pub use trellis_core::*;

// Server methods
pub use trellis_methods::{
    CachePolicy, CacheStats, CacheStore, GenerateTimeout, Generated, InMemoryCache, Method,
    MethodCache, MethodContext, MethodDescriptor, MethodError, MethodOptions, MethodRegistry,
    MethodResult, Next, RegistrationError, ServerMethod, default_key,
};

pub use trellis_methods as methods;

pub use async_trait::async_trait;
pub use http;
pub use serde_json::{Value, json};

// Prelude for common imports
pub mod prelude {
    pub use crate::{
        Action,
        CachePolicy,
        Error,
        ExtPoint,
        Extension,
        Handler,
        HandlerSpec,
        Method,
        MethodOptions,
        Prerequisite,
        Reply,
        Request,
        RouteConfig,
        RouteDescriptor,
        Server,
        ServerConfig,
        async_trait,
        json,
    };
}
