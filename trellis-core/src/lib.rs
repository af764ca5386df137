//! Core of the Trellis server framework.
//!
//! Path templates, the route table, the request lifecycle and the
//! [`Server`] facade that ties them to server methods.
//!
//! ```no_run
//! use trellis_core::*;
//!
//! # async fn example() -> std::result::Result<(), Box<dyn std::error::Error>> {
//! let mut server = Server::new(ServerConfig::default());
//! server.route(RouteDescriptor::get("/hello/{name}").handler(Handler::new(
//!     |request: Request| async move {
//!         let name = request.param("name").unwrap_or("stranger").to_string();
//!         Ok(Reply::ok(format!("Hello, {}!", name)))
//!     },
//! )))?;
//!
//! let reply = server.inject(http::Method::GET, "/hello/ada").await;
//! assert_eq!(reply.body, serde_json::json!("Hello, ada!"));
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod handler;
pub mod lifecycle;
pub mod logging;
pub mod params;
pub mod pattern;
pub mod prerequisite;
pub mod request;
pub mod route;
pub mod router;
pub mod server;

// Re-export commonly used types
pub use config::{ConfigLoader, FileFormat, RouterConfig, ServerConfig};
pub use error::{ConfigError, Error, Result, RouteError};
pub use handler::{Handler, HandlerFactory, HandlerSpec, HandlerTypes};
pub use lifecycle::{Action, ExtPoint, Extension, Extensions};
pub use logging::{LogConfig, LogFormat, LogLevel, LogOutput, Rotation};
pub use params::{PathParam, PathParams};
pub use pattern::{PathPattern, PatternError, Segment};
pub use prerequisite::{PreArg, Prerequisite};
pub use request::{parse_query_string, Reply, Request};
pub use route::{Route, RouteConfig, RouteDescriptor, RouteMethod, Specificity};
pub use router::Router;
pub use server::Server;
