//! Server methods for Trellis.
//!
//! Plain functions registered under dot-separated names, invoked through one
//! asynchronous contract regardless of how they deliver results, with
//! optional memoization.
//!
//! # Features
//!
//! - **Calling conventions** - callback, future and direct functions, fixed at registration
//! - **Name tree** - `tools.math.add` style nesting with conflict checks
//! - **Single-flight caching** - one generation per key, shared by all callers
//! - **Generation timeouts** - callers give up, the generation still fills the cache
//! - **Stale-while-revalidate** - serve aging values while a refresh runs
//!
//! # Example
//!
//! ```no_run
//! use trellis_methods::*;
//! use serde_json::json;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut registry = MethodRegistry::new();
//! let add = registry.register(
//!     "math.add",
//!     Method::direct(|_, args| {
//!         Ok(json!(args.iter().filter_map(|a| a.as_i64()).sum::<i64>()))
//!     }),
//!     MethodOptions::new().cache(
//!         CachePolicy::new()
//!             .expires_in(Duration::from_secs(60))
//!             .generate_timeout(Duration::from_millis(100)),
//!     ),
//! )?;
//!
//! assert_eq!(add.call(vec![json!(1), json!(2)]).await?, json!(3));
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod error;
pub mod method;
pub mod options;
pub mod registry;
pub mod store;

pub use cache::{CacheStats, MethodCache};
pub use error::{MethodError, MethodResult, RegistrationError};
pub use method::{Bind, Generated, Method, MethodContext, Next};
pub use options::{default_key, CachePolicy, GenerateTimeout, KeyGenerator, MethodOptions};
pub use registry::{MethodDescriptor, MethodRegistry, ServerMethod};
pub use store::{CacheError, CacheResult, CacheStore, InMemoryCache, Segment};
