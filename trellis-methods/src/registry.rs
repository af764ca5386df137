//! Registry of named server methods.
//!
//! Qualified names are dot-separated paths (`tools.math.add`) stored in a
//! tree of groups and leaves. A name may not pass through an existing method
//! and may not replace a method or a group.

use crate::cache::MethodCache;
use crate::error::{MethodResult, RegistrationError};
use crate::method::{Method, MethodContext, Normalized};
use crate::options::{default_key, MethodOptions};
use crate::store::{CacheStore, InMemoryCache};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// One entry for [`MethodRegistry::register_all`].
#[derive(Debug, Clone)]
pub struct MethodDescriptor {
    pub name: String,
    pub method: Method,
    pub options: MethodOptions,
}

impl MethodDescriptor {
    pub fn new(name: impl Into<String>, method: Method) -> Self {
        Self {
            name: name.into(),
            method,
            options: MethodOptions::default(),
        }
    }

    pub fn options(mut self, options: MethodOptions) -> Self {
        self.options = options;
        self
    }
}

enum Node {
    Group(BTreeMap<String, Node>),
    Leaf(ServerMethod),
}

/// Owns every registered method and the cache store they share.
pub struct MethodRegistry {
    root: BTreeMap<String, Node>,
    store: Arc<dyn CacheStore>,
    count: usize,
}

impl MethodRegistry {
    /// Create a registry backed by an in-memory store.
    pub fn new() -> Self {
        Self::with_store(Arc::new(InMemoryCache::new()))
    }

    /// Create a registry backed by `store`.
    pub fn with_store(store: Arc<dyn CacheStore>) -> Self {
        Self {
            root: BTreeMap::new(),
            store,
            count: 0,
        }
    }

    /// Register `method` under the qualified `name`.
    pub fn register(
        &mut self,
        name: &str,
        method: Method,
        options: MethodOptions,
    ) -> Result<ServerMethod, RegistrationError> {
        validate_name(name)?;
        let segments: Vec<&str> = name.split('.').collect();
        self.check_path(name, &segments)?;

        let convention = method.convention();
        let context = MethodContext::new(name, options.bind.clone());
        let normalized = Normalized::new(method, context);

        let cache = match &options.cache {
            Some(policy) => {
                let timeout = policy.validate(name)?;
                let generate_key = options
                    .generate_key
                    .clone()
                    .unwrap_or_else(|| Arc::new(default_key));
                Some(MethodCache::new(
                    normalized.clone(),
                    policy.clone(),
                    timeout,
                    generate_key,
                    Arc::clone(&self.store),
                ))
            }
            None => None,
        };

        let entry = ServerMethod {
            inner: Arc::new(Entry {
                name: name.to_string(),
                method: normalized,
                cache,
            }),
        };
        self.insert(&segments, entry.clone());
        self.count += 1;

        debug!(
            method = %name,
            convention,
            cached = entry.cache().is_some(),
            "Registered server method"
        );
        Ok(entry)
    }

    /// Register every descriptor in order, stopping at the first failure.
    pub fn register_all<I>(&mut self, descriptors: I) -> Result<(), RegistrationError>
    where
        I: IntoIterator<Item = MethodDescriptor>,
    {
        for descriptor in descriptors {
            self.register(&descriptor.name, descriptor.method, descriptor.options)?;
        }
        Ok(())
    }

    /// Look up a method by qualified name.
    pub fn get(&self, name: &str) -> Option<ServerMethod> {
        let mut segments = name.split('.');
        let mut node = self.root.get(segments.next()?)?;
        for segment in segments {
            match node {
                Node::Group(children) => node = children.get(segment)?,
                Node::Leaf(_) => return None,
            }
        }
        match node {
            Node::Leaf(method) => Some(method.clone()),
            Node::Group(_) => None,
        }
    }

    /// Qualified names of every registered method, sorted.
    pub fn names(&self) -> Vec<String> {
        fn walk(prefix: &str, nodes: &BTreeMap<String, Node>, out: &mut Vec<String>) {
            for (segment, node) in nodes {
                let name = if prefix.is_empty() {
                    segment.clone()
                } else {
                    format!("{}.{}", prefix, segment)
                };
                match node {
                    Node::Leaf(_) => out.push(name),
                    Node::Group(children) => walk(&name, children, out),
                }
            }
        }

        let mut out = Vec::with_capacity(self.count);
        walk("", &self.root, &mut out);
        out
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// The store shared by every cached method.
    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    fn check_path(&self, name: &str, segments: &[&str]) -> Result<(), RegistrationError> {
        let mut level = &self.root;
        for (i, segment) in segments.iter().enumerate() {
            let last = i + 1 == segments.len();
            match level.get(*segment) {
                None => return Ok(()),
                Some(Node::Leaf(_)) if last => {
                    return Err(RegistrationError::AlreadyExists(name.to_string()));
                }
                Some(Node::Leaf(_)) => {
                    return Err(RegistrationError::NestedThroughMethod {
                        segment: segments[i + 1].to_string(),
                        name: name.to_string(),
                    });
                }
                Some(Node::Group(_)) if last => {
                    return Err(RegistrationError::GroupConflict(name.to_string()));
                }
                Some(Node::Group(children)) => level = children,
            }
        }
        Ok(())
    }

    // Callers run check_path first, so every step below is a group or vacant.
    fn insert(&mut self, segments: &[&str], method: ServerMethod) {
        let Some((leaf, groups)) = segments.split_last() else {
            return;
        };
        let mut level = &mut self.root;
        for segment in groups {
            let node = level
                .entry(segment.to_string())
                .or_insert_with(|| Node::Group(BTreeMap::new()));
            level = match node {
                Node::Group(children) => children,
                Node::Leaf(_) => return,
            };
        }
        level.insert(leaf.to_string(), Node::Leaf(method));
    }
}

impl Default for MethodRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_name(name: &str) -> Result<(), RegistrationError> {
    let valid = !name.is_empty()
        && name.split('.').all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
                && !segment.chars().all(|c| c.is_ascii_digit())
        });

    if valid {
        Ok(())
    } else {
        Err(RegistrationError::InvalidName(name.to_string()))
    }
}

struct Entry {
    name: String,
    method: Normalized,
    cache: Option<MethodCache>,
}

/// Accessor for a registered method. Cheap to clone.
#[derive(Clone)]
pub struct ServerMethod {
    inner: Arc<Entry>,
}

impl ServerMethod {
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Invoke the method, through its cache when one is configured.
    pub async fn call(&self, args: Vec<Value>) -> MethodResult {
        match &self.inner.cache {
            Some(cache) => cache.get(args).await,
            None => self.inner.method.run(args).await.map(|generated| generated.value),
        }
    }

    /// Invoke the method and hand the outcome to `done` from a spawned task.
    ///
    /// `done` runs exactly once and never before this function returns.
    pub fn call_with<F>(&self, args: Vec<Value>, done: F)
    where
        F: FnOnce(MethodResult) + Send + 'static,
    {
        let this = self.clone();
        tokio::spawn(async move {
            done(this.call(args).await);
        });
    }

    /// The cache, when the method was registered with a cache policy.
    pub fn cache(&self) -> Option<&MethodCache> {
        self.inner.cache.as_ref()
    }
}

impl std::fmt::Debug for ServerMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerMethod")
            .field("name", &self.inner.name)
            .field("cached", &self.inner.cache.is_some())
            .finish()
    }
}
