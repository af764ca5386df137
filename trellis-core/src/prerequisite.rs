//! Route prerequisites.
//!
//! Prerequisites run after `onPreHandler`, in order, each storing its result
//! in `request.pre` under its `assign` name. A prerequisite is either an async
//! function of the request or a server method reference such as
//! `user.get(params.id, query.full)`.
//!
//! Method reference arguments are request references (`params.x`, `query.x`,
//! `pre.x`, `payload`) or JSON literals (`"text"`, `42`, `true`, `null`).
//! The string is parsed when the route is built; the method itself is looked
//! up on every request.

use crate::error::{Error, Result, RouteError};
use crate::request::Request;
use futures::future::BoxFuture;
use futures::FutureExt;
use regex::Regex;
use serde_json::Value;
use std::future::Future;
use std::sync::{Arc, LazyLock};
use trellis_methods::MethodRegistry;

static METHOD_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([A-Za-z0-9_$]+(?:\.[A-Za-z0-9_$]+)*)\s*(?:\((.*)\))?\s*$").unwrap()
});

type PreFn = dyn Fn(Request) -> BoxFuture<'static, Result<Value>> + Send + Sync;

/// Value source for one method argument.
#[derive(Debug, Clone, PartialEq)]
pub enum PreArg {
    Param(String),
    Query(String),
    Pre(String),
    Payload,
    Literal(Value),
}

impl PreArg {
    fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if let Some(name) = text.strip_prefix("params.") {
            return Some(PreArg::Param(name.to_string()));
        }
        if let Some(name) = text.strip_prefix("query.") {
            return Some(PreArg::Query(name.to_string()));
        }
        if let Some(name) = text.strip_prefix("pre.") {
            return Some(PreArg::Pre(name.to_string()));
        }
        if text == "payload" {
            return Some(PreArg::Payload);
        }
        serde_json::from_str(text).ok().map(PreArg::Literal)
    }

    fn resolve(&self, request: &Request) -> Value {
        let string = |v: Option<&str>| v.map(|s| Value::String(s.to_string())).unwrap_or(Value::Null);
        match self {
            PreArg::Param(name) => string(request.param(name)),
            PreArg::Query(name) => string(request.query(name)),
            PreArg::Pre(name) => request.pre.get(name).cloned().unwrap_or(Value::Null),
            PreArg::Payload => request.payload.clone().unwrap_or(Value::Null),
            PreArg::Literal(value) => value.clone(),
        }
    }
}

#[derive(Clone)]
enum Source {
    Function(Arc<PreFn>),
    Method { name: String, args: Vec<PreArg> },
}

/// One entry of a route's `pre` list.
#[derive(Clone)]
pub struct Prerequisite {
    source: Source,
    assign: Option<String>,
}

impl Prerequisite {
    /// A prerequisite computed by an async function.
    pub fn function<F, Fut>(f: F) -> Self
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            source: Source::Function(Arc::new(move |request: Request| f(request).boxed())),
            assign: None,
        }
    }

    /// A server method reference. Assigns to the method name unless
    /// [`assign`](Self::assign) says otherwise.
    pub fn method(reference: &str) -> std::result::Result<Self, RouteError> {
        let invalid = || RouteError::InvalidPrerequisite(reference.to_string());
        let caps = METHOD_REFERENCE.captures(reference).ok_or_else(invalid)?;
        let name = caps[1].to_string();

        let args = match caps.get(2).map(|m| m.as_str().trim()) {
            None | Some("") => Vec::new(),
            Some(list) => split_args(list)
                .into_iter()
                .map(PreArg::parse)
                .collect::<Option<Vec<_>>>()
                .ok_or_else(invalid)?,
        };

        Ok(Self {
            assign: Some(name.clone()),
            source: Source::Method { name, args },
        })
    }

    pub fn assign(mut self, key: impl Into<String>) -> Self {
        self.assign = Some(key.into());
        self
    }

    pub fn assigned_to(&self) -> Option<&str> {
        self.assign.as_deref()
    }

    /// Method name and arguments, for method references.
    pub fn method_reference(&self) -> Option<(&str, &[PreArg])> {
        match &self.source {
            Source::Method { name, args } => Some((name, args)),
            Source::Function(_) => None,
        }
    }

    /// Run against `request`, resolving method references in `methods`.
    pub async fn run(&self, request: &Request, methods: &MethodRegistry) -> Result<Value> {
        match &self.source {
            Source::Function(f) => f(request.clone()).await,
            Source::Method { name, args } => {
                let method = methods.get(name).ok_or_else(|| {
                    Error::Internal(format!("Unknown server method in string notation: {}", name))
                })?;
                let args = args.iter().map(|arg| arg.resolve(request)).collect();
                Ok(method.call(args).await?)
            }
        }
    }
}

/// Split an argument list on commas outside of JSON string literals.
fn split_args(list: &str) -> Vec<&str> {
    let mut args = Vec::new();
    let mut start = 0;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in list.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            ',' if !in_string => {
                args.push(&list[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    args.push(&list[start..]);
    args
}

impl std::fmt::Debug for Prerequisite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let source = match &self.source {
            Source::Function(_) => "function".to_string(),
            Source::Method { name, .. } => name.clone(),
        };
        f.debug_struct("Prerequisite")
            .field("source", &source)
            .field("assign", &self.assign)
            .finish()
    }
}
