// Route definitions

use crate::config::RouterConfig;
use crate::error::RouteError;
use crate::handler::{Handler, HandlerSpec, HandlerTypes};
use crate::pattern::{PathPattern, PatternError, Segment};
use crate::prerequisite::Prerequisite;
use crate::request::Request;
use http::Method;
use std::cmp::Ordering;

/// The verb a route answers to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RouteMethod {
    /// `*`: any verb, tried after verb-specific routes
    Any,
    Verb(Method),
}

impl RouteMethod {
    /// Parse a verb name, case-insensitively.
    pub fn parse(name: &str) -> Result<Self, RouteError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(RouteError::MissingMethod);
        }
        if name == "*" {
            return Ok(RouteMethod::Any);
        }
        Method::from_bytes(name.to_uppercase().as_bytes())
            .map(RouteMethod::Verb)
            .map_err(|_| RouteError::InvalidMethod(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        match self {
            RouteMethod::Any => "*",
            RouteMethod::Verb(method) => method.as_str(),
        }
    }
}

impl std::fmt::Display for RouteMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-route options.
#[derive(Debug, Clone, Default)]
pub struct RouteConfig {
    /// Alternative place for the handler; exactly one of this and
    /// [`RouteDescriptor::handler`] must be set.
    pub handler: Option<HandlerSpec>,
    pub pre: Vec<Prerequisite>,
    pub description: Option<String>,
    pub tags: Vec<String>,
}

impl RouteConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handler(mut self, handler: impl Into<HandlerSpec>) -> Self {
        self.handler = Some(handler.into());
        self
    }

    pub fn pre(mut self, prerequisite: Prerequisite) -> Self {
        self.pre.push(prerequisite);
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

/// What a route is built from.
#[derive(Debug, Clone)]
pub struct RouteDescriptor {
    pub method: String,
    pub path: String,
    pub handler: Option<HandlerSpec>,
    pub config: RouteConfig,
}

impl RouteDescriptor {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            handler: None,
            config: RouteConfig::default(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new("GET", path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new("POST", path)
    }

    pub fn handler(mut self, handler: impl Into<HandlerSpec>) -> Self {
        self.handler = Some(handler.into());
        self
    }

    pub fn config(mut self, config: RouteConfig) -> Self {
        self.config = config;
        self
    }
}

/// Ranking of a route among routes of the same verb.
///
/// Orders most specific first: more literal segments, then routes without a
/// multi-segment parameter, then fewer required parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Specificity {
    pub literals: usize,
    pub multi: bool,
    pub required: usize,
}

impl Specificity {
    fn of(pattern: &PathPattern) -> Self {
        let mut rank = Specificity {
            literals: 0,
            multi: false,
            required: 0,
        };
        for segment in pattern.segments() {
            match segment {
                Segment::Literal { .. } => rank.literals += 1,
                Segment::Param { optional, .. } => {
                    if !optional {
                        rank.required += 1;
                    }
                }
                Segment::Multi { count, .. } => {
                    rank.multi = true;
                    rank.required += count.unwrap_or(1);
                }
            }
        }
        rank
    }
}

impl Ord for Specificity {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .literals
            .cmp(&self.literals)
            .then(self.multi.cmp(&other.multi))
            .then(self.required.cmp(&other.required))
    }
}

impl PartialOrd for Specificity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<PatternError> for RouteError {
    fn from(error: PatternError) -> Self {
        RouteError::InvalidPath {
            path: error.path,
            reason: error.reason,
        }
    }
}

/// A validated route. Immutable once built.
#[derive(Debug, Clone)]
pub struct Route {
    method: RouteMethod,
    pattern: PathPattern,
    handler: Handler,
    pre: Vec<Prerequisite>,
    description: Option<String>,
    tags: Vec<String>,
    specificity: Specificity,
    /// Fingerprint as compared for conflicts
    key: String,
    router: RouterConfig,
}

impl Route {
    /// Build a route, resolving handler descriptors through `handlers`.
    pub fn new(
        descriptor: RouteDescriptor,
        router: &RouterConfig,
        handlers: &HandlerTypes,
    ) -> Result<Self, RouteError> {
        let RouteDescriptor {
            method,
            path,
            handler,
            config,
        } = descriptor;

        if path.is_empty() {
            return Err(RouteError::MissingPath);
        }
        let method = RouteMethod::parse(&method)?;

        let spec = match (handler, config.handler) {
            (Some(spec), None) | (None, Some(spec)) => spec,
            _ => return Err(RouteError::Handler),
        };
        let pattern = PathPattern::parse(&path)?;
        let handler = handlers.resolve(spec)?;

        let key = if router.case_sensitive {
            pattern.fingerprint().to_string()
        } else {
            pattern.folded_fingerprint().to_string()
        };

        Ok(Self {
            method,
            specificity: Specificity::of(&pattern),
            pattern,
            handler,
            pre: config.pre,
            description: config.description,
            tags: config.tags,
            key,
            router: *router,
        })
    }

    pub fn method(&self) -> &RouteMethod {
        &self.method
    }

    /// The path template as registered.
    pub fn path(&self) -> &str {
        self.pattern.path()
    }

    pub fn pattern(&self) -> &PathPattern {
        &self.pattern
    }

    pub fn fingerprint(&self) -> &str {
        &self.key
    }

    pub fn specificity(&self) -> Specificity {
        self.specificity
    }

    pub fn handler(&self) -> &Handler {
        &self.handler
    }

    pub fn prerequisites(&self) -> &[Prerequisite] {
        &self.pre
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Match a request, writing the captured parameters onto it.
    pub fn matches(&self, request: &mut Request) -> bool {
        match self.pattern.match_path(&request.path, &self.router) {
            Some(params) => {
                request.set_route(self.pattern.path(), params);
                true
            }
            None => false,
        }
    }

    /// Whether `path` matches. Leaves nothing behind.
    pub fn test(&self, path: &str) -> bool {
        self.pattern.is_match(path, &self.router)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Reply;

    fn ok_handler() -> Handler {
        Handler::new(|_| async { Ok(Reply::ok("ok")) })
    }

    fn build(method: &str, path: &str) -> Result<Route, RouteError> {
        Route::new(
            RouteDescriptor::new(method, path).handler(ok_handler()),
            &RouterConfig::default(),
            &HandlerTypes::new(),
        )
    }

    #[test]
    fn test_missing_fields() {
        assert_eq!(build("GET", "").unwrap_err(), RouteError::MissingPath);
        assert_eq!(build("", "/").unwrap_err(), RouteError::MissingMethod);
        assert_eq!(
            build("GET", "").unwrap_err().to_string(),
            "Route options missing path"
        );
        assert!(matches!(build("GE T", "/").unwrap_err(), RouteError::InvalidMethod(_)));
    }

    #[test]
    fn test_handler_once_and_only_once() {
        let none = Route::new(
            RouteDescriptor::get("/"),
            &RouterConfig::default(),
            &HandlerTypes::new(),
        );
        assert_eq!(none.unwrap_err(), RouteError::Handler);

        let twice = Route::new(
            RouteDescriptor::get("/")
                .handler(ok_handler())
                .config(RouteConfig::new().handler(ok_handler())),
            &RouterConfig::default(),
            &HandlerTypes::new(),
        );
        assert_eq!(
            twice.unwrap_err().to_string(),
            "Handler must appear once and only once"
        );

        let in_config = Route::new(
            RouteDescriptor::get("/").config(RouteConfig::new().handler(ok_handler())),
            &RouterConfig::default(),
            &HandlerTypes::new(),
        );
        assert!(in_config.is_ok());
    }

    #[test]
    fn test_method_normalized() {
        assert_eq!(build("get", "/").unwrap().method(), &RouteMethod::Verb(Method::GET));
        assert_eq!(build("*", "/").unwrap().method(), &RouteMethod::Any);
        assert_eq!(build("purge", "/").unwrap().method().as_str(), "PURGE");
    }

    #[test]
    fn test_invalid_path() {
        let err = build("GET", "/{p*}/x").unwrap_err();
        assert!(matches!(err, RouteError::InvalidPath { ref path, .. } if path == "/{p*}/x"));
    }

    #[test]
    fn test_matches_sets_params() {
        let route = build("GET", "/users/{id}/{rest*2}").unwrap();
        let mut request = Request::get("/users/7/a/b?x=1");
        assert!(route.matches(&mut request));
        assert_eq!(request.param("id"), Some("7"));
        assert_eq!(request.param("rest"), Some("a/b"));
        assert_eq!(request.route(), Some("/users/{id}/{rest*2}"));

        let mut other = Request::get("/users/7");
        assert!(!route.matches(&mut other));
        assert!(other.params.is_empty());
        assert_eq!(other.route(), None);
    }

    #[test]
    fn test_probe() {
        let route = build("GET", "/path/{p?}").unwrap();
        assert!(route.test("/path/x"));
        assert!(route.test("/path"));
        assert!(route.test("/path/"));
        assert!(!route.test("/other"));
    }

    #[test]
    fn test_specificity_order() {
        let exact = build("GET", "/path/to/somewhere").unwrap().specificity();
        let param = build("GET", "/path/{p}/to").unwrap().specificity();
        let multi = build("GET", "/path/{p*}").unwrap().specificity();
        assert!(exact < param);
        assert!(param < multi);

        let optional = build("GET", "/a/{p?}").unwrap().specificity();
        let required = build("GET", "/a/{p}").unwrap().specificity();
        assert!(optional < required);
    }

    #[test]
    fn test_case_insensitive_fingerprint() {
        let route = Route::new(
            RouteDescriptor::get("/Users/{id}").handler(ok_handler()),
            &RouterConfig::default().case_sensitive(false),
            &HandlerTypes::new(),
        )
        .unwrap();
        assert_eq!(route.fingerprint(), "/users/?");
        assert!(route.test("/USERS/1"));
    }
}
