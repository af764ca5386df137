// Route table and request routing

use crate::config::RouterConfig;
use crate::error::RouteError;
use crate::params::PathParams;
use crate::request::Request;
use crate::route::{Route, RouteMethod};
use http::Method;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// Routes indexed by verb, each table ordered by specificity then
/// registration order.
///
/// Built during setup; lookups only read.
#[derive(Debug, Default)]
pub struct Router {
    config: RouterConfig,
    tables: HashMap<Method, Vec<Arc<Route>>>,
    wildcard: Vec<Arc<Route>>,
}

impl Router {
    pub fn new(config: RouterConfig) -> Self {
        Self {
            config,
            tables: HashMap::new(),
            wildcard: Vec::new(),
        }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Add a route. Fails if a route of the same verb has the same fingerprint.
    pub fn add(&mut self, route: Route) -> Result<Arc<Route>, RouteError> {
        let table = match route.method() {
            RouteMethod::Any => &mut self.wildcard,
            RouteMethod::Verb(method) => self.tables.entry(method.clone()).or_default(),
        };

        if let Some(existing) = table.iter().find(|r| r.fingerprint() == route.fingerprint()) {
            return Err(RouteError::Conflict {
                path: route.path().to_string(),
                existing: existing.path().to_string(),
            });
        }

        let route = Arc::new(route);
        let rank = route.specificity();
        let at = table.partition_point(|r| r.specificity() <= rank);
        table.insert(at, Arc::clone(&route));

        debug!(
            method = %route.method(),
            path = %route.path(),
            fingerprint = %route.fingerprint(),
            position = at,
            "Added route"
        );
        Ok(route)
    }

    /// Find the route for a request and bind its parameters.
    ///
    /// Verb-specific routes are tried before `*` routes.
    pub fn route(&self, request: &mut Request) -> Option<Arc<Route>> {
        let candidates = self
            .tables
            .get(&request.method)
            .into_iter()
            .flatten()
            .chain(&self.wildcard);

        for route in candidates {
            if route.matches(request) {
                trace!(method = %request.method, path = %request.path, route = %route.path(), "Route matched");
                return Some(Arc::clone(route));
            }
        }
        trace!(method = %request.method, path = %request.path, "No route matched");
        None
    }

    /// Route a bare verb and path.
    pub fn lookup(&self, method: &Method, path: &str) -> Option<(Arc<Route>, PathParams)> {
        let mut request = Request::new(method.clone(), path);
        let route = self.route(&mut request)?;
        Some((route, request.params))
    }

    /// `(method, path)` of every route, in selection order per verb.
    pub fn table(&self) -> Vec<(String, String)> {
        let mut verbs: Vec<&Method> = self.tables.keys().collect();
        verbs.sort_by(|a, b| a.as_str().cmp(b.as_str()));

        verbs
            .into_iter()
            .flat_map(|verb| &self.tables[verb])
            .chain(&self.wildcard)
            .map(|route| (route.method().to_string(), route.path().to_string()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tables.values().map(Vec::len).sum::<usize>() + self.wildcard.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
