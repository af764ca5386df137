// Request context and reply types

use crate::error::Error;
use crate::params::PathParams;
use http::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;

/// A request moving through the lifecycle.
///
/// Routing fills `params`, prerequisites fill `pre`, and the handler's reply
/// is exposed in `response` to the phases that follow it.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    /// Path without the query string, as received
    pub path: String,
    pub query: HashMap<String, String>,
    pub headers: HashMap<String, String>,
    pub payload: Option<Value>,
    pub params: PathParams,
    pub pre: HashMap<String, Value>,
    pub response: Option<Reply>,
    route: Option<String>,
}

impl Request {
    /// Build a request from a method and a url (path plus optional query).
    pub fn new(method: Method, url: &str) -> Self {
        let mut request = Self {
            method,
            path: String::new(),
            query: HashMap::new(),
            headers: HashMap::new(),
            payload: None,
            params: PathParams::new(),
            pre: HashMap::new(),
            response: None,
            route: None,
        };
        request.set_url(url);
        request
    }

    pub fn get(url: &str) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: &str) -> Self {
        Self::new(Method::POST, url)
    }

    /// Replace path and query. Only meaningful before routing (`onRequest`).
    pub fn set_url(&mut self, url: &str) {
        let (path, query) = match url.split_once('?') {
            Some((path, query)) => (path, parse_query_string(query)),
            None => (url, HashMap::new()),
        };
        self.path = path.to_string();
        self.query = query;
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into().to_lowercase(), value.into());
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Get a path parameter by name
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }

    /// Get a query parameter by name
    pub fn query(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    /// Get a header by case-insensitive name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }

    /// Deserialize the payload
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, Error> {
        let payload = self
            .payload
            .clone()
            .ok_or_else(|| Error::BadRequest("Missing payload".to_string()))?;
        serde_json::from_value(payload).map_err(|e| Error::BadRequest(e.to_string()))
    }

    /// Template path of the matched route, once routed.
    pub fn route(&self) -> Option<&str> {
        self.route.as_deref()
    }

    pub(crate) fn set_route(&mut self, path: &str, params: PathParams) {
        self.route = Some(path.to_string());
        self.params = params;
    }
}

/// Parse a query string into a map of decoded parameters.
///
/// Later duplicates win. Undecodable pairs are kept raw.
pub fn parse_query_string(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let (key, value) = part.split_once('=').unwrap_or((part, ""));
            (decode_component(key), decode_component(value))
        })
        .collect()
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|d| d.into_owned())
        .unwrap_or(spaced)
}

/// The outcome of a request.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: StatusCode,
    pub body: Value,
    /// Client cache lifetime, when the handler sets one
    pub ttl: Option<Duration>,
}

impl Reply {
    pub fn new(status: StatusCode, body: Value) -> Self {
        Self {
            status,
            body,
            ttl: None,
        }
    }

    pub fn ok(body: impl Into<Value>) -> Self {
        Self::new(StatusCode::OK, body.into())
    }

    pub fn created(body: impl Into<Value>) -> Self {
        Self::new(StatusCode::CREATED, body.into())
    }

    pub fn no_content() -> Self {
        Self::new(StatusCode::NO_CONTENT, Value::Null)
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Error payload: `{ statusCode, error, message }`.
    pub fn from_error(error: &Error) -> Self {
        let status = error.status_code();
        Self::new(
            status,
            json!({
                "statusCode": status.as_u16(),
                "error": status.canonical_reason().unwrap_or("Unknown"),
                "message": error.to_string(),
            }),
        )
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

impl From<Error> for Reply {
    fn from(error: Error) -> Self {
        Reply::from_error(&error)
    }
}
