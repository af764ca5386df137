//! Registration options for server methods.

use crate::error::RegistrationError;
use crate::method::Bind;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Derives a cache key from call arguments. `None` means the call cannot be cached.
pub type KeyGenerator = Arc<dyn Fn(&[Value]) -> Option<String> + Send + Sync>;

/// Options accepted by [`MethodRegistry::register`](crate::MethodRegistry::register).
#[derive(Clone, Default)]
pub struct MethodOptions {
    /// Object the method executes against, shared by every call.
    pub bind: Option<Bind>,
    /// Result caching; absent means every call runs the method.
    pub cache: Option<CachePolicy>,
    /// Custom cache key derivation, replaces [`default_key`].
    pub generate_key: Option<KeyGenerator>,
}

impl MethodOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind<T: std::any::Any + Send + Sync>(mut self, context: Arc<T>) -> Self {
        self.bind = Some(context);
        self
    }

    pub fn cache(mut self, policy: CachePolicy) -> Self {
        self.cache = Some(policy);
        self
    }

    pub fn generate_key<F>(mut self, f: F) -> Self
    where
        F: Fn(&[Value]) -> Option<String> + Send + Sync + 'static,
    {
        self.generate_key = Some(Arc::new(f));
        self
    }
}

impl std::fmt::Debug for MethodOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodOptions")
            .field("bind", &self.bind.is_some())
            .field("cache", &self.cache)
            .field("generate_key", &self.generate_key.is_some())
            .finish()
    }
}

/// How long a generation may run before waiting callers give up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawTimeout", into = "RawTimeout")]
pub enum GenerateTimeout {
    After(Duration),
    /// Callers wait for as long as generation takes.
    Disabled,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawTimeout {
    Millis(u64),
    Flag(bool),
}

impl TryFrom<RawTimeout> for GenerateTimeout {
    type Error = String;

    fn try_from(raw: RawTimeout) -> Result<Self, Self::Error> {
        match raw {
            RawTimeout::Millis(0) => Err("generate_timeout must be greater than zero".into()),
            RawTimeout::Millis(ms) => Ok(GenerateTimeout::After(Duration::from_millis(ms))),
            RawTimeout::Flag(false) => Ok(GenerateTimeout::Disabled),
            RawTimeout::Flag(true) => {
                Err("generate_timeout must be a number of milliseconds or false".into())
            }
        }
    }
}

impl From<GenerateTimeout> for RawTimeout {
    fn from(timeout: GenerateTimeout) -> Self {
        match timeout {
            GenerateTimeout::After(d) => RawTimeout::Millis(d.as_millis() as u64),
            GenerateTimeout::Disabled => RawTimeout::Flag(false),
        }
    }
}

/// Cache policy of a server method. Durations are milliseconds in config files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CachePolicy {
    /// Lifetime of a stored value. Without it nothing is stored.
    #[serde(default, with = "millis")]
    pub expires_in: Option<Duration>,
    /// Required whenever caching is configured.
    #[serde(default)]
    pub generate_timeout: Option<GenerateTimeout>,
    /// Age after which a stored value is regenerated on access.
    #[serde(default, with = "millis")]
    pub stale_in: Option<Duration>,
    /// How long a stale read waits for regeneration before serving the stale value.
    #[serde(default, with = "millis")]
    pub stale_timeout: Option<Duration>,
}

impl CachePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expires_in(mut self, ttl: Duration) -> Self {
        self.expires_in = Some(ttl);
        self
    }

    pub fn generate_timeout(mut self, timeout: Duration) -> Self {
        self.generate_timeout = Some(GenerateTimeout::After(timeout));
        self
    }

    pub fn no_generate_timeout(mut self) -> Self {
        self.generate_timeout = Some(GenerateTimeout::Disabled);
        self
    }

    pub fn stale(mut self, stale_in: Duration, stale_timeout: Duration) -> Self {
        self.stale_in = Some(stale_in);
        self.stale_timeout = Some(stale_timeout);
        self
    }

    /// Check the policy for the method `name`, returning its generation timeout.
    pub(crate) fn validate(&self, name: &str) -> Result<GenerateTimeout, RegistrationError> {
        let invalid = |reason: &str| RegistrationError::InvalidCachePolicy {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        let timeout = self
            .generate_timeout
            .ok_or_else(|| RegistrationError::MissingGenerateTimeout(name.to_string()))?;

        if timeout == GenerateTimeout::After(Duration::ZERO) {
            return Err(invalid("generate_timeout must be greater than zero"));
        }

        match (self.stale_in, self.stale_timeout) {
            (None, None) => {}
            (Some(stale_in), Some(stale_timeout)) => {
                let expires_in = self
                    .expires_in
                    .ok_or_else(|| invalid("stale_in requires expires_in"))?;
                if stale_in >= expires_in {
                    return Err(invalid("stale_in must be less than expires_in"));
                }
                if stale_timeout >= expires_in {
                    return Err(invalid("stale_timeout must be less than expires_in"));
                }
            }
            _ => return Err(invalid("stale_in and stale_timeout must be set together")),
        }

        Ok(timeout)
    }
}

/// Default key derivation.
///
/// Strings, numbers and booleans are URI-component-encoded and joined with
/// `:`. Any other argument makes the call uncacheable. No arguments give the
/// empty key.
pub fn default_key(args: &[Value]) -> Option<String> {
    let mut parts = Vec::with_capacity(args.len());
    for arg in args {
        let part = match arg {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            _ => return None,
        };
        parts.push(urlencoding::encode(&part).into_owned());
    }
    Some(parts.join(":"))
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_key() {
        assert_eq!(default_key(&[json!(1), json!("a b"), json!(true)]), Some("1:a%20b:true".into()));
        assert_eq!(default_key(&[]), Some(String::new()));
        assert_eq!(default_key(&[json!(1), json!({"x": 1})]), None);
        assert_eq!(default_key(&[Value::Null]), None);
    }

    #[test]
    fn test_missing_generate_timeout() {
        let err = CachePolicy::new().validate("test").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Method caching requires a timeout value in generateTimeout: test"
        );
    }

    #[test]
    fn test_generate_timeout_false() {
        let policy: CachePolicy = serde_json::from_value(json!({ "generate_timeout": false })).unwrap();
        assert_eq!(policy.validate("test").unwrap(), GenerateTimeout::Disabled);

        let policy: CachePolicy =
            serde_json::from_value(json!({ "expires_in": 1000, "generate_timeout": 10 })).unwrap();
        assert_eq!(policy.expires_in, Some(Duration::from_millis(1000)));
        assert_eq!(
            policy.validate("test").unwrap(),
            GenerateTimeout::After(Duration::from_millis(10))
        );

        assert!(serde_json::from_value::<CachePolicy>(json!({ "generate_timeout": true })).is_err());
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let result = serde_json::from_value::<CachePolicy>(json!({ "x": "y", "generate_timeout": 10 }));
        assert!(result.is_err());
    }

    #[test]
    fn test_stale_rules() {
        let base = CachePolicy::new()
            .expires_in(Duration::from_secs(1))
            .generate_timeout(Duration::from_millis(10));

        assert!(base
            .clone()
            .stale(Duration::from_millis(500), Duration::from_millis(5))
            .validate("m")
            .is_ok());

        let mut half = base.clone();
        half.stale_in = Some(Duration::from_millis(500));
        assert!(matches!(
            half.validate("m"),
            Err(RegistrationError::InvalidCachePolicy { .. })
        ));

        assert!(base
            .clone()
            .stale(Duration::from_secs(2), Duration::from_millis(5))
            .validate("m")
            .is_err());

        let no_expiry = CachePolicy::new()
            .generate_timeout(Duration::from_millis(10))
            .stale(Duration::from_millis(5), Duration::from_millis(5));
        assert!(no_expiry.validate("m").is_err());
    }
}
