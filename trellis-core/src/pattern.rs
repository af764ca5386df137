//! Path template compiler.
//!
//! A template is a `/`-separated list of segments, each either a literal or a
//! whole-segment parameter:
//!
//! | Segment     | Matches                                   |
//! |-------------|-------------------------------------------|
//! | `users`     | the literal text (percent-escapes allowed) |
//! | `{id}`      | exactly one non-empty segment             |
//! | `{id?}`     | one segment or nothing; last segment only |
//! | `{path*}`   | one or more segments; last segment only   |
//! | `{path*3}`  | exactly three segments                    |
//!
//! Compiling yields a [`PathPattern`] that matches request paths and carries
//! a fingerprint: the template with parameter names erased, used to detect
//! routes of the same shape.

use crate::config::RouterConfig;
use crate::params::PathParams;
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;
use thiserror::Error;

static PARAM_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\{([A-Za-z0-9_]+)(?:(\?)|\*([1-9][0-9]*)?)?\}$").unwrap());

/// One template segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal {
        /// As written in the template
        raw: String,
        decoded: String,
        /// `decoded`, lower-cased for case-insensitive routers
        folded: String,
    },
    Param {
        name: String,
        optional: bool,
    },
    /// `count` of `None` means one or more segments.
    Multi { name: String, count: Option<usize> },
}

impl Segment {
    fn fingerprint(&self, case_sensitive: bool) -> String {
        match self {
            // re-encoded so that `%41` and `A` share a shape
            Segment::Literal { decoded, folded, .. } => {
                let text = if case_sensitive { decoded } else { folded };
                urlencoding::encode(text).into_owned()
            }
            Segment::Param { .. } => "?".to_string(),
            Segment::Multi { count: Some(n), .. } => vec!["?"; *n].join("/"),
            Segment::Multi { count: None, .. } => "?*".to_string(),
        }
    }
}

/// Template compile failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid path: {path} ({reason})")]
pub struct PatternError {
    pub path: String,
    pub reason: String,
}

/// A compiled path template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    path: String,
    segments: Vec<Segment>,
    fingerprint: String,
    folded_fingerprint: String,
}

impl PathPattern {
    /// Compile a template.
    pub fn parse(path: &str) -> Result<Self, PatternError> {
        let fail = |reason: &str| PatternError {
            path: path.to_string(),
            reason: reason.to_string(),
        };

        let rest = path
            .strip_prefix('/')
            .ok_or_else(|| fail("must begin with '/'"))?;

        let raw: Vec<&str> = rest.split('/').collect();
        let last = raw.len() - 1;
        let mut segments = Vec::with_capacity(raw.len());
        let mut names = HashSet::new();
        let mut has_multi = false;

        for (i, text) in raw.iter().enumerate() {
            if text.is_empty() {
                if i != last {
                    return Err(fail("empty segment"));
                }
                // trailing slash, or the root path
                segments.push(literal(""));
                continue;
            }

            if text.starts_with('{') {
                let caps = PARAM_SEGMENT
                    .captures(text)
                    .ok_or_else(|| fail(&format!("malformed parameter segment '{}'", text)))?;
                let name = caps[1].to_string();
                if !names.insert(name.clone()) {
                    return Err(fail(&format!("duplicate parameter '{}'", name)));
                }

                let segment = if caps.get(2).is_some() {
                    if i != last {
                        return Err(fail("optional parameter must be the last segment"));
                    }
                    Segment::Param {
                        name,
                        optional: true,
                    }
                } else if text.contains('*') {
                    if has_multi {
                        return Err(fail("only one multi-segment parameter is allowed"));
                    }
                    has_multi = true;
                    let count = match caps.get(3) {
                        Some(m) => Some(
                            m.as_str()
                                .parse::<usize>()
                                .map_err(|_| fail("multi-segment count is too large"))?,
                        ),
                        None => None,
                    };
                    if count.is_none() && i != last {
                        return Err(fail("unbounded multi-segment parameter must be the last segment"));
                    }
                    Segment::Multi { name, count }
                } else {
                    Segment::Param {
                        name,
                        optional: false,
                    }
                };
                segments.push(segment);
                continue;
            }

            if !is_literal(text) {
                return Err(fail(&format!("invalid literal segment '{}'", text)));
            }
            segments.push(literal(text));
        }

        let fingerprint = |case_sensitive| {
            let parts: Vec<String> = segments.iter().map(|s| s.fingerprint(case_sensitive)).collect();
            format!("/{}", parts.join("/"))
        };
        let (fingerprint, folded_fingerprint) = (fingerprint(true), fingerprint(false));

        Ok(Self {
            path: path.to_string(),
            segments,
            fingerprint,
            folded_fingerprint,
        })
    }

    /// The template as written.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// The template with parameter names erased and literals in canonical
    /// percent-encoded form.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// [`fingerprint`](Self::fingerprint) with literals lower-cased, for
    /// case-insensitive routers.
    pub fn folded_fingerprint(&self) -> &str {
        &self.folded_fingerprint
    }

    /// Names of every parameter, in template order.
    pub fn param_names(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Param { name, .. } | Segment::Multi { name, .. } => Some(name.as_str()),
            Segment::Literal { .. } => None,
        })
    }

    /// Match a request path, returning the captured parameters.
    ///
    /// Malformed percent-escapes make the path a non-match.
    pub fn match_path(&self, path: &str, config: &RouterConfig) -> Option<PathParams> {
        let rest = path.strip_prefix('/')?;
        let sensitive = config.trailing_slash_sensitive;

        let raw: Vec<&str> = if sensitive {
            rest.split('/').collect()
        } else {
            match rest.strip_suffix('/').unwrap_or(rest) {
                "" => Vec::new(),
                trimmed => trimmed.split('/').collect(),
            }
        };
        let input = raw
            .into_iter()
            .map(decode_segment)
            .collect::<Option<Vec<String>>>()?;

        let mut pattern = self.segments.as_slice();
        if !sensitive {
            if let Some((Segment::Literal { raw, .. }, init)) = pattern.split_last() {
                if raw.is_empty() {
                    pattern = init;
                }
            }
        }

        let mut params = PathParams::new();
        let mut pos = 0;
        for segment in pattern {
            match segment {
                Segment::Literal {
                    decoded, folded, ..
                } => {
                    let text = input.get(pos)?;
                    let equal = if config.case_sensitive {
                        text == decoded
                    } else {
                        text.to_lowercase() == *folded
                    };
                    if !equal {
                        return None;
                    }
                    pos += 1;
                }
                Segment::Param { name, optional } => match input.get(pos) {
                    Some(text) if !text.is_empty() => {
                        params.push(name, Some(text.clone()));
                        pos += 1;
                    }
                    Some(_) if *optional => {
                        params.push(name, None);
                        pos += 1;
                    }
                    None if *optional && !sensitive => params.push(name, None),
                    _ => return None,
                },
                Segment::Multi { name, count } => {
                    let available = input.len().checked_sub(pos)?;
                    let take = count.unwrap_or(available);
                    if take == 0 || take > available {
                        return None;
                    }
                    let run = &input[pos..pos + take];
                    if run.iter().any(String::is_empty) {
                        return None;
                    }
                    params.push(name, Some(run.join("/")));
                    pos += take;
                }
            }
        }

        (pos == input.len()).then_some(params)
    }

    /// Whether `path` matches, without capturing.
    pub fn is_match(&self, path: &str, config: &RouterConfig) -> bool {
        self.match_path(path, config).is_some()
    }
}

fn literal(raw: &str) -> Segment {
    let decoded = urlencoding::decode(raw)
        .map(|d| d.into_owned())
        .unwrap_or_else(|_| raw.to_string());
    Segment::Literal {
        raw: raw.to_string(),
        folded: decoded.to_lowercase(),
        decoded,
    }
}

/// Unreserved characters, sub-delims, `:`, `@` and well-formed percent-escapes.
fn is_literal(text: &str) -> bool {
    valid_escapes(text)
        && text.chars().all(|c| {
            c.is_ascii_alphanumeric() || "-._~!$&'()*+,;=:@%".contains(c)
        })
}

fn valid_escapes(text: &str) -> bool {
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = bytes.get(i + 1..i + 3);
            if !hex.is_some_and(|h| h.iter().all(u8::is_ascii_hexdigit)) {
                return false;
            }
            i += 3;
        } else {
            i += 1;
        }
    }
    true
}

fn decode_segment(raw: &str) -> Option<String> {
    if !valid_escapes(raw) {
        return None;
    }
    urlencoding::decode(raw).ok().map(|d| d.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(trailing_slash_sensitive: bool, case_sensitive: bool) -> RouterConfig {
        RouterConfig {
            case_sensitive,
            trailing_slash_sensitive,
        }
    }

    #[test]
    fn test_validation() {
        let cases = [
            ("/", true),
            ("/path", true),
            ("/path/", true),
            ("/path/to/somewhere", true),
            ("/{param}", true),
            ("/{param?}", true),
            ("/{param*}", true),
            ("/{param*5}", true),
            ("/path/{param}", true),
            ("/path/{param}/to", true),
            ("/path/{param?}", true),
            ("/path/{param}/to/{some}", true),
            ("/path/{param}/to/{some?}", true),
            ("/path/{param*2}/to", true),
            ("/path/{param*27}/to", true),
            ("/path/{param*2}", true),
            ("/path/{param*27}", true),
            ("/%20path/", true),
            ("path", false),
            ("/%path/", false),
            ("/path/{param*}/to", false),
            ("/path/{param*0}/to", false),
            ("/path/{param*0}", false),
            ("/path/{param*01}/to", false),
            ("/path/{param*01}", false),
            ("/{param?}/something", false),
            ("/{param*03}", false),
            ("/{param*3?}", false),
            ("/{param*?}", false),
            ("/{param*}/", false),
            ("/{}", false),
            ("/{a-b}", false),
            ("/{a}/{a}", false),
            ("/{a*2}/{b*}", false),
            ("/path//to", false),
            ("/pre{param}", false),
        ];

        for (path, valid) in cases {
            assert_eq!(PathPattern::parse(path).is_ok(), valid, "{}", path);
        }
    }

    #[test]
    fn test_fingerprints() {
        let cases = [
            ("/", "/"),
            ("/path", "/path"),
            ("/path/", "/path/"),
            ("/path/to/somewhere", "/path/to/somewhere"),
            ("/{param}", "/?"),
            ("/{param?}", "/?"),
            ("/{param*}", "/?*"),
            ("/{param*5}", "/?/?/?/?/?"),
            ("/path/{param}", "/path/?"),
            ("/path/{param}/to", "/path/?/to"),
            ("/path/{param?}", "/path/?"),
            ("/path/{param}/to/{some}", "/path/?/to/?"),
            ("/path/{param}/to/{some?}", "/path/?/to/?"),
            ("/path/{param*2}/to", "/path/?/?/to"),
            ("/path/{param*10}/to", "/path/?/?/?/?/?/?/?/?/?/?/to"),
            ("/path/{param*2}", "/path/?/?"),
            ("/%20path/", "/%20path/"),
        ];

        for (path, fingerprint) in cases {
            assert_eq!(PathPattern::parse(path).unwrap().fingerprint(), fingerprint, "{}", path);
        }
    }

    #[test]
    fn test_fingerprint_canonical_literals() {
        let escaped = PathPattern::parse("/%41/%7euser").unwrap();
        let plain = PathPattern::parse("/A/~user").unwrap();
        assert_eq!(escaped.fingerprint(), plain.fingerprint());
        assert_eq!(plain.fingerprint(), "/A/~user");

        let upper = PathPattern::parse("/%C3%9Cber/{x}").unwrap();
        let lower = PathPattern::parse("/%c3%bcber/{y}").unwrap();
        assert_ne!(upper.fingerprint(), lower.fingerprint());
        assert_eq!(upper.folded_fingerprint(), lower.folded_fingerprint());
    }

    #[test]
    fn test_fingerprint_ignores_names() {
        let a = PathPattern::parse("/users/{id}/posts/{post?}").unwrap();
        let b = PathPattern::parse("/users/{user}/posts/{p?}").unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_trailing_slash_and_case() {
        let pattern = PathPattern::parse("/path/to/").unwrap();
        let expect = |cfg: RouterConfig, cases: [(&str, bool); 4]| {
            for (path, matched) in cases {
                assert_eq!(pattern.is_match(path, &cfg), matched, "{} {:?}", path, cfg);
            }
        };

        expect(
            config(false, true),
            [("/path/to", true), ("/Path/to", false), ("/path/to/", true), ("/Path/to/", false)],
        );
        expect(
            config(false, false),
            [("/path/to", true), ("/Path/to", true), ("/path/to/", true), ("/Path/to/", true)],
        );
        expect(
            config(true, false),
            [("/path/to", false), ("/Path/to", false), ("/path/to/", true), ("/Path/to/", true)],
        );
        expect(
            config(true, true),
            [("/path/to", false), ("/Path/to", false), ("/path/to/", true), ("/Path/to/", false)],
        );
    }

    #[test]
    fn test_counted_multi_param() {
        let pattern = PathPattern::parse("/path/{param*2}/to").unwrap();
        let cfg = RouterConfig::default();
        assert!(pattern.match_path("/a/b/c/d", &cfg).is_none());
        let params = pattern.match_path("/path/a/b/to", &cfg).unwrap();
        assert_eq!(params.get("param"), Some("a/b"));
        assert!(pattern.match_path("/path/a/to", &cfg).is_none());
    }

    #[test]
    fn test_unbounded_multi_param() {
        let pattern = PathPattern::parse("/files/{path*}").unwrap();
        let cfg = RouterConfig::default();
        assert_eq!(
            pattern.match_path("/files/a/b/c.txt", &cfg).unwrap().get("path"),
            Some("a/b/c.txt")
        );
        assert_eq!(pattern.match_path("/files/a", &cfg).unwrap().get("path"), Some("a"));
        assert!(pattern.match_path("/files", &cfg).is_none());
        assert!(pattern.match_path("/files/a//b", &cfg).is_none());
    }

    #[test]
    fn test_optional_param() {
        let pattern = PathPattern::parse("/path/{p1}/{p2?}").unwrap();
        let cfg = RouterConfig::default();

        assert!(pattern.match_path("/path/a/c/d", &cfg).is_none());
        assert!(pattern.match_path("/Path/a/c/d", &cfg).is_none());

        let params = pattern.match_path("/path/a/b", &cfg).unwrap();
        assert_eq!(params.get("p1"), Some("a"));
        assert_eq!(params.get("p2"), Some("b"));

        for path in ["/path/a", "/path/a/"] {
            let params = pattern.match_path(path, &cfg).unwrap();
            assert_eq!(params.get("p1"), Some("a"));
            assert_eq!(params.get("p2"), None);
            assert!(params.contains("p2"));
        }
    }

    #[test]
    fn test_optional_param_trailing_slash_sensitive() {
        let pattern = PathPattern::parse("/path/{p1}/{p2?}").unwrap();
        let cfg = config(true, false);

        assert!(pattern.match_path("/path/a/c/d", &cfg).is_none());
        let params = pattern.match_path("/Path/a/c", &cfg).unwrap();
        assert_eq!(params.get("p1"), Some("a"));
        assert_eq!(params.get("p2"), Some("c"));
        assert!(pattern.match_path("/path/a", &cfg).is_none());
        let params = pattern.match_path("/path/a/", &cfg).unwrap();
        assert_eq!(params.get("p2"), None);
    }

    #[test]
    fn test_root() {
        let pattern = PathPattern::parse("/").unwrap();
        let cfg = RouterConfig::default();
        assert!(pattern.is_match("/", &cfg));
        assert!(!pattern.is_match("/a", &cfg));
        assert!(!pattern.is_match("", &cfg));
        assert!(pattern.is_match("/", &config(true, true)));
    }

    #[test]
    fn test_decoding() {
        let cfg = RouterConfig::default();
        let pattern = PathPattern::parse("/{test}").unwrap();
        assert!(pattern.match_path("/test%l", &cfg).is_none());
        assert!(pattern.match_path("/%E0%A4%A", &cfg).is_none());
        assert_eq!(pattern.match_path("/a%20b", &cfg).unwrap().get("test"), Some("a b"));

        let literal = PathPattern::parse("/%20path/").unwrap();
        assert!(literal.is_match("/%20path", &cfg));
        assert!(literal.is_match("/ path/", &cfg));
    }

    #[test]
    fn test_case_insensitive_keeps_param_case() {
        let pattern = PathPattern::parse("/Users/{name}").unwrap();
        let params = pattern.match_path("/users/Alice", &config(false, false)).unwrap();
        assert_eq!(params.get("name"), Some("Alice"));
    }
}
