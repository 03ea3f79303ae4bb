//! Upstream request matching.
//!
//! # Responsibilities
//! - Parse path templates (`/users/{id}`, `/files/{*rest}`)
//! - Match request paths and capture placeholder values
//! - Render downstream paths from captured values
//! - Match the Host header (exact, case-insensitive)
//!
//! # Design Decisions
//! - Path matching is case-sensitive
//! - `{name}` binds exactly one segment; `{*name}` binds the remainder and
//!   is only allowed as the last segment
//! - No regex to guarantee O(n) matching
//! - A trailing slash is not significant

use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Values captured from an upstream path, by placeholder name.
pub type Params = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("template {0:?} must start with '/'")]
    NotAbsolute(String),

    #[error("template {template:?}: malformed placeholder {segment:?}")]
    MalformedPlaceholder { template: String, segment: String },

    #[error("template {0:?}: catch-all placeholder must be the last segment")]
    CatchAllNotLast(String),

    #[error("template {template:?}: placeholder {name:?} used twice")]
    DuplicatePlaceholder { template: String, name: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
    CatchAll(String),
}

/// A parsed path template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    raw: String,
    segments: Vec<Segment>,
}

impl PathTemplate {
    pub fn parse(raw: &str) -> Result<Self, TemplateError> {
        if !raw.starts_with('/') {
            return Err(TemplateError::NotAbsolute(raw.to_string()));
        }

        let parts = split_path(raw);
        let mut segments = Vec::with_capacity(parts.len());
        let mut seen: Vec<&str> = Vec::new();

        for (index, part) in parts.iter().enumerate() {
            let segment = if let Some(inner) = part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
                let (name, catch_all) = match inner.strip_prefix('*') {
                    Some(name) => (name, true),
                    None => (inner, false),
                };
                if name.is_empty() || name.contains(['{', '}', '*']) {
                    return Err(TemplateError::MalformedPlaceholder {
                        template: raw.to_string(),
                        segment: part.to_string(),
                    });
                }
                if catch_all && index + 1 != parts.len() {
                    return Err(TemplateError::CatchAllNotLast(raw.to_string()));
                }
                if seen.contains(&name) {
                    return Err(TemplateError::DuplicatePlaceholder {
                        template: raw.to_string(),
                        name: name.to_string(),
                    });
                }
                seen.push(name);
                if catch_all {
                    Segment::CatchAll(name.to_string())
                } else {
                    Segment::Param(name.to_string())
                }
            } else if part.contains(['{', '}']) {
                return Err(TemplateError::MalformedPlaceholder {
                    template: raw.to_string(),
                    segment: part.to_string(),
                });
            } else {
                Segment::Literal(part.to_string())
            };
            segments.push(segment);
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Placeholder names in declaration order.
    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Param(name) | Segment::CatchAll(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Template with placeholder names erased; two templates with the same
    /// shape match exactly the same paths.
    pub fn shape(&self) -> String {
        let mut shape = String::new();
        for segment in &self.segments {
            shape.push('/');
            match segment {
                Segment::Literal(lit) => shape.push_str(lit),
                Segment::Param(_) => shape.push_str("{}"),
                Segment::CatchAll(_) => shape.push_str("{*}"),
            }
        }
        if shape.is_empty() {
            shape.push('/');
        }
        shape
    }

    /// Sort key: more specific templates sort first.
    pub fn specificity(&self) -> (bool, std::cmp::Reverse<usize>, usize) {
        let mut literals = 0;
        let mut params = 0;
        let mut catch_all = false;
        for segment in &self.segments {
            match segment {
                Segment::Literal(_) => literals += 1,
                Segment::Param(_) => params += 1,
                Segment::CatchAll(_) => catch_all = true,
            }
        }
        (catch_all, std::cmp::Reverse(literals), params)
    }

    /// Match a request path, returning captured values.
    pub fn match_path(&self, path: &str) -> Option<Params> {
        let parts = split_path(path);
        let mut params = Params::new();

        for (index, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::CatchAll(name) => {
                    params.insert(name.clone(), parts.get(index..).unwrap_or_default().join("/"));
                    return Some(params);
                }
                Segment::Literal(lit) => {
                    if parts.get(index) != Some(&lit.as_str()) {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    let value = parts.get(index)?;
                    if value.is_empty() {
                        return None;
                    }
                    params.insert(name.clone(), (*value).to_string());
                }
            }
        }

        (parts.len() == self.segments.len()).then_some(params)
    }

    /// Substitute captured values. Unbound placeholders render empty; the
    /// aggregator rejects such templates before they reach a table.
    pub fn render(&self, params: &Params) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            let value = match segment {
                Segment::Literal(lit) => lit.as_str(),
                Segment::Param(name) | Segment::CatchAll(name) => {
                    params.get(name).map(String::as_str).unwrap_or_default()
                }
            };
            if value.is_empty() && matches!(segment, Segment::CatchAll(_)) {
                continue;
            }
            out.push('/');
            out.push_str(value);
        }
        if out.is_empty() {
            out.push('/');
        }
        out
    }
}

impl fmt::Display for PathTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn split_path(path: &str) -> Vec<&str> {
    let trimmed = path.trim_start_matches('/');
    let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);
    if trimmed.is_empty() {
        Vec::new()
    } else {
        trimmed.split('/').collect()
    }
}

/// Matches the Host header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostMatcher {
    expected_host: String,
}

impl HostMatcher {
    /// The host is normalized to lowercase for case-insensitive matching.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            expected_host: host.into().to_lowercase(),
        }
    }

    pub fn host(&self) -> &str {
        &self.expected_host
    }

    /// A port on the request host is ignored unless the expected host names one.
    pub fn matches(&self, host: Option<&str>) -> bool {
        let Some(host) = host else {
            return false;
        };
        let host = host.to_lowercase();
        if self.expected_host.contains(':') {
            host == self.expected_host
        } else {
            host.split(':').next() == Some(self.expected_host.as_str())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_matcher() {
        let matcher = HostMatcher::new("example.com");

        assert!(matcher.matches(Some("example.com")));
        assert!(matcher.matches(Some("EXAMPLE.COM"))); // Case insensitive
        assert!(matcher.matches(Some("example.com:8080")));
        assert!(!matcher.matches(Some("other.com")));
        assert!(!matcher.matches(None));

        let with_port = HostMatcher::new("example.com:8443");
        assert!(!with_port.matches(Some("example.com")));
        assert!(with_port.matches(Some("example.com:8443")));
    }

    #[test]
    fn test_path_template_captures() {
        let template = PathTemplate::parse("/users/{id}/orders/{order}").unwrap();

        let params = template.match_path("/users/42/orders/7").unwrap();
        assert_eq!(params["id"], "42");
        assert_eq!(params["order"], "7");

        assert!(template.match_path("/users/42/orders").is_none());
        assert!(template.match_path("/users/42/orders/7/items").is_none());
        assert!(template.match_path("/accounts/42/orders/7").is_none());
    }

    #[test]
    fn test_catch_all() {
        let template = PathTemplate::parse("/files/{*rest}").unwrap();

        assert_eq!(template.match_path("/files/a/b/c.txt").unwrap()["rest"], "a/b/c.txt");
        assert_eq!(template.match_path("/files").unwrap()["rest"], "");
        assert!(template.match_path("/images/a").is_none());

        let downstream = PathTemplate::parse("/storage/{*rest}").unwrap();
        let mut params = Params::new();
        params.insert("rest".into(), "a/b".into());
        assert_eq!(downstream.render(&params), "/storage/a/b");
        assert_eq!(downstream.render(&Params::new()), "/storage");
    }

    #[test]
    fn test_trailing_slash_and_root() {
        let root = PathTemplate::parse("/").unwrap();
        assert!(root.match_path("/").is_some());
        assert!(root.match_path("/x").is_none());
        assert_eq!(root.shape(), "/");

        let users = PathTemplate::parse("/users").unwrap();
        assert!(users.match_path("/users/").is_some());
    }

    #[test]
    fn test_shape_erases_names() {
        let a = PathTemplate::parse("/users/{id}").unwrap();
        let b = PathTemplate::parse("/users/{uid}").unwrap();
        assert_eq!(a.shape(), b.shape());
        assert_eq!(a.shape(), "/users/{}");
    }

    #[test]
    fn test_specificity_orders_literals_first() {
        let literal = PathTemplate::parse("/users/me").unwrap();
        let param = PathTemplate::parse("/users/{id}").unwrap();
        let catch_all = PathTemplate::parse("/{*rest}").unwrap();
        assert!(literal.specificity() < param.specificity());
        assert!(param.specificity() < catch_all.specificity());
    }

    #[test]
    fn test_invalid_templates() {
        assert!(matches!(PathTemplate::parse("users"), Err(TemplateError::NotAbsolute(_))));
        assert!(matches!(
            PathTemplate::parse("/a/{*rest}/b"),
            Err(TemplateError::CatchAllNotLast(_))
        ));
        assert!(matches!(
            PathTemplate::parse("/a/{id}/{id}"),
            Err(TemplateError::DuplicatePlaceholder { .. })
        ));
        assert!(matches!(
            PathTemplate::parse("/a/x{id}"),
            Err(TemplateError::MalformedPlaceholder { .. })
        ));
        assert!(matches!(
            PathTemplate::parse("/a/{}"),
            Err(TemplateError::MalformedPlaceholder { .. })
        ));
    }
}
