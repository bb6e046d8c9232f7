use crate::error::{ServerError, ServerResult};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    /// `:name`; matches any single non-empty segment.
    Capture(String),
}

/// A registered path template, split on `/`.
///
/// Matching is structural: the segment counts must agree and every literal
/// must equal its counterpart byte for byte. No case folding and no
/// trailing-slash normalization, so `/users` and `/users/` are different
/// patterns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePattern {
    raw: String,
    segments: Vec<Segment>,
}

impl RoutePattern {
    pub fn parse(pattern: &str) -> ServerResult<Self> {
        if pattern.is_empty() {
            return Err(ServerError::InvalidRoute("pattern must not be empty".to_string()));
        }

        let segments = pattern
            .split('/')
            .map(|segment| match segment.strip_prefix(':') {
                Some(name) => Segment::Capture(name.to_string()),
                None => Segment::Literal(segment.to_string()),
            })
            .collect();

        Ok(Self {
            raw: pattern.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Matches already-split path segments, returning the captured variables.
    pub fn matches(&self, path: &[&str]) -> Option<HashMap<String, String>> {
        if self.segments.len() != path.len() {
            return None;
        }

        let mut vars = HashMap::new();
        for (segment, value) in self.segments.iter().zip(path) {
            match segment {
                Segment::Literal(literal) if literal != value => return None,
                Segment::Literal(_) => {}
                Segment::Capture(_) if value.is_empty() => return None,
                Segment::Capture(name) => {
                    vars.insert(name.clone(), value.to_string());
                }
            }
        }
        Some(vars)
    }
}
