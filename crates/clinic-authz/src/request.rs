//! Request normalization.
//!
//! Turns a raw method/path pair into a [`RequestDescriptor`]: the path is
//! split on `/` with empty segments removed and the method is upper-cased.
//!
//! [`RequestDescriptor::new`] and [`RequestDescriptor::normalize`] take an
//! already decoded path. [`RequestDescriptor::from_encoded`] takes the path as
//! it appears on the wire and percent-decodes each segment after splitting,
//! so an encoded `%2F` stays inside its segment. Segment values then match
//! what axum's `Path` extractor hands to the handler.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// HTTP methods a rule can grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    /// All supported methods.
    pub const ALL: [Method; 5] = [
        Method::Get,
        Method::Post,
        Method::Put,
        Method::Patch,
        Method::Delete,
    ];

    /// Upper-case wire name of the method.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A method that no rule can ever grant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unsupported method: {0}")]
pub struct UnsupportedMethod(pub String);

impl FromStr for Method {
    type Err = UnsupportedMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            _ => Err(UnsupportedMethod(s.to_string())),
        }
    }
}

impl TryFrom<&axum::http::Method> for Method {
    type Error = UnsupportedMethod;

    fn try_from(method: &axum::http::Method) -> Result<Self, Self::Error> {
        method.as_str().parse()
    }
}

/// Canonical form of an inbound request as seen by the evaluator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
    /// Non-empty path segments, in order.
    pub segments: Vec<String>,
    /// Request method.
    pub method: Method,
}

impl RequestDescriptor {
    /// Builds a descriptor from an already parsed method.
    #[must_use]
    pub fn new(method: Method, path: &str) -> Self {
        Self {
            segments: split_path(path),
            method,
        }
    }

    /// Builds a descriptor from a percent-encoded request path.
    #[must_use]
    pub fn from_encoded(method: Method, path: &str) -> Self {
        Self {
            segments: split_path(path)
                .iter()
                .map(|s| decode_segment(s))
                .collect(),
            method,
        }
    }

    /// Normalizes a raw method and path.
    ///
    /// Fails only when the method is outside the supported set; any path is
    /// accepted, since an unroutable path simply matches no rule.
    pub fn normalize(method: &str, path: &str) -> Result<Self, UnsupportedMethod> {
        Ok(Self::new(method.parse()?, path))
    }

    /// Number of path segments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Returns `true` for the root path.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

impl fmt::Display for RequestDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} /{}", self.method, self.segments.join("/"))
    }
}

/// Splits a path into its non-empty segments, ignoring any query string.
fn split_path(path: &str) -> Vec<String> {
    let path = path.split_once('?').map_or(path, |(p, _)| p);
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Invalid UTF-8 is replaced rather than rejected; such a segment can only
/// match a wildcard, and the handler's extractor refuses it anyway.
fn decode_segment(segment: &str) -> String {
    String::from_utf8_lossy(&urlencoding::decode_binary(segment.as_bytes())).into_owned()
}
