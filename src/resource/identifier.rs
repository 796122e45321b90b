//! Canonical resource identifiers.
//!
//! Wire form: `<resourceType>://<loaderType>/<loaderId>/<resourceId>`
//! where `loaderType` is `local` or `remote`. Parsing is total — every
//! malformed string is rejected — and `parse ∘ format` is the identity.

use crate::error::{ErrorCode, GatewayError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoaderType {
    Local,
    Remote,
}

impl LoaderType {
    pub fn as_str(self) -> &'static str {
        match self {
            LoaderType::Local => "local",
            LoaderType::Remote => "remote",
        }
    }
}

impl fmt::Display for LoaderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceIdentifier {
    pub resource_type: String,
    pub loader_type: LoaderType,
    pub loader_id: String,
    pub resource_id: String,
}

fn is_segment_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

fn is_resource_id_char(c: char) -> bool {
    is_segment_char(c) || c == '.'
}

impl ResourceIdentifier {
    pub fn new(
        resource_type: impl Into<String>,
        loader_type: LoaderType,
        loader_id: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        Self {
            resource_type: resource_type.into(),
            loader_type,
            loader_id: loader_id.into(),
            resource_id: resource_id.into(),
        }
    }

    /// Parse the canonical URI form. Rejects anything outside
    /// `^[A-Za-z0-9_-]+://(local|remote)/[A-Za-z0-9_-]+/[A-Za-z0-9_.-]+$`.
    pub fn parse(input: &str) -> Result<Self> {
        let malformed = || {
            GatewayError::new(
                ErrorCode::ResourceInvalidDefinition,
                format!("malformed resource identifier: '{input}'"),
            )
            .with_suggestion("expected <type>://<local|remote>/<loaderId>/<resourceId>")
        };

        let (resource_type, rest) = input.split_once("://").ok_or_else(malformed)?;
        if resource_type.is_empty() || !resource_type.chars().all(is_segment_char) {
            return Err(malformed());
        }

        let mut segments = rest.split('/');
        let loader_type = match segments.next() {
            Some("local") => LoaderType::Local,
            Some("remote") => LoaderType::Remote,
            _ => return Err(malformed()),
        };
        let loader_id = segments.next().ok_or_else(malformed)?;
        let resource_id = segments.next().ok_or_else(malformed)?;
        if segments.next().is_some() {
            return Err(malformed());
        }
        if loader_id.is_empty() || !loader_id.chars().all(is_segment_char) {
            return Err(malformed());
        }
        if resource_id.is_empty() || !resource_id.chars().all(is_resource_id_char) {
            return Err(malformed());
        }

        Ok(Self {
            resource_type: resource_type.to_string(),
            loader_type,
            loader_id: loader_id.to_string(),
            resource_id: resource_id.to_string(),
        })
    }

    /// The canonical string form; `parse(format(x)) == x`.
    pub fn canonical(&self) -> String {
        format!(
            "{}://{}/{}/{}",
            self.resource_type, self.loader_type, self.loader_id, self.resource_id
        )
    }
}

impl fmt::Display for ResourceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

impl FromStr for ResourceIdentifier {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_extracts_all_segments() {
        let id = ResourceIdentifier::parse("host://local/default/web-01").unwrap();
        assert_eq!(id.resource_type, "host");
        assert_eq!(id.loader_type, LoaderType::Local);
        assert_eq!(id.loader_id, "default");
        assert_eq!(id.resource_id, "web-01");
    }

    #[test]
    fn round_trip_is_identity() {
        for s in [
            "host://local/default/web-01",
            "http-api://remote/catalog/billing.v2",
            "ssh-host://local/files_a/db_replica-3",
        ] {
            let parsed = ResourceIdentifier::parse(s).unwrap();
            assert_eq!(parsed.canonical(), s);
            assert_eq!(ResourceIdentifier::parse(&parsed.canonical()).unwrap(), parsed);
        }
    }

    #[test]
    fn malformed_inputs_are_rejected() {
        for s in [
            "",
            "host://",
            "host://local",
            "host://local/default",
            "host://local/default/",
            "host://local/default/a/b",
            "host://ftp/default/web-01",
            "://local/default/web-01",
            "host:/local/default/web-01",
            "host://local/def ault/web-01",
            "host://local/default/web 01",
            "host://local/default/web-01?x=1",
        ] {
            assert!(ResourceIdentifier::parse(s).is_err(), "should reject: {s}");
        }
    }

    #[test]
    fn resource_id_allows_dots_but_loader_id_does_not() {
        assert!(ResourceIdentifier::parse("t://local/a.b/c").is_err());
        assert!(ResourceIdentifier::parse("t://local/ab/c.d").is_ok());
    }
}
