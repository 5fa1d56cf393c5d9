//! Blob locators.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

const SCHEME_SEPARATOR: &str = "://";

/// Parsed form of a blob locator such as `minio://uploads/report.pdf`.
///
/// A locator without a scheme is treated as a bare filesystem-style path:
/// only its final component is kept as the key and the bucket is left to the
/// caller's default (see [`StorageLocator::parse_with_default`]).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorageLocator {
    scheme: Option<String>,
    bucket: String,
    key: String,
}

impl StorageLocator {
    /// Creates a locator from its parts.
    pub fn new(
        scheme: impl Into<String>,
        bucket: impl Into<String>,
        key: impl Into<String>,
    ) -> Result<Self> {
        let locator = Self {
            scheme: Some(scheme.into()),
            bucket: bucket.into(),
            key: key.into(),
        };
        locator.validate()?;
        Ok(locator)
    }

    /// Parses a locator, resolving scheme-less paths into `default_bucket`.
    pub fn parse_with_default(input: &str, default_bucket: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(Error::invalid_input().with_message("storage locator is empty"));
        }

        let locator = match input.split_once(SCHEME_SEPARATOR) {
            Some((scheme, rest)) => {
                let (bucket, key) = rest.split_once('/').ok_or_else(|| {
                    Error::invalid_input()
                        .with_message(format!("storage locator '{input}' has no object key"))
                })?;
                Self {
                    scheme: Some(scheme.to_owned()),
                    bucket: bucket.to_owned(),
                    key: key.trim_start_matches('/').to_owned(),
                }
            }
            None => {
                let file_name = input
                    .rsplit(['/', '\\'])
                    .next()
                    .unwrap_or_default()
                    .to_owned();
                Self {
                    scheme: None,
                    bucket: default_bucket.to_owned(),
                    key: file_name,
                }
            }
        };

        locator.validate()?;
        Ok(locator)
    }

    fn validate(&self) -> Result<()> {
        if let Some(scheme) = &self.scheme
            && scheme.is_empty()
        {
            return Err(Error::invalid_input().with_message("storage locator scheme is empty"));
        }
        if self.bucket.is_empty() {
            return Err(Error::invalid_input().with_message("storage locator bucket is empty"));
        }
        match self.file_name() {
            "" | "." | ".." => Err(Error::invalid_input()
                .with_message(format!("storage locator key '{}' is not a file", self.key))),
            _ => Ok(()),
        }
    }

    /// Returns the scheme, if the locator carried one.
    pub fn scheme(&self) -> Option<&str> {
        self.scheme.as_deref()
    }

    /// Returns the bucket name.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Returns the object key within the bucket.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns the last `/`-separated component of the key.
    pub fn file_name(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or_default()
    }
}

impl FromStr for StorageLocator {
    type Err = Error;

    /// Parses a fully qualified `scheme://bucket/key` locator.
    fn from_str(s: &str) -> Result<Self> {
        if !s.contains(SCHEME_SEPARATOR) {
            return Err(Error::invalid_input()
                .with_message(format!("storage locator '{s}' has no scheme")));
        }
        Self::parse_with_default(s, "")
    }
}

impl fmt::Display for StorageLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scheme {
            Some(scheme) => write!(f, "{scheme}{SCHEME_SEPARATOR}{}/{}", self.bucket, self.key),
            None => write!(f, "{}/{}", self.bucket, self.key),
        }
    }
}
