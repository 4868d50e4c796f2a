// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use url::Url;

use shardhost_runtime::error::ConfigurationError;

/// Where the model lives before it is copied into the local cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelLocation {
    /// `s3://bucket/prefix`
    S3 { bucket: String, prefix: String },
    /// `file:///abs/path` or a bare absolute path.
    Local { path: PathBuf },
}

impl ModelLocation {
    /// Form passed to external copy tools: the URI for S3, the plain path otherwise.
    pub fn as_command_arg(&self) -> String {
        match self {
            ModelLocation::S3 { .. } => self.to_string(),
            ModelLocation::Local { path } => path.display().to_string(),
        }
    }

    fn invalid(location: &str, reason: impl Into<String>) -> ConfigurationError {
        ConfigurationError::InvalidLocation {
            location: location.to_string(),
            reason: reason.into(),
        }
    }
}

impl FromStr for ModelLocation {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Self::invalid(s, "location is empty"));
        }

        if s.starts_with('/') {
            return Ok(ModelLocation::Local {
                path: PathBuf::from(s),
            });
        }

        let url = Url::parse(s).map_err(|e| Self::invalid(s, e.to_string()))?;
        match url.scheme() {
            "s3" => {
                let bucket = url
                    .host_str()
                    .filter(|b| !b.is_empty())
                    .ok_or_else(|| Self::invalid(s, "no bucket in S3 URI"))?
                    .to_string();
                let prefix = url.path().trim_matches('/').to_string();
                Ok(ModelLocation::S3 { bucket, prefix })
            }
            "file" => {
                let path = url
                    .to_file_path()
                    .map_err(|_| Self::invalid(s, "file URI must hold an absolute local path"))?;
                Ok(ModelLocation::Local { path })
            }
            other => Err(Self::invalid(
                s,
                format!("unsupported scheme '{other}'; expected s3:// or file://"),
            )),
        }
    }
}

impl fmt::Display for ModelLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelLocation::S3 { bucket, prefix } if prefix.is_empty() => write!(f, "s3://{bucket}"),
            ModelLocation::S3 { bucket, prefix } => write!(f, "s3://{bucket}/{prefix}"),
            ModelLocation::Local { path } => write!(f, "file://{}", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_parse_s3_uri() {
        let location: ModelLocation = "s3://my-bucket/path/to/model/".parse().unwrap();
        assert_eq!(
            location,
            ModelLocation::S3 {
                bucket: "my-bucket".into(),
                prefix: "path/to/model".into()
            }
        );
        assert_eq!(location.to_string(), "s3://my-bucket/path/to/model");
        assert_eq!(location.as_command_arg(), "s3://my-bucket/path/to/model");
    }

    #[test]
    fn test_parse_bucket_root() {
        let location: ModelLocation = "s3://my-bucket".parse().unwrap();
        assert_eq!(location.to_string(), "s3://my-bucket");
    }

    #[rstest]
    #[case("file:///models/tiny", "/models/tiny")]
    #[case("/models/tiny", "/models/tiny")]
    fn test_parse_local(#[case] input: &str, #[case] expected: &str) {
        let location: ModelLocation = input.parse().unwrap();
        assert_eq!(
            location,
            ModelLocation::Local {
                path: PathBuf::from(expected)
            }
        );
        assert_eq!(location.as_command_arg(), expected);
    }

    #[rstest]
    #[case("")]
    #[case("models/tiny")]
    #[case("http://example.com/model")]
    #[case("s3:///no-bucket")]
    fn test_parse_invalid(#[case] input: &str) {
        let err = input.parse::<ModelLocation>().unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidLocation { .. }), "{err}");
    }
}
