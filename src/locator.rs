//! Source and destination locators
//!
//! Parses the two positional arguments of the CLI:
//! - `sftp://[user[:password]@]host[:port][/dir]`
//! - `gs://bucket[/dir]` or `s3://bucket[/dir]`

use std::fmt;
use std::str::FromStr;

use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Default SSH port
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Locator parse errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LocatorError {
    #[error("scheme must be sftp (was {0:?})")]
    NotSftp(String),

    #[error("invalid scheme: {0}")]
    UnsupportedScheme(String),

    #[error("invalid {0} URL")]
    Opaque(&'static str),

    #[error("invalid URL: {0}")]
    Parse(String),

    #[error("username cannot be empty")]
    EmptyUsername,

    #[error("password cannot be empty")]
    EmptyPassword,

    #[error("hostname cannot be empty")]
    EmptyHostname,

    #[error("invalid port: {0:?}")]
    InvalidPort(String),

    #[error("port out of range: {0}")]
    PortOutOfRange(i64),

    #[error("username/password cannot be provided for cloud storage")]
    CredentialsNotAllowed,

    #[error("bucket cannot contain :")]
    BucketContainsColon,

    #[error("bucket cannot be empty")]
    EmptyBucket,

    #[error("query must be empty")]
    QueryNotEmpty,

    #[error("fragment must be empty")]
    FragmentNotEmpty,

    #[error("invalid percent-encoding in {0}")]
    InvalidEncoding(&'static str),
}

/// Parsed `sftp://` source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SftpLocator {
    pub username: Option<String>,
    pub password: Option<String>,
    pub hostname: String,
    pub port: u16,
    /// Remote directory to mirror
    pub path: String,
}

impl SftpLocator {
    pub fn parse(input: &str) -> Result<Self, LocatorError> {
        let scheme = scheme_of(input);
        if scheme != "sftp" {
            return Err(LocatorError::NotSftp(scheme));
        }
        let authority = authority_of(input).ok_or(LocatorError::Opaque("sftp"))?;
        let (userinfo, host_port) = split_userinfo(authority);

        let mut username = None;
        let mut password = None;
        if let Some(userinfo) = userinfo {
            let (user, pass) = match userinfo.split_once(':') {
                Some((user, pass)) => (user, Some(pass)),
                None => (userinfo, None),
            };
            if user.is_empty() {
                return Err(LocatorError::EmptyUsername);
            }
            username = Some(decode(user, "username")?);
            if let Some(pass) = pass {
                if pass.is_empty() {
                    return Err(LocatorError::EmptyPassword);
                }
                password = Some(decode(pass, "password")?);
            }
        }

        let (hostname, port_text) = split_port(host_port);
        let port = match port_text {
            Some(text) => parse_port(text)?,
            None => DEFAULT_SSH_PORT,
        };
        if hostname.is_empty() {
            return Err(LocatorError::EmptyHostname);
        }

        let url = Url::parse(input).map_err(|e| LocatorError::Parse(e.to_string()))?;
        check_no_query_or_fragment(&url)?;

        Ok(Self {
            username,
            password,
            hostname: hostname.to_string(),
            port,
            path: path_of(&url)?,
        })
    }

    /// `host:port` address for the TCP connection
    pub fn address(&self) -> String {
        if self.hostname.contains(':') {
            format!("[{}]:{}", self.hostname, self.port)
        } else {
            format!("{}:{}", self.hostname, self.port)
        }
    }
}

impl FromStr for SftpLocator {
    type Err = LocatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for SftpLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sftp://")?;
        if let Some(user) = &self.username {
            write!(f, "{}", user)?;
            if self.password.is_some() {
                write!(f, ":***")?;
            }
            write!(f, "@")?;
        }
        write!(f, "{}:{}{}", self.hostname, self.port, self.path)
    }
}

/// Cloud storage provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Gcs,
    S3,
}

impl Provider {
    pub fn scheme(&self) -> &'static str {
        match self {
            Provider::Gcs => "gs",
            Provider::S3 => "s3",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scheme())
    }
}

/// Parsed `gs://` or `s3://` destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketLocator {
    pub provider: Provider,
    pub bucket: String,
    /// Key prefix inside the bucket, as a rooted path
    pub path: String,
}

impl BucketLocator {
    pub fn parse(input: &str) -> Result<Self, LocatorError> {
        let provider = match scheme_of(input).as_str() {
            "gs" => Provider::Gcs,
            "s3" => Provider::S3,
            other => return Err(LocatorError::UnsupportedScheme(other.to_string())),
        };
        let authority = authority_of(input).ok_or(LocatorError::Opaque("cloud storage"))?;
        let (userinfo, bucket) = split_userinfo(authority);
        if userinfo.is_some() {
            return Err(LocatorError::CredentialsNotAllowed);
        }
        if bucket.contains(':') {
            return Err(LocatorError::BucketContainsColon);
        }
        if bucket.is_empty() {
            return Err(LocatorError::EmptyBucket);
        }

        let url = Url::parse(input).map_err(|e| LocatorError::Parse(e.to_string()))?;
        check_no_query_or_fragment(&url)?;

        Ok(Self {
            provider,
            bucket: bucket.to_string(),
            path: path_of(&url)?,
        })
    }
}

impl FromStr for BucketLocator {
    type Err = LocatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for BucketLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}{}", self.provider, self.bucket, self.path)
    }
}

fn scheme_of(input: &str) -> String {
    match input.split_once(':') {
        Some((scheme, _)) if !scheme.contains('/') => scheme.to_ascii_lowercase(),
        _ => String::new(),
    }
}

/// Raw `userinfo@host:port` section, or None for opaque locators
fn authority_of(input: &str) -> Option<&str> {
    let (_, rest) = input.split_once(':')?;
    let rest = rest.strip_prefix("//")?;
    let end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    Some(&rest[..end])
}

fn split_userinfo(authority: &str) -> (Option<&str>, &str) {
    match authority.rsplit_once('@') {
        Some((userinfo, host)) => (Some(userinfo), host),
        None => (None, authority),
    }
}

fn split_port(host_port: &str) -> (&str, Option<&str>) {
    if let Some(rest) = host_port.strip_prefix('[') {
        // [v6]:port
        return match rest.split_once(']') {
            Some((host, tail)) => (host, tail.strip_prefix(':')),
            None => (host_port, None),
        };
    }
    match host_port.split_once(':') {
        Some((host, port)) => (host, Some(port)),
        None => (host_port, None),
    }
}

fn parse_port(text: &str) -> Result<u16, LocatorError> {
    let port: i64 = text
        .parse()
        .map_err(|_| LocatorError::InvalidPort(text.to_string()))?;
    if !(1..=i64::from(u16::MAX)).contains(&port) {
        return Err(LocatorError::PortOutOfRange(port));
    }
    Ok(port as u16)
}

fn check_no_query_or_fragment(url: &Url) -> Result<(), LocatorError> {
    if url.query().is_some_and(|q| !q.is_empty()) {
        return Err(LocatorError::QueryNotEmpty);
    }
    if url.fragment().is_some_and(|f| !f.is_empty()) {
        return Err(LocatorError::FragmentNotEmpty);
    }
    Ok(())
}

fn path_of(url: &Url) -> Result<String, LocatorError> {
    let path = decode(url.path(), "path")?;
    if path.is_empty() {
        Ok("/".to_string())
    } else {
        Ok(path)
    }
}

fn decode(raw: &str, what: &'static str) -> Result<String, LocatorError> {
    percent_decode_str(raw)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|_| LocatorError::InvalidEncoding(what))
}
