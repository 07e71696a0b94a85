//! DSN parsing.

use std::fmt;
use std::str::FromStr;

use url::Url;

use crate::error::TrackingError;

/// Protocol version announced in the auth header.
const PROTOCOL_VERSION: u8 = 7;

/// Parsed collector DSN of the form `scheme://public_key@host[:port][/prefix]/project_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dsn {
    scheme: String,
    public_key: String,
    host: String,
    port: Option<u16>,
    path_prefix: String,
    project_id: String,
}

impl Dsn {
    #[inline]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[inline]
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    #[inline]
    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    /// Endpoint that accepts store events for this project.
    pub fn store_url(&self) -> String {
        let port = self.port.map(|p| format!(":{p}")).unwrap_or_default();
        format!(
            "{}://{}{}{}/api/{}/store/",
            self.scheme, self.host, port, self.path_prefix, self.project_id
        )
    }

    /// Value for the `X-Sentry-Auth` header.
    pub fn auth_header(&self, client: &str) -> String {
        format!(
            "Sentry sentry_version={PROTOCOL_VERSION}, sentry_client={client}, sentry_key={}",
            self.public_key
        )
    }
}

impl FromStr for Dsn {
    type Err = TrackingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let url = Url::parse(s.trim()).map_err(|e| TrackingError::InvalidDsn(e.to_string()))?;

        let scheme = url.scheme();
        if scheme != "http" && scheme != "https" {
            return Err(TrackingError::InvalidDsn(format!(
                "unsupported scheme `{scheme}`"
            )));
        }

        let public_key = url.username();
        if public_key.is_empty() {
            return Err(TrackingError::InvalidDsn("missing public key".into()));
        }

        let host = url
            .host_str()
            .ok_or_else(|| TrackingError::InvalidDsn("missing host".into()))?;

        let path = url.path().trim_end_matches('/');
        let (prefix, project_id) = path
            .rsplit_once('/')
            .ok_or_else(|| TrackingError::InvalidDsn("missing project id".into()))?;
        if project_id.is_empty() {
            return Err(TrackingError::InvalidDsn("missing project id".into()));
        }

        Ok(Self {
            scheme: scheme.to_owned(),
            public_key: public_key.to_owned(),
            host: host.to_owned(),
            port: url.port(),
            path_prefix: prefix.to_owned(),
            project_id: project_id.to_owned(),
        })
    }
}

impl fmt::Display for Dsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let port = self.port.map(|p| format!(":{p}")).unwrap_or_default();
        write!(
            f,
            "{}://{}@{}{}{}/{}",
            self.scheme, self.public_key, self.host, port, self.path_prefix, self.project_id
        )
    }
}
