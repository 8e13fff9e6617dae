//! Live session state held by the pool
//!
//! A session is the set of headers one identity sends with every request.
//! Names and values are validated once, when the session enters the pool,
//! so a bad record is rejected at registration rather than failing every job.

use common::Secret;
use reqwest::header::{HeaderName, HeaderValue};
use session_pool::{ResourceOptions, ResourcePool};
use tracing::info;

use crate::error::{Error, Result};
use crate::session_store::SessionRecord;

/// Validated headers for one pooled session.
#[derive(Debug, Clone)]
pub struct SessionState {
    headers: Vec<(HeaderName, Secret<String>)>,
}

impl SessionState {
    /// Build a session from a stored record.
    pub fn from_record(id: &str, record: &SessionRecord) -> Result<Self> {
        let mut headers = Vec::with_capacity(record.headers.len());
        for (name, value) in &record.headers {
            let header_name =
                HeaderName::from_bytes(name.as_bytes()).map_err(|_| Error::InvalidSession {
                    id: id.to_owned(),
                    reason: format!("invalid header name: {name}"),
                })?;
            HeaderValue::from_str(value).map_err(|_| Error::InvalidSession {
                id: id.to_owned(),
                reason: format!("invalid value for header {name}"),
            })?;
            headers.push((header_name, Secret::new(value.clone())));
        }
        Ok(Self { headers })
    }

    /// Headers as they go on the wire.
    pub fn header_pairs(&self) -> impl Iterator<Item = (HeaderName, HeaderValue)> + '_ {
        self.headers.iter().filter_map(|(name, value)| {
            let mut value = HeaderValue::from_str(value.expose()).ok()?;
            value.set_sensitive(true);
            Some((name.clone(), value))
        })
    }

    pub fn header_count(&self) -> usize {
        self.headers.len()
    }
}

/// Validate a stored session and register it with the pool.
pub async fn register(
    pool: &ResourcePool<SessionState>,
    id: &str,
    record: &SessionRecord,
) -> Result<()> {
    if id.is_empty() {
        return Err(Error::InvalidSession {
            id: id.to_owned(),
            reason: "id must not be empty".into(),
        });
    }
    if record.failure_threshold == Some(0) {
        return Err(Error::InvalidSession {
            id: id.to_owned(),
            reason: "failure_threshold must be greater than 0".into(),
        });
    }
    let state = SessionState::from_record(id, record)?;
    let headers = state.header_count();
    let options = ResourceOptions {
        failure_threshold: record.failure_threshold,
    };
    pool.register(id, state, options).await?;
    info!(
        session_id = id,
        headers,
        failure_threshold = ?record.failure_threshold,
        "session registered"
    );
    Ok(())
}
