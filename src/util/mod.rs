//! Utilities. OBVIOUSLY.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde_derive::{Deserialize, Serialize};
use std::future::Future;
use std::ops::Deref;
use std::time::Duration;

pub(crate) mod ser;

/// A library-local representation of a time. Wrapping the chrono type keeps
/// the serialization choices in one place, and anything that takes a
/// `Timestamp` will accept a [DateTime<Utc>](chrono::DateTime) via `Into`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create a new Timestamp from the current date/time.
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Seconds since the unix epoch.
    pub fn unix(&self) -> i64 {
        self.0.timestamp()
    }

    /// This timestamp, moved forward (or back) by the given number of seconds.
    /// Saturates at the ends of the representable range.
    pub fn offset_secs(&self, secs: i64) -> Self {
        self.offset_millis(secs.saturating_mul(1000))
    }

    /// This timestamp, moved forward by `by`. Saturates like
    /// [offset_secs](Self::offset_secs).
    pub fn offset(&self, by: Duration) -> Self {
        self.offset_millis(i64::try_from(by.as_millis()).unwrap_or(i64::MAX))
    }

    fn offset_millis(&self, millis: i64) -> Self {
        // i64::MIN has no positive counterpart
        let delta = chrono::Duration::milliseconds(millis.max(-i64::MAX));
        match self.0.checked_add_signed(delta) {
            Some(moved) => Self(moved),
            None if millis < 0 => Self(DateTime::<Utc>::MIN_UTC),
            None => Self(DateTime::<Utc>::MAX_UTC),
        }
    }
}

impl Deref for Timestamp {
    type Target = DateTime<Utc>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(date: DateTime<Utc>) -> Self {
        Self(date)
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

/// Run a call against one of our collaborators, giving up after `limit`.
///
/// A call that runs out the clock is reported as `Unreachable`. We never retry
/// here: retry policy belongs to whoever implements the collaborator.
pub(crate) async fn bounded<F, T>(what: &str, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(res) => res,
        Err(_) => Err(Error::Unreachable(format!("{} timed out after {}ms", what, limit.as_millis()))),
    }
}
