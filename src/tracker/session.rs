//! Tracking session identity.
//!
//! A session carries the fields shared by every hit from one tracker:
//! protocol version, tracking id, client id and the optional session options.

use crate::tracker::hit::{Hit, Params};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Measurement protocol version, sent as `v`.
pub const PROTOCOL_VERSION: u32 = 1;

/// Optional session-scoped fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionOptions {
    /// User language as an ISO 639-1 code (`ul`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Anonymize the sender IP (`aip`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anonymize_ip: Option<bool>,
    /// Document encoding (`de`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
}

impl SessionOptions {
    fn encode(&self) -> Params {
        let mut params = Params::new();
        if let Some(ref language) = self.language {
            params.insert("ul".to_string(), language.clone());
        }
        if let Some(anonymize_ip) = self.anonymize_ip {
            let flag = if anonymize_ip { "1" } else { "0" };
            params.insert("aip".to_string(), flag.to_string());
        }
        if let Some(ref encoding) = self.encoding {
            params.insert("de".to_string(), encoding.clone());
        }
        params
    }
}

/// Errors raised while setting up a tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerError {
    /// Tracking id was empty
    MissingTrackingId,
    /// Supplied client id is not a UUID
    InvalidClientId(String),
    /// Worker thread or HTTP client could not be started
    Startup(String),
}

impl std::fmt::Display for TrackerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackerError::MissingTrackingId => write!(f, "Tracking id must not be empty"),
            TrackerError::InvalidClientId(id) => write!(f, "Client id is not a UUID: {id}"),
            TrackerError::Startup(msg) => write!(f, "Tracker startup failed: {msg}"),
        }
    }
}

impl std::error::Error for TrackerError {}

/// Identity and configuration shared by all hits of one tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    tracking_id: String,
    client_id: String,
    options: SessionOptions,
}

impl Session {
    /// Create a session, generating a client id when none is given.
    pub fn new(
        tracking_id: impl Into<String>,
        client_id: Option<String>,
        options: SessionOptions,
    ) -> Result<Self, TrackerError> {
        let tracking_id = tracking_id.into();
        if tracking_id.trim().is_empty() {
            return Err(TrackerError::MissingTrackingId);
        }

        let client_id = match client_id {
            Some(id) => {
                Uuid::parse_str(&id).map_err(|_| TrackerError::InvalidClientId(id.clone()))?;
                id
            }
            None => random_client_id(),
        };

        Ok(Self {
            tracking_id,
            client_id,
            options,
        })
    }

    pub fn tracking_id(&self) -> &str {
        &self.tracking_id
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Build the full wire parameters for a hit.
    ///
    /// Per-hit fields may override the optional session fields, but never
    /// `v`, `tid` or `cid`.
    pub fn hit_params(&self, hit: &Hit) -> Params {
        let mut params = self.options.encode();
        params.insert("t".to_string(), hit.hit_type().as_str().to_string());
        params.extend(hit.encode());
        params.insert("v".to_string(), PROTOCOL_VERSION.to_string());
        params.insert("tid".to_string(), self.tracking_id.clone());
        params.insert("cid".to_string(), self.client_id.clone());
        params
    }
}

/// Generate a random, anonymous client id.
pub fn random_client_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::hit::{EventHit, TimingHit};

    #[test]
    fn test_generated_client_id_is_uuid() {
        let session = Session::new("UA-TEST-1", None, SessionOptions::default()).unwrap();
        assert!(Uuid::parse_str(session.client_id()).is_ok());
        assert_eq!(session.tracking_id(), "UA-TEST-1");
    }

    #[test]
    fn test_missing_tracking_id() {
        let err = Session::new("  ", None, SessionOptions::default()).unwrap_err();
        assert_eq!(err, TrackerError::MissingTrackingId);
    }

    #[test]
    fn test_invalid_client_id() {
        let err = Session::new(
            "UA-TEST-1",
            Some("not-a-uuid".to_string()),
            SessionOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, TrackerError::InvalidClientId(_)));
    }

    #[test]
    fn test_hit_params_event() {
        let session = Session::new(
            "UA-TEST-1",
            Some("35009a79-1a05-49d7-b876-2b884d0f825b".to_string()),
            SessionOptions::default(),
        )
        .unwrap();
        let hit: Hit = EventHit::new("coffee", "make")
            .with_label("machine")
            .with_value(1)
            .into();
        let params = session.hit_params(&hit);

        assert_eq!(params["v"], "1");
        assert_eq!(params["tid"], "UA-TEST-1");
        assert_eq!(params["cid"], "35009a79-1a05-49d7-b876-2b884d0f825b");
        assert_eq!(params["t"], "event");
        assert_eq!(params["ec"], "coffee");
        assert_eq!(params["ea"], "make");
        assert_eq!(params["el"], "machine");
        assert_eq!(params["ev"], "1");
        assert!(!params.contains_key("ul"));
    }

    #[test]
    fn test_session_options_encoding() {
        let options = SessionOptions {
            language: Some("fr".to_string()),
            anonymize_ip: Some(true),
            encoding: Some("utf-8".to_string()),
        };
        let session = Session::new("UA-TEST-1", None, options).unwrap();
        let params = session.hit_params(&TimingHit::new("render", "paint", 250).into());

        assert_eq!(params["ul"], "fr");
        assert_eq!(params["aip"], "1");
        assert_eq!(params["de"], "utf-8");
        assert_eq!(params["t"], "timing");
        assert_eq!(params["utl"], "render.paint");
    }

    #[test]
    fn test_identity_fields_cannot_be_overridden() {
        let session = Session::new("UA-TEST-1", None, SessionOptions::default()).unwrap();
        let mut extra = Params::new();
        extra.insert("tid".to_string(), "UA-OTHER".to_string());
        extra.insert("ul".to_string(), "de".to_string());

        let params = session.hit_params(&EventHit::new("a", "b").with_params(extra).into());
        assert_eq!(params["tid"], "UA-TEST-1");
        assert_eq!(params["ul"], "de");
    }
}
