//! # Item and Portal Value Objects
//!
//! The two payload-level entities of the item API. Both are plain value
//! objects: cloned freely between layers, never shared by reference across
//! sessions.
//!
//! ## Wire Shape
//!
//! ```text
//! Item:   {"portalid": "...", "payload": "...", "servertimestamp": 123}
//! Portal: {"portalid": "...", "servertimestamp": 123}
//! ```
//!
//! `servertimestamp` is assigned by the server. It is omitted from outgoing
//! JSON while it holds the default (0) and defaults to 0 when absent from
//! incoming JSON.

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};

/// One payload posted to, or received from, one portal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Item {
    /// Portal the payload belongs to.
    #[serde(rename = "portalid")]
    pub portal_id: String,
    /// Opaque payload text.
    pub payload: String,
    /// Server-assigned timestamp, 0 if unset.
    #[serde(
        rename = "servertimestamp",
        default,
        skip_serializing_if = "is_zero"
    )]
    pub server_timestamp: i64,
}

impl Item {
    /// Creates an item without a server timestamp.
    pub fn new(portal_id: impl Into<String>, payload: impl Into<String>) -> Self {
        Item {
            portal_id: portal_id.into(),
            payload: payload.into(),
            server_timestamp: 0,
        }
    }

    /// Checks the submission invariants: portal id and payload non-empty.
    ///
    /// # Errors
    /// Returns a `Validation` error naming the missing field.
    pub fn validate(&self) -> Result<()> {
        if self.portal_id.is_empty() {
            return Err(ProtocolError::validation("Item portalid must not be empty"));
        }
        if self.payload.is_empty() {
            return Err(ProtocolError::validation("Item payload must not be empty"));
        }
        Ok(())
    }
}

/// A named channel to poll, with an optional cursor hint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Portal {
    /// Portal identifier.
    #[serde(rename = "portalid")]
    pub portal_id: String,
    /// Cursor hint, 0 if unset.
    #[serde(
        rename = "servertimestamp",
        default,
        skip_serializing_if = "is_zero"
    )]
    pub server_timestamp: i64,
}

impl Portal {
    /// Creates a portal reference without a cursor hint.
    pub fn new(portal_id: impl Into<String>) -> Self {
        Portal {
            portal_id: portal_id.into(),
            server_timestamp: 0,
        }
    }

    /// Sets the cursor hint.
    pub fn since(mut self, server_timestamp: i64) -> Self {
        self.server_timestamp = server_timestamp;
        self
    }

    /// Checks that the portal id is present.
    ///
    /// # Errors
    /// Returns a `Validation` error when the id is empty.
    pub fn validate(&self) -> Result<()> {
        if self.portal_id.is_empty() {
            return Err(ProtocolError::validation("Portal portalid must not be empty"));
        }
        Ok(())
    }
}

pub(crate) fn is_zero(value: &i64) -> bool {
    *value == 0
}
