//! # Request and Response Envelopes
//!
//! Purpose: Define the JSON bodies exchanged with the three API endpoints.
//!
//! ## Design Principles
//!
//! 1. **Wire Fidelity**: Field names match the API exactly (`portalid`,
//!    `servertimestamp`, ...); Rust-side names stay idiomatic.
//! 2. **Defaults Stay Off The Wire**: Fields holding their default value are
//!    omitted when serializing, and defaulted when absent on decode.
//! 3. **Closed Enumerations**: `mode` and `schedule` are enums, so invalid
//!    values cannot be constructed.
//!
//! ## Endpoint Summary
//!
//! ```text
//! POST login: {"accountid","apikey"}                 -> {"servertimestamp"}
//! POST set:   {"items":[Item..]}                     -> (empty)
//! POST get:   {"portals":[Portal..],"mode",
//!              "schedule","cutoff"}                  -> {"items":[Item..]} (per line in stream mode)
//! 400/401:                                           -> {"error":{"errorgroup","errorcode","errormessage"}}
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, ProtocolError, Result};
use crate::types::{Item, Portal};

/// Hard ceiling for any single serialized request or response unit.
pub const MAX_SERIALIZED_JSON_SIZE: usize = 65536;

/// Cutoff value that disables server-side age filtering.
pub const NO_CUTOFF: i64 = -1;

/// Polling discipline for a get request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Answer immediately with whatever is available.
    #[default]
    Probe,
    /// Hold the request until a new item exists or a server timeout.
    Watch,
    /// Keep the connection open and emit newline-delimited batches.
    Stream,
}

impl Mode {
    fn is_default(&self) -> bool {
        *self == Mode::Probe
    }
}

/// Server-side delivery priority for pending items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Schedule {
    /// Newest first; older backlog may be dropped.
    #[default]
    #[serde(rename = "LIFO")]
    Lifo,
    /// Deliver all pending items in arrival order.
    #[serde(rename = "FIFO")]
    Fifo,
}

impl Schedule {
    fn is_default(&self) -> bool {
        *self == Schedule::Lifo
    }
}

/// Body of the login request.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginRequest {
    pub accountid: String,
    pub apikey: String,
}

impl fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginRequest")
            .field("accountid", &self.accountid)
            .field("apikey", &"<redacted>")
            .finish()
    }
}

/// Session metadata issued by a successful login.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LoginResult {
    #[serde(rename = "servertimestamp", default)]
    pub server_timestamp: i64,
}

/// Batch upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetRequest {
    pub items: Vec<Item>,
}

impl SetRequest {
    pub fn new(items: impl IntoIterator<Item = Item>) -> Self {
        SetRequest {
            items: items.into_iter().collect(),
        }
    }

    /// Checks the batch is non-empty and every item is well formed.
    ///
    /// # Errors
    /// Returns a `Validation` error describing the first violation.
    pub fn validate(&self) -> Result<()> {
        if self.items.is_empty() {
            return Err(ProtocolError::validation("Set request must contain at least one item"));
        }
        self.items.iter().try_for_each(Item::validate)
    }
}

/// Poll request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetRequest {
    pub portals: Vec<Portal>,
    #[serde(default, skip_serializing_if = "Mode::is_default")]
    pub mode: Mode,
    #[serde(default, skip_serializing_if = "Schedule::is_default")]
    pub schedule: Schedule,
    #[serde(default = "no_cutoff", skip_serializing_if = "is_no_cutoff")]
    pub cutoff: i64,
}

impl GetRequest {
    /// Creates a probe request with LIFO schedule and no cutoff.
    pub fn new(portals: impl IntoIterator<Item = Portal>) -> Self {
        GetRequest {
            portals: portals.into_iter().collect(),
            mode: Mode::default(),
            schedule: Schedule::default(),
            cutoff: NO_CUTOFF,
        }
    }

    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = schedule;
        self
    }

    /// Maximum item age in milliseconds, `NO_CUTOFF` (-1) to disable.
    pub fn cutoff(mut self, cutoff_ms: i64) -> Self {
        self.cutoff = cutoff_ms;
        self
    }

    /// Checks the cutoff range and every portal id.
    ///
    /// # Errors
    /// Returns a `Validation` error describing the first violation.
    pub fn validate(&self) -> Result<()> {
        if self.cutoff < NO_CUTOFF {
            return Err(ProtocolError::validation(format!(
                "Get request cutoff must be >= -1, got {}",
                self.cutoff
            )));
        }
        self.portals.iter().try_for_each(Portal::validate)
    }
}

fn no_cutoff() -> i64 {
    NO_CUTOFF
}

fn is_no_cutoff(value: &i64) -> bool {
    *value == NO_CUTOFF
}

/// One decoded response unit of the get endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReceivedBatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<Item>>,
}

/// Structured error body returned with 400/401.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ServerError {
    #[serde(default)]
    pub error: Option<ServerErrorDetail>,
}

impl ServerError {
    /// Server-supplied message, if the body carried one.
    pub fn message(&self) -> Option<&str> {
        self.error.as_ref()?.errormessage.as_deref()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ServerErrorDetail {
    #[serde(default)]
    pub errorgroup: i64,
    #[serde(default)]
    pub errorcode: i64,
    #[serde(default)]
    pub errormessage: Option<String>,
}

/// The three API endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Login,
    Set,
    Get,
}

impl Endpoint {
    /// Prefix of every failure message raised for this endpoint.
    pub const fn failure_prefix(&self) -> &'static str {
        match self {
            Endpoint::Login => "Login failed.",
            Endpoint::Set => "Set item failed.",
            Endpoint::Get => "Get item failed.",
        }
    }

    /// Kind of error raised when the server rejects a request.
    pub const fn rejection_kind(&self) -> ErrorKind {
        match self {
            Endpoint::Login => ErrorKind::Authentication,
            Endpoint::Set | Endpoint::Get => ErrorKind::Application,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Endpoint::Login => "login",
            Endpoint::Set => "set",
            Endpoint::Get => "get",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
