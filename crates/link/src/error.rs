// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};
use std::fmt;

/// Failure categories for calls against the instance and its identity provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// HTTP 401 from any endpoint.
    Unauthorized,
    /// Network failure or an unexpected HTTP status.
    Transport,
    /// Response body could not be parsed.
    Protocol,
    /// Well-formed payload with required fields missing.
    Validation,
    /// Caller asked for something the instance or flow does not allow.
    Policy,
    /// The user abandoned the flow.
    Cancelled,
    /// Local file or host registry operation failed.
    Storage,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Transport => "TRANSPORT",
            Self::Protocol => "PROTOCOL",
            Self::Validation => "VALIDATION",
            Self::Policy => "POLICY",
            Self::Cancelled => "CANCELLED",
            Self::Storage => "STORAGE",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Uniform error returned by every network-facing operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn unauthorized() -> Self {
        Self::new(ErrorKind::Unauthorized, "Unauthorized")
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Protocol, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn policy(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Policy, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    /// Wrap a host-side failure, keeping the whole context chain.
    pub fn storage(err: &anyhow::Error) -> Self {
        Self::new(ErrorKind::Storage, format!("{err:#}"))
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ApiError {}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.status().map(|s| s.as_u16()) == Some(401) {
            return Self::unauthorized();
        }
        if e.is_decode() {
            return Self::protocol(e.to_string());
        }
        Self::transport(e.to_string())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        Self::protocol(e.to_string())
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
