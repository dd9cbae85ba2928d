// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Mutex;

use serde::Serialize;

/// Urgency of a user-facing notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyLevel {
    Info,
    Ok,
    Error,
}

impl NotifyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Ok => "ok",
            Self::Error => "error",
        }
    }
}

/// Host notification surface.
pub trait Notifier: Send + Sync {
    fn notify(&self, level: NotifyLevel, message: &str);
}

/// Writes notifications to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, level: NotifyLevel, message: &str) {
        match level {
            NotifyLevel::Info | NotifyLevel::Ok => tracing::info!(level = level.as_str(), "{message}"),
            NotifyLevel::Error => tracing::error!(level = level.as_str(), "{message}"),
        }
    }
}

/// Keeps every notification in memory.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    seen: Mutex<Vec<(NotifyLevel, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<(NotifyLevel, String)> {
        self.seen.lock().map(|mut s| std::mem::take(&mut *s)).unwrap_or_default()
    }

    pub fn levels(&self) -> Vec<NotifyLevel> {
        self.seen.lock().map(|s| s.iter().map(|(l, _)| *l).collect()).unwrap_or_default()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, level: NotifyLevel, message: &str) {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push((level, message.to_owned()));
        }
    }
}
