// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;

use clap::Parser;

use crate::cloud::inventory::DEFAULT_IGNORED_NAMESPACES;

/// Onboard clusters from a KaaS instance into local kubeconfigs.
#[derive(Debug, Clone, Parser)]
#[command(name = "kaaslink", version, about)]
pub struct LinkConfig {
    /// Base URL of the instance (e.g. https://kaas.example.com).
    #[arg(long, env = "KAASLINK_CLOUD_URL")]
    pub cloud_url: String,

    /// Host for the deep-link callback listener.
    #[arg(long, default_value = "127.0.0.1", env = "KAASLINK_HOST")]
    pub host: String,

    /// Port for the deep-link callback listener.
    #[arg(long, default_value_t = 8650, env = "KAASLINK_PORT")]
    pub port: u16,

    /// OAuth redirect URI. Defaults to http://{host}:{port}/oauth/code.
    #[arg(long, env = "KAASLINK_REDIRECT_URI")]
    pub redirect_uri: Option<String>,

    /// Directory for generated kubeconfig files. Defaults to {state-dir}/kubeconfigs.
    #[arg(long, env = "KAASLINK_KUBECONFIG_DIR")]
    pub kubeconfig_dir: Option<PathBuf>,

    /// State directory for the session and the cluster registry.
    #[arg(long, env = "KAASLINK_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Username for password-grant instances.
    #[arg(long, env = "KAASLINK_USERNAME")]
    pub username: Option<String>,

    /// Password for password-grant instances.
    #[arg(long, env = "KAASLINK_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Only list clusters in these namespaces (repeatable).
    #[arg(long = "namespace")]
    pub namespaces: Vec<String>,

    /// Clusters to add, by name (repeatable). Defaults to all.
    #[arg(long = "cluster")]
    pub clusters: Vec<String>,

    /// Request offline_access so refresh tokens do not expire.
    #[arg(long, env = "KAASLINK_OFFLINE_ACCESS")]
    pub offline_access: bool,

    /// Do not group clusters by namespace.
    #[arg(long)]
    pub no_workspaces: bool,

    /// Namespaces to hide (repeatable). Replaces the default list.
    #[arg(long = "ignore-namespace")]
    pub ignore_namespaces: Vec<String>,

    /// Keep serving deep links after the initial run.
    #[arg(long)]
    pub listen: bool,

    /// Log format (json or text).
    #[arg(long, env = "KAASLINK_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "KAASLINK_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl LinkConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        let url = self.cloud_url.trim();
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            anyhow::bail!("--cloud-url must be an http(s) URL");
        }
        if self.username.is_some() != self.password.is_some() {
            anyhow::bail!("--username and --password must be given together");
        }
        if !matches!(self.log_format.as_str(), "json" | "text") {
            anyhow::bail!("--log-format must be json or text");
        }
        Ok(())
    }

    pub fn cloud_url(&self) -> &str {
        self.cloud_url.trim().trim_end_matches('/')
    }

    pub fn redirect_uri(&self) -> String {
        match self.redirect_uri {
            Some(ref uri) => uri.clone(),
            None => format!("http://{}:{}/oauth/code", self.host, self.port),
        }
    }

    /// Resolve the state directory.
    ///
    /// Checks `--state-dir`/`KAASLINK_STATE_DIR`, then `$XDG_STATE_HOME/kaaslink`,
    /// then `$HOME/.local/state/kaaslink`.
    pub fn state_dir(&self) -> PathBuf {
        if let Some(ref dir) = self.state_dir {
            return dir.clone();
        }
        if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
            return PathBuf::from(xdg).join("kaaslink");
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(".local/state/kaaslink");
        }
        PathBuf::from(".kaaslink")
    }

    pub fn kubeconfig_dir(&self) -> PathBuf {
        self.kubeconfig_dir.clone().unwrap_or_else(|| self.state_dir().join("kubeconfigs"))
    }

    pub fn session_path(&self) -> PathBuf {
        self.state_dir().join("session.json")
    }

    pub fn registry_path(&self) -> PathBuf {
        self.state_dir().join("registry.json")
    }

    pub fn ignored_namespaces(&self) -> Vec<String> {
        if self.ignore_namespaces.is_empty() {
            return DEFAULT_IGNORED_NAMESPACES.iter().map(|s| (*s).to_owned()).collect();
        }
        self.ignore_namespaces.clone()
    }

    /// Namespace restriction for inventory loads, if any.
    pub fn only_namespaces(&self) -> Option<&[String]> {
        if self.namespaces.is_empty() {
            None
        } else {
            Some(self.namespaces.as_slice())
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
