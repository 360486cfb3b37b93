// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::net::SocketAddr;

/// Annotation/label domains used to build the metadata keys on incoming
/// resources. Events are produced by three cooperating systems, each of
/// which namespaces its annotations under its own domain.
#[derive(Debug, Clone)]
pub struct AnnotationDomains {
    /// Platform domain (requester, catalog display names, external platform url).
    pub platform: String,
    /// Pool-manager domain (claim linkage, resource handle uid).
    pub pool: String,
    /// Sales domain (opportunity id, purpose).
    pub sales: String,
}

impl Default for AnnotationDomains {
    fn default() -> Self {
        Self {
            platform: "babylon.gpte.redhat.com".to_string(),
            pool: "poolboy.gpte.redhat.com".to_string(),
            sales: "pfe.redhat.com".to_string(),
        }
    }
}

/// Credentials and endpoint for the automation-execution (job) REST API.
#[derive(Debug, Clone)]
pub struct JobApiConfig {
    /// Base URL, e.g. `https://tower.example.com`.
    pub base_url: String,
    /// Basic-auth username.
    pub username: String,
    /// Basic-auth password.
    pub password: String,
}

/// provmirror-core configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection URL
    pub database_url: String,
    /// HTTP ingest address
    pub http_addr: SocketAddr,
    /// Annotation domains for metadata key construction
    pub domains: AnnotationDomains,
    /// Corporate mail domain used to route identity lookups
    pub corp_domain: String,
    /// Job-execution API endpoint, when job enrichment is enabled
    pub job_api: Option<JobApiConfig>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `PROVMIRROR_DATABASE_URL`: PostgreSQL connection string
    ///
    /// Optional (with defaults):
    /// - `PROVMIRROR_HTTP_PORT`: ingest server port (default: 8080)
    /// - `PROVMIRROR_PLATFORM_DOMAIN`, `PROVMIRROR_POOL_DOMAIN`,
    ///   `PROVMIRROR_SALES_DOMAIN`: annotation domains
    /// - `PROVMIRROR_CORP_DOMAIN`: corporate mail domain (default: redhat.com)
    /// - `PROVMIRROR_JOB_API_URL` / `_USER` / `_PASSWORD`: job API endpoint;
    ///   job enrichment is disabled when the URL is unset
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("PROVMIRROR_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("PROVMIRROR_DATABASE_URL"))?;

        let http_port: u16 = std::env::var("PROVMIRROR_HTTP_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("PROVMIRROR_HTTP_PORT", "must be a valid port number")
            })?;

        let defaults = AnnotationDomains::default();
        let domains = AnnotationDomains {
            platform: std::env::var("PROVMIRROR_PLATFORM_DOMAIN")
                .unwrap_or(defaults.platform),
            pool: std::env::var("PROVMIRROR_POOL_DOMAIN").unwrap_or(defaults.pool),
            sales: std::env::var("PROVMIRROR_SALES_DOMAIN").unwrap_or(defaults.sales),
        };

        let corp_domain = std::env::var("PROVMIRROR_CORP_DOMAIN")
            .unwrap_or_else(|_| "redhat.com".to_string());

        let job_api = match std::env::var("PROVMIRROR_JOB_API_URL") {
            Ok(base_url) => {
                let username = std::env::var("PROVMIRROR_JOB_API_USER")
                    .map_err(|_| ConfigError::Missing("PROVMIRROR_JOB_API_USER"))?;
                let password = std::env::var("PROVMIRROR_JOB_API_PASSWORD")
                    .map_err(|_| ConfigError::Missing("PROVMIRROR_JOB_API_PASSWORD"))?;
                Some(JobApiConfig {
                    base_url,
                    username,
                    password,
                })
            }
            Err(_) => None,
        };

        Ok(Self {
            database_url,
            http_addr: SocketAddr::from(([0, 0, 0, 0], http_port)),
            domains,
            corp_domain,
            job_api,
        })
    }

    /// Mail-domain marker used to decide the identity routing, e.g. `@redhat`
    /// for a corp domain of `redhat.com`.
    pub fn corp_marker(&self) -> String {
        let head = self.corp_domain.split('.').next().unwrap_or_default();
        format!("@{}", head)
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
