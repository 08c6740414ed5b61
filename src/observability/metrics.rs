//! Prometheus metrics.
//!
//! Counters and gauges emitted by the crate:
//!
//! | Name | Kind | Labels |
//! |------|------|--------|
//! | `graph_query_failures_total` | counter | `operation`, `kind` |
//! | `graph_retries_total` | counter | `operation` |
//! | `pool_connections_idle` | gauge | `backend` |
//! | `pool_connections_opened_total` | counter | `backend` |
//! | `pool_exhausted_total` | counter | `backend` |
//! | `cache_operations_total` | counter | `backend`, `operation`, `status` |

use crate::config::MetricsSettings;
use crate::{Error, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Metrics configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsConfig {
    /// Whether metrics are recorded.
    pub enabled: bool,
    /// Address to bind the scrape listener.
    pub listen_addr: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 9090),
        }
    }
}

impl MetricsConfig {
    /// Builds metrics configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_settings(None)
    }

    /// Builds metrics configuration from config settings with env overrides.
    #[must_use]
    pub fn from_settings(settings: Option<&MetricsSettings>) -> Self {
        let enabled = settings.and_then(|config| config.enabled).unwrap_or(false);
        let port = settings.and_then(|config| config.port).unwrap_or(9090);

        let mut config = Self {
            enabled,
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port),
        };

        if let Some(enabled) = parse_bool_env("LINGSHU_METRICS_ENABLED") {
            config.enabled = enabled;
        }
        if let Some(port) = parse_port_env("LINGSHU_METRICS_PORT") {
            config.listen_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
        }

        config
    }
}

/// Handle to the installed Prometheus recorder.
#[derive(Debug, Clone)]
pub struct MetricsHandle {
    prometheus: Option<PrometheusHandle>,
    listen_addr: Option<SocketAddr>,
}

impl MetricsHandle {
    /// Renders the current metrics in the Prometheus text format.
    ///
    /// Returns `None` when metrics are served by the scrape listener instead.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.prometheus.as_ref().map(PrometheusHandle::render)
    }

    /// Address of the scrape listener, if one was bound.
    #[must_use]
    pub const fn listen_addr(&self) -> Option<SocketAddr> {
        self.listen_addr
    }
}

/// Installs the Prometheus recorder if metrics are enabled.
///
/// With `expose`, an HTTP scrape listener is bound to `listen_addr` on a
/// background thread. Otherwise the recorder is installed without a
/// listener and rendered through [`MetricsHandle::render`].
pub fn install_prometheus(config: &MetricsConfig, expose: bool) -> Result<Option<MetricsHandle>> {
    if !config.enabled {
        return Ok(None);
    }

    let builder = PrometheusBuilder::new();
    if expose {
        builder
            .with_http_listener(config.listen_addr)
            .install()
            .map_err(install_error)?;
        tracing::info!(listen_addr = %config.listen_addr, "Prometheus scrape listener started");
        return Ok(Some(MetricsHandle {
            prometheus: None,
            listen_addr: Some(config.listen_addr),
        }));
    }

    let prometheus = builder.install_recorder().map_err(install_error)?;
    Ok(Some(MetricsHandle {
        prometheus: Some(prometheus),
        listen_addr: None,
    }))
}

#[allow(clippy::needless_pass_by_value)]
fn install_error(e: metrics_exporter_prometheus::BuildError) -> Error {
    Error::OperationFailed {
        operation: "metrics_recorder_install".to_string(),
        cause: e.to_string(),
    }
}

fn parse_bool_env(key: &str) -> Option<bool> {
    std::env::var(key).ok().map(|value| {
        let value = value.to_lowercase();
        value == "true" || value == "1" || value == "yes"
    })
}

fn parse_port_env(key: &str) -> Option<u16> {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
}
