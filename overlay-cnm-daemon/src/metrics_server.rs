//! Prometheus exporter using the built-in HTTP listener of
//! `metrics-exporter-prometheus`.

use std::net::SocketAddr;

use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{info, warn};

use overlay_cnm_core::config::MetricsConfig;

/// Resolves the scrape listener address.
///
/// # Errors
///
/// Fails for an endpoint other than `/metrics` or an unparsable address.
pub fn listen_addr(config: &MetricsConfig) -> Result<SocketAddr> {
    if config.endpoint != "/metrics" {
        return Err(anyhow::anyhow!(
            "unsupported metrics endpoint '{}': only '/metrics' is supported",
            config.endpoint
        ));
    }
    format!("{}:{}", config.listen_addr, config.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid metrics listen address: {e}"))
}

/// Installs the global recorder and starts the HTTP listener. Once per process.
pub fn install_metrics_recorder(config: &MetricsConfig) -> Result<()> {
    let addr = listen_addr(config)?;
    if addr.ip().is_unspecified() {
        warn!(listen_addr = %addr, "metrics endpoint is exposed on all interfaces");
    }

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("failed to install metrics recorder: {e}"))?;
    overlay_cnm_core::metrics::describe_all();

    info!(listen_addr = %addr, "Prometheus metrics endpoint active");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_listen_addr() {
        let addr = listen_addr(&MetricsConfig::default()).expect("default should parse");
        assert_eq!(addr, "127.0.0.1:9102".parse().expect("literal"));
    }

    #[test]
    fn rejects_other_endpoints_and_bad_addresses() {
        let config = MetricsConfig {
            endpoint: "/stats".to_owned(),
            ..MetricsConfig::default()
        };
        assert!(listen_addr(&config).is_err());

        let config = MetricsConfig {
            listen_addr: "not-an-ip".to_owned(),
            ..MetricsConfig::default()
        };
        assert!(listen_addr(&config).is_err());
    }
}
