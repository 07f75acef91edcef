use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Server settings. Every flag can also be supplied through the environment.
#[derive(Parser, Debug, Clone)]
#[command(name = "tracktransit", version, about = "Live transit vehicle tracking server")]
pub struct Configuration {
    /// Port the REST surface and the push channel listen on
    #[arg(long, env = "TRACK_PORT", default_value_t = 3030)]
    pub port: u16,

    /// CTA Bus Tracker API key
    #[arg(long, env = "CTA_BUS_API_KEY", default_value = "")]
    pub bus_api_key: String,

    /// CTA Train Tracker API key
    #[arg(long, env = "CTA_TRAIN_API_KEY", default_value = "")]
    pub train_api_key: String,

    #[arg(long, env = "CTA_BUS_API_URL", default_value = "https://www.ctabustracker.com/bustime/api/v2")]
    pub bus_api_url: String,

    #[arg(long, env = "CTA_TRAIN_API_URL", default_value = "https://lapi.transitchicago.com/api/1.0")]
    pub train_api_url: String,

    /// Seconds between two broadcaster ticks
    #[arg(long, env = "TRACK_TICK_SECS", default_value_t = 5)]
    pub tick_secs: u64,

    /// Upper bound on a single upstream call
    #[arg(long, env = "TRACK_GATEWAY_TIMEOUT_SECS", default_value_t = 4)]
    pub gateway_timeout_secs: u64,

    /// Ticks in a row with every upstream call failing before subscribers
    /// are sent `server-error`
    #[arg(long, env = "TRACK_OUTAGE_TICKS", default_value_t = 3)]
    pub outage_ticks: u32,

    /// Lifetime of cached catalog and pattern responses
    #[arg(long, env = "TRACK_CACHE_TTL_SECS", default_value_t = 3600)]
    pub cache_ttl_secs: u64,

    #[arg(long, env = "TRACK_CACHE_CAPACITY", default_value_t = 250)]
    pub cache_capacity: usize,

    /// TLS certificate, only read when built with the `https` feature
    #[arg(long, env = "TRACK_TLS_CERT", default_value = "cert.pem")]
    pub tls_cert: PathBuf,

    #[arg(long, env = "TRACK_TLS_KEY", default_value = "key.pem")]
    pub tls_key: PathBuf,
}

impl Configuration {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_secs.max(1))
    }

    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_secs(self.gateway_timeout_secs.max(1))
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_defaults() {
        let config = Configuration::try_parse_from([
            "tracktransit",
            "--port",
            "8080",
            "--tick-secs",
            "0",
            "--bus-api-key",
            "abc",
        ])
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.bus_api_key, "abc");
        // A zero period would spin the broadcaster.
        assert_eq!(config.tick_interval(), Duration::from_secs(1));
        assert_eq!(config.gateway_timeout(), Duration::from_secs(4));
        assert_eq!(config.outage_ticks, 3);
    }
}
