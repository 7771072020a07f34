use std::time::Duration;

/// Connection settings for one execution platform API.
#[derive(Debug, Clone)]
pub struct PlatformEndpoint {
    pub base_url: String,
    pub api_token: Option<String>,
}

impl PlatformEndpoint {
    pub fn new(base_url: impl Into<String>, api_token: Option<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_token,
        }
    }

    pub fn credentials_configured(&self) -> bool {
        self.api_token.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub virtual_machine: PlatformEndpoint,
    pub container: PlatformEndpoint,
    pub batch: PlatformEndpoint,
    pub reconcile_interval: Duration,
    pub metrics_interval: Duration,
    pub cost_interval: Duration,
    /// Auto-revert to idle after a chat exchange with no completion signal.
    pub chat_auto_idle: Duration,
    /// Poll cadence while waiting for remote command output.
    pub command_poll_interval: Duration,
    /// Upper bound on waiting for remote command output before reporting
    /// "still processing".
    pub command_output_bound: Duration,
    pub simulator_delay_min: Duration,
    pub simulator_delay_max: Duration,
}

impl Config {
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// True when at least one platform has credentials configured. The demo
    /// fallback must never trigger while this holds.
    pub fn credentials_present(&self) -> bool {
        self.virtual_machine.credentials_configured()
            || self.container.credentials_configured()
            || self.batch.credentials_configured()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3100,
            virtual_machine: PlatformEndpoint::new("http://localhost:4001", None),
            container: PlatformEndpoint::new("http://localhost:4002", None),
            batch: PlatformEndpoint::new("http://localhost:4003", None),
            reconcile_interval: Duration::from_secs(30),
            metrics_interval: Duration::from_secs(30),
            cost_interval: Duration::from_secs(300),
            chat_auto_idle: Duration::from_secs(5),
            command_poll_interval: Duration::from_secs(1),
            command_output_bound: Duration::from_secs(8),
            simulator_delay_min: Duration::from_secs(5),
            simulator_delay_max: Duration::from_secs(15),
        }
    }
}
