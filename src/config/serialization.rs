//! Config serialization to TOML
//!
//! Single source of truth for the config file format. Used by
//! `config init` (defaults) and `config show` (effective values).
//! Backend keys are never written out; only a fingerprint is shown.

use super::{Config, LogRotation};
use crate::proxy::helpers::key_fingerprint;

impl LogRotation {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogRotation::Hourly => "hourly",
            LogRotation::Daily => "daily",
            LogRotation::Never => "never",
        }
    }
}

impl Config {
    fn backends_to_toml(&self) -> String {
        if self.backends.is_empty() {
            // Show an example when nothing is configured
            return r#"
# [[backends]]
# name = "primary"
# url = "https://api.example.com"
# api_key_env = "PRIMARY_API_KEY"   # preferred over api_key
# # api_key = "sk-..."
# weight = 1
# enabled = true
"#
            .to_string();
        }

        let mut output = String::from("\n");
        for backend in &self.backends {
            output.push_str("[[backends]]\n");
            output.push_str(&format!("name = {:?}\n", backend.name));
            output.push_str(&format!("url = {:?}\n", backend.url));
            if backend.api_key.is_empty() {
                output.push_str("# api_key not set\n");
            } else {
                output.push_str(&format!(
                    "# api_key fingerprint: {}\n",
                    key_fingerprint(&backend.api_key)
                ));
            }
            output.push_str(&format!("weight = {}\n", backend.weight));
            output.push_str(&format!("enabled = {}\n", backend.enabled));
            output.push('\n');
        }
        output
    }

    /// Render as a config file
    pub fn to_toml(&self) -> String {
        format!(
            r#"# llm-gateway configuration
# Precedence: environment > this file > defaults

bind_addr = {bind:?}

[database]
path = {db:?}

[logging]
level = {level:?}                 # trace, debug, info, warn, error
format = {format:?}               # full, compact, json
file_enabled = {file_enabled}
file_dir = {file_dir:?}
file_rotation = {rotation:?}      # hourly, daily, never
file_prefix = {prefix:?}

[auth]
code_expiry_secs = {code_expiry}
key_reload_interval_secs = {key_reload}

[usage]
channel_buffer = {buffer}         # records beyond this are dropped
aggregate_interval_secs = {aggregate}

[balancer]
error_threshold = {threshold}
recovery_interval_secs = {recovery}
quiet_period_secs = {quiet}
validation_timeout_secs = {validation}
upstream_timeout_secs = {upstream}
validate_on_startup = {validate}
{backends}"#,
            bind = self.bind_addr.to_string(),
            db = self.database.path.display().to_string(),
            level = self.logging.level,
            format = self.logging.console_format.as_str(),
            file_enabled = self.logging.file_enabled,
            file_dir = self.logging.file_dir.display().to_string(),
            rotation = self.logging.file_rotation.as_str(),
            prefix = self.logging.file_prefix,
            code_expiry = self.auth.code_expiry.as_secs(),
            key_reload = self.auth.key_reload_interval.as_secs(),
            buffer = self.usage.channel_buffer,
            aggregate = self.usage.aggregate_interval.as_secs(),
            threshold = self.balancer.error_threshold,
            recovery = self.balancer.recovery_interval.as_secs(),
            quiet = self.balancer.quiet_period.as_secs(),
            validation = self.balancer.validation_timeout.as_secs(),
            upstream = self.balancer.upstream_timeout.as_secs(),
            validate = self.balancer.validate_on_startup,
            backends = self.backends_to_toml(),
        )
    }
}
