use crate::errors::ConfigError;

use std::fs;

#[derive(Debug, Clone)]
pub struct CommConfig {
    pub server: ServerConfig,
    pub erq: ErqConfig,
    pub timeouts: TimeoutConfig,
    pub buffers: BufferConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub telnet_port: u16,
    pub bind_address: String,
    pub max_sessions: usize,
    pub udp_port: Option<u16>,
}

#[derive(Debug, Clone)]
pub struct ErqConfig {
    /// Executable to fork as the co-process. ERQ support is disabled for
    /// the whole session table if this is absent.
    pub path: Option<String>,
    pub max_message_size: usize,
}

#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    pub select_timeout_ms: u64,
    pub heartbeat_ms: u64,
    pub urgent_retry_secs: u64,
}

#[derive(Debug, Clone)]
pub struct BufferConfig {
    pub text_size: usize,
    pub output_size: usize,
}

impl Default for CommConfig {
    fn default() -> Self {
        CommConfig {
            server: ServerConfig {
                telnet_port: 4000,
                bind_address: "0.0.0.0".to_string(),
                max_sessions: 200,
                udp_port: None,
            },
            erq: ErqConfig {
                path: None,
                max_message_size: 1024,
            },
            timeouts: TimeoutConfig {
                select_timeout_ms: 1000,
                heartbeat_ms: 2000,
                urgent_retry_secs: 600,
            },
            buffers: BufferConfig {
                text_size: 2048,
                output_size: 2048,
            },
        }
    }
}

impl CommConfig {
    /// Address-cache capacity, derived from `max_sessions` per the
    /// installation-constant rule: never below 200, otherwise twice the
    /// session limit.
    pub fn address_cache_capacity(&self) -> usize {
        (2 * self.server.max_sessions).max(200)
    }

    /// ERQ handle table size: 32 slots plus one reserved anonymous slot.
    pub fn erq_handle_slots(&self) -> usize {
        33
    }

    pub fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(content) => Self::parse_config(&content),
            Err(_) => {
                let default_config = Self::default();
                let config_content = default_config.to_config_file_format();
                if let Err(e) = fs::write(path, config_content) {
                    eprintln!("! could not create default config file: {}", e);
                }
                Ok(default_config)
            }
        }
    }

    fn parse_config(content: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let mut current_section = String::new();

        for line in content.lines() {
            let line = line.trim();

            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if line.starts_with('[') && line.ends_with(']') {
                current_section = line[1..line.len() - 1].to_string();
                continue;
            }

            if let Some(eq_pos) = line.find('=') {
                let key = line[..eq_pos].trim();
                let value = line[eq_pos + 1..].trim().trim_matches('"');

                match current_section.as_str() {
                    "server" => config.parse_server_config(key, value)?,
                    "erq" => config.parse_erq_config(key, value)?,
                    "timeouts" => config.parse_timeout_config(key, value)?,
                    "buffers" => config.parse_buffer_config(key, value)?,
                    _ => return Err(ConfigError::UnknownSection(current_section.clone())),
                }
            }
        }

        Ok(config)
    }

    fn parse_server_config(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "telnet_port" => {
                self.server.telnet_port = value
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue(key.to_string(), value.to_string()))?;
            }
            "bind_address" => {
                self.server.bind_address = value.to_string();
            }
            "max_sessions" => {
                self.server.max_sessions = value
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue(key.to_string(), value.to_string()))?;
            }
            "udp_port" => {
                if value.is_empty() || value == "none" {
                    self.server.udp_port = None;
                } else {
                    self.server.udp_port = Some(value.parse().map_err(|_| {
                        ConfigError::InvalidValue(key.to_string(), value.to_string())
                    })?);
                }
            }
            _ => return Err(ConfigError::UnknownKey(key.to_string())),
        }
        Ok(())
    }

    fn parse_erq_config(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "path" => {
                self.erq.path = if value.is_empty() || value == "none" {
                    None
                } else {
                    Some(value.to_string())
                };
            }
            "max_message_size" => {
                self.erq.max_message_size = value
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue(key.to_string(), value.to_string()))?;
            }
            _ => return Err(ConfigError::UnknownKey(key.to_string())),
        }
        Ok(())
    }

    fn parse_timeout_config(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let parsed: u64 = value
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string(), value.to_string()))?;

        match key {
            "select_timeout_ms" => self.timeouts.select_timeout_ms = parsed,
            "heartbeat_ms" => self.timeouts.heartbeat_ms = parsed,
            "urgent_retry_secs" => self.timeouts.urgent_retry_secs = parsed,
            _ => return Err(ConfigError::UnknownKey(key.to_string())),
        }
        Ok(())
    }

    fn parse_buffer_config(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let parsed: usize = value
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string(), value.to_string()))?;

        match key {
            "text_size" => self.buffers.text_size = parsed,
            "output_size" => self.buffers.output_size = parsed,
            _ => return Err(ConfigError::UnknownKey(key.to_string())),
        }
        Ok(())
    }

    fn to_config_file_format(&self) -> String {
        format!(
            r#"# commcore configuration file
# Lines starting with # are comments

[server]
telnet_port = {}
bind_address = "{}"
max_sessions = {}
udp_port = {}

[erq]
# Path to the external-request-queue co-process executable. Leave as
# "none" to run without ERQ support (reverse-DNS and shell-query
# callbacks will never fire).
path = {}
max_message_size = {}

[timeouts]
select_timeout_ms = {}
heartbeat_ms = {}
urgent_retry_secs = {}

[buffers]
text_size = {}
output_size = {}
"#,
            self.server.telnet_port,
            self.server.bind_address,
            self.server.max_sessions,
            self.server
                .udp_port
                .map_or("none".to_string(), |p| p.to_string()),
            self.erq
                .path
                .as_deref()
                .map_or("none".to_string(), |p| format!("\"{}\"", p)),
            self.erq.max_message_size,
            self.timeouts.select_timeout_ms,
            self.timeouts.heartbeat_ms,
            self.timeouts.urgent_retry_secs,
            self.buffers.text_size,
            self.buffers.output_size,
        )
    }
}
