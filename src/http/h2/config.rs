//! HTTP/2 connection configuration
//!
//! Local settings advertised to the peer plus the limits the engine
//! enforces on its own.

use super::error::{Error, Result};
use super::settings::{Settings, SettingsBuilder};
use super::{
    DEFAULT_HEADER_TABLE_SIZE, DEFAULT_INITIAL_WINDOW_SIZE, DEFAULT_MAX_FRAME_SIZE, MAX_MAX_FRAME_SIZE,
    MAX_WINDOW_SIZE,
};
use std::time::Duration;

/// Default cap on a single response body (32 MiB)
pub const DEFAULT_MAX_RESPONSE_BODY_SIZE: usize = 32 * 1024 * 1024;

/// Connection configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Advertised SETTINGS_HEADER_TABLE_SIZE
    pub header_table_size: u32,
    /// Advertised SETTINGS_ENABLE_PUSH
    pub enable_push: bool,
    /// Advertised SETTINGS_MAX_CONCURRENT_STREAMS
    pub max_concurrent_streams: u32,
    /// Advertised SETTINGS_INITIAL_WINDOW_SIZE (stream receive window)
    pub initial_window_size: u32,
    /// Connection receive window
    pub connection_window_size: u32,
    /// Advertised SETTINGS_MAX_FRAME_SIZE, enforced on every read
    pub max_frame_size: u32,
    /// Advertised SETTINGS_MAX_HEADER_LIST_SIZE, enforced on every decoded block
    pub max_header_list_size: u32,
    /// Cumulative DATA bytes accepted per response
    pub max_response_body_size: usize,
    /// Bound on the best-effort GOAWAY write when closing
    pub close_timeout: Duration,
}

impl ConnectionConfig {
    /// Start building a configuration from the defaults
    pub fn builder() -> ConnectionConfigBuilder {
        ConnectionConfigBuilder::new()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.initial_window_size > MAX_WINDOW_SIZE {
            return Err(Error::InvalidSettings(format!(
                "Initial window size {} exceeds maximum (2^31-1)",
                self.initial_window_size
            )));
        }
        if self.connection_window_size > MAX_WINDOW_SIZE {
            return Err(Error::InvalidSettings(format!(
                "Connection window size {} exceeds maximum (2^31-1)",
                self.connection_window_size
            )));
        }
        if !(DEFAULT_MAX_FRAME_SIZE..=MAX_MAX_FRAME_SIZE).contains(&self.max_frame_size) {
            return Err(Error::InvalidSettings(format!(
                "Max frame size {} outside valid range (16384-16777215)",
                self.max_frame_size
            )));
        }
        if self.max_response_body_size == 0 {
            return Err(Error::InvalidSettings(
                "Max response body size must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// SETTINGS sent in the connection preface
    pub fn local_settings(&self) -> Result<Settings> {
        SettingsBuilder::new()
            .header_table_size(self.header_table_size)
            .enable_push(self.enable_push)
            .max_concurrent_streams(self.max_concurrent_streams)
            .initial_window_size(self.initial_window_size)
            .max_frame_size(self.max_frame_size)
            .max_header_list_size(self.max_header_list_size)
            .build()
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            header_table_size: DEFAULT_HEADER_TABLE_SIZE,
            enable_push: false,
            max_concurrent_streams: 100,
            initial_window_size: DEFAULT_INITIAL_WINDOW_SIZE,
            connection_window_size: DEFAULT_INITIAL_WINDOW_SIZE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_header_list_size: 64 * 1024,
            max_response_body_size: DEFAULT_MAX_RESPONSE_BODY_SIZE,
            close_timeout: Duration::from_secs(1),
        }
    }
}

/// Builder for connection configuration
#[derive(Debug, Clone, Default)]
pub struct ConnectionConfigBuilder {
    config: ConnectionConfig,
}

impl ConnectionConfigBuilder {
    /// Create a builder holding the defaults
    pub fn new() -> Self {
        ConnectionConfigBuilder {
            config: ConnectionConfig::default(),
        }
    }

    /// Set header table size
    pub fn header_table_size(mut self, size: u32) -> Self {
        self.config.header_table_size = size;
        self
    }

    /// Set enable push
    pub fn enable_push(mut self, enable: bool) -> Self {
        self.config.enable_push = enable;
        self
    }

    /// Set max concurrent streams
    pub fn max_concurrent_streams(mut self, max: u32) -> Self {
        self.config.max_concurrent_streams = max;
        self
    }

    /// Set stream receive window
    pub fn initial_window_size(mut self, size: u32) -> Self {
        self.config.initial_window_size = size;
        self
    }

    /// Set connection receive window
    pub fn connection_window_size(mut self, size: u32) -> Self {
        self.config.connection_window_size = size;
        self
    }

    /// Set max frame size
    pub fn max_frame_size(mut self, size: u32) -> Self {
        self.config.max_frame_size = size;
        self
    }

    /// Set max header list size
    pub fn max_header_list_size(mut self, size: u32) -> Self {
        self.config.max_header_list_size = size;
        self
    }

    /// Set max response body size
    pub fn max_response_body_size(mut self, size: usize) -> Self {
        self.config.max_response_body_size = size;
        self
    }

    /// Set close timeout
    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.config.close_timeout = timeout;
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<ConnectionConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ConnectionConfig::default();
        assert_eq!(config.header_table_size, 4096);
        assert!(!config.enable_push);
        assert_eq!(config.max_concurrent_streams, 100);
        assert_eq!(config.initial_window_size, 65535);
        assert_eq!(config.connection_window_size, 65535);
        assert_eq!(config.max_frame_size, 16384);
        assert_eq!(config.max_header_list_size, 65536);
        assert_eq!(config.max_response_body_size, 32 * 1024 * 1024);
        assert_eq!(config.close_timeout, Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_validation() {
        assert!(ConnectionConfig::builder()
            .initial_window_size(0x8000_0000)
            .build()
            .is_err());
        assert!(ConnectionConfig::builder()
            .connection_window_size(0x8000_0000)
            .build()
            .is_err());
        assert!(ConnectionConfig::builder().max_frame_size(1024).build().is_err());
        assert!(ConnectionConfig::builder()
            .max_response_body_size(0)
            .build()
            .is_err());

        let config = ConnectionConfig::builder()
            .connection_window_size(1 << 20)
            .max_frame_size(1 << 20)
            .build()
            .unwrap();
        assert_eq!(config.connection_window_size, 1 << 20);
    }

    #[test]
    fn test_local_settings() {
        let settings = ConnectionConfig::default().local_settings().unwrap();
        assert_eq!(settings.enable_push, Some(false));
        assert_eq!(settings.max_concurrent_streams, Some(100));
        assert_eq!(settings.max_header_list_size, Some(65536));
        assert_eq!(settings.initial_window_size_or_default(), 65535);
    }
}
