use std::time::Duration;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the UDP socket to
    pub host: String,
    /// Port to listen on (0 picks an ephemeral port)
    pub port: u16,
    /// Maximum number of concurrent connections
    pub max_clients: usize,
    /// Maximum regular players per room; the GM is not counted
    pub max_players_per_room: usize,
    /// Chat messages kept per room
    pub chat_history_limit: usize,
    /// Silence after which a connection is dropped
    pub client_timeout: Duration,
    /// How long a room survives its GM disconnecting
    pub gm_reconnect_grace: Duration,
    /// Minimum spacing between relayed moves while dragging
    pub move_throttle: Duration,
    /// Period of the room sweep
    pub maintenance_interval: Duration,
    /// Period of the throttle table cleanup
    pub throttle_cleanup_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3001,
            max_clients: 256,
            max_players_per_room: 6,
            chat_history_limit: 100,
            client_timeout: Duration::from_secs(10),
            gm_reconnect_grace: Duration::from_secs(5 * 60),
            move_throttle: Duration::from_millis(50),
            maintenance_interval: Duration::from_secs(1),
            throttle_cleanup_interval: Duration::from_secs(10),
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        if self.max_clients == 0 {
            return Err("max_clients must be at least 1".to_string());
        }
        if self.max_players_per_room == 0 {
            return Err("max_players_per_room must be at least 1".to_string());
        }
        if self.chat_history_limit == 0 {
            return Err("chat_history_limit must be at least 1".to_string());
        }
        if self.client_timeout.is_zero() {
            return Err("client_timeout cannot be zero".to_string());
        }
        if self.maintenance_interval.is_zero() || self.throttle_cleanup_interval.is_zero() {
            return Err("maintenance intervals cannot be zero".to_string());
        }
        Ok(())
    }
}
