use shared::{DEFAULT_GM_COLOR, DEFAULT_PLAYER_COLOR};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

// Get current timestamp in milliseconds
pub fn get_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}

// Pick the requested color, falling back to the role default
pub fn color_or_default(requested: Option<&str>, is_gm: bool) -> String {
    match requested.map(str::trim) {
        Some(color) if !color.is_empty() => color.to_string(),
        _ if is_gm => DEFAULT_GM_COLOR.to_string(),
        _ => DEFAULT_PLAYER_COLOR.to_string(),
    }
}

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
