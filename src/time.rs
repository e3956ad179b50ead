use std::time::{SystemTime, UNIX_EPOCH};

pub fn create_timestamp() -> u64 {
    let since_the_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    since_the_epoch.as_millis() as u64
}

/// Seconds since the epoch, truncated to the 4 bytes the handshake carries.
pub fn unix_seconds() -> u32 {
    (create_timestamp() / 1000) as u32
}
