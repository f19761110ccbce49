/// Input validation for ingest, read and admin routes
use thiserror::Error;

pub const MAX_SERVER_TYPE_LEN: usize = 64;
pub const MAX_HOST_LEN: usize = 255;
pub const MAX_PLAYERS: usize = 1000;

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Server type cannot be empty")]
    ServerTypeEmpty,

    #[error("Server type too long (max 64 characters, got {0})")]
    ServerTypeTooLong(usize),

    #[error("Server type contains invalid characters (only alphanumeric, '-' and '_' allowed)")]
    ServerTypeInvalidChars,

    #[error("Host cannot be empty")]
    HostEmpty,

    #[error("Host too long (max 255 characters, got {0})")]
    HostTooLong(usize),

    #[error("Host contains whitespace or control characters")]
    HostInvalidChars,

    #[error("Port must be between 1 and 65535")]
    PortOutOfRange,

    #[error("Player list too large (max {max} players, got {actual})")]
    PlayerListTooLarge { max: usize, actual: usize },

    #[error("Limit must be between 1 and {max}, got {actual}")]
    LimitOutOfRange { max: u32, actual: i64 },

    #[error("Merge gap cannot be negative (got {0})")]
    NegativeMergeGap(i64),

    #[error("Timestamp must be positive (got {0})")]
    TimestampNotPositive(i64),
}

/// Validates a server type such as "rust" or "csgo"
pub fn validate_server_type(server_type: &str) -> Result<(), ValidationError> {
    if server_type.is_empty() {
        return Err(ValidationError::ServerTypeEmpty);
    }

    if server_type.len() > MAX_SERVER_TYPE_LEN {
        return Err(ValidationError::ServerTypeTooLong(server_type.len()));
    }

    if !server_type
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ValidationError::ServerTypeInvalidChars);
    }

    Ok(())
}

/// Validates a host name or IP literal
pub fn validate_host(host: &str) -> Result<(), ValidationError> {
    if host.is_empty() {
        return Err(ValidationError::HostEmpty);
    }

    if host.len() > MAX_HOST_LEN {
        return Err(ValidationError::HostTooLong(host.len()));
    }

    if host.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(ValidationError::HostInvalidChars);
    }

    Ok(())
}

/// Validates a port taken from a path or body (0 is not a reachable port)
pub fn validate_port(port: u32) -> Result<u16, ValidationError> {
    match u16::try_from(port) {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(ValidationError::PortOutOfRange),
    }
}

/// Validates a full server identity
pub fn validate_server(server_type: &str, host: &str, port: u32) -> Result<u16, ValidationError> {
    validate_server_type(server_type)?;
    validate_host(host)?;
    validate_port(port)
}

/// Rejects oversized polls
pub fn validate_player_count(count: usize) -> Result<(), ValidationError> {
    if count > MAX_PLAYERS {
        return Err(ValidationError::PlayerListTooLarge {
            max: MAX_PLAYERS,
            actual: count,
        });
    }

    Ok(())
}

/// Resolves an optional page size against the configured default and cap
pub fn validate_limit(limit: Option<i64>, default: u32, max: u32) -> Result<u32, ValidationError> {
    let Some(limit) = limit else {
        return Ok(default.min(max));
    };

    if limit < 1 || limit > i64::from(max) {
        return Err(ValidationError::LimitOutOfRange { max, actual: limit });
    }

    Ok(limit as u32)
}

pub fn validate_merge_gap(merge_gap_ms: i64) -> Result<(), ValidationError> {
    if merge_gap_ms < 0 {
        return Err(ValidationError::NegativeMergeGap(merge_gap_ms));
    }

    Ok(())
}

pub fn validate_timestamp(timestamp: i64) -> Result<(), ValidationError> {
    if timestamp <= 0 {
        return Err(ValidationError::TimestampNotPositive(timestamp));
    }

    Ok(())
}
