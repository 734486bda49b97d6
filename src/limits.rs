use crate::model::Ms;

pub const MAX_TENANTS: usize = 64;
pub const MAX_TENANT_NAME_LEN: usize = 128;

pub const MAX_TENTS_PER_TENANT: usize = 10_000;
pub const MAX_MEMBERS_PER_TENT: usize = 12;
pub const MAX_INTERVALS_PER_USER: usize = 5_000;
pub const MAX_SHIFTS_PER_TENT: usize = 5_000;
pub const MAX_REQUIRED_COUNT: u32 = 12;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_URL_LEN: usize = 2048;
pub const JOIN_CODE_LEN: usize = 6;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// Longest single availability paint or shift: one tenting season.
pub const MAX_SPAN_DURATION_MS: Ms = 120 * 24 * 3_600_000;
pub const MAX_QUERY_WINDOW_MS: Ms = 366 * 24 * 3_600_000;
