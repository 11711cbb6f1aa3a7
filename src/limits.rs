pub const MAX_PURPOSE_LEN: usize = 1024;
pub const MAX_REASON_LEN: usize = 512;

/// Longest interval a single request may cover, in hours.
pub const MAX_BOOKING_HOURS: i64 = 24;

pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const MAX_PAGE_SIZE: u32 = 100;

pub const MAX_SUGGESTIONS: usize = 32;
pub const MAX_RESOURCES: usize = 100_000;
