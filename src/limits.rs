use crate::model::Ms;

pub const MAX_NAME_LEN: usize = 255;
pub const MAX_EMAIL_LEN: usize = 512;
pub const MAX_DESCRIPTION_LEN: usize = 2_000;
pub const MAX_COMMENT_LEN: usize = 2_000;
pub const MAX_SEARCH_LEN: usize = 255;

pub const MAX_PAGE_SIZE: usize = 1_000;
pub const MAX_BOOKINGS_PER_ITEM: usize = 100_000;
pub const MAX_USERS: usize = 1_000_000;

/// 1970-01-01
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 2100-01-01
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;
/// Roughly ten years.
pub const MAX_SPAN_DURATION_MS: Ms = 10 * 366 * 86_400_000;
