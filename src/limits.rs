// Office hours, as minutes since midnight.
pub const OPENING_MINUTE: u16 = 9 * 60;
pub const CLOSING_MINUTE: u16 = 20 * 60;

/// Shortest reservation accepted, in minutes.
pub const MIN_DURATION_MINUTES: u16 = 15;

pub const MAX_PURPOSE_LEN: usize = 500;
pub const MAX_REMARKS_LEN: usize = 2_000;
pub const MAX_REASON_LEN: usize = 1_000;
pub const MAX_LOGIN_LEN: usize = 128;
pub const MAX_SEARCH_LEN: usize = 200;

/// Notifications kept per recipient; oldest are dropped first.
pub const MAX_INBOX_LEN: usize = 500;

/// Longest accepted request line on the wire, in bytes.
pub const MAX_LINE_LEN: usize = 64 * 1024;
