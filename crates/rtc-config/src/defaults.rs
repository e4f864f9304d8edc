//! Engine-wide defaults.

/// Largest number of configs accepted by one multi-key write; bounded by the
/// values store's atomic transaction size.
pub const MAX_BATCH_SIZE: usize = 128;
/// Store-wide prefix prepended to values-store paths.
pub const DEFAULT_VALUES_PREFIX: &str = "rtc";
/// Actor recorded in audit rows when the caller supplies none.
pub const DEFAULT_ACTOR: &str = "system";
/// Row limit applied to audit searches that do not specify one.
pub const DEFAULT_AUDIT_LIMIT: u32 = 100;
/// Page size applied to project listings that do not specify one.
pub const DEFAULT_PAGE_SIZE: u32 = 50;
