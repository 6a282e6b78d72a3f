//! Calendar-month usage quotas per tenant.

pub mod period;
pub mod tracker;

pub use period::current_period_bounds;
pub use tracker::{MonthlyUsage, QuotaResult, QuotaTracker, TENANT_COLLECTION};
