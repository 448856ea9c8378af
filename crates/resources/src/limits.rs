//! Ticket count policy
//!
//! A bulkhead is either sized to a fixed ticket count or to a fraction of
//! the workers currently registered against it.

use bulwark_config::TicketPolicy;
use bulwark_errors::{Error, SyncError};

/// Largest ticket count a SysV semaphore can hold on every platform
pub const MAX_TICKETS: u32 = 32_767;

/// Reject policies no pool could honour
///
/// # Errors
///
/// `InvalidCapacity` for a fixed count of zero or above [`MAX_TICKETS`],
/// `InvalidQuota` for a quota outside `(0, 1]`.
pub fn validate(policy: TicketPolicy) -> Result<(), Error> {
    match policy {
        TicketPolicy::Fixed(tickets) if tickets == 0 || tickets > MAX_TICKETS => {
            Err(SyncError::InvalidCapacity {
                requested: tickets as usize,
            }
            .into())
        }
        TicketPolicy::Quota(quota) if !(quota > 0.0 && quota <= 1.0) => {
            Err(SyncError::InvalidQuota { quota }.into())
        }
        _ => Ok(()),
    }
}

/// Ticket count `policy` asks for with `workers` registered
///
/// Quotas round up so that any registered worker gets at least a share,
/// and never drop below `minimum`.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn target_tickets(policy: TicketPolicy, workers: u32, minimum: u32) -> u32 {
    match policy {
        TicketPolicy::Fixed(tickets) => tickets,
        TicketPolicy::Quota(quota) => {
            let share = (f64::from(workers) * quota).ceil();
            // validate() bounds quota to (0, 1], so share <= workers
            (share as u32).max(minimum).min(MAX_TICKETS)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_validate() {
        assert!(validate(TicketPolicy::Fixed(1)).is_ok());
        assert!(validate(TicketPolicy::Fixed(0)).is_err());
        assert!(validate(TicketPolicy::Fixed(MAX_TICKETS + 1)).is_err());
        assert!(validate(TicketPolicy::Quota(0.5)).is_ok());
        assert!(validate(TicketPolicy::Quota(1.0)).is_ok());
        assert!(validate(TicketPolicy::Quota(0.0)).is_err());
        assert!(validate(TicketPolicy::Quota(1.5)).is_err());
        assert!(validate(TicketPolicy::Quota(f64::NAN)).is_err());
    }

    #[test]
    fn test_quota_rounds_up() {
        assert_eq!(target_tickets(TicketPolicy::Quota(0.5), 3, 1), 2);
        assert_eq!(target_tickets(TicketPolicy::Quota(0.5), 4, 1), 2);
        assert_eq!(target_tickets(TicketPolicy::Quota(0.1), 1, 1), 1);
        assert_eq!(target_tickets(TicketPolicy::Quota(0.5), 0, 2), 2);
        assert_eq!(target_tickets(TicketPolicy::Fixed(7), 100, 1), 7);
    }

    proptest! {
        #[test]
        fn prop_quota_within_bounds(quota in 0.01f64..=1.0, workers in 0u32..10_000, minimum in 0u32..8) {
            let tickets = target_tickets(TicketPolicy::Quota(quota), workers, minimum);
            prop_assert!(tickets >= minimum);
            prop_assert!(tickets <= workers.max(minimum));
        }
    }
}
