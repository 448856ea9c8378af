//! Pass-through pool for hosts without synchronisation primitives
//!
//! Every acquire succeeds at once. A bulkhead must never become the outage
//! it is meant to contain.

use std::time::Duration;

use bulwark_config::TicketPolicy;
use bulwark_errors::Error;

use super::TicketPool;

#[derive(Debug)]
pub struct PassThroughPool {
    tickets: u32,
}

impl PassThroughPool {
    #[must_use]
    pub fn new(policy: TicketPolicy, quota_minimum_tickets: u32) -> Self {
        let tickets = match policy {
            TicketPolicy::Fixed(tickets) => tickets,
            TicketPolicy::Quota(_) => quota_minimum_tickets,
        };
        Self { tickets }
    }
}

impl TicketPool for PassThroughPool {
    fn take(&self, _timeout: Duration) -> Result<(), Error> {
        Ok(())
    }

    fn give(&self) -> Result<(), Error> {
        Ok(())
    }

    fn sync_tickets(&self, _wait: Duration) -> Result<(), Error> {
        Ok(())
    }

    fn tickets(&self) -> Result<u32, Error> {
        Ok(self.tickets)
    }

    fn available(&self) -> Result<u32, Error> {
        Ok(self.tickets)
    }

    fn held(&self) -> Result<u32, Error> {
        Ok(0)
    }

    fn registered_workers(&self) -> Result<u32, Error> {
        Ok(0)
    }

    fn unregister_worker(&self) -> Result<(), Error> {
        Ok(())
    }

    fn destroy(&self) -> Result<(), Error> {
        Ok(())
    }

    fn is_shared(&self) -> bool {
        false
    }
}
