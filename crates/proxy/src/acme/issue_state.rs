//! Per-domain issuance exclusion
//!
//! A [`DomainIssueState`] admits one issuance workflow at a time. The caller
//! that wins [`start_issue`](DomainIssueState::start_issue) holds a ticket
//! until [`finish_issue`](DomainIssueState::finish_issue); everyone else parks
//! in [`wait_finish_issue`](DomainIssueState::wait_finish_issue) and is
//! released together when the ticket is dropped.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

use tlsgate_common::DomainName;

use super::error::CertError;
use super::issuer::CertificateHandle;

/// Outcome recorded by the last finished issuance
pub type IssueOutcome = Result<Arc<CertificateHandle>, CertError>;

/// Whether an issuance is in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssuePhase {
    Idle,
    Issuing,
}

#[derive(Debug, Default)]
struct Inner {
    /// Present while issuing; cancelled on finish to wake waiters
    ticket: Option<CancellationToken>,
    last: Option<IssueOutcome>,
    /// Most recent successful outcome; survives later failures
    last_good: Option<Arc<CertificateHandle>>,
}

/// Issuance state of a single domain
#[derive(Debug)]
pub struct DomainIssueState {
    domain: DomainName,
    inner: Mutex<Inner>,
}

impl DomainIssueState {
    pub fn new(domain: DomainName) -> Self {
        Self {
            domain,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn domain(&self) -> &DomainName {
        &self.domain
    }

    pub fn phase(&self) -> IssuePhase {
        if self.inner.lock().ticket.is_some() {
            IssuePhase::Issuing
        } else {
            IssuePhase::Idle
        }
    }

    /// Idle to Issuing. Returns `false` if an issuance is already in flight.
    pub fn start_issue(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.ticket.is_some() {
            trace!(domain = %self.domain, "Issuance already in flight");
            return false;
        }

        inner.ticket = Some(CancellationToken::new());
        debug!(domain = %self.domain, "Issuance started");
        true
    }

    /// Record `outcome`, return to Idle and release every waiter
    ///
    /// A failed outcome does not displace the last issued certificate; see
    /// [`usable_cert`](Self::usable_cert).
    ///
    /// Calling this without a successful `start_issue` is a concurrency bug;
    /// it is logged at error level and rejected without touching the state.
    pub fn finish_issue(&self, outcome: IssueOutcome) -> Result<(), CertError> {
        let ticket = {
            let mut inner = self.inner.lock();
            let Some(ticket) = inner.ticket.take() else {
                error!(
                    domain = %self.domain,
                    "finish_issue called without a matching start_issue"
                );
                return Err(CertError::FinishWithoutStart {
                    domain: self.domain.to_string(),
                });
            };
            if let Ok(handle) = &outcome {
                inner.last_good = Some(Arc::clone(handle));
            }
            inner.last = Some(outcome);
            ticket
        };

        ticket.cancel();
        debug!(domain = %self.domain, "Issuance finished");
        Ok(())
    }

    /// Wait for the in-flight issuance, if any, to finish
    ///
    /// Returns at once when Idle. Fails with [`CertError::WaitTimeout`] if
    /// `deadline` passes first.
    pub async fn wait_finish_issue(&self, deadline: Instant) -> Result<(), CertError> {
        let ticket = self.inner.lock().ticket.clone();
        let Some(ticket) = ticket else {
            return Ok(());
        };

        tokio::time::timeout_at(deadline, ticket.cancelled())
            .await
            .map_err(|_| CertError::WaitTimeout {
                domain: self.domain.to_string(),
            })
    }

    /// Last recorded outcome, without blocking
    pub fn cert(&self) -> IssueOutcome {
        self.inner
            .lock()
            .last
            .clone()
            .unwrap_or_else(|| {
                Err(CertError::NotIssued {
                    domain: self.domain.to_string(),
                })
            })
    }

    /// Last issued certificate that is still inside its validity window
    ///
    /// Unlike [`cert`](Self::cert) this ignores failures recorded after the
    /// certificate was issued, so a failed renewal keeps the old one in use.
    pub fn usable_cert(&self, now: DateTime<Utc>) -> Option<Arc<CertificateHandle>> {
        self.inner
            .lock()
            .last_good
            .as_ref()
            .filter(|handle| handle.is_valid_at(now))
            .cloned()
    }
}
