use super::{ContactInfo, StickyFailoverTable};
use crate::endpoint::Endpoint;
use crate::error::TransportError;
use giop::{AddressingDisposition, Ior};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Default bound on location forwards followed by one invocation
pub const DEFAULT_MAX_REDIRECT_HOPS: usize = 10;

/// What the caller of an iterator does next
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportOutcome {
    /// Try the next contact info
    Continue,
    /// The effective reference was replaced; iteration restarted on it
    Redirect(Ior),
    /// Try the same endpoint again with another addressing mode
    RetrySameEndpoint(AddressingDisposition),
    /// Give up and raise `failure()`
    Exhausted,
}

/// All contact infos of one target reference
#[derive(Clone)]
pub struct ContactInfoList {
    target: Arc<Ior>,
    /// Shared by every clone, replaced on redirect
    effective: Arc<RwLock<Arc<Ior>>>,
    sticky: Option<Arc<StickyFailoverTable>>,
    max_redirect_hops: usize,
}

impl ContactInfoList {
    pub fn new(target: Ior) -> Self {
        let target = Arc::new(target);
        Self {
            effective: Arc::new(RwLock::new(target.clone())),
            target,
            sticky: None,
            max_redirect_hops: DEFAULT_MAX_REDIRECT_HOPS,
        }
    }

    pub fn with_sticky(mut self, table: Arc<StickyFailoverTable>) -> Self {
        self.sticky = Some(table);
        self
    }

    pub fn with_max_redirect_hops(mut self, hops: usize) -> Self {
        self.max_redirect_hops = hops;
        self
    }

    pub fn target_reference(&self) -> Arc<Ior> {
        self.target.clone()
    }

    pub fn effective_reference(&self) -> Arc<Ior> {
        self.effective.read().clone()
    }

    pub fn contact_infos(&self) -> Vec<ContactInfo> {
        ContactInfo::from_reference(&self.effective_reference())
    }

    pub fn iterator(&self) -> ContactInfoIterator {
        ContactInfoIterator::new(self.clone())
    }

    fn set_effective(&self, reference: Ior) {
        *self.effective.write() = Arc::new(reference);
    }
}

/// One invocation's walk over a [`ContactInfoList`]
///
/// Within a pass every contact info is tried at most once. A redirect starts
/// a new pass on the new reference; redirects are bounded by the list's hop
/// limit.
pub struct ContactInfoIterator {
    list: ContactInfoList,
    candidates: Vec<ContactInfo>,
    tried: HashSet<Endpoint>,
    retry: Option<ContactInfo>,
    preferred: Option<ContactInfo>,
    redirects: usize,
    disposition_retries: HashMap<Endpoint, usize>,
    last_error: Option<TransportError>,
    attempts: usize,
    exceptions: usize,
    successes: usize,
}

impl ContactInfoIterator {
    fn new(list: ContactInfoList) -> Self {
        let candidates = list.contact_infos();
        Self {
            list,
            candidates,
            tried: HashSet::new(),
            retry: None,
            preferred: None,
            redirects: 0,
            disposition_retries: HashMap::new(),
            last_error: None,
            attempts: 0,
            exceptions: 0,
            successes: 0,
        }
    }

    fn primary(&self) -> Option<&ContactInfo> {
        self.candidates.first()
    }

    fn untried(&self, ci: &ContactInfo) -> bool {
        !self.tried.contains(ci.endpoint())
    }

    fn take(&mut self, ci: ContactInfo) -> ContactInfo {
        self.tried.insert(ci.endpoint().clone());
        self.attempts += 1;
        ci
    }

    pub fn has_next(&self) -> bool {
        self.retry.is_some() || self.candidates.iter().any(|ci| self.untried(ci))
    }

    pub fn report_success(&mut self, contact_info: &ContactInfo) {
        self.successes += 1;
        self.last_error = None;
        if let (Some(table), Some(primary)) = (&self.list.sticky, self.candidates.first()) {
            table.record_success(primary, contact_info);
        }
        debug!("contact info {} succeeded", contact_info);
    }

    pub fn report_exception(&mut self, contact_info: &ContactInfo, error: TransportError) -> ReportOutcome {
        self.exceptions += 1;
        let retryable = error.is_retryable();
        debug!("contact info {} failed: {} (retryable: {})", contact_info, error, retryable);
        self.last_error = Some(error);
        if !retryable {
            return ReportOutcome::Exhausted;
        }

        if let (Some(table), Some(primary)) = (&self.list.sticky, self.candidates.first()) {
            self.preferred = table.next(primary, Some(contact_info), &self.candidates);
        }
        if self.has_next() {
            ReportOutcome::Continue
        } else {
            ReportOutcome::Exhausted
        }
    }

    /// The peer wants `disposition` for the same endpoint
    pub fn report_addr_disposition_retry(
        &mut self,
        contact_info: &ContactInfo,
        disposition: AddressingDisposition,
    ) -> ReportOutcome {
        let count = self
            .disposition_retries
            .entry(contact_info.endpoint().clone())
            .or_insert(0);
        *count += 1;
        if *count >= AddressingDisposition::COUNT {
            warn!(
                "{} keeps asking for another addressing mode, giving up on it",
                contact_info
            );
            self.exceptions += 1;
            self.last_error = Some(TransportError::Protocol(format!(
                "{} rejected every addressing disposition",
                contact_info
            )));
            return if self.has_next() {
                ReportOutcome::Continue
            } else {
                ReportOutcome::Exhausted
            };
        }
        debug!("retrying {} with {:?} addressing", contact_info, disposition);
        self.retry = Some(contact_info.with_disposition(disposition));
        ReportOutcome::RetrySameEndpoint(disposition)
    }

    /// Follow a location forward to `reference`
    pub fn report_redirect(&mut self, contact_info: &ContactInfo, reference: Ior) -> ReportOutcome {
        self.redirects += 1;
        if self.redirects > self.list.max_redirect_hops {
            warn!(
                "redirect from {} exceeds the limit of {} hops",
                contact_info, self.list.max_redirect_hops
            );
            self.last_error = Some(TransportError::RedirectLimitExceeded(self.list.max_redirect_hops));
            return ReportOutcome::Exhausted;
        }
        info!("{} forwarded the request to {}", contact_info, reference);
        self.list.set_effective(reference.clone());
        self.restart();
        ReportOutcome::Redirect(reference)
    }

    fn restart(&mut self) {
        self.candidates = self.list.contact_infos();
        self.tried.clear();
        self.retry = None;
        self.preferred = None;
        self.disposition_retries.clear();
    }

    /// Error to raise once the iterator is exhausted
    pub fn failure(&self) -> TransportError {
        self.last_error.clone().unwrap_or(TransportError::NoContactInfo)
    }

    pub fn attempts(&self) -> usize {
        self.attempts
    }

    pub fn exceptions(&self) -> usize {
        self.exceptions
    }

    pub fn successes(&self) -> usize {
        self.successes
    }

    pub fn redirects(&self) -> usize {
        self.redirects
    }

    pub fn list(&self) -> &ContactInfoList {
        &self.list
    }
}

impl Iterator for ContactInfoIterator {
    type Item = ContactInfo;

    fn next(&mut self) -> Option<ContactInfo> {
        if let Some(retry) = self.retry.take() {
            self.attempts += 1;
            return Some(retry);
        }

        if let Some(table) = self.list.sticky.clone() {
            let preferred = match self.preferred.take() {
                Some(ci) => Some(ci),
                None if self.tried.is_empty() => self
                    .primary()
                    .and_then(|primary| table.next(primary, None, &self.candidates)),
                None => None,
            };
            if let Some(ci) = preferred {
                // Stale entries from an older reference are ignored
                let current = self.candidates.iter().find(|c| **c == ci).cloned();
                if let Some(ci) = current.filter(|c| self.untried(c)) {
                    return Some(self.take(ci));
                }
            }
        }

        let ci = self.candidates.iter().find(|ci| self.untried(ci))?.clone();
        Some(self.take(ci))
    }
}
