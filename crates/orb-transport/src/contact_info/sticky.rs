use super::ContactInfo;
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::debug;

/// Per primary, the alternate currently believed good
#[derive(Default)]
pub struct StickyFailoverTable {
    entries: Mutex<HashMap<ContactInfo, ContactInfo>>,
}

impl StickyFailoverTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&self, primary: &ContactInfo) {
        self.entries.lock().remove(primary);
    }

    pub fn current(&self, primary: &ContactInfo) -> Option<ContactInfo> {
        self.entries.lock().get(primary).cloned()
    }

    pub fn has_next(
        &self,
        primary: &ContactInfo,
        previous: Option<&ContactInfo>,
        candidates: &[ContactInfo],
    ) -> bool {
        match previous {
            None => self.current(primary).is_some() || !candidates.is_empty(),
            Some(previous) => match candidates.iter().position(|c| c == previous) {
                Some(_) => candidates.len() > 1,
                None => !candidates.is_empty(),
            },
        }
    }

    /// Candidate to try for `primary`.
    ///
    /// With no `previous`, the remembered entry or else the first
    /// candidate. With `previous`, which just failed, the candidate after
    /// it, wrapping around. The answer is remembered either way.
    pub fn next(
        &self,
        primary: &ContactInfo,
        previous: Option<&ContactInfo>,
        candidates: &[ContactInfo],
    ) -> Option<ContactInfo> {
        let mut entries = self.entries.lock();
        let chosen = match previous {
            None => {
                if let Some(current) = entries.get(primary) {
                    return Some(current.clone());
                }
                candidates.first()?.clone()
            }
            Some(previous) => {
                let index = candidates
                    .iter()
                    .position(|c| c == previous)
                    .map(|i| (i + 1) % candidates.len())
                    .unwrap_or(0);
                let chosen = candidates.get(index)?.clone();
                debug!("sticky: {} failed, {} now preferred for {}", previous, chosen, primary);
                chosen
            }
        };
        entries.insert(primary.clone(), chosen.clone());
        Some(chosen)
    }

    pub fn record_success(&self, primary: &ContactInfo, contact_info: &ContactInfo) {
        self.entries.lock().insert(primary.clone(), contact_info.clone());
    }
}
