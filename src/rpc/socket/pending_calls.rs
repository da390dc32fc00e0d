use std::collections::{BTreeSet, HashMap};
use std::time::Instant;

use crate::rpc::OnComplete;

/// One request waiting for its reply.
#[derive(Debug)]
pub struct PendingCall {
    /// `host:port` the request was sent to.
    pub to: String,
    pub on_complete: OnComplete,
    /// `None` if this call only resolves on reply.
    pub deadline: Option<Instant>,
}

/// Registry of calls awaiting a reply, keyed by message id.
///
/// Each call's deadline lives in an ordered timer queue next to it. Removing a
/// call cancels its deadline, so a call resolves at most once, either by
/// [Self::remove] or by [Self::expire].
#[derive(Debug, Default)]
pub struct PendingCalls {
    calls: HashMap<String, PendingCall>,
    deadlines: BTreeSet<(Instant, String)>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a call, returns a previous call with the same id if there was one.
    pub fn insert(&mut self, id: String, call: PendingCall) -> Option<PendingCall> {
        let displaced = self.remove(&id);

        if let Some(deadline) = call.deadline {
            self.deadlines.insert((deadline, id.clone()));
        }
        self.calls.insert(id, call);

        displaced
    }

    /// Check if a message id is still pending
    #[cfg(test)]
    pub fn contains(&self, id: &str) -> bool {
        self.calls.contains_key(id)
    }

    /// Remove a call and cancel its deadline.
    pub fn remove(&mut self, id: &str) -> Option<PendingCall> {
        let call = self.calls.remove(id)?;

        if let Some(deadline) = call.deadline {
            self.deadlines.remove(&(deadline, id.to_string()));
        }

        Some(call)
    }

    /// Remove and return every call whose deadline is at or before `now`.
    pub fn expire(&mut self, now: Instant) -> Vec<(String, PendingCall)> {
        let mut expired = Vec::new();

        while let Some((deadline, _)) = self.deadlines.first() {
            if *deadline > now {
                break;
            }

            if let Some((_, id)) = self.deadlines.pop_first() {
                if let Some(call) = self.calls.remove(&id) {
                    expired.push((id, call));
                }
            }
        }

        expired
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::*;

    fn call(deadline: Option<Instant>) -> PendingCall {
        PendingCall {
            to: "127.0.0.1:6881".to_string(),
            on_complete: OnComplete::Ping(None),
            deadline,
        }
    }

    #[test]
    fn remove_cancels_deadline() {
        let mut calls = PendingCalls::new();
        let now = Instant::now();

        calls.insert("a".into(), call(Some(now)));
        assert!(calls.contains("a"));

        assert!(calls.remove("a").is_some());
        assert!(calls.remove("a").is_none());
        assert!(calls.deadlines.is_empty());

        assert!(calls.expire(now + Duration::from_secs(10)).is_empty());
    }

    #[test]
    fn expire_in_deadline_order() {
        let mut calls = PendingCalls::new();
        let now = Instant::now();

        calls.insert("late".into(), call(Some(now + Duration::from_millis(300))));
        calls.insert("early".into(), call(Some(now + Duration::from_millis(100))));
        calls.insert("never".into(), call(None));

        assert!(calls.expire(now).is_empty());

        let expired = calls.expire(now + Duration::from_millis(200));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].0, "early");

        let expired = calls.expire(now + Duration::from_secs(60));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].0, "late");

        // Expired calls can't be resolved again by a late reply.
        assert!(calls.remove("early").is_none());

        // Calls without a deadline only leave on reply.
        assert_eq!(calls.len(), 1);
        assert!(calls.remove("never").is_some());
        assert_eq!(calls.len(), 0);
    }

    #[test]
    fn insert_displaces_same_id() {
        let mut calls = PendingCalls::new();
        let now = Instant::now();

        assert!(calls.insert("a".into(), call(Some(now))).is_none());
        assert!(calls
            .insert("a".into(), call(Some(now + Duration::from_secs(1))))
            .is_some());

        assert_eq!(calls.len(), 1);

        // The displaced call's deadline went with it.
        assert!(calls.expire(now).is_empty());
        assert_eq!(calls.expire(now + Duration::from_secs(1)).len(), 1);
    }
}
