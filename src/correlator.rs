//! Matching server responses to outstanding actions.
//!
//! The correlator owns no I/O. Each front end stores its own waiter type `W`
//! per pending action (a oneshot sender for the async client, `()` for the
//! blocking session) and receives a [`Completion`] once the action is settled.

use crate::{
    command::{AmiAction, AmiResponse},
    error::{AmiError, AmiResult},
    event::AmiEvent,
    message::AmiMessage,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

static INSTANCE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A settled action: the waiter handed back together with its outcome.
#[derive(Debug)]
pub struct Completion<W> {
    /// `ActionID` of the settled action.
    pub action_id: String,
    /// Waiter registered at submission.
    pub waiter: W,
    /// Response or the failure to report.
    pub result: AmiResult<AmiResponse>,
}

/// What to do with an incoming event.
#[derive(Debug)]
pub enum EventRoute<W> {
    /// Not part of any pending list; hand to the event dispatcher.
    Dispatch(AmiEvent),
    /// Absorbed into a pending action's event list.
    Collected,
    /// Absorbed, and it completed the list.
    Completed(Completion<W>),
}

#[derive(Debug)]
struct Pending<W> {
    action_name: String,
    waiter: W,
    deadline: Option<(Instant, u64)>,
    completion_events: Vec<String>,
    response: Option<AmiResponse>,
    events: Vec<AmiEvent>,
    list_complete: bool,
}

/// Tracks outstanding actions by `ActionID`, with FIFO fallback for servers
/// that do not echo the id.
#[derive(Debug)]
pub struct Correlator<W> {
    prefix: String,
    next_id: u64,
    pending: HashMap<String, Pending<W>>,
    order: VecDeque<String>,
    closed: Option<String>,
}

impl<W> Correlator<W> {
    /// Correlator generating ids of the form `{prefix}-{n}`.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next_id: 1,
            pending: HashMap::new(),
            order: VecDeque::new(),
            closed: None,
        }
    }

    /// Correlator with a prefix unique to this process and instance.
    pub fn with_unique_prefix() -> Self {
        let instance = INSTANCE_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self::new(format!("{}-{}", std::process::id(), instance))
    }

    /// Register an outstanding action, assigning an `ActionID` if it has none.
    ///
    /// Fails if the id is already outstanding or the correlator was closed
    /// by [`fail_all`](Self::fail_all).
    pub fn submit(
        &mut self,
        action: &mut AmiAction,
        waiter: W,
        timeout: Option<Duration>,
    ) -> AmiResult<String> {
        if let Some(reason) = &self.closed {
            return Err(AmiError::connection_lost(reason));
        }
        let action_id = match action.action_id() {
            Some(id) => id.to_string(),
            None => {
                let id = format!("{}-{}", self.prefix, self.next_id);
                self.next_id += 1;
                action.set_action_id(id.clone());
                id
            }
        };
        if self
            .pending
            .contains_key(&action_id)
        {
            return Err(AmiError::validation(format!(
                "ActionID {} is already outstanding",
                action_id
            )));
        }

        let deadline = timeout.map(|t| (Instant::now() + t, t.as_millis() as u64));
        self.pending
            .insert(
                action_id.clone(),
                Pending {
                    action_name: action
                        .name()
                        .to_string(),
                    waiter,
                    deadline,
                    completion_events: action
                        .completion_events()
                        .to_vec(),
                    response: None,
                    events: Vec::new(),
                    list_complete: false,
                },
            );
        self.order
            .push_back(action_id.clone());
        Ok(action_id)
    }

    /// Match a response block to its action.
    ///
    /// Returns `None` when the action is now waiting for its event list, or
    /// when nothing matched (late reply to a cancelled action, or a stray
    /// response with no id and nothing outstanding).
    pub fn on_response(&mut self, message: AmiMessage) -> Option<Completion<W>> {
        let response = AmiResponse::new(message);
        let action_id = match response.action_id() {
            Some(id) if self
                .pending
                .contains_key(id) =>
            {
                id.to_string()
            }
            Some(id) => {
                warn!("Dropping response for unknown ActionID {}", id);
                return None;
            }
            None => match self.oldest_awaiting_response() {
                Some(id) => {
                    debug!("Response without ActionID matched FIFO to {}", id);
                    id
                }
                None => {
                    warn!(
                        "Dropping response without ActionID: no action outstanding (status {})",
                        response.status()
                    );
                    return None;
                }
            },
        };

        let pending = self
            .pending
            .get_mut(&action_id)?;
        if !pending
            .completion_events
            .is_empty()
            && response.is_success()
        {
            pending.response = Some(response);
            if pending.list_complete {
                return self.finish(&action_id);
            }
            return None;
        }

        let pending = self.take(&action_id)?;
        Some(Completion {
            action_id,
            waiter: pending.waiter,
            result: response.into_result(),
        })
    }

    /// Route an event either into a pending event list or to the dispatcher.
    pub fn on_event(&mut self, message: AmiMessage) -> EventRoute<W> {
        let event = match AmiEvent::from_message(message) {
            Ok(event) => event,
            Err(e) => {
                warn!("Dropping block passed as an event: {}", e);
                return EventRoute::Collected;
            }
        };
        let Some(action_id) = event
            .action_id()
            .map(str::to_string)
        else {
            return EventRoute::Dispatch(event);
        };
        let Some(pending) = self
            .pending
            .get_mut(&action_id)
        else {
            return EventRoute::Dispatch(event);
        };
        if pending
            .completion_events
            .is_empty()
        {
            return EventRoute::Dispatch(event);
        }

        let is_last = pending
            .completion_events
            .iter()
            .any(|name| {
                event
                    .name()
                    .eq_ignore_ascii_case(name)
            })
            || event.is_list_complete();
        if !is_last {
            pending
                .events
                .push(event);
            return EventRoute::Collected;
        }

        pending.list_complete = true;
        if pending
            .response
            .is_none()
        {
            return EventRoute::Collected;
        }
        match self.finish(&action_id) {
            Some(completion) => EventRoute::Completed(completion),
            None => EventRoute::Collected,
        }
    }

    /// Forget an action, returning its waiter.
    pub fn cancel(&mut self, action_id: &str) -> Option<W> {
        self.take(action_id)
            .map(|p| p.waiter)
    }

    /// Fail every action whose deadline has passed.
    pub fn expire(&mut self, now: Instant) -> Vec<Completion<W>> {
        let overdue: Vec<(String, u64)> = self
            .pending
            .iter()
            .filter_map(|(id, p)| match p.deadline {
                Some((deadline, ms)) if deadline <= now => Some((id.clone(), ms)),
                _ => None,
            })
            .collect();

        overdue
            .into_iter()
            .filter_map(|(action_id, timeout_ms)| {
                let pending = self.take(&action_id)?;
                warn!(
                    "Action {} ({}) timed out after {}ms",
                    pending.action_name, action_id, timeout_ms
                );
                Some(Completion {
                    action_id,
                    waiter: pending.waiter,
                    result: Err(AmiError::Timeout { timeout_ms }),
                })
            })
            .collect()
    }

    /// Fail every outstanding action and refuse new ones.
    pub fn fail_all(&mut self, reason: &str) -> Vec<Completion<W>> {
        self.closed = Some(reason.to_string());
        self.order
            .clear();
        self.pending
            .drain()
            .map(|(action_id, pending)| Completion {
                action_id,
                waiter: pending.waiter,
                result: Err(AmiError::connection_lost(reason)),
            })
            .collect()
    }

    /// Earliest deadline among outstanding actions.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending
            .values()
            .filter_map(|p| p.deadline)
            .map(|(deadline, _)| deadline)
            .min()
    }

    /// Deadline of one action.
    pub fn deadline_of(&self, action_id: &str) -> Option<Instant> {
        self.pending
            .get(action_id)?
            .deadline
            .map(|(deadline, _)| deadline)
    }

    /// Whether the action is still outstanding.
    pub fn is_pending(&self, action_id: &str) -> bool {
        self.pending
            .contains_key(action_id)
    }

    /// Number of outstanding actions.
    pub fn len(&self) -> usize {
        self.pending
            .len()
    }

    /// `true` when nothing is outstanding.
    pub fn is_empty(&self) -> bool {
        self.pending
            .is_empty()
    }

    fn oldest_awaiting_response(&self) -> Option<String> {
        self.order
            .iter()
            .find(|id| {
                self.pending
                    .get(id.as_str())
                    .is_some_and(|p| {
                        p.response
                            .is_none()
                    })
            })
            .cloned()
    }

    fn finish(&mut self, action_id: &str) -> Option<Completion<W>> {
        let pending = self.take(action_id)?;
        let mut response = pending.response?;
        for event in pending.events {
            response.push_event(event);
        }
        Some(Completion {
            action_id: action_id.to_string(),
            waiter: pending.waiter,
            result: Ok(response),
        })
    }

    fn take(&mut self, action_id: &str) -> Option<Pending<W>> {
        let pending = self
            .pending
            .remove(action_id)?;
        self.order
            .retain(|id| id != action_id);
        Some(pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(fields: &[(&str, &str)]) -> AmiMessage {
        AmiMessage::from_fields(fields.iter().copied())
    }

    #[test]
    fn test_generated_ids_unique() {
        let mut c: Correlator<u32> = Correlator::new("t");
        let mut a = AmiAction::new("Ping");
        let mut b = AmiAction::new("Ping");
        let id_a = c
            .submit(&mut a, 1, None)
            .unwrap();
        let id_b = c
            .submit(&mut b, 2, None)
            .unwrap();
        assert_ne!(id_a, id_b);
        assert_eq!(a.action_id(), Some(id_a.as_str()));
        assert_eq!(c.len(), 2);
    }

    #[test]
    fn test_unique_prefixes_differ() {
        let a: Correlator<()> = Correlator::with_unique_prefix();
        let b: Correlator<()> = Correlator::with_unique_prefix();
        assert_ne!(a.prefix, b.prefix);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut c: Correlator<()> = Correlator::new("t");
        let mut a = AmiAction::new("Ping").with_action_id("42");
        let mut b = AmiAction::new("Ping").with_action_id("42");
        c.submit(&mut a, (), None)
            .unwrap();
        assert!(matches!(
            c.submit(&mut b, (), None),
            Err(AmiError::Validation { .. })
        ));
    }

    #[test]
    fn test_match_by_action_id_out_of_order() {
        let mut c: Correlator<&str> = Correlator::new("t");
        let mut a = AmiAction::new("Ping").with_action_id("a");
        let mut b = AmiAction::new("Ping").with_action_id("b");
        c.submit(&mut a, "first", None)
            .unwrap();
        c.submit(&mut b, "second", None)
            .unwrap();

        let done = c
            .on_response(msg(&[("Response", "Success"), ("ActionID", "b")]))
            .unwrap();
        assert_eq!(done.waiter, "second");
        assert_eq!(done.action_id, "b");

        let done = c
            .on_response(msg(&[("Response", "Success"), ("ActionID", "a")]))
            .unwrap();
        assert_eq!(done.waiter, "first");
        assert!(c.is_empty());
    }

    #[test]
    fn test_fifo_fallback_without_action_id() {
        let mut c: Correlator<u8> = Correlator::new("t");
        for n in 0..3 {
            let mut action = AmiAction::new("Ping");
            c.submit(&mut action, n, None)
                .unwrap();
        }
        for expected in 0..3 {
            let done = c
                .on_response(msg(&[("Response", "Success")]))
                .unwrap();
            assert_eq!(done.waiter, expected);
        }
        assert!(c
            .on_response(msg(&[("Response", "Success")]))
            .is_none());
    }

    #[test]
    fn test_unknown_action_id_dropped() {
        let mut c: Correlator<()> = Correlator::new("t");
        let mut a = AmiAction::new("Ping").with_action_id("live");
        c.submit(&mut a, (), None)
            .unwrap();
        assert!(c
            .on_response(msg(&[("Response", "Success"), ("ActionID", "stale")]))
            .is_none());
        assert!(c.is_pending("live"));
    }

    #[test]
    fn test_error_status_mapped() {
        let mut c: Correlator<()> = Correlator::new("t");
        let mut a = AmiAction::new("Hangup").with_action_id("h");
        c.submit(&mut a, (), None)
            .unwrap();
        let done = c
            .on_response(msg(&[
                ("Response", "Error"),
                ("ActionID", "h"),
                ("Message", "No such channel"),
            ]))
            .unwrap();
        assert!(matches!(done.result, Err(AmiError::ActionFailed { .. })));
    }

    #[test]
    fn test_event_list_collected() {
        let mut c: Correlator<()> = Correlator::new("t");
        let mut a = AmiAction::new("Status")
            .with_action_id("s")
            .expects_event_list("StatusComplete");
        c.submit(&mut a, (), None)
            .unwrap();

        assert!(c
            .on_response(msg(&[("Response", "Success"), ("ActionID", "s")]))
            .is_none());
        assert!(matches!(
            c.on_event(msg(&[
                ("Event", "Status"),
                ("ActionID", "s"),
                ("Channel", "SIP/1")
            ])),
            EventRoute::Collected
        ));
        assert!(matches!(
            c.on_event(msg(&[("Event", "Hangup"), ("Channel", "SIP/9")])),
            EventRoute::Dispatch(_)
        ));

        let done = match c.on_event(msg(&[("Event", "StatusComplete"), ("ActionID", "s")])) {
            EventRoute::Completed(done) => done,
            other => panic!("expected completion, got {:?}", other),
        };
        let response = done
            .result
            .unwrap();
        assert_eq!(response.events().len(), 1);
        assert_eq!(response.events()[0].channel(), Some("SIP/1"));
        assert!(c.is_empty());
    }

    #[test]
    fn test_event_list_complete_marker() {
        let mut c: Correlator<()> = Correlator::new("t");
        let mut a = AmiAction::new("QueueStatus")
            .with_action_id("q")
            .expects_event_list("QueueStatusComplete");
        c.submit(&mut a, (), None)
            .unwrap();
        c.on_response(msg(&[("Response", "Success"), ("ActionID", "q")]));
        let route = c.on_event(msg(&[
            ("Event", "QueueStatusEnd"),
            ("ActionID", "q"),
            ("EventList", "Complete"),
        ]));
        assert!(matches!(route, EventRoute::Completed(_)));
    }

    #[test]
    fn test_event_list_alternate_terminator() {
        let mut c: Correlator<()> = Correlator::new("t");
        let mut a = AmiAction::queue_status().with_action_id("q");
        c.submit(&mut a, (), None)
            .unwrap();
        assert!(c
            .on_response(msg(&[("Response", "Success"), ("ActionID", "q")]))
            .is_none());
        assert!(matches!(
            c.on_event(msg(&[
                ("Event", "QueueParams"),
                ("ActionID", "q"),
                ("Queue", "support")
            ])),
            EventRoute::Collected
        ));

        let done = match c.on_event(msg(&[("Event", "QueueStatusEnd"), ("ActionID", "q")])) {
            EventRoute::Completed(done) => done,
            other => panic!("expected completion, got {:?}", other),
        };
        assert_eq!(
            done.result
                .unwrap()
                .events()
                .len(),
            1
        );
        assert!(!c.is_pending("q"));
    }

    #[test]
    fn test_non_event_block_not_dispatched() {
        let mut c: Correlator<()> = Correlator::new("t");
        assert!(matches!(
            c.on_event(msg(&[("Response", "Success")])),
            EventRoute::Collected
        ));
    }

    #[test]
    fn test_event_list_error_response_settles_immediately() {
        let mut c: Correlator<()> = Correlator::new("t");
        let mut a = AmiAction::new("Status")
            .with_action_id("s")
            .expects_event_list("StatusComplete");
        c.submit(&mut a, (), None)
            .unwrap();
        let done = c
            .on_response(msg(&[
                ("Response", "Error"),
                ("ActionID", "s"),
                ("Message", "Permission denied"),
            ]))
            .unwrap();
        assert!(matches!(done.result, Err(AmiError::PermissionDenied)));
    }

    #[test]
    fn test_expire() {
        let mut c: Correlator<()> = Correlator::new("t");
        let mut a = AmiAction::new("Ping").with_action_id("slow");
        let mut b = AmiAction::new("Ping").with_action_id("open");
        c.submit(&mut a, (), Some(Duration::from_millis(10)))
            .unwrap();
        c.submit(&mut b, (), None)
            .unwrap();

        assert!(c
            .expire(Instant::now())
            .is_empty());
        let expired = c.expire(Instant::now() + Duration::from_millis(50));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].action_id, "slow");
        assert!(matches!(
            expired[0].result,
            Err(AmiError::Timeout { timeout_ms: 10 })
        ));
        assert!(c.is_pending("open"));
        assert!(c
            .on_response(msg(&[("Response", "Success"), ("ActionID", "slow")]))
            .is_none());
    }

    #[test]
    fn test_fail_all_and_closed() {
        let mut c: Correlator<()> = Correlator::new("t");
        let mut a = AmiAction::new("Ping");
        c.submit(&mut a, (), None)
            .unwrap();
        let failed = c.fail_all("connection reset");
        assert_eq!(failed.len(), 1);
        assert!(matches!(
            failed[0].result,
            Err(AmiError::ConnectionLost { .. })
        ));

        let mut b = AmiAction::new("Ping");
        assert!(c
            .submit(&mut b, (), None)
            .is_err());
    }

    #[test]
    fn test_cancel() {
        let mut c: Correlator<u8> = Correlator::new("t");
        let mut a = AmiAction::new("Ping").with_action_id("x");
        c.submit(&mut a, 5, None)
            .unwrap();
        assert_eq!(c.cancel("x"), Some(5));
        assert_eq!(c.cancel("x"), None);
        assert!(c
            .on_response(msg(&[("Response", "Success")]))
            .is_none());
    }
}
