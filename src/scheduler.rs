//! Admission policies
//!
//! Decide which pending room message is dispatched next. Each policy owns
//! its own queue of [`Admission`] records; the router holds exactly one
//! active policy at a time.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;

use crate::message::Message;
use crate::types::Stamp;

/// Priority given to messages that do not ask for one
pub const DEFAULT_PRIORITY: i32 = 1;

/// A formatted message waiting to be dispatched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub sender: String,
    /// Raw submitted text, before any encryption
    pub content: String,
    pub priority: i32,
    pub admitted_at: Stamp,
    pub message: Message,
}

impl Admission {
    pub fn new(content: String, priority: i32, message: Message) -> Self {
        Self {
            sender: message.sender.clone(),
            content,
            priority,
            admitted_at: Stamp::now(),
            message,
        }
    }
}

/// Ordering rule over pending admissions
pub trait AdmissionPolicy: Send + Sync {
    fn kind(&self) -> PolicyKind;

    fn admit(&mut self, admission: Admission);

    /// Remove and return the admission to dispatch next
    fn next(&mut self) -> Option<Admission>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pause to leave between two dispatches
    fn dispatch_delay(&self) -> Duration {
        Duration::ZERO
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    /// First come, first served (also accepted as `fifo`)
    Fcfs,
    /// Coalesces identical pending `(sender, content)` submissions
    Lru,
    /// Arrival order with a fixed gap between dispatches
    RoundRobin,
    /// Highest priority first, FIFO within a priority
    Priority,
}

impl PolicyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyKind::Fcfs => "fcfs",
            PolicyKind::Lru => "lru",
            PolicyKind::RoundRobin => "round_robin",
            PolicyKind::Priority => "priority",
        }
    }

    /// Fresh, empty policy of this kind
    pub fn build(self, round_robin_delay: Duration) -> Box<dyn AdmissionPolicy> {
        match self {
            PolicyKind::Fcfs => Box::new(Fcfs::default()),
            PolicyKind::Lru => Box::new(LruCoalesce::default()),
            PolicyKind::RoundRobin => Box::new(RoundRobin::new(round_robin_delay)),
            PolicyKind::Priority => Box::new(PriorityQueue::default()),
        }
    }
}

impl FromStr for PolicyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "FCFS" | "FIFO" => Ok(PolicyKind::Fcfs),
            "LRU" => Ok(PolicyKind::Lru),
            "ROUND_ROBIN" | "RR" => Ok(PolicyKind::RoundRobin),
            "PRIORITY" => Ok(PolicyKind::Priority),
            _ => Err(s.to_string()),
        }
    }
}

impl std::fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strict arrival order
#[derive(Debug, Default)]
pub struct Fcfs {
    queue: VecDeque<Admission>,
}

impl AdmissionPolicy for Fcfs {
    fn kind(&self) -> PolicyKind {
        PolicyKind::Fcfs
    }

    fn admit(&mut self, admission: Admission) {
        self.queue.push_back(admission);
    }

    fn next(&mut self) -> Option<Admission> {
        self.queue.pop_front()
    }

    fn len(&self) -> usize {
        self.queue.len()
    }
}

/// Pending admissions keyed by `(sender, content)`
///
/// Resubmitting identical text before the first copy is dispatched refreshes
/// the pending entry instead of queueing a duplicate. Dispatch always takes
/// the entry with the oldest timestamp. Only pending entries are coalesced;
/// delivered history is never touched.
#[derive(Debug, Default)]
pub struct LruCoalesce {
    entries: HashMap<(String, String), Admission>,
    /// Arrival sequence index for oldest-first dispatch
    order: BTreeMap<u64, (String, String)>,
}

impl AdmissionPolicy for LruCoalesce {
    fn kind(&self) -> PolicyKind {
        PolicyKind::Lru
    }

    fn admit(&mut self, admission: Admission) {
        let key = (admission.sender.clone(), admission.content.clone());
        if let Some(previous) = self.entries.insert(key.clone(), admission.clone()) {
            self.order.remove(&previous.admitted_at.seq);
        }
        self.order.insert(admission.admitted_at.seq, key);
    }

    fn next(&mut self) -> Option<Admission> {
        let (_, key) = self.order.pop_first()?;
        self.entries.remove(&key)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Arrival order, one dispatch per time slice
///
/// Does not rotate between senders: a burst from one sender is served before
/// anyone who arrived later.
#[derive(Debug)]
pub struct RoundRobin {
    queue: VecDeque<Admission>,
    slice: Duration,
}

impl RoundRobin {
    pub fn new(slice: Duration) -> Self {
        Self {
            queue: VecDeque::new(),
            slice,
        }
    }
}

impl AdmissionPolicy for RoundRobin {
    fn kind(&self) -> PolicyKind {
        PolicyKind::RoundRobin
    }

    fn admit(&mut self, admission: Admission) {
        self.queue.push_back(admission);
    }

    fn next(&mut self) -> Option<Admission> {
        self.queue.pop_front()
    }

    fn len(&self) -> usize {
        self.queue.len()
    }

    fn dispatch_delay(&self) -> Duration {
        self.slice
    }
}

/// Highest priority first; earliest arrival first within a priority
#[derive(Debug, Default)]
pub struct PriorityQueue {
    // keyed by (priority, arrival seq); highest priority is the last band
    bands: BTreeMap<i32, BTreeMap<u64, Admission>>,
    len: usize,
}

impl AdmissionPolicy for PriorityQueue {
    fn kind(&self) -> PolicyKind {
        PolicyKind::Priority
    }

    fn admit(&mut self, admission: Admission) {
        self.bands
            .entry(admission.priority)
            .or_default()
            .insert(admission.admitted_at.seq, admission);
        self.len += 1;
    }

    fn next(&mut self) -> Option<Admission> {
        let admission = {
            let mut band = self.bands.last_entry()?;
            let admission = band.get_mut().pop_first().map(|(_, a)| a);
            if band.get().is_empty() {
                band.remove();
            }
            admission
        };
        if admission.is_some() {
            self.len -= 1;
        }
        admission
    }

    fn len(&self) -> usize {
        self.len
    }
}
