//! serline runtime metrics.
//!
//! Counters for traffic, ring utilization, and pool pressure, exposed through
//! metriken for scraping by whatever registry the embedding application runs.

use metriken::{Counter, metric};

// ── Traffic ──────────────────────────────────────────────────────

#[metric(
    name = "serline/messages/sent",
    description = "Write requests completed"
)]
pub static MESSAGES_SENT: Counter = Counter::new();

#[metric(
    name = "serline/messages/received",
    description = "Read completions dispatched"
)]
pub static MESSAGES_RECEIVED: Counter = Counter::new();

#[metric(name = "serline/bytes/sent", description = "Total bytes written")]
pub static BYTES_SENT: Counter = Counter::new();

#[metric(name = "serline/bytes/received", description = "Total bytes read")]
pub static BYTES_RECEIVED: Counter = Counter::new();

// ── Ring utilization ─────────────────────────────────────────────

#[metric(name = "serline/cqe/processed", description = "Total CQEs processed")]
pub static CQE_PROCESSED: Counter = Counter::new();

#[metric(
    name = "serline/sqe/submit_failures",
    description = "SQEs that found the submission queue full after a flush"
)]
pub static SQE_SUBMIT_FAILURES: Counter = Counter::new();

#[metric(
    name = "serline/submit/dropped",
    description = "Submissions dropped on submission queue exhaustion"
)]
pub static SUBMISSIONS_DROPPED: Counter = Counter::new();

// ── Pool pressure ────────────────────────────────────────────────

#[metric(
    name = "serline/pool/fallback_allocations",
    description = "Write buffer allocations taken when the pool was exhausted"
)]
pub static POOL_FALLBACK_ALLOCATIONS: Counter = Counter::new();
