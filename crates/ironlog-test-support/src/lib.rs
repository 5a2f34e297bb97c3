//! Shared test fakes and utilities for the Ironlog delivery pipeline.

mod clock;
mod metrics;
mod repository;
mod rng;
mod trigger;

pub use clock::{FixedClock, ManualClock};
pub use metrics::{MetricEvent, RecordingMetrics};
pub use repository::{FailingStore, InMemoryEventStore, InMemoryNotificationStore};
pub use rng::{MockRng, SequenceRng};
pub use trigger::RecordingTrigger;
