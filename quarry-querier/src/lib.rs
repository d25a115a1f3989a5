//! Probe pipeline orchestrator for the Quarry prober
//!
//! [`Querier`] owns the fixed pipeline of probe operations and the
//! expiring caches that connect discovery to the dependent queries.
//! [`ObservationSink`] is the seam metrics flow through;
//! [`PrometheusSink`] is the production implementation.

pub mod clock;
pub mod metrics;
pub mod querier;

pub use clock::{Clock, SystemClock};
pub use metrics::{Dimensions, NoopSink, ObservationSink, ProbeOp, PrometheusSink};
pub use querier::{Querier, SeriesSpan, PIXEL_BUDGET};
