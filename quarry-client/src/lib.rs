//! Typed client for the profiling query service probed by Quarry
//!
//! The [`QueryService`] trait is the capability seam the querier
//! drives; [`ConnectClient`] is the production implementation,
//! speaking Connect-style JSON over HTTP.

pub mod connect;
pub mod errors;
pub mod service;
pub mod types;

pub use connect::ConnectClient;
pub use errors::{ClientError, CODE_OK};
pub use service::QueryService;
pub use types::{
    Label, LabelSet, ProfileType, RangeSeries, ReportKind, Sample, TimeWindow,
};
