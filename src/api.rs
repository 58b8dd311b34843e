//! Stable, supported API surface for embedding fetch-har.
//!
//! This module re-exports the types and functions intended for external use.
//! Treat the contents of this module as SemVer-stable.

pub use crate::capture::{
    with_har, CallOptions, CaptureOptions, EntryCallback, HarDefaults, HarFetch, HarFetchBuilder,
    HarTarget,
};
pub use crate::correlation::{CorrelationStore, CorrelationToken, PendingEntry, HEADER_NAME};
pub use crate::error::{Error, Result};
pub use crate::fetch::{
    BufferedResponseFactory, Client, Fetch, FetchOptions, FetchRequest, FetchResponse,
    RedirectPolicy, ResponseBody, ResponseFactory, ResponseParts,
};
pub use crate::har::{
    create_har_log, parse_har_file, write_har_file, Browser, Cache, Content, Cookie, Creator,
    Entry, Har, Header, Log, Page, PageInfo, PageTimings, PostData, PostParam, QueryParam,
    Request, Response, SharedHarLog, Timings,
};
pub use crate::normalize::{build_headers, HeaderSource};
pub use crate::size::parse_size_bytes;
pub use crate::timing::{reconcile, Timestamps};
pub use crate::transport::{
    adapter::from_fn, HyperTransport, Instrumented, Lifecycle, LifecycleListener, Peer, Probe,
    SharedTransport, Transport, TransportConfig,
};
