//! Convenience prelude for common fetch-har embedding tasks.

pub use crate::api::{
    with_har, CallOptions, Client, Entry, Error, Fetch, FetchRequest, FetchResponse, HarDefaults,
    HarFetch, HarTarget, HyperTransport, Result, SharedHarLog, TransportConfig,
};
