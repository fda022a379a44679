//! Stream selection, admission control and HTTP fetching.

pub mod gate;
pub mod http;
pub mod stream_selector;

pub use gate::{AdmissionPermit, ConcurrencyGate};
pub use http::{
    DEFAULT_REQUEST_TIMEOUT, DEFAULT_USER_AGENT, DownloadError, Fetcher, HttpDownloader,
};
pub use stream_selector::{Selection, StreamSelectionConfig, StreamSelector, select_streams};
