//! Data collection: provider collectors, the HTTP and retry plumbing they
//! share, the raw-record cache, and the orchestration that ties them
//! together.

pub mod blockchain;
pub mod cache;
pub mod download;
pub mod gdax;
pub mod kraken;
pub mod paginate;
pub mod provider;
pub mod reddit;
pub mod retry;
pub mod sentiment;
pub mod synthetic;
pub mod transport;
pub mod trends;

pub use cache::{CacheError, CacheLookup, CacheMeta, RawCache};
pub use download::{
    collect_all, collect_series, download_all, CollectError, CollectOptions, CollectProgress,
    CollectedSeries, CollectorSet, DownloadSummary, LogProgress, NoProgress, Origin,
};
pub use provider::{Collector, FetchError};
pub use retry::{ProviderClient, RecordingSleeper, RetryPolicy, Sleeper, ThreadSleeper};
pub use transport::{HttpResponse, HttpTransport, ReqwestTransport, ScriptedTransport, TransportError};
