//! Governed HTTP fetching with bounded retries.
//!
//! Every outbound call goes through a [`FetchRetryEngine`]: it takes a slot
//! from the origin's rate governor (and bandwidth capacity for downloads),
//! performs one attempt through an [`HttpTransport`], and decides between
//! returning, retrying after a backoff, or failing.

mod engine;
mod error;
mod mime;
mod retry_after;
mod transport;
mod types;

pub use engine::{sha256_hex, FetchKind, FetchRetryEngine};
pub use error::{message_indicates_rate_limit, FailureKind, FetchError};
pub use mime::{extension_for_mime, normalize_mime, UNKNOWN_EXTENSION};
pub use retry_after::parse_retry_after;
pub use transport::{HttpTransport, ReqwestTransport};
pub use types::{DownloadedAsset, HttpRequest, HttpResponse, TransportError};
