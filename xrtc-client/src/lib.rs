//! # XRTC Item Exchange Client
//!
//! Purpose: Authenticate against the XRTC item API, push items to portals
//! and read them back in probe, watch or stream mode.
//!
//! ## Design Principles
//! 1. **One Engine, Two Front Ends**: The async [`Session`] implements the
//!    protocol; [`blocking::Session`] drives it on a private runtime.
//! 2. **Bounded Concurrency**: Every exchange passes through a per-session
//!    semaphore sized by `LIMIT_CONCURRENT_REQUESTS`.
//! 3. **Incremental Decoding**: Stream-mode responses are decoded line by
//!    line and yielded as they arrive.
//! 4. **Pluggable Seams**: HTTP goes through [`transport::HttpTransport`];
//!    diagnostics go through [`observer::SessionObserver`].
//!
//! ```no_run
//! use futures::StreamExt;
//! use xrtc_client::{ConfigLoader, GetRequest, Item, Mode, Portal, Session};
//!
//! # async fn run() -> xrtc_client::Result<()> {
//! let (credentials, config) = ConfigLoader::new().load()?;
//! let session = Session::open(&credentials, config).await?;
//! session.set_items([Item::new("portal", "hello")]).await?;
//!
//! let request = GetRequest::new([Portal::new("portal")]).mode(Mode::Stream);
//! let mut items = session.get(&request).await?;
//! while let Some(item) = items.next().await {
//!     println!("{}", item?.payload);
//! }
//! # Ok(())
//! # }
//! ```

pub mod blocking;
mod codec;
pub mod config;
mod gate;
pub mod observer;
mod session;
mod stream;
pub mod transport;

pub use codec::ChunkPolicy;
pub use config::{ConfigLoader, ConnectionConfig, Credentials, Limits, Timeouts, TlsOptions};
pub use observer::{MetricsObserver, MetricsSnapshot, SessionEvent, SessionObserver, TracingObserver};
pub use session::{Session, SessionOptions};
pub use stream::ItemStream;
pub use transport::{HttpTransport, ReqwestTransport};
pub use xrtc_common::{
    Endpoint, ErrorKind, GetRequest, Item, LoginResult, Mode, Portal, ProtocolError, Result,
    Schedule, SetRequest, MAX_SERIALIZED_JSON_SIZE, NO_CUTOFF,
};
