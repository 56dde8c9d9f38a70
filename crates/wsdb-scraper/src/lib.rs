pub mod canonical;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod headless;
pub mod image_cache;
pub mod normalize;
pub mod platforms;
pub mod rate_limit;
mod retry;
pub mod sanitize;
pub mod types;

pub use error::ScraperError;
pub use fetch::{FailureKind, FetchAttempt, FetchStrategy, Fetcher, PageRequest};
pub use headless::{BrowserlessRenderer, HeadlessPool, NoopRenderer, RenderError, Renderer};
pub use image_cache::{BadHashRegistry, CacheEntry, FsImageStore, ImageCache, ImageCacheError};
pub use normalize::normalize;
pub use platforms::{
    build_registry, AdapterRegistry, DetailFetch, DetailOptions, MarketplaceAdapter,
    PlatformAdapter, SearchOptions,
};
pub use rate_limit::{Clock, RateLimiter, SystemClock};
pub use retry::FETCH_BACKOFF_MS;
pub use types::{RawDetail, RawTier};
