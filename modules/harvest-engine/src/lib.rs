pub mod actions;
pub mod browser;
pub mod cancel;
pub mod engine;
pub mod http;
pub mod hybrid;
pub mod limiter;
pub mod retry;
pub mod testing;

pub use browser::{find_chromium, BrowserEngine};
pub use cancel::CancelToken;
pub use engine::{build_engine, Engine, FetchContext};
pub use http::HttpEngine;
pub use hybrid::HybridEngine;
pub use limiter::{HostLimiters, RateLimiter};
pub use retry::RetryPolicy;
