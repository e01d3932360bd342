#[cfg(feature = "browser")]
pub mod browser_session;
pub mod http_session;
pub mod sites;

#[cfg(feature = "browser")]
pub use browser_session::BrowserBackend;
pub use http_session::HttpBackend;
pub use sites::{DEFAULT_TIMEOUT, RetailSite, SiteAdapter, default_adapters};
