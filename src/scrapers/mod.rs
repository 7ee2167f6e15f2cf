pub mod apify;
pub mod browser;
pub mod http;

pub use apify::JobScraper;
pub use browser::{BrowserScraper, BrowserlessBrowser};
pub use http::HttpScraper;
