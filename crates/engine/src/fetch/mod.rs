mod browser;
mod cache;
mod domain;
mod fetcher;
mod html;
mod pdf;
mod scheduler;

pub use browser::{BrowserRenderer, HttpGetRenderer};
pub use cache::FetchCache;
pub use domain::{extract_domain, looks_like_pdf_url};
pub use fetcher::{Fetcher, FetcherConfig, HtmlMode};
pub use pdf::{NaivePdfExtractor, PdfExtractor};
pub use scheduler::{FetchPermit, Scheduler};
