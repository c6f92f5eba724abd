pub mod arbiter;
pub mod core;
pub mod driver;
pub mod executor;
pub mod scraper;
pub mod scripts;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

pub use arbiter::{AccountWorker, Arbiter, PortalScrapeJob};
pub use driver::PortalDriver;
pub use executor::{ActionExecutor, Transcript};
pub use scraper::BoardScraper;
