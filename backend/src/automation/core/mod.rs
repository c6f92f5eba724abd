pub mod browser;
pub mod cleanup;
pub mod page;
pub mod retry;
pub mod session;

pub use cleanup::TaskGuard;
pub use page::{query_as, BoardQuery, BrowserCookie, ClickMode, ElementState, PortalPage};
pub use retry::{RetryPolicy, Sleeper, TokioSleeper};
pub use session::{ChromeLauncher, SessionFactory};
