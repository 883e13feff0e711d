pub mod browser;
pub mod scroll;
pub mod traits;
pub mod types;

pub use browser::{ChromeFetcher, ChromeImageSource};
pub use scroll::{ScrollController, ScrollOutcome, ScrollSettings, StopReason};
pub use traits::{ContinuationStrategy, PageFetcher, ScrollPage};
pub use types::{set_rows_param, SearchParams};
