pub mod extract;
pub mod stamp;

pub use extract::{extract, extract_into_store, ExtractionReport, StampExtraction};
pub use stamp::{Stamp, StampSize};
