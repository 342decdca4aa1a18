pub mod background;
pub mod cancel;
pub mod catalog;
pub mod consts;
pub mod error;
pub mod frame;
pub mod io;
pub mod observation;
pub mod pipeline;
pub mod similarity;
pub mod stamps;
pub mod stats;
pub mod store;
pub mod variance;
