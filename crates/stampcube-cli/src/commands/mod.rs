pub mod config;
pub mod info;
pub mod run;
pub mod similar;
pub mod stamps;
pub mod subtract;
pub mod variance;
