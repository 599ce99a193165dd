//! Common test utilities for satfetch integration tests

#[allow(dead_code)]
pub mod browser;
#[allow(dead_code)]
pub mod config;
#[allow(dead_code)]
pub mod ftp_server;
#[allow(dead_code)]
pub mod http_server;

#[allow(unused_imports)]
pub use browser::*;
#[allow(unused_imports)]
pub use config::*;
#[allow(unused_imports)]
pub use ftp_server::*;
#[allow(unused_imports)]
pub use http_server::*;
