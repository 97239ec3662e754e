//! Common test utilities and fixtures.

pub mod requests;
pub mod services;

#[allow(unused_imports)]
pub use requests::*;
#[allow(unused_imports)]
pub use services::*;
