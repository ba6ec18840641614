#![warn(
    clippy::pedantic,
    clippy::nursery,
    clippy::style,
    clippy::unwrap_used,
    clippy::expect_used
)]
#![allow(clippy::missing_errors_doc)]

pub mod digest;
pub mod importer;
pub mod partner;
pub mod session;
