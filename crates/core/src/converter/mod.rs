//! Converter module: the external document converter contract.
//!
//! The [`Converter`] trait describes a single-file conversion bounded by a
//! timeout. [`LibreOfficeConverter`] implements it by running a headless
//! office process with a private profile directory per invocation, so that
//! concurrent conversions never share profile state.

mod config;
mod error;
mod libreoffice;
mod traits;
mod types;

pub use config::ConverterConfig;
pub use error::ConverterError;
pub use libreoffice::LibreOfficeConverter;
pub use traits::Converter;
pub use types::{ConversionJob, ConversionResult};

pub(crate) use types::expected_output;
