//! Translation-time error surface.
//!
//! All variants are fatal to the CLI: the process reports the error and
//! exits nonzero without writing any output. Runtime dispatch misses are not
//! errors and never appear here.

use std::io;

use runtime_core::CartridgeError;
use thiserror::Error;

/// Fatal failures of the translation pipeline.
#[derive(Debug, Error)]
pub enum TranslateError {
    /// The cartridge image failed header validation.
    #[error(transparent)]
    Cartridge(#[from] CartridgeError),
    /// Static analysis decoded more instructions than `--limit` allows.
    #[error("analysis limit of {limit} instructions reached")]
    AnalyzerLimitReached {
        /// The configured instruction budget.
        limit: usize,
    },
    /// Reading the image or writing the output project failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    use super::TranslateError;
    use runtime_core::CartridgeError;

    #[test]
    fn cartridge_errors_convert_transparently() {
        let error: TranslateError = CartridgeError::UnsupportedMbc(0x42).into();
        assert!(error.to_string().contains("unsupported MBC"));
    }

    #[test]
    fn limit_error_reports_budget() {
        let error = TranslateError::AnalyzerLimitReached { limit: 1000 };
        assert_eq!(error.to_string(), "analysis limit of 1000 instructions reached");
    }
}
