//! Regex engine selection.
//!
//! `regex` is the default engine; enabling `lite` swaps in `regex-lite`, which
//! exposes the same subset of the API used by this crate.

#[cfg(feature = "lite")]
pub(crate) use regex_lite::Regex;

#[cfg(all(feature = "regex", not(feature = "lite")))]
pub(crate) use regex::Regex;

#[cfg(not(any(feature = "regex", feature = "lite")))]
compile_error!("either the `regex` or the `lite` feature must be enabled");
