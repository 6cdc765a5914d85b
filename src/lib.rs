//! Result cache and on-demand aggregation core for XPCS measurement
//! viewers.
//!
//! X-ray photon correlation spectroscopy produces one result file per
//! measurement; a viewing session works on an ordered selection of such
//! files. This crate keeps the selection ([`catalog::FileCatalog`]), an
//! in-memory copy of each selected file ([`cache::RecordCache`]), and the
//! derived multi-file views the display needs (the [`engine`] modules:
//! g2 correlation, tau-q relaxation, averaging, outlier masks, two-time
//! maps). [`session::ViewerSession`] ties the pieces together behind the
//! operations a host GUI calls; [`present`] turns engine results into
//! renderer-neutral curve and image bundles.
//!
//! Everything display-shaped stays out: no windowing, no plotting, no
//! threads. The host owns the event loop and runs the one long operation
//! (loading) wherever it likes, with a progress callback and a
//! [`cache::CancelToken`].

pub mod cache;
pub mod catalog;
pub mod data;
pub mod engine;
pub mod error;
pub mod present;
pub mod session;

pub use error::{Result, ViewerError};
pub use session::ViewerSession;
