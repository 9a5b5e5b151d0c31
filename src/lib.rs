//! compgraph: CLI front end for the component graph controller.
//!
//! The binary lives in `main.rs`; what it prints is built here so it can be
//! tested without running the controller.

pub mod render;
