//! Pipeline stages for PDF analysis.
//!
//! Each submodule implements one step. [`crate::analyze`] wires them together.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ encode ──▶ llm ──▶ parse
//! (upload)  (pdftoppm   (data URI) (chat    (JSON
//!            / magick)             request) recovery)
//! ```
//!
//! 1. [`input`]:      own the uploaded PDF and the per-request workspace
//! 2. [`converter`]:  find which external rasterizer is installed
//! 3. [`render`]:     run it and collect `page-<N>.png` files in page order
//! 4. [`encode`]:     wrap each PNG as a base64 data URI image part
//! 5. [`llm`]:        build chat messages and drive the completion gateway,
//!    including the schema-less retry; the only stage with network I/O
//! 6. [`parse`]:      recover a JSON value from a model answer

pub mod converter;
pub mod encode;
pub mod input;
pub mod llm;
pub mod parse;
pub mod render;
