//! Text processing: HTML-to-Markdown extraction and chunk splitting.
//!
//! [`extract`] turns a fetched HTML page into clean Markdown plus a page
//! title. [`split`] cuts that Markdown into retrieval-sized chunks, each
//! titled after the nearest preceding heading.

mod extract;
mod split;

pub use extract::{ExtractResult, extract};
pub use split::{CHUNK_OVERLAP, CHUNK_SIZE, split};
