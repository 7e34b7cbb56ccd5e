//! Embedding providers implementing `blitz_core::memory::embedder::Embedder`.

pub mod openai;
