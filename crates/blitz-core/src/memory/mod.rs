pub mod box_embedder;
pub mod clock;
pub mod embedder;
pub mod service;
pub mod similarity;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;
