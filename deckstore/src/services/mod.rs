//! Services module
//!
//! Clients for the external services the store coordinates with.

pub mod ai;

pub use ai::{
    GeneratedImage, GeneratedSlide, GenerationApi, HttpGenerationApi, ImageSlide, ImagesRequest,
    OutlineRequest, SlidesRequest,
};
