//! Gallery backend API client.
//!
//! Typed wire model and async HTTP client for the upload flow: asset
//! negotiation (`POST /assets`), presigned part transfers, and multipart
//! completion. The transfer engine talks to this crate through a trait seam
//! so tests can script responses without a network.

pub mod client;
pub mod types;

pub use client::{ApiError, GalleryClient};
pub use types::{
    CompleteMultipartRequest, CompletedPart, CreateAssetRequest, MultipartTicket,
    SinglePartTicket, TransferMode,
};
