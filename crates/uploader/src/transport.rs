//! Transport seam between the engine and the gallery backend.

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use shuttersync_gallery_api::{
    ApiError, CompleteMultipartRequest, CreateAssetRequest, GalleryClient, MultipartTicket,
    SinglePartTicket,
};

/// Abstract gallery backend.
///
/// Workers talk to storage through this trait so tests can script responses
/// without a network. [`GalleryClient`] is the production implementation.
pub trait GalleryTransport: Send + Sync {
    /// Negotiates a single-part upload and returns its form ticket.
    fn negotiate_single(
        &self,
        req: &CreateAssetRequest,
    ) -> Pin<Box<dyn Future<Output = Result<SinglePartTicket, ApiError>> + Send + '_>>;

    /// Negotiates a multipart session and returns its destination list.
    fn negotiate_multipart(
        &self,
        req: &CreateAssetRequest,
    ) -> Pin<Box<dyn Future<Output = Result<MultipartTicket, ApiError>> + Send + '_>>;

    /// Stores one part and returns the etag storage reported for it.
    fn put_part(
        &self,
        url: &str,
        data: Bytes,
    ) -> Pin<Box<dyn Future<Output = Result<String, ApiError>> + Send + '_>>;

    /// Stores a whole small file through its form ticket.
    fn post_form(
        &self,
        ticket: &SinglePartTicket,
        file_name: &str,
        data: Bytes,
    ) -> Pin<Box<dyn Future<Output = Result<(), ApiError>> + Send + '_>>;

    /// Finalizes a multipart session from its ordered part list.
    fn finish_multipart(
        &self,
        req: &CompleteMultipartRequest,
    ) -> Pin<Box<dyn Future<Output = Result<(), ApiError>> + Send + '_>>;
}

impl GalleryTransport for GalleryClient {
    fn negotiate_single(
        &self,
        req: &CreateAssetRequest,
    ) -> Pin<Box<dyn Future<Output = Result<SinglePartTicket, ApiError>> + Send + '_>> {
        let req = req.clone();
        Box::pin(async move { self.create_single(&req).await })
    }

    fn negotiate_multipart(
        &self,
        req: &CreateAssetRequest,
    ) -> Pin<Box<dyn Future<Output = Result<MultipartTicket, ApiError>> + Send + '_>> {
        let req = req.clone();
        Box::pin(async move { self.create_multipart(&req).await })
    }

    fn put_part(
        &self,
        url: &str,
        data: Bytes,
    ) -> Pin<Box<dyn Future<Output = Result<String, ApiError>> + Send + '_>> {
        let url = url.to_owned();
        Box::pin(async move { self.upload_part(&url, data).await })
    }

    fn post_form(
        &self,
        ticket: &SinglePartTicket,
        file_name: &str,
        data: Bytes,
    ) -> Pin<Box<dyn Future<Output = Result<(), ApiError>> + Send + '_>> {
        let ticket = ticket.clone();
        let file_name = file_name.to_owned();
        Box::pin(async move { self.upload_form(&ticket, &file_name, data).await })
    }

    fn finish_multipart(
        &self,
        req: &CompleteMultipartRequest,
    ) -> Pin<Box<dyn Future<Output = Result<(), ApiError>> + Send + '_>> {
        let req = req.clone();
        Box::pin(async move { self.complete_multipart(&req).await })
    }
}
