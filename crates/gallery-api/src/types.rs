//! Wire types for the gallery upload API.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Negotiation
// ---------------------------------------------------------------------------

/// How a file travels to storage.
///
/// Serialized into the asset-creation request so the backend issues either a
/// single form-upload ticket or a set of presigned part destinations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferMode {
    #[serde(rename = "single")]
    Single,
    #[serde(rename = "multipart")]
    Multipart,
}

/// Asks the backend to create an asset and issue upload destinations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAssetRequest {
    pub gallery_id: String,
    pub name: String,
    pub content_length: u64,
    pub transfer_mode: TransferMode,
}

/// Single-part upload ticket: one form POST carries the whole file.
///
/// `fields` must be included in the form body ahead of the file part; the
/// backend signs them and storage rejects the POST if any are missing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SinglePartTicket {
    pub upload_url: String,
    #[serde(default)]
    pub fields: HashMap<String, String>,
}

/// Multipart upload ticket: presigned PUT destinations, one per part.
///
/// The destination count encodes the chunk size the backend expects
/// (`floor(size / chunk) + 1`); the planner recovers it from the count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultipartTicket {
    pub part_urls: Vec<String>,
    pub upload_id: String,
    pub storage_key: String,
}

// ---------------------------------------------------------------------------
// Completion
// ---------------------------------------------------------------------------

/// One successfully stored part, identified for server-side assembly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedPart {
    pub etag: String,
    pub part_number: u32,
}

/// Finalizes a multipart upload from its recorded parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteMultipartRequest {
    pub storage_key: String,
    pub upload_id: String,
    pub parts: Vec<CompletedPart>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_mode_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&TransferMode::Single).unwrap(),
            r#""single""#
        );
        assert_eq!(
            serde_json::to_string(&TransferMode::Multipart).unwrap(),
            r#""multipart""#
        );
    }

    #[test]
    fn create_asset_request_uses_camel_case() {
        let req = CreateAssetRequest {
            gallery_id: "gal-1".into(),
            name: "sunset.raw".into(),
            content_length: 125_829_120,
            transfer_mode: TransferMode::Multipart,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains(r#""galleryId":"gal-1""#));
        assert!(json.contains(r#""contentLength":125829120"#));
        assert!(json.contains(r#""transferMode":"multipart""#));
    }

    #[test]
    fn single_ticket_parses_with_fields() {
        let json = r#"{
            "uploadUrl": "https://storage.example/bucket",
            "fields": {"key": "assets/abc", "policy": "xyz"}
        }"#;
        let ticket: SinglePartTicket = serde_json::from_str(json).unwrap();
        assert_eq!(ticket.upload_url, "https://storage.example/bucket");
        assert_eq!(ticket.fields.len(), 2);
        assert_eq!(ticket.fields["key"], "assets/abc");
    }

    #[test]
    fn single_ticket_fields_default_when_absent() {
        let ticket: SinglePartTicket =
            serde_json::from_str(r#"{"uploadUrl": "https://storage.example/b"}"#).unwrap();
        assert!(ticket.fields.is_empty());
    }

    #[test]
    fn multipart_ticket_preserves_url_order() {
        let json = r#"{
            "partUrls": ["https://s/1", "https://s/2", "https://s/3"],
            "uploadId": "up-77",
            "storageKey": "assets/xyz"
        }"#;
        let ticket: MultipartTicket = serde_json::from_str(json).unwrap();
        assert_eq!(ticket.part_urls.len(), 3);
        assert_eq!(ticket.part_urls[0], "https://s/1");
        assert_eq!(ticket.part_urls[2], "https://s/3");
        assert_eq!(ticket.upload_id, "up-77");
    }

    #[test]
    fn complete_request_round_trips() {
        let req = CompleteMultipartRequest {
            storage_key: "assets/xyz".into(),
            upload_id: "up-77".into(),
            parts: vec![
                CompletedPart {
                    etag: "e1".into(),
                    part_number: 1,
                },
                CompletedPart {
                    etag: "e2".into(),
                    part_number: 2,
                },
            ],
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains(r#""storageKey":"assets/xyz""#));
        assert!(json.contains(r#""partNumber":1"#));

        let back: CompleteMultipartRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, req);
    }
}
