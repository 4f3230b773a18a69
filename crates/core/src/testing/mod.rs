//! Testing utilities and mock implementations.
//!
//! This module provides mock implementations of the pipeline's external
//! seams (HTTP transport, persistence, metadata source), allowing end-to-end
//! runs of the orchestrator without network or database.
//!
//! # Example
//!
//! ```rust,ignore
//! use harvester_core::testing::{fixtures, MockPersistence, MockSource, MockTransport};
//!
//! let transport = MockTransport::new();
//! transport.push(url, Ok(HttpResponse::ok(fixtures::png_bytes(2000, 1500), "image/png"))).await;
//!
//! let persistence = MockPersistence::new();
//! persistence.seed_source_link("mock", "Q1").await;
//! ```

mod mock_persistence;
mod mock_source;
mod mock_transport;

pub use mock_persistence::{MockPersistence, PersistenceOp};
pub use mock_source::MockSource;
pub use mock_transport::MockTransport;

/// Test fixtures and helper functions.
pub mod fixtures {
    use std::io::Cursor;

    use image::{ImageFormat, Rgb, RgbImage};

    use crate::source::{ImageVariant, SourceRecord};

    /// Encoded PNG of the given dimensions.
    pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let image = RgbImage::from_pixel(width, height, Rgb([200, 120, 40]));
        let mut bytes = Cursor::new(Vec::new());
        image
            .write_to(&mut bytes, ImageFormat::Png)
            .expect("encode png");
        bytes.into_inner()
    }

    /// An image variant on a fake CDN.
    pub fn variant(name: &str, width: u32, height: u32, mime: &str) -> ImageVariant {
        ImageVariant::new(
            format!("https://upload.example.org/{}", name),
            width,
            height,
            mime,
        )
    }

    /// A record from the `mock` source.
    pub fn record(scope: &str, native_id: &str, title: &str, variants: Vec<ImageVariant>) -> SourceRecord {
        SourceRecord {
            source: "mock".to_string(),
            native_id: Some(native_id.to_string()),
            canonical_ref: None,
            scope: scope.to_string(),
            title: title.to_string(),
            variants,
        }
    }
}
