//! Per-provider wire shapes for loaded images.
//!
//! Each provider wants the same bytes dressed differently: the Responses API
//! takes `input_image` items with a data URL, chat-format APIs take
//! `image_url` content blocks, and Gemini takes `inlineData` parts.

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use serde_json::{json, Value};

use crate::loader::LoadedImage;

fn data_url(image: &LoadedImage) -> String {
    format!("data:{};base64,{}", image.mime_type, B64.encode(&image.data))
}

/// Responses API: `{"type": "input_image", "image_url": "data:..."}`.
pub fn responses_blocks(images: &[LoadedImage]) -> Vec<Value> {
    images
        .iter()
        .map(|img| json!({ "type": "input_image", "image_url": data_url(img) }))
        .collect()
}

/// OpenAI-chat format: `{"type": "image_url", "image_url": {"url": "data:..."}}`.
pub fn chat_blocks(images: &[LoadedImage]) -> Vec<Value> {
    images
        .iter()
        .map(|img| json!({ "type": "image_url", "image_url": { "url": data_url(img) } }))
        .collect()
}

/// Gemini: `{"inlineData": {"mimeType": ..., "data": "<base64>"}}` parts.
pub fn gemini_parts(images: &[LoadedImage]) -> Vec<Value> {
    images
        .iter()
        .map(|img| {
            json!({ "inlineData": { "mimeType": img.mime_type, "data": B64.encode(&img.data) } })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::ImageSource;

    fn png() -> LoadedImage {
        LoadedImage {
            data: vec![0x89, 0x50, 0x4e, 0x47],
            mime_type: "image/png".into(),
            source: ImageSource::File,
            origin: "/tmp/a.png".into(),
        }
    }

    #[test]
    fn responses_shape_uses_data_url_string() {
        let blocks = responses_blocks(&[png()]);
        assert_eq!(blocks[0]["type"], "input_image");
        let url = blocks[0]["image_url"].as_str().unwrap();
        assert!(url.starts_with("data:image/png;base64,"));
    }

    #[test]
    fn chat_shape_nests_the_url() {
        let blocks = chat_blocks(&[png()]);
        assert_eq!(blocks[0]["type"], "image_url");
        assert!(blocks[0]["image_url"]["url"]
            .as_str()
            .unwrap()
            .starts_with("data:image/png;base64,"));
    }

    #[test]
    fn gemini_shape_carries_mime_and_raw_base64() {
        let blocks = gemini_parts(&[png()]);
        assert_eq!(blocks[0]["inlineData"]["mimeType"], "image/png");
        let b64 = blocks[0]["inlineData"]["data"].as_str().unwrap();
        assert_eq!(B64.decode(b64).unwrap(), vec![0x89, 0x50, 0x4e, 0x47]);
    }
}
