use crate::error::{Error, Result};
use crate::mutate::{round_kb, today};
use crate::node::Node;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::io::{Cursor, Write};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Decode a node's inline payload. Data-URL and bare base64 payloads are
/// decoded; anything else is taken as literal text bytes.
pub fn decode_content(content: &str) -> Vec<u8> {
    let raw = match content.split_once(";base64,") {
        Some((_, b64)) => b64,
        None => content,
    };
    STANDARD
        .decode(raw)
        .unwrap_or_else(|_| content.as_bytes().to_vec())
}

/// Build the zip archive node for a source file: one deflate entry carrying
/// the source content, payload stored back as base64, size recomputed from
/// the compressed bytes.
pub fn compress_node(source: &Node, archive_name: &str) -> Result<Node> {
    let content = source
        .content
        .as_deref()
        .ok_or_else(|| Error::NotFound(format!("{} has no content to compress", source.name)))?;
    let bytes = decode_content(content);

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    writer.start_file(source.name.as_str(), options)?;
    writer.write_all(&bytes)?;
    let archive = writer.finish()?.into_inner();

    Ok(Node {
        id: format!("{}-zip", source.id),
        name: format!("{archive_name}.zip"),
        parent_id: source.parent_id.clone(),
        is_folder: false,
        date: today(),
        size: Some(round_kb(archive.len() as u64)),
        kind: Some("application/zip".to_string()),
        content: Some(STANDARD.encode(&archive)),
        tags: vec![],
        versions: vec![],
    })
}
