//! Filename classification.
//!
//! Everything here is a pure, total function of the file name: the importer
//! never inspects payload bytes to decide what an entry is.

use crate::models::resource::Gender;
use std::path::Path;

/// Binary formats the importer accepts. The extension is the only discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetFormat {
    Glb,
    Gltf,
    Fbx,
    Obj,
    Stl,
    Usdz,
    Dae,
    Png,
    Jpeg,
    Ktx2,
    Hdr,
    Exr,
}

impl AssetFormat {
    /// Format for `path`, or `None` when the extension is not accepted.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        let format = match ext.as_str() {
            "glb" => AssetFormat::Glb,
            "gltf" => AssetFormat::Gltf,
            "fbx" => AssetFormat::Fbx,
            "obj" => AssetFormat::Obj,
            "stl" => AssetFormat::Stl,
            "usdz" => AssetFormat::Usdz,
            "dae" => AssetFormat::Dae,
            "png" => AssetFormat::Png,
            "jpg" | "jpeg" => AssetFormat::Jpeg,
            "ktx2" => AssetFormat::Ktx2,
            "hdr" => AssetFormat::Hdr,
            "exr" => AssetFormat::Exr,
            _ => return None,
        };
        Some(format)
    }

    pub fn extension(self) -> &'static str {
        match self {
            AssetFormat::Glb => "glb",
            AssetFormat::Gltf => "gltf",
            AssetFormat::Fbx => "fbx",
            AssetFormat::Obj => "obj",
            AssetFormat::Stl => "stl",
            AssetFormat::Usdz => "usdz",
            AssetFormat::Dae => "dae",
            AssetFormat::Png => "png",
            AssetFormat::Jpeg => "jpg",
            AssetFormat::Ktx2 => "ktx2",
            AssetFormat::Hdr => "hdr",
            AssetFormat::Exr => "exr",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            AssetFormat::Glb => "model/gltf-binary",
            AssetFormat::Gltf => "model/gltf+json",
            AssetFormat::Fbx => "application/octet-stream",
            AssetFormat::Obj => "model/obj",
            AssetFormat::Stl => "model/stl",
            AssetFormat::Usdz => "model/vnd.usdz+zip",
            AssetFormat::Dae => "model/vnd.collada+xml",
            AssetFormat::Png => "image/png",
            AssetFormat::Jpeg => "image/jpeg",
            AssetFormat::Ktx2 => "image/ktx2",
            AssetFormat::Hdr => "image/vnd.radiance",
            AssetFormat::Exr => "image/x-exr",
        }
    }

    /// Formats that can carry skeletal animation.
    pub fn is_model(self) -> bool {
        matches!(
            self,
            AssetFormat::Glb
                | AssetFormat::Gltf
                | AssetFormat::Fbx
                | AssetFormat::Usdz
                | AssetFormat::Dae
        )
    }
}

/// Gender tag for an animation file.
///
/// Case-insensitive substring match; `female` wins over `male` (which it
/// contains), and a name with neither is `Unisex`.
pub fn infer_gender(file_name: &str) -> Gender {
    let lower = file_name.to_lowercase();
    if lower.contains("female") {
        Gender::Female
    } else if lower.contains("male") {
        Gender::Male
    } else {
        Gender::Unisex
    }
}

const ANIMATION_TYPES: [&str; 12] = [
    "idle", "walk", "run", "jump", "dance", "wave", "sit", "attack", "death", "emote", "talk",
    "turn",
];

/// First token of the stem that names a known motion, else `other`.
pub fn infer_animation_type(file_name: &str) -> &'static str {
    tokens(stem(file_name))
        .find_map(|token| {
            ANIMATION_TYPES
                .iter()
                .find(|t| t.eq_ignore_ascii_case(token))
                .copied()
        })
        .unwrap_or("other")
}

/// Trailing numeric token of the stem (`walk_02` → 2), else 1.
pub fn infer_version(file_name: &str) -> i64 {
    tokens(stem(file_name))
        .last()
        .filter(|t| t.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|t| t.parse::<i64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(1)
}

/// Record name: the file name with its extension stripped.
pub fn display_name(file_name: &str) -> String {
    stem(file_name).to_string()
}

/// Lowercase slug of the stem, runs of non-alphanumerics collapsed to `-`.
///
/// Falls back to `asset` for names without any alphanumeric character.
pub fn resource_slug(file_name: &str) -> String {
    let mut slug = String::with_capacity(file_name.len());
    let mut pending_dash = false;
    for c in stem(file_name).chars() {
        if c.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.extend(c.to_lowercase());
        } else {
            pending_dash = true;
        }
    }
    if slug.is_empty() {
        "asset".to_string()
    } else {
        slug
    }
}

fn stem(file_name: &str) -> &str {
    match file_name.rfind('.') {
        Some(0) | None => file_name,
        Some(idx) => &file_name[..idx],
    }
}

fn tokens(stem: &str) -> impl Iterator<Item = &str> {
    stem.split(|c: char| c == '_' || c == '-' || c == '.' || c.is_whitespace())
        .filter(|t| !t.is_empty())
}
