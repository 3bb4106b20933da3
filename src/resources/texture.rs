use anyhow::anyhow;
use image::{DynamicImage, RgbImage, RgbaImage};

use crate::data_structures::texture::Texture;

#[cfg(target_arch = "wasm32")]
fn format_url(file_name: &str) -> anyhow::Result<reqwest::Url> {
    let window = web_sys::window().ok_or_else(|| anyhow!("no window"))?;
    let origin = window
        .location()
        .origin()
        .map_err(|_| anyhow!("window location has no origin"))?;
    let base = reqwest::Url::parse(&format!("{}/assets/", origin))?;
    Ok(base.join(file_name)?)
}

/// Reads `assets/<file_name>` natively, or fetches it relative to the page
/// origin on wasm.
pub async fn load_binary(file_name: &str) -> anyhow::Result<Vec<u8>> {
    #[cfg(target_arch = "wasm32")]
    let data = {
        let url = format_url(file_name)?;
        reqwest::get(url).await?.bytes().await?.to_vec()
    };
    #[cfg(not(target_arch = "wasm32"))]
    let data = {
        let path = std::path::Path::new("./").join("assets").join(file_name);
        tokio::fs::read(path).await?
    };

    Ok(data)
}

pub async fn load_texture(file_name: &str, format: Option<&str>) -> anyhow::Result<Texture> {
    let data = load_binary(file_name).await?;
    Texture::from_bytes(&data, file_name, format)
}

/// Converts pixels decoded by the glTF importer. Formats without an 8-bit
/// RGB(A) layout keep only their dimensions.
pub fn from_gltf_image(name: &str, data: &gltf::image::Data) -> Texture {
    let pixels = data.pixels.clone();
    let image = match data.format {
        gltf::image::Format::R8G8B8A8 => RgbaImage::from_raw(data.width, data.height, pixels),
        gltf::image::Format::R8G8B8 => RgbImage::from_raw(data.width, data.height, pixels)
            .map(|rgb| DynamicImage::ImageRgb8(rgb).to_rgba8()),
        _ => None,
    };
    match image {
        Some(image) => Texture::from_image(name, image),
        None => {
            log::debug!("texture {} kept without pixels ({:?})", name, data.format);
            Texture::placeholder(name, data.width, data.height)
        }
    }
}

/// Decodes every image of a glTF document, in image index order. An image
/// that cannot be decoded becomes an empty placeholder.
pub async fn load_images(document: &gltf::Document, buffers: &[Vec<u8>]) -> Vec<Texture> {
    let mut textures = Vec::new();
    for image in document.images() {
        let name = image
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("image_{}", image.index()));
        let texture = match image.source() {
            gltf::image::Source::View { view, mime_type } => buffers
                .get(view.buffer().index())
                .and_then(|buffer| buffer.get(view.offset()..view.offset() + view.length()))
                .ok_or_else(|| anyhow!("buffer view {} is out of range", view.index()))
                .and_then(|bytes| Texture::from_bytes(bytes, &name, mime_type.split('/').last())),
            gltf::image::Source::Uri { uri, mime_type } => {
                load_texture(uri, mime_type.and_then(|mt| mt.split('/').last())).await
            }
        };
        textures.push(texture.unwrap_or_else(|err| {
            log::warn!("image {} could not be decoded: {}", name, err);
            Texture::placeholder(&name, 0, 0)
        }));
    }
    textures
}
