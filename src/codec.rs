use crate::TexError;
use image::{RgbaImage, imageops};

/// Images with both dimensions under this stay uncompressed: block compression
/// on tiny textures trades too much quality for too little memory.
pub const SMALL_IMAGE_THRESHOLD: u32 = 128;

/// Long-edge cap applied when downscaling is enabled.
pub const MAX_TEXTURE_EDGE: u32 = 2048;

const HEADER_LEN: usize = 128;
const DDS_MAGIC: &[u8; 4] = b"DDS ";
const FOURCC_DXT1: &[u8; 4] = b"DXT1";
const FOURCC_DXT5: &[u8; 4] = b"DXT5";

// DDSD_CAPS | DDSD_HEIGHT | DDSD_WIDTH | DDSD_PIXELFORMAT | DDSD_LINEARSIZE
const DDS_HEADER_FLAGS: u32 = 0x1 | 0x2 | 0x4 | 0x1000 | 0x0008_0000;
const DDPF_FOURCC: u32 = 0x4;
const DDSCAPS_TEXTURE: u32 = 0x1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    /// Uncompressed, straight from decode (small-image bypass).
    Rgba8,
    /// Opaque block format, 8 bytes per 4x4 block (DXT1).
    Bc1,
    /// Alpha-capable block format, 16 bytes per 4x4 block (DXT5).
    Bc3,
}

impl TextureFormat {
    const fn block_bytes(self) -> usize {
        match self {
            Self::Rgba8 => 0,
            Self::Bc1 => 8,
            Self::Bc3 => 16,
        }
    }

    /// Byte length of one image's pixel payload in this format.
    pub fn payload_len(self, width: u32, height: u32) -> usize {
        match self {
            Self::Rgba8 => width as usize * height as usize * 4,
            Self::Bc1 | Self::Bc3 => {
                let bx = width.div_ceil(4) as usize;
                let by = height.div_ceil(4) as usize;
                bx * by * self.block_bytes()
            }
        }
    }

    const fn four_cc(self) -> Option<&'static [u8; 4]> {
        match self {
            Self::Rgba8 => None,
            Self::Bc1 => Some(FOURCC_DXT1),
            Self::Bc3 => Some(FOURCC_DXT5),
        }
    }

    fn from_four_cc(tag: &[u8]) -> Option<Self> {
        match tag {
            t if t == FOURCC_DXT1 => Some(Self::Bc1),
            t if t == FOURCC_DXT5 => Some(Self::Bc3),
            _ => None,
        }
    }
}

/// A resident texture: decoded-then-compressed pixels plus their shape.
#[derive(Debug, Clone)]
pub struct Texture {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub data: Vec<u8>,
}

impl Texture {
    /// Actual in-memory footprint of the pixel payload.
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }
}

/// Block-format selection for [`compress`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressVariant {
    Opaque,
    AlphaOrNormal,
}

pub fn decode(bytes: &[u8]) -> Result<RgbaImage, TexError> {
    Ok(image::load_from_memory(bytes)?.to_rgba8())
}

/// True if any pixel is below full opacity.
pub fn has_alpha(img: &RgbaImage) -> bool {
    img.pixels().any(|p| p.0[3] < 255)
}

/// Repacks a normal map for the alpha-capable block format: the X component
/// moves into the alpha channel so the decompressor's higher-precision alpha
/// block carries it. out.r = in.a; out.a = in.g; g and b unchanged.
pub fn repack_normal(img: &mut RgbaImage) {
    for px in img.pixels_mut() {
        let [_, g, b, a] = px.0;
        px.0 = [a, g, b, g];
    }
}

/// Bilinearly resamples so each dimension is at most `limit`, leaving images
/// already inside the limit untouched.
pub fn downscale_to_limit(img: RgbaImage, limit: u32) -> RgbaImage {
    let (w, h) = (img.width(), img.height());
    if w.max(h) <= limit {
        return img;
    }
    let nw = w.min(limit);
    let nh = h.min(limit);
    imageops::resize(&img, nw, nh, imageops::FilterType::Triangle)
}

/// Format [`compress`] will produce for a given shape and variant. Lets the
/// caller shop the pool for a reusable buffer before encoding starts.
pub fn output_format(width: u32, height: u32, variant: CompressVariant) -> TextureFormat {
    if width < SMALL_IMAGE_THRESHOLD && height < SMALL_IMAGE_THRESHOLD {
        TextureFormat::Rgba8
    } else {
        match variant {
            CompressVariant::Opaque => TextureFormat::Bc1,
            CompressVariant::AlphaOrNormal => TextureFormat::Bc3,
        }
    }
}

/// Block-compresses a decoded image, or returns it as-is when both dimensions
/// are under [`SMALL_IMAGE_THRESHOLD`]. `scratch` lets the caller recycle an
/// evicted buffer; it is cleared before use.
pub fn compress(img: &RgbaImage, variant: CompressVariant, scratch: Option<Vec<u8>>) -> Texture {
    let (width, height) = (img.width(), img.height());
    let mut out = scratch.unwrap_or_default();
    out.clear();

    let format = output_format(width, height, variant);
    if format == TextureFormat::Rgba8 {
        out.extend_from_slice(img.as_raw());
        return Texture {
            width,
            height,
            format,
            data: out,
        };
    }
    out.reserve(format.payload_len(width, height));

    for by in 0..height.div_ceil(4) {
        for bx in 0..width.div_ceil(4) {
            let block = gather_block(img, bx * 4, by * 4);
            match format {
                TextureFormat::Bc1 => encode_bc1_block(&block, &mut out),
                TextureFormat::Bc3 => encode_bc3_block(&block, &mut out),
                TextureFormat::Rgba8 => unreachable!(),
            }
        }
    }

    Texture {
        width,
        height,
        format,
        data: out,
    }
}

/// Serializes a block-compressed texture as a 128-byte DDS header plus raw
/// payload. Uncompressed textures have no container form.
pub fn encode_container(tex: &Texture) -> Result<Vec<u8>, TexError> {
    let Some(four_cc) = tex.format.four_cc() else {
        return Err(TexError::CorruptCache(
            "uncompressed textures are not containerized".to_string(),
        ));
    };

    let mut out = vec![0u8; HEADER_LEN];
    out[0..4].copy_from_slice(DDS_MAGIC);
    out[4..8].copy_from_slice(&124u32.to_le_bytes()); // header struct size
    out[8..12].copy_from_slice(&DDS_HEADER_FLAGS.to_le_bytes());
    out[12..16].copy_from_slice(&tex.height.to_le_bytes());
    out[16..20].copy_from_slice(&tex.width.to_le_bytes());
    out[20..24].copy_from_slice(&(tex.data.len() as u32).to_le_bytes());
    // depth, mipmap count and the reserved block stay zero.
    out[76..80].copy_from_slice(&32u32.to_le_bytes()); // pixelformat struct size
    out[80..84].copy_from_slice(&DDPF_FOURCC.to_le_bytes());
    out[84..88].copy_from_slice(four_cc);
    out[108..112].copy_from_slice(&DDSCAPS_TEXTURE.to_le_bytes());
    out.extend_from_slice(&tex.data);
    Ok(out)
}

/// Validates a cache artifact's header and reports the shape and format of
/// the texture inside. Lets the caller shop the pool for a matching buffer
/// before committing to the payload copy in [`decode_container`].
pub fn container_header(bytes: &[u8]) -> Result<(u32, u32, TextureFormat), TexError> {
    if bytes.len() <= HEADER_LEN {
        return Err(TexError::CorruptCache(format!(
            "artifact too short ({} bytes)",
            bytes.len()
        )));
    }
    if &bytes[0..4] != DDS_MAGIC {
        return Err(TexError::CorruptCache("bad magic signature".to_string()));
    }

    let height = u32::from_le_bytes(bytes[12..16].try_into().unwrap());
    let width = u32::from_le_bytes(bytes[16..20].try_into().unwrap());
    let format = TextureFormat::from_four_cc(&bytes[84..88]).ok_or_else(|| {
        TexError::CorruptCache(format!("unrecognized format tag {:?}", &bytes[84..88]))
    })?;

    if width == 0 || height == 0 {
        return Err(TexError::CorruptCache(format!(
            "degenerate dimensions {width}x{height}"
        )));
    }
    Ok((width, height, format))
}

/// Parses a cache artifact back into a texture. Anything that does not look
/// like a container we wrote is reported as corrupt so the caller can delete
/// the artifact and recompress from source. `scratch` lets the caller recycle
/// a pooled buffer of the right shape; it is cleared before use.
pub fn decode_container(bytes: &[u8], scratch: Option<Vec<u8>>) -> Result<Texture, TexError> {
    let (width, height, format) = container_header(bytes)?;
    let expected = format.payload_len(width, height);
    let payload = &bytes[HEADER_LEN..];
    if payload.len() < expected {
        return Err(TexError::CorruptCache(format!(
            "payload truncated ({} of {expected} bytes)",
            payload.len()
        )));
    }

    let mut data = scratch.unwrap_or_default();
    data.clear();
    data.extend_from_slice(&payload[..expected]);
    Ok(Texture {
        width,
        height,
        format,
        data,
    })
}

// --- Block encoding ---

/// Reads one 4x4 tile with edge-replicate clamping for partial border blocks.
fn gather_block(img: &RgbaImage, x0: u32, y0: u32) -> [[u8; 4]; 16] {
    let (w, h) = (img.width(), img.height());
    let mut block = [[0u8; 4]; 16];
    for (i, texel) in block.iter_mut().enumerate() {
        let sx = (x0 + (i as u32 & 3)).min(w - 1);
        let sy = (y0 + (i as u32 >> 2)).min(h - 1);
        *texel = img.get_pixel(sx, sy).0;
    }
    block
}

#[inline(always)]
fn pack_565(px: [u8; 3]) -> u16 {
    (u16::from(px[0] >> 3) << 11) | (u16::from(px[1] >> 2) << 5) | u16::from(px[2] >> 3)
}

#[inline(always)]
fn expand_565(c: u16) -> [i32; 3] {
    let r5 = (c >> 11) & 0x1f;
    let g6 = (c >> 5) & 0x3f;
    let b5 = c & 0x1f;
    [
        i32::from((r5 << 3) | (r5 >> 2)),
        i32::from((g6 << 2) | (g6 >> 4)),
        i32::from((b5 << 3) | (b5 >> 2)),
    ]
}

/// Range-fit color endpoints: the per-channel bounding box of the block.
/// Packing is monotonic per channel, so max565 >= min565 always holds and the
/// encoder stays in four-color mode (or degenerates to a single color).
fn color_endpoints(block: &[[u8; 4]; 16]) -> (u16, u16) {
    let mut lo = [255u8; 3];
    let mut hi = [0u8; 3];
    for px in block {
        for c in 0..3 {
            lo[c] = lo[c].min(px[c]);
            hi[c] = hi[c].max(px[c]);
        }
    }
    (pack_565(hi), pack_565(lo))
}

fn encode_bc1_block(block: &[[u8; 4]; 16], out: &mut Vec<u8>) {
    let (c0, c1) = color_endpoints(block);
    out.extend_from_slice(&c0.to_le_bytes());
    out.extend_from_slice(&c1.to_le_bytes());

    if c0 == c1 {
        out.extend_from_slice(&[0u8; 4]);
        return;
    }

    let p0 = expand_565(c0);
    let p1 = expand_565(c1);
    let palette = [
        p0,
        p1,
        [0, 1, 2].map(|c| (2 * p0[c] + p1[c] + 1) / 3),
        [0, 1, 2].map(|c| (p0[c] + 2 * p1[c] + 1) / 3),
    ];

    let mut indices = 0u32;
    for (i, px) in block.iter().enumerate() {
        let mut best = 0u32;
        let mut best_err = i32::MAX;
        for (j, cand) in palette.iter().enumerate() {
            let err = (0..3)
                .map(|c| {
                    let d = i32::from(px[c]) - cand[c];
                    d * d
                })
                .sum();
            if err < best_err {
                best_err = err;
                best = j as u32;
            }
        }
        indices |= best << (2 * i);
    }
    out.extend_from_slice(&indices.to_le_bytes());
}

fn encode_bc3_block(block: &[[u8; 4]; 16], out: &mut Vec<u8>) {
    let a0 = block.iter().map(|px| px[3]).max().unwrap_or(255);
    let a1 = block.iter().map(|px| px[3]).min().unwrap_or(255);
    out.push(a0);
    out.push(a1);

    if a0 == a1 {
        out.extend_from_slice(&[0u8; 6]);
    } else {
        // Eight-entry interpolated alpha ramp: a0, a1, then six blends.
        let mut ramp = [0i32; 8];
        ramp[0] = i32::from(a0);
        ramp[1] = i32::from(a1);
        for (i, slot) in ramp.iter_mut().enumerate().skip(2) {
            let k = i as i32 - 1;
            *slot = ((7 - k) * i32::from(a0) + k * i32::from(a1) + 3) / 7;
        }

        let mut bits = 0u64;
        for (i, px) in block.iter().enumerate() {
            let a = i32::from(px[3]);
            let mut best = 0u64;
            let mut best_err = i32::MAX;
            for (j, &cand) in ramp.iter().enumerate() {
                let err = (a - cand).abs();
                if err < best_err {
                    best_err = err;
                    best = j as u64;
                }
            }
            bits |= best << (3 * i);
        }
        out.extend_from_slice(&bits.to_le_bytes()[..6]);
    }

    encode_bc1_block(block, out);
}

#[cfg(test)]
mod tests {
    use super::{
        CompressVariant, MAX_TEXTURE_EDGE, TextureFormat, compress, decode_container,
        downscale_to_limit, encode_container, has_alpha, repack_normal,
    };
    use image::{Rgba, RgbaImage};

    fn solid(w: u32, h: u32, px: [u8; 4]) -> RgbaImage {
        RgbaImage::from_pixel(w, h, Rgba(px))
    }

    #[test]
    fn has_alpha_detects_any_translucent_pixel() {
        let mut img = solid(8, 8, [10, 20, 30, 255]);
        assert!(!has_alpha(&img));
        img.put_pixel(7, 3, Rgba([10, 20, 30, 254]));
        assert!(has_alpha(&img));
    }

    #[test]
    fn normal_repack_moves_x_into_alpha() {
        let mut img = solid(1, 1, [10, 20, 30, 40]);
        repack_normal(&mut img);
        assert_eq!(img.get_pixel(0, 0).0, [40, 20, 30, 20]);
    }

    #[test]
    fn small_images_bypass_compression() {
        let img = solid(64, 64, [1, 2, 3, 4]);
        let tex = compress(&img, CompressVariant::AlphaOrNormal, None);
        assert_eq!(tex.format, TextureFormat::Rgba8);
        assert_eq!(tex.width, 64);
        assert_eq!(tex.height, 64);
        assert_eq!(&tex.data, img.as_raw());
    }

    #[test]
    fn opaque_variant_produces_bc1_payload() {
        let img = solid(132, 132, [200, 100, 50, 255]);
        let tex = compress(&img, CompressVariant::Opaque, None);
        assert_eq!(tex.format, TextureFormat::Bc1);
        assert_eq!(tex.data.len(), 33 * 33 * 8);
    }

    #[test]
    fn alpha_variant_produces_bc3_payload() {
        let img = solid(130, 256, [200, 100, 50, 128]);
        let tex = compress(&img, CompressVariant::AlphaOrNormal, None);
        assert_eq!(tex.format, TextureFormat::Bc3);
        // 130 wide rounds up to 33 blocks across.
        assert_eq!(tex.data.len(), 33 * 64 * 16);
    }

    #[test]
    fn solid_color_block_degenerates_to_equal_endpoints() {
        let img = solid(128, 128, [255, 0, 0, 255]);
        let tex = compress(&img, CompressVariant::Opaque, None);
        let c0 = u16::from_le_bytes([tex.data[0], tex.data[1]]);
        let c1 = u16::from_le_bytes([tex.data[2], tex.data[3]]);
        assert_eq!(c0, c1);
        assert_eq!(&tex.data[4..8], &[0, 0, 0, 0]);
    }

    #[test]
    fn container_header_fields_sit_at_fixed_offsets() {
        let img = solid(132, 260, [9, 9, 9, 255]);
        let tex = compress(&img, CompressVariant::Opaque, None);
        let bytes = encode_container(&tex).unwrap();
        assert_eq!(&bytes[0..4], b"DDS ");
        assert_eq!(u32::from_le_bytes(bytes[12..16].try_into().unwrap()), 260);
        assert_eq!(u32::from_le_bytes(bytes[16..20].try_into().unwrap()), 132);
        assert_eq!(
            u32::from_le_bytes(bytes[20..24].try_into().unwrap()) as usize,
            tex.data.len()
        );
        assert_eq!(&bytes[84..88], b"DXT1");
        assert_eq!(bytes.len(), 128 + tex.data.len());
    }

    #[test]
    fn container_round_trips_metadata_and_payload() {
        let img = solid(256, 132, [10, 40, 90, 100]);
        let tex = compress(&img, CompressVariant::AlphaOrNormal, None);
        let bytes = encode_container(&tex).unwrap();

        let (w, h, format) = super::container_header(&bytes).unwrap();
        assert_eq!((w, h, format), (256, 132, TextureFormat::Bc3));

        let decoded = decode_container(&bytes, None).unwrap();
        assert_eq!(decoded.width, tex.width);
        assert_eq!(decoded.height, tex.height);
        assert_eq!(decoded.format, TextureFormat::Bc3);
        assert_eq!(decoded.data, tex.data);
    }

    #[test]
    fn container_decode_reuses_a_scratch_buffer() {
        let img = solid(128, 128, [10, 40, 90, 255]);
        let tex = compress(&img, CompressVariant::Opaque, None);
        let bytes = encode_container(&tex).unwrap();

        let dirty = vec![0x55u8; 4096];
        let decoded = decode_container(&bytes, Some(dirty)).unwrap();
        assert_eq!(decoded.data, tex.data, "scratch must be cleared, not appended to");
    }

    #[test]
    fn truncated_or_mistagged_containers_are_rejected() {
        assert!(decode_container(&[0u8; 128], None).is_err());
        assert!(decode_container(b"short", None).is_err());

        let img = solid(128, 128, [1, 1, 1, 255]);
        let mut bytes = encode_container(&compress(&img, CompressVariant::Opaque, None)).unwrap();
        bytes[84..88].copy_from_slice(b"XXXX");
        assert!(decode_container(&bytes, None).is_err());

        let img = solid(128, 128, [1, 1, 1, 255]);
        let bytes = encode_container(&compress(&img, CompressVariant::Opaque, None)).unwrap();
        assert!(decode_container(&bytes[..200], None).is_err(), "short payload");
    }

    #[test]
    fn uncompressed_textures_have_no_container_form() {
        let tex = compress(&solid(32, 32, [0, 0, 0, 255]), CompressVariant::Opaque, None);
        assert!(encode_container(&tex).is_err());
    }

    #[test]
    fn downscale_caps_each_axis_independently() {
        let img = downscale_to_limit(solid(4096, 1024, [5, 5, 5, 255]), MAX_TEXTURE_EDGE);
        assert_eq!((img.width(), img.height()), (2048, 1024));

        let img = downscale_to_limit(solid(100, 5000, [5, 5, 5, 255]), MAX_TEXTURE_EDGE);
        assert_eq!((img.width(), img.height()), (100, 2048));

        let img = downscale_to_limit(solid(2048, 2048, [5, 5, 5, 255]), MAX_TEXTURE_EDGE);
        assert_eq!((img.width(), img.height()), (2048, 2048));
    }

    #[test]
    fn scratch_buffer_is_cleared_before_reuse() {
        let img = solid(64, 64, [7, 7, 7, 255]);
        let dirty = vec![0xAAu8; 1024];
        let tex = compress(&img, CompressVariant::Opaque, Some(dirty));
        assert_eq!(tex.data.len(), 64 * 64 * 4);
        assert_eq!(&tex.data, img.as_raw());
    }
}
