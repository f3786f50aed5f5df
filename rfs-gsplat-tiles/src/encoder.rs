// CPU splat attribute encoder (RGBA32UI texture, 2 texels per splat)
//
// Layout, 1024 splats per row (texture width 2048):
//   texel 0: [pos.x bits, pos.y bits, pos.z bits, original id]
//   texel 1: [half2(Sxx, Sxy), half2(Sxz, Syy), half2(Syz, Szz), rgba8]
// where S = 4 * covariance (two-sigma footprint).

use glam::{Mat3, Quat, Vec3};
use half::f16;
use tracing::{debug, trace};

use crate::error::{EncodingError, ServiceError};
use crate::services::{EncodeRequest, EncodedSplats, SplatEncodingService};
use crate::splat_set::ColorLayout;
use crate::task::{spawn_job, task_channel, JobSlots, Task};

pub const SPLATS_PER_ROW: u32 = 1024;
pub const TEXELS_PER_SPLAT: u32 = 2;
pub const TEXTURE_WIDTH: u32 = SPLATS_PER_ROW * TEXELS_PER_SPLAT;

const WORDS_PER_TEXEL: usize = 4;
const BYTES_PER_TEXEL: usize = WORDS_PER_TEXEL * 4;

/// Pack two f32 values into f16 format and store in u32
fn pack_half2(a: f32, b: f32) -> u32 {
    let a_u16 = f16::from_f32(a).to_bits();
    let b_u16 = f16::from_f32(b).to_bits();
    (a_u16 as u32) | ((b_u16 as u32) << 16)
}

fn pack_rgba8(c: [u8; 4]) -> u32 {
    u32::from_le_bytes(c)
}

/// Word offset of splat `index`'s first texel in a row-major texture
#[inline]
pub fn texel_word_offset(index: usize, width: u32) -> usize {
    let texel_x = (index & 0x3ff) << 1;
    let texel_y = index >> 10;
    (texel_y * width as usize + texel_x) * WORDS_PER_TEXEL
}

/// Upper triangle of 4 * R S S^T R^T: [xx, xy, xz, yy, yz, zz]
pub fn covariance_terms(rotation: Quat, scale: Vec3) -> [f32; 6] {
    let rotation = if rotation.length_squared() > 0.0 {
        rotation.normalize()
    } else {
        Quat::IDENTITY
    };
    let m = Mat3::from_quat(rotation) * Mat3::from_diagonal(scale);
    let sigma = m * m.transpose();
    [
        4.0 * sigma.x_axis.x,
        4.0 * sigma.y_axis.x,
        4.0 * sigma.z_axis.x,
        4.0 * sigma.y_axis.y,
        4.0 * sigma.z_axis.y,
        4.0 * sigma.z_axis.z,
    ]
}

fn check_len(name: &str, actual: usize, expected: usize) -> Result<(), ServiceError> {
    if actual < expected {
        return Err(ServiceError::new(format!(
            "encode request: {} has {} values, expected {}",
            name, actual, expected
        )));
    }
    Ok(())
}

/// Encode all splats of `request` into texture words
pub fn encode_splats(request: &EncodeRequest) -> Result<EncodedSplats, ServiceError> {
    let n = request.count;
    let components = request.color_layout.components();
    check_len("positions", request.positions.len(), n * 3)?;
    check_len("scales", request.scales.len(), n * 3)?;
    check_len("rotations", request.rotations.len(), n * 4)?;
    check_len("colors", request.colors.len(), n * components)?;

    let width = TEXTURE_WIDTH;
    let height = (n as u32).div_ceil(SPLATS_PER_ROW).max(1);
    let mut words = vec![0u32; width as usize * height as usize * WORDS_PER_TEXEL];

    for i in 0..n {
        let base = texel_word_offset(i, width);
        let p = &request.positions[i * 3..i * 3 + 3];
        let s = &request.scales[i * 3..i * 3 + 3];
        let r = &request.rotations[i * 4..i * 4 + 4];
        let c = &request.colors[i * components..(i + 1) * components];

        words[base] = p[0].to_bits();
        words[base + 1] = p[1].to_bits();
        words[base + 2] = p[2].to_bits();

        let cov = covariance_terms(Quat::from_xyzw(r[0], r[1], r[2], r[3]), Vec3::new(s[0], s[1], s[2]));
        words[base + 4] = pack_half2(cov[0], cov[1]);
        words[base + 5] = pack_half2(cov[2], cov[3]);
        words[base + 6] = pack_half2(cov[4], cov[5]);
        let alpha = match request.color_layout {
            ColorLayout::Rgba => c[3],
            ColorLayout::Rgb => 255,
        };
        words[base + 7] = pack_rgba8([c[0], c[1], c[2], alpha]);
    }

    let mut encoded = EncodedSplats {
        data: bytemuck::cast_slice(&words).to_vec(),
        width,
        height,
    };

    if let Some(ids) = request.original_ids.as_deref() {
        if ids.len() == n {
            embed_original_ids(&mut encoded, ids).map_err(|e| ServiceError::new(e.to_string()))?;
        } else {
            trace!("Original ids not embedded ({} ids for {} splats)", ids.len(), n);
        }
    }

    Ok(encoded)
}

/// Write `original_ids[i]` into component 3 of splat i's first texel
pub fn embed_original_ids(encoded: &mut EncodedSplats, original_ids: &[u32]) -> Result<(), EncodingError> {
    let count = original_ids.len();
    let texels = encoded.width as usize * encoded.height as usize;
    // Rows narrower than 1024 splats would alias; the last splat's second texel must exist
    let fits = count == 0
        || (encoded.width >= TEXTURE_WIDTH
            && texel_word_offset(count - 1, encoded.width) / WORDS_PER_TEXEL + 1 < texels
            && encoded.data.len() >= texels * BYTES_PER_TEXEL);
    if !fits {
        return Err(EncodingError::Dimensions {
            width: encoded.width,
            height: encoded.height,
            count,
        });
    }

    for (i, id) in original_ids.iter().enumerate() {
        let byte = (texel_word_offset(i, encoded.width) + 3) * 4;
        encoded.data[byte..byte + 4].copy_from_slice(&id.to_ne_bytes());
    }
    Ok(())
}

/// Read back the original id stored for splat `index`
pub fn embedded_original_id(encoded: &EncodedSplats, index: usize) -> Option<u32> {
    let byte = (texel_word_offset(index, encoded.width) + 3) * 4;
    let bytes = encoded.data.get(byte..byte + 4)?;
    Some(u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Reference encoding service
#[derive(Debug, Clone)]
pub struct CpuSplatEncoder {
    slots: JobSlots,
}

impl Default for CpuSplatEncoder {
    fn default() -> Self {
        Self::new(1)
    }
}

impl CpuSplatEncoder {
    pub fn new(max_in_flight: usize) -> Self {
        Self {
            slots: JobSlots::new(max_in_flight),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.slots.in_use()
    }
}

impl SplatEncodingService for CpuSplatEncoder {
    fn submit(&self, request: EncodeRequest) -> Option<Task<EncodedSplats>> {
        let Some(slot) = self.slots.try_acquire() else {
            trace!("Splat encoder busy ({} in flight)", self.in_flight());
            return None;
        };

        debug!("Splat encoding submitted: {} splats (epoch {})", request.count, request.epoch);
        let (completer, task) = task_channel();
        spawn_job(move || {
            let result = encode_splats(&request);
            drop(slot);
            completer.complete(result);
        });
        Some(task)
    }
}
