//! PCM format helpers
//!
//! Stateless conversions over interleaved signed 16-bit little-endian PCM.
//! Nothing here touches a device or allocates beyond its output.

use crate::audio::error::{AudioError, AudioResult};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

/// Bit depth of every buffer that crosses a port
pub const BIT_DEPTH: u16 = 16;

/// Bytes per s16le sample
pub const BYTES_PER_SAMPLE: usize = 2;

/// Frames fed to the sinc filter per block in [`resample`]
const RESAMPLE_BLOCK_FRAMES: usize = 1024;

/// Filter used by [`resample`]
///
/// Passband is flat up to 92.5% of the lower Nyquist frequency. The
/// Blackman-Harris² window keeps aliased energy below roughly -100 dB.
fn sinc_parameters() -> SincInterpolationParameters {
    SincInterpolationParameters {
        sinc_len: 128,
        f_cutoff: 0.925,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 128,
        window: WindowFunction::BlackmanHarris2,
    }
}

/// Encode samples as s16le bytes
pub fn samples_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * BYTES_PER_SAMPLE);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}

/// Decode s16le bytes into samples; a trailing odd byte is ignored
pub fn bytes_to_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(BYTES_PER_SAMPLE)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Average one stereo frame, rounding half away from zero
///
/// Integer-only so it is safe to call from the driver callback.
pub fn downmix_pair(left: i16, right: i16) -> i16 {
    let sum = left as i32 + right as i32;
    let avg = if sum >= 0 {
        (sum + 1) >> 1
    } else {
        -((-sum + 1) >> 1)
    };
    avg as i16
}

/// Downmix interleaved stereo samples into `out`, one sample per frame
pub fn downmix_into(stereo: &[i16], out: &mut Vec<i16>) {
    out.clear();
    out.extend(
        stereo
            .chunks_exact(2)
            .map(|frame| downmix_pair(frame[0], frame[1])),
    );
}

/// Convert interleaved stereo s16le to mono by averaging each frame
pub fn convert_to_mono(data: &[u8]) -> Vec<u8> {
    let stereo = bytes_to_samples(data);
    let mut mono = Vec::with_capacity(stereo.len() / 2);
    downmix_into(&stereo, &mut mono);
    samples_to_bytes(&mono)
}

/// Length of `frames` frames at `sample_rate`, in milliseconds
pub fn duration_ms(frames: usize, sample_rate: u32) -> f64 {
    frames as f64 / sample_rate as f64 * 1000.0
}

/// Length of a PCM buffer of `byte_count` bytes, in seconds
pub fn duration_seconds(byte_count: usize, sample_rate: u32, channels: u16, bit_depth: u16) -> f64 {
    let bytes_per_second =
        sample_rate as f64 * channels as f64 * (bit_depth as f64 / 8.0);
    if bytes_per_second == 0.0 {
        return 0.0;
    }
    byte_count as f64 / bytes_per_second
}

/// Number of bytes one buffer of `frames` frames occupies
pub fn buffer_bytes(frames: usize, channels: u16) -> usize {
    frames * channels as usize * BYTES_PER_SAMPLE
}

/// Convert interleaved PCM from `rate_from` to `rate_to`
///
/// Band-limited sinc interpolation. The output always holds exactly
/// `floor(frames * rate_to / rate_from)` frames with the filter delay
/// removed. Equal rates return the input unchanged.
///
/// # Errors
/// Returns `AudioError::UnsupportedFormat` for anything but 16-bit PCM or
/// zero rates/channels, and `AudioError::ResampleFailed` if the filter
/// cannot be built.
pub fn resample(
    data: &[u8],
    rate_from: u32,
    rate_to: u32,
    channels: u16,
    bit_depth: u16,
) -> AudioResult<Vec<u8>> {
    if bit_depth != BIT_DEPTH {
        return Err(AudioError::UnsupportedFormat(format!(
            "{}-bit PCM (only {}-bit is supported)",
            bit_depth, BIT_DEPTH
        )));
    }
    if rate_from == 0 || rate_to == 0 || channels == 0 {
        return Err(AudioError::UnsupportedFormat(format!(
            "rate {} -> {} with {} channels",
            rate_from, rate_to, channels
        )));
    }
    if rate_from == rate_to {
        return Ok(data.to_vec());
    }

    let channels = channels as usize;
    let frames = data.len() / (BYTES_PER_SAMPLE * channels);
    if frames == 0 {
        return Ok(Vec::new());
    }
    let target_frames = (frames as u64 * rate_to as u64 / rate_from as u64) as usize;

    let planar = deinterleave(&bytes_to_samples(data), channels, frames);

    let mut resampler = SincFixedIn::<f32>::new(
        rate_to as f64 / rate_from as f64,
        1.0,
        sinc_parameters(),
        RESAMPLE_BLOCK_FRAMES,
        channels,
    )
    .map_err(|e| AudioError::ResampleFailed(format!("Failed to create resampler: {}", e)))?;

    let delay = resampler.output_delay();
    let wanted = delay + target_frames;
    let mut output: Vec<Vec<f32>> = vec![Vec::with_capacity(wanted); channels];

    let mut position = 0;
    while position < frames {
        let end = (position + RESAMPLE_BLOCK_FRAMES).min(frames);
        let block: Vec<&[f32]> = planar.iter().map(|ch| &ch[position..end]).collect();
        let result = if end - position == RESAMPLE_BLOCK_FRAMES {
            resampler.process(block.as_slice(), None)
        } else {
            resampler.process_partial(Some(block.as_slice()), None)
        };
        let produced = result.map_err(|e| AudioError::ResampleFailed(e.to_string()))?;
        append_planar(&mut output, produced);
        position = end;
    }

    // Flush the filter tail until the delayed samples have all come out.
    while output[0].len() < wanted {
        let produced = resampler
            .process_partial(None::<&[Vec<f32>]>, None)
            .map_err(|e| AudioError::ResampleFailed(e.to_string()))?;
        if produced[0].is_empty() {
            break;
        }
        append_planar(&mut output, produced);
    }

    Ok(interleave(&output, delay, target_frames))
}

fn deinterleave(samples: &[i16], channels: usize, frames: usize) -> Vec<Vec<f32>> {
    let mut planar = vec![Vec::with_capacity(frames); channels];
    for frame in samples.chunks_exact(channels).take(frames) {
        for (ch, sample) in frame.iter().enumerate() {
            planar[ch].push(*sample as f32 / 32768.0);
        }
    }
    planar
}

fn append_planar(output: &mut [Vec<f32>], produced: Vec<Vec<f32>>) {
    for (out, block) in output.iter_mut().zip(produced) {
        out.extend(block);
    }
}

fn interleave(planar: &[Vec<f32>], skip: usize, frames: usize) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(frames * planar.len() * BYTES_PER_SAMPLE);
    for frame in 0..frames {
        for channel in planar {
            let value = channel.get(skip + frame).copied().unwrap_or(0.0);
            bytes.extend_from_slice(&f32_to_i16(value).to_le_bytes());
        }
    }
    bytes
}

/// Quantise a float sample to s16, clamping out-of-range values
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample * 32768.0).round().clamp(-32768.0, 32767.0) as i16
}

/// Map an s16 sample onto [-1.0, 1.0)
pub fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / 32768.0
}
