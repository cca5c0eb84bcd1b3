use crate::audio::error::{AudioError, AudioResult};
use crate::audio::format::{f32_to_i16, i16_to_f32};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use tracing::{debug, info};

/// Streaming sample-rate converter for a mono PCM feed
///
/// Uses the same windowed-sinc method as [`crate::audio::format::resample`],
/// but keeps filter state and leftover samples between calls so a live
/// stream can be converted chunk by chunk without boundary clicks.
pub struct StreamResampler {
    /// `None` when input and output rates match
    resampler: Option<SincFixedIn<f32>>,
    /// Input buffer for rubato (channels x samples)
    input_buffer: Vec<Vec<f32>>,
    /// Output buffer for rubato (channels x samples)
    output_buffer: Vec<Vec<f32>>,
    /// Samples waiting for a full block
    pending: Vec<f32>,
    input_rate: u32,
    output_rate: u32,
    /// Number of input samples per block
    chunk_size: usize,
}

impl StreamResampler {
    /// Create a resampler converting `input_rate` to `output_rate`
    ///
    /// # Errors
    /// Returns `AudioError::ResampleFailed` if the resampler cannot be created.
    ///
    /// # Example
    /// ```no_run
    /// use parlance_lib::audio::resampler::StreamResampler;
    ///
    /// // System audio at 24kHz into a 16kHz link
    /// let resampler = StreamResampler::new(24000, 16000).unwrap();
    /// ```
    pub fn new(input_rate: u32, output_rate: u32) -> AudioResult<Self> {
        if input_rate == 0 || output_rate == 0 {
            return Err(AudioError::ResampleFailed(format!(
                "Invalid rates: {} Hz -> {} Hz",
                input_rate, output_rate
            )));
        }

        // 10ms of input per block
        let chunk_size = (input_rate / 100).max(1) as usize;

        if input_rate == output_rate {
            debug!(rate = input_rate, "Resampler in passthrough mode");
            return Ok(Self {
                resampler: None,
                input_buffer: Vec::new(),
                output_buffer: Vec::new(),
                pending: Vec::new(),
                input_rate,
                output_rate,
                chunk_size,
            });
        }

        let ratio = output_rate as f64 / input_rate as f64;
        info!(input_rate, output_rate, ratio, "Creating stream resampler");

        let params = SincInterpolationParameters {
            sinc_len: 256,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 256,
            window: WindowFunction::BlackmanHarris2,
        };

        let resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, chunk_size, 1)
            .map_err(|e| AudioError::ResampleFailed(format!("Failed to create resampler: {}", e)))?;

        let input_buffer = resampler.input_buffer_allocate(true);
        let output_buffer = resampler.output_buffer_allocate(true);

        debug!(
            chunk_size,
            output_max = resampler.output_frames_max(),
            "Stream resampler ready"
        );

        Ok(Self {
            resampler: Some(resampler),
            input_buffer,
            output_buffer,
            pending: Vec::with_capacity(chunk_size * 2),
            input_rate,
            output_rate,
            chunk_size,
        })
    }

    /// Convert a block of s16 samples
    ///
    /// Returns as many output samples as complete input blocks allow; the
    /// remainder is kept for the next call, so output may be empty.
    pub fn process(&mut self, input: &[i16]) -> AudioResult<Vec<i16>> {
        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(input.to_vec());
        };

        self.pending.extend(input.iter().copied().map(i16_to_f32));

        let mut output = Vec::with_capacity(
            (self.pending.len() as f64 * self.output_rate as f64 / self.input_rate as f64) as usize
                + 1,
        );

        let mut consumed = 0;
        while self.pending.len() - consumed >= self.chunk_size {
            self.input_buffer[0]
                .copy_from_slice(&self.pending[consumed..consumed + self.chunk_size]);

            let (_used, generated) = resampler
                .process_into_buffer(&self.input_buffer, &mut self.output_buffer, None)
                .map_err(|e| AudioError::ResampleFailed(format!("Resampling failed: {}", e)))?;

            output.extend(self.output_buffer[0][..generated].iter().copied().map(f32_to_i16));
            consumed += self.chunk_size;
        }
        self.pending.drain(..consumed);

        Ok(output)
    }

    /// Drop buffered samples and filter history
    pub fn reset(&mut self) {
        self.pending.clear();
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.reset();
        }
    }

    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }

    pub fn input_rate(&self) -> u32 {
        self.input_rate
    }

    pub fn output_rate(&self) -> u32 {
        self.output_rate
    }

    /// Input samples held back waiting for a full block
    pub fn pending_samples(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passthrough() {
        let mut resampler = StreamResampler::new(16000, 16000).unwrap();
        assert!(resampler.is_passthrough());
        let input = vec![1i16, 2, 3, -4];
        assert_eq!(resampler.process(&input).unwrap(), input);
    }

    #[test]
    fn test_invalid_rate() {
        assert!(StreamResampler::new(0, 16000).is_err());
    }

    #[test]
    fn test_streaming_ratio() {
        let mut resampler = StreamResampler::new(24000, 16000).unwrap();
        assert!(!resampler.is_passthrough());

        // 100 chunks of 1024 frames at 24kHz
        let mut produced = 0;
        for _ in 0..100 {
            produced += resampler.process(&vec![0i16; 1024]).unwrap().len();
        }

        let consumed = 100 * 1024 - resampler.pending_samples();
        let expected = consumed as f64 * 16000.0 / 24000.0;
        assert!((produced as f64 - expected).abs() < 4.0, "{} vs {}", produced, expected);
        assert!(resampler.pending_samples() < 240);
    }

    #[test]
    fn test_short_input_is_buffered() {
        let mut resampler = StreamResampler::new(48000, 16000).unwrap();
        // Less than one 10ms block
        let out = resampler.process(&vec![0i16; 100]).unwrap();
        assert!(out.is_empty());
        assert_eq!(resampler.pending_samples(), 100);

        resampler.reset();
        assert_eq!(resampler.pending_samples(), 0);
    }
}
