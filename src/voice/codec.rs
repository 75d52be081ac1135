//! Encoding of recordings and decoding of spoken replies

use std::io::Cursor;

use base64::Engine as _;

use crate::{Error, Result};

/// A slice of captured samples, cut at the recorder's time slice
pub type AudioFragment = Vec<f32>;

/// A finished recording ready for upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioBlob {
    pub data: Vec<u8>,
    pub mime_type: String,
    pub file_name: String,
}

/// Mono samples decoded from a reply
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    /// Playback length
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self) -> std::time::Duration {
        if self.sample_rate == 0 {
            return std::time::Duration::ZERO;
        }
        std::time::Duration::from_secs_f64(self.samples.len() as f64 / f64::from(self.sample_rate))
    }
}

/// Join captured fragments into a single WAV upload
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn finalize_recording(
    fragments: &[AudioFragment],
    sample_rate: u32,
    channels: u16,
) -> Result<AudioBlob> {
    let samples: Vec<f32> = fragments.iter().flatten().copied().collect();
    let data = samples_to_wav(&samples, sample_rate, channels)?;

    tracing::debug!(
        fragments = fragments.len(),
        samples = samples.len(),
        bytes = data.len(),
        "recording finalized"
    );

    Ok(AudioBlob {
        data,
        mime_type: "audio/wav".to_string(),
        file_name: "recording.wav".to_string(),
    })
}

/// Convert f32 samples to 16-bit PCM WAV bytes
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32, channels: u16) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

/// Decode the base64 audio payload of a voice reply
///
/// Accepts a bare payload or a `data:` URL.
///
/// # Errors
///
/// Returns `DecodeFailure` if the payload is not valid base64
pub fn decode_base64_audio(encoded: &str) -> Result<Vec<u8>> {
    let payload = encoded
        .trim()
        .split_once(";base64,")
        .map_or(encoded.trim(), |(_, data)| data);

    base64::engine::general_purpose::STANDARD
        .decode(payload)
        .map_err(|e| Error::DecodeFailure(format!("invalid base64 audio: {e}")))
}

/// Decode WAV or MP3 bytes to mono samples
///
/// # Errors
///
/// Returns `DecodeFailure` if the bytes are neither format or hold no audio
pub fn decode_audio(bytes: &[u8]) -> Result<DecodedAudio> {
    let decoded = if bytes.starts_with(b"RIFF") {
        decode_wav(bytes)?
    } else {
        decode_mp3(bytes)?
    };

    if decoded.samples.is_empty() {
        return Err(Error::DecodeFailure("reply contains no audio".to_string()));
    }

    Ok(decoded)
}

#[allow(clippy::cast_precision_loss)]
fn decode_wav(bytes: &[u8]) -> Result<DecodedAudio> {
    let mut reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|e| Error::DecodeFailure(format!("WAV decode error: {e}")))?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::DecodeFailure(format!("WAV decode error: {e}")))?,
        hound::SampleFormat::Int => {
            let scale = (1_i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| Error::DecodeFailure(format!("WAV decode error: {e}")))?
        }
    };

    Ok(DecodedAudio {
        samples: downmix(&interleaved, usize::from(spec.channels)),
        sample_rate: spec.sample_rate,
    })
}

#[allow(clippy::cast_sign_loss)]
fn decode_mp3(bytes: &[u8]) -> Result<DecodedAudio> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(bytes));
    let mut samples = Vec::new();
    let mut sample_rate = 0;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                sample_rate = frame.sample_rate as u32;
                let frame_samples: Vec<f32> =
                    frame.data.iter().map(|&s| f32::from(s) / 32768.0).collect();
                samples.extend(downmix(&frame_samples, frame.channels));
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::DecodeFailure(format!("MP3 decode error: {e}"))),
        }
    }

    Ok(DecodedAudio {
        samples,
        sample_rate,
    })
}

/// Average interleaved channels down to mono
fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }

    #[allow(clippy::cast_precision_loss)]
    let divisor = channels as f32;
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / divisor)
        .collect()
}

/// Resample mono audio using rubato, used when the output device can't run
/// at the reply's native rate
///
/// # Errors
///
/// Returns `Audio` if the resampler can't be built for the rate pair
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    use rubato::{FftFixedIn, Resampler};

    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let chunk_size = 1024;
    let sub_chunks = 2;

    let mut resampler =
        FftFixedIn::<f64>::new(from_rate as usize, to_rate as usize, chunk_size, sub_chunks, 1)
            .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))?;
    let resample_err = |e: rubato::ResampleError| Error::Audio(format!("resample failed: {e}"));

    let input: Vec<f64> = samples.iter().map(|&s| f64::from(s)).collect();
    let expected =
        (samples.len() as f64 * f64::from(to_rate) / f64::from(from_rate)).ceil() as usize;
    let delay = resampler.output_delay();

    let mut output = Vec::with_capacity(expected + delay);
    let mut chunks = input.chunks_exact(chunk_size);
    for chunk in chunks.by_ref() {
        let result = resampler.process(&[chunk], None).map_err(resample_err)?;
        output.extend_from_slice(&result[0]);
    }

    let tail = chunks.remainder();
    if !tail.is_empty() {
        let result = resampler
            .process_partial(Some(&[tail]), None)
            .map_err(resample_err)?;
        output.extend_from_slice(&result[0]);
    }

    // Flush what the filter still holds back
    for _ in 0..4 {
        if output.len() >= expected + delay {
            break;
        }
        let result = resampler
            .process_partial::<&[f64]>(None, None)
            .map_err(resample_err)?;
        output.extend_from_slice(&result[0]);
    }

    let mut resampled: Vec<f32> = output.iter().skip(delay).map(|&s| s as f32).collect();
    resampled.resize(expected, 0.0);
    Ok(resampled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[allow(clippy::cast_precision_loss)]
    fn tone(len: usize) -> Vec<f32> {
        (0..len).map(|i| ((i as f32) * 0.05).sin() * 0.5).collect()
    }

    #[test]
    fn finalize_concatenates_fragments_in_order() {
        let fragments = vec![tone(1600), tone(1600), tone(400)];
        let blob = finalize_recording(&fragments, 16_000, 1).unwrap();

        assert_eq!(blob.mime_type, "audio/wav");
        assert_eq!(blob.file_name, "recording.wav");

        let decoded = decode_audio(&blob.data).unwrap();
        assert_eq!(decoded.sample_rate, 16_000);
        assert_eq!(decoded.samples.len(), 3600);
    }

    #[test]
    fn wav_reply_decodes_through_base64() {
        let wav = samples_to_wav(&tone(2400), 24_000, 1).unwrap();
        let encoded = base64::engine::general_purpose::STANDARD.encode(&wav);

        let bytes = decode_base64_audio(&encoded).unwrap();
        let decoded = decode_audio(&bytes).unwrap();
        assert_eq!(decoded.sample_rate, 24_000);
        assert_eq!(decoded.samples.len(), 2400);
        assert!((decoded.duration().as_secs_f64() - 0.1).abs() < 1e-6);
    }

    #[test]
    fn data_url_prefix_is_stripped() {
        let encoded = base64::engine::general_purpose::STANDARD.encode(b"RIFF");
        let bytes = decode_base64_audio(&format!("data:audio/wav;base64,{encoded}")).unwrap();
        assert_eq!(bytes, b"RIFF");
    }

    #[test]
    fn stereo_wav_is_downmixed() {
        let wav = samples_to_wav(&[0.5, -0.5, 0.25, 0.25], 8_000, 2).unwrap();
        let decoded = decode_audio(&wav).unwrap();
        assert_eq!(decoded.samples.len(), 2);
        assert!(decoded.samples[0].abs() < 1e-3);
        assert!((decoded.samples[1] - 0.25).abs() < 1e-3);
    }

    #[test]
    fn invalid_base64_is_decode_failure() {
        let err = decode_base64_audio("not base64 at all!").unwrap_err();
        assert!(matches!(err, Error::DecodeFailure(_)));
    }

    #[test]
    fn garbage_bytes_are_decode_failure() {
        let err = decode_audio(&[0u8; 64]).unwrap_err();
        assert!(matches!(err, Error::DecodeFailure(_)));
    }

    #[test]
    fn resample_halves_length() {
        let out = resample(&tone(4800), 48_000, 24_000).unwrap();
        assert_eq!(out.len(), 2400);
        assert_eq!(resample(&tone(10), 16_000, 16_000).unwrap().len(), 10);
    }

    #[test]
    fn resample_keeps_trailing_partial_chunk() {
        // 1500 samples is one full 1024 chunk plus a partial one
        let input = vec![0.5_f32; 1500];
        let out = resample(&input, 24_000, 48_000).unwrap();
        assert_eq!(out.len(), 3000);

        // The end of the clip is still signal, not zero padding
        let tail = &out[2600..2900];
        assert!(tail.iter().all(|s| (s - 0.5).abs() < 0.05));
    }
}
