//! Helpers for raw PCM audio as returned with `response_format = "pcm"`.

/// Sample rate of the OpenAI `pcm` response format (16-bit LE mono).
pub const OPENAI_PCM_SAMPLE_RATE: u32 = 24_000;

/// Playback duration of a mono 16-bit PCM buffer.
pub fn pcm16_duration_ms(byte_len: usize, sample_rate: u32) -> u64 {
    if sample_rate == 0 {
        return 0;
    }
    let samples = (byte_len / 2) as u64;
    samples * 1000 / sample_rate as u64
}
