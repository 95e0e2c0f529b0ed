//! Loudness estimation for raw μ-law chunks.
//!
//! The segmenter only needs to tell speech from line noise, so a plain RMS
//! over the decoded samples is enough.

/// G.711 μ-law expansion table, indexed by the encoded byte.
static MULAW_TABLE: [i16; 256] = build_table();

const fn build_table() -> [i16; 256] {
    let mut table = [0i16; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = expand(i as u8);
        i += 1;
    }
    table
}

const fn expand(byte: u8) -> i16 {
    let inverted = !byte;
    let exponent = (inverted >> 4) & 0x07;
    let mantissa = (inverted & 0x0f) as i32;
    let magnitude = (((mantissa << 3) + 0x84) << exponent) - 0x84;
    if inverted & 0x80 != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

/// Decodes one μ-law byte to a linear 16-bit sample.
pub fn decode_mulaw(byte: u8) -> i16 {
    MULAW_TABLE[byte as usize]
}

/// Root-mean-square level of a chunk, normalized to `0.0..=1.0`.
pub fn rms_energy(chunk: &[u8]) -> f32 {
    if chunk.is_empty() {
        return 0.0;
    }
    let sum: f64 = chunk
        .iter()
        .map(|&b| {
            let s = decode_mulaw(b) as f64;
            s * s
        })
        .sum();
    ((sum / chunk.len() as f64).sqrt() / 32768.0) as f32
}

/// Whether a chunk is loud enough to count as speech.
pub fn is_voiced(chunk: &[u8], threshold: f32) -> bool {
    rms_energy(chunk) >= threshold
}
