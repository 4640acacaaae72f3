//! Utilitaires de framing et de conversion PCM16
//!
//! Le pipeline de secours transporte de l'audio brut : PCM signé 16 bits
//! little-endian, une frame de taille fixe par message. Ce module contient
//! la conversion flottant ↔ PCM16 et le fondu anti-clic appliqué aux
//! frontières de frame.
//!
//! La conversion doit rester compatible byte à byte avec le client
//! historique : échelle 32768 pour les valeurs négatives, 32767 pour les
//! positives à l'encodage, division par 32768 au décodage.

use crate::Sample;

/// Applique une rampe linéaire en début et fin de buffer
///
/// Les `fade_len` premiers échantillons sont multipliés par `i/fade_len`,
/// les `fade_len` derniers par `(len-i)/fade_len`. Supprime les clics
/// audibles aux frontières de frame.
pub fn apply_fade(samples: &mut [Sample], fade_len: usize) {
    let len = samples.len();
    if fade_len == 0 || len < fade_len * 2 {
        return;
    }

    for i in 0..fade_len {
        let gain = i as f32 / fade_len as f32;
        samples[i] *= gain;
        samples[len - 1 - i] *= (i + 1) as f32 / fade_len as f32;
    }
}

/// Encode un échantillon flottant en i16 (avec écrêtage)
fn sample_to_i16(sample: Sample) -> i16 {
    let s = sample.clamp(-1.0, 1.0);
    if s < 0.0 {
        (s * 32768.0) as i16
    } else {
        (s * 32767.0) as i16
    }
}

/// Encode une frame : fondu, écrêtage, PCM16 little-endian
///
/// Le buffer d'entrée est consommé (le fondu le modifie en place de toute
/// façon, et une frame est immuable une fois envoyée).
pub fn encode_frame(mut samples: Vec<Sample>, fade_len: usize) -> Vec<u8> {
    apply_fade(&mut samples, fade_len);

    let mut out = Vec::with_capacity(samples.len() * 2);
    for &sample in &samples {
        out.extend_from_slice(&sample_to_i16(sample).to_le_bytes());
    }
    out
}

/// Décode une frame PCM16 little-endian en échantillons flottants
///
/// Un payload vide (ou un byte traînant impair) produit un résultat vide :
/// le récepteur ignore ces messages.
pub fn decode_frame(bytes: &[u8]) -> Vec<Sample> {
    if bytes.len() % 2 != 0 {
        return Vec::new();
    }
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect()
}
