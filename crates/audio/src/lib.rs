//! Crate audio pour Salon - Pipeline vocal de secours
//!
//! Ce crate gère la chaîne audio du chemin de repli :
//! - Capture microphone par blocs avec cpal
//! - Re-blocage et encodage PCM16 (uplink)
//! - Compression Opus pour le transport media natif
//! - Planification de lecture continue
//! - Comptage de trafic pour les statistiques

pub mod capture; // Sources de blocs (cpal + scriptée)
pub mod codec; // Codec Opus (transport natif)
pub mod config; // Configuration audio
pub mod error; // Gestion d'erreurs
pub mod meter; // Compteurs de trafic
pub mod pcm; // Conversion f32 ↔ PCM16 et fondu
pub mod playback; // Planificateur de lecture et puits cpal
pub mod traits; // Traits abstraits (sources, puits, horloges)
pub mod types; // Types de données (SampleBlock, stats)
pub mod uplink; // Montage amont (accumulation, porte, contre-pression)

// Réexports pour faciliter l'utilisation
pub use config::*;
pub use error::*;
pub use traits::*;
pub use types::*;

// Réexports des implémentations principales
pub use capture::{CpalBlockSource, ScriptedBlockSource};
pub use codec::OpusCodec;
pub use meter::{TrafficMeter, TrafficSampler};
pub use playback::{CpalPlaybackSink, PlaybackScheduler, RecordingSink};
pub use uplink::{AudioUplink, ChannelOutlet, FrameReceiver};
