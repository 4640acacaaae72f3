//! Crate signaling pour Salon - Négociation de session media
//!
//! Ce crate gère l'établissement de la session voix :
//! - Vocabulaire du canal de contrôle (offres, réponses, candidats ICE)
//! - Moteur de négociation (machine à états, file de candidats)
//! - Session media native (librairie webrtc) et simulée (tests)
//! - Journaux et classification de santé injectables

pub mod channel; // Canal de contrôle en mémoire
pub mod engine; // Moteur de négociation
pub mod error; // Gestion d'erreurs
pub mod peer; // Sessions media (native + simulée)
pub mod traits; // Traits abstraits (canal, débouché de statut)
pub mod types; // Types de données (messages, états)

// Réexports pour faciliter l'utilisation
pub use error::*;
pub use traits::*;
pub use types::*;

// Réexports des implémentations principales
pub use channel::MemoryChannel;
pub use engine::NegotiationEngine;
pub use peer::{
    AppliedOp, NativePeerConnector, NativePeerSession, PeerConnector, PeerEvent, PeerSession,
    SimulatedPeerConnector, SimulatedPeerSession,
};
