//! Gestion d'erreurs pour la couche de signalisation
//!
//! Règle du moteur de négociation : une erreur de séquencement du
//! protocole distant (réponse en double, offre pendant une renégociation)
//! n'est jamais fatale, elle est journalisée et ignorée. Les variantes
//! ci-dessous couvrent les vraies pannes : canal fermé, micro refusé,
//! session media en échec.

use thiserror::Error;

/// Énumération des erreurs de la couche de signalisation
#[derive(Error, Debug)]
pub enum SignalError {
    /// Le canal de contrôle est fermé (serveur parti, paire droppée)
    #[error("Canal de contrôle fermé")]
    ChannelClosed,

    /// L'accès au microphone a été refusé ou est indisponible
    #[error("Accès au microphone refusé: {0}")]
    MediaDenied(String),

    /// Erreur remontée par la session media native
    #[error("Erreur de session pair: {0}")]
    PeerError(String),

    /// Opération incompatible avec l'état courant du moteur
    #[error("État invalide: {0}")]
    InvalidState(String),

    /// Échec d'encodage ou de décodage d'un message de signalisation
    #[error("Erreur de sérialisation: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl From<webrtc::Error> for SignalError {
    fn from(err: webrtc::Error) -> Self {
        SignalError::PeerError(err.to_string())
    }
}

/// Type Result personnalisé pour la signalisation
pub type SignalResult<T> = Result<T, SignalError>;
