//! Types de données pour la signalisation
//!
//! Le vocabulaire du canal de contrôle (offres, réponses, candidats ICE)
//! et les états observables du moteur de négociation. Le format sur le
//! fil est du JSON étiqueté par un champ `type`, identique à celui du
//! serveur de salon.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Message échangé sur le canal de contrôle
///
/// Sur le fil : `{"type": "offer", "sdp": "..."}`,
/// `{"type": "candidate", "candidate": "...", "sdpMid": ..., "sdpMLineIndex": ...}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SignalMessage {
    /// Description de session proposée (initiale ou renégociation)
    Offer { sdp: String },

    /// Description de session en réponse à une offre
    Answer { sdp: String },

    /// Candidat ICE découvert par un des deux côtés
    Candidate {
        /// Chaîne candidate ; vide = fin des candidats de ce côté
        candidate: String,

        #[serde(rename = "sdpMid")]
        sdp_mid: Option<String>,

        #[serde(rename = "sdpMLineIndex")]
        sdp_mline_index: Option<u16>,
    },
}

impl SignalMessage {
    /// Nom court du message pour les journaux
    pub fn kind(&self) -> &'static str {
        match self {
            SignalMessage::Offer { .. } => "offer",
            SignalMessage::Answer { .. } => "answer",
            SignalMessage::Candidate { .. } => "candidate",
        }
    }
}

/// Candidat ICE tel que manipulé par le moteur
#[derive(Clone, Debug, PartialEq)]
pub struct IceCandidate {
    pub candidate: String,
    pub sdp_mid: Option<String>,
    pub sdp_mline_index: Option<u16>,
}

impl IceCandidate {
    /// Un candidat vide marque la fin des candidats du côté émetteur
    pub fn is_end_of_candidates(&self) -> bool {
        self.candidate.is_empty()
    }
}

/// Sens d'une description de session
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SdpKind {
    Offer,
    Answer,
}

/// Description de session (SDP) typée par son sens
#[derive(Clone, Debug, PartialEq)]
pub struct SessionDescription {
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// États observables du moteur de négociation
///
/// La renégociation n'est pas un état : c'est un drapeau interne de la
/// session, le moteur reste `Active` pendant qu'elle se déroule.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineState {
    /// Aucune session, jamais démarré
    Idle,

    /// Acquisition des ressources locales en cours
    Starting,

    /// Offre envoyée, en attente de la réponse initiale
    Negotiating,

    /// Réponse appliquée, la session est établie
    Active,

    /// Session arrêtée proprement
    Stopped,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EngineState::Idle => "idle",
            EngineState::Starting => "starting",
            EngineState::Negotiating => "negotiating",
            EngineState::Active => "active",
            EngineState::Stopped => "stopped",
        };
        write!(f, "{}", name)
    }
}

/// Classification simplifiée de la santé de la connexion
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimpleStatus {
    Ok,
    Warn,
    Bad,
}

impl SimpleStatus {
    /// Classe un état de connexion ICE pour l'affichage
    ///
    /// `connected`/`completed` vont bien ; les états transitoires et les
    /// coupures récupérables sont un avertissement ; `failed`/`closed`
    /// sont irrécupérables sans nouvelle session.
    pub fn from_ice_state(state: &str) -> Self {
        match state {
            "connected" | "completed" => SimpleStatus::Ok,
            "failed" | "closed" => SimpleStatus::Bad,
            _ => SimpleStatus::Warn,
        }
    }
}

/// Configuration du moteur de négociation
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Serveurs STUN utilisés pour la découverte de candidats
    pub ice_servers: Vec<String>,

    /// Période d'échantillonnage des statistiques de transport
    pub stats_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![
                "stun:stun.l.google.com:19302".to_string(),
                "stun:stun.cloudflare.com:3478".to_string(),
            ],
            stats_interval: Duration::from_secs(1),
        }
    }
}
