//! Canal de contrôle en mémoire
//!
//! Paire duplex pour les tests et les démos : ce qu'une extrémité envoie,
//! l'autre le reçoit. Chaque message est sérialisé en JSON au passage,
//! exactement comme sur le vrai fil, ce qui valide le format et permet de
//! compter les bytes de signalisation dans un `TrafficMeter`.

use async_trait::async_trait;
use audio::TrafficMeter;
use tokio::sync::broadcast;

use crate::{ControlChannel, SignalError, SignalMessage, SignalResult};

const CHANNEL_CAPACITY: usize = 64;

/// Extrémité d'une paire duplex en mémoire
pub struct MemoryChannel {
    out_tx: broadcast::Sender<SignalMessage>,
    in_tx: broadcast::Sender<SignalMessage>,
    meter: TrafficMeter,
    peer_meter: TrafficMeter,
    // Garde le canal entrant vivant même sans abonné côté moteur
    _keepalive: broadcast::Receiver<SignalMessage>,
}

impl MemoryChannel {
    /// Crée les deux extrémités appariées
    pub fn pair() -> (MemoryChannel, MemoryChannel) {
        let (a_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (b_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let meter_a = TrafficMeter::new();
        let meter_b = TrafficMeter::new();

        let left = MemoryChannel {
            out_tx: a_tx.clone(),
            in_tx: b_tx.clone(),
            meter: meter_a.clone(),
            peer_meter: meter_b.clone(),
            _keepalive: b_tx.subscribe(),
        };
        let right = MemoryChannel {
            _keepalive: a_tx.subscribe(),
            out_tx: b_tx,
            in_tx: a_tx,
            meter: meter_b,
            peer_meter: meter_a,
        };
        (left, right)
    }

    /// Compteur de trafic de cette extrémité
    pub fn meter(&self) -> TrafficMeter {
        self.meter.clone()
    }
}

#[async_trait]
impl ControlChannel for MemoryChannel {
    async fn send(&self, message: SignalMessage) -> SignalResult<()> {
        // Sérialisation de contrôle : même encodage que le vrai fil
        let wire = serde_json::to_vec(&message)?;
        self.meter.add_sent(wire.len() as u64);
        self.peer_meter.add_received(wire.len() as u64);

        self.out_tx
            .send(message)
            .map_err(|_| SignalError::ChannelClosed)?;
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<SignalMessage> {
        self.in_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_duplex_delivery() {
        let (left, right) = MemoryChannel::pair();
        let mut right_rx = right.subscribe();
        let mut left_rx = left.subscribe();

        left.send(SignalMessage::Offer {
            sdp: "v=0 gauche".to_string(),
        })
        .await
        .unwrap();
        right
            .send(SignalMessage::Answer {
                sdp: "v=0 droite".to_string(),
            })
            .await
            .unwrap();

        match right_rx.recv().await.unwrap() {
            SignalMessage::Offer { sdp } => assert!(sdp.contains("gauche")),
            other => panic!("message inattendu: {:?}", other),
        }
        match left_rx.recv().await.unwrap() {
            SignalMessage::Answer { sdp } => assert!(sdp.contains("droite")),
            other => panic!("message inattendu: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_meter_counts_json_bytes() {
        let (left, right) = MemoryChannel::pair();
        let _rx = right.subscribe();

        let msg = SignalMessage::Offer {
            sdp: "v=0".to_string(),
        };
        let expected = serde_json::to_vec(&msg).unwrap().len() as u64;
        left.send(msg).await.unwrap();

        assert_eq!(left.meter().totals(), (expected, 0));
        assert_eq!(right.meter().totals(), (0, expected));
    }

    #[tokio::test]
    async fn test_send_without_subscriber_still_works() {
        // Le garde-fou interne maintient le canal ouvert
        let (left, _right) = MemoryChannel::pair();
        left.send(SignalMessage::Offer {
            sdp: "v=0".to_string(),
        })
        .await
        .unwrap();
    }
}
