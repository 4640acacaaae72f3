// Client Salon - démonstrations du transport voix
//
// Deux démos en une :
// - `loopback`  : le pipeline audio de secours en local (capture →
//                 frames PCM16 → planification de lecture)
// - `negotiate` : le moteur de négociation face à un pair scripté qui
//                 répond dans le désordre (candidats avant la réponse)

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;

use audio::{
    AudioConfig, AudioUplink, BlockSource, ChannelOutlet, CpalBlockSource, CpalPlaybackSink,
    PlaybackClock, PlaybackScheduler, RealClock, RecordingSink, ScriptedBlockSource,
    TrafficMeter,
};
use signaling::{
    ControlChannel, EngineConfig, MemoryChannel, NegotiationEngine, PeerConnector, PrintSink,
    SignalMessage, SimulatedPeerConnector,
};

#[derive(Parser)]
#[command(author, version, about = "Client Salon pour tests du transport voix")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Boucle locale du pipeline audio de secours
    Loopback {
        /// Durée du test en secondes
        #[arg(short, long, default_value = "5")]
        duration: u64,

        /// Utilise une sinusoïde scriptée au lieu du microphone
        #[arg(short, long)]
        scripted: bool,
    },
    /// Négociation simulée contre un pair scripté
    Negotiate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Loopback { duration, scripted } => run_loopback(duration, scripted).await?,
        Commands::Negotiate => run_negotiate().await?,
    }

    Ok(())
}

/// Fait tourner le pipeline de secours en boucle locale
async fn run_loopback(duration: u64, scripted: bool) -> anyhow::Result<()> {
    let config = AudioConfig::default();
    config.validate().map_err(anyhow::Error::msg)?;

    println!("🚀 Boucle locale du pipeline de secours");
    println!("   Durée : {} s", duration);
    println!(
        "   Source : {}",
        if scripted { "sinusoïde scriptée" } else { "microphone" }
    );

    // Source → uplink → canal de frames → planificateur → sortie
    let mut source: Box<dyn BlockSource> = if scripted {
        let total = config.sample_rate as usize * duration as usize;
        Box::new(ScriptedBlockSource::sine(&config, 440.0, total))
    } else {
        Box::new(CpalBlockSource::new(config.clone()))
    };

    let (outlet, mut frame_rx) = ChannelOutlet::pair();
    let meter = TrafficMeter::new();
    let mut uplink = AudioUplink::new(config.clone(), Arc::new(outlet), meter.clone());
    uplink.set_talking(true);

    let clock = Arc::new(RealClock::new()) as Arc<dyn PlaybackClock>;
    let recorder = RecordingSink::new();
    let scheduler = if scripted {
        PlaybackScheduler::new(config.clone(), clock, Box::new(recorder.clone()))
    } else {
        let sink = CpalPlaybackSink::new(&config)?;
        PlaybackScheduler::new(config.clone(), clock, Box::new(sink))
    };

    // Pont entre le débouché de l'uplink et le planificateur
    let (playback_tx, playback_rx) = mpsc::unbounded_channel();
    let forward = tokio::spawn(async move {
        while let Some(payload) = frame_rx.recv().await {
            if playback_tx.send(payload).is_err() {
                break;
            }
        }
    });
    let playback = tokio::spawn(scheduler.run(playback_rx));

    // Boucle de capture bornée par la durée demandée
    source.start().await?;
    let deadline = tokio::time::sleep(Duration::from_secs(duration));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            block = source.next_block() => match block? {
                Some(block) => uplink.push_block(block).await?,
                None => break, // source scriptée épuisée
            },
        }
    }
    source.stop().await?;
    let uplink_stats = uplink.stats();
    uplink.clear();
    drop(uplink);

    forward.await?;
    let playback_stats = playback.await??;

    let (sent, _) = meter.totals();
    println!("\n📊 Résultats :");
    println!("   Blocs capturés : {}", uplink_stats.blocks_in);
    println!("   Frames envoyées : {} ({} jetées)", uplink_stats.frames_sent, uplink_stats.frames_dropped);
    println!("   Bytes envoyés : {}", sent);
    println!("   Blocs planifiés : {}", playback_stats.blocks_scheduled);
    println!("   Resynchronisations : {}", playback_stats.resyncs);
    if scripted {
        println!("   Blocs enregistrés : {}", recorder.entries().len());
    }
    println!("✅ Boucle locale terminée");
    Ok(())
}

/// Joue une négociation complète contre un pair scripté
///
/// Le pair répond volontairement dans le désordre : deux candidats
/// d'abord, la réponse ensuite. Le moteur doit mettre les candidats en
/// file et les rejouer après la réponse.
async fn run_negotiate() -> anyhow::Result<()> {
    println!("🚀 Négociation simulée (pair scripté, réponses dans le désordre)");

    let (local, remote) = MemoryChannel::pair();
    let connector = SimulatedPeerConnector::new();
    let mut engine = NegotiationEngine::new(
        EngineConfig::default(),
        Arc::new(local),
        Arc::clone(&connector) as Arc<dyn PeerConnector>,
        Arc::new(PrintSink),
    );

    // Le pair distant : répond à l'offre par candidats puis réponse
    let remote = Arc::new(remote);
    let remote_task = {
        let remote = Arc::clone(&remote);
        let mut rx = remote.subscribe();
        tokio::spawn(async move {
            while let Ok(message) = rx.recv().await {
                if let SignalMessage::Offer { .. } = message {
                    for n in 0..2 {
                        let _ = remote
                            .send(SignalMessage::Candidate {
                                candidate: format!(
                                    "candidate:{} 1 udp 2130706431 192.0.2.{} 54400 typ host",
                                    n, n
                                ),
                                sdp_mid: Some("0".to_string()),
                                sdp_mline_index: Some(0),
                            })
                            .await;
                    }
                    let _ = remote
                        .send(SignalMessage::Answer {
                            sdp: "v=0 réponse-scriptée".to_string(),
                        })
                        .await;
                    break;
                }
            }
        })
    };

    engine.start().await?;
    // Laisse la boucle consommer l'échange puis rend la main
    let _ = tokio::time::timeout(Duration::from_secs(2), engine.drive()).await;
    remote_task.await?;

    if let Some(session) = connector.last_session() {
        println!("\n📊 Opérations appliquées à la session :");
        for op in session.applied() {
            println!("   {:?}", op);
        }
    }
    println!("   État final : {}", engine.state());

    engine.stop().await;
    println!("✅ Négociation terminée");
    Ok(())
}
