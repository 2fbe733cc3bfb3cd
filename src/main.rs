use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

use voicenote::acquire::Negotiator;
use voicenote::article::{ArticleClient, ArticleLength, ArticleStyle};
use voicenote::config::Config;
use voicenote::engine;
use voicenote::media::CpalBackend;
use voicenote::session::TranscriptionSession;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    println!("✓ Config loaded from ~/.voicenote.toml");

    voicenote::telemetry::init(config.telemetry.enabled, &config.telemetry.log_path)?;
    tracing::info!("voicenote starting");

    let backend = Arc::new(CpalBackend::new(&config.audio));
    let negotiator = Arc::new(tokio::sync::Mutex::new(Negotiator::new(backend)));

    let speech_engine = engine::select(&config.engine)?;
    println!("✓ Speech engine ready");

    let mut session = TranscriptionSession::new(Arc::clone(&negotiator), speech_engine);

    if let Err(e) = session.start().await {
        eprintln!("✗ {e}");
        let diagnostics = negotiator.lock().await;
        for line in diagnostics.logs() {
            eprintln!("  {line}");
        }
        return Err(e.into());
    }
    println!("✓ Listening — press Ctrl+C to stop\n");

    let mut shown = String::new();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received");
                break;
            }
            () = tokio::time::sleep(Duration::from_millis(250)) => {
                if !session.is_listening() {
                    if let Some(error) = session.last_error() {
                        eprintln!("✗ {error}");
                    }
                    break;
                }
                let transcript = session.transcript();
                let interim = session.interim_text();
                let line = if interim.is_empty() {
                    transcript
                } else if transcript.is_empty() {
                    format!("…{interim}")
                } else {
                    format!("{transcript} …{interim}")
                };
                if line != shown {
                    println!("{line}");
                    shown = line;
                }
            }
        }
    }

    session.stop().await;
    let transcript = session.transcript();
    println!("\n--- transcript ---\n{transcript}");

    let api_key = config
        .article
        .api_key
        .clone()
        .or_else(|| std::env::var("GEMINI_API_KEY").ok());

    if transcript.is_empty() {
        println!("\nNothing transcribed, skipping article generation.");
    } else if let Some(key) = api_key {
        let client = ArticleClient::new(key, config.article.model.clone())?;
        let style = ArticleStyle {
            style: config.article.style.clone(),
            tone: config.article.tone.clone(),
            length: ArticleLength::parse(&config.article.length),
            audience: config.article.audience.clone(),
        };
        match client.generate(&transcript, &style).await {
            Ok(article) => {
                println!("\n# {}\n", article.title);
                println!("{}\n", article.summary);
                for section in &article.sections {
                    println!("## {}\n{}\n", section.heading, section.content);
                }
                if !article.takeaways.is_empty() {
                    println!("Takeaways:");
                    for takeaway in &article.takeaways {
                        println!("  - {takeaway}");
                    }
                }
                if !article.hashtags.is_empty() {
                    let tags: Vec<String> =
                        article.hashtags.iter().map(|h| format!("#{h}")).collect();
                    println!("\n{}", tags.join(" "));
                }
            }
            Err(e) => eprintln!("✗ article generation failed: {e}"),
        }
    } else {
        println!("\nNo API key configured; skipping article generation.");
    }

    negotiator.lock().await.release_held();
    Ok(())
}
