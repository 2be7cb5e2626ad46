//! partner-hub: voice playback and referral links for the partner dashboard.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use partner_hub::api::{self, ApiState};
use partner_hub::config::Config;
use partner_hub::referral::notify::{SponsorNotifier, TracingNotifier, WebhookNotifier};
use partner_hub::referral::store::FileSessionStore;
use partner_hub::referral::ReferralService;
use partner_hub::speech::output::RodioOutput;
use partner_hub::speech::synth::GeminiSynthesizer;
use partner_hub::speech::{PlaybackSettings, SpeechCoordinator};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "partner-hub", about = "Voice playback and referral links for the partner dashboard")]
struct Args {
    /// Path to a YAML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose (debug) logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read text aloud, paragraph by paragraph (Ctrl-C stops)
    Speak {
        /// Text to read; use --file for longer scripts
        text: Option<String>,
        #[arg(short, long)]
        file: Option<PathBuf>,
        /// Key identifying the message being read
        #[arg(short, long, default_value = "cli")]
        key: String,
        /// Language tag, defaults to speech.default_language
        #[arg(short, long)]
        lang: Option<String>,
    },
    /// Print a stealth link for a referrer and shop
    Link { referrer: String, shop: String },
    /// Decode a stealth-link token
    Decode { token: String },
    /// Capture referral attribution from a request URL
    Capture { url: String },
    /// Show the referral stored for this session
    Referral,
    /// Notify the stored sponsor about a new lead
    Notify { lead: String, focus: String },
    /// Clear the stored session
    Logout,
    /// Run the local HTTP API
    Serve {
        #[arg(short, long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Keep audio backend and HTTP client internals quiet
    let filter = if args.verbose {
        EnvFilter::new("debug,rodio=info,reqwest=info,hyper=info")
    } else {
        EnvFilter::new("info,rodio=warn,reqwest=warn,hyper=warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::load(args.config.as_deref());
    let referral = Arc::new(build_referral(&config));

    match args.command {
        Command::Speak {
            text,
            file,
            key,
            lang,
        } => {
            let text = match (text, file) {
                (_, Some(path)) => std::fs::read_to_string(&path)?,
                (Some(text), None) => text,
                (None, None) => return Err("provide TEXT or --file".into()),
            };
            let speech = build_speech(&config)?;
            let Some(handle) = speech.play(&text, &key, lang.as_deref()) else {
                warn!("Nothing to read");
                return Ok(());
            };
            tokio::select! {
                _ = handle => {}
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted");
                    speech.stop();
                }
            }
        }
        Command::Link { referrer, shop } => {
            println!("{}", referral.generate_stealth_link(&referrer, &shop)?);
        }
        Command::Decode { token } => {
            let pair = referral.decode(&token)?;
            println!("{}", serde_json::to_string_pretty(&pair)?);
        }
        Command::Capture { url } => {
            let capture = referral.capture(&url);
            match capture.context {
                Some(ctx) => println!("{}", serde_json::to_string_pretty(&ctx)?),
                None => println!("no referral"),
            }
            if let Some(clean) = capture.clean_url {
                println!("clean url: {clean}");
            }
        }
        Command::Referral => match referral.stored_referral() {
            Some(ctx) => println!("{}", serde_json::to_string_pretty(&ctx)?),
            None => println!("no referral"),
        },
        Command::Notify { lead, focus } => {
            referral.notify_sponsor(&lead, &focus);
            // Give a webhook delivery a moment before the runtime shuts down
            tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        }
        Command::Logout => {
            referral.clear_session()?;
            info!("Session cleared");
        }
        Command::Serve { port } => {
            if !config.api.enabled {
                warn!("API disabled in config (api.enabled = false)");
                return Ok(());
            }
            let speech = match build_speech(&config) {
                Ok(speech) => Some(speech),
                Err(e) => {
                    warn!("Speech disabled: {e}");
                    None
                }
            };
            let state = ApiState { speech, referral };
            let shutdown = async {
                let _ = tokio::signal::ctrl_c().await;
                info!("Shutting down");
            };
            api::serve(state, port.unwrap_or(config.api.port), shutdown).await?;
        }
    }

    Ok(())
}

fn build_speech(config: &Config) -> Result<Arc<SpeechCoordinator>, Box<dyn std::error::Error>> {
    let synth = GeminiSynthesizer::new(&config.speech)?;
    info!(
        "Speech backend: {} (voice {}, pause {}ms)",
        config.speech.model, config.speech.voice, config.speech.paragraph_pause_ms
    );
    Ok(SpeechCoordinator::new(
        Arc::new(synth),
        Arc::new(RodioOutput::new()?),
        PlaybackSettings::from(&config.speech),
    ))
}

fn build_referral(config: &Config) -> ReferralService {
    let notifier: Arc<dyn SponsorNotifier> = match &config.referral.webhook_url {
        Some(url) => match WebhookNotifier::new(url.as_str()) {
            Ok(webhook) => Arc::new(webhook),
            Err(e) => {
                warn!("Sponsor webhook unavailable ({e}), logging notices instead");
                Arc::new(TracingNotifier)
            }
        },
        None => Arc::new(TracingNotifier),
    };
    ReferralService::new(
        config.referral.clone(),
        Arc::new(FileSessionStore::new(&config.session.path)),
        notifier,
    )
}
