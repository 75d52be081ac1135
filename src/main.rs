use std::process::ExitCode;
use std::time::Duration;

use base64::Engine as _;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

use voice_widget::backend::HttpBackend;
use voice_widget::voice::{
    CaptureConstraints, CaptureStream as _, CpalMicrophone, CpalSpeaker, FragmentSink,
    Microphone, PlaybackEngine, samples_to_wav,
};
use voice_widget::{
    ChatWidget, Config, FileSessionStore, InquiryForm, Role, SessionStore, WidgetEvent,
    submit_inquiry,
};

/// Voice Widget - chat with the assistant by text or voice
#[derive(Parser)]
#[command(name = "voice-widget", version, about)]
struct Cli {
    /// Backend base URL (overrides config file)
    #[arg(long, env = "VOICE_WIDGET_API_URL")]
    api_url: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Disable voice features (for machines without audio hardware)
    #[arg(long)]
    disable_voice: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Send a single text message
    Send {
        /// Message text
        text: String,
    },
    /// Record for a fixed time, upload, and play the reply
    Talk {
        /// Recording length in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Submit the merchant application form
    Inquiry(InquiryArgs),
    /// Inspect or reset the stored session
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
}

#[derive(Subcommand)]
enum SessionAction {
    /// Print the stored session identity
    Show,
    /// Forget the stored session identity
    Clear,
}

#[derive(clap::Args)]
struct InquiryArgs {
    #[arg(long)]
    first_name: String,
    #[arg(long)]
    last_name: String,
    #[arg(long)]
    email: String,
    #[arg(long)]
    phone: String,
    #[arg(long)]
    business_name: String,
    #[arg(long)]
    business_type: String,
    #[arg(long)]
    island: String,
    /// Free-text notes
    #[arg(long)]
    message: Option<String>,
}

impl From<InquiryArgs> for InquiryForm {
    fn from(args: InquiryArgs) -> Self {
        Self {
            first_name: args.first_name,
            last_name: args.last_name,
            email: args.email,
            phone: args.phone,
            business_name: args.business_name,
            business_type: args.business_type,
            island: args.island,
            message: args.message,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "warn,voice_widget=info",
        1 => "info,voice_widget=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load_with_options(cli.api_url.as_deref(), cli.disable_voice)?;
    tracing::debug!(
        base_url = %config.backend.base_url,
        voice = config.voice.enabled,
        "loaded configuration"
    );

    match cli.command {
        None => chat(&config).await,
        Some(Command::Send { text }) => send_once(&config, &text).await,
        Some(Command::Talk { duration }) => talk_once(&config, duration).await,
        Some(Command::Inquiry(args)) => inquiry(&config, args.into()).await,
        Some(Command::Session { action }) => session(&config, &action),
        Some(Command::TestMic { duration }) => test_mic(&config, duration).await,
        Some(Command::TestSpeaker) => test_speaker().await,
    }
}

/// Interactive chat session
#[allow(clippy::future_not_send)]
async fn chat(config: &Config) -> anyhow::Result<()> {
    let mut widget = ChatWidget::from_config(config)?;
    let mut events = widget.subscribe();
    widget.open();

    println!("Hi! I'm {}", widget.assistant_name());
    println!("{}", widget.greeting());
    for (i, suggestion) in widget.suggestions().iter().enumerate() {
        println!("  /{} {}", i + 1, suggestion.label);
    }
    println!("Commands: /talk (start/stop recording), /stop, /reset, /quit\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line {
            "/quit" | "/exit" => break,
            "/talk" => {
                widget.toggle_recording().await;
                if widget.is_recording() {
                    println!("(listening, type /talk again to send)");
                }
            }
            "/stop" => widget.stop_playback(),
            "/reset" => {
                widget.clear_session();
                println!("(conversation reset)");
            }
            _ => {
                if let Some(index) = line
                    .strip_prefix('/')
                    .and_then(|n| n.parse::<usize>().ok())
                    .and_then(|n| n.checked_sub(1))
                {
                    widget.send_suggestion(index).await;
                } else {
                    widget.send(line).await;
                }
            }
        }

        print_events(&mut events, widget.assistant_name());
        widget.clear_error();
        drain(&mut events);
    }

    Ok(())
}

/// Send one message and print the reply
#[allow(clippy::future_not_send)]
async fn send_once(config: &Config, text: &str) -> anyhow::Result<()> {
    let mut widget = ChatWidget::from_config(config)?;
    let mut events = widget.subscribe();
    widget.open();
    widget.send(text).await;
    print_events(&mut events, widget.assistant_name());

    if let Some(error) = widget.last_error() {
        anyhow::bail!("{error}");
    }
    Ok(())
}

/// Record, upload, and speak the reply
#[allow(clippy::future_not_send)]
async fn talk_once(config: &Config, duration: u64) -> anyhow::Result<()> {
    let mut widget = ChatWidget::from_config(config)?;
    let mut events = widget.subscribe();
    widget.open();

    widget.start_recording();
    if let Some(error) = widget.last_error() {
        anyhow::bail!("{error}");
    }

    println!("Recording for {duration} seconds...");
    tokio::time::sleep(Duration::from_secs(duration)).await;

    println!("Processing...");
    widget.stop_recording().await;
    print_events(&mut events, widget.assistant_name());

    widget.wait_for_playback().await;
    if let Some(error) = widget.last_error() {
        anyhow::bail!("{error}");
    }
    Ok(())
}

/// Validate and submit the inquiry form
async fn inquiry(config: &Config, form: InquiryForm) -> anyhow::Result<()> {
    let backend = HttpBackend::new(config.backend.clone())?;
    let receipt = submit_inquiry(&backend, &form).await?;

    match (&receipt.ticket_id, receipt.fallback) {
        (Some(ticket), _) => println!("Application submitted (ticket {ticket})"),
        (None, true) => println!("Application received"),
        (None, false) => println!("Application submitted"),
    }
    Ok(())
}

fn session(config: &Config, action: &SessionAction) -> anyhow::Result<()> {
    let mut store = FileSessionStore::open(config.session_file());
    match action {
        SessionAction::Show => match store.get() {
            Some(id) => println!("{id}"),
            None => println!("no session"),
        },
        SessionAction::Clear => {
            store.clear()?;
            println!("session cleared");
        }
    }
    Ok(())
}

fn print_events(events: &mut broadcast::Receiver<WidgetEvent>, assistant: &str) {
    loop {
        match events.try_recv() {
            Ok(WidgetEvent::MessageAppended(message)) => match message.role() {
                Role::User => println!("you: {}", message.content()),
                Role::Assistant => println!("{assistant}: {}", message.content()),
                Role::System => println!("-- {}", message.content()),
            },
            Ok(WidgetEvent::Error(error)) => eprintln!("! {error}"),
            Ok(WidgetEvent::StateChanged(_)) => {}
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "event printer lagged");
            }
            Err(_) => break,
        }
    }
}

fn drain(events: &mut broadcast::Receiver<WidgetEvent>) {
    while events.try_recv().is_ok() {}
}

/// Test microphone input
async fn test_mic(config: &Config, duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let constraints = CaptureConstraints {
        sample_rate: config.voice.sample_rate,
        ..CaptureConstraints::default()
    };
    let sink = FragmentSink::new(&constraints, config.voice.time_slice);
    let mut microphone = CpalMicrophone::new();
    let mut stream = microphone.acquire(&constraints)?;
    stream.begin(sink.clone())?;

    println!("Sample rate: {} Hz", constraints.sample_rate);
    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples: Vec<f32> = sink.drain().into_iter().flatten().collect();
        let energy = calculate_rms(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "#".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );
    }

    drop(stream);

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: arecord -l (to list devices)");

    Ok(())
}

/// Calculate RMS energy
#[allow(clippy::cast_precision_loss)]
fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Test speaker output with a sine wave played through the reply path
#[allow(clippy::future_not_send)]
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let sample_rate = 24_000_u32;
    let frequency = 440.0_f32;
    let num_samples = sample_rate as usize * 2;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3
        })
        .collect();

    let wav = samples_to_wav(&samples, sample_rate, 1)?;
    let encoded = base64::engine::general_purpose::STANDARD.encode(wav);

    println!("Playing {} samples at {} Hz...", samples.len(), sample_rate);

    let mut playback = PlaybackEngine::new(Box::new(CpalSpeaker::new()));
    playback.play(&encoded)?;
    playback.wait_until_finished().await;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");

    Ok(())
}
