use anyhow::{bail, Context, Result};
use std::process::ExitCode;
use std::sync::Arc;
use voicegate::config::AppConfig;
use voicegate::paths::AppPaths;
use voicegate::voice::store::{AlwaysUnlocked, FileKeyProvider, FileSecretBackend};
use voicegate::voice::{GateContext, TemplateStore, VoiceGate};
use voicegate::AudioInput;

const USAGE: &str = "usage: voicegate <enroll <wav> | verify <wav> | delete | status>";

enum Command {
    Enroll(String),
    Verify(String),
    Delete,
    Status,
}

fn parse_args(args: &[String]) -> Result<Command> {
    match args {
        [cmd, path] if cmd == "enroll" => Ok(Command::Enroll(path.clone())),
        [cmd, path] if cmd == "verify" => Ok(Command::Verify(path.clone())),
        [cmd] if cmd == "delete" => Ok(Command::Delete),
        [cmd] if cmd == "status" => Ok(Command::Status),
        _ => bail!("{}", USAGE),
    }
}

fn build_gate(paths: &AppPaths, config: &AppConfig) -> Result<VoiceGate> {
    let backend = FileSecretBackend::new(paths.templates_dir())
        .context("Failed to open template directory")?;
    let store = TemplateStore::new(
        Arc::new(backend),
        Arc::new(FileKeyProvider::new(paths.key_file())),
        Arc::new(AlwaysUnlocked),
    );
    let context = GateContext::from_config(config, store);
    Ok(VoiceGate::new(context, config.verification.clone()))
}

async fn run(command: Command) -> Result<bool> {
    let mut paths = AppPaths::new()?;
    let config_path = paths.config_file();
    std::fs::create_dir_all(&paths.config).context("Failed to create config directory")?;
    let config = AppConfig::load_or_create(&config_path)?;

    if let Some(dir) = &config.storage.dir {
        paths = paths.with_data_dir(dir.clone());
    }
    paths.ensure_directories()?;

    let gate = build_gate(&paths, &config)?;

    match command {
        Command::Enroll(path) => {
            let decision = gate.enroll(AudioInput::wav_file(&path)).await;
            println!("{}", serde_json::to_string_pretty(&decision)?);
            Ok(decision.success())
        }
        Command::Verify(path) => {
            let decision = gate.verify(AudioInput::wav_file(&path)).await;
            println!("{}", serde_json::to_string_pretty(&decision)?);
            if let Some(reason) = decision.reason() {
                if reason.requires_enrollment() {
                    eprintln!("No voice template enrolled. Run `voicegate enroll <wav>` first.");
                } else if reason.suggests_reenroll() {
                    eprintln!("The stored template could not be used. Consider re-enrolling.");
                }
            }
            Ok(decision.verified())
        }
        Command::Delete => {
            gate.delete_template().await?;
            println!("Template deleted");
            Ok(true)
        }
        Command::Status => {
            match gate.enrolled_at().await? {
                Some(at) => println!("Enrolled at {}", at.to_rfc3339()),
                None => println!("Not enrolled"),
            }
            println!(
                "Threshold {:.2}, timeout {}ms, extractor {:?} (dim {})",
                config.verification.threshold,
                config.verification.timeout_ms,
                config.extractor.kind,
                config.extractor.dim
            );
            Ok(true)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match parse_args(&args) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::from(2);
        }
    };

    match run(command).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            log::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
