//! services/app/src/bin/errlens.rs
//!
//! Demo command-line surface over the core: validates and submits a
//! screenshot to the analysis backend, with the in-memory identity and
//! profile adapters standing in for the managed services.

use std::path::PathBuf;
use std::sync::Arc;

use app_lib::{
    adapters::{HttpAnalysisBackend, MemoryIdentityProvider, MemoryObjectStore, MemoryProfileStore},
    config::Config,
    error::AppError,
};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use errlens_core::{
    domain::ResultSource, ports::AnalysisBackend, session::Synchronizer, upload::UploadPipeline,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "errlens", about = "Analyze error screenshots")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Probe the analysis backend's health endpoint.
    Health,
    /// Validate, prepare and submit a screenshot for analysis.
    Analyze {
        /// Path to the screenshot (JPEG, PNG, GIF or WebP).
        image: PathBuf,
        /// Free-text context for the analyzer (max 1000 characters).
        #[arg(long)]
        context: Option<String>,
        /// Sign in (registering on first use) instead of the anonymous path.
        #[arg(long, requires = "password")]
        email: Option<String>,
        #[arg(long, requires = "email")]
        password: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Config::from_env()?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!(backend = %config.backend_base_url, "Configuration loaded");

    let cli = Cli::parse();

    // --- 2. Initialize Service Adapters ---
    let backend = Arc::new(HttpAnalysisBackend::new(
        &config.backend_base_url,
        config.request_timeout,
        config.health_retries,
    )?);
    let identity = Arc::new(MemoryIdentityProvider::new());
    let profiles = Arc::new(MemoryProfileStore::new());
    let objects = Arc::new(MemoryObjectStore::new());

    // --- 3. Build the Session Synchronizer ---
    let synchronizer = Arc::new(Synchronizer::new(identity, profiles, objects));

    match cli.command {
        Command::Health => {
            backend.health().await?;
            println!("analysis backend is reachable");
        }
        Command::Analyze {
            image,
            context,
            email,
            password,
        } => {
            if let (Some(email), Some(password)) = (email.as_deref(), password.as_deref()) {
                sign_in_or_register(&synchronizer, email, password).await?;
                let session = synchronizer.snapshot();
                info!(
                    authenticated = session.is_authenticated(),
                    count = session.analysis_count(),
                    "signed in"
                );
            }

            let bytes = Bytes::from(tokio::fs::read(&image).await?);
            let mut pipeline = UploadPipeline::new(backend, synchronizer.clone());

            let outcome = pipeline.validate(bytes)?;
            info!(
                width = outcome.width,
                height = outcome.height,
                needs_compression = outcome.needs_compression,
                "image validated"
            );

            let payload = pipeline.prepare_for_submission(|percent| {
                info!(percent, "preparing image");
            })?;

            let result = pipeline.submit(&payload, context.as_deref()).await?;
            render_result(&result);

            synchronizer.teardown().await;
        }
    }

    Ok(())
}

async fn sign_in_or_register(
    synchronizer: &Synchronizer,
    email: &str,
    password: &str,
) -> Result<(), AppError> {
    use errlens_core::errors::{AuthCode, CoreError};

    match synchronizer.login(email, password).await {
        Ok(_) => Ok(()),
        Err(CoreError::Auth(AuthCode::UserNotFound)) => {
            info!(%email, "no account found, registering");
            let display_name = email.split('@').next().unwrap_or("User");
            synchronizer.register(email, password, display_name).await?;
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

fn render_result(result: &errlens_core::domain::AnalysisResult) {
    if result.source == ResultSource::OfflineFallback {
        println!("[offline placeholder: the backend could not be reached]");
    }
    if let Some(problem) = &result.problem {
        println!("Problem: {problem}");
    }
    if let Some(category) = &result.category {
        println!("Category: {category}");
    }
    if let Some(severity) = &result.severity {
        println!("Severity: {severity}");
    }
    if let Some(confidence) = result.confidence {
        println!("Confidence: {:.0}%", confidence * 100.0);
    }
    for (index, solution) in result.solutions.iter().enumerate() {
        println!("\nSolution {}: {}", index + 1, solution.title);
        println!("  {}", solution.description);
        for (step_index, step) in solution.steps.iter().enumerate() {
            println!("  {}. {}", step_index + 1, step);
        }
        if let Some(warnings) = &solution.warnings {
            for warning in warnings {
                println!("  warning: {warning}");
            }
        }
    }
    if let Some(tips) = &result.prevention_tips {
        println!("\nPrevention:");
        for tip in tips {
            println!("  - {tip}");
        }
    }
}
