use std::process::ExitCode;
use std::sync::Arc;

use vermeer::{
    Cli, ClientConfig, Commands, FileSystemStorage, GenerationOptions, MidjourneyClient, Tuning,
    VermeerErrorKind,
};

/// Exit codes: 0 ok, 1 auth failure, 2 generation failure, 3 storage failure.
const EXIT_AUTH: u8 = 1;
const EXIT_GENERATION: u8 = 2;
const EXIT_STORAGE: u8 = 3;

#[tokio::main]
async fn main() -> ExitCode {
    // LOG_LEVEL feeds the filter; RUST_LOG still wins when set.
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| {
            tracing_subscriber::EnvFilter::try_new(
                std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            )
        })
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse_args();

    let config = match ClientConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            return ExitCode::from(EXIT_AUTH);
        }
    };

    match cli.command {
        Commands::Generate {
            prompt,
            upscale,
            output,
            seed,
            ar,
            quality,
            niji,
            version,
        } => {
            let options = GenerationOptions {
                seed,
                aspect_ratio: ar,
                quality,
                niji,
                version,
            };
            run_generate(config, &prompt, &options, upscale, output).await
        }
        Commands::Check => run_check(config).await,
    }
}

async fn run_generate(
    config: ClientConfig,
    prompt: &str,
    options: &GenerationOptions,
    upscale: bool,
    output: std::path::PathBuf,
) -> ExitCode {
    let storage = match FileSystemStorage::new(&output) {
        Ok(storage) => Arc::new(storage),
        Err(e) => {
            eprintln!("Storage error: {e}");
            return ExitCode::from(EXIT_STORAGE);
        }
    };
    let client = MidjourneyClient::new(config, Tuning::default()).with_storage(storage);

    if let Err(e) = client.initialize().await {
        eprintln!("Initialization failed: {e}");
        return ExitCode::from(EXIT_AUTH);
    }

    println!("Generating: {prompt}");
    let generation = match client.generate_with_options(prompt, options).await {
        Ok(result) => result,
        Err(e) => {
            eprintln!("Generation failed: {e}");
            client.close().await;
            return ExitCode::from(EXIT_GENERATION);
        }
    };

    if let Some(error) = &generation.error {
        eprintln!("Generation failed: {error}");
        client.close().await;
        return ExitCode::from(EXIT_GENERATION);
    }

    let Some(grid_id) = generation.grid_message_id else {
        eprintln!("Generation returned no grid id");
        client.close().await;
        return ExitCode::from(EXIT_GENERATION);
    };
    println!("Grid ready: message {grid_id}");
    if let Some(url) = &generation.image_url {
        println!("Grid image: {url}");
    }

    let mut upscales = Vec::new();
    if upscale {
        println!("Upscaling all four variants...");
        match client.upscale_all(grid_id).await {
            Ok(results) => {
                for result in &results {
                    match (&result.error, &result.image_url) {
                        (None, Some(url)) => {
                            println!("  U{} -> {}", result.variant_index + 1, url)
                        }
                        (Some(e), _) => {
                            eprintln!("  U{} failed: {}", result.variant_index + 1, e)
                        }
                        _ => eprintln!("  U{} resolved without a URL", result.variant_index + 1),
                    }
                }
                upscales = results;
            }
            Err(e) => {
                eprintln!("Upscale failed: {e}");
                client.close().await;
                return ExitCode::from(EXIT_GENERATION);
            }
        }
    }

    let exit = match client.save_artifacts(&generation, &upscales).await {
        Ok(paths) => {
            println!("Saved {} artifact(s):", paths.len());
            for path in paths {
                println!("  {path}");
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Storage failed: {e}");
            match e.kind() {
                VermeerErrorKind::Storage(_) => ExitCode::from(EXIT_STORAGE),
                VermeerErrorKind::Fetch(_) => ExitCode::from(EXIT_STORAGE),
                _ => ExitCode::from(EXIT_GENERATION),
            }
        }
    };

    client.close().await;
    exit
}

async fn run_check(config: ClientConfig) -> ExitCode {
    let client = MidjourneyClient::new(config, Tuning::default());
    match client.initialize().await {
        Ok(()) => {
            println!("Both gateway sessions ready");
            client.close().await;
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Initialization failed: {e}");
            ExitCode::from(EXIT_AUTH)
        }
    }
}
