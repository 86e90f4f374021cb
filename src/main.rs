use anyhow::Context;
use clap::Parser;
use protocol_improver::config::{Cli, Command};
use protocol_improver::domain::ports::ModelClient;
use protocol_improver::utils::error::{ErrorSeverity, ProtocolError};
use protocol_improver::utils::{logger, validation::Validate};
use protocol_improver::{
    AnthropicClient, LocalStorage, ReportEngine, ReportOptions, ReportPipeline, Settings,
};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let loaded = Settings::load(cli.config.as_deref());

    // 初始化日誌
    let json_logs = matches!(cli.command, Command::Serve { .. })
        && loaded.as_ref().map(|s| s.json_logs()).unwrap_or(false);
    if json_logs {
        logger::init_server_logger(cli.verbose, true);
    } else {
        logger::init_cli_logger(cli.verbose);
    }

    let mut settings = match loaded {
        Ok(settings) => settings,
        Err(e) => exit_with(&e),
    };

    match cli.command {
        Command::Serve { host, port } => {
            if let Some(host) = host {
                settings.server.host = Some(host);
            }
            if let Some(port) = port {
                settings.server.port = Some(port);
            }
            validate_or_exit(&settings);

            tracing::info!("Starting protocol-improver server");
            if let Err(e) = protocol_improver::serve(settings).await {
                exit_with(&e);
            }
        }
        Command::Analyze {
            file,
            output,
            improve,
            min_priority,
        } => {
            validate_or_exit(&settings);

            tokio::fs::create_dir_all(&output)
                .await
                .with_context(|| format!("creating output directory {}", output.display()))?;

            let client = match AnthropicClient::from_settings(&settings) {
                Ok(client) => Arc::new(client),
                Err(e) => exit_with(&e),
            };
            let storage = LocalStorage::new(output.clone());
            let pipeline = ReportPipeline::new(
                storage,
                client,
                &settings,
                ReportOptions {
                    source: file,
                    output_dir: output,
                    improve,
                    min_priority,
                },
            );

            match ReportEngine::new(pipeline).run().await {
                Ok(output_path) => {
                    println!("✅ Protocol analysis completed successfully!");
                    println!("📁 Report saved to: {}", output_path);
                }
                Err(e) => exit_with(&e),
            }
        }
        Command::Check => run_check(&settings).await,
    }

    Ok(())
}

async fn run_check(settings: &Settings) {
    println!("🔍 Checking protocol-improver setup");

    if let Err(e) = settings.validate() {
        exit_with(&e);
    }
    println!("✅ Configuration is valid (model: {})", settings.model_name());

    if let Err(e) = tokio::fs::create_dir_all(settings.output_folder()).await {
        exit_with(&ProtocolError::IoError(e));
    }
    println!("✅ Output folder ready: {}", settings.output_folder());

    let client = match AnthropicClient::from_settings(settings) {
        Ok(client) => client,
        Err(e) => exit_with(&e),
    };

    if client.quick_check().await {
        println!("✅ Model API connection working");
    } else {
        eprintln!("❌ Model API connection failed");
        eprintln!("💡 Check your API key, credit balance and network access");
        std::process::exit(1);
    }
}

fn validate_or_exit(settings: &Settings) {
    if let Err(e) = settings.validate() {
        tracing::error!("❌ Configuration validation failed: {}", e);
        exit_with(&e);
    }
}

fn exit_with(e: &ProtocolError) -> ! {
    tracing::error!(
        "❌ Protocol improver failed: {} (Category: {:?}, Severity: {:?})",
        e,
        e.category(),
        e.severity()
    );
    tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

    eprintln!("❌ {}", e.user_friendly_message());
    eprintln!("💡 Suggestion: {}", e.recovery_suggestion());

    // 根據錯誤嚴重程度決定退出碼
    let exit_code = match e.severity() {
        ErrorSeverity::Low | ErrorSeverity::High => 1,
        ErrorSeverity::Medium => 2, // 可重試
        ErrorSeverity::Critical => 3,
    };
    std::process::exit(exit_code);
}
