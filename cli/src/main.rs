pub mod cli;

use clap::Parser;

use cli::{Cli, Command, HistoricalCommand};
use common::init_tracing;
use corelib::{Environment, HistoricalRange, IngestConfig, IngestError, ProviderId, RequestBuilder};
use loader::LoadingId;

/// Maps the stable error taxonomy (§7) onto the process exit codes the CLI
/// driver promises callers: everything not explicitly called out falls
/// back to 2, since a CLI invocation that can't complete its one request is
/// closest in spirit to "no fallback possible" among the four non-zero codes.
fn exit_code_for(error: &IngestError) -> i32 {
    match error {
        IngestError::InvalidConfig(_) => 1,
        IngestError::QuotaExhausted(_) => 2,
        IngestError::ProviderFailure { status, .. } if *status == 401 || *status == 403 => 4,
        _ => 2,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match IngestConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("invalid configuration: {e}");
            std::process::exit(1);
        }
    };

    init_tracing(matches!(config.environment, Environment::Prod));

    let service = match ingest::bootstrap_default(config).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("failed to initialize ingest service: {e}");
            std::process::exit(3);
        }
    };

    match cli.command {
        Command::Fetch {
            data_type,
            symbol,
            priority,
            no_cache,
        } => {
            let request = RequestBuilder::new(data_type.into(), symbol)
                .priority(priority.into())
                .allow_cache(!no_cache)
                .build();

            match service.fetch(request).await {
                Ok(outcome) => {
                    let body = serde_json::json!({
                        "source_kind": format!("{:?}", outcome.source_kind),
                        "quality": outcome.quality,
                        "payload": String::from_utf8_lossy(&outcome.payload),
                    });
                    println!("{}", serde_json::to_string_pretty(&body)?);
                }
                Err(e) => {
                    eprintln!("fetch failed ({}): {e}", e.kind());
                    std::process::exit(exit_code_for(&e));
                }
            }
        }

        Command::Historical(HistoricalCommand::Load {
            symbol,
            provider,
            timeframe,
            start,
            end,
        }) => {
            let range = HistoricalRange {
                symbol,
                provider: ProviderId::new(provider),
                timeframe,
                start,
                end,
            };
            match service.start_historical_load(range) {
                Ok(id) => println!("{{\"loading_id\": \"{id}\"}}"),
                Err(e) => {
                    eprintln!("failed to start historical load ({}): {e}", e.kind());
                    std::process::exit(exit_code_for(&e));
                }
            }
        }

        Command::Historical(HistoricalCommand::Status { id }) => {
            match service.loading_status(LoadingId(id)) {
                Some(progress) => {
                    let body = serde_json::json!({
                        "state": format!("{:?}", progress.state),
                        "total_chunks": progress.total_chunks,
                        "completed": progress.completed,
                        "failed": progress.failed,
                        "bytes": progress.bytes,
                        "eta": progress.eta,
                    });
                    println!("{}", serde_json::to_string_pretty(&body)?);
                }
                None => {
                    eprintln!("no such loading id: {id}");
                    std::process::exit(2);
                }
            }
        }

        Command::Stats => {
            let stats = service.stats().await?;
            let per_provider: serde_json::Map<String, serde_json::Value> = stats
                .per_provider
                .into_iter()
                .map(|(id, s)| {
                    (
                        id.to_string(),
                        serde_json::json!({
                            "daily_used": s.daily_used,
                            "daily_remaining": s.daily_remaining,
                            "monthly_used": s.monthly_used,
                            "monthly_remaining": s.monthly_remaining,
                            "utilization_pct": s.utilization_pct,
                        }),
                    )
                })
                .collect();
            let body = serde_json::json!({
                "per_provider": per_provider,
                "cache": {
                    "total_entries": stats.cache.total_entries,
                    "permanent_entries": stats.cache.permanent_entries,
                    "total_size_bytes": stats.cache.total_size_bytes,
                    "hit_rate": stats.cache.hit_rate,
                },
            });
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
    }

    Ok(())
}
