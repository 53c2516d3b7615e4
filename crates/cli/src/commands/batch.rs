use std::time::Duration;

use anyhow::Context as _;
use promptr_client::watch::watch_batch;
use promptr_client::BatchJob;
use tokio_util::sync::CancellationToken;

use super::{print_json, Context};
use crate::cli::BatchCommand;
use crate::prompts;

pub async fn run(ctx: &Context, command: BatchCommand) -> anyhow::Result<()> {
    let client = ctx.batch_client();

    match command {
        BatchCommand::Create {
            file,
            name,
            description,
            target,
        } => {
            let prompts = prompts::load(&file)?;
            let name = name.unwrap_or_else(|| prompts::default_name(&file));
            tracing::info!(name = %name, prompts = prompts.len(), "Creating batch");

            let job = client
                .create_batch(&name, prompts.as_slice(), description.as_deref(), target.as_deref())
                .await?;
            show(ctx, &job, false)
        }
        BatchCommand::Run {
            job_id,
            watch,
            interval_secs,
        } => {
            let job = client.run_batch(&job_id).await?;
            if !watch {
                return show(ctx, &job, false);
            }
            print_summary(&job);

            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    on_interrupt.cancel();
                }
            });

            let interval = Duration::from_secs(interval_secs.max(1));
            let finished = watch_batch(&client, &job_id, interval, &cancel, |job| {
                if !ctx.json {
                    print_summary(job);
                }
            })
            .await?;

            match finished {
                Some(job) => show(ctx, &job, false),
                None => {
                    eprintln!("Stopped watching {job_id}; the batch keeps running.");
                    Ok(())
                }
            }
        }
        BatchCommand::Status { job_id, tasks } => {
            let job = client.get_batch_status(&job_id).await?;
            show(ctx, &job, tasks)
        }
        BatchCommand::Stop { job_id } => {
            let job = client.stop_batch(&job_id).await?;
            show(ctx, &job, false)
        }
        BatchCommand::List => {
            let jobs = client.list_batches().await.context("failed to list batches")?;
            if ctx.json {
                return print_json(&jobs);
            }
            if jobs.is_empty() {
                println!("No batches.");
            }
            for job in &jobs {
                print_summary(job);
            }
            Ok(())
        }
    }
}

fn show(ctx: &Context, job: &BatchJob, with_tasks: bool) -> anyhow::Result<()> {
    if ctx.json {
        return print_json(job);
    }
    print_summary(job);
    if let Some(description) = &job.description {
        println!("  {description}");
    }
    if with_tasks {
        for task in &job.tasks {
            println!("  [{}] {}: {}", task.status, task.id, first_line(&task.prompt));
            if let Some(error) = &task.error {
                println!("      error: {error}");
            }
        }
    }
    Ok(())
}

fn print_summary(job: &BatchJob) {
    let progress = &job.progress;
    let failed = if progress.failed > 0 {
        format!(", {} failed", progress.failed)
    } else {
        String::new()
    };
    println!(
        "{}  {:<9}  {}/{} ({:.0}%{})  {}",
        job.job_id,
        job.status.as_str(),
        progress.completed,
        progress.total,
        progress.percentage,
        failed,
        job.name,
    );
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default()
}
