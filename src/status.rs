//! Job status polling for the CLI.
//!
//! Thin consumer of [`crate::store::JobStore::get_status`]: prints the
//! job summary and any new events, and with `--watch` keeps polling with
//! the returned cursor until the job reaches a terminal status.

use anyhow::{bail, Result};
use std::time::Duration;

use crate::config::Config;
use crate::db;
use crate::models::JobEvent;
use crate::store::JobStore;

const WATCH_POLL_INTERVAL: Duration = Duration::from_millis(500);

pub async fn run_status(config: &Config, job_id: &str, after: i64, watch: bool) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = JobStore::new(pool.clone());

    let mut cursor = after;

    loop {
        let status = match store.get_status(job_id, cursor).await? {
            Some(status) => status,
            None => bail!("No job found with id: {}", job_id),
        };

        for event in &status.events {
            print_event(event);
        }
        cursor = status.next_after_event_id;

        let job = &status.job;
        if !watch || job.status.is_terminal() {
            println!();
            println!("job: {}", job.id);
            println!("  status: {}", job.status.as_str());
            println!("  step: {}", job.step.as_str());
            match job.total_segments {
                Some(total) => println!("  segments: {}/{}", job.completed_segments, total),
                None => println!("  segments: {}/?", job.completed_segments),
            }
            if !job.created_task_ids.is_empty() {
                println!("  created tasks:");
                for task_id in &job.created_task_ids {
                    println!("    - {}", task_id);
                }
            }
            if let Some(error) = &job.error {
                println!("  error: {}", error);
            }
            println!("  cursor: {}", cursor);
            break;
        }

        tokio::time::sleep(WATCH_POLL_INTERVAL).await;
    }

    pool.close().await;
    Ok(())
}

fn print_event(event: &JobEvent) {
    println!(
        "[{:>5}] {:5} {:18} {}",
        event.id,
        event.level.as_str(),
        event.step.as_str(),
        event.message
    );
}
