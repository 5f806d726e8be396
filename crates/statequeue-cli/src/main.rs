//! statequeue demo: a linear pipeline over one queue.
//!
//! Jobs enter the first state and are consumed from there by a processor
//! with `--concurrency` slots. Completion moves them to the second state;
//! from there on the driver loop advances them with `done()` until they end.

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use serde_json::json;
use statequeue_core::{
    Delivery, JobQueue, JobQueueBuilder, LinearStates, MemoryJobStore, QueueConfig, QueueEvent,
    StateName,
};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::sleep;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "statequeue", version, about = "Run jobs through a linear state pipeline")]
struct Args {
    /// Queue name; every key is namespaced under it.
    #[arg(long, default_value = "demo")]
    queue: String,

    /// Ordered states, comma separated. The first one is consumed.
    #[arg(long, value_delimiter = ',', default_value = "ready,rendered,published")]
    states: Vec<String>,

    /// Jobs to submit.
    #[arg(long, default_value_t = 10)]
    jobs: usize,

    /// Deliveries allowed in flight.
    #[arg(long, default_value_t = 2)]
    concurrency: usize,

    /// Simulated work per delivery, in milliseconds.
    #[arg(long, default_value_t = 100)]
    work_ms: u64,

    /// Re-issue the blocking pop after this many milliseconds. Blocks forever when unset.
    #[arg(long)]
    pop_timeout_ms: Option<u64>,

    /// Use Redis at --host/--port instead of the in-memory store.
    #[cfg(feature = "redis")]
    #[arg(long, default_value_t = false)]
    redis: bool,

    #[cfg(feature = "redis")]
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    #[cfg(feature = "redis")]
    #[arg(long, default_value_t = 6379)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    let args = Args::parse();
    let pipeline = LinearStates::new(args.states.iter().map(String::as_str));
    let Some(consume_state) = pipeline.first().cloned() else {
        return Err("at least one state is required".into());
    };

    let queue = build_queue(&args, pipeline, &consume_state).await?;
    let mut events = queue.subscribe();

    for n in 0..args.jobs {
        let id = queue.create_new_id();
        queue.send(&id, json!({ "seq": n })).await?;
    }
    info!(
        jobs = args.jobs,
        pending = queue.wait_queue_length(&consume_state).await?,
        "jobs submitted"
    );

    let work = Duration::from_millis(args.work_ms);
    queue
        .register_processor(move |delivery: Delivery| async move {
            sleep(work).await;
            let id = delivery.id().clone();
            match delivery.complete().await {
                Ok(next) => info!(job_id = %id, next = ?next, "processed"),
                Err(err) => error!(job_id = %id, error = %err, "completion failed"),
            }
        })
        .await?;

    let ended = tokio::select! {
        ended = drive(&queue, &mut events, args.jobs) => ended?,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted");
            0
        }
    };

    info!(
        ended,
        processing = queue.processing_length().await?,
        "shutting down"
    );
    queue.end().await?;
    Ok(())
}

async fn build_queue(
    args: &Args,
    pipeline: LinearStates,
    consume_state: &StateName,
) -> Result<JobQueue, Box<dyn Error>> {
    let mut config = QueueConfig::new(args.queue.clone())
        .with_concurrency(args.concurrency)
        .with_consume_state(consume_state.clone());
    if let Some(ms) = args.pop_timeout_ms {
        config = config.with_pop_timeout(Duration::from_millis(ms));
    }
    #[cfg(feature = "redis")]
    let config = config.with_address(args.host.clone(), args.port);

    let builder = JobQueueBuilder::new(config).transitions(pipeline);

    #[cfg(feature = "redis")]
    if args.redis {
        return Ok(builder.connect().await?.build()?);
    }

    Ok(builder.store(Arc::new(MemoryJobStore::new())).build()?)
}

/// Advance every job past the consumed state until `total` jobs have ended.
async fn drive(
    queue: &JobQueue,
    events: &mut tokio::sync::broadcast::Receiver<QueueEvent>,
    total: usize,
) -> Result<usize, Box<dyn Error>> {
    let mut ended = 0;
    while ended < total {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "event stream lagged");
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        match event {
            QueueEvent::Transition(transition) => {
                info!(
                    job_id = %transition.id,
                    from = %transition.from,
                    to = transition.to.as_ref().map(StateName::as_str),
                    "transition"
                );
                // completion already moved it out of processing; the rest is ours
                match transition.to {
                    Some(state) => {
                        queue.done(&transition.id, &state).await?;
                    }
                    None => ended += 1,
                }
            }
            QueueEvent::ConsumeFailed { message } => {
                error!(%message, "consumption stopped, resuming");
                queue.resume().await;
            }
            QueueEvent::Close => break,
        }
    }
    Ok(ended)
}
