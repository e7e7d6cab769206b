use tracing::Subscriber;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// JSON subscriber writing to `sink`; `RUST_LOG` controls the level (default `info`).
pub fn get_subscriber<Sink>(sink: Sink) -> impl Subscriber + Send + Sync
where
    Sink: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let formatting_layer = tracing_subscriber::fmt::layer().with_writer(sink).json();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(formatting_layer)
}

/// Install `get_subscriber(sink)` globally. A second call is a no-op.
pub fn init_telemetry<Sink>(sink: Sink)
where
    Sink: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let _ = get_subscriber(sink).try_init();
}
