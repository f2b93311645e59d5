/// Installs the tracing subscriber for binaries and tests.
///
/// Bridges `log` records into tracing and honors `TRIPLEDGER_LOG` for the
/// filter (default: crate at info, sqlx at warn). Safe to call more than
/// once; later calls are no-ops.
pub fn init() {
    let _ = tracing_log::LogTracer::init();
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("TRIPLEDGER_LOG").unwrap_or_else(|_| "tripledger=info,sqlx=warn".into()),
        )
        .with_target(true)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .try_init();
}
