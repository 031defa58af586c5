use tracing_subscriber::EnvFilter;

/// Installs the fmt subscriber. `RUST_LOG` directives are honoured, with the
/// gateway crates at `info` unless overridden.
pub fn init_tracing() {
    let mut filter = EnvFilter::from_default_env();
    for directive in ["telemetry_gateway=info", "meter_core=info"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
