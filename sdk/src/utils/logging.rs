use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Installs the default subscriber. Does nothing if the host application already installed one.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let mut filter = EnvFilter::new("debug");
        for directive in [
            "reqwest=info",
            "hyper=info",
            "hyper_util=info",
            "alloy_transport=info",
            "alloy_transport_http=info",
            "alloy_rpc_client=info",
        ] {
            match directive.parse() {
                Ok(directive) => filter = filter.add_directive(directive),
                Err(err) => eprintln!("Invalid log directive {directive}: {err}"),
            }
        }
        filter
    });

    let standard_format = fmt::format()
        .with_timer(fmt::time::time())
        .with_target(true)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false);

    let subscriber = tracing_subscriber::registry().with(filter).with(
        fmt::Layer::default()
            .with_writer(std::io::stdout)
            .event_format(standard_format),
    );

    if subscriber.try_init().is_err() {
        tracing::debug!("Global tracing subscriber already set, keeping it");
    }
}
