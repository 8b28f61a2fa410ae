//! Router reachability probe.

use std::time::Instant;

use serde::Serialize;

use tikshape_config::Config;

use crate::cli::GlobalOpts;
use crate::config;
use crate::error::CliError;
use crate::output;

#[derive(Serialize)]
struct Pong {
    identity: String,
    host: String,
    port: u16,
    tls: bool,
    timeout_secs: u64,
    elapsed_ms: u128,
}

pub async fn handle(global: &GlobalOpts, cfg: &Config) -> Result<(), CliError> {
    let engine = config::reconciler(global, cfg, config::open_store(global, cfg, false)?)?;
    let started = Instant::now();
    let identity = engine.router().identity().await?;
    let connection = engine.router().connection();

    let pong = Pong {
        identity,
        host: connection.host.clone(),
        port: connection.port,
        tls: connection.tls,
        timeout_secs: config::timeout(global, cfg).as_secs(),
        elapsed_ms: started.elapsed().as_millis(),
    };
    let color = output::should_color(&global.color);
    let out = output::render_single(
        &global.output,
        &pong,
        |p| {
            [
                output::field("Identity", &p.identity, 9, color),
                output::field("Router", format!("{}:{}", p.host, p.port), 9, color),
                output::field("TLS", if p.tls { "yes" } else { "no" }, 9, color),
                output::field("Latency", format!("{} ms", p.elapsed_ms), 9, color),
            ]
            .join("\n")
        },
        |p| p.identity.clone(),
    )?;
    output::print_output(&out, global.quiet);
    engine.router().pool().close(connection).await;
    Ok(())
}
