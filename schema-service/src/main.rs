//! pgai Schema service: catalog discovery, caching, change detection, and
//! subscription fan-out for user-configured target databases (spec §1,
//! §4.8-§4.11).
#[macro_use]
extern crate slog_scope;

use std::error::Error;
use std::sync::Arc;

use docopt::Docopt;
use serde::Deserialize;

use pgai_common::{logging, metrics_from_opts};
use pgai_schema_service::{server, AppState};
use pgai_settings::Settings;

const USAGE: &str = "
Usage: pgai-schema [options]

Options:
    -h, --help           Show this message.
    --config=CONFIGFILE  Schema service configuration file path.
";

#[derive(Debug, Deserialize)]
struct Args {
    flag_config: Option<String>,
}

#[actix_web::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args: Args = Docopt::new(USAGE)
        .and_then(|d| d.deserialize())
        .unwrap_or_else(|e| e.exit());
    let settings = Settings::with_env_and_config_file(args.flag_config.as_deref())?;
    logging::init_logging("pgai-schema", settings.human_logs);
    debug!("Starting up...");

    let _sentry = sentry::init(sentry::ClientOptions {
        release: sentry::release_name!(),
        ..sentry::ClientOptions::default()
    });

    let statsd_client = metrics_from_opts(
        "pgai-schema",
        settings.statsd_host.as_deref(),
        settings.statsd_port,
    )?;
    let metrics = pgai_common::Metrics::from(&statsd_client);

    let banner = settings.banner("pgai-schema");
    let state = Arc::new(AppState::new(Arc::new(settings), metrics));
    let server = server::run(state).await?;

    info!("{}", banner);
    server.await?;
    info!("Server closing");
    logging::reset_logging();

    Ok(())
}
