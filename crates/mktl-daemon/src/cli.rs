//! Command-line configuration for the generic `mktld` binary: a reference
//! daemon that serves whatever items are declared in a store's
//! configuration file with no custom [`crate::DaemonHooks`]. Instrument-
//! specific daemons link against this crate as a library and supply their
//! own hooks instead of using this binary.

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "mktld")]
#[command(about = "Generic mKTL daemon serving a store's declared items with no custom hooks")]
pub struct Cli {
    /// Store name this daemon is authoritative for.
    pub store: String,

    /// Configuration alias to load the item definitions from.
    #[arg(long, default_value = "default")]
    pub config: String,

    /// Interface to bind the REP/PUB listeners on.
    #[arg(long, default_value = "0.0.0.0")]
    pub address: String,

    /// UDP port discovery calls are broadcast to and answered on.
    #[arg(long, default_value_t = mktl_discovery::DEFAULT_DISCOVERY_PORT)]
    pub discovery_port: u16,

    /// Log format: "pretty" or "json".
    #[arg(long, default_value = "pretty", env = "MKTL_LOG_FORMAT")]
    pub log_format: String,
}
