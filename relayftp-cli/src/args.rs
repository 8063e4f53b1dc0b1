use std::path::PathBuf;

use argh::FromArgs;

#[derive(FromArgs)]
#[argh(description = "Interactive FTP client running transfers in the background")]
pub struct Args {
    #[argh(switch, short = 'D', description = "enable TRACE log level")]
    pub debug: bool,
    #[argh(switch, short = 'v', description = "verbose mode")]
    pub verbose: bool,
    #[argh(
        option,
        default = "60",
        description = "seconds the server is given to connect in active mode (default 60)"
    )]
    pub accept_timeout: u64,
    #[argh(
        switch,
        description = "end multi-line replies only on the line repeating their opening code"
    )]
    pub strict_replies: bool,
    #[argh(
        option,
        description = "directory downloads are written to and uploads read from"
    )]
    pub local_dir: Option<PathBuf>,
    #[argh(
        option,
        default = "relayftp::DEFAULT_MAX_TRANSFERS",
        description = "maximum number of transfers running at once (default 8)"
    )]
    pub max_transfers: usize,
    #[argh(positional, description = "host to connect to")]
    pub host: String,
    /// Numeric only: service names such as `ftp` are not looked up
    #[argh(positional, description = "numeric port of the FTP server, e.g. 21")]
    pub port: u16,
}
