use std::net::{AddrParseError, IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use clap::Parser;

#[derive(Parser, Debug)]
pub struct Args {
    /// Whether picstash's clients connect to it over https.
    /// If so, the session cookie is sent as a secure cookie.
    #[arg(short, long)]
    secure: bool,

    /// The address picstash should listen on. By default
    /// picstash will listen just on the IPv4 loopback.
    #[arg(short, long)]
    address: Option<String>,

    /// The port picstash listens on.
    #[arg(short, long, default_value_t = 8080)]
    port: u16,

    /// Directory served under /public. Uploads are stored
    /// beneath it, in public/pics.
    #[arg(long, default_value = "./public")]
    public_dir: PathBuf,
}

impl Args {
    pub fn addr(&self) -> Result<SocketAddr, AddrParseError> {
        self.address
            .as_deref()
            .unwrap_or("127.0.0.1")
            .parse()
            .map(|addr: IpAddr| (addr, self.port).into())
    }

    pub fn secure(&self) -> bool {
        self.secure
    }

    pub fn public_dir(&self) -> &Path {
        &self.public_dir
    }
}
