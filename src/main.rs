mod args;
mod auth;
mod filters;
mod picstash;
mod session;
mod time;
mod uploads;
mod users;
mod view;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use log::{error, info};

use crate::args::Args;
use crate::picstash::PicStash;
use crate::session::SessionStore;
use crate::uploads::UploadStore;
use crate::users::UserStore;

#[tokio::main]
async fn main() -> ExitCode {
    pretty_env_logger::init();

    let args = Args::parse();

    let addr = match args.addr() {
        Ok(addr) => addr,
        Err(e) => {
            error!("couldn't parse listen address: {e}");
            return ExitCode::FAILURE;
        }
    };

    let uploads = match UploadStore::new(args.public_dir().join("pics")) {
        Ok(uploads) => uploads,
        Err(e) => {
            error!("couldn't create upload directory: {e}");
            return ExitCode::FAILURE;
        }
    };

    let picstash = Arc::new(PicStash::new(
        UserStore::new(),
        SessionStore::new(),
        uploads,
    ));

    let app = filters::app(picstash, args.secure(), args.public_dir().to_path_buf());

    info!("listening on {addr}");
    warp::serve(app).run(addr).await;

    ExitCode::SUCCESS
}
