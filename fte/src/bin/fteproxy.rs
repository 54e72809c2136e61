//! A thin TCP relay over [`fte::FteStream`].
//!
//! Client mode accepts plain TCP on the client address and forwards it,
//! FTE-shaped, to the server address. Server mode accepts FTE-shaped
//! connections, negotiates the format from the first cell, and forwards
//! the recovered bytes to the proxy address. All the interesting work
//! happens in the `fte` crate; this binary is socket plumbing.

use std::io::{ErrorKind, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::process::ExitCode;
use std::thread;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use log::{error, info, warn};

use fte::defs::DEFAULT_RELEASE;
use fte::{Definitions, FteStream, Keys};

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Mode {
    Client,
    Server,
}

#[derive(Parser, Debug)]
#[command(name = "fteproxy", about = "format-transforming encryption TCP relay")]
struct Args {
    #[arg(long, value_enum)]
    mode: Mode,

    /// Where client mode listens for plain TCP.
    #[arg(long, default_value = "127.0.0.1")]
    client_ip: String,
    #[arg(long, default_value_t = 8079)]
    client_port: u16,

    /// Where server mode listens, and where client mode connects.
    #[arg(long, default_value = "127.0.0.1")]
    server_ip: String,
    #[arg(long, default_value_t = 8080)]
    server_port: u16,

    /// Where server mode forwards recovered plaintext.
    #[arg(long, default_value = "127.0.0.1")]
    proxy_ip: String,
    #[arg(long, default_value_t = 8081)]
    proxy_port: u16,

    /// Format for client-to-server traffic.
    #[arg(long, default_value = "words-request")]
    upstream_format: String,
    /// Format for server-to-client traffic.
    #[arg(long, default_value = "words-response")]
    downstream_format: String,

    /// Definitions release identifier (YYYYMMDD).
    #[arg(long, default_value = DEFAULT_RELEASE)]
    release: String,
    /// Directory holding `<release>.json`; embedded catalog when absent.
    #[arg(long)]
    defs_dir: Option<PathBuf>,

    /// 64 hex characters: K1 followed by K2. Test-vector keys when
    /// absent.
    #[arg(long)]
    key: Option<String>,

    #[arg(long)]
    quiet: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    env_logger::Builder::from_default_env()
        .filter_level(if args.quiet {
            log::LevelFilter::Off
        } else {
            log::LevelFilter::Info
        })
        .init();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let keys = match &args.key {
        Some(hex) => Keys::from_hex(hex)?,
        None => Keys::default(),
    };
    let defs = match &args.defs_dir {
        Some(dir) => Definitions::load(dir, &args.release)?,
        None => Definitions::embedded().clone(),
    };

    // both formats must exist before we accept anything
    defs.get(&args.upstream_format)?;
    defs.get(&args.downstream_format)?;

    let listen = match args.mode {
        Mode::Client => format!("{}:{}", args.client_ip, args.client_port),
        Mode::Server => format!("{}:{}", args.server_ip, args.server_port),
    };
    let listener = TcpListener::bind(&listen)?;
    info!("{:?} mode listening on {listen}", args.mode);

    for accepted in listener.incoming() {
        let local = match accepted {
            Ok(socket) => socket,
            Err(err) => {
                warn!("accept failed: {err}");
                continue;
            }
        };
        let keys = keys.clone();
        let defs = defs.clone();
        let args_snapshot = ConnArgs::from(args);
        thread::spawn(move || {
            if let Err(err) = relay_one(local, keys, defs, args_snapshot) {
                warn!("connection closed: {err}");
            }
        });
    }
    Ok(())
}

/// The per-connection subset of the CLI arguments.
#[derive(Clone)]
struct ConnArgs {
    mode: Mode,
    server_addr: String,
    proxy_addr: String,
    upstream_format: String,
    downstream_format: String,
    release: String,
}

impl From<&Args> for ConnArgs {
    fn from(args: &Args) -> ConnArgs {
        ConnArgs {
            mode: args.mode,
            server_addr: format!("{}:{}", args.server_ip, args.server_port),
            proxy_addr: format!("{}:{}", args.proxy_ip, args.proxy_port),
            upstream_format: args.upstream_format.clone(),
            downstream_format: args.downstream_format.clone(),
            release: args.release.clone(),
        }
    }
}

fn relay_one(
    local: TcpStream,
    keys: Keys,
    defs: Definitions,
    args: ConnArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    match args.mode {
        Mode::Client => {
            let remote = TcpStream::connect(&args.server_addr)?;
            info!("relaying to {}", args.server_addr);
            let fte = FteStream::builder()
                .transport(remote)
                .keys(keys)
                .defs(&defs)
                .release(args.release)
                .upstream_format(&args.upstream_format)
                .downstream_format(&args.downstream_format)
                .build()?;
            shuttle(local, fte)
        }
        Mode::Server => {
            let fte = FteStream::builder()
                .transport(local)
                .keys(keys)
                .defs(&defs)
                .build()?;
            let upstream = TcpStream::connect(&args.proxy_addr)?;
            info!("relaying to {}", args.proxy_addr);
            shuttle(upstream, fte)
        }
    }
}

/// Move bytes both ways between a plain socket and an FTE stream until
/// either side closes. Single-threaded: both sockets run short read
/// timeouts and the loop alternates directions.
fn shuttle(
    plain: TcpStream,
    mut fte: FteStream<TcpStream>,
) -> Result<(), Box<dyn std::error::Error>> {
    const TICK: Duration = Duration::from_millis(20);
    let mut plain = plain;
    plain.set_read_timeout(Some(TICK))?;
    fte.get_ref().set_read_timeout(Some(TICK))?;

    let mut buf = [0u8; 1 << 15];
    loop {
        match plain.read(&mut buf) {
            Ok(0) => break, // local side closed
            Ok(n) => {
                fte.send(&buf[..n])?;
            }
            Err(err)
                if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(err) => return Err(err.into()),
        }

        let incoming = fte.recv(buf.len())?;
        if !incoming.is_empty() {
            plain.write_all(&incoming)?;
        }
    }

    fte.close()?;
    Ok(())
}
