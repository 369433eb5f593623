use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use rosetta_crypto::group::{GroupParams, KeyPair};
use rosetta_proto::packet;
use rosetta_server::dispatch::{self, Connection, Dispatcher};

/// relay server for the Rosetta end-to-end-encrypted group chat protocol
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// address to listen on
    #[arg(long, env = "ROSETTA_LISTEN", default_value_t = default_listen_addr())]
    listen: SocketAddr,

    /// path to the big-endian group modulus M
    #[arg(long, env = "ROSETTA_M_FILE", default_value = "saved_M.dat")]
    m_file: std::path::PathBuf,

    /// path to the big-endian subgroup order Q
    #[arg(long, env = "ROSETTA_Q_FILE", default_value = "saved_Q.dat")]
    q_file: std::path::PathBuf,

    /// path to the big-endian generator G
    #[arg(long, env = "ROSETTA_G_FILE", default_value = "saved_G.dat")]
    g_file: std::path::PathBuf,

    /// path to the server's long-term private key
    #[arg(long, env = "ROSETTA_PRIVKEY_FILE", default_value = "server_privkey.dat")]
    privkey_file: std::path::PathBuf,

    /// log filter, e.g. "info" or "rosetta_server=debug"
    #[arg(long, env = "ROSETTA_LOG", default_value = "info")]
    log: String,
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], rosetta_proto::SERVER_PORT))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&args.log))
        .init();

    let m = std::fs::read(&args.m_file).with_context(|| format!("reading {:?}", args.m_file))?;
    let q = std::fs::read(&args.q_file).with_context(|| format!("reading {:?}", args.q_file))?;
    let g = std::fs::read(&args.g_file).with_context(|| format!("reading {:?}", args.g_file))?;
    let params = GroupParams::new(&m, &q, &g).context("loading group parameters")?;

    let privkey_bytes =
        std::fs::read(&args.privkey_file).with_context(|| format!("reading {:?}", args.privkey_file))?;
    let private = num_bigint::BigUint::from_bytes_be(&privkey_bytes);
    let server_long = KeyPair::from_private(&params, private);

    info!(listen = %args.listen, "starting rosetta-server");

    let dispatcher = Arc::new(Mutex::new(Dispatcher::new(params, server_long)));

    let socket = if args.listen.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    #[cfg(unix)]
    socket.set_reuseport(true)?;
    socket.bind(args.listen)?;
    let listener: TcpListener = socket.listen(1024)?;

    loop {
        let (stream, peer) = listener.accept().await?;
        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, dispatcher).await {
                warn!(%peer, error = %e, "connection ended with error");
            } else {
                debug!(%peer, "connection closed");
            }
        });
    }
}

/// read exactly one packet's worth of bytes off `stream`: enough leading
/// bytes to learn every magic's variable-length fields, then however many
/// more the dispatcher's length table says the packet needs.
const PEEK_LEN: usize = 32;

async fn read_packet(stream: &mut TcpStream) -> std::io::Result<Vec<u8>> {
    let mut peek = vec![0u8; PEEK_LEN];
    stream.read_exact(&mut peek).await?;
    let magic = u64::from_le_bytes(peek[0..8].try_into().unwrap());

    let expected = packet::expected_len(magic, &peek)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

    if expected <= PEEK_LEN {
        peek.truncate(expected);
        return Ok(peek);
    }
    let mut rest = vec![0u8; expected - PEEK_LEN];
    stream.read_exact(&mut rest).await?;
    peek.extend_from_slice(&rest);
    Ok(peek)
}

async fn handle_connection(mut stream: TcpStream, dispatcher: Arc<Mutex<Dispatcher>>) -> Result<()> {
    let mut conn = Connection::default();
    loop {
        let raw = match read_packet(&mut stream).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let outcome = {
            let mut dispatcher = dispatcher.lock().await;
            dispatch::process(&mut dispatcher, &mut conn, &raw)
        };

        match outcome {
            Ok(Some(reply)) => stream.write_all(&reply).await?,
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "dropping malformed or rejected packet");
            }
        }
    }
}
