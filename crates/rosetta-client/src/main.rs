use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use num_bigint::BigUint;
use rand::rngs::OsRng;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{info, warn};

use rosetta_client::handshake::{self, LoginResult};
use rosetta_client::room;
use rosetta_client::{RoomState, ServerSession};
use rosetta_crypto::group::{GroupParams, KeyPair};
use rosetta_proto::packet;
use rosetta_proto::{MAGIC_10, MAGIC_11, MAGIC_20, MAGIC_21, MAGIC_30, MAGIC_40, MAGIC_50, MAGIC_51};

/// terminal client for the Rosetta end-to-end-encrypted group chat protocol
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// address of the relay server
    #[arg(long, env = "ROSETTA_SERVER", default_value_t = default_server_addr())]
    server: std::net::SocketAddr,

    /// path to this client's password-protected save file
    #[arg(long, env = "ROSETTA_SAVE_FILE", default_value = "client.save")]
    save_file: PathBuf,

    /// path to the big-endian group modulus M
    #[arg(long, env = "ROSETTA_M_FILE", default_value = "saved_M.dat")]
    m_file: PathBuf,

    /// path to the big-endian subgroup order Q
    #[arg(long, env = "ROSETTA_Q_FILE", default_value = "saved_Q.dat")]
    q_file: PathBuf,

    /// path to the big-endian generator G
    #[arg(long, env = "ROSETTA_G_FILE", default_value = "saved_G.dat")]
    g_file: PathBuf,

    /// path to the server's long-term public key
    #[arg(long, env = "ROSETTA_SERVER_PUBKEY_FILE", default_value = "server_pubkey.dat")]
    server_pubkey_file: PathBuf,

    /// save-file password; prompted on stdin if omitted
    #[arg(long, env = "ROSETTA_PASSWORD")]
    password: Option<String>,

    /// seconds between poller rounds
    #[arg(long, default_value_t = 2)]
    poll_interval_secs: u64,

    /// log filter, e.g. "info" or "rosetta_client=debug"
    #[arg(long, env = "ROSETTA_LOG", default_value = "info")]
    log: String,
}

fn default_server_addr() -> std::net::SocketAddr {
    std::net::SocketAddr::from(([127, 0, 0, 1], rosetta_proto::SERVER_PORT))
}

/// everything the user-interaction task and the poller task share: the
/// roommate table, the long-term server session, and the socket itself.
/// Mirrors spec.md §5's "single mutex serializes all read-modify-write
/// sequences on roommate state and on `server_nonce_counter`" by widening
/// the critical section to cover the request/reply round trip too, since
/// every Rosetta exchange on this connection is strictly request-then-reply.
struct Shared {
    stream: TcpStream,
    room: RoomState,
    session: ServerSession,
    params: GroupParams,
    server_pubkey: BigUint,
    long_term: KeyPair,
    own_user_ix: u64,
}

impl Shared {
    async fn send(&mut self, packet: &[u8]) -> Result<()> {
        self.stream.write_all(packet).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Vec<u8>> {
        read_reply(&mut self.stream).await.map_err(Into::into)
    }

    /// apply whatever the server handed back from a poll: a notification
    /// the room state needs updating for, or the signed "nothing pending"
    /// marker (spec.md §4.6 "Poll").
    fn apply_incoming(&mut self, magic: u64, raw: &[u8]) -> Result<()> {
        match magic {
            MAGIC_21 => {
                let notify = packet::NewGuestNotify::decode(raw)?;
                room::process_new_guest(&self.params, &self.server_pubkey, &self.session, &mut self.room, &notify)?;
                info!("a new guest joined the room");
            }
            MAGIC_30 => {
                let envelope = packet::TextEnvelope::decode(raw, true)?;
                let plaintext =
                    room::process_receive_text(&self.params, &self.server_pubkey, &mut self.room, self.own_user_ix, &envelope)?;
                println!("[{}] {}", envelope.sender_ix, String::from_utf8_lossy(&plaintext));
            }
            MAGIC_50 => {
                let notify = packet::IdentitySigned::decode(raw)?;
                room::process_guest_left(&self.params, &self.server_pubkey, &mut self.room, &notify)?;
                info!("a roommate left the room");
            }
            MAGIC_51 => {
                let signed = packet::Signed::decode(raw)?;
                room::process_owner_left(&self.params, &self.server_pubkey, &mut self.room, &signed)?;
                info!("the room owner left; room closed");
            }
            MAGIC_40 => {
                // signed "poll-empty" marker; nothing to do.
            }
            other => warn!(magic = other, "ignoring unexpected packet while polling"),
        }
        Ok(())
    }
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

    let server_pubkey_bytes = std::fs::read(&args.server_pubkey_file)
        .with_context(|| format!("reading {:?}", args.server_pubkey_file))?;
    let server_pubkey = BigUint::from_bytes_be(&server_pubkey_bytes);

    let password = match &args.password {
        Some(p) => p.clone().into_bytes(),
        None => {
            eprint!("save file password: ");
            let mut line = String::new();
            std::io::stdin().read_line(&mut line)?;
            line.trim_end_matches(['\n', '\r']).as_bytes().to_vec()
        }
    };

    let long_term = load_or_register(&params, &args.save_file, &password)?;

    info!(server = %args.server, "connecting");
    let mut stream = TcpStream::connect(args.server)
        .await
        .with_context(|| format!("connecting to {}", args.server))?;

    let mut rng = OsRng;
    let (short_term, hello) = handshake::start(&params, &mut rng);
    stream.write_all(&hello.encode()).await?;
    let raw = read_reply(&mut stream).await?;
    let server_hello = packet::ServerHello::decode(&raw)?;

    let (auth, session, handshake_n) =
        handshake::process_server_hello(&params, &server_pubkey, &short_term, &long_term, &server_hello)?;
    stream.write_all(&auth.encode()).await?;
    let raw = read_reply(&mut stream).await?;
    let reply_magic = u64::from_le_bytes(raw[0..8].try_into().unwrap());
    let own_user_ix = match handshake::process_login_reply(&params, &server_pubkey, &session, &handshake_n, reply_magic, &raw)? {
        LoginResult::Success { user_ix } => user_ix,
        LoginResult::Full => {
            anyhow::bail!("server has no free client slots");
        }
    };
    info!(user_ix = own_user_ix, "logged in");

    let shared = Arc::new(Mutex::new(Shared {
        stream,
        room: RoomState::new(),
        session,
        params,
        server_pubkey,
        long_term,
        own_user_ix,
    }));

    let poller = tokio::spawn(poll_loop(Arc::clone(&shared), args.poll_interval_secs));
    let interactive = tokio::spawn(interactive_loop(shared));

    tokio::select! {
        res = poller => res??,
        res = interactive => res??,
    }
    Ok(())
}

fn load_or_register(params: &GroupParams, path: &PathBuf, password: &[u8]) -> Result<KeyPair> {
    if path.exists() {
        let file = rosetta_keystore::load(path)?;
        Ok(rosetta_keystore::open(params, &file, password)?)
    } else {
        let mut rng = OsRng;
        let (file, keys) = rosetta_keystore::register(params, password, &mut rng)?;
        rosetta_keystore::store(path, &file)?;
        info!(path = %path.display(), "registered a new save file");
        Ok(keys)
    }
}

async fn poll_loop(shared: Arc<Mutex<Shared>>, interval_secs: u64) -> Result<()> {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
    loop {
        ticker.tick().await;
        let mut guard = shared.lock().await;
        let mut rng = OsRng;
        let own_user_ix = guard.own_user_ix;
        let poll_req = room::build_poll(&guard.params, &guard.long_term, own_user_ix, &mut rng).encode(MAGIC_40);
        guard.send(&poll_req).await?;
        let raw = guard.recv().await?;
        let magic = u64::from_le_bytes(raw[0..8].try_into().unwrap());
        if let Err(e) = guard.apply_incoming(magic, &raw) {
            warn!(error = %e, "dropping malformed poll reply");
        }
    }
}

/// user-interaction task: lines from stdin become either a chat command
/// (`/create <id>`, `/join <id>`, `/leave`, `/quit`) or, by default, plain
/// text fanned out to every current roommate.
async fn interactive_loop(shared: Arc<Mutex<Shared>>) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let mut guard = shared.lock().await;
        let mut rng = OsRng;
        let own_user_ix = guard.own_user_ix;

        if let Some(room_id) = line.strip_prefix("/create ") {
            let room_id: u64 = room_id.trim().parse().context("room id must be a number")?;
            let req = room::build_create_room(&guard.params, &guard.long_term, own_user_ix, &guard.session, room_id, &mut rng)?;
            guard.send(&req.encode(MAGIC_10)).await?;
            let raw = guard.recv().await?;
            let reply_magic = u64::from_le_bytes(raw[0..8].try_into().unwrap());
            match room::process_create_reply(&guard.params, &guard.server_pubkey, reply_magic, &raw) {
                Ok(()) => println!("room {room_id} created"),
                Err(e) => println!("create failed: {e}"),
            }
        } else if let Some(room_id) = line.strip_prefix("/join ") {
            let room_id: u64 = room_id.trim().parse().context("room id must be a number")?;
            let req = room::build_join_room(&guard.params, &guard.long_term, room_id, &mut rng);
            guard.send(&req.encode(MAGIC_20)).await?;
            let raw = guard.recv().await?;
            let reply_magic = u64::from_le_bytes(raw[0..8].try_into().unwrap());
            if reply_magic == MAGIC_11 {
                let signed = packet::Signed::decode(&raw)?;
                let sig = rosetta_crypto::schnorr::Signature::from_bytes(&signed.sig);
                let _ = rosetta_crypto::schnorr::verify(&guard.params, &guard.server_pubkey, b"room-full", &sig);
                println!("join failed: room has no free guest slots");
            } else {
                let reply = packet::JoinReply::decode(&raw)?;
                let n = room::process_join_reply(&guard.params, &guard.server_pubkey, &guard.session, &mut guard.room, room_id, &reply)?;
                println!("joined room {room_id}, {n} roommate(s) already present");
            }
        } else if line.trim() == "/leave" {
            let req = room::build_leave(&guard.params, &guard.long_term, own_user_ix, &mut rng);
            guard.send(&req).await?;
            guard.room.clear_room();
            println!("left the room");
        } else if line.trim() == "/quit" {
            let req = room::build_logoff(&guard.params, &guard.long_term, own_user_ix, &mut rng);
            guard.send(&req).await?;
            println!("logged off");
            return Ok(());
        } else if !line.trim().is_empty() {
            let envelope = room::build_send_text(&guard.params, &guard.long_term, own_user_ix, &mut guard.room, line.as_bytes(), &mut rng)?;
            guard.send(&envelope.encode()).await?;
        }
    }
    Ok(())
}

/// read one reply packet off `stream`.
///
/// `rosetta_proto::packet::expected_len` frames the *request* shapes a
/// magic can carry C→S (what the server's own `read_packet` uses); every
/// S→C reply reuses the same magic constants for a differently shaped
/// packet (an explicit `sig_len`/`pubkey_len` trailer, or no declared
/// length at all), so this client needs its own table of the reply
/// layouts from `rosetta_proto::packet`'s doc comments.
async fn read_reply(stream: &mut TcpStream) -> std::io::Result<Vec<u8>> {
    use rosetta_proto::{PUBKEY_BYTES, SESSION_KEY, SIGNATURE_LEN, SMALL_FIELD};
    use rosetta_proto::{MAGIC_00, MAGIC_01, MAGIC_02, MAGIC_10, MAGIC_11, MAGIC_20, MAGIC_21, MAGIC_30, MAGIC_40, MAGIC_50, MAGIC_51};

    let mut buf = vec![0u8; 8];
    stream.read_exact(&mut buf).await?;
    let magic = u64::from_le_bytes(buf[0..8].try_into().unwrap());

    let fixed_total = match magic {
        MAGIC_00 => Some(8 + 8 + PUBKEY_BYTES + 8 + SIGNATURE_LEN), // ServerHello
        MAGIC_01 => Some(8 + SMALL_FIELD + 8 + SIGNATURE_LEN),      // ServerLoginOk
        MAGIC_02 | MAGIC_10 | MAGIC_11 | MAGIC_40 | MAGIC_51 => Some(8 + SIGNATURE_LEN), // Signed
        MAGIC_50 => Some(8 + SMALL_FIELD + SIGNATURE_LEN),          // IdentitySigned
        MAGIC_21 => Some(8 + SESSION_KEY + SMALL_FIELD + PUBKEY_BYTES + SIGNATURE_LEN), // NewGuestNotify
        _ => None,
    };

    if let Some(total) = fixed_total {
        let mut rest = vec![0u8; total - 8];
        stream.read_exact(&mut rest).await?;
        buf.extend_from_slice(&rest);
        return Ok(buf);
    }

    if magic == MAGIC_20 {
        // JoinReply: k_onetime_enc[32] ‖ guest_count:u64 ‖ guests ‖ sig
        let mut head = vec![0u8; SESSION_KEY + 8];
        stream.read_exact(&mut head).await?;
        let count = u64::from_le_bytes(head[SESSION_KEY..SESSION_KEY + 8].try_into().unwrap()) as usize;
        buf.extend_from_slice(&head);
        let rest_len = count * (SMALL_FIELD + PUBKEY_BYTES) + SIGNATURE_LEN;
        let mut rest = vec![0u8; rest_len];
        stream.read_exact(&mut rest).await?;
        buf.extend_from_slice(&rest);
        return Ok(buf);
    }

    if magic == MAGIC_30 {
        // delivered TextEnvelope: sender_ix ‖ text_len ‖ count ‖ slots ‖ client_sig ‖ server_sig
        let mut head = vec![0u8; 24];
        stream.read_exact(&mut head).await?;
        let text_len = u64::from_le_bytes(head[8..16].try_into().unwrap()) as usize;
        let count = u64::from_le_bytes(head[16..24].try_into().unwrap()) as usize;
        buf.extend_from_slice(&head);
        let slot_len = SMALL_FIELD + SESSION_KEY + text_len;
        let rest_len = count * slot_len + SIGNATURE_LEN + SIGNATURE_LEN;
        let mut rest = vec![0u8; rest_len];
        stream.read_exact(&mut rest).await?;
        buf.extend_from_slice(&rest);
        return Ok(buf);
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        format!("unexpected reply magic {magic}"),
    ))
}
