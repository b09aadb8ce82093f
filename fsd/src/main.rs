//! `fsd` — the file-system service.
//!
//! Connects to a running `diskd` as a [`ufs::disk::DiskClient`], mounts (or
//! waits to be told to format) the volume behind it, and speaks a
//! line-oriented text protocol to its own clients: `f`, `mk`, `mkdir`, `rm`,
//! `rmdir`, `cd`, `ls`, `cat`, `w`, `i`, `d`, `chmod`, `login`, `logout`,
//! `p`, `clearcache`, `e`. Every command maps onto one [`ufs::Engine`]
//! method; this file's job is just framing, argument parsing, and mapping
//! results back onto the reply strings the protocol promises.

mod reply;
mod time;

use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tracing::{info, warn};

use ufs::disk::DiskClient;
use ufs::{Engine, Session, Volume};
use wire::{read_frame, write_frame};

/// File-system service: mounts a volume over a running disk backend.
#[derive(Parser, Debug)]
struct Args {
    /// Hostname or address of the disk backend.
    disk_host: String,
    /// TCP port of the disk backend.
    disk_port: u16,
    /// TCP port this service listens on for its own clients.
    fs_port: u16,
}

/// Cheaply cloneable, shared across every connection: the disk's geometry
/// (needed by `f`, which formats using server-wide geometry rather than
/// whatever a client happens to pass) and the engine itself.
#[derive(Clone)]
struct AppState {
    engine: Engine,
    ncyl: u32,
    nsec: u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let disk_stream = TcpStream::connect((args.disk_host.as_str(), args.disk_port)).await?;
    let disk = DiskClient::connect(disk_stream).await?;
    let (ncyl, nsec) = disk.geometry();
    info!(host = %args.disk_host, port = args.disk_port, ncyl, nsec, "connected to disk backend");

    let mut volume = Volume::new(Arc::new(disk), 64);
    volume.load_superblock().await;
    let formatted = volume.is_formatted();
    info!(formatted, "volume mounted");

    let engine = Engine::new(Arc::new(Mutex::new(volume)));
    let state = AppState { engine, ncyl, nsec };

    let listener = TcpListener::bind(("0.0.0.0", args.fs_port)).await?;
    info!(port = args.fs_port, "fsd listening");

    loop {
        let (socket, peer) = listener.accept().await?;
        let state = state.clone();
        tokio::spawn(async move {
            info!(%peer, "client connected");
            if let Err(e) = handle_connection(socket, state).await {
                warn!(%peer, error = %e, "connection ended with error");
            }
            info!(%peer, "client disconnected");
        });
    }
}

async fn handle_connection<S>(mut socket: S, state: AppState) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut session = Session::new();
    loop {
        let frame = match read_frame(&mut socket).await {
            Ok(f) => f,
            Err(wire::WireError::Closed) => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let (reply_body, close) = dispatch(&state, &mut session, &frame).await;
        write_frame(&mut socket, &reply_body).await?;
        if close {
            return Ok(());
        }
    }
}

/// Splits a frame into its verb and the raw bytes after the first space (or
/// an empty slice if there is none). The verb is always plain ASCII, but
/// `rest` is left untouched — commands with binary payloads (`w`, `i`) slice
/// it by byte offset instead of re-tokenizing it as text.
fn split_verb(frame: &[u8]) -> (&str, &[u8]) {
    let sp = frame.iter().position(|&b| b == b' ').unwrap_or(frame.len());
    let verb_bytes = frame[..sp].strip_suffix(&[0u8]).unwrap_or(&frame[..sp]);
    let verb = std::str::from_utf8(verb_bytes).unwrap_or("");
    let rest = if sp < frame.len() { &frame[sp + 1..] } else { &[][..] };
    (verb, rest)
}

/// Equivalent to `sscanf(rest, "%s", name)`: the first whitespace-delimited
/// token, ignoring anything after it.
fn first_token(rest: &[u8]) -> Option<&str> {
    let text = std::str::from_utf8(rest).ok()?;
    let text = text.trim_end_matches('\0');
    text.split_whitespace().next()
}

async fn dispatch(state: &AppState, session: &mut Session, frame: &[u8]) -> (Vec<u8>, bool) {
    let (verb, rest) = split_verb(frame);
    match verb {
        "f" => {
            let result = state.engine.format(session, state.ncyl, state.nsec).await;
            (reply::status(result, "Format Successfully", "Failed to format"), false)
        }
        "mk" => match first_token(rest) {
            None => (b"mk: Invalid arguments".to_vec(), false),
            Some(name) => {
                let result = state.engine.mk(session, name).await;
                (reply::status(result, "File created successfully", "Failed to create file"), false)
            }
        },
        "mkdir" => match first_token(rest) {
            None => (b"mkdir: Invalid arguments".to_vec(), false),
            Some(name) => {
                let result = state.engine.mkdir(session, name).await;
                (reply::status(result, "Directory created successfully", "Failed to create directory"), false)
            }
        },
        "rm" => match first_token(rest) {
            None => (b"rm: Invalid arguments".to_vec(), false),
            Some(name) => {
                let result = state.engine.rm(session, name).await;
                (reply::status(result, "File removed successfully", "Failed to remove file"), false)
            }
        },
        "rmdir" => match first_token(rest) {
            None => (b"rmdir: Invalid arguments".to_vec(), false),
            Some(name) => {
                let result = state.engine.rmdir(session, name).await;
                (reply::status(result, "Directory removed successfully", "Failed to remove directory"), false)
            }
        },
        "cd" => match first_token(rest) {
            None => (b"cd: Invalid arguments".to_vec(), false),
            Some(name) => {
                let result = state.engine.cd(session, name).await;
                (reply::status(result, "Directory changed successfully", "Failed to change directory"), false)
            }
        },
        "ls" => (dispatch_ls(state, session).await, false),
        "cat" => (dispatch_cat(state, session, rest).await, false),
        "w" => (dispatch_write(state, session, rest).await, false),
        "i" => (dispatch_insert(state, session, rest).await, false),
        "d" => (dispatch_delete(state, session, rest).await, false),
        "chmod" => (dispatch_chmod(state, session, rest).await, false),
        "login" => (dispatch_login(state, session, rest).await, false),
        "logout" => dispatch_logout(state, session).await,
        "p" => (dispatch_path(session), false),
        "clearcache" => {
            state.engine.clear_cache().await;
            (b"Cache cleared".to_vec(), false)
        }
        "e" => (b"Bye!\0".to_vec(), true),
        _ => (b"Unknown command".to_vec(), false),
    }
}

async fn dispatch_ls(state: &AppState, session: &Session) -> Vec<u8> {
    let entries = match state.engine.ls(session).await {
        Ok(entries) => entries,
        Err(ufs::EngineError::NotLoggedIn) => return b"Please login first".to_vec(),
        Err(ufs::EngineError::NotFormatted) => return b"Not formatted".to_vec(),
        Err(_) => return b"Failed to list".to_vec(),
    };

    let mut out = format!(
        "{:<12} {:<6} {:<6} {:<6} {}  {}          {}\n",
        "name", "type", "owner", "perm", "size(B)", "last modify", "create time"
    );
    for e in &entries {
        out.push_str(&format!(
            "{:<12} {:<6} {:<6} {:<4}   {:<6}   {}  {}\n",
            e.name,
            reply::type_str(e.typ),
            e.owner,
            reply::perm_str(e.perm),
            e.size,
            time::format_epoch_secs(e.mtime),
            time::format_epoch_secs(e.ctime),
        ));
    }
    out.pop(); // drop the trailing newline, matching the original's `rep[strlen(rep) - 1] = '\0'`
    out.into_bytes()
}

async fn dispatch_cat(state: &AppState, session: &Session, rest: &[u8]) -> Vec<u8> {
    let Some(name) = first_token(rest) else {
        return b"cat: Invalid arguments".to_vec();
    };
    match state.engine.cat(session, name).await {
        Ok(data) => data,
        Err(ufs::EngineError::NotLoggedIn) => b"Please login first".to_vec(),
        Err(ufs::EngineError::PermissionDenied) => b"Permission denied".to_vec(),
        Err(ufs::EngineError::NotFormatted) => b"Not formatted".to_vec(),
        Err(ufs::EngineError::Generic(_)) => b"Failed to read file".to_vec(),
    }
}

/// `w <name> <len> <data>`, where `<data>` is exactly `<len>` raw bytes that
/// may contain spaces or NULs — so only the name and length are tokenized,
/// and the payload is sliced out by byte offset.
async fn dispatch_write(state: &AppState, session: &Session, rest: &[u8]) -> Vec<u8> {
    let mut fields = rest.splitn(3, |&b| b == b' ');
    let name = fields.next().and_then(|f| std::str::from_utf8(f).ok());
    let len = fields
        .next()
        .and_then(|f| std::str::from_utf8(f).ok())
        .and_then(|s| s.parse::<usize>().ok());
    let data = fields.next().unwrap_or(b"");

    let (Some(name), Some(len)) = (name, len) else {
        return b"w: Invalid arguments".to_vec();
    };
    if data.len() < len {
        return b"w: Invalid arguments".to_vec();
    }
    let result = state.engine.write(session, name, &data[..len]).await;
    reply::status(result, "Write file successfully", "Failed to write file")
}

/// `i <name> <pos> <len> <data>`, same byte-offset slicing as `w`.
async fn dispatch_insert(state: &AppState, session: &Session, rest: &[u8]) -> Vec<u8> {
    let mut fields = rest.splitn(4, |&b| b == b' ');
    let name = fields.next().and_then(|f| std::str::from_utf8(f).ok());
    let pos = fields.next().and_then(|f| std::str::from_utf8(f).ok()).and_then(|s| s.parse::<u32>().ok());
    let len = fields
        .next()
        .and_then(|f| std::str::from_utf8(f).ok())
        .and_then(|s| s.parse::<usize>().ok());
    let data = fields.next().unwrap_or(b"");

    let (Some(name), Some(pos), Some(len)) = (name, pos, len) else {
        return b"i: Invalid arguments".to_vec();
    };
    if data.len() < len {
        return b"i: Invalid arguments".to_vec();
    }
    let result = state.engine.insert(session, name, pos, &data[..len]).await;
    reply::status(result, "Insert file successfully", "Failed to insert file")
}

async fn dispatch_delete(state: &AppState, session: &Session, rest: &[u8]) -> Vec<u8> {
    let Some(text) = std::str::from_utf8(rest).ok().map(|s| s.trim_end_matches('\0')) else {
        return b"d: Invalid arguments".to_vec();
    };
    let mut it = text.split_whitespace();
    let name = it.next();
    let pos = it.next().and_then(|s| s.parse::<u32>().ok());
    let len = it.next().and_then(|s| s.parse::<u32>().ok());

    let (Some(name), Some(pos), Some(len)) = (name, pos, len) else {
        return b"d: Invalid arguments".to_vec();
    };
    let result = state.engine.delete(session, name, pos, len).await;
    reply::status(result, "Delete file successfully", "Failed to delete file")
}

async fn dispatch_chmod(state: &AppState, session: &Session, rest: &[u8]) -> Vec<u8> {
    let Some(text) = std::str::from_utf8(rest).ok().map(|s| s.trim_end_matches('\0')) else {
        return b"chmod: Invalid arguments".to_vec();
    };
    let mut it = text.split_whitespace();
    let name = it.next();
    let perm = it.next().and_then(|s| s.parse::<u16>().ok());

    let (Some(name), Some(perm)) = (name, perm) else {
        return b"chmod: Invalid arguments".to_vec();
    };
    let result = state.engine.chmod(session, name, perm, false).await;
    reply::status(result, "Change permission successfully", "Failed to change permission")
}

async fn dispatch_login(state: &AppState, session: &mut Session, rest: &[u8]) -> Vec<u8> {
    let Some(token) = first_token(rest) else {
        return b"Failed to login".to_vec();
    };
    let Some(uid) = token.parse::<u32>().ok() else {
        return b"Invalid argument".to_vec();
    };
    match state.engine.login(session, uid).await {
        Ok(()) => b"User login".to_vec(),
        Err(ufs::EngineError::PermissionDenied) => b"User already logged in".to_vec(),
        Err(_) => b"Failed to login".to_vec(),
    }
}

async fn dispatch_logout(state: &AppState, session: &mut Session) -> (Vec<u8>, bool) {
    match state.engine.logout(session).await {
        Ok(()) => (b"User logout and directory deleted".to_vec(), true),
        Err(ufs::EngineError::PermissionDenied) => (b"Superuser cannot logout".to_vec(), false),
        Err(ufs::EngineError::NotLoggedIn) => (b"Please login first".to_vec(), false),
        Err(_) => (b"Failed to logout".to_vec(), false),
    }
}

fn dispatch_path(session: &Session) -> Vec<u8> {
    if session.is_logged_in() {
        format!("user_{}:{}$", session.uid, session.path).into_bytes()
    } else {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc as StdArc;
    use tokio::io::duplex;
    use ufs::device::MemDisk;

    async fn toy_app_state(nblocks: u32) -> AppState {
        let device = StdArc::new(MemDisk::new(nblocks));
        let volume = Volume::new(device, 8);
        let engine = Engine::new(StdArc::new(Mutex::new(volume)));
        AppState { engine, ncyl: 8, nsec: nblocks / 8 }
    }

    async fn drive(state: &AppState, session: &mut Session, cmd: &[u8]) -> Vec<u8> {
        dispatch(state, session, cmd).await.0
    }

    #[tokio::test]
    async fn format_requires_superuser_login() {
        let state = toy_app_state(4096).await;
        let mut session = Session::new();
        assert_eq!(drive(&state, &mut session, b"f").await, b"Please login first");

        assert_eq!(drive(&state, &mut session, b"login 1").await, b"User login");
        assert_eq!(drive(&state, &mut session, b"f").await, b"Format Successfully");
    }

    #[tokio::test]
    async fn end_to_end_session_matches_the_documented_flow() {
        let state = toy_app_state(4096).await;
        let mut session = Session::new();
        drive(&state, &mut session, b"login 1").await;
        drive(&state, &mut session, b"f").await;

        assert_eq!(drive(&state, &mut session, b"mk hello").await, b"File created successfully");
        assert_eq!(drive(&state, &mut session, b"w hello 5 world").await, b"Write file successfully");
        assert_eq!(drive(&state, &mut session, b"cat hello").await, b"world");
        assert_eq!(drive(&state, &mut session, b"i hello 0 1 a").await, b"Insert file successfully");
        assert_eq!(drive(&state, &mut session, b"cat hello").await, b"aworld");
        assert_eq!(drive(&state, &mut session, b"d hello 0 1").await, b"Delete file successfully");
        assert_eq!(drive(&state, &mut session, b"cat hello").await, b"world");

        let ls = drive(&state, &mut session, b"ls").await;
        let ls_text = String::from_utf8(ls).unwrap();
        assert!(ls_text.starts_with("name"));
        assert!(ls_text.contains("hello"));

        let (reply, close) = dispatch(&state, &mut session, b"logout").await;
        assert_eq!(reply, b"Superuser cannot logout");
        assert!(!close);
    }

    #[tokio::test]
    async fn unknown_verb_is_reported() {
        let state = toy_app_state(4096).await;
        let mut session = Session::new();
        assert_eq!(drive(&state, &mut session, b"bogus").await, b"Unknown command");
    }

    #[tokio::test]
    async fn exit_command_closes_the_connection() {
        let state = toy_app_state(4096).await;
        let mut session = Session::new();
        let (reply, close) = dispatch(&state, &mut session, b"e").await;
        assert_eq!(reply, b"Bye!\0");
        assert!(close);
    }

    /// Drives a whole connection through an in-process duplex pipe, the same
    /// pattern `ufs::disk`'s own client/server test uses, to exercise framing
    /// end to end rather than just `dispatch`.
    #[tokio::test]
    async fn full_connection_roundtrips_over_a_duplex_pipe() {
        let state = toy_app_state(4096).await;
        let (mut client, server_io) = duplex(8192);
        tokio::spawn(handle_connection(server_io, state));

        write_frame(&mut client, b"login 1").await.unwrap();
        assert_eq!(read_frame(&mut client).await.unwrap(), b"User login");
        write_frame(&mut client, b"f").await.unwrap();
        assert_eq!(read_frame(&mut client).await.unwrap(), b"Format Successfully");
        write_frame(&mut client, b"e").await.unwrap();
        assert_eq!(read_frame(&mut client).await.unwrap(), b"Bye!\0");
    }
}
