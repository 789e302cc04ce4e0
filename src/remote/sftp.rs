//! SFTP remote tree over libssh2
//!
//! libssh2 is blocking, so every call runs on tokio's blocking pool. The
//! engine awaits each call before issuing the next one, which keeps the
//! session single-threaded in practice.

use std::io::Read;
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use ssh2::{FileStat, Session, Sftp};

use super::{child_path, RemoteTree, RemoteWalker, SourceReader};
use crate::error::{Result, SyncError};
use crate::locator::SftpLocator;
use crate::types::RemoteEntry;

/// Default private keys tried after the agent
const DEFAULT_KEY_FILES: [&str; 3] = ["id_ed25519", "id_rsa", "id_ecdsa"];

/// How to authenticate the SSH session
#[derive(Debug, Clone)]
pub struct SshAuth {
    /// Try keys held by ssh-agent (`SSH_AUTH_SOCK`)
    pub use_agent: bool,
    /// Try `~/.ssh/id_*` without passphrase
    pub use_default_keys: bool,
    /// Prompt on the terminal when no password is in the locator
    pub prompt_password: bool,
}

impl Default for SshAuth {
    fn default() -> Self {
        Self {
            use_agent: true,
            use_default_keys: true,
            prompt_password: true,
        }
    }
}

/// Connected SFTP session
pub struct SftpTree {
    session: Session,
    sftp: Arc<Sftp>,
}

impl SftpTree {
    /// Connect and authenticate
    pub async fn connect(locator: &SftpLocator, auth: &SshAuth) -> Result<Self> {
        let locator = locator.clone();
        let auth = auth.clone();
        tokio::task::spawn_blocking(move || connect_blocking(&locator, &auth))
            .await
            .map_err(|e| SyncError::Connect(format!("connect task failed: {}", e)))?
    }

    /// Close the SFTP channel and disconnect the SSH session
    pub async fn close(self) -> Result<()> {
        let SftpTree { session, sftp } = self;
        tokio::task::spawn_blocking(move || {
            drop(sftp);
            session
                .disconnect(None, "sftpsync finished", None)
                .map_err(|e| SyncError::Connect(format!("disconnect failed: {}", e)))
        })
        .await
        .map_err(|e| SyncError::Connect(format!("disconnect task failed: {}", e)))?
    }
}

fn connect_blocking(locator: &SftpLocator, auth: &SshAuth) -> Result<SftpTree> {
    let address = locator.address();
    let tcp = TcpStream::connect(&address)
        .map_err(|e| SyncError::Connect(format!("TCP connect to {} failed: {}", address, e)))?;
    let mut session =
        Session::new().map_err(|e| SyncError::Connect(format!("SSH session: {}", e)))?;
    session.set_tcp_stream(tcp);
    session
        .handshake()
        .map_err(|e| SyncError::Connect(format!("SSH handshake with {} failed: {}", address, e)))?;

    let username = match &locator.username {
        Some(user) => user.clone(),
        None => local_username()?,
    };
    authenticate(&session, &username, locator, auth)?;

    let sftp = session
        .sftp()
        .map_err(|e| SyncError::Connect(format!("SFTP subsystem: {}", e)))?;
    tracing::info!("Connected to {} as {}", address, username);

    Ok(SftpTree {
        session,
        sftp: Arc::new(sftp),
    })
}

/// Account name of the local user, falling back to `USER`/`USERNAME`
fn local_username() -> Result<String> {
    #[cfg(unix)]
    if let Some(name) = uzers::get_current_username().and_then(|n| n.into_string().ok()) {
        return Ok(name);
    }
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .map_err(|_| {
            SyncError::Connect("no username in source and local user is unknown".to_string())
        })
}

/// Agent, then default key files, then password
fn authenticate(
    session: &Session,
    username: &str,
    locator: &SftpLocator,
    auth: &SshAuth,
) -> Result<()> {
    let mut failures: Vec<String> = Vec::new();

    if auth.use_agent && std::env::var_os("SSH_AUTH_SOCK").is_some() {
        if let Err(e) = session.userauth_agent(username) {
            failures.push(format!("agent: {}", e));
        }
    }

    if !session.authenticated() && auth.use_default_keys {
        if let Some(home) = dirs::home_dir() {
            for name in DEFAULT_KEY_FILES {
                let key = home.join(".ssh").join(name);
                if !key.exists() {
                    continue;
                }
                match session.userauth_pubkey_file(username, None, &key, None) {
                    Ok(()) if session.authenticated() => break,
                    Ok(()) => {}
                    Err(e) => failures.push(format!("{}: {}", key.display(), e)),
                }
            }
        }
    }

    if !session.authenticated() {
        let password = match &locator.password {
            Some(password) => Some(password.clone()),
            None if auth.prompt_password => {
                let prompt = format!("{}@{}'s Password: ", username, locator.hostname);
                Some(rpassword::prompt_password(prompt)?)
            }
            None => None,
        };
        if let Some(password) = password {
            if let Err(e) = session.userauth_password(username, &password) {
                failures.push(format!("password: {}", e));
            }
        }
    }

    if !session.authenticated() {
        tracing::debug!("SSH authentication attempts: {}", failures.join("; "));
        return Err(SyncError::Connect(format!(
            "authentication failed for {}: {}",
            username,
            if failures.is_empty() {
                "no usable method".to_string()
            } else {
                failures.join("; ")
            }
        )));
    }
    Ok(())
}

#[async_trait]
impl RemoteTree for SftpTree {
    fn walk(&self, root: &str) -> Box<dyn RemoteWalker + '_> {
        Box::new(SftpWalker {
            sftp: Arc::clone(&self.sftp),
            root: Some(root.to_string()),
            pending_dir: None,
            stack: Vec::new(),
        })
    }

    async fn open(&self, path: &str) -> Result<Box<dyn SourceReader>> {
        let sftp = Arc::clone(&self.sftp);
        let owned = path.to_string();
        let file = blocking(path, move || sftp.open(Path::new(&owned))).await?;
        Ok(Box::new(SftpReader {
            path: path.to_string(),
            file: Some(file),
        }))
    }
}

struct SftpWalker {
    sftp: Arc<Sftp>,
    root: Option<String>,
    pending_dir: Option<String>,
    stack: Vec<RemoteEntry>,
}

impl SftpWalker {
    async fn children(&self, dir: &str) -> Result<Vec<RemoteEntry>> {
        let sftp = Arc::clone(&self.sftp);
        let owned = dir.to_string();
        let mut listing: Vec<(PathBuf, FileStat)> =
            blocking(dir, move || sftp.readdir(Path::new(&owned))).await?;
        listing.sort_by(|a, b| a.0.file_name().cmp(&b.0.file_name()));

        listing
            .into_iter()
            .map(|(path, stat)| {
                let name = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .ok_or_else(|| SyncError::remote(dir, format!("non-UTF-8 entry {:?}", path)))?;
                Ok(to_entry(child_path(dir, name), &stat))
            })
            .collect()
    }
}

#[async_trait]
impl RemoteWalker for SftpWalker {
    async fn next_entry(&mut self) -> Option<Result<RemoteEntry>> {
        if let Some(root) = self.root.take() {
            let sftp = Arc::clone(&self.sftp);
            let owned = root.clone();
            let stat = match blocking(&root, move || sftp.stat(Path::new(&owned))).await {
                Ok(stat) => stat,
                Err(e) => return Some(Err(e)),
            };
            let entry = to_entry(root, &stat);
            if entry.is_dir {
                self.pending_dir = Some(entry.path.clone());
            }
            return Some(Ok(entry));
        }

        if let Some(dir) = self.pending_dir.take() {
            match self.children(&dir).await {
                Ok(children) => self.stack.extend(children.into_iter().rev()),
                Err(e) => return Some(Err(e)),
            }
        }

        let entry = self.stack.pop()?;
        if entry.is_dir {
            self.pending_dir = Some(entry.path.clone());
        }
        Some(Ok(entry))
    }
}

struct SftpReader {
    path: String,
    file: Option<ssh2::File>,
}

#[async_trait]
impl SourceReader for SftpReader {
    async fn read_chunk(&mut self, max: usize) -> Result<Option<Bytes>> {
        let mut file = self
            .file
            .take()
            .ok_or_else(|| SyncError::remote(&self.path, "read after failed read"))?;
        let (file, read) = tokio::task::spawn_blocking(move || {
            let mut buf = vec![0u8; max.max(1)];
            let read = file.read(&mut buf).map(|n| {
                buf.truncate(n);
                buf
            });
            (file, read)
        })
        .await
        .map_err(|e| SyncError::remote(&self.path, e))?;
        self.file = Some(file);

        let buf = read.map_err(|e| SyncError::remote(&self.path, e))?;
        if buf.is_empty() {
            Ok(None)
        } else {
            Ok(Some(Bytes::from(buf)))
        }
    }

    async fn close(mut self: Box<Self>) -> Result<()> {
        let Some(mut file) = self.file.take() else {
            return Ok(());
        };
        let path = self.path.clone();
        blocking(&path, move || file.close()).await
    }
}

/// Run a libssh2 call on the blocking pool, tagging errors with `path`
async fn blocking<T, F>(path: &str, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> std::result::Result<T, ssh2::Error> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| SyncError::remote(path, e))?
        .map_err(|e| SyncError::remote(path, e))
}

fn to_entry(path: String, stat: &FileStat) -> RemoteEntry {
    let modified = stat
        .mtime
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs as i64, 0))
        .unwrap_or_default();
    RemoteEntry {
        path,
        is_dir: stat.is_dir(),
        size: stat.size.unwrap_or(0),
        modified,
    }
}
